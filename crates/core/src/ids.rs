//! Identifier generation for completed uploads.
//!
//! Generated values are only candidates: uniqueness is enforced by the
//! metadata store and callers retry on collision.

use rand::Rng;
use uuid::Uuid;

/// Characters a slug is drawn from.
pub const SLUG_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Length of generated slugs.
pub const SLUG_LEN: usize = 6;

/// Source of candidate identifiers for a new upload record.
pub trait IdProvider: Send + Sync {
    /// A short URL-safe slug.
    fn slug(&self) -> String;

    /// A globally unique record id.
    fn upload_id(&self) -> Uuid;
}

/// Random slugs and time-ordered (v7) ids.
#[derive(Clone, Copy, Debug, Default)]
pub struct RandomIdProvider;

impl IdProvider for RandomIdProvider {
    fn slug(&self) -> String {
        let mut rng = rand::rng();
        (0..SLUG_LEN)
            .map(|_| SLUG_ALPHABET[rng.random_range(0..SLUG_ALPHABET.len())] as char)
            .collect()
    }

    fn upload_id(&self) -> Uuid {
        Uuid::now_v7()
    }
}
