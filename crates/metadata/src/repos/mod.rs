//! Repository traits for metadata operations.

pub mod chunks;
pub mod progress;
pub mod sessions;
pub mod uploads;

pub use chunks::ChunkRepo;
pub use progress::ProgressRepo;
pub use sessions::{FinalizeClaim, SessionRepo};
pub use uploads::UploadRepo;
