//! File name, type and size checks applied before any storage work.

use crate::config::UploadConfig;
use crate::{Error, Result};

/// Content type used when the client does not send one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

const MAX_FILE_NAME_LEN: usize = 255;

/// Normalize a client supplied file name.
///
/// Runs of whitespace become a single `_`; path separators, control
/// characters and leading dots are removed so the name is safe inside a
/// storage key.
pub fn sanitize_file_name(name: &str) -> Result<String> {
    let mut cleaned = String::with_capacity(name.len());
    let mut in_space = false;
    for c in name.trim().chars() {
        if c.is_whitespace() {
            if !in_space {
                cleaned.push('_');
            }
            in_space = true;
            continue;
        }
        in_space = false;
        if c == '/' || c == '\\' || c.is_control() {
            continue;
        }
        cleaned.push(c);
    }

    // A leading dot would make a hidden file inside the storage key.
    let mut out = cleaned.trim_start_matches('.').to_string();
    if out.is_empty() {
        return Err(Error::InvalidFileName(name.to_string()));
    }
    if out.len() > MAX_FILE_NAME_LEN {
        let mut cut = MAX_FILE_NAME_LEN;
        while !out.is_char_boundary(cut) {
            cut -= 1;
        }
        out.truncate(cut);
    }
    Ok(out)
}

/// The content type to record, defaulting to `application/octet-stream`.
pub fn normalize_content_type(content_type: Option<&str>) -> String {
    content_type
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| t.to_ascii_lowercase())
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string())
}

/// Lowercase extension of a file name including the leading dot.
fn extension(file_name: &str) -> Option<String> {
    let (_, ext) = file_name.rsplit_once('.')?;
    if ext.is_empty() {
        return None;
    }
    Some(format!(".{}", ext.to_ascii_lowercase()))
}

/// Check a file against the upload policy.
///
/// A file is accepted when either its content type or its extension is on
/// the allow-list, and its size does not exceed the limit.
pub fn validate_file(
    config: &UploadConfig,
    file_name: &str,
    content_type: &str,
    size: u64,
) -> Result<()> {
    let type_ok = config
        .allowed_mime_types
        .iter()
        .any(|t| t.eq_ignore_ascii_case(content_type));
    let ext_ok = extension(file_name)
        .is_some_and(|ext| config.allowed_extensions.iter().any(|e| *e == ext));
    if !type_ok && !ext_ok {
        return Err(Error::DisallowedType(format!("{file_name} ({content_type})")));
    }
    if size > config.max_file_size {
        return Err(Error::FileTooLarge {
            size,
            limit: config.max_file_size,
        });
    }
    Ok(())
}

/// Check the chunk coordinates of a submission.
pub fn validate_chunk_index(chunk_index: u32, total_chunks: u32) -> Result<()> {
    if total_chunks == 0 {
        return Err(Error::InvalidChunk("total chunks must be at least 1".to_string()));
    }
    if chunk_index >= total_chunks {
        return Err(Error::InvalidChunk(format!(
            "chunk index {chunk_index} out of range for {total_chunks} chunks"
        )));
    }
    Ok(())
}

/// Check a declared chunk count against the declared file size.
///
/// Every chunk carries at least one byte, so a file cannot have more chunks
/// than bytes. The count must also fit the metadata store's 32-bit columns.
pub fn validate_chunk_count(total_chunks: u32, file_size: u64) -> Result<()> {
    if total_chunks == 0 {
        return Err(Error::InvalidChunk("total chunks must be at least 1".to_string()));
    }
    if u64::from(total_chunks) > file_size.max(1) {
        return Err(Error::InvalidChunk(format!(
            "{total_chunks} chunks declared for a {file_size} byte file"
        )));
    }
    if i32::try_from(total_chunks).is_err() {
        return Err(Error::InvalidChunk(format!(
            "{total_chunks} chunks exceeds the supported maximum of {}",
            i32::MAX
        )));
    }
    Ok(())
}
