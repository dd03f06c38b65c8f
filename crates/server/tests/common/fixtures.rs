//! Test fixtures for generating test data.

use bytes::Bytes;
use parcel_core::ChunkSubmission;

/// Generate deterministic test data based on a seed.
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    for chunk in data.chunks_mut(8) {
        // Simple LCG for deterministic data
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    Bytes::from(data)
}

/// Split data into chunks of specified size.
pub fn split_into_chunks(data: &[u8], chunk_size: usize) -> Vec<Bytes> {
    data.chunks(chunk_size)
        .map(Bytes::copy_from_slice)
        .collect()
}

/// Chunk metadata for a file of `file_size` bytes in `total_chunks` pieces.
#[allow(dead_code)]
pub fn submission(file_name: &str, file_size: u64, total_chunks: u32) -> ChunkSubmission {
    ChunkSubmission {
        total_chunks,
        file_name: file_name.to_string(),
        file_type: None,
        file_size,
    }
}

/// Query string of a chunk PUT for a [`submission`].
#[allow(dead_code)]
pub fn chunk_query(submission: &ChunkSubmission) -> String {
    let mut query = format!(
        "totalChunks={}&fileName={}&fileSize={}",
        submission.total_chunks, submission.file_name, submission.file_size
    );
    if let Some(file_type) = &submission.file_type {
        query.push_str("&fileType=");
        query.push_str(file_type);
    }
    query
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_bytes_deterministic() {
        let a = seeded_bytes(42, 100);
        let b = seeded_bytes(42, 100);
        assert_eq!(a, b);

        let c = seeded_bytes(43, 100);
        assert_ne!(a, c);
    }

    #[test]
    fn test_split_into_chunks() {
        let data = seeded_bytes(1, 100);
        let chunks = split_into_chunks(&data, 30);
        assert_eq!(chunks.len(), 4); // 30 + 30 + 30 + 10

        let reassembled: Vec<u8> = chunks.iter().flat_map(|c| c.iter().copied()).collect();
        assert_eq!(reassembled, data.as_ref());
    }
}
