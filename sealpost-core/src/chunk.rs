//! Chunk planning: split encrypted file content into fixed-size chunks and track progress.

use std::ops::Range;

use crate::protocol::{CHUNK_SIZE, MAX_FILE_NAME_LEN};

/// Number of chunks needed for `ciphertext_size` bytes: ceil(size / CHUNK_SIZE).
pub fn chunk_count(ciphertext_size: usize) -> usize {
    ciphertext_size.div_ceil(CHUNK_SIZE)
}

/// Truncate a file name to the longest prefix of at most `MAX_FILE_NAME_LEN` bytes
/// that ends on a character boundary.
pub fn clamp_file_name(name: &str) -> &str {
    if name.len() <= MAX_FILE_NAME_LEN {
        return name;
    }
    let mut end = MAX_FILE_NAME_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

/// Progress of one transfer pass. Created when a pass begins, dropped when it
/// completes or is abandoned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTransferState {
    pub file_name: String,
    pub plaintext_size: u32,
    pub ciphertext_size: u32,
    /// 1-based index of the next chunk to send; `chunk_count + 1` once all are sent.
    pub chunk_index: u16,
    pub chunk_count: u16,
}

impl FileTransferState {
    pub fn new(
        file_name: &str,
        plaintext_size: usize,
        ciphertext_size: usize,
    ) -> Result<Self, ChunkError> {
        let plaintext_size = u32::try_from(plaintext_size)
            .map_err(|_| ChunkError::PlaintextTooLarge(plaintext_size))?;
        if ciphertext_size == 0 {
            return Err(ChunkError::EmptyCiphertext);
        }
        let ciphertext_size_u32 = u32::try_from(ciphertext_size)
            .map_err(|_| ChunkError::CiphertextTooLarge(ciphertext_size))?;
        let count = u16::try_from(chunk_count(ciphertext_size))
            .map_err(|_| ChunkError::CiphertextTooLarge(ciphertext_size))?;
        Ok(Self {
            file_name: clamp_file_name(file_name).to_owned(),
            plaintext_size,
            ciphertext_size: ciphertext_size_u32,
            chunk_index: 1,
            chunk_count: count,
        })
    }

    /// Byte range within the ciphertext for 1-based chunk `index`.
    pub fn chunk_range(&self, index: u16) -> Option<Range<usize>> {
        if index == 0 || index > self.chunk_count {
            return None;
        }
        let start = (index as usize - 1) * CHUNK_SIZE;
        let end = (start + CHUNK_SIZE).min(self.ciphertext_size as usize);
        Some(start..end)
    }

    /// Range of the next chunk to send, or None when every chunk went out.
    pub fn current_range(&self) -> Option<Range<usize>> {
        self.chunk_range(self.chunk_index)
    }

    pub fn is_last(&self, index: u16) -> bool {
        index == self.chunk_count
    }

    pub fn advance(&mut self) {
        if self.chunk_index <= self.chunk_count {
            self.chunk_index += 1;
        }
    }

    /// Rewind to chunk 1 for a full re-send.
    pub fn restart(&mut self) {
        self.chunk_index = 1;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    #[error("file is too large to transfer ({0} bytes)")]
    PlaintextTooLarge(usize),
    #[error("encrypted file is too large to transfer ({0} bytes)")]
    CiphertextTooLarge(usize),
    #[error("encrypted file is empty")]
    EmptyCiphertext,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn two_thousand_bytes_is_two_chunks() {
        let state = FileTransferState::new("a.bin", 2000, 2000).unwrap();
        assert_eq!(state.chunk_count, 2);
        assert_eq!(state.chunk_range(1), Some(0..1024));
        assert_eq!(state.chunk_range(2), Some(1024..2000));
        assert_eq!(state.chunk_range(3), None);
        assert_eq!(state.chunk_range(0), None);
    }

    #[test]
    fn advance_walks_every_chunk_once() {
        let mut state = FileTransferState::new("a.bin", 10, 3000).unwrap();
        let mut seen = Vec::new();
        while let Some(r) = state.current_range() {
            seen.push((state.chunk_index, r.len()));
            state.advance();
        }
        assert_eq!(seen, vec![(1, 1024), (2, 1024), (3, 952)]);
        assert_eq!(state.current_range(), None);
        state.advance();
        assert_eq!(state.chunk_index, 4);
        state.restart();
        assert_eq!(state.current_range(), Some(0..1024));
    }

    #[test]
    fn empty_ciphertext_rejected() {
        assert!(matches!(
            FileTransferState::new("a", 0, 0),
            Err(ChunkError::EmptyCiphertext)
        ));
    }

    #[test]
    fn too_many_chunks_rejected() {
        let size = (u16::MAX as usize + 1) * CHUNK_SIZE;
        assert!(matches!(
            FileTransferState::new("a", 1, size),
            Err(ChunkError::CiphertextTooLarge(_))
        ));
    }

    #[test]
    fn long_file_name_clamped_on_char_boundary() {
        let name = "é".repeat(200); // 400 bytes
        let clamped = clamp_file_name(&name);
        assert!(clamped.len() <= MAX_FILE_NAME_LEN);
        assert_eq!(clamped.len(), 254);
        let state = FileTransferState::new(&name, 1, 1).unwrap();
        assert_eq!(state.file_name, clamped);
    }

    proptest! {
        #[test]
        fn chunk_lengths_sum_to_ciphertext(size in 1usize..200_000) {
            let state = FileTransferState::new("f", size, size).unwrap();
            prop_assert_eq!(state.chunk_count as usize, size.div_ceil(1024));
            let lens: Vec<usize> = (1..=state.chunk_count)
                .map(|i| state.chunk_range(i).unwrap().len())
                .collect();
            prop_assert_eq!(lens.iter().sum::<usize>(), size);
            let last = *lens.last().unwrap();
            let expected_last = if size % 1024 == 0 { 1024 } else { size % 1024 };
            prop_assert_eq!(last, expected_last);
            prop_assert!(lens[..lens.len() - 1].iter().all(|&l| l == 1024));
        }
    }
}
