//! Fixed-size chunking of recording files.
//!
//! Chunks are read one at a time into a single buffer, so memory stays
//! bounded by the chunk size regardless of file length.

use std::path::Path;

use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::error::Result;

/// Default chunk size: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// A chunk of a recording with its sequence index.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Zero-based index of this chunk.
    pub index: u32,
    pub bytes: Vec<u8>,
}

/// Number of chunks a file of `len` bytes splits into.
#[must_use]
pub fn chunk_count(len: u64, chunk_size: usize) -> u64 {
    let size = chunk_size.max(1) as u64;
    len.div_ceil(size)
}

/// Sequential chunk reader over a file.
pub struct ChunkReader {
    file: File,
    chunk_size: usize,
    next_index: u32,
    done: bool,
}

impl ChunkReader {
    /// Open `path` for chunked reading.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub async fn open(path: &Path, chunk_size: usize) -> Result<Self> {
        let file = File::open(path).await?;
        Ok(Self {
            file,
            chunk_size: chunk_size.max(1),
            next_index: 0,
            done: false,
        })
    }

    /// Read the next chunk. Every chunk but the last is exactly `chunk_size` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if a read fails.
    pub async fn next_chunk(&mut self) -> Result<Option<Chunk>> {
        if self.done {
            return Ok(None);
        }

        let mut buf = vec![0u8; self.chunk_size];
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.file.read(&mut buf[filled..]).await?;
            if n == 0 {
                self.done = true;
                break;
            }
            filled += n;
        }

        if filled == 0 {
            return Ok(None);
        }
        buf.truncate(filled);

        let chunk = Chunk {
            index: self.next_index,
            bytes: buf,
        };
        self.next_index += 1;
        Ok(Some(chunk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_chunk_count() {
        assert_eq!(chunk_count(0, 10), 0);
        assert_eq!(chunk_count(10, 10), 1);
        assert_eq!(chunk_count(11, 10), 2);
        assert_eq!(chunk_count(4_200_000, DEFAULT_CHUNK_SIZE), 5);
    }

    #[tokio::test]
    async fn test_reader_splits_with_partial_tail() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[7u8; 25]).unwrap();

        let mut reader = ChunkReader::open(file.path(), 10).await.unwrap();
        let mut sizes = Vec::new();
        while let Some(chunk) = reader.next_chunk().await.unwrap() {
            assert_eq!(chunk.index as usize, sizes.len());
            sizes.push(chunk.bytes.len());
        }
        assert_eq!(sizes, vec![10, 10, 5]);
    }

    #[tokio::test]
    async fn test_exact_multiple_has_no_empty_tail() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[1u8; 20]).unwrap();

        let mut reader = ChunkReader::open(file.path(), 10).await.unwrap();
        assert!(reader.next_chunk().await.unwrap().is_some());
        assert!(reader.next_chunk().await.unwrap().is_some());
        assert!(reader.next_chunk().await.unwrap().is_none());
    }
}
