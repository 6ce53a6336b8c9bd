//! Destination byte sink
//!
//! Small datasets are assembled in memory; anything larger goes to an
//! anonymous temporary file that is cleaned up when the sink drops. Chunks
//! arrive in arbitrary order, so the sink only supports positional writes.

use std::io::SeekFrom;
use std::path::Path;

use tempfile::{NamedTempFile, TempPath};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::debug;

use crate::errors::{DownloadError, DownloadResult};

/// Where downloaded bytes accumulate
#[derive(Debug)]
pub enum DataSink {
    /// In-memory buffer, pre-sized to the dataset length
    Memory(Vec<u8>),
    /// Temporary file on disk
    File { file: fs::File, path: TempPath },
}

impl DataSink {
    /// Choose a sink for a dataset of `length` bytes
    pub fn for_length(length: u64, memory_threshold: u64) -> DownloadResult<DataSink> {
        if length > memory_threshold {
            let (file, path) = NamedTempFile::new().map_err(DownloadError::Io)?.into_parts();
            debug!("Spilling {} byte dataset to {:?}", length, path);
            Ok(DataSink::File { file: fs::File::from_std(file), path })
        } else {
            Ok(DataSink::Memory(vec![0; length as usize]))
        }
    }

    /// Write `data` at `offset`
    pub async fn write_at(&mut self, offset: u64, data: &[u8]) -> DownloadResult<()> {
        match self {
            DataSink::Memory(buffer) => {
                let start = offset as usize;
                let end = start + data.len();
                if end > buffer.len() {
                    buffer.resize(end, 0);
                }
                buffer[start..end].copy_from_slice(data);
            }
            DataSink::File { file, .. } => {
                file.seek(SeekFrom::Start(offset)).await?;
                file.write_all(data).await?;
            }
        }
        Ok(())
    }

    /// Read the full assembled payload back out
    pub async fn to_bytes(&mut self) -> DownloadResult<Vec<u8>> {
        match self {
            DataSink::Memory(buffer) => Ok(buffer.clone()),
            DataSink::File { file, .. } => {
                file.flush().await?;
                file.seek(SeekFrom::Start(0)).await?;
                let mut bytes = Vec::new();
                file.read_to_end(&mut bytes).await?;
                Ok(bytes)
            }
        }
    }

    /// Copy the assembled payload to `target`
    ///
    /// Refuses to replace an existing non-empty file. The copy goes through
    /// a sibling temp file and a rename so a crash cannot leave a half
    /// written target behind.
    pub async fn copy_to_file(&mut self, target: &Path) -> DownloadResult<()> {
        if let Ok(metadata) = fs::metadata(target).await {
            if metadata.len() > 0 {
                return Err(DownloadError::TargetExists { path: target.to_path_buf() });
            }
        }
        if let Some(parent) = target.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let staging = target.with_extension("part");
        match self {
            DataSink::Memory(buffer) => {
                fs::write(&staging, &buffer).await?;
            }
            DataSink::File { file, path } => {
                file.flush().await?;
                fs::copy(&*path, &staging).await?;
            }
        }
        fs::rename(&staging, target).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_small_dataset_stays_in_memory() {
        let sink = DataSink::for_length(1000, 50_000).unwrap();
        assert!(matches!(sink, DataSink::Memory(_)));
    }

    #[tokio::test]
    async fn test_large_dataset_spills_to_disk() {
        let sink = DataSink::for_length(50_001, 50_000).unwrap();
        assert!(matches!(sink, DataSink::File { .. }));
    }

    #[tokio::test]
    async fn test_out_of_order_writes_assemble() {
        for threshold in [0u64, 50_000] {
            let mut sink = DataSink::for_length(10, threshold).unwrap();
            sink.write_at(5, b"world").await.unwrap();
            sink.write_at(0, b"hello").await.unwrap();
            assert_eq!(sink.to_bytes().await.unwrap(), b"helloworld");
        }
    }

    #[tokio::test]
    async fn test_copy_to_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("nested").join("out.bin");

        let mut sink = DataSink::for_length(5, 50_000).unwrap();
        sink.write_at(0, b"bytes").await.unwrap();
        sink.copy_to_file(&target).await.unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"bytes");
    }

    #[tokio::test]
    async fn test_copy_refuses_non_empty_target() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("existing.bin");
        std::fs::write(&target, b"occupied").unwrap();

        let mut sink = DataSink::for_length(3, 50_000).unwrap();
        sink.write_at(0, b"new").await.unwrap();
        let err = sink.copy_to_file(&target).await.unwrap_err();
        assert!(matches!(err, DownloadError::TargetExists { .. }));
        assert_eq!(std::fs::read(&target).unwrap(), b"occupied");
    }

    #[tokio::test]
    async fn test_copy_overwrites_empty_target() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("empty.bin");
        std::fs::write(&target, b"").unwrap();

        let mut sink = DataSink::for_length(3, 50_000).unwrap();
        sink.write_at(0, b"new").await.unwrap();
        sink.copy_to_file(&target).await.unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"new");
    }
}
