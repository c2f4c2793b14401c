use std::path::{Path, PathBuf};

use anyhow::Context;
use jobcat_core::Timestamp;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ArchivedSnapshot {
    pub content_hash: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
    pub deduplicated: bool,
}

/// Write-once copies of ingested snapshot files, addressed by content hash.
#[derive(Debug, Clone)]
pub struct SnapshotArchive {
    root: PathBuf,
}

impl SnapshotArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    pub fn snapshot_relative_path(&self, ingested_at: Timestamp, content_hash: &str) -> PathBuf {
        PathBuf::from(ingested_at.format("%Y%m%d_%H%M%S").to_string())
            .join(format!("{content_hash}.csv"))
    }

    pub async fn archive_file(
        &self,
        ingested_at: Timestamp,
        source: &Path,
    ) -> anyhow::Result<ArchivedSnapshot> {
        let bytes = fs::read(source)
            .await
            .with_context(|| format!("reading snapshot {}", source.display()))?;
        self.store_bytes(ingested_at, &bytes).await
    }

    /// Stores `bytes` under a hash-addressed path via temp file and rename.
    /// Content already present at that path is left alone.
    pub async fn store_bytes(
        &self,
        ingested_at: Timestamp,
        bytes: &[u8],
    ) -> anyhow::Result<ArchivedSnapshot> {
        let content_hash = Self::sha256_hex(bytes);
        let relative_path = self.snapshot_relative_path(ingested_at, &content_hash);
        let absolute_path = self.root.join(&relative_path);
        let parent = absolute_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());

        fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("creating archive directory {}", parent.display()))?;

        let mut archived = ArchivedSnapshot {
            content_hash,
            relative_path,
            absolute_path,
            byte_size: bytes.len(),
            deduplicated: true,
        };

        if fs::try_exists(&archived.absolute_path)
            .await
            .with_context(|| format!("checking archive path {}", archived.absolute_path.display()))?
        {
            return Ok(archived);
        }

        let temp_path = parent.join(format!(".{}.tmp", Uuid::new_v4()));
        write_temp(&temp_path, bytes).await?;

        match fs::rename(&temp_path, &archived.absolute_path).await {
            Ok(()) => {
                archived.deduplicated = false;
                Ok(archived)
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                let _ = fs::remove_file(&temp_path).await;
                Ok(archived)
            }
            Err(err) => {
                let _ = fs::remove_file(&temp_path).await;
                Err(err).with_context(|| {
                    format!(
                        "renaming {} -> {}",
                        temp_path.display(),
                        archived.absolute_path.display()
                    )
                })
            }
        }
    }
}

async fn write_temp(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(path)
        .await
        .with_context(|| format!("opening {}", path.display()))?;
    file.write_all(bytes)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    file.flush()
        .await
        .with_context(|| format!("flushing {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use jobcat_core::reference_offset;
    use tempfile::tempdir;

    fn ingested_at() -> Timestamp {
        reference_offset()
            .with_ymd_and_hms(2026, 8, 20, 7, 5, 9)
            .single()
            .unwrap()
    }

    #[test]
    fn hash_is_stable() {
        assert_eq!(
            SnapshotArchive::sha256_hex(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn path_is_stamped_in_ingest_offset() {
        let archive = SnapshotArchive::new("/var/lib/jobcat");
        assert_eq!(
            archive.snapshot_relative_path(ingested_at(), "abc"),
            PathBuf::from("20260820_070509").join("abc.csv")
        );
    }

    #[tokio::test]
    async fn identical_snapshots_are_stored_once() {
        let dir = tempdir().expect("tempdir");
        let archive = SnapshotArchive::new(dir.path());
        let first = archive
            .store_bytes(ingested_at(), b"job_id,job_title\n1,a\n")
            .await
            .expect("first");
        let second = archive
            .store_bytes(ingested_at(), b"job_id,job_title\n1,a\n")
            .await
            .expect("second");

        assert!(!first.deduplicated);
        assert!(second.deduplicated);
        assert_eq!(first.relative_path, second.relative_path);
        assert!(first.absolute_path.exists());
    }

    #[tokio::test]
    async fn archive_file_copies_source_bytes() {
        let dir = tempdir().expect("tempdir");
        let source = dir.path().join("snapshot.csv");
        std::fs::write(&source, "job_id\n9\n").unwrap();
        let archive = SnapshotArchive::new(dir.path().join("archive"));
        let archived = archive.archive_file(ingested_at(), &source).await.expect("archive");
        assert_eq!(std::fs::read_to_string(&archived.absolute_path).unwrap(), "job_id\n9\n");
        assert_eq!(archived.byte_size, 9);
    }
}
