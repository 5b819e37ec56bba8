// SPDX-License-Identifier: Apache-2.0

//! Metadata snapshots used to detect rotation, truncation and symlink retargeting.

use std::fs::{File, Metadata};
use std::io;
use std::path::{Path, PathBuf};

use crate::tail::identity::FileIdentity;

/// What a tailed path looked like at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadataSnapshot {
    /// Identity of the file the path resolves to
    pub identity: FileIdentity,
    /// Size of the resolved file in bytes
    pub size: u64,
    /// Whether the path itself is a symlink
    pub is_symlink: bool,
    /// Link contents when the path is a symlink
    pub symlink_target: Option<PathBuf>,
    /// Identity of the link entry when the path is a symlink
    pub symlink_identity: Option<FileIdentity>,
}

/// Outcome of comparing a fresh snapshot against the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChange {
    /// Nothing that requires action
    Unchanged,
    /// The symlink was replaced or now points somewhere else
    Retargeted,
    /// The path resolves to a different file (rotation or recreation)
    Replaced,
    /// Same file, but it shrank below what was already read
    Truncated,
}

impl FileChange {
    pub fn needs_reopen(self) -> bool {
        matches!(self, FileChange::Retargeted | FileChange::Replaced)
    }
}

impl FileMetadataSnapshot {
    fn from_parts(
        link_meta: &Metadata,
        target_meta: &Metadata,
        symlink_target: Option<PathBuf>,
    ) -> Self {
        let is_symlink = link_meta.file_type().is_symlink();
        Self {
            identity: FileIdentity::from_metadata(target_meta),
            size: target_meta.len(),
            is_symlink,
            symlink_target: if is_symlink { symlink_target } else { None },
            symlink_identity: is_symlink.then(|| FileIdentity::from_metadata(link_meta)),
        }
    }

    /// Stat `path` and, if it is a symlink, the link itself.
    pub fn probe(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let link_meta = std::fs::symlink_metadata(path)?;
        if !link_meta.file_type().is_symlink() {
            return Ok(Self::from_parts(&link_meta, &link_meta, None));
        }
        let target = std::fs::read_link(path)?;
        let target_meta = std::fs::metadata(path)?;
        Ok(Self::from_parts(&link_meta, &target_meta, Some(target)))
    }

    /// Async variant of [`probe`](Self::probe) for use on runtime tasks.
    pub async fn probe_async(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let link_meta = tokio::fs::symlink_metadata(path).await?;
        if !link_meta.file_type().is_symlink() {
            return Ok(Self::from_parts(&link_meta, &link_meta, None));
        }
        let target = tokio::fs::read_link(path).await?;
        let target_meta = tokio::fs::metadata(path).await?;
        Ok(Self::from_parts(&link_meta, &target_meta, Some(target)))
    }

    /// Snapshot for a handle that was just opened from `path`. Identity and
    /// size come from the handle so they describe the file actually being read.
    pub fn for_open_file(path: impl AsRef<Path>, file: &File) -> io::Result<Self> {
        let path = path.as_ref();
        let file_meta = file.metadata()?;
        let link_meta = std::fs::symlink_metadata(path)?;
        let target = if link_meta.file_type().is_symlink() {
            Some(std::fs::read_link(path)?)
        } else {
            None
        };
        Ok(Self::from_parts(&link_meta, &file_meta, target))
    }

    /// Compare a newer snapshot of the same path against `self`.
    ///
    /// `position` is the current read offset; shrinking below it counts as
    /// truncation even if the recorded size was never updated.
    pub fn compare(&self, next: &Self, position: u64) -> FileChange {
        if self.is_symlink || next.is_symlink {
            if self.is_symlink != next.is_symlink
                || self.symlink_identity != next.symlink_identity
                || self.symlink_target != next.symlink_target
            {
                return FileChange::Retargeted;
            }
        }

        if self.identity != next.identity {
            return FileChange::Replaced;
        }

        if next.size < self.size || next.size < position {
            return FileChange::Truncated;
        }

        FileChange::Unchanged
    }

    /// Only the link half of [`compare`](Self::compare), for periodic symlink checks.
    pub fn link_changed(&self, next: &Self) -> bool {
        self.is_symlink != next.is_symlink
            || self.symlink_identity != next.symlink_identity
            || self.symlink_target != next.symlink_target
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    #[test]
    fn test_probe_plain_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "hello\n").unwrap();

        let snap = FileMetadataSnapshot::probe(&path).unwrap();
        assert_eq!(snap.size, 6);
        assert!(!snap.is_symlink);
        assert_eq!(snap.symlink_target, None);
        assert_eq!(snap.symlink_identity, None);
        assert_eq!(snap.identity, FileIdentity::from_path(&path).unwrap());
    }

    #[test]
    fn test_probe_symlink() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("app.log.2024");
        let link = dir.path().join("app.log");
        fs::write(&target, "abc").unwrap();
        symlink(&target, &link).unwrap();

        let snap = FileMetadataSnapshot::probe(&link).unwrap();
        assert!(snap.is_symlink);
        assert_eq!(snap.size, 3);
        assert_eq!(snap.symlink_target.as_deref(), Some(target.as_path()));
        assert_eq!(snap.identity, FileIdentity::from_path(&target).unwrap());
        assert_eq!(
            snap.symlink_identity,
            Some(FileIdentity::from_link(&link).unwrap())
        );
    }

    #[test]
    fn test_probe_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = FileMetadataSnapshot::probe(dir.path().join("nope")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_probe_async_matches_sync() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("target");
        let link = dir.path().join("link");
        fs::write(&target, "abcdef").unwrap();
        symlink(&target, &link).unwrap();

        let sync = FileMetadataSnapshot::probe(&link).unwrap();
        let async_snap = FileMetadataSnapshot::probe_async(&link).await.unwrap();
        assert_eq!(sync, async_snap);
    }

    #[test]
    fn test_compare_growth_is_unchanged() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "one\n").unwrap();
        let before = FileMetadataSnapshot::probe(&path).unwrap();

        fs::write(&path, "one\ntwo\n").unwrap();
        let after = FileMetadataSnapshot::probe(&path).unwrap();

        assert_eq!(before.compare(&after, 4), FileChange::Unchanged);
    }

    #[test]
    fn test_compare_detects_truncation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "0123456789").unwrap();
        let before = FileMetadataSnapshot::probe(&path).unwrap();

        let f = fs::OpenOptions::new().write(true).open(&path).unwrap();
        f.set_len(2).unwrap();
        let after = FileMetadataSnapshot::probe(&path).unwrap();

        assert_eq!(before.compare(&after, 10), FileChange::Truncated);
    }

    #[test]
    fn test_compare_detects_shrink_below_position() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "0123").unwrap();
        let snap = FileMetadataSnapshot::probe(&path).unwrap();

        // Recorded size is stale but the reader is already past the end.
        assert_eq!(snap.compare(&snap.clone(), 100), FileChange::Truncated);
    }

    #[test]
    fn test_compare_detects_replacement() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "old").unwrap();
        let before = FileMetadataSnapshot::probe(&path).unwrap();

        fs::rename(&path, dir.path().join("app.log.1")).unwrap();
        fs::write(&path, "new file").unwrap();
        let after = FileMetadataSnapshot::probe(&path).unwrap();

        assert_eq!(before.compare(&after, 3), FileChange::Replaced);
        assert!(FileChange::Replaced.needs_reopen());
    }

    #[test]
    fn test_compare_detects_retarget() {
        let dir = TempDir::new().unwrap();
        let first = dir.path().join("first");
        let second = dir.path().join("second");
        let link = dir.path().join("current");
        fs::write(&first, "1").unwrap();
        fs::write(&second, "2").unwrap();
        symlink(&first, &link).unwrap();
        let before = FileMetadataSnapshot::probe(&link).unwrap();

        fs::remove_file(&link).unwrap();
        symlink(&second, &link).unwrap();
        let after = FileMetadataSnapshot::probe(&link).unwrap();

        assert!(before.link_changed(&after));
        assert_eq!(before.compare(&after, 1), FileChange::Retargeted);
        assert!(!FileChange::Truncated.needs_reopen());
    }
}
