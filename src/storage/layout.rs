use std::fs;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::core::error::{Error, Result};

/// Directory structure for data files:
///
/// ```text
/// <base>/
///   .lock                              # process-exclusive engine lock
///   <collection>/
///     collection.json                  # partition key + indexed fields
///     <partitionValue>.nyaru           # shard payload
///     <partitionValue>.nyaru.meta.json # sidecar metadata
/// ```
#[derive(Debug, Clone)]
pub struct StorageLayout {
    pub base_dir: PathBuf,
}

pub const SHARD_EXTENSION: &str = "nyaru";

impl StorageLayout {
    pub fn new(base_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&base_dir)?;
        Ok(StorageLayout { base_dir })
    }

    pub fn lock_path(&self) -> PathBuf {
        self.base_dir.join(".lock")
    }

    pub fn collection_dir(&self, collection: &str) -> PathBuf {
        self.base_dir.join(collection)
    }

    pub fn manifest_path(&self, collection: &str) -> PathBuf {
        self.collection_dir(collection).join("collection.json")
    }

    pub fn shard_path(&self, collection: &str, partition: &str) -> PathBuf {
        self.collection_dir(collection)
            .join(format!("{}.{}", partition, SHARD_EXTENSION))
    }

    pub fn sidecar_path(&self, collection: &str, partition: &str) -> PathBuf {
        sidecar_for(&self.shard_path(collection, partition))
    }
}

/// Sidecar path for a shard payload path.
pub fn sidecar_for(shard_path: &Path) -> PathBuf {
    let mut name = shard_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(".meta.json");
    shard_path.with_file_name(name)
}

/// Partition values become file names, so a handful of characters cannot be
/// routed to disk.
pub fn validate_partition_value(value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::InvalidDocument(
            "partition value is empty".to_string(),
        ));
    }
    if value == "." || value == ".." || value.contains(['/', '\\', '\0']) {
        return Err(Error::InvalidDocument(format!(
            "partition value '{}' cannot be used as a shard name",
            value
        )));
    }
    Ok(())
}

/// Write-to-temp then rename, so readers observe either the old or the new
/// file and never a partial one. The temp file lives in the target's
/// directory because rename is only atomic within a filesystem.
pub fn atomic_write(path: &Path, bytes: &[u8], file_protection: Option<u32>) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = dir.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));

    fs::write(&tmp, bytes)?;
    apply_protection(&tmp, file_protection)?;
    match fs::rename(&tmp, path) {
        Ok(()) => Ok(()),
        Err(err) => {
            let _ = fs::remove_file(&tmp);
            Err(err)
        }
    }
}

#[cfg(unix)]
fn apply_protection(path: &Path, mode: Option<u32>) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    if let Some(mode) = mode {
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn apply_protection(_path: &Path, _mode: Option<u32>) -> std::io::Result<()> {
    Ok(())
}
