//! Disk capacity guard for chunk writes and assemblies

use std::path::{Path, PathBuf};
use stowage_core::{AppError, Config};
use sysinfo::Disks;
use tracing::{error, warn};

const GIB: u64 = 1024 * 1024 * 1024;

/// What to do when free space would drop below the reserve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskCheckBehavior {
    Fail,
    Warn,
}

impl DiskCheckBehavior {
    fn from_config(value: &str) -> Self {
        match value {
            "fail" => DiskCheckBehavior::Fail,
            "warn" => DiskCheckBehavior::Warn,
            other => {
                warn!(behavior = %other, "Unknown disk_check_behavior, defaulting to warn");
                DiskCheckBehavior::Warn
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct CapacityChecker {
    storage_path: PathBuf,
    min_free_bytes: u64,
    behavior: DiskCheckBehavior,
}

impl CapacityChecker {
    pub fn new(config: &Config) -> Self {
        Self {
            storage_path: config.storage_path().to_path_buf(),
            min_free_bytes: config.min_disk_free_gb().saturating_mul(GIB),
            behavior: DiskCheckBehavior::from_config(config.disk_check_behavior()),
        }
    }

    /// Decide whether writing `required_bytes` is allowed with `available_bytes` free
    pub fn evaluate(
        &self,
        available_bytes: u64,
        required_bytes: u64,
    ) -> Result<(), AppError> {
        let total_required = required_bytes.saturating_add(self.min_free_bytes);
        if available_bytes >= total_required {
            return Ok(());
        }

        match self.behavior {
            DiskCheckBehavior::Fail => {
                error!(
                    available_bytes,
                    required_bytes = total_required,
                    path = %self.storage_path.display(),
                    "Insufficient disk space"
                );
                Err(AppError::InsufficientDiskSpace {
                    available: available_bytes,
                    required: total_required,
                })
            }
            DiskCheckBehavior::Warn => {
                warn!(
                    available_bytes,
                    required_bytes = total_required,
                    path = %self.storage_path.display(),
                    "Insufficient disk space (warning only)"
                );
                Ok(())
            }
        }
    }

    /// Free bytes on the volume holding `path`, by longest matching mount point
    fn available_space(path: &Path) -> Option<u64> {
        let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let disks = Disks::new_with_refreshed_list();

        disks
            .iter()
            .filter(|disk| path.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| disk.available_space())
    }

    /// Check there is room for `required_bytes` on the storage volume
    pub fn check_disk_space(&self, required_bytes: u64) -> Result<(), AppError> {
        match Self::available_space(&self.storage_path) {
            Some(available) => self.evaluate(available, required_bytes),
            None => {
                warn!(
                    path = %self.storage_path.display(),
                    "Could not determine disk space for storage path, skipping check"
                );
                Ok(())
            }
        }
    }

    /// Async variant; disk enumeration runs on the blocking pool
    pub async fn check_disk_space_async(&self, required_bytes: u64) -> Result<(), AppError> {
        let checker = self.clone();
        tokio::task::spawn_blocking(move || checker.check_disk_space(required_bytes))
            .await
            .map_err(|e| AppError::Internal(format!("spawn_blocking for disk space check: {}", e)))?
    }
}
