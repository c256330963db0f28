use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use mon_segment::SegmentOptions;

use crate::lock::LockWait;
use crate::SnapshotError;

/// Settings of the monitoring subsystem of one database handle.
#[derive(Clone, Debug)]
pub struct MonitorConfig {
    /// Where segment files are created.
    pub segment_dir: PathBuf,
    /// Allocation increment of the segment.
    pub granularity: usize,
    /// How a snapshot waits for its siblings.
    pub lock_wait: LockWait,
    /// Whether the server runs with a page cache shared by all attachments.
    pub shared_cache: bool,
}

impl MonitorConfig {
    /// Overrides the segment directory.
    pub const SEGMENT_DIR: &'static str = "MON_SEGMENT_DIR";
    /// Bounds the snapshot lock wait, in milliseconds. Zero never waits.
    pub const LOCK_TIMEOUT_MS: &'static str = "MON_LOCK_TIMEOUT_MS";

    /// The defaults, adjusted by the process environment.
    pub fn from_env() -> Result<Self, SnapshotError> {
        Self::from_vars(|name| std::env::var_os(name))
    }

    pub fn from_vars(var: impl Fn(&str) -> Option<OsString>) -> Result<Self, SnapshotError> {
        let mut config = MonitorConfig::default();

        if let Some(dir) = var(Self::SEGMENT_DIR) {
            config.segment_dir = dir.into();
        }

        if let Some(timeout) = var(Self::LOCK_TIMEOUT_MS) {
            let millis = timeout
                .to_str()
                .and_then(|value| value.trim().parse::<u64>().ok())
                .ok_or_else(|| SnapshotError::InvalidConfig {
                    name: Self::LOCK_TIMEOUT_MS,
                    value: timeout.to_string_lossy().into_owned(),
                })?;

            config.lock_wait = match millis {
                0 => LockWait::NoWait,
                millis => LockWait::Timeout(Duration::from_millis(millis)),
            };
        }

        Ok(config)
    }

    pub fn segment_options(&self) -> SegmentOptions {
        SegmentOptions {
            dir: self.segment_dir.clone(),
            granularity: self.granularity,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        let segment = SegmentOptions::default();

        MonitorConfig {
            segment_dir: segment.dir,
            granularity: segment.granularity,
            lock_wait: LockWait::Wait,
            shared_cache: false,
        }
    }
}
