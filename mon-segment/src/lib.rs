//! A growable shared memory segment holding one element per monitoring writer.
//!
//! Every server process attached to a database maps the same file. Each logical writer, identified
//! by an [`Owner`], publishes its serialized monitoring state as one contiguous element. Readers
//! take the segment mutex, drop elements whose process has died and concatenate the surviving
//! payloads, their own first.
//!
//! ## Layout
//!
//! ```text
//! +--------+---------------------+---------------------+-----+
//! | Header | ElementHead payload | ElementHead payload | ... |
//! +--------+---------------------+---------------------+-----+
//! 0        ^ Header::SIZE                                used  allocated
//! ```
//!
//! Every element starts at an offset aligned to eight bytes. The header tracks the high-water mark
//! of valid bytes (`used`) and the capacity of the file (`allocated`). Growth is only ever
//! performed by the holder of the segment mutex, other processes notice it on their next
//! [`Segment::acquire`].
#[cfg(test)]
mod tests;
mod layout;
mod liveness;
mod segment;

pub use liveness::{Liveness, OsLiveness};
pub use segment::{ElementInfo, ElementOffset, ElementWriter, Segment, SegmentGuard, Usage};

use std::path::PathBuf;

/// Identifies one logical writer of the segment.
///
/// A single process may host several database handles for the same database, `local_id`
/// distinguishes them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Owner {
    pub process_id: u32,
    pub local_id: u32,
}

impl Owner {
    /// An owner within the calling process.
    pub fn current(local_id: u32) -> Self {
        Owner {
            process_id: std::process::id(),
            local_id,
        }
    }
}

impl core::fmt::Display for Owner {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.process_id, self.local_id)
    }
}

/// Where and how the segment file is created.
#[derive(Clone, Debug)]
pub struct SegmentOptions {
    /// The directory holding one segment file per database.
    pub dir: PathBuf,
    /// The allocation increment. Requested sizes are rounded up to a multiple of this.
    pub granularity: usize,
}

impl SegmentOptions {
    /// The default allocation increment, 1 MiB.
    pub const DEFAULT_SIZE: usize = 1 << 20;

    pub fn new(dir: impl Into<PathBuf>) -> Self {
        SegmentOptions {
            dir: dir.into(),
            granularity: Self::DEFAULT_SIZE,
        }
    }
}

impl Default for SegmentOptions {
    fn default() -> Self {
        SegmentOptions::new(std::env::temp_dir())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SegmentError {
    /// The shared memory file could not be created or mapped.
    #[error("cannot initialize the shared memory region: {0}")]
    Mapping(#[source] std::io::Error),
    /// The file exists but was written with another layout.
    #[error("monitoring segment has layout {found:#x}, expected {expected:#x}")]
    VersionMismatch { found: u64, expected: u64 },
    /// The segment must grow but the mapping can not be resized here.
    #[error("the monitoring segment can not grow on this platform")]
    GrowthUnsupported,
    /// A single element would exceed the maximum element length.
    #[error("a monitoring element can not exceed {max} bytes")]
    ElementTooLarge { max: u32 },
    #[error("monitoring segment I/O failed: {0}")]
    Io(#[from] std::io::Error),
}
