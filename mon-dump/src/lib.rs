//! Monitoring records and how a process writes them.
//!
//! A dump is a flat sequence of records, each tagged with the monitoring relation it belongs to
//! and carrying typed fields. The [`codec`] serializes and parses them, [`schema`] names the
//! relations and fields, [`state`] is the live view of a process that the [`LocalDumper`] turns
//! into records inside the shared segment.
#[cfg(test)]
mod tests;

pub mod codec;
mod dumper;
pub mod schema;
pub mod state;

pub use codec::{DumpField, DumpRecord, DumpSink, Reader, RecordReader, Value, ValueType, Writer};
pub use dumper::{LocalDumper, StatIds};
pub use schema::{Column, ColumnType, Relation, StatGroup};

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A process-qualified identifier, unique across all processes of a database.
///
/// The upper half is the process id, the lower half a counter local to that process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GlobalId(pub u64);

impl GlobalId {
    pub const SHIFT: u32 = 32;

    pub fn new(process_id: u32, counter: u32) -> Self {
        GlobalId(u64::from(process_id) << Self::SHIFT | u64::from(counter))
    }

    pub fn process_id(self) -> u32 {
        (self.0 >> Self::SHIFT) as u32
    }

    pub fn counter(self) -> u32 {
        self.0 as u32
    }
}

/// A point in time with microsecond resolution, relative to the Unix epoch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Timestamp {
    micros: i64,
}

impl Timestamp {
    pub fn from_micros(micros: i64) -> Self {
        Timestamp { micros }
    }

    pub fn now() -> Self {
        SystemTime::now().into()
    }

    pub fn as_micros(self) -> i64 {
        self.micros
    }
}

impl From<SystemTime> for Timestamp {
    fn from(time: SystemTime) -> Self {
        let micros = match time.duration_since(UNIX_EPOCH) {
            Ok(after) => i64::try_from(after.as_micros()).unwrap_or(i64::MAX),
            Err(before) => i64::try_from(before.duration().as_micros()).map_or(i64::MIN, |m| -m),
        };

        Timestamp { micros }
    }
}

impl From<Timestamp> for SystemTime {
    fn from(ts: Timestamp) -> Self {
        let offset = Duration::from_micros(ts.micros.unsigned_abs());
        if ts.micros >= 0 {
            UNIX_EPOCH + offset
        } else {
            UNIX_EPOCH - offset
        }
    }
}
