//! Consistent monitoring snapshots across all server processes of a database.
//!
//! A [`Database`] handle publishes the state of its process into the shared segment whenever
//! another process asks for it through the monitor lock. A [`QueryTransaction`] builds one
//! [`Snapshot`] on first access: it dumps its own state, makes every sibling dump theirs, reads the
//! merged segment and keeps the rows its [`Session`] is allowed to see.
//!
//! ```no_run
//! use std::sync::Arc;
//! use mon_dump::{state::DatabaseInfo, Relation};
//! use mon_segment::Owner;
//! use mon_snapshot::{Database, LocalLockTable, MonitorConfig, QueryTransaction, Session};
//!
//! # fn main() -> Result<(), mon_snapshot::SnapshotError> {
//! let locks = Arc::new(LocalLockTable::new());
//! let info = DatabaseInfo { name: "/data/employee.fdb".into(), ..DatabaseInfo::default() };
//! let database = Database::open("employee", Owner::current(1), info, MonitorConfig::from_env()?, locks)?;
//!
//! let mut transaction = QueryTransaction::new(database, Session::new("SYSDBA"));
//! for row in transaction.scan(Relation::Attachments)? {
//!     println!("{:?}", row);
//! }
//! # Ok(())
//! # }
//! ```

mod blob;
mod config;
mod coordinator;
mod database;
mod lock;
mod projection;
mod transaction;

pub use blob::{BlobArena, BlobId, RequestId};
pub use config::MonitorConfig;
pub use coordinator::Snapshot;
pub use database::Database;
pub use lock::{BlockingCallback, LocalLockTable, LockHandle, LockManager, LockMode, LockWait};
pub use projection::{Charset, Datum, Row, Session};
pub use transaction::{MonitoringTableScan, QueryTransaction};

use mon_segment::SegmentError;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// Mapping, growing or locking the shared segment failed.
    #[error(transparent)]
    Segment(#[from] SegmentError),
    #[error("timed out waiting for other processes to publish monitoring data")]
    LockTimeout,
    #[error("the monitor lock is held by another process")]
    LockConflict,
    #[error("invalid value {value:?} for {name}")]
    InvalidConfig { name: &'static str, value: String },
}
