//! The live state of a server process, as seen by the dumper.
//!
//! The engine owns these values and keeps them current. Every attachment sits behind its own
//! mutex, the dumper takes it while writing the attachment and its descendants.
use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::Timestamp;

/// Page and record level counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    pub page_reads: i64,
    pub page_writes: i64,
    pub page_fetches: i64,
    pub page_marks: i64,
    pub seq_reads: i64,
    pub idx_reads: i64,
    pub inserts: i64,
    pub updates: i64,
    pub deletes: i64,
    pub backouts: i64,
    pub purges: i64,
    pub expunges: i64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub current_used: i64,
    pub current_allocated: i64,
    pub max_used: i64,
    pub max_allocated: i64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(i64)]
pub enum ShutdownMode {
    #[default]
    Online = 0,
    Multi = 1,
    Single = 2,
    Full = 3,
}

/// State of the online backup machinery, tracked elsewhere.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(i64)]
pub enum BackupState {
    #[default]
    Normal = 0,
    Stalled = 1,
    Merge = 2,
    Unknown = 3,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(i64)]
pub enum Isolation {
    Consistency = 0,
    #[default]
    Concurrency = 1,
    ReadCommittedVersion = 2,
    ReadCommittedNoVersion = 3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i64)]
pub enum RoutineKind {
    Trigger = 2,
    Procedure = 5,
    Function = 15,
}

#[derive(Clone, Debug, Default)]
pub struct DatabaseInfo {
    pub name: String,
    pub page_size: i64,
    pub ods_major: i64,
    pub ods_minor: i64,
    pub oldest_interesting: i64,
    pub oldest_active: i64,
    pub oldest_snapshot: i64,
    pub next_transaction: i64,
    pub page_buffers: i64,
    /// SQL dialect 3, otherwise dialect 1.
    pub dialect_3: bool,
    pub shutdown: ShutdownMode,
    pub sweep_interval: i64,
    pub read_only: bool,
    pub forced_writes: bool,
    pub no_reserve: bool,
    pub created: Timestamp,
    pub pages: i64,
    pub backup_state: BackupState,
    pub stats: RuntimeStats,
    pub memory: MemoryStats,
}

#[derive(Clone, Debug, Default)]
pub struct User {
    pub name: String,
    pub role: String,
}

#[derive(Clone, Debug, Default)]
pub struct AttachmentState {
    pub id: i64,
    /// Attachments still authenticating have no user and are not dumped.
    pub user: Option<User>,
    pub filename: String,
    pub remote_protocol: String,
    pub remote_address: String,
    /// Zero if unknown.
    pub remote_pid: i64,
    pub remote_process: String,
    pub charset_id: i64,
    pub timestamp: Timestamp,
    pub no_cleanup: bool,
    pub context_vars: BTreeMap<String, String>,
    pub transactions: Vec<TransactionState>,
    /// Prepared statements of this attachment.
    pub requests: Vec<Request>,
    pub stats: RuntimeStats,
    pub memory: MemoryStats,
}

#[derive(Clone, Debug, Default)]
pub struct TransactionState {
    pub number: i64,
    pub timestamp: Timestamp,
    pub top: i64,
    pub oldest: i64,
    pub oldest_active: i64,
    pub isolation: Isolation,
    pub lock_timeout: i64,
    pub read_only: bool,
    pub auto_commit: bool,
    pub no_auto_undo: bool,
    pub context_vars: BTreeMap<String, String>,
    /// The running requests, outermost statement first, each calling the next.
    pub call_stack: Vec<Request>,
    pub stats: RuntimeStats,
    pub memory: MemoryStats,
}

#[derive(Clone, Debug)]
pub struct Routine {
    pub package: Option<String>,
    pub name: String,
    pub kind: RoutineKind,
}

#[derive(Clone, Debug, Default)]
pub struct Request {
    pub id: i64,
    /// Engine-internal requests are never reported.
    pub internal: bool,
    pub system_trigger: bool,
    pub active: bool,
    pub stalled: bool,
    pub transaction: Option<i64>,
    pub timestamp: Timestamp,
    pub sql_text: Option<String>,
    pub routine: Option<Routine>,
    pub trigger_name: Option<String>,
    /// Line and column of the current PSQL statement.
    pub source: Option<(i64, i64)>,
    pub stats: RuntimeStats,
    pub memory: MemoryStats,
}

pub type Attachment = Arc<Mutex<AttachmentState>>;

/// The attachments of a database handle.
///
/// User attachments and internal system attachments are listed separately, both are dumped.
#[derive(Default)]
pub struct Attachments {
    pub user: Mutex<Vec<Attachment>>,
    pub system: RwLock<Vec<Attachment>>,
}

impl TransactionState {
    pub fn is_active(&self) -> bool {
        !self.call_stack.is_empty()
    }
}

impl AttachmentState {
    pub fn is_active(&self) -> bool {
        self.transactions.iter().any(TransactionState::is_active)
    }
}

impl Request {
    /// Requests that never appear in monitoring output.
    pub fn is_hidden(&self) -> bool {
        self.internal || self.system_trigger
    }
}

impl Attachments {
    pub fn add(&self, state: AttachmentState) -> Attachment {
        let attachment = Arc::new(Mutex::new(state));
        self.user.lock().push(attachment.clone());
        attachment
    }

    pub fn add_system(&self, state: AttachmentState) -> Attachment {
        let attachment = Arc::new(Mutex::new(state));
        self.system.write().push(attachment.clone());
        attachment
    }

    pub fn remove(&self, attachment: &Attachment) {
        self.user.lock().retain(|a| !Arc::ptr_eq(a, attachment));
        self.system.write().retain(|a| !Arc::ptr_eq(a, attachment));
    }
}
