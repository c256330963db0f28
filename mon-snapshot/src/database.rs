use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mon_dump::state::{Attachments, DatabaseInfo};
use mon_dump::{LocalDumper, StatIds};
use mon_segment::{Liveness, OsLiveness, Owner, Segment, SegmentError};
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error};

use crate::config::MonitorConfig;
use crate::lock::{BlockingCallback, LockHandle, LockManager, LockMode, LockWait};
use crate::SnapshotError;

/// One logical handle of a database within a server process.
///
/// Owns the monitoring state of the handle: the mapping of the shared segment, created when first
/// needed, and the monitor lock through which other processes ask for fresh data.
pub struct Database {
    pub(crate) identity: String,
    pub(crate) owner: Owner,
    pub(crate) config: MonitorConfig,
    pub(crate) locks: Arc<dyn LockManager>,
    pub(crate) liveness: Box<dyn Liveness + Send + Sync>,
    info: RwLock<DatabaseInfo>,
    attachments: Attachments,
    ids: StatIds,
    /// Set while the monitor lock is not held and must be taken again.
    pub(crate) monitor_off: AtomicBool,
    pub(crate) monitor: Mutex<MonitorSync>,
}

/// The state guarded by the monitor mutex.
#[derive(Default)]
pub(crate) struct MonitorSync {
    pub(crate) segment: Option<Segment>,
    pub(crate) lock: Option<LockHandle>,
}

impl Database {
    /// Open a handle and take the monitor lock.
    pub fn open(
        identity: impl Into<String>,
        owner: Owner,
        info: DatabaseInfo,
        config: MonitorConfig,
        locks: Arc<dyn LockManager>,
    ) -> Result<Arc<Self>, SnapshotError> {
        Self::with_liveness(identity, owner, info, config, locks, OsLiveness)
    }

    /// Like [`Database::open`] with a custom probe for the processes behind segment elements.
    pub fn with_liveness(
        identity: impl Into<String>,
        owner: Owner,
        info: DatabaseInfo,
        config: MonitorConfig,
        locks: Arc<dyn LockManager>,
        liveness: impl Liveness + Send + Sync + 'static,
    ) -> Result<Arc<Self>, SnapshotError> {
        let database = Arc::new(Database {
            identity: identity.into(),
            owner,
            config,
            locks,
            liveness: Box::new(liveness),
            info: RwLock::new(info),
            attachments: Attachments::default(),
            ids: StatIds::new(owner.process_id),
            monitor_off: AtomicBool::new(true),
            monitor: Mutex::new(MonitorSync::default()),
        });

        database.enter_request()?;
        Ok(database)
    }

    pub fn owner(&self) -> Owner {
        self.owner
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn info(&self) -> RwLockReadGuard<'_, DatabaseInfo> {
        self.info.read()
    }

    pub fn info_mut(&self) -> RwLockWriteGuard<'_, DatabaseInfo> {
        self.info.write()
    }

    pub fn attachments(&self) -> &Attachments {
        &self.attachments
    }

    /// Prepare the handle for a new request.
    ///
    /// Takes the monitor lock again if it was given up, so that the next snapshot of any process
    /// asks this handle for its data.
    pub fn enter_request(self: &Arc<Self>) -> Result<(), SnapshotError> {
        if !self.monitor_off.load(Ordering::Acquire) {
            return Ok(());
        }

        let mut sync = self.monitor.lock();
        if !self.monitor_off.load(Ordering::Acquire) {
            return Ok(());
        }

        let database = Arc::downgrade(self);
        let blocking: BlockingCallback = Arc::new(move || {
            if let Some(database) = database.upgrade() {
                database.blocking_ast();
            }
        });

        let handle = self.locks.lock(
            self.owner,
            &self.lock_key(),
            LockMode::Shared,
            LockWait::Wait,
            Some(blocking),
        )?;

        sync.lock = Some(handle);
        self.monitor_off.store(false, Ordering::Release);
        debug!(owner = %self.owner, "monitor lock taken");
        Ok(())
    }

    /// Whether the handle holds the monitor lock, so that the next snapshot of any process asks
    /// it for fresh data.
    pub fn monitor_armed(&self) -> bool {
        !self.monitor_off.load(Ordering::Acquire)
    }

    pub(crate) fn lock_key(&self) -> String {
        format!("monitor.{}", self.identity)
    }

    /// Another process wants a snapshot: publish our data and give up the lock.
    ///
    /// Never fails. Errors are logged, the lock is released regardless.
    fn blocking_ast(&self) {
        if self.monitor_off.load(Ordering::Acquire) {
            return;
        }

        let mut sync = self.monitor.lock();
        if self.monitor_off.load(Ordering::Acquire) {
            return;
        }

        match self.dump_locked(&mut sync) {
            Ok(()) => debug!(owner = %self.owner, "dumped monitoring data on request"),
            Err(err) => error!(%err, owner = %self.owner, "cannot dump the monitoring data"),
        }

        // Flag first, the requester may run `enter_request` as soon as the lock is gone.
        self.monitor_off.store(true, Ordering::Release);
        if let Some(handle) = sync.lock.take() {
            self.locks.release(handle);
        }
    }

    /// Replace our element of the segment, mapping the segment first if needed.
    ///
    /// The caller holds the monitor mutex.
    pub(crate) fn dump_locked(&self, sync: &mut MonitorSync) -> Result<(), SegmentError> {
        let segment = match &mut sync.segment {
            Some(segment) => segment,
            None => {
                let segment = Segment::open(&self.identity, self.owner, &self.config.segment_options())?;
                debug!(owner = %self.owner, path = %segment.path().display(), "mapped monitoring segment");
                sync.segment.insert(segment)
            }
        };

        let mut guard = segment.acquire()?;
        let info = self.info.read();
        LocalDumper::new(self.owner, &self.ids, self.config.shared_cache).dump_self(
            &mut guard,
            &info,
            &self.attachments,
        )
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Some(handle) = self.monitor.get_mut().lock.take() {
            self.locks.release(handle);
        }
    }
}
