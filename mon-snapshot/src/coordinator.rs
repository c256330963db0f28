use std::sync::atomic::Ordering;

use mon_dump::Relation;
use mon_segment::Owner;
use tracing::{debug, warn};

use crate::blob::BlobArena;
use crate::database::Database;
use crate::lock::{LockMode, LockWait};
use crate::projection::{Projection, Row, Session};
use crate::SnapshotError;

/// The monitoring rows visible to one session, as of one point in time.
///
/// Built once, immutable afterwards.
#[derive(Debug)]
pub struct Snapshot {
    rows: Vec<Vec<Row>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Phase {
    Init,
    SelfDumped,
    Broadcast,
    Merged,
    Projected,
}

struct Progress {
    owner: Owner,
    phase: Phase,
}

impl Progress {
    fn advance(&mut self, next: Phase) {
        debug_assert!(next > self.phase, "snapshot went from {:?} to {next:?}", self.phase);
        debug!(owner = %self.owner, from = ?self.phase, to = ?next, "monitoring snapshot");
        self.phase = next;
    }
}

impl Snapshot {
    /// Refresh the segment from all processes and project it for `session`.
    ///
    /// Large objects of the rows are allocated in `blobs`.
    pub fn create(
        database: &Database,
        session: &Session,
        blobs: &mut BlobArena,
    ) -> Result<Self, SnapshotError> {
        let mut progress = Progress {
            owner: database.owner,
            phase: Phase::Init,
        };

        database.dump_own()?;
        progress.advance(Phase::SelfDumped);

        database.broadcast()?;
        progress.advance(Phase::Broadcast);

        let data = database.read_merged()?;
        progress.advance(Phase::Merged);

        let name = database.info().name.clone();
        let request = blobs.begin_request();
        let rows = Projection::new(session, &name, blobs, request).run(&data);
        blobs.end_request(request);
        progress.advance(Phase::Projected);

        Ok(Snapshot { rows })
    }

    /// The rows of a relation, in dump order.
    pub fn rows(&self, relation: Relation) -> &[Row] {
        &self.rows[usize::from(relation.id())]
    }
}

impl Database {
    /// Give up the monitor lock and publish our own data.
    fn dump_own(&self) -> Result<(), SnapshotError> {
        let mut sync = self.monitor.lock();

        if let Some(handle) = sync.lock.take() {
            self.locks.release(handle);
        }

        self.monitor_off.store(false, Ordering::Release);
        self.dump_locked(&mut sync)?;
        Ok(())
    }

    /// Ask every other holder of the monitor lock to dump and wait until all did.
    fn broadcast(&self) -> Result<(), SnapshotError> {
        let result = self.locks.lock(
            self.owner,
            &self.lock_key(),
            LockMode::Exclusive,
            self.config.lock_wait,
            None,
        );

        // Our own lock is gone, the next request takes it again.
        self.monitor_off.store(true, Ordering::Release);

        match result {
            Ok(handle) => {
                self.locks.release(handle);
                Ok(())
            }
            Err(SnapshotError::LockConflict) if self.config.lock_wait == LockWait::NoWait => {
                warn!(owner = %self.owner, "monitor lock busy, reading possibly stale data");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// The payloads of all live processes, our own first.
    fn read_merged(&self) -> Result<Vec<u8>, SnapshotError> {
        let mut sync = self.monitor.lock();
        let segment = sync
            .segment
            .as_mut()
            .unwrap_or_else(|| panic!("no monitoring data of {} to read", self.owner));

        let mut guard = segment.acquire()?;
        Ok(guard.read_all(self.owner, &*self.liveness))
    }
}
