//! The advisory lock used to ask sibling processes for fresh monitoring data.
//!
//! Every database handle holds the monitor lock in shared mode together with a blocking callback.
//! A process wanting a snapshot requests the same lock exclusively. The lock manager then invokes
//! the callbacks of the conflicting holders, each of which dumps its data and releases its lock,
//! so that the exclusive request is granted once everybody has published.
use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mon_segment::Owner;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

use crate::SnapshotError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// How long a conflicting request waits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LockWait {
    /// Until granted.
    #[default]
    Wait,
    /// Fail with [`SnapshotError::LockConflict`] right away.
    NoWait,
    /// Fail with [`SnapshotError::LockTimeout`] once elapsed.
    Timeout(Duration),
}

/// Invoked when another owner requests a conflicting lock.
///
/// Runs asynchronously to the holder. It must not wait for any lock of the lock manager.
pub type BlockingCallback = Arc<dyn Fn() + Send + Sync>;

/// A granted lock.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LockHandle(u64);

pub trait LockManager: Send + Sync {
    fn lock(
        &self,
        owner: Owner,
        key: &str,
        mode: LockMode,
        wait: LockWait,
        blocking: Option<BlockingCallback>,
    ) -> Result<LockHandle, SnapshotError>;

    /// Release a granted lock. Releasing twice is a no-op.
    fn release(&self, handle: LockHandle);
}

/// A lock manager for owners living in one operating system process.
///
/// Blocking callbacks are delivered in order on a dedicated thread, at most once per grant.
pub struct LocalLockTable {
    state: Mutex<Table>,
    changed: Condvar,
    delivery: Mutex<mpsc::Sender<BlockingCallback>>,
}

#[derive(Default)]
struct Table {
    next: u64,
    keys: HashMap<String, Vec<Holder>>,
}

struct Holder {
    handle: LockHandle,
    owner: Owner,
    mode: LockMode,
    blocking: Option<BlockingCallback>,
    notified: bool,
}

impl LockMode {
    pub fn is_compatible(self, other: LockMode) -> bool {
        matches!((self, other), (LockMode::Shared, LockMode::Shared))
    }
}

impl LocalLockTable {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel::<BlockingCallback>();

        std::thread::Builder::new()
            .name("mon-lock-callbacks".into())
            .spawn(move || {
                for callback in receiver {
                    callback();
                }
            })
            .unwrap_or_else(|err| panic!("cannot start the lock callback thread: {err}"));

        LocalLockTable {
            state: Mutex::new(Table::default()),
            changed: Condvar::new(),
            delivery: Mutex::new(sender),
        }
    }

    fn deliver(&self, callback: BlockingCallback) {
        if self.delivery.lock().send(callback).is_err() {
            error!("the lock callback thread is gone");
        }
    }
}

impl Default for LocalLockTable {
    fn default() -> Self {
        LocalLockTable::new()
    }
}

impl LockManager for LocalLockTable {
    fn lock(
        &self,
        owner: Owner,
        key: &str,
        mode: LockMode,
        wait: LockWait,
        blocking: Option<BlockingCallback>,
    ) -> Result<LockHandle, SnapshotError> {
        let deadline = match wait {
            LockWait::Timeout(timeout) => Some(Instant::now() + timeout),
            _ => None,
        };

        let mut state = self.state.lock();
        loop {
            let table = &mut *state;
            let holders = table.keys.entry(key.to_owned()).or_default();

            let mut granted = true;
            for holder in holders.iter_mut().filter(|h| !mode.is_compatible(h.mode)) {
                granted = false;
                if !holder.notified {
                    holder.notified = true;
                    if let Some(callback) = &holder.blocking {
                        debug!(%owner, holder = %holder.owner, key, "requesting lock release");
                        self.deliver(callback.clone());
                    }
                }
            }

            if granted {
                table.next += 1;
                let handle = LockHandle(table.next);
                holders.push(Holder {
                    handle,
                    owner,
                    mode,
                    blocking,
                    notified: false,
                });

                // Waiters must see the new holder and notify it in turn.
                self.changed.notify_all();
                return Ok(handle);
            }

            match (wait, deadline) {
                (LockWait::NoWait, _) => return Err(SnapshotError::LockConflict),
                (_, Some(deadline)) => {
                    if self.changed.wait_until(&mut state, deadline).timed_out() {
                        return Err(SnapshotError::LockTimeout);
                    }
                }
                (_, None) => self.changed.wait(&mut state),
            }
        }
    }

    fn release(&self, handle: LockHandle) {
        let mut state = self.state.lock();
        state.keys.retain(|_, holders| {
            holders.retain(|holder| holder.handle != handle);
            !holders.is_empty()
        });
        drop(state);
        self.changed.notify_all();
    }
}
