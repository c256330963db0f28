use std::sync::Arc;

use mon_dump::{Column, Relation};

use crate::blob::{BlobArena, BlobId};
use crate::coordinator::Snapshot;
use crate::database::Database;
use crate::projection::{Row, Session};
use crate::SnapshotError;

/// A transaction of a session reading monitoring relations.
///
/// The first access builds a snapshot, every later access within the transaction sees the same
/// one. Large objects of the snapshot live until the transaction is dropped.
pub struct QueryTransaction {
    database: Arc<Database>,
    session: Session,
    snapshot: Option<Snapshot>,
    blobs: BlobArena,
}

/// Sequential access to the rows of one monitoring relation.
pub struct MonitoringTableScan<'tra> {
    relation: Relation,
    rows: &'tra [Row],
    position: usize,
}

impl QueryTransaction {
    pub fn new(database: Arc<Database>, session: Session) -> Self {
        QueryTransaction {
            database,
            session,
            snapshot: None,
            blobs: BlobArena::new(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The snapshot of this transaction, built on first use.
    pub fn snapshot(&mut self) -> Result<&Snapshot, SnapshotError> {
        let snapshot = match self.snapshot.take() {
            Some(snapshot) => snapshot,
            None => Snapshot::create(&self.database, &self.session, &mut self.blobs)?,
        };

        Ok(&*self.snapshot.insert(snapshot))
    }

    pub fn scan(&mut self, relation: Relation) -> Result<MonitoringTableScan<'_>, SnapshotError> {
        let rows = self.snapshot()?.rows(relation);
        Ok(MonitoringTableScan {
            relation,
            rows,
            position: 0,
        })
    }

    pub fn blob(&self, id: BlobId) -> Option<&[u8]> {
        self.blobs.get(id)
    }
}

impl MonitoringTableScan<'_> {
    pub fn relation(&self) -> Relation {
        self.relation
    }

    pub fn get_row_format(&self) -> &'static [Column] {
        self.relation.columns()
    }

    /// The row at `number`, counting from zero.
    pub fn fetch_row(&self, number: usize) -> Option<&Row> {
        self.rows.get(number)
    }
}

impl<'tra> Iterator for MonitoringTableScan<'tra> {
    type Item = &'tra Row;

    fn next(&mut self) -> Option<Self::Item> {
        let row = self.rows.get(self.position)?;
        self.position += 1;
        Some(row)
    }
}
