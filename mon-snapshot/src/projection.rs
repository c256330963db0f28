//! Turn a merged dump into the rows one session may see.
use std::collections::HashMap;

use mon_dump::schema::database;
use mon_dump::{Column, ColumnType, GlobalId, Reader, Relation, Timestamp, Value};

use crate::blob::{BlobArena, BlobId, RequestId};

/// The character set of a session's connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Charset {
    /// Raw bytes. Metadata text outside ASCII can not be represented.
    None,
    #[default]
    Utf8,
}

/// The querying side of a snapshot.
#[derive(Clone, Debug)]
pub struct Session {
    pub user: String,
    /// Sees the attachments of all users.
    pub locksmith: bool,
    pub charset: Charset,
}

/// A column value. Absent columns are NULL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Datum {
    Integer(i64),
    Timestamp(Timestamp),
    Text(String),
    Blob(BlobId),
}

/// One row of a monitoring relation, columns ordered as in [`Relation::columns`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Row {
    values: Vec<Option<Datum>>,
}

impl Session {
    pub fn new(user: impl Into<String>) -> Self {
        Session {
            user: user.into(),
            locksmith: false,
            charset: Charset::default(),
        }
    }

    pub fn locksmith(user: impl Into<String>) -> Self {
        Session {
            locksmith: true,
            ..Session::new(user)
        }
    }
}

impl Row {
    fn empty(relation: Relation) -> Self {
        Row {
            values: vec![None; relation.columns().len()],
        }
    }

    /// The value of a column, by its field id.
    pub fn get(&self, field: u8) -> Option<&Datum> {
        self.values.get(usize::from(field))?.as_ref()
    }

    pub fn integer(&self, field: u8) -> Option<i64> {
        match self.get(field)? {
            Datum::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn text(&self, field: u8) -> Option<&str> {
        match self.get(field)? {
            Datum::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn values(&self) -> &[Option<Datum>] {
        &self.values
    }
}

/// Projects the records of one snapshot.
pub(crate) struct Projection<'lt> {
    session: &'lt Session,
    database_name: &'lt str,
    blobs: &'lt mut BlobArena,
    request: RequestId,
    local_ids: HashMap<GlobalId, i64>,
}

impl<'lt> Projection<'lt> {
    pub(crate) fn new(
        session: &'lt Session,
        database_name: &'lt str,
        blobs: &'lt mut BlobArena,
        request: RequestId,
    ) -> Self {
        Projection {
            session,
            database_name,
            blobs,
            request,
            local_ids: HashMap::new(),
        }
    }

    /// Project a merged dump, returning the rows of every relation indexed by relation id.
    ///
    /// The database record passes only for our own database. It opens the attachment gate until
    /// the first row below it was stored, so only one database row is ever produced. An attachment
    /// record passes for locksmiths or for the session's own user, and its verdict applies to all
    /// records following it up to the next attachment.
    pub(crate) fn run(mut self, data: &[u8]) -> Vec<Vec<Row>> {
        let mut rows: Vec<Vec<Row>> = Relation::ALL.iter().map(|_| Vec::new()).collect();

        let mut dbb_allowed = false;
        let mut att_allowed = false;
        let mut dbb_processed = false;

        for record in Reader::new(data) {
            let relation = record.relation();
            let mut row = Row::empty(relation);
            let mut stored = false;

            for field in record {
                match relation {
                    Relation::Database => {
                        if field.id == database::NAME {
                            dbb_allowed = field.value == Value::String(self.database_name.as_bytes());
                        }

                        if dbb_allowed && !dbb_processed {
                            self.put_field(&mut row, relation, field.id, field.value);
                            stored = true;
                        }

                        att_allowed = dbb_allowed && !dbb_processed;
                    }
                    Relation::Attachments => {
                        if Some(field.id) == relation.scope_field() {
                            att_allowed = self.session.locksmith
                                || field.value == Value::String(self.session.user.as_bytes());
                        }

                        if dbb_allowed && att_allowed {
                            self.put_field(&mut row, relation, field.id, field.value);
                            stored = true;
                            dbb_processed = true;
                        }
                    }
                    _ => {
                        if dbb_allowed && att_allowed {
                            self.put_field(&mut row, relation, field.id, field.value);
                            stored = true;
                            dbb_processed = true;
                        }
                    }
                }
            }

            if stored {
                rows[usize::from(relation.id())].push(row);
            }
        }

        rows
    }

    fn put_field(&mut self, row: &mut Row, relation: Relation, field: u8, value: Value<'_>) {
        // Fields unknown to the relation stay NULL.
        let Some(column) = relation.columns().get(usize::from(field)) else {
            return;
        };

        row.values[usize::from(field)] = self.convert(column, value);
    }

    fn convert(&mut self, column: &Column, value: Value<'_>) -> Option<Datum> {
        match (column.ty, value) {
            (ColumnType::Id | ColumnType::Integer, Value::GlobalId(id)) => {
                Some(Datum::Integer(self.local_id(id)))
            }
            (ColumnType::Id | ColumnType::Integer, Value::Integer(value)) => Some(Datum::Integer(value)),
            (ColumnType::Timestamp, Value::Timestamp(value)) => Some(Datum::Timestamp(value)),
            (ColumnType::Text { width }, Value::String(bytes)) => {
                let text = self.transliterate(bytes);
                Some(Datum::Text(text.chars().take(width).collect()))
            }
            (ColumnType::Blob, Value::String(bytes)) => {
                let text = self.transliterate(bytes);
                let blob = self.blobs.create(self.request, text.into_bytes());
                // The row outlives the request projecting it.
                self.blobs.detach(blob);
                Some(Datum::Blob(blob))
            }
            (ty, value) => {
                debug_assert!(false, "{value:?} does not fit column {} of {ty:?}", column.name);
                None
            }
        }
    }

    /// Map a process-qualified id to a small one, stable within this snapshot.
    fn local_id(&mut self, id: GlobalId) -> i64 {
        let next = self.local_ids.len() as i64 + 1;
        *self.local_ids.entry(id).or_insert(next)
    }

    /// Dumped strings are in the metadata character set, UTF-8.
    fn transliterate(&self, bytes: &[u8]) -> String {
        match self.session.charset {
            Charset::None => bytes
                .iter()
                .map(|&b| if b > 0x7F { '?' } else { char::from(b) })
                .collect(),
            Charset::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
        }
    }
}
