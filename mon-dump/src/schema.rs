//! The monitoring relations and their columns.
//!
//! Field ids double as column positions: a field with id `n` fills column `n` of the row of its
//! relation. Each relation module exports the field ids as constants and its row layout as
//! `COLUMNS`.

/// The virtual relations filled from a dump.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Relation {
    Database = 0,
    Attachments = 1,
    Transactions = 2,
    Statements = 3,
    Calls = 4,
    IoStats = 5,
    RecordStats = 6,
    ContextVariables = 7,
    MemoryUsage = 8,
}

/// Which kind of object a statistics row describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i64)]
pub enum StatGroup {
    Database = 0,
    Attachment = 1,
    Transaction = 2,
    Statement = 3,
    Call = 4,
}

/// The type of a result column.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnType {
    /// A 32-bit identifier, local to one snapshot.
    Id,
    Integer,
    Timestamp,
    /// Text in the metadata character set, at most `width` characters.
    Text { width: usize },
    /// A large object, stored outside of the row.
    Blob,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub ty: ColumnType,
}

impl Relation {
    pub const ALL: [Relation; 9] = [
        Relation::Database,
        Relation::Attachments,
        Relation::Transactions,
        Relation::Statements,
        Relation::Calls,
        Relation::IoStats,
        Relation::RecordStats,
        Relation::ContextVariables,
        Relation::MemoryUsage,
    ];

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.get(usize::from(id)).copied()
    }

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Relation::Database => "MON$DATABASE",
            Relation::Attachments => "MON$ATTACHMENTS",
            Relation::Transactions => "MON$TRANSACTIONS",
            Relation::Statements => "MON$STATEMENTS",
            Relation::Calls => "MON$CALL_STACK",
            Relation::IoStats => "MON$IO_STATS",
            Relation::RecordStats => "MON$RECORD_STATS",
            Relation::ContextVariables => "MON$CONTEXT_VARIABLES",
            Relation::MemoryUsage => "MON$MEMORY_USAGE",
        }
    }

    /// The row layout of this relation.
    pub fn columns(self) -> &'static [Column] {
        match self {
            Relation::Database => database::COLUMNS,
            Relation::Attachments => attachments::COLUMNS,
            Relation::Transactions => transactions::COLUMNS,
            Relation::Statements => statements::COLUMNS,
            Relation::Calls => calls::COLUMNS,
            Relation::IoStats => io_stats::COLUMNS,
            Relation::RecordStats => record_stats::COLUMNS,
            Relation::ContextVariables => context_variables::COLUMNS,
            Relation::MemoryUsage => memory_usage::COLUMNS,
        }
    }

    /// The field that decides the visibility of a record and everything after it.
    ///
    /// Records of these relations must carry this field first, see [`crate::DumpRecord`].
    pub fn scope_field(self) -> Option<u8> {
        match self {
            Relation::Database => Some(database::NAME),
            Relation::Attachments => Some(attachments::USER),
            _ => None,
        }
    }
}

/// Activity of attachments, transactions and statements.
pub mod activity {
    pub const IDLE: i64 = 0;
    pub const ACTIVE: i64 = 1;
    pub const STALLED: i64 = 2;
}

macro_rules! relation {
    ($(#[$meta:meta])* $module:ident { $($field:ident = $id:literal : $ty:expr,)* }) => {
        $(#[$meta])*
        pub mod $module {
            #[allow(unused_imports)]
            use super::ColumnType::*;
            use super::Column;

            $(pub const $field: u8 = $id;)*

            pub const COLUMNS: &[Column] = &[$(Column { name: stringify!($field), ty: $ty },)*];

            #[cfg(test)]
            pub(crate) const IDS: &[u8] = &[$($id,)*];
        }
    };
}

const NAME: crate::schema::ColumnType = ColumnType::Text { width: 255 };
const SHORT: crate::schema::ColumnType = ColumnType::Text { width: 31 };

relation!(database {
    NAME = 0: super::NAME,
    PAGE_SIZE = 1: Integer,
    ODS_MAJOR = 2: Integer,
    ODS_MINOR = 3: Integer,
    OLDEST_INTERESTING = 4: Integer,
    OLDEST_ACTIVE = 5: Integer,
    OLDEST_SNAPSHOT = 6: Integer,
    NEXT_TRANSACTION = 7: Integer,
    PAGE_BUFFERS = 8: Integer,
    SQL_DIALECT = 9: Integer,
    SHUTDOWN_MODE = 10: Integer,
    SWEEP_INTERVAL = 11: Integer,
    READ_ONLY = 12: Integer,
    FORCED_WRITES = 13: Integer,
    RESERVE_SPACE = 14: Integer,
    CREATION_DATE = 15: Timestamp,
    PAGES = 16: Integer,
    BACKUP_STATE = 17: Integer,
    STAT_ID = 18: Id,
});

relation!(attachments {
    USER = 0: super::SHORT,
    ID = 1: Integer,
    SERVER_PID = 2: Integer,
    STATE = 3: Integer,
    NAME = 4: super::NAME,
    ROLE = 5: super::SHORT,
    REMOTE_PROTOCOL = 6: super::SHORT,
    REMOTE_ADDRESS = 7: super::NAME,
    REMOTE_PID = 8: Integer,
    REMOTE_PROCESS = 9: super::NAME,
    CHARACTER_SET_ID = 10: Integer,
    TIMESTAMP = 11: Timestamp,
    GARBAGE_COLLECTION = 12: Integer,
    STAT_ID = 13: Id,
});

relation!(transactions {
    ID = 0: Integer,
    ATTACHMENT_ID = 1: Integer,
    STATE = 2: Integer,
    TIMESTAMP = 3: Timestamp,
    TOP = 4: Integer,
    OLDEST = 5: Integer,
    OLDEST_ACTIVE = 6: Integer,
    ISOLATION_MODE = 7: Integer,
    LOCK_TIMEOUT = 8: Integer,
    READ_ONLY = 9: Integer,
    AUTO_COMMIT = 10: Integer,
    AUTO_UNDO = 11: Integer,
    STAT_ID = 12: Id,
});

relation!(statements {
    ID = 0: Integer,
    ATTACHMENT_ID = 1: Integer,
    TRANSACTION_ID = 2: Integer,
    STATE = 3: Integer,
    TIMESTAMP = 4: Timestamp,
    SQL_TEXT = 5: Blob,
    STAT_ID = 6: Id,
});

relation!(calls {
    ID = 0: Integer,
    STATEMENT_ID = 1: Integer,
    CALLER_ID = 2: Integer,
    PACKAGE_NAME = 3: super::SHORT,
    OBJECT_NAME = 4: super::SHORT,
    OBJECT_TYPE = 5: Integer,
    TIMESTAMP = 6: Timestamp,
    SOURCE_LINE = 7: Integer,
    SOURCE_COLUMN = 8: Integer,
    STAT_ID = 9: Id,
});

relation!(io_stats {
    STAT_ID = 0: Id,
    STAT_GROUP = 1: Integer,
    PAGE_READS = 2: Integer,
    PAGE_WRITES = 3: Integer,
    PAGE_FETCHES = 4: Integer,
    PAGE_MARKS = 5: Integer,
});

relation!(record_stats {
    STAT_ID = 0: Id,
    STAT_GROUP = 1: Integer,
    SEQ_READS = 2: Integer,
    IDX_READS = 3: Integer,
    INSERTS = 4: Integer,
    UPDATES = 5: Integer,
    DELETES = 6: Integer,
    BACKOUTS = 7: Integer,
    PURGES = 8: Integer,
    EXPUNGES = 9: Integer,
});

relation!(
    /// Variables of either an attachment or a transaction, the other id stays empty.
    context_variables {
        ATTACHMENT_ID = 0: Integer,
        TRANSACTION_ID = 1: Integer,
        NAME = 2: super::SHORT,
        VALUE = 3: super::NAME,
    }
);

relation!(memory_usage {
    STAT_ID = 0: Id,
    STAT_GROUP = 1: Integer,
    CURRENT_USED = 2: Integer,
    CURRENT_ALLOCATED = 3: Integer,
    MAX_USED = 4: Integer,
    MAX_ALLOCATED = 5: Integer,
});
