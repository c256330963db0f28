//! The binary record format of a dump.
//!
//! ```text
//! record := length:u32 relation:u8 field*        (length counts relation and fields)
//! field  := id:u8 type:u8 length:u32 payload
//! ```
//!
//! All integers are little endian. Writer and reader always run within the same group of server
//! processes, a malformed stream is therefore a bug and reading one panics.
use crate::schema::Relation;
use crate::{GlobalId, Timestamp};

/// The type tag of a field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ValueType {
    GlobalId = 1,
    Integer = 2,
    Timestamp = 3,
    String = 4,
}

/// A decoded field value, borrowing string payloads from the stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Value<'lt> {
    GlobalId(GlobalId),
    Integer(i64),
    Timestamp(Timestamp),
    String(&'lt [u8]),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DumpField<'lt> {
    pub id: u8,
    pub value: Value<'lt>,
}

/// A record under construction.
///
/// Fields are kept in the order they are stored. Relations with a scope field (see
/// [`Relation::scope_field`]) can only be created through their dedicated constructor, which
/// stores the scope field first.
#[derive(Clone, Debug)]
pub struct DumpRecord {
    relation: Relation,
    buffer: Vec<u8>,
}

/// Where encoded records go.
pub trait DumpSink {
    type Error;

    fn put(&mut self, data: &[u8]) -> Result<(), Self::Error>;
}

/// Serializes records into a sink.
pub struct Writer<S> {
    sink: S,
}

/// Iterates over the records of a dump.
pub struct Reader<'lt> {
    data: &'lt [u8],
}

/// The fields of one record, in stored order. Can be consumed only once.
pub struct RecordReader<'lt> {
    relation: Relation,
    fields: &'lt [u8],
}

const RECORD_HEAD: usize = 4;
const FIELD_HEAD: usize = 1 + 1 + 4;

impl ValueType {
    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            1 => ValueType::GlobalId,
            2 => ValueType::Integer,
            3 => ValueType::Timestamp,
            4 => ValueType::String,
            _ => return None,
        })
    }
}

impl Value<'_> {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::GlobalId(_) => ValueType::GlobalId,
            Value::Integer(_) => ValueType::Integer,
            Value::Timestamp(_) => ValueType::Timestamp,
            Value::String(_) => ValueType::String,
        }
    }
}

impl DumpRecord {
    /// Start a record of a relation without scope field.
    pub fn new(relation: Relation) -> Self {
        assert!(
            relation.scope_field().is_none(),
            "{relation:?} records must start with their scope field"
        );
        Self::raw(relation)
    }

    /// Start a database record, storing the database name first.
    pub fn database(name: &str) -> Self {
        let mut record = Self::raw(Relation::Database);
        record.store_string(crate::schema::database::NAME, name);
        record
    }

    /// Start an attachment record, storing the user name first.
    pub fn attachment(user: &str) -> Self {
        let mut record = Self::raw(Relation::Attachments);
        record.store_string(crate::schema::attachments::USER, user);
        record
    }

    fn raw(relation: Relation) -> Self {
        DumpRecord {
            relation,
            buffer: Vec::with_capacity(128),
        }
    }

    pub fn relation(&self) -> Relation {
        self.relation
    }

    pub fn store_global_id(&mut self, field: u8, id: GlobalId) -> &mut Self {
        self.store(field, ValueType::GlobalId, &id.0.to_le_bytes())
    }

    pub fn store_integer(&mut self, field: u8, value: i64) -> &mut Self {
        self.store(field, ValueType::Integer, &value.to_le_bytes())
    }

    pub fn store_timestamp(&mut self, field: u8, value: Timestamp) -> &mut Self {
        self.store(field, ValueType::Timestamp, &value.as_micros().to_le_bytes())
    }

    pub fn store_string(&mut self, field: u8, value: &str) -> &mut Self {
        self.store(field, ValueType::String, value.as_bytes())
    }

    fn store(&mut self, field: u8, ty: ValueType, data: &[u8]) -> &mut Self {
        let length = u32::try_from(data.len()).unwrap_or(u32::MAX);
        let data = &data[..length as usize];

        self.buffer.push(field);
        self.buffer.push(ty as u8);
        self.buffer.extend_from_slice(&length.to_le_bytes());
        self.buffer.extend_from_slice(data);
        self
    }
}

impl<S: DumpSink> Writer<S> {
    pub fn new(sink: S) -> Self {
        Writer { sink }
    }

    pub fn put_record(&mut self, record: &DumpRecord) -> Result<(), S::Error> {
        let length = (1 + record.buffer.len()) as u32;
        let mut frame = Vec::with_capacity(RECORD_HEAD + length as usize);
        frame.extend_from_slice(&length.to_le_bytes());
        frame.push(record.relation.id());
        frame.extend_from_slice(&record.buffer);

        // One put per record, a sink never holds half a frame.
        self.sink.put(&frame)
    }

    pub fn into_inner(self) -> S {
        self.sink
    }
}

impl<'lt> Reader<'lt> {
    pub fn new(data: &'lt [u8]) -> Self {
        Reader { data }
    }

    /// The next record, or `None` at the end of the stream.
    pub fn get_record(&mut self) -> Option<RecordReader<'lt>> {
        if self.data.is_empty() {
            return None;
        }

        let (length, rest) = split_u32(self.data);
        let length = length as usize;
        assert!(length >= 1 && rest.len() >= length, "truncated monitoring record");

        let (body, rest) = rest.split_at(length);
        self.data = rest;

        let relation = Relation::from_id(body[0])
            .unwrap_or_else(|| panic!("unknown monitoring relation {}", body[0]));

        Some(RecordReader {
            relation,
            fields: &body[1..],
        })
    }
}

impl<'lt> Iterator for Reader<'lt> {
    type Item = RecordReader<'lt>;

    fn next(&mut self) -> Option<Self::Item> {
        self.get_record()
    }
}

impl<'lt> RecordReader<'lt> {
    pub fn relation(&self) -> Relation {
        self.relation
    }

    /// The next field of this record, or `None` once all were read.
    pub fn get_field(&mut self) -> Option<DumpField<'lt>> {
        if self.fields.is_empty() {
            return None;
        }

        assert!(self.fields.len() >= FIELD_HEAD, "truncated monitoring field");
        let id = self.fields[0];
        let ty = ValueType::from_tag(self.fields[1])
            .unwrap_or_else(|| panic!("unknown monitoring value type {}", self.fields[1]));

        let (length, rest) = split_u32(&self.fields[2..]);
        let length = length as usize;
        assert!(rest.len() >= length, "truncated monitoring field");

        let (data, rest) = rest.split_at(length);
        self.fields = rest;

        let value = match ty {
            ValueType::GlobalId => Value::GlobalId(GlobalId(u64::from_le_bytes(fixed(data)))),
            ValueType::Integer => Value::Integer(i64::from_le_bytes(fixed(data))),
            ValueType::Timestamp => {
                Value::Timestamp(Timestamp::from_micros(i64::from_le_bytes(fixed(data))))
            }
            ValueType::String => Value::String(data),
        };

        Some(DumpField { id, value })
    }
}

impl<'lt> Iterator for RecordReader<'lt> {
    type Item = DumpField<'lt>;

    fn next(&mut self) -> Option<Self::Item> {
        self.get_field()
    }
}

fn split_u32(data: &[u8]) -> (u32, &[u8]) {
    assert!(data.len() >= 4, "truncated monitoring length");
    let (head, rest) = data.split_at(4);
    (u32::from_le_bytes(fixed(head)), rest)
}

fn fixed<const N: usize>(data: &[u8]) -> [u8; N] {
    data.try_into()
        .unwrap_or_else(|_| panic!("monitoring value of {} bytes, expected {N}", data.len()))
}

impl DumpSink for Vec<u8> {
    type Error = core::convert::Infallible;

    fn put(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        self.extend_from_slice(data);
        Ok(())
    }
}

impl<S: DumpSink> DumpSink for &'_ mut S {
    type Error = S::Error;

    fn put(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        (**self).put(data)
    }
}
