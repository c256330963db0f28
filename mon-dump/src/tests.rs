use crate::codec::{DumpRecord, Reader, Value, ValueType, Writer};
use crate::schema::{self, Relation};
use crate::{GlobalId, Timestamp};

fn encode(records: &[DumpRecord]) -> Vec<u8> {
    let mut writer = Writer::new(vec![]);
    for record in records {
        match writer.put_record(record) {
            Ok(()) => {}
            Err(never) => match never {},
        }
    }
    writer.into_inner()
}

#[test]
fn fields_in_stored_order() {
    let mut record = DumpRecord::new(Relation::Transactions);
    record
        .store_integer(schema::transactions::ID, -42)
        .store_timestamp(schema::transactions::TIMESTAMP, Timestamp::from_micros(1_700_000_000_000_000))
        .store_global_id(schema::transactions::STAT_ID, GlobalId::new(10, 7))
        .store_integer(schema::transactions::ATTACHMENT_ID, 3);

    let data = encode(&[record]);
    let mut reader = Reader::new(&data);
    let record = reader.get_record().expect("one record");
    assert_eq!(record.relation(), Relation::Transactions);

    let fields: Vec<_> = record.map(|field| (field.id, field.value)).collect();
    assert_eq!(
        fields,
        [
            (schema::transactions::ID, Value::Integer(-42)),
            (
                schema::transactions::TIMESTAMP,
                Value::Timestamp(Timestamp::from_micros(1_700_000_000_000_000))
            ),
            (schema::transactions::STAT_ID, Value::GlobalId(GlobalId::new(10, 7))),
            (schema::transactions::ATTACHMENT_ID, Value::Integer(3)),
        ]
    );

    assert!(reader.get_record().is_none());
}

#[test]
fn strings_keep_their_bytes() {
    let mut record = DumpRecord::new(Relation::ContextVariables);
    record
        .store_string(schema::context_variables::NAME, "")
        .store_string(schema::context_variables::VALUE, "grüße");

    let data = encode(&[record]);
    let mut fields = Reader::new(&data).get_record().unwrap();

    let name = fields.get_field().unwrap();
    assert_eq!(name.value, Value::String(b""));
    assert_eq!(name.value.value_type(), ValueType::String);

    let value = fields.get_field().unwrap();
    assert_eq!(value.value, Value::String("grüße".as_bytes()));
    assert!(fields.get_field().is_none());
}

#[test]
fn scope_field_leads() {
    let mut record = DumpRecord::database("employee");
    record.store_integer(schema::database::PAGE_SIZE, 8192);
    let mut attachment = DumpRecord::attachment("alice");
    attachment.store_integer(schema::attachments::ID, 1);

    let data = encode(&[record, attachment]);
    let mut reader = Reader::new(&data);

    for (relation, expected) in [(Relation::Database, "employee"), (Relation::Attachments, "alice")] {
        let mut record = reader.get_record().unwrap();
        assert_eq!(record.relation(), relation);
        let first = record.get_field().unwrap();
        assert_eq!(Some(first.id), relation.scope_field());
        assert_eq!(first.value, Value::String(expected.as_bytes()));
    }
}

#[test]
#[should_panic(expected = "scope field")]
fn scoped_relation_without_scope_field() {
    DumpRecord::new(Relation::Attachments);
}

#[test]
fn empty_stream() {
    assert!(Reader::new(&[]).get_record().is_none());
}

#[test]
fn records_follow_each_other() {
    let records: Vec<_> = (0..5)
        .map(|n| {
            let mut record = DumpRecord::new(Relation::IoStats);
            record.store_integer(schema::io_stats::PAGE_READS, n);
            record
        })
        .collect();

    let data = encode(&records);
    let reads: Vec<_> = Reader::new(&data)
        .flat_map(|record| record.collect::<Vec<_>>())
        .map(|field| field.value)
        .collect();
    assert_eq!(reads, (0..5).map(Value::Integer).collect::<Vec<_>>());
}

#[test]
#[should_panic(expected = "truncated")]
fn partial_record_is_a_bug() {
    let mut record = DumpRecord::new(Relation::IoStats);
    record.store_integer(schema::io_stats::PAGE_READS, 1);
    let data = encode(&[record]);

    let mut reader = Reader::new(&data[..data.len() - 3]);
    let _ = reader.get_record();
}

#[test]
fn field_ids_are_column_positions() {
    let ids: [(Relation, &[u8]); 9] = [
        (Relation::Database, schema::database::IDS),
        (Relation::Attachments, schema::attachments::IDS),
        (Relation::Transactions, schema::transactions::IDS),
        (Relation::Statements, schema::statements::IDS),
        (Relation::Calls, schema::calls::IDS),
        (Relation::IoStats, schema::io_stats::IDS),
        (Relation::RecordStats, schema::record_stats::IDS),
        (Relation::ContextVariables, schema::context_variables::IDS),
        (Relation::MemoryUsage, schema::memory_usage::IDS),
    ];

    for (relation, ids) in ids {
        assert_eq!(relation.columns().len(), ids.len(), "{relation:?}");
        for (position, &id) in ids.iter().enumerate() {
            assert_eq!(usize::from(id), position, "{relation:?}");
        }
        assert_eq!(Relation::from_id(relation.id()), Some(relation));
    }

    assert_eq!(Relation::from_id(9), None);
}

#[test]
fn global_ids() {
    let id = GlobalId::new(20, 3);
    assert_eq!(id.0, (20 << 32) | 3);
    assert_eq!(id.process_id(), 20);
    assert_eq!(id.counter(), 3);
}

#[test]
fn timestamps_around_the_epoch() {
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    let later = UNIX_EPOCH + Duration::from_micros(1_500);
    assert_eq!(Timestamp::from(later).as_micros(), 1_500);
    assert_eq!(SystemTime::from(Timestamp::from(later)), later);

    let earlier = UNIX_EPOCH - Duration::from_micros(20);
    assert_eq!(Timestamp::from(earlier).as_micros(), -20);
    assert_eq!(SystemTime::from(Timestamp::from_micros(-20)), earlier);
}
