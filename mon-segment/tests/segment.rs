#![cfg(target_family = "unix")]
use mon_segment::{Owner, Segment, SegmentError, SegmentOptions};

const A: Owner = Owner { process_id: 10, local_id: 1 };
const B: Owner = Owner { process_id: 20, local_id: 1 };
const C: Owner = Owner { process_id: 30, local_id: 1 };

fn options(dir: &tempfile::TempDir) -> SegmentOptions {
    SegmentOptions {
        dir: dir.path().to_owned(),
        granularity: 4096,
    }
}

fn dump(segment: &mut Segment, data: &[u8]) {
    let owner = segment.owner();
    let mut guard = segment.acquire().unwrap();
    guard.remove_owner(owner);
    let mut writer = guard.element_writer(owner).unwrap();
    writer.write(data).unwrap();
}

#[test]
fn own_data_is_read_first() {
    let dir = tempfile::tempdir().unwrap();
    let mut a = Segment::open("db", A, &options(&dir)).unwrap();
    let mut b = Segment::open("db", B, &options(&dir)).unwrap();
    let mut c = Segment::open("db", C, &options(&dir)).unwrap();

    dump(&mut a, b"aaaa");
    dump(&mut b, b"bb");
    dump(&mut c, b"c");

    let alive = |_: u32| true;
    let merged = c.acquire().unwrap().read_all(C, &alive);
    assert_eq!(merged, b"caaaabb");

    let merged = b.acquire().unwrap().read_all(B, &alive);
    assert_eq!(merged, b"bbaaaac");
}

#[test]
fn collects_dead_processes() {
    let dir = tempfile::tempdir().unwrap();
    let mut a = Segment::open("db", A, &options(&dir)).unwrap();
    let mut b = Segment::open("db", B, &options(&dir)).unwrap();
    let mut c = Segment::open("db", C, &options(&dir)).unwrap();

    dump(&mut a, b"from a");
    dump(&mut b, b"from b");
    dump(&mut c, b"from c");

    let live_size = {
        let mut guard = a.acquire().unwrap();
        let elements = guard.elements();
        assert_eq!(elements.len(), 3);
        let used = guard.usage().used;
        // b is dead
        used - (elements[2].offset - elements[1].offset)
    };

    let alive = |pid: u32| pid != 20;
    let mut guard = a.acquire().unwrap();
    let merged = guard.read_all(A, &alive);
    assert_eq!(merged, b"from afrom c");
    assert_eq!(guard.usage().used, live_size);

    let owners: Vec<_> = guard.elements().into_iter().map(|e| e.owner).collect();
    assert_eq!(owners, [A, C]);
}

#[test]
fn redump_keeps_one_element() {
    let dir = tempfile::tempdir().unwrap();
    let mut a = Segment::open("db", A, &options(&dir)).unwrap();

    dump(&mut a, b"first");
    dump(&mut a, b"second");

    let mut guard = a.acquire().unwrap();
    let elements = guard.elements();
    assert_eq!(elements.len(), 1);
    assert_eq!(guard.payload(&elements[0]), b"second");
}

#[test]
fn growth_rounds_to_granularity() {
    let dir = tempfile::tempdir().unwrap();
    let mut a = Segment::open("db", A, &options(&dir)).unwrap();
    let mut b = Segment::open("db", B, &options(&dir)).unwrap();
    assert_eq!(a.mapped_len(), 4096);

    let payload = vec![0x5a; 5000];
    dump(&mut a, &payload);
    assert_eq!(a.mapped_len(), 8192);

    {
        let guard = a.acquire().unwrap();
        let usage = guard.usage();
        assert_eq!(usage.allocated, 8192);
        assert!(usage.used <= usage.allocated);
    }

    // The other process notices the growth on its next acquire.
    assert_eq!(b.mapped_len(), 4096);
    let mut guard = b.acquire().unwrap();
    assert_eq!(guard.usage().allocated, 8192);
    let elements = guard.elements();
    assert_eq!(guard.payload(&elements[0]), payload);
    drop(guard);
    assert_eq!(b.mapped_len(), 8192);
}

#[test]
fn rejects_other_layouts() {
    let dir = tempfile::tempdir().unwrap();
    let path = Segment::path_for(dir.path(), "db");
    let mut bytes = vec![0u8; 4096];
    bytes[..8].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
    std::fs::write(&path, &bytes).unwrap();

    match Segment::open("db", A, &options(&dir)) {
        Err(SegmentError::VersionMismatch { expected, .. }) => assert_eq!(expected, Segment::LAYOUT),
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("opened a segment with a foreign layout"),
    }

    // The foreign file is left untouched.
    assert_eq!(std::fs::read(&path).unwrap(), bytes);
}

#[test]
fn last_detach_removes_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut a = Segment::open("db", A, &options(&dir)).unwrap();
    let mut b = Segment::open("db", B, &options(&dir)).unwrap();
    let path = a.path().to_owned();

    dump(&mut a, b"a");
    dump(&mut b, b"b");

    drop(a);
    assert!(path.exists(), "b still holds data");

    b.detach().unwrap();
    assert!(!path.exists());
}

#[test]
#[should_panic(expected = "no monitoring data")]
fn read_without_own_dump() {
    let dir = tempfile::tempdir().unwrap();
    let mut a = Segment::open("db", A, &options(&dir)).unwrap();
    let mut b = Segment::open("db", B, &options(&dir)).unwrap();
    dump(&mut a, b"a");

    let _ = b.acquire().unwrap().read_all(B, &|_: u32| true);
}

#[test]
#[should_panic(expected = "no monitoring data")]
fn own_dump_of_a_dead_process() {
    let dir = tempfile::tempdir().unwrap();
    let mut a = Segment::open("db", A, &options(&dir)).unwrap();
    let mut b = Segment::open("db", B, &options(&dir)).unwrap();
    dump(&mut a, b"a");
    dump(&mut b, b"b");

    // Our own element is collected like any other, it cannot be read afterwards.
    let _ = b.acquire().unwrap().read_all(B, &|pid: u32| pid != B.process_id);
}
