#![cfg(target_family = "unix")]
//! Growing the segment fails once the file size limit is hit.
//!
//! The limit is process wide, this file holds a single test for that reason.
use mon_dump::state::{AttachmentState, Attachments, DatabaseInfo, Request, User};
use mon_dump::{LocalDumper, Reader, Relation, StatIds};
use mon_segment::{Owner, Segment, SegmentError, SegmentOptions};

const A: Owner = Owner { process_id: 10, local_id: 1 };
const B: Owner = Owner { process_id: 20, local_id: 1 };

/// Lowers the file size limit until dropped.
struct FileSizeLimit {
    previous: libc::rlimit,
}

impl FileSizeLimit {
    fn set(bytes: u64) -> Self {
        // Safety: plain libc calls on local values. With the signal ignored, writing past the
        // limit fails with `EFBIG` instead of killing the process.
        unsafe {
            libc::signal(libc::SIGXFSZ, libc::SIG_IGN);
            let mut previous: libc::rlimit = core::mem::zeroed();
            assert_eq!(libc::getrlimit(libc::RLIMIT_FSIZE, &mut previous), 0);

            let limit = libc::rlimit {
                rlim_cur: bytes as libc::rlim_t,
                rlim_max: previous.rlim_max,
            };
            assert_eq!(libc::setrlimit(libc::RLIMIT_FSIZE, &limit), 0);
            FileSizeLimit { previous }
        }
    }
}

impl Drop for FileSizeLimit {
    fn drop(&mut self) {
        // Safety: restores the value read in `set`.
        unsafe { libc::setrlimit(libc::RLIMIT_FSIZE, &self.previous) };
    }
}

fn attachments(user: &str, sql_text: Option<String>) -> Attachments {
    let list = Attachments::default();
    list.add(AttachmentState {
        id: 1,
        user: Some(User {
            name: user.into(),
            role: "NONE".into(),
        }),
        requests: vec![Request {
            id: 5,
            sql_text,
            ..Request::default()
        }],
        ..AttachmentState::default()
    });
    list
}

#[test]
fn failed_dump_leaves_no_element() {
    let dir = tempfile::tempdir().unwrap();
    let options = SegmentOptions {
        dir: dir.path().to_owned(),
        granularity: 4096,
    };
    let database = DatabaseInfo {
        name: "/data/employee.fdb".into(),
        ..DatabaseInfo::default()
    };

    let _limit = FileSizeLimit::set(8192);
    let mut a = Segment::open("employee", A, &options).unwrap();
    let mut b = Segment::open("employee", B, &options).unwrap();

    let ids = StatIds::new(A.process_id);
    LocalDumper::new(A, &ids, false)
        .dump_self(&mut a.acquire().unwrap(), &database, &attachments("alice", None))
        .unwrap();

    let ids = StatIds::new(B.process_id);
    let oversized = attachments("bob", Some("x".repeat(10_000)));
    let result = LocalDumper::new(B, &ids, false).dump_self(&mut b.acquire().unwrap(), &database, &oversized);
    assert!(matches!(result, Err(SegmentError::Io(_))), "{:?}", result.err());

    let mut guard = a.acquire().unwrap();
    let owners: Vec<_> = guard.elements().into_iter().map(|element| element.owner).collect();
    assert_eq!(owners, [A]);

    let data = guard.read_all(A, &|_: u32| true);
    let users = Reader::new(&data)
        .filter(|record| record.relation() == Relation::Attachments)
        .count();
    assert_eq!(users, 1);
}
