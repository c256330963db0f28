use crate::layout::{align_offset, round_up, ElementHead, Header, Region};
use crate::Owner;

const A: Owner = Owner { process_id: 10, local_id: 1 };
const B: Owner = Owner { process_id: 20, local_id: 1 };
const A2: Owner = Owner { process_id: 10, local_id: 2 };

#[test]
fn alignment() {
    assert_eq!(align_offset(0), 0);
    assert_eq!(align_offset(1), 8);
    assert_eq!(align_offset(16), 16);
    assert_eq!(align_offset(17), 24);
    assert_eq!(Header::SIZE % 8, 0);
    assert_eq!(round_up(1, 4096), 4096);
    assert_eq!(round_up(4096, 4096), 4096);
    assert_eq!(round_up(4097, 4096), 8192);
}

#[test]
fn push_and_extend() {
    with_setup(|mut region| {
        assert_eq!(region.used(), Header::SIZE);

        let offset = region.push_element(A);
        assert_eq!(offset, Header::SIZE);
        assert_eq!(region.used(), Header::SIZE + ElementHead::SIZE);

        region.extend_element(offset, b"Hello");
        region.extend_element(offset, b", world!");
        assert_eq!(region.payload(offset), b"Hello, world!");
        assert_eq!(region.used(), Header::SIZE + align_offset(ElementHead::SIZE + 13));
        assert_eq!(region.used() % 8, 0);
    });
}

#[test]
fn remove_owner_shrinks_by_aligned_size() {
    with_setup(|mut region| {
        write(&mut region, A, b"first");
        write(&mut region, B, b"second element");
        write(&mut region, A2, b"third");

        let before = region.used();
        let target = region.element(region.offsets()[1]);
        let removed = region.retain(|_, head| head.owner() != B);

        assert_eq!(removed, 1);
        assert_eq!(region.used(), before - target.total());

        let owners: Vec<_> = region
            .offsets()
            .into_iter()
            .map(|offset| region.element(offset).owner())
            .collect();
        assert_eq!(owners, [A, A2]);
        assert_eq!(region.payload(region.offsets()[1]), b"third");
    });
}

#[test]
fn remove_every_element_of_an_owner() {
    with_setup(|mut region| {
        write(&mut region, A, b"stale");
        write(&mut region, B, b"other");
        write(&mut region, A, b"also stale");

        region.retain(|_, head| head.owner() != A);
        let offsets = region.offsets();
        assert_eq!(offsets.len(), 1);
        assert_eq!(region.element(offsets[0]).owner(), B);
        assert_eq!(region.payload(offsets[0]), b"other");
    });
}

#[test]
fn retain_reports_final_offsets() {
    with_setup(|mut region| {
        write(&mut region, A, b"dead data");
        write(&mut region, B, b"kept");

        let mut seen = vec![];
        region.retain(|offset, head| {
            if head.owner() == A {
                false
            } else {
                seen.push(offset);
                true
            }
        });

        assert_eq!(seen, [Header::SIZE]);
        assert_eq!(region.payload(seen[0]), b"kept");
    });
}

#[test]
#[should_panic]
fn element_beyond_used() {
    with_setup(|region| {
        region.element(Header::SIZE);
    });
}

fn write(region: &mut Region<'_>, owner: Owner, data: &[u8]) {
    let offset = region.push_element(owner);
    region.extend_element(offset, data);
}

fn with_setup(method: impl FnOnce(Region<'_>)) {
    let mut memory = vec![0u8; 4096];
    let mut region = Region::new(&mut memory);
    region.set_header(&Header::fresh(4096));
    method(region)
}
