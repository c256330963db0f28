use crate::Owner;
use bytemuck::{Pod, Zeroable};
use core::mem::size_of;

/// Every element starts at a multiple of this.
pub(crate) const ALIGNMENT: usize = 8;

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub(crate) struct Header {
    pub tag: u32,
    pub version: u32,
    /// Offset one past the last valid element.
    pub used: u64,
    /// The capacity of the backing file.
    pub allocated: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub(crate) struct ElementHead {
    pub process_id: u32,
    pub local_id: u32,
    /// Number of payload bytes following the head.
    pub length: u32,
    pub reserved: u32,
}

impl Header {
    pub const TAG: u32 = 0x4D4F_4E31;
    pub const VERSION: u32 = 1;
    pub const SIZE: usize = align_offset(size_of::<Header>());

    pub fn fresh(allocated: usize) -> Self {
        Header {
            tag: Self::TAG,
            version: Self::VERSION,
            used: Self::SIZE as u64,
            allocated: allocated as u64,
        }
    }

    /// Tag and version, as one comparable value.
    pub fn layout(&self) -> u64 {
        u64::from(self.tag) << 32 | u64::from(self.version)
    }

    pub const fn expected_layout() -> u64 {
        (Self::TAG as u64) << 32 | Self::VERSION as u64
    }
}

impl ElementHead {
    pub const SIZE: usize = size_of::<ElementHead>();

    pub fn new(owner: Owner) -> Self {
        ElementHead {
            process_id: owner.process_id,
            local_id: owner.local_id,
            length: 0,
            reserved: 0,
        }
    }

    pub fn owner(&self) -> Owner {
        Owner {
            process_id: self.process_id,
            local_id: self.local_id,
        }
    }

    /// The space occupied by head and payload, including the alignment tail.
    pub fn total(&self) -> usize {
        align_offset(Self::SIZE + self.length as usize)
    }
}

pub(crate) const fn align_offset(unaligned: usize) -> usize {
    (unaligned + ALIGNMENT - 1) & !(ALIGNMENT - 1)
}

pub(crate) fn round_up(size: usize, granularity: usize) -> usize {
    size.div_ceil(granularity) * granularity
}

/// Bounds-checked access to the mapped bytes.
///
/// All offsets are relative to the start of the mapping. Reads of elements are checked against
/// `used`, writes against the slice length which is the mapped size.
pub(crate) struct Region<'lt> {
    bytes: &'lt mut [u8],
}

impl<'lt> Region<'lt> {
    pub fn new(bytes: &'lt mut [u8]) -> Self {
        assert!(bytes.len() >= Header::SIZE, "mapping smaller than the segment header");
        Region { bytes }
    }

    pub fn header(&self) -> Header {
        bytemuck::pod_read_unaligned(&self.bytes[..size_of::<Header>()])
    }

    pub fn set_header(&mut self, header: &Header) {
        self.bytes[..size_of::<Header>()].copy_from_slice(bytemuck::bytes_of(header));
    }

    pub fn used(&self) -> usize {
        self.header().used as usize
    }

    fn set_used(&mut self, used: usize) {
        let mut header = self.header();
        header.used = used as u64;
        self.set_header(&header);
    }

    pub fn element(&self, offset: usize) -> ElementHead {
        let end = offset + ElementHead::SIZE;
        assert!(
            offset >= Header::SIZE && end <= self.used(),
            "element offset {offset} outside of the valid segment"
        );
        bytemuck::pod_read_unaligned(&self.bytes[offset..end])
    }

    fn set_element(&mut self, offset: usize, head: &ElementHead) {
        self.bytes[offset..offset + ElementHead::SIZE].copy_from_slice(bytemuck::bytes_of(head));
    }

    pub fn payload(&self, offset: usize) -> &[u8] {
        let head = self.element(offset);
        let start = offset + ElementHead::SIZE;
        &self.bytes[start..start + head.length as usize]
    }

    /// Put an empty element at the tail. The caller ensured the space.
    pub fn push_element(&mut self, owner: Owner) -> usize {
        let offset = self.used();
        let head = ElementHead::new(owner);
        self.set_element(offset, &head);
        self.set_used(offset + head.total());
        offset
    }

    /// Extend the payload of the element at `offset`. The caller ensured the space and that the
    /// new length fits the `u32` length field.
    ///
    /// The element must be the last one, nothing else may have been pushed after it.
    pub fn extend_element(&mut self, offset: usize, data: &[u8]) {
        let mut head = self.element(offset);
        let previous = head.total();
        debug_assert_eq!(offset + previous, self.used(), "only the tail element can grow");

        let start = offset + ElementHead::SIZE + head.length as usize;
        self.bytes[start..start + data.len()].copy_from_slice(data);

        head.length += data.len() as u32;
        self.set_element(offset, &head);
        let used = self.used() + head.total() - previous;
        self.set_used(used);
    }

    /// Walk all elements, removing those for which `keep` returns `false`.
    ///
    /// The callback sees the final offset of each kept element, since removal only ever moves
    /// elements which come after the removed one.
    pub fn retain(&mut self, mut keep: impl FnMut(usize, &ElementHead) -> bool) -> usize {
        let mut removed = 0;
        let mut offset = Header::SIZE;

        while offset < self.used() {
            let head = self.element(offset);
            let length = head.total();

            if keep(offset, &head) {
                offset += length;
            } else {
                let used = self.used();
                assert!(used >= offset + length, "element overlaps the end of the segment");
                self.bytes.copy_within(offset + length..used, offset);
                self.set_used(used - length);
                removed += 1;
            }
        }

        removed
    }

    /// Offsets of all elements in storage order.
    pub fn offsets(&self) -> Vec<usize> {
        let mut offsets = vec![];
        let mut offset = Header::SIZE;

        while offset < self.used() {
            offsets.push(offset);
            offset += self.element(offset).total();
        }

        offsets
    }
}
