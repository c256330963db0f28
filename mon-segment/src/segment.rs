use std::fs::{self, File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use memmap2::MmapMut;
use tracing::{debug, error, warn};

use crate::layout::{round_up, ElementHead, Header, Region, ALIGNMENT};
use crate::{Liveness, Owner, SegmentError, SegmentOptions};

/// One process's mapping of the monitoring segment of a database.
///
/// The mapping is private to this value. All access goes through a [`SegmentGuard`], which holds
/// the cross-process mutex. On drop, the elements of `owner` are removed and the file is deleted
/// if nobody else left data in it.
pub struct Segment {
    owner: Owner,
    path: PathBuf,
    file: File,
    map: MmapMut,
    granularity: usize,
    /// Cleared once the own elements were removed by an explicit detach.
    attached: bool,
}

/// Exclusive access to the segment, across all processes.
///
/// Dropping the guard releases the mutex.
pub struct SegmentGuard<'lt> {
    segment: &'lt mut Segment,
}

/// The offset of an element being written, as returned by [`SegmentGuard::begin_write`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ElementOffset(usize);

/// Appends to one element while the guard is held.
pub struct ElementWriter<'guard, 'lt> {
    guard: &'guard mut SegmentGuard<'lt>,
    offset: ElementOffset,
}

/// A read-only description of a stored element.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ElementInfo {
    pub owner: Owner,
    pub offset: usize,
    pub length: usize,
}

/// The fill state of the segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Usage {
    pub used: usize,
    pub allocated: usize,
}

impl Segment {
    /// The format tag and version written into every segment header.
    pub const LAYOUT: u64 = Header::expected_layout();

    /// Map the segment of a database, creating it if this is the first process to attach.
    ///
    /// The file name is derived from the unique identity of the database so that all processes
    /// serving it agree on the same segment.
    pub fn open(identity: &str, owner: Owner, options: &SegmentOptions) -> Result<Self, SegmentError> {
        assert!(
            options.granularity >= Header::SIZE && options.granularity % ALIGNMENT == 0,
            "allocation granularity must be aligned and fit the header"
        );

        fs::create_dir_all(&options.dir).map_err(SegmentError::Mapping)?;
        let path = Self::path_for(&options.dir, identity);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(SegmentError::Mapping)?;

        // Initialization races with other processes opening the same file.
        flock(&file, libc::LOCK_EX).map_err(SegmentError::Mapping)?;
        let mapped = Self::map_locked(&file, options.granularity);
        let unlocked = flock(&file, libc::LOCK_UN);
        let map = mapped?;
        unlocked.map_err(SegmentError::Mapping)?;

        Ok(Segment {
            owner,
            path,
            file,
            map,
            granularity: options.granularity,
            attached: true,
        })
    }

    /// The file backing the segment of `identity` within `dir`.
    pub fn path_for(dir: &Path, identity: &str) -> PathBuf {
        dir.join(format!("monitor.{identity}"))
    }

    /// Map the file and validate or initialize its header. The file lock is held.
    fn map_locked(file: &File, granularity: usize) -> Result<MmapMut, SegmentError> {
        let mut len = file.metadata().map_err(SegmentError::Mapping)?.len();

        // Only a new file is sized here, existing ones are mapped as they are.
        if len < Header::SIZE as u64 {
            file.set_len(granularity as u64).map_err(SegmentError::Mapping)?;
            len = granularity as u64;
        }

        // Safety: the file is shared with other processes, but only ever modified while holding
        // the file lock and we never hand out references that outlive a guard.
        let mut map = unsafe { MmapMut::map_mut(file) }.map_err(SegmentError::Mapping)?;
        let mut region = Region::new(&mut map[..]);
        let header = region.header();

        // A zeroed header is a file whose creator died before initializing it.
        if header.tag == 0 && header.version == 0 {
            region.set_header(&Header::fresh(granularity.max(len as usize)));
            debug!("initialized monitoring segment");
        } else if header.layout() != Self::LAYOUT {
            return Err(SegmentError::VersionMismatch {
                found: header.layout(),
                expected: Self::LAYOUT,
            });
        }

        Ok(map)
    }

    pub fn owner(&self) -> Owner {
        self.owner
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The number of bytes currently mapped by this process.
    pub fn mapped_len(&self) -> usize {
        self.map.len()
    }

    /// Take the segment mutex.
    ///
    /// If another process grew the segment since we last looked, the mapping is refreshed before
    /// returning.
    pub fn acquire(&mut self) -> Result<SegmentGuard<'_>, SegmentError> {
        flock(&self.file, libc::LOCK_EX)?;
        let mut guard = SegmentGuard { segment: self };

        let allocated = guard.segment.region_ref_header().allocated as usize;
        if allocated > guard.segment.map.len() {
            debug!(allocated, mapped = guard.segment.map.len(), "segment grown by another process");
            guard.segment.remap()?;
        }

        Ok(guard)
    }

    /// Detach explicitly, reporting failures instead of logging them.
    pub fn detach(mut self) -> Result<(), SegmentError> {
        self.attached = false;
        self.detach_inner()
    }

    fn detach_inner(&mut self) -> Result<(), SegmentError> {
        let owner = self.owner;
        let mut guard = self.acquire()?;
        guard.remove_owner(owner);

        if guard.usage().used == Header::SIZE {
            fs::remove_file(&guard.segment.path)?;
            debug!(path = %guard.segment.path.display(), "removed empty monitoring segment");
        }

        Ok(())
    }

    fn region_ref_header(&self) -> Header {
        bytemuck::pod_read_unaligned(&self.map[..core::mem::size_of::<Header>()])
    }

    fn region(&mut self) -> Region<'_> {
        Region::new(&mut self.map[..])
    }

    #[cfg(unix)]
    fn remap(&mut self) -> Result<(), SegmentError> {
        // Safety: see `map_locked`. The old mapping is dropped on assignment, no borrow of it
        // survives since we hold `&mut self`.
        self.map = unsafe { MmapMut::map_mut(&self.file) }?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn remap(&mut self) -> Result<(), SegmentError> {
        Err(SegmentError::GrowthUnsupported)
    }

    /// Make room for `length` more bytes past `used`.
    fn ensure_space(&mut self, length: usize) -> Result<(), SegmentError> {
        let header = self.region_ref_header();
        let needed = header.used as usize + length;

        if needed <= header.allocated as usize {
            return Ok(());
        }

        let size = round_up(needed, self.granularity);
        self.file.set_len(size as u64)?;
        self.remap()?;

        let mut region = self.region();
        let mut header = region.header();
        header.allocated = size as u64;
        region.set_header(&header);

        debug!(size, "grew monitoring segment");
        Ok(())
    }
}

impl<'lt> SegmentGuard<'lt> {
    pub fn usage(&self) -> Usage {
        let header = self.segment.region_ref_header();
        Usage {
            used: header.used as usize,
            allocated: header.allocated as usize,
        }
    }

    /// Put a new, empty element for `owner` at the tail.
    pub fn begin_write(&mut self, owner: Owner) -> Result<ElementOffset, SegmentError> {
        self.segment.ensure_space(ElementHead::SIZE)?;
        let offset = self.segment.region().push_element(owner);
        Ok(ElementOffset(offset))
    }

    /// Append bytes to the payload of an element started with [`Self::begin_write`].
    pub fn append(&mut self, offset: ElementOffset, data: &[u8]) -> Result<(), SegmentError> {
        let current = self.segment.region().element(offset.0).length as usize;
        if current + data.len() > u32::MAX as usize {
            return Err(SegmentError::ElementTooLarge { max: u32::MAX });
        }

        self.segment.ensure_space(data.len() + ALIGNMENT)?;
        self.segment.region().extend_element(offset.0, data);
        Ok(())
    }

    /// Start an element and return a writer appending to it.
    pub fn element_writer(&mut self, owner: Owner) -> Result<ElementWriter<'_, 'lt>, SegmentError> {
        let offset = self.begin_write(owner)?;
        Ok(ElementWriter { guard: self, offset })
    }

    /// Remove every element written by `owner`.
    pub fn remove_owner(&mut self, owner: Owner) -> usize {
        self.segment.region().retain(|_, head| head.owner() != owner)
    }

    /// Remove the elements of all processes that are no longer alive.
    pub fn collect(&mut self, liveness: &(impl Liveness + ?Sized)) -> usize {
        self.segment.region().retain(|_, head| {
            let alive = liveness.is_alive(head.process_id);
            if !alive {
                warn!(owner = %head.owner(), "dropping monitoring data of a dead process");
            }
            alive
        })
    }

    /// Read the payloads of all live writers, those of `owner` first.
    ///
    /// Elements of dead processes are removed on the way. The caller must have written its own
    /// element before, this is asserted.
    pub fn read_all(&mut self, owner: Owner, liveness: &(impl Liveness + ?Sized)) -> Vec<u8> {
        let mut own = None;
        let mut total = 0;

        // First pass, compact and measure.
        self.segment.region().retain(|offset, head| {
            if liveness.is_alive(head.process_id) {
                if head.owner() == owner {
                    own = Some(offset);
                }
                total += head.length as usize;
                true
            } else {
                warn!(owner = %head.owner(), "dropping monitoring data of a dead process");
                false
            }
        });

        let own = own.unwrap_or_else(|| panic!("no monitoring data of {owner} to read"));

        // Second pass, copy with our own data leading.
        let region = self.segment.region();
        let mut buffer = Vec::with_capacity(total);
        buffer.extend_from_slice(region.payload(own));

        for offset in region.offsets() {
            if offset != own {
                buffer.extend_from_slice(region.payload(offset));
            }
        }

        assert_eq!(buffer.len(), total, "monitoring segment changed while reading");
        buffer
    }

    /// Describe all elements in storage order.
    pub fn elements(&mut self) -> Vec<ElementInfo> {
        let region = self.segment.region();
        region
            .offsets()
            .into_iter()
            .map(|offset| {
                let head = region.element(offset);
                ElementInfo {
                    owner: head.owner(),
                    offset,
                    length: head.length as usize,
                }
            })
            .collect()
    }

    /// The payload of an element listed by [`Self::elements`].
    pub fn payload(&mut self, element: &ElementInfo) -> Vec<u8> {
        self.segment.region().payload(element.offset).to_vec()
    }
}

impl Drop for SegmentGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = flock(&self.segment.file, libc::LOCK_UN) {
            error!(%err, "failed to release the monitoring segment mutex");
        }
    }
}

impl ElementWriter<'_, '_> {
    pub fn offset(&self) -> ElementOffset {
        self.offset
    }

    pub fn write(&mut self, data: &[u8]) -> Result<(), SegmentError> {
        self.guard.append(self.offset, data)
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        if !self.attached {
            return;
        }

        if let Err(err) = self.detach_inner() {
            error!(%err, path = %self.path.display(), "failed to detach from the monitoring segment");
        }
    }
}

fn flock(file: &File, operation: libc::c_int) -> std::io::Result<()> {
    loop {
        // Safety: the descriptor is owned by `file` and valid for the call.
        if unsafe { libc::flock(file.as_raw_fd(), operation) } == 0 {
            return Ok(());
        }

        let err = std::io::Error::last_os_error();
        if err.kind() != std::io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}
