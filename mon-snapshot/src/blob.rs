//! Large object storage of a query transaction.
//!
//! Blobs are created on behalf of a request and die with it, unless they are detached first. A
//! detached blob lives as long as the arena, that is until the transaction ends.
use std::collections::HashMap;

/// Refers to a blob of one [`BlobArena`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobId(u32);

/// A request scope within the arena, see [`BlobArena::begin_request`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RequestId(u32);

#[derive(Debug, Default)]
pub struct BlobArena {
    next_blob: u32,
    next_request: u32,
    blobs: HashMap<BlobId, Blob>,
}

#[derive(Debug)]
struct Blob {
    data: Vec<u8>,
    /// The request this blob is bound to, `None` once detached.
    request: Option<RequestId>,
}

impl BlobArena {
    pub fn new() -> Self {
        BlobArena::default()
    }

    pub fn begin_request(&mut self) -> RequestId {
        self.next_request += 1;
        RequestId(self.next_request)
    }

    /// Drop every blob still bound to `request`.
    pub fn end_request(&mut self, request: RequestId) -> usize {
        let before = self.blobs.len();
        self.blobs.retain(|_, blob| blob.request != Some(request));
        before - self.blobs.len()
    }

    pub fn create(&mut self, request: RequestId, data: Vec<u8>) -> BlobId {
        self.next_blob += 1;
        let id = BlobId(self.next_blob);
        self.blobs.insert(
            id,
            Blob {
                data,
                request: Some(request),
            },
        );
        id
    }

    /// Unbind a blob from its request.
    ///
    /// # Panics
    ///
    /// If the blob does not exist or is already detached.
    pub fn detach(&mut self, id: BlobId) {
        let blob = self
            .blobs
            .get_mut(&id)
            .unwrap_or_else(|| panic!("no blob {id:?} to detach"));
        assert!(blob.request.take().is_some(), "blob {id:?} detached twice");
    }

    pub fn get(&self, id: BlobId) -> Option<&[u8]> {
        self.blobs.get(&id).map(|blob| blob.data.as_slice())
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}
