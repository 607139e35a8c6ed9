//! Fixed-capacity byte windows for staging connection I/O.
//!
//! A [`ByteWindow`] owns a fixed block of memory plus a movable readable
//! region delimited by a `position` and a `limit` cursor. Every read and
//! write protocol on a connection stages data through one of these; the
//! store is never resized.
//!
//! Two cursor states matter to the I/O layer:
//! - *drained*: `position == limit == 0`, the whole capacity is available
//!   to receive data (the state a read starts from);
//! - *filled*: `position == 0`, `limit == content length` (the state a
//!   completed read leaves behind, and the state a write expects).
//!
//! Indexing is always relative to `position`; the absolute store index is
//! `position + relative_index`.

use std::alloc::{self, Layout};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ptr::NonNull;
use std::sync::OnceLock;

use bytes::Bytes;

use crate::error::Error;

/// Backing storage flavor for a [`ByteWindow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    /// Ordinary heap allocation.
    Heap,
    /// Page-aligned allocation suitable for direct or registered I/O.
    Direct,
}

fn page_size() -> usize {
    static PAGE: OnceLock<usize> = OnceLock::new();
    *PAGE.get_or_init(|| {
        let n = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if n > 0 {
            n as usize
        } else {
            4096
        }
    })
}

/// Page-aligned allocation, released with the layout it was created with.
struct DirectBuf {
    ptr: NonNull<u8>,
    len: usize,
}

// Safety: DirectBuf is a uniquely owned allocation; access is mediated by
// the &/&mut methods on the enclosing window.
unsafe impl Send for DirectBuf {}
unsafe impl Sync for DirectBuf {}

impl DirectBuf {
    /// # Panics
    /// Panics (via the global allocation handler) if the allocation fails.
    fn zeroed(len: usize) -> Self {
        if len == 0 {
            return DirectBuf {
                ptr: NonNull::dangling(),
                len: 0,
            };
        }
        let layout = Self::layout(len);
        // Safety: layout has non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(raw) else {
            alloc::handle_alloc_error(layout);
        };
        DirectBuf { ptr, len }
    }

    fn layout(len: usize) -> Layout {
        Layout::from_size_align(len, page_size()).expect("buffer length overflows an aligned layout")
    }

    fn as_slice(&self) -> &[u8] {
        // Safety: ptr/len describe a live allocation (or len == 0).
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        // Safety: ptr/len describe a live allocation we own exclusively.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for DirectBuf {
    fn drop(&mut self) {
        if self.len != 0 {
            // Safety: allocated in `zeroed` with the identical layout.
            unsafe { alloc::dealloc(self.ptr.as_ptr(), Self::layout(self.len)) };
        }
    }
}

enum Store {
    Heap(Box<[u8]>),
    Direct(DirectBuf),
}

impl Store {
    fn zeroed(len: usize, kind: StorageKind) -> Self {
        match kind {
            StorageKind::Heap => Store::Heap(vec![0u8; len].into_boxed_slice()),
            StorageKind::Direct => Store::Direct(DirectBuf::zeroed(len)),
        }
    }

    fn kind(&self) -> StorageKind {
        match self {
            Store::Heap(_) => StorageKind::Heap,
            Store::Direct(_) => StorageKind::Direct,
        }
    }

    fn as_slice(&self) -> &[u8] {
        match self {
            Store::Heap(b) => b,
            Store::Direct(b) => b.as_slice(),
        }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            Store::Heap(b) => b,
            Store::Direct(b) => b.as_mut_slice(),
        }
    }
}

/// Fixed-capacity byte store with a movable readable region.
///
/// Invariant: `0 <= position <= limit <= capacity` at all times.
///
/// Equality and hashing cover the exact byte sequence of the readable
/// region only; two windows of different capacities holding identical
/// readable content are equal and hash alike.
pub struct ByteWindow {
    store: Store,
    position: usize,
    limit: usize,
}

impl ByteWindow {
    /// Create a zeroed window whose readable region spans the whole store.
    ///
    /// # Panics
    /// Panics if the allocation fails.
    pub fn new(capacity: usize, kind: StorageKind) -> Self {
        ByteWindow {
            store: Store::zeroed(capacity, kind),
            position: 0,
            limit: capacity,
        }
    }

    /// Create a filled window with capacity `content.len()`.
    pub fn from_slice(content: &[u8], kind: StorageKind) -> Self {
        let mut window = ByteWindow::new(content.len(), kind);
        window.store.as_mut_slice().copy_from_slice(content);
        window
    }

    /// Bytes copied from `src` starting at `src_index` into `dst` starting
    /// at `dst_index`, both relative to the windows' positions. Neither
    /// window's cursors move. Fails with an invalid range when `length`
    /// exceeds what either readable region has available past its index.
    pub fn copy(
        src: &ByteWindow,
        src_index: usize,
        dst: &mut ByteWindow,
        dst_index: usize,
        length: usize,
    ) -> Result<(), Error> {
        let src_end = src_index
            .checked_add(length)
            .filter(|end| *end <= src.len())
            .ok_or(Error::InvalidRange {
                from: src_index,
                to: src_index.saturating_add(length),
            })?;
        let dst_end = dst_index
            .checked_add(length)
            .filter(|end| *end <= dst.len())
            .ok_or(Error::InvalidRange {
                from: dst_index,
                to: dst_index.saturating_add(length),
            })?;
        let src_start = src.position + src_index;
        let dst_start = dst.position + dst_index;
        let from = &src.store.as_slice()[src_start..src.position + src_end];
        dst.store.as_mut_slice()[dst_start..dst.position + dst_end].copy_from_slice(from);
        Ok(())
    }

    /// Allocate a new window of size `to - from` holding the overlap with
    /// `original`'s readable region; anything past the overlap stays zero.
    /// Fails with an invalid range when `from > to`; `from == to` yields an
    /// empty window.
    pub fn copy_of_range(
        original: &ByteWindow,
        from: usize,
        to: usize,
        kind: StorageKind,
    ) -> Result<ByteWindow, Error> {
        if from > to {
            return Err(Error::InvalidRange { from, to });
        }
        let mut window = ByteWindow::new(to - from, kind);
        let overlap = original.len().saturating_sub(from).min(to - from);
        if overlap > 0 {
            ByteWindow::copy(original, from, &mut window, 0, overlap)?;
        }
        Ok(window)
    }

    /// Single byte at `position + index`.
    ///
    /// Bounds are enforced at the backing store only, not at `limit`;
    /// panics past `capacity`.
    pub fn get(&self, index: usize) -> u8 {
        self.store.as_slice()[self.position + index]
    }

    /// Store a byte at `position + index`. Same bounds rule as [`get`].
    ///
    /// [`get`]: ByteWindow::get
    pub fn set(&mut self, index: usize, value: u8) {
        let absolute = self.position + index;
        self.store.as_mut_slice()[absolute] = value;
    }

    /// Copy `dst.len()` bytes out, starting at `position + begin`.
    pub fn copy_to(&self, begin: usize, dst: &mut [u8]) {
        let start = self.position + begin;
        dst.copy_from_slice(&self.store.as_slice()[start..start + dst.len()]);
    }

    /// Copy `src` in, starting at `position + begin`.
    pub fn copy_from(&mut self, begin: usize, src: &[u8]) {
        let start = self.position + begin;
        self.store.as_mut_slice()[start..start + src.len()].copy_from_slice(src);
    }

    /// Replace the content: the window becomes filled with `content`.
    ///
    /// # Panics
    /// Panics if `content` is longer than the capacity.
    pub fn set_content(&mut self, content: &[u8]) {
        assert!(
            content.len() <= self.capacity(),
            "content of {} bytes exceeds capacity {}",
            content.len(),
            self.capacity()
        );
        self.store.as_mut_slice()[..content.len()].copy_from_slice(content);
        self.position = 0;
        self.limit = content.len();
    }

    /// Consume a prefix: advance `position` by `n` without copying.
    ///
    /// # Panics
    /// Panics if `n` exceeds the readable length.
    pub fn remove_left(&mut self, n: usize) {
        assert!(n <= self.len(), "cannot remove {n} of {} readable bytes", self.len());
        self.position += n;
    }

    /// Trim a suffix: retract `limit` by `n` without copying.
    ///
    /// # Panics
    /// Panics if `n` exceeds the readable length.
    pub fn remove_right(&mut self, n: usize) {
        assert!(n <= self.len(), "cannot remove {n} of {} readable bytes", self.len());
        self.limit -= n;
    }

    /// Readable byte count, `limit - position`.
    pub fn len(&self) -> usize {
        self.limit - self.position
    }

    pub fn is_empty(&self) -> bool {
        self.position == self.limit
    }

    /// Size of the backing store, fixed at construction.
    pub fn capacity(&self) -> usize {
        self.store.as_slice().len()
    }

    pub fn kind(&self) -> StorageKind {
        self.store.kind()
    }

    /// Start of the readable region.
    pub fn position(&self) -> usize {
        self.position
    }

    /// End of the readable region.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// The readable region as a slice.
    pub fn as_slice(&self) -> &[u8] {
        &self.store.as_slice()[self.position..self.limit]
    }

    /// The readable region as a mutable slice.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.store.as_mut_slice()[self.position..self.limit]
    }

    /// Copy of the readable region.
    pub fn to_vec(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }

    /// Copy of the readable region as [`bytes::Bytes`].
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(self.as_slice())
    }

    /// Whole backing store, independent of the cursors.
    pub(crate) fn raw(&self) -> &[u8] {
        self.store.as_slice()
    }

    pub(crate) fn raw_mut(&mut self) -> &mut [u8] {
        self.store.as_mut_slice()
    }

    pub(crate) fn set_region(&mut self, position: usize, limit: usize) {
        debug_assert!(position <= limit && limit <= self.capacity());
        self.position = position;
        self.limit = limit;
    }
}

impl Clone for ByteWindow {
    /// Independent window of the same capacity and kind, filled with a copy
    /// of the readable content.
    fn clone(&self) -> Self {
        let mut other = ByteWindow::new(self.capacity(), self.kind());
        let length = self.len();
        other.store.as_mut_slice()[..length].copy_from_slice(self.as_slice());
        other.limit = length;
        other
    }
}

impl PartialEq for ByteWindow {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for ByteWindow {}

impl Hash for ByteWindow {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_slice().hash(state);
    }
}

impl fmt::Debug for ByteWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteWindow")
            .field("kind", &self.kind())
            .field("position", &self.position)
            .field("limit", &self.limit)
            .field("capacity", &self.capacity())
            .finish()
    }
}
