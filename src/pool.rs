//! Pooled byte buffers.
//!
//! Every SDU and PDU payload in the crate lives in a fixed-capacity region
//! handed out by a [`BufferPool`]. Ownership transitions are one-shot moves:
//! upper layer → Tx queue → Tx window → (copy onto the wire), and peer bytes
//! → Rx window → upper layer. Dropping a [`ByteBuffer`] recycles its region.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::RlcError;

/// Capacity of every pooled region, sized for the largest SDU plus headroom.
pub const BUFFER_CAPACITY: usize = 9216;

/// An owned byte region with a movable read offset, sourced from a pool.
pub struct ByteBuffer {
    storage: Option<Box<[u8]>>,
    offset: usize,
    len: usize,
    home: Option<BufferPool>,
}

impl ByteBuffer {
    fn new(storage: Box<[u8]>, home: Option<BufferPool>) -> Self {
        Self {
            storage: Some(storage),
            offset: 0,
            len: 0,
            home,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        BUFFER_CAPACITY
    }

    fn storage(&self) -> &[u8] {
        self.storage.as_deref().expect("storage present until drop")
    }

    fn storage_mut(&mut self) -> &mut [u8] {
        self.storage.as_deref_mut().expect("storage present until drop")
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.storage()[self.offset..self.offset + self.len]
    }

    /// Appends `bytes` after the current contents. On overflow nothing is
    /// written.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), RlcError> {
        let end = self.offset + self.len;
        if end + bytes.len() > BUFFER_CAPACITY {
            return Err(RlcError::BufferOverflow);
        }
        self.storage_mut()[end..end + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
        Ok(())
    }

    /// Writes `bytes` at `at` (relative to the read offset), extending the
    /// length if the write reaches past it. Used for out-of-order segment
    /// placement.
    pub fn write_at(&mut self, at: usize, bytes: &[u8]) -> Result<(), RlcError> {
        let start = self.offset + at;
        if start + bytes.len() > BUFFER_CAPACITY {
            return Err(RlcError::BufferOverflow);
        }
        self.storage_mut()[start..start + bytes.len()].copy_from_slice(bytes);
        self.len = self.len.max(at + bytes.len());
        Ok(())
    }

    /// Advances the read offset, consuming `n` bytes from the front.
    pub fn trim_front(&mut self, n: usize) {
        let n = n.min(self.len);
        self.offset += n;
        self.len -= n;
    }

    pub fn truncate(&mut self, len: usize) {
        self.len = self.len.min(len);
    }

    pub fn clear(&mut self) {
        self.offset = 0;
        self.len = 0;
    }
}

impl fmt::Debug for ByteBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteBuffer")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .finish()
    }
}

impl Drop for ByteBuffer {
    fn drop(&mut self) {
        if let Some(storage) = self.storage.take() {
            if let Some(home) = self.home.take() {
                home.recycle(storage);
            }
        }
    }
}

struct PoolShared {
    free: Mutex<Vec<Box<[u8]>>>,
    exhausted: AtomicU64,
}

/// A clonable handle to a shared pool of fixed-size regions.
///
/// The free list is mutex-protected so entities on different threads can
/// share one pool; allocation never blocks on an empty pool, it fails.
#[derive(Clone)]
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

impl BufferPool {
    pub fn new(n_buffers: usize) -> Self {
        let free = (0..n_buffers)
            .map(|_| vec![0u8; BUFFER_CAPACITY].into_boxed_slice())
            .collect();
        Self {
            shared: Arc::new(PoolShared {
                free: Mutex::new(free),
                exhausted: AtomicU64::new(0),
            }),
        }
    }

    /// Takes a free region, or records the failure and returns `None`.
    pub fn allocate(&self) -> Option<ByteBuffer> {
        let region = self.shared.free.lock().unwrap().pop();
        match region {
            Some(storage) => Some(ByteBuffer::new(storage, Some(self.clone()))),
            None => {
                self.shared.exhausted.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Allocates a buffer pre-filled with `bytes`.
    pub fn allocate_with(&self, bytes: &[u8]) -> Option<ByteBuffer> {
        let mut buf = self.allocate()?;
        match buf.append(bytes) {
            Ok(()) => Some(buf),
            Err(_) => None,
        }
    }

    pub fn free_count(&self) -> usize {
        self.shared.free.lock().unwrap().len()
    }

    /// Number of failed allocations since the pool was created.
    pub fn exhausted_count(&self) -> u64 {
        self.shared.exhausted.load(Ordering::Relaxed)
    }

    fn recycle(&self, storage: Box<[u8]>) {
        self.shared.free.lock().unwrap().push(storage);
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("free", &self.free_count())
            .finish()
    }
}
