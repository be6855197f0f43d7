use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::error::{Error, Result};
use crate::mbuf::Mbuf;
use crate::mmap_area::{MmapArea, MmapAreaOptions};
use crate::util::lock;

/// Bytes reserved at the start of every element for the buffer header.
pub const MBUF_HEADER_LEN: usize = 128;

/// Bytes left free in front of the packet data so headers can be prepended.
pub const MBUF_HEADROOM: usize = 128;

/// Upper bound of the per-core cache size.
pub const MEMPOOL_CACHE_MAX: usize = 512;

/// Access flags of a pool.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolFlags {
    /// Buffers are returned by a single thread.
    pub sp_put: bool,
    /// Buffers are allocated by a single thread.
    pub sc_get: bool,
}

impl PoolFlags {
    pub const SPSC: PoolFlags = PoolFlags {
        sp_put: true,
        sc_get: true,
    };
}

/// Parameters used to create a Mempool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolOptions {
    pub name: String,
    /// Number of buffers in the pool
    pub capacity: usize,
    /// Usable packet bytes per buffer, headroom excluded
    pub data_room: usize,
    pub cache_size: usize,
    pub flags: PoolFlags,
    pub huge_tlb: bool,
}

impl PoolOptions {
    /// Size of one pool element: header, headroom and data room.
    pub fn elt_size(&self) -> usize {
        MBUF_HEADER_LEN + MBUF_HEADROOM + self.data_room
    }
}

pub(crate) struct PoolInner {
    pub(crate) options: PoolOptions,
    pub(crate) area: MmapArea,
    free: Mutex<Vec<u32>>,
}

impl PoolInner {
    pub(crate) fn put(&self, index: u32) {
        let mut free = lock(&self.free);
        debug_assert!(free.len() < self.options.capacity);
        free.push(index);
    }
}

/// A fixed-capacity pool of packet buffers carved out of one mapped area. Cloning the handle
/// shares the pool. The free list is guarded by a mutex so the pool can be used from several
/// threads even though its flags advertise single producer/single consumer access.
#[derive(Clone)]
pub struct Mempool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for Mempool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mempool")
            .field("name", &self.inner.options.name)
            .field("capacity", &self.inner.options.capacity)
            .field("available", &self.available())
            .finish()
    }
}

impl Mempool {
    pub fn new(options: PoolOptions) -> Result<Mempool> {
        if options.capacity == 0 || options.capacity > u32::MAX as usize {
            return Err(Error::Config(format!(
                "pool {}: invalid capacity {}",
                options.name, options.capacity
            )));
        }
        if options.data_room == 0 || MBUF_HEADROOM + options.data_room > u16::MAX as usize {
            return Err(Error::Config(format!(
                "pool {}: invalid data room {}",
                options.name, options.data_room
            )));
        }
        if options.cache_size > MEMPOOL_CACHE_MAX || options.cache_size > options.capacity {
            return Err(Error::Config(format!(
                "pool {}: invalid cache size {}",
                options.name, options.cache_size
            )));
        }

        let area = MmapArea::new(
            options.capacity,
            options.elt_size(),
            MmapAreaOptions {
                huge_tlb: options.huge_tlb,
            },
        )?;

        // Hand out low indices first
        let free: Vec<u32> = (0..options.capacity as u32).rev().collect();

        debug!(
            pool = %options.name,
            capacity = options.capacity,
            elt_size = options.elt_size(),
            "created memory pool"
        );

        Ok(Mempool {
            inner: Arc::new(PoolInner {
                options,
                area,
                free: Mutex::new(free),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.options.name
    }

    pub fn options(&self) -> &PoolOptions {
        &self.inner.options
    }

    pub fn capacity(&self) -> usize {
        self.inner.options.capacity
    }

    /// Number of buffers currently in the pool.
    pub fn available(&self) -> usize {
        lock(&self.inner.free).len()
    }

    /// Number of buffers handed out and not yet returned.
    pub fn in_use(&self) -> usize {
        self.capacity() - self.available()
    }

    /// True if both handles refer to the same pool.
    pub fn same_pool(&self, other: &Mempool) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Take one buffer from the pool. The buffer goes back to the pool when it is dropped.
    #[inline]
    pub fn alloc(&self) -> Option<Mbuf> {
        let index = lock(&self.inner.free).pop()?;
        Some(Mbuf::new(self.inner.clone(), index))
    }

    /// Move up to `num` buffers into `bufs`. Returns the number moved.
    pub fn alloc_bulk(&self, bufs: &mut Vec<Mbuf>, num: usize) -> usize {
        let mut free = lock(&self.inner.free);
        let ready = std::cmp::min(num, free.len());

        for _ in 0..ready {
            match free.pop() {
                Some(index) => bufs.push(Mbuf::new(self.inner.clone(), index)),
                None => break,
            }
        }

        ready
    }

    /// Return a buffer to its pool. Same as dropping it.
    #[inline]
    pub fn free(mbuf: Mbuf) {
        drop(mbuf);
    }
}
