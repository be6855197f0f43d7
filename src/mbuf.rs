use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::mempool::{PoolInner, MBUF_HEADER_LEN, MBUF_HEADROOM};

/// A packet buffer owned by exactly one holder at a time: the caller, a driver ring or its pool.
/// Dropping it returns the buffer to the pool it came from.
pub struct Mbuf {
    pool: Arc<PoolInner>,
    index: u32,
    data_off: u16,
    data_len: u16,
}

impl Mbuf {
    pub(crate) fn new(pool: Arc<PoolInner>, index: u32) -> Mbuf {
        Mbuf {
            pool,
            index,
            data_off: MBUF_HEADROOM as u16,
            data_len: 0,
        }
    }

    fn buf_len(&self) -> usize {
        MBUF_HEADROOM + self.pool.options.data_room
    }

    fn buf(&self) -> &[u8] {
        unsafe {
            let ptr = self.pool.area.elt_ptr(self.index as usize).add(MBUF_HEADER_LEN);
            std::slice::from_raw_parts(ptr, self.buf_len())
        }
    }

    fn buf_mut(&mut self) -> &mut [u8] {
        unsafe {
            let ptr = self.pool.area.elt_ptr(self.index as usize).add(MBUF_HEADER_LEN);
            std::slice::from_raw_parts_mut(ptr, self.buf_len())
        }
    }

    /// Packet bytes.
    pub fn data(&self) -> &[u8] {
        let start = self.data_off as usize;
        &self.buf()[start..start + self.data_len as usize]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        let start = self.data_off as usize;
        let end = start + self.data_len as usize;
        &mut self.buf_mut()[start..end]
    }

    pub fn len(&self) -> usize {
        self.data_len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.data_len == 0
    }

    /// Bytes the packet can hold starting at the current data offset.
    pub fn capacity(&self) -> usize {
        self.buf_len() - self.data_off as usize
    }

    pub fn tailroom(&self) -> usize {
        self.capacity() - self.data_len as usize
    }

    /// Copy `bytes` after the current packet data. Fails without touching the buffer if they do
    /// not fit.
    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.tailroom() {
            return Err(Error::PayloadTooLarge {
                len: self.len() + bytes.len(),
                capacity: self.capacity(),
            });
        }

        let start = self.data_off as usize + self.data_len as usize;
        self.buf_mut()[start..start + bytes.len()].copy_from_slice(bytes);
        self.data_len += bytes.len() as u16;

        Ok(())
    }

    /// Drop the packet data and restore the default headroom.
    pub fn reset(&mut self) {
        self.data_off = MBUF_HEADROOM as u16;
        self.data_len = 0;
    }

    /// Name of the pool this buffer belongs to.
    pub fn pool_name(&self) -> &str {
        &self.pool.options.name
    }

    /// Index of the buffer inside its pool.
    pub fn index(&self) -> u32 {
        self.index
    }
}

impl fmt::Debug for Mbuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mbuf")
            .field("pool", &self.pool.options.name)
            .field("index", &self.index)
            .field("data_off", &self.data_off)
            .field("data_len", &self.data_len)
            .finish()
    }
}

impl Drop for Mbuf {
    fn drop(&mut self) {
        self.pool.put(self.index);
    }
}
