use std::ptr::NonNull;

use errno::errno;
use libc::{
    c_int, c_void, mmap, munmap, MAP_ANONYMOUS, MAP_FAILED, MAP_HUGETLB, MAP_PRIVATE, PROT_READ,
    PROT_WRITE,
};
use tracing::warn;

use crate::error::{Error, Result};

/// A mapped memory area holding the elements of one buffer pool.
#[derive(Debug)]
pub struct MmapArea {
    elt_num: usize,
    elt_size: usize,
    ptr: NonNull<u8>,
}

// The area is only touched through element pointers and each element is owned by exactly one
// Mbuf at a time.
unsafe impl Send for MmapArea {}
unsafe impl Sync for MmapArea {}

/// Configuration options for MmapArea
#[derive(Debug, Default, Clone, Copy)]
pub struct MmapAreaOptions {
    /// If set to true, the mmap call is passed MAP_HUGETLB
    pub huge_tlb: bool,
}

impl MmapArea {
    /// Map a new anonymous area large enough for `elt_num` elements of `elt_size` bytes.
    ///
    /// # Arguments
    ///
    /// * elt_num: The number of elements in the area
    /// * elt_size: The length of each element
    /// * options: Configuration options
    pub fn new(elt_num: usize, elt_size: usize, options: MmapAreaOptions) -> Result<MmapArea> {
        let size = elt_num
            .checked_mul(elt_size)
            .filter(|size| *size > 0)
            .ok_or_else(|| {
                Error::Config(format!(
                    "invalid packet memory size: {} elements of {} bytes",
                    elt_num, elt_size
                ))
            })?;

        let mut flags: c_int = MAP_PRIVATE | MAP_ANONYMOUS;
        if options.huge_tlb {
            flags |= MAP_HUGETLB;
        }

        let ptr = unsafe {
            mmap(
                std::ptr::null_mut(),
                size,
                PROT_READ | PROT_WRITE,
                flags,
                -1,
                0,
            )
        };

        if ptr == MAP_FAILED {
            return Err(Error::Mmap {
                size,
                errno: errno().0,
            });
        }

        let ptr = NonNull::new(ptr as *mut u8).ok_or(Error::Mmap { size, errno: 0 })?;

        Ok(MmapArea {
            elt_num,
            elt_size,
            ptr,
        })
    }

    pub fn elt_num(&self) -> usize {
        self.elt_num
    }

    pub fn elt_size(&self) -> usize {
        self.elt_size
    }

    pub fn len(&self) -> usize {
        self.elt_num * self.elt_size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pointer to the first byte of element `idx`.
    #[inline]
    pub(crate) fn elt_ptr(&self, idx: usize) -> *mut u8 {
        assert!(idx < self.elt_num, "element {} out of range", idx);
        unsafe { self.ptr.as_ptr().add(idx * self.elt_size) }
    }
}

impl Drop for MmapArea {
    fn drop(&mut self) {
        let r = unsafe { munmap(self.ptr.as_ptr() as *mut c_void, self.len()) };

        if r != 0 {
            warn!(errno = errno().0, "munmap failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::convert::TryInto;

    use super::{MmapArea, MmapAreaOptions};

    #[test]
    fn sizes() {
        let area = MmapArea::new(10, 8, MmapAreaOptions::default()).unwrap();

        assert_eq!(area.elt_num(), 10);
        assert_eq!(area.elt_size(), 8);
        assert_eq!(area.len(), 80);
        assert!(!area.is_empty());
    }

    #[test]
    fn zero_size_rejected() {
        assert!(MmapArea::new(0, 8, MmapAreaOptions::default()).is_err());
        assert!(MmapArea::new(8, 0, MmapAreaOptions::default()).is_err());
        assert!(MmapArea::new(usize::MAX, 2, MmapAreaOptions::default()).is_err());
    }

    #[test]
    fn element_values() {
        const ELT_NUM: usize = 88;
        let area = MmapArea::new(ELT_NUM, 8, MmapAreaOptions::default()).unwrap();

        //
        // Write a value to each element and then ensure we read the same values out
        //
        let base: u64 = 3983989832773837873;

        for i in 0..ELT_NUM {
            let bytes = (i as u64 + base).to_ne_bytes();
            let elt = unsafe { std::slice::from_raw_parts_mut(area.elt_ptr(i), 8) };
            elt.copy_from_slice(&bytes);
        }

        for i in 0..ELT_NUM {
            let elt = unsafe { std::slice::from_raw_parts(area.elt_ptr(i), 8) };
            let val = u64::from_ne_bytes(elt.try_into().unwrap());

            assert_eq!(val, i as u64 + base);
        }
    }

    #[test]
    #[should_panic]
    fn element_out_of_range() {
        let area = MmapArea::new(4, 8, MmapAreaOptions::default()).unwrap();
        area.elt_ptr(4);
    }
}
