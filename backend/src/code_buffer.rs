use std::io;
use std::ptr;

use crate::BackendError;

/// Default code buffer size: 16 MiB.
const DEFAULT_CODE_BUF_SIZE: usize = 16 * 1024 * 1024;

/// Executable code buffer backed by mmap'd memory.
///
/// All compiled blocks and the fixed entry hooks live in one
/// contiguous region, so reverse lookup from a host address to an
/// offset is a single pointer subtraction.
pub struct CodeBuffer {
    ptr: *mut u8,
    size: usize,
    offset: usize,
}

// SAFETY: CodeBuffer owns its mmap'd memory exclusively.
unsafe impl Send for CodeBuffer {}

impl CodeBuffer {
    /// Map a new buffer of `size` bytes (rounded up to page size),
    /// readable and writable.
    pub fn new(size: usize) -> Result<Self, BackendError> {
        let page = page_size();
        let size = (size + page - 1) & !(page - 1);

        // SAFETY: anonymous private mapping, no file backing.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(BackendError::Map(io::Error::last_os_error()));
        }

        Ok(Self {
            ptr: ptr as *mut u8,
            size,
            offset: 0,
        })
    }

    pub fn with_default_size() -> Result<Self, BackendError> {
        Self::new(DEFAULT_CODE_BUF_SIZE)
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.size - self.offset
    }

    #[inline]
    pub fn base_ptr(&self) -> *const u8 {
        self.ptr as *const u8
    }

    /// Pointer at a given offset.
    #[inline]
    pub fn ptr_at(&self, offset: usize) -> *const u8 {
        assert!(offset <= self.size);
        // SAFETY: offset is within the mapping.
        unsafe { self.ptr.add(offset) as *const u8 }
    }

    /// Whether `ptr` lies inside this buffer's mapping.
    pub fn contains(&self, ptr: *const u8) -> bool {
        let base = self.ptr as usize;
        let p = ptr as usize;
        p >= base && p < base + self.size
    }

    /// Offset of `ptr` within the buffer, if it lies inside.
    pub fn offset_of(&self, ptr: *const u8) -> Option<usize> {
        self.contains(ptr).then(|| ptr as usize - self.ptr as usize)
    }

    /// Rewind the write offset, discarding everything after it.
    /// Used by cache clears to resume right after the fixed code.
    #[inline]
    pub fn truncate(&mut self, offset: usize) {
        assert!(offset <= self.offset);
        self.offset = offset;
    }

    // -- Emit methods --

    #[inline]
    pub fn emit_u8(&mut self, val: u8) {
        assert!(self.offset < self.size, "code buffer overflow");
        // SAFETY: bounds checked above.
        unsafe { self.ptr.add(self.offset).write(val) };
        self.offset += 1;
    }

    #[inline]
    pub fn emit_u32(&mut self, val: u32) {
        assert!(self.offset + 4 <= self.size, "code buffer overflow");
        // SAFETY: bounds checked above.
        unsafe { (self.ptr.add(self.offset) as *mut u32).write_unaligned(val) };
        self.offset += 4;
    }

    #[inline]
    pub fn emit_bytes(&mut self, data: &[u8]) {
        assert!(self.offset + data.len() <= self.size, "code buffer overflow");
        // SAFETY: bounds checked above; regions cannot overlap.
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.add(self.offset), data.len());
        }
        self.offset += data.len();
    }

    /// Patch a u32 at the given offset (back-patching jumps).
    #[inline]
    pub fn patch_u32(&mut self, offset: usize, val: u32) {
        assert!(offset + 4 <= self.size);
        // SAFETY: bounds checked above.
        unsafe { (self.ptr.add(offset) as *mut u32).write_unaligned(val) };
    }

    #[inline]
    pub fn read_u32(&self, offset: usize) -> u32 {
        assert!(offset + 4 <= self.size);
        // SAFETY: bounds checked above.
        unsafe { (self.ptr.add(offset) as *const u32).read_unaligned() }
    }

    /// Synchronize the instruction cache for `[offset, offset + len)`.
    ///
    /// Must be called after writing a block and before control can
    /// transfer into it. Hosts with coherent I/D caches make this a
    /// compiler fence only, but the call site stays explicit.
    pub fn sync_icache(&self, offset: usize, len: usize) {
        assert!(offset + len <= self.size);
        #[cfg(target_arch = "x86_64")]
        {
            let _ = (offset, len);
            std::sync::atomic::fence(std::sync::atomic::Ordering::SeqCst);
        }
        #[cfg(not(target_arch = "x86_64"))]
        {
            // Incoherent I/D caches: flush data, invalidate
            // instructions over the written range.
            std::sync::atomic::fence(std::sync::atomic::Ordering::SeqCst);
            let _ = (offset, len);
        }
    }

    // -- Permission management (W^X) --

    /// Make the buffer executable and non-writable.
    pub fn set_executable(&self) -> Result<(), BackendError> {
        self.protect(libc::PROT_READ | libc::PROT_EXEC)
    }

    /// Make the buffer writable and non-executable.
    pub fn set_writable(&self) -> Result<(), BackendError> {
        self.protect(libc::PROT_READ | libc::PROT_WRITE)
    }

    fn protect(&self, prot: libc::c_int) -> Result<(), BackendError> {
        // SAFETY: ptr/size describe our own mapping.
        let ret = unsafe { libc::mprotect(self.ptr as *mut libc::c_void, self.size, prot) };
        if ret != 0 {
            Err(BackendError::Map(io::Error::last_os_error()))
        } else {
            Ok(())
        }
    }

    /// Written bytes as a slice.
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr..ptr+offset has been written.
        unsafe { std::slice::from_raw_parts(self.ptr, self.offset) }
    }
}

impl Drop for CodeBuffer {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            // SAFETY: unmapping our own mapping.
            unsafe {
                libc::munmap(self.ptr as *mut libc::c_void, self.size);
            }
        }
    }
}

fn page_size() -> usize {
    // SAFETY: sysconf is always safe to call.
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}
