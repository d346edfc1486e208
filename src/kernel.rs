use std::{ptr::NonNull, sync::OnceLock};

/// This trait provides an abstraction to handle low level memory operations
/// and syscalls. As the allocator, our top level view of this has nothing
/// to do with the concrete implementations / APIs offered by each kernel.
pub trait PageProvider {
    /// Request a zero-initialized, page-aligned memory region of `len` bytes
    /// (rounded up to whole pages). It returns a pointer to the given
    /// location or `None` if the underlying syscall fails.
    fn acquire(&mut self, len: usize) -> Option<NonNull<u8>>;

    /// Returns the memory of size `len` starting from `addr` back to the kernel.
    ///
    /// # Safety
    ///
    /// `addr` must have been returned by [`PageProvider::acquire`] on this
    /// provider with the same `len`, and must not be used afterwards.
    unsafe fn release(&mut self, addr: NonNull<u8>, len: usize);

    /// Returns the virtual memory page size of the computer in bytes.
    fn page_size(&self) -> usize;
}

/// The operating system as a [`PageProvider`].
#[derive(Clone, Copy, Debug, Default)]
pub struct Kernel;

/// Virtual memory page size of the computer. This is usually 4096.
/// We don't know the value at compile time, so it is asked once and cached.
static PAGE_SIZE: OnceLock<usize> = OnceLock::new();

impl Kernel {
    pub const fn new() -> Self {
        Self
    }
}

impl PageProvider for Kernel {
    fn acquire(&mut self, len: usize) -> Option<NonNull<u8>> {
        let addr = unsafe { platform::request_memory(len) };

        match addr {
            Some(addr) => log::debug!("mapped {len} bytes at {addr:p}"),
            None => log::warn!("kernel refused to map {len} bytes"),
        }

        addr
    }

    unsafe fn release(&mut self, addr: NonNull<u8>, len: usize) {
        log::debug!("unmapping {len} bytes at {addr:p}");
        unsafe { platform::return_memory(addr, len) }
    }

    fn page_size(&self) -> usize {
        *PAGE_SIZE.get_or_init(|| unsafe { platform::page_size() })
    }
}

#[cfg(unix)]
mod platform {
    use libc::{mmap, munmap, off_t, size_t};

    use std::{
        os::raw::{c_int, c_void},
        ptr::NonNull,
    };

    pub(super) unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
        // mmap parameters.
        const ADDR: *mut c_void = std::ptr::null_mut::<c_void>();
        // Read-Write only memory.
        const PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;
        const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
        const FD: c_int = -1;
        const OFFSET: off_t = 0;

        unsafe {
            let addr = mmap(ADDR, len as size_t, PROT, FLAGS, FD, OFFSET);

            if addr == libc::MAP_FAILED {
                None
            } else {
                NonNull::new(addr.cast::<u8>())
            }
        }
    }

    pub(super) unsafe fn return_memory(addr: NonNull<u8>, len: usize) {
        unsafe {
            munmap(addr.as_ptr().cast::<c_void>(), len as size_t);
        }
    }

    pub(super) unsafe fn page_size() -> usize {
        unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) as usize }
    }
}

#[cfg(windows)]
mod platform {
    use std::{mem::MaybeUninit, os::raw::c_void, ptr::NonNull};

    use windows::Win32::System::{Memory, SystemInformation};

    pub(super) unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
        // Read-Write only.
        let protection = Memory::PAGE_READWRITE;

        let flags = Memory::MEM_RESERVE | Memory::MEM_COMMIT;

        unsafe {
            let addr = Memory::VirtualAlloc(None, len, flags, protection);

            NonNull::new(addr.cast())
        }
    }

    pub(super) unsafe fn return_memory(addr: NonNull<u8>, _len: usize) {
        unsafe {
            let _ = Memory::VirtualFree(addr.as_ptr().cast::<c_void>(), 0, Memory::MEM_RELEASE);
        }
    }

    pub(super) unsafe fn page_size() -> usize {
        unsafe {
            let mut system_info = MaybeUninit::uninit();
            SystemInformation::GetSystemInfo(system_info.as_mut_ptr());

            system_info.assume_init().dwPageSize as usize
        }
    }
}
