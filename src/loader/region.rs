//! Anonymous memory regions the processor may fetch instructions from.
//!
//! Two strategies are available:
//! - [`AllocStrategy::ReadWriteExecute`] maps the region read+write+execute in
//!   one request, so it never passes through a partially-permitted state.
//! - [`AllocStrategy::WriteThenExecute`] maps it read+write and flips it to
//!   read+execute once the loader has copied the payload. Use this where the
//!   environment refuses simultaneous write and execute.
//!
//! Either way the mapping is private, file-less and zero-filled, and it is
//! unmapped when the region is dropped.

use std::io;
use std::ptr::NonNull;

use memmap2::{Mmap, MmapMut};
use tracing::{debug, trace, warn};

use super::error::{Error, Result};

mod platform {
    use std::io;
    use std::ptr::{self, NonNull};

    pub fn page_size() -> usize {
        // SAFETY: sysconf has no memory-safety preconditions.
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        usize::try_from(size).ok().filter(|s| *s > 0).unwrap_or(4096)
    }

    /// Map `size` bytes readable, writable and executable at once.
    pub fn map_rwx(size: usize) -> io::Result<NonNull<u8>> {
        // SAFETY: anonymous private mapping at a kernel-chosen address; no
        // existing memory is affected.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        NonNull::new(ptr.cast::<u8>()).ok_or_else(|| io::Error::from(io::ErrorKind::AddrNotAvailable))
    }

    /// # Safety
    /// `ptr`/`size` must describe a live mapping returned by [`map_rwx`].
    pub unsafe fn unmap(ptr: NonNull<u8>, size: usize) {
        unsafe {
            libc::munmap(ptr.as_ptr().cast(), size);
        }
    }
}

/// How a region obtains its execute permission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AllocStrategy {
    /// One read+write+execute mapping.
    #[default]
    ReadWriteExecute,
    /// Read+write mapping, sealed to read+execute after loading.
    WriteThenExecute,
}

enum Mapping {
    Rwx { ptr: NonNull<u8>, capacity: usize },
    Staged(MmapMut),
    Sealed(Mmap),
    Released,
}

/// An owned anonymous mapping holding at most one generated payload.
pub struct ExecutableRegion {
    mapping: Mapping,
    len: usize,
    loaded: bool,
}

impl ExecutableRegion {
    /// Map a zero-filled read+write+execute region of at least `size` bytes.
    pub fn acquire(size: usize) -> Result<Self> {
        Self::acquire_with(size, AllocStrategy::ReadWriteExecute)
    }

    pub fn acquire_with(size: usize, strategy: AllocStrategy) -> Result<Self> {
        let capacity = align_to_page(size.max(1)).ok_or_else(|| Error::AllocationDenied {
            requested: size,
            source: io::Error::from(io::ErrorKind::OutOfMemory),
        })?;
        let denied = |source: io::Error| {
            warn!(size, ?strategy, %source, "executable mapping refused");
            Error::AllocationDenied {
                requested: size,
                source,
            }
        };

        let mapping = match strategy {
            AllocStrategy::ReadWriteExecute => {
                let ptr = platform::map_rwx(capacity).map_err(denied)?;
                Mapping::Rwx { ptr, capacity }
            }
            AllocStrategy::WriteThenExecute => Mapping::Staged(MmapMut::map_anon(capacity).map_err(denied)?),
        };

        let region = Self {
            mapping,
            len: size,
            loaded: false,
        };
        debug!(size, capacity, base = region.base_address(), ?strategy, "region acquired");
        Ok(region)
    }

    /// Usable length: the size that was requested.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes actually mapped, rounded up to whole pages.
    pub fn capacity(&self) -> usize {
        match &self.mapping {
            Mapping::Rwx { capacity, .. } => *capacity,
            Mapping::Staged(m) => m.len(),
            Mapping::Sealed(m) => m.len(),
            Mapping::Released => 0,
        }
    }

    pub fn base_address(&self) -> usize {
        self.as_ptr() as usize
    }

    pub fn as_ptr(&self) -> *const u8 {
        match &self.mapping {
            Mapping::Rwx { ptr, .. } => ptr.as_ptr(),
            Mapping::Staged(m) => m.as_ptr(),
            Mapping::Sealed(m) => m.as_ptr(),
            Mapping::Released => std::ptr::null(),
        }
    }

    /// The first [`len`](Self::len) bytes of the region.
    pub fn as_slice(&self) -> &[u8] {
        match &self.mapping {
            // SAFETY: the mapping is readable and at least `len` bytes long.
            Mapping::Rwx { ptr, .. } => unsafe { std::slice::from_raw_parts(ptr.as_ptr(), self.len) },
            Mapping::Staged(m) => &m[..self.len],
            Mapping::Sealed(m) => &m[..self.len],
            Mapping::Released => &[],
        }
    }

    /// Whether the processor may currently execute from the region.
    pub fn is_executable(&self) -> bool {
        matches!(self.mapping, Mapping::Rwx { .. } | Mapping::Sealed(_))
    }

    #[inline]
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Copy `bytes` to the base of the region and leave it executable.
    ///
    /// Callers check the length before calling.
    pub(crate) fn write_once(&mut self, bytes: &[u8]) -> Result<()> {
        debug_assert!(bytes.len() <= self.len);
        if self.loaded {
            return Err(Error::RegionAlreadyLoaded);
        }

        match std::mem::replace(&mut self.mapping, Mapping::Released) {
            Mapping::Rwx { ptr, capacity } => {
                // SAFETY: the mapping is writable, `bytes` fits, and a fresh
                // mapping cannot overlap a caller-owned slice.
                unsafe {
                    std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.as_ptr(), bytes.len());
                }
                self.mapping = Mapping::Rwx { ptr, capacity };
            }
            Mapping::Staged(mut m) => {
                m[..bytes.len()].copy_from_slice(bytes);
                let sealed = m.make_exec().map_err(|source| {
                    warn!(%source, "sealing region read+execute refused");
                    Error::AllocationDenied {
                        requested: self.len,
                        source,
                    }
                })?;
                self.mapping = Mapping::Sealed(sealed);
            }
            Mapping::Sealed(m) => {
                self.mapping = Mapping::Sealed(m);
                return Err(Error::RegionAlreadyLoaded);
            }
            Mapping::Released => return Err(Error::RegionReleased),
        }

        self.loaded = true;
        Ok(())
    }
}

impl Drop for ExecutableRegion {
    fn drop(&mut self) {
        trace!(base = self.base_address(), capacity = self.capacity(), "region released");
        if let Mapping::Rwx { ptr, capacity } = self.mapping {
            // SAFETY: `ptr` came from `map_rwx(capacity)` and is unmapped once.
            unsafe { platform::unmap(ptr, capacity) };
        }
    }
}

impl std::fmt::Debug for ExecutableRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutableRegion")
            .field("base", &format_args!("{:#x}", self.base_address()))
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .field("executable", &self.is_executable())
            .field("loaded", &self.loaded)
            .finish()
    }
}

// The region is the sole owner of its mapping, and writes need `&mut self`.
unsafe impl Send for ExecutableRegion {}
unsafe impl Sync for ExecutableRegion {}

pub fn page_size() -> usize {
    platform::page_size()
}

fn align_to_page(size: usize) -> Option<usize> {
    let page = page_size();
    Some(size.checked_add(page - 1)? & !(page - 1))
}
