use super::callable::{self, CallableHandle, Nullary};
use super::code_buffer::InstructionBuffer;
use super::error::Result;
use super::region::{AllocStrategy, ExecutableRegion};

/// Proof that a region holds a fully copied payload.
///
/// Only [`load`](super::load) and [`Executable`] produce one, so a callable
/// can never be bound to a region that has not been loaded.
#[derive(Debug, Clone, Copy)]
pub struct LoadedCode<'r> {
    region: &'r ExecutableRegion,
    len: usize,
}

impl<'r> LoadedCode<'r> {
    pub(crate) fn new(region: &'r ExecutableRegion, len: usize) -> Self {
        Self { region, len }
    }

    pub fn region(&self) -> &'r ExecutableRegion {
        self.region
    }

    /// Length of the loaded payload in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn entry(&self) -> *const u8 {
        self.region.as_ptr()
    }

    pub fn as_bytes(&self) -> &'r [u8] {
        &self.region.as_slice()[..self.len]
    }
}

/// A region owned together with the zero-argument routine loaded into it.
#[derive(Debug)]
pub struct Executable {
    code: ExecutableRegion,
    len: usize,
}

impl Executable {
    /// Acquire a region sized for `buffer`, load it, and keep both together.
    ///
    /// # Safety
    /// `buffer` must be valid machine code for the host that, entered with
    /// the C calling convention and no arguments, returns normally.
    pub unsafe fn new(buffer: &InstructionBuffer, strategy: AllocStrategy) -> Result<Self> {
        let mut code = ExecutableRegion::acquire_with(buffer.len(), strategy)?;
        let len = super::load(buffer, &mut code)?.len();
        Ok(Self { code, len })
    }

    pub fn code(&self) -> LoadedCode<'_> {
        LoadedCode::new(&self.code, self.len)
    }

    pub fn handle(&self) -> Result<CallableHandle<'_, Nullary>> {
        // SAFETY: upheld by the contract of `Executable::new`.
        unsafe { callable::bind::<Nullary>(&self.code()) }
    }

    /// Invoke the routine once.
    pub fn run(&self) -> Result<()> {
        self.handle()?.invoke();
        Ok(())
    }
}
