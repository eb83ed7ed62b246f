pub mod arch;
pub mod callable;
pub mod code_buffer;
pub mod error;
pub mod executable;
pub mod region;
pub mod reloc;

pub use callable::{CallableHandle, Nullary, Shape, Signature, bind};
pub use code_buffer::{CodeBuffer, InstructionBuffer};
pub use error::{Error, Result};
pub use executable::{Executable, LoadedCode};
pub use region::{AllocStrategy, ExecutableRegion};
pub use reloc::{PlaceholderWidth, RelocationSite, resolve};

use tracing::debug;

/// Copy `buffer` verbatim to the base of `region`.
///
/// Either every byte is copied or none is: all checks run before the first
/// write. The region holds this payload for the rest of its life.
pub fn load<'r>(buffer: &InstructionBuffer, region: &'r mut ExecutableRegion) -> Result<LoadedCode<'r>> {
    if let Some(site) = buffer.unresolved().first() {
        return Err(Error::UnresolvedRelocation {
            offset: site.placeholder(),
        });
    }
    if region.len() < buffer.len() {
        return Err(Error::RegionTooSmall {
            required: buffer.len(),
            available: region.len(),
        });
    }
    if region.is_loaded() {
        return Err(Error::RegionAlreadyLoaded);
    }

    region.write_once(buffer.as_bytes())?;
    debug!(
        bytes = buffer.len(),
        base = region.base_address(),
        "payload loaded"
    );
    Ok(LoadedCode::new(region, buffer.len()))
}

/// Drives the acquire and load steps with a fixed allocation strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct Loader {
    strategy: AllocStrategy,
}

impl Loader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_strategy(strategy: AllocStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> AllocStrategy {
        self.strategy
    }

    pub fn acquire(&self, size: usize) -> Result<ExecutableRegion> {
        ExecutableRegion::acquire_with(size, self.strategy)
    }

    pub fn load<'r>(&self, buffer: &InstructionBuffer, region: &'r mut ExecutableRegion) -> Result<LoadedCode<'r>> {
        load(buffer, region)
    }

    /// # Safety
    /// See [`Executable::new`].
    pub unsafe fn load_executable(&self, buffer: &InstructionBuffer) -> Result<Executable> {
        unsafe { Executable::new(buffer, self.strategy) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> InstructionBuffer {
        let mut buf = CodeBuffer::new();
        buf.append(&[0xB8, 0x2A, 0x00, 0x00, 0x00, 0xC3]);
        buf.append_data(b"payload");
        buf.finish()
    }

    #[test]
    fn load_copies_bytes_verbatim() {
        for strategy in [AllocStrategy::ReadWriteExecute, AllocStrategy::WriteThenExecute] {
            let buf = sample();
            let loader = Loader::with_strategy(strategy);
            let mut region = loader.acquire(128).expect("acquire");
            let code = loader.load(&buf, &mut region).expect("load");

            assert_eq!(code.len(), buf.len());
            assert_eq!(code.as_bytes(), buf.as_bytes());
            assert_eq!(&region.as_slice()[..buf.len()], buf.as_bytes());
            assert!(region.as_slice()[buf.len()..].iter().all(|b| *b == 0));
        }
    }

    #[test]
    fn exact_fit_region_is_accepted() {
        let buf = sample();
        let mut region = ExecutableRegion::acquire(buf.len()).expect("acquire");
        assert!(load(&buf, &mut region).is_ok());
    }

    #[test]
    fn short_region_is_left_untouched() {
        let buf = sample();
        let mut region = ExecutableRegion::acquire(buf.len() - 1).expect("acquire");

        let err = load(&buf, &mut region).unwrap_err();
        assert!(matches!(
            err,
            Error::RegionTooSmall { required, available } if required == buf.len() && available == buf.len() - 1
        ));
        assert!(region.as_slice().iter().all(|b| *b == 0));
        assert!(!region.is_loaded());
    }

    #[test]
    fn short_staged_region_stays_writable_and_empty() {
        let buf = sample();
        let mut region = ExecutableRegion::acquire_with(4, AllocStrategy::WriteThenExecute).expect("acquire");

        assert!(matches!(load(&buf, &mut region), Err(Error::RegionTooSmall { .. })));
        assert!(!region.is_executable());
        assert!(region.as_slice().iter().all(|b| *b == 0));
    }

    #[test]
    fn unresolved_relocation_blocks_loading() {
        let mut code = CodeBuffer::new();
        let site = code.append_with_placeholder(&[0x48, 0x8D, 0x35], PlaceholderWidth::Rel32);
        code.append(&[0xC3]);
        let data = code.append_data(b"z");
        let mut buf = code.finish();
        let mut region = ExecutableRegion::acquire(64).expect("acquire");

        assert!(matches!(
            load(&buf, &mut region),
            Err(Error::UnresolvedRelocation { offset: 3 })
        ));
        assert!(region.as_slice().iter().all(|b| *b == 0));

        resolve(&mut buf, site, data).expect("resolve");
        assert!(load(&buf, &mut region).is_ok());
    }

    #[test]
    fn region_is_never_reused() {
        let buf = sample();
        let mut region = ExecutableRegion::acquire(128).expect("acquire");
        load(&buf, &mut region).expect("first load");

        let other = CodeBuffer::from_bytes(&[0xC3]).finish();
        assert!(matches!(load(&other, &mut region), Err(Error::RegionAlreadyLoaded)));
        assert_eq!(&region.as_slice()[..buf.len()], buf.as_bytes());
    }
}
