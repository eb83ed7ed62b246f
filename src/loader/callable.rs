//! Turning loaded bytes into something the host can call.
//!
//! [`bind`] is the one place where a data address becomes a function
//! pointer. Everything after it, including [`CallableHandle::invoke`], is
//! safe because the contract was discharged at bind time.
//!
//! Only [`Nullary`] (no arguments, no return value) is provided. Any richer
//! calling convention is the caller's business: the generated code must set
//! up its own conforming frame before its payload logic runs, and the caller
//! implements [`Signature`] for it.

use std::fmt;
use std::marker::PhantomData;

use tracing::debug;

use super::error::{Error, Result};
use super::executable::LoadedCode;
use super::region::ExecutableRegion;

/// Argument/return shape of a signature, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shape {
    pub args: usize,
    pub returns: bool,
}

/// A native calling signature a loaded routine can be bound under.
///
/// # Safety
/// `Fn` must be a function pointer type, and `from_entry` must produce a
/// pointer that calls `entry` under the convention `Fn` names.
pub unsafe trait Signature {
    type Fn: Copy;

    const SHAPE: Shape;

    /// # Safety
    /// `entry` must be executable code that honours `Self::Fn`.
    unsafe fn from_entry(entry: *const u8) -> Self::Fn;
}

/// `extern "C" fn()`: no arguments, no return value, no frame required.
#[derive(Debug)]
pub enum Nullary {}

unsafe impl Signature for Nullary {
    type Fn = unsafe extern "C" fn();

    const SHAPE: Shape = Shape {
        args: 0,
        returns: false,
    };

    unsafe fn from_entry(entry: *const u8) -> Self::Fn {
        unsafe { std::mem::transmute::<*const u8, Self::Fn>(entry) }
    }
}

/// A callable view of a loaded region.
///
/// Borrows the region, so the region outlives every call made through it.
pub struct CallableHandle<'r, S: Signature> {
    entry: S::Fn,
    base: usize,
    len: usize,
    _region: PhantomData<&'r ExecutableRegion>,
}

/// Bind the region's base address as a function of signature `S`.
///
/// # Safety
/// The loaded bytes must be valid code for the host processor that behaves
/// as `S` describes: it takes exactly the declared arguments, preserves
/// callee-saved state, and returns to the caller.
pub unsafe fn bind<'r, S: Signature>(code: &LoadedCode<'r>) -> Result<CallableHandle<'r, S>> {
    if code.is_empty() {
        return Err(Error::EmptyCode);
    }
    debug_assert!(code.region().is_executable());

    // SAFETY: upheld by the caller.
    let entry = unsafe { S::from_entry(code.entry()) };
    debug!(
        base = code.entry() as usize,
        len = code.len(),
        args = S::SHAPE.args,
        returns = S::SHAPE.returns,
        "callable bound"
    );
    Ok(CallableHandle {
        entry,
        base: code.entry() as usize,
        len: code.len(),
        _region: PhantomData,
    })
}

impl<S: Signature> CallableHandle<'_, S> {
    /// The raw function pointer, for signatures other than [`Nullary`].
    #[inline]
    pub fn as_fn(&self) -> S::Fn {
        self.entry
    }

    #[inline]
    pub fn base_address(&self) -> usize {
        self.base
    }

    #[inline]
    pub fn code_len(&self) -> usize {
        self.len
    }

    pub fn shape(&self) -> Shape {
        S::SHAPE
    }
}

impl CallableHandle<'_, Nullary> {
    /// Transfer control to the region and return once it executes `ret`.
    #[inline]
    pub fn invoke(&self) {
        // SAFETY: established by `bind`.
        unsafe { (self.entry)() }
    }
}

impl<S: Signature> Clone for CallableHandle<'_, S> {
    fn clone(&self) -> Self {
        Self {
            entry: self.entry,
            base: self.base,
            len: self.len,
            _region: PhantomData,
        }
    }
}

impl<S: Signature> fmt::Debug for CallableHandle<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallableHandle")
            .field("base", &format_args!("{:#x}", self.base))
            .field("len", &self.len)
            .field("shape", &S::SHAPE)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::code_buffer::CodeBuffer;
    use crate::loader::load;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn empty_code_cannot_be_bound() {
        let buf = CodeBuffer::new().finish();
        let mut region = ExecutableRegion::acquire(16).expect("acquire");
        let code = load(&buf, &mut region).expect("load");

        let err = unsafe { bind::<Nullary>(&code) }.unwrap_err();
        assert!(matches!(err, Error::EmptyCode));
    }

    #[test]
    fn handle_reports_region_and_shape() {
        let buf = CodeBuffer::from_bytes(&[0xC3]).finish();
        let mut region = ExecutableRegion::acquire(16).expect("acquire");
        let base = region.base_address();
        let code = load(&buf, &mut region).expect("load");

        let handle = unsafe { bind::<Nullary>(&code) }.expect("bind");
        assert_eq!(handle.base_address(), base);
        assert_eq!(handle.code_len(), 1);
        assert_eq!(
            handle.shape(),
            Shape {
                args: 0,
                returns: false
            }
        );
    }

    mod execute {
        use super::*;
        use crate::loader::AllocStrategy;
        use crate::loader::arch::x64;

        /// `extern "C" fn(u64) -> u64`; the routine brings its own frame.
        enum UnaryU64 {}

        unsafe impl Signature for UnaryU64 {
            type Fn = unsafe extern "C" fn(u64) -> u64;

            const SHAPE: Shape = Shape {
                args: 1,
                returns: true,
            };

            unsafe fn from_entry(entry: *const u8) -> Self::Fn {
                unsafe { std::mem::transmute::<*const u8, Self::Fn>(entry) }
            }
        }

        fn counter_bump(counter: &AtomicU64) -> CodeBuffer {
            let mut buf = CodeBuffer::new();
            buf.append(&[0x48, 0xB8]); // movabs rax, imm64
            buf.emit_u64(counter as *const AtomicU64 as u64);
            buf.append(&[0xF0, 0x48, 0xFF, 0x00]); // lock inc qword [rax]
            buf.emit_u8(0xC3); // ret
            buf
        }

        #[test]
        fn nullary_invoke_runs_generated_code() {
            static COUNTER: AtomicU64 = AtomicU64::new(0);
            let buf = counter_bump(&COUNTER).finish();
            let mut region = ExecutableRegion::acquire(128).expect("acquire");
            let code = load(&buf, &mut region).expect("load");
            let handle = unsafe { bind::<Nullary>(&code) }.expect("bind");

            handle.invoke();
            handle.invoke();
            assert_eq!(COUNTER.load(Ordering::SeqCst), 2);
        }

        #[test]
        fn staged_region_executes_after_sealing() {
            static COUNTER: AtomicU64 = AtomicU64::new(0);
            let buf = counter_bump(&COUNTER).finish();
            let mut region =
                ExecutableRegion::acquire_with(buf.len(), AllocStrategy::WriteThenExecute).expect("acquire");
            let code = load(&buf, &mut region).expect("load");

            unsafe { bind::<Nullary>(&code) }.expect("bind").invoke();
            assert_eq!(COUNTER.load(Ordering::SeqCst), 1);
        }

        #[test]
        fn caller_defined_signature_with_prologue() {
            let mut buf = CodeBuffer::new();
            x64::prologue(&mut buf);
            buf.append(&[0x48, 0x8D, 0x47, 0x01]); // lea rax, [rdi + 1]
            x64::epilogue(&mut buf);
            let buf = buf.finish();
            assert_eq!(buf.as_bytes()[..4], [0x55, 0x48, 0x89, 0xE5]);

            let mut region = ExecutableRegion::acquire(buf.len()).expect("acquire");
            let code = load(&buf, &mut region).expect("load");
            let handle = unsafe { bind::<UnaryU64>(&code) }.expect("bind");

            let f = handle.as_fn();
            assert_eq!(unsafe { f(41) }, 42);
            assert_eq!(handle.shape().args, 1);
        }

        #[test]
        fn independent_pipelines_run_on_separate_threads() {
            static COUNTER: AtomicU64 = AtomicU64::new(0);

            let workers: Vec<_> = (0..4)
                .map(|_| {
                    std::thread::spawn(|| {
                        let buf = counter_bump(&COUNTER).finish();
                        let mut region = ExecutableRegion::acquire(buf.len()).expect("acquire");
                        let code = load(&buf, &mut region).expect("load");
                        let handle = unsafe { bind::<Nullary>(&code) }.expect("bind");
                        for _ in 0..10 {
                            handle.invoke();
                        }
                    })
                })
                .collect();
            for worker in workers {
                worker.join().expect("worker panicked");
            }

            assert_eq!(COUNTER.load(Ordering::SeqCst), 40);
        }

        #[test]
        fn executable_runs_repeatedly() {
            static COUNTER: AtomicU64 = AtomicU64::new(0);
            let buf = counter_bump(&COUNTER).finish();
            let exe = unsafe { crate::loader::Executable::new(&buf, AllocStrategy::default()) }.expect("load");

            exe.run().expect("run");
            exe.run().expect("run");
            assert_eq!(COUNTER.load(Ordering::SeqCst), 2);
            assert_eq!(exe.code().as_bytes(), buf.as_bytes());
        }
    }
}
