//! Runtime code generation plumbing: build an instruction buffer, resolve its
//! data references, map it executable, and call it from the host.
//!
//! ```no_run
//! use jitcall::loader::{self, CodeBuffer, ExecutableRegion, Nullary};
//!
//! let buffer = CodeBuffer::from_bytes(&[0xC3]).finish(); // ret
//! let mut region = ExecutableRegion::acquire(buffer.len())?;
//! let code = loader::load(&buffer, &mut region)?;
//! // SAFETY: a lone `ret` is a valid `extern "C" fn()`.
//! let handle = unsafe { loader::bind::<Nullary>(&code)? };
//! handle.invoke();
//! # Ok::<(), jitcall::loader::Error>(())
//! ```

#[cfg(not(all(target_os = "linux", target_arch = "x86_64")))]
compile_error!("jitcall generates and maps x86-64 code for Linux hosts only");

pub mod loader;
pub mod payload;
pub mod text;
pub mod types;
