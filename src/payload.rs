//! The bundled `write(2)` stub and its "Hello World!" instance.
//!
//! Layout (Linux x86-64):
//!
//! ```text
//! 00  b8 01 00 00 00        mov  eax, 1          ; SYS_write
//! 05  bf 01 00 00 00        mov  edi, 1          ; fd
//! 0a  ba 0c 00 00 00        mov  edx, 12         ; len
//! 0f  48 8d 35 03 00 00 00  lea  rsi, [rip + 3]  ; -> 0x19
//! 16  0f 05                 syscall
//! 18  c3                    ret
//! 19  "Hello World!"
//! ```

use crate::loader::arch::x64::{self, Reg};
use crate::loader::{CodeBuffer, Error, Executable, InstructionBuffer, Loader, RelocationSite, Result, resolve};

pub const GREETING: &[u8; 12] = b"Hello World!";

pub const STDOUT: u32 = 1;

/// A write stub whose data reference has not been resolved yet.
#[derive(Debug, Clone)]
pub struct WriteStub {
    pub buffer: InstructionBuffer,
    pub site: RelocationSite,
    pub data_offset: usize,
}

impl WriteStub {
    /// Patch the message reference, returning the finished buffer.
    pub fn resolve(mut self) -> Result<InstructionBuffer> {
        resolve(&mut self.buffer, self.site, self.data_offset)?;
        Ok(self.buffer)
    }
}

/// Build code that writes `message` to `fd` and returns.
pub fn write_stub(fd: u32, message: &[u8]) -> Result<WriteStub> {
    let len = u32::try_from(message.len()).map_err(|_| Error::EncodingOverflow {
        value: i64::try_from(message.len()).unwrap_or(i64::MAX),
        bits: 32,
    })?;

    let mut buf = CodeBuffer::new();
    x64::mov_r32_imm32(&mut buf, Reg::Rax, x64::SYS_WRITE);
    x64::mov_r32_imm32(&mut buf, Reg::Rdi, fd);
    x64::mov_r32_imm32(&mut buf, Reg::Rdx, len);
    let site = x64::lea_rip_rel32(&mut buf, Reg::Rsi);
    x64::syscall(&mut buf);
    x64::ret(&mut buf);
    let data_offset = buf.append_data(message);

    Ok(WriteStub {
        buffer: buf.finish(),
        site,
        data_offset,
    })
}

/// The canonical payload, relocated and ready to load.
pub fn hello_world() -> Result<InstructionBuffer> {
    write_stub(STDOUT, GREETING)?.resolve()
}

/// Load a write stub for `message` on `fd` into its own region.
pub fn write_executable(loader: &Loader, fd: u32, message: &[u8]) -> Result<Executable> {
    let buffer = write_stub(fd, message)?.resolve()?;
    // SAFETY: the stub only clobbers caller-saved registers (rax, rcx, rdx,
    // rsi, rdi, r11), touches no stack, and ends in `ret`.
    unsafe { loader.load_executable(&buffer) }
}
