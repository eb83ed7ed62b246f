use crate::loader::code_buffer::CodeBuffer;
use crate::loader::reloc::{PlaceholderWidth, RelocationSite};

/// Linux x86-64 syscall number of `write(2)`.
pub const SYS_WRITE: u32 = 1;

/// The low eight general purpose registers, numbered as in ModRM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Reg {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
}

impl Reg {
    #[inline]
    const fn code(self) -> u8 {
        self as u8
    }
}

/// `mov r32, imm32` (zero-extends into the 64-bit register).
pub fn mov_r32_imm32(buf: &mut CodeBuffer, reg: Reg, imm: u32) {
    buf.emit_u8(0xB8 + reg.code());
    buf.emit_u32(imm);
}

/// `lea r64, [rip + disp32]` with the displacement left as a placeholder.
pub fn lea_rip_rel32(buf: &mut CodeBuffer, reg: Reg) -> RelocationSite {
    // REX.W, opcode, ModRM mod=00 rm=101 (RIP-relative)
    let modrm = 0x05 | (reg.code() << 3);
    buf.append_with_placeholder(&[0x48, 0x8D, modrm], PlaceholderWidth::Rel32)
}

/// `jmp rel32` with the displacement left as a placeholder.
pub fn jmp_rel32(buf: &mut CodeBuffer) -> RelocationSite {
    buf.append_with_placeholder(&[0xE9], PlaceholderWidth::Rel32)
}

/// `jmp rel8` with the displacement left as a placeholder.
pub fn jmp_rel8(buf: &mut CodeBuffer) -> RelocationSite {
    buf.append_with_placeholder(&[0xEB], PlaceholderWidth::Rel8)
}

pub fn syscall(buf: &mut CodeBuffer) {
    buf.append(&[0x0F, 0x05]);
}

pub fn ret(buf: &mut CodeBuffer) {
    buf.emit_u8(0xC3);
}

/// `push rbp; mov rbp, rsp`: the frame a non-leaf routine establishes
/// before any payload logic when called under the C convention.
pub fn prologue(buf: &mut CodeBuffer) {
    buf.emit_u8(0x55);
    buf.append(&[0x48, 0x89, 0xE5]);
}

/// `pop rbp; ret`
pub fn epilogue(buf: &mut CodeBuffer) {
    buf.emit_u8(0x5D);
    ret(buf);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::reloc::resolve;

    #[test]
    fn mov_encodes_register_in_opcode() {
        let mut buf = CodeBuffer::new();
        mov_r32_imm32(&mut buf, Reg::Rax, SYS_WRITE);
        mov_r32_imm32(&mut buf, Reg::Rdi, 1);
        mov_r32_imm32(&mut buf, Reg::Rdx, 12);
        assert_eq!(
            buf.finish().as_bytes(),
            &[
                0xB8, 0x01, 0x00, 0x00, 0x00, 0xBF, 0x01, 0x00, 0x00, 0x00, 0xBA, 0x0C, 0x00, 0x00,
                0x00
            ]
        );
    }

    #[test]
    fn lea_rsi_uses_rip_relative_modrm() {
        let mut buf = CodeBuffer::new();
        let site = lea_rip_rel32(&mut buf, Reg::Rsi);
        assert_eq!(buf.finish().as_bytes(), &[0x48, 0x8D, 0x35, 0, 0, 0, 0]);
        assert_eq!(site.instruction_len(), 7);
        assert_eq!(site.placeholder(), 3);
    }

    #[test]
    fn jump_over_inline_data() {
        let mut buf = CodeBuffer::new();
        let site = jmp_rel8(&mut buf);
        buf.append(b"inline");
        let target = buf.offset();
        ret(&mut buf);
        let mut buf = buf.finish();

        assert_eq!(resolve(&mut buf, site, target).unwrap(), 6);
        assert_eq!(&buf.as_bytes()[..2], &[0xEB, 0x06]);
    }

    #[test]
    fn frame_helpers() {
        let mut buf = CodeBuffer::new();
        prologue(&mut buf);
        epilogue(&mut buf);
        syscall(&mut buf);
        let site = jmp_rel32(&mut buf);
        assert_eq!(site.instruction_offset(), 8);
        assert_eq!(
            buf.finish().as_bytes(),
            &[0x55, 0x48, 0x89, 0xE5, 0x5D, 0xC3, 0x0F, 0x05, 0xE9, 0, 0, 0, 0]
        );
    }
}
