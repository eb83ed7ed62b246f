//! Decoding of a buffer's instruction section for diagnostics and checks.
//!
//! Decoding uses offset 0 as the instruction pointer, so every reported
//! address is an offset into the buffer.

use iced_x86::{Decoder, DecoderOptions, FlowControl, Formatter, Instruction, Mnemonic, NasmFormatter};

use crate::loader::InstructionBuffer;
use crate::types::{ListingLine, RipReference, SyscallSite};

const BITNESS: u32 = 64;

fn decode(buffer: &InstructionBuffer) -> Vec<Instruction> {
    let mut decoder = Decoder::with_ip(BITNESS, buffer.code(), 0, DecoderOptions::NONE);
    let mut instructions = Vec::new();
    while decoder.can_decode() {
        instructions.push(decoder.decode());
    }
    instructions
}

pub fn find_syscalls(buffer: &InstructionBuffer) -> Vec<SyscallSite> {
    decode(buffer)
        .iter()
        .filter(|i| i.mnemonic() == Mnemonic::Syscall)
        .map(|i| SyscallSite {
            offset: i.ip(),
            len: i.len(),
        })
        .collect()
}

pub fn rip_references(buffer: &InstructionBuffer) -> Vec<RipReference> {
    decode(buffer)
        .iter()
        .filter(|i| i.is_ip_rel_memory_operand())
        .map(|i| RipReference {
            offset: i.ip(),
            target: i.ip_rel_memory_address(),
        })
        .collect()
}

/// Whether execution can run off the end of the instructions into the data
/// segment (or past the end of the buffer).
pub fn falls_through(buffer: &InstructionBuffer) -> bool {
    match decode(buffer).last() {
        Some(last) if !last.is_invalid() => !matches!(
            last.flow_control(),
            FlowControl::Return | FlowControl::UnconditionalBranch | FlowControl::IndirectBranch
        ),
        _ => true,
    }
}

pub fn listing(buffer: &InstructionBuffer) -> Vec<ListingLine> {
    let code = buffer.code();
    let mut formatter = NasmFormatter::new();
    decode(buffer)
        .iter()
        .map(|i| {
            let mut text = String::new();
            formatter.format(i, &mut text);
            let start = i.ip() as usize;
            ListingLine {
                offset: i.ip(),
                bytes: code[start..start + i.len()].to_vec(),
                text,
            }
        })
        .collect()
}
