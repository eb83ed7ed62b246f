//! Patching of position-independent data references.
//!
//! A referencing instruction carries a displacement measured from the end of
//! that instruction. Because the loader copies the buffer verbatim, the
//! displacement computed from buffer offsets stays valid at the final address.

use tracing::trace;

use super::code_buffer::InstructionBuffer;
use super::error::{Error, Result};

/// Width of a displacement placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaceholderWidth {
    /// Signed 8-bit displacement (`rel8`).
    Rel8,
    /// Signed 32-bit displacement (`rel32`, `[rip + disp32]`).
    Rel32,
}

impl PlaceholderWidth {
    pub const fn bytes(self) -> usize {
        match self {
            PlaceholderWidth::Rel8 => 1,
            PlaceholderWidth::Rel32 => 4,
        }
    }

    pub const fn bits(self) -> u32 {
        (self.bytes() * 8) as u32
    }

    /// Encode `value` little-endian, refusing values the width cannot hold.
    fn encode(self, value: i64) -> Result<Vec<u8>> {
        let overflow = || Error::EncodingOverflow {
            value,
            bits: self.bits(),
        };
        match self {
            PlaceholderWidth::Rel8 => {
                let v = i8::try_from(value).map_err(|_| overflow())?;
                Ok(v.to_le_bytes().to_vec())
            }
            PlaceholderWidth::Rel32 => {
                let v = i32::try_from(value).map_err(|_| overflow())?;
                Ok(v.to_le_bytes().to_vec())
            }
        }
    }
}

/// Location of a displacement placeholder inside an instruction buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RelocationSite {
    instruction_offset: usize,
    instruction_len: usize,
    placeholder: usize,
    width: PlaceholderWidth,
}

impl RelocationSite {
    /// Site whose placeholder is the trailing field of the instruction, which
    /// is where x86-64 puts `rel8`/`rel32`/`disp32` when no immediate follows.
    pub fn trailing(instruction_offset: usize, instruction_len: usize, width: PlaceholderWidth) -> Self {
        let placeholder = instruction_offset.saturating_add(instruction_len).saturating_sub(width.bytes());
        Self::new(instruction_offset, instruction_len, placeholder, width)
    }

    pub fn new(
        instruction_offset: usize,
        instruction_len: usize,
        placeholder: usize,
        width: PlaceholderWidth,
    ) -> Self {
        Self {
            instruction_offset,
            instruction_len,
            placeholder,
            width,
        }
    }

    pub fn instruction_offset(&self) -> usize {
        self.instruction_offset
    }

    pub fn instruction_len(&self) -> usize {
        self.instruction_len
    }

    /// Offset of the first byte following the referencing instruction.
    ///
    /// Saturates; [`resolve`] rejects sites whose end does not fit.
    pub fn instruction_end(&self) -> usize {
        self.instruction_offset.saturating_add(self.instruction_len)
    }

    pub fn placeholder(&self) -> usize {
        self.placeholder
    }

    pub fn width(&self) -> PlaceholderWidth {
        self.width
    }

    /// Displacement from the end of the instruction to `target`.
    pub fn distance_to(&self, target: usize) -> Result<i64> {
        let to_i64 = |v: usize| {
            i64::try_from(v).map_err(|_| Error::EncodingOverflow {
                value: i64::MAX,
                bits: 64,
            })
        };
        Ok(to_i64(target)? - to_i64(self.instruction_end())?)
    }
}

/// Overwrite the placeholder at `site` with the displacement to `data_offset`.
///
/// Returns the displacement written. On failure the buffer is left untouched.
pub fn resolve(buffer: &mut InstructionBuffer, site: RelocationSite, data_offset: usize) -> Result<i64> {
    let len = buffer.len();
    let width = site.width.bytes();
    let end = site.instruction_offset.checked_add(site.instruction_len);
    let placeholder_end = site.placeholder.checked_add(width);
    let in_bounds = match (end, placeholder_end) {
        (Some(end), Some(placeholder_end)) => {
            placeholder_end <= end && site.placeholder >= site.instruction_offset && end <= len && data_offset <= len
        }
        _ => false,
    };
    if !in_bounds {
        return Err(Error::SiteOutOfBounds {
            offset: site.placeholder,
            width,
            len,
        });
    }

    let distance = site.distance_to(data_offset)?;
    let encoded = site.width.encode(distance)?;
    buffer.patch(site.placeholder, &encoded);
    buffer.mark_resolved(&site);

    trace!(
        placeholder = site.placeholder,
        data_offset,
        distance,
        "relocation resolved"
    );
    Ok(distance)
}
