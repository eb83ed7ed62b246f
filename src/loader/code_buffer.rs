use std::ops::Range;

use super::reloc::{PlaceholderWidth, RelocationSite};

/// Growable byte sequence of encoded instructions followed by one data segment.
///
/// Nothing appended here is validated; the caller owns the encoding. Bytes
/// are always written in execution order.
#[derive(Debug, Default, Clone)]
pub struct CodeBuffer {
    bytes: Vec<u8>,
    data: Option<Range<usize>>,
    pending: Vec<RelocationSite>,
}

impl CodeBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut buf = Self::new();
        buf.append(bytes);
        buf
    }

    /// Offset the next byte will be written at.
    #[inline]
    pub fn offset(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Append raw encoded bytes, returning the offset they start at.
    pub fn append(&mut self, bytes: &[u8]) -> usize {
        let offset = self.offset();
        self.bytes.extend_from_slice(bytes);
        offset
    }

    #[inline]
    pub fn emit_u8(&mut self, byte: u8) {
        self.bytes.push(byte);
    }

    #[inline]
    pub fn emit_u16(&mut self, val: u16) {
        self.append(&val.to_le_bytes());
    }

    #[inline]
    pub fn emit_u32(&mut self, val: u32) {
        self.append(&val.to_le_bytes());
    }

    #[inline]
    pub fn emit_i32(&mut self, val: i32) {
        self.append(&val.to_le_bytes());
    }

    #[inline]
    pub fn emit_u64(&mut self, val: u64) {
        self.append(&val.to_le_bytes());
    }

    /// Append an instruction made of `prefix` followed by a zeroed displacement
    /// placeholder, and record the site as awaiting relocation.
    pub fn append_with_placeholder(&mut self, prefix: &[u8], width: PlaceholderWidth) -> RelocationSite {
        let start = self.append(prefix);
        self.append(&[0; 4][..width.bytes()]);
        let site = RelocationSite::trailing(start, prefix.len() + width.bytes(), width);
        self.pending.push(site);
        site
    }

    /// Append the literal data segment, returning its offset.
    ///
    /// The previous instruction must transfer control unconditionally, or the
    /// processor will run straight into the data.
    ///
    /// # Panics
    /// Panics if a data segment was already appended.
    pub fn append_data(&mut self, bytes: &[u8]) -> usize {
        assert!(self.data.is_none(), "buffer already holds a data segment");
        let offset = self.append(bytes);
        self.data = Some(offset..offset + bytes.len());
        offset
    }

    /// Freeze the layout. Only relocation may modify bytes afterwards.
    pub fn finish(self) -> InstructionBuffer {
        InstructionBuffer {
            bytes: self.bytes.into_boxed_slice(),
            data: self.data,
            pending: self.pending,
        }
    }
}

/// Fixed-length instruction buffer ready for relocation and loading.
#[derive(Debug, Clone)]
pub struct InstructionBuffer {
    bytes: Box<[u8]>,
    data: Option<Range<usize>>,
    pending: Vec<RelocationSite>,
}

impl InstructionBuffer {
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Byte range of the embedded data segment, if any.
    pub fn data_range(&self) -> Option<Range<usize>> {
        self.data.clone()
    }

    /// The instruction bytes preceding the data segment.
    pub fn code(&self) -> &[u8] {
        match &self.data {
            Some(range) => &self.bytes[..range.start],
            None => &self.bytes,
        }
    }

    /// Placeholder sites that still hold their zeroed placeholder.
    pub fn unresolved(&self) -> &[RelocationSite] {
        &self.pending
    }

    /// Caller guarantees `offset + bytes.len() <= self.len()`.
    pub(crate) fn patch(&mut self, offset: usize, bytes: &[u8]) {
        self.bytes[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    pub(crate) fn mark_resolved(&mut self, site: &RelocationSite) {
        self.pending.retain(|pending| pending != site);
    }
}
