/// A `syscall` instruction found in generated code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyscallSite {
    pub offset: u64, // Offset from the start of the buffer
    pub len: usize,  // Encoded length
}

/// An instruction operand addressed relative to the instruction pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RipReference {
    pub offset: u64, // Offset of the referencing instruction
    pub target: u64, // Offset the operand resolves to
}

/// One decoded line of a listing.
#[derive(Debug, Clone)]
pub struct ListingLine {
    pub offset: u64,
    pub bytes: Vec<u8>,
    pub text: String,
}
