//! Fixed encodings used by the bundled payloads. This is not an assembler:
//! each helper emits one concrete instruction form.

pub mod x64;
