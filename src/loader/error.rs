use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    #[error("value {value} does not fit in a {bits}-bit field")]
    EncodingOverflow { value: i64, bits: u32 },

    #[error("relocation site at {offset:#x} (width {width}) lies outside a buffer of {len} bytes")]
    SiteOutOfBounds {
        offset: usize,
        width: usize,
        len: usize,
    },

    #[error("relocation at {offset:#x} has not been resolved")]
    UnresolvedRelocation { offset: usize },

    #[error("executable mapping of {requested} bytes denied: {source}")]
    AllocationDenied {
        requested: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("region too small: code needs {required} bytes, region holds {available}")]
    RegionTooSmall { required: usize, available: usize },

    #[error("region already holds a payload")]
    RegionAlreadyLoaded,

    #[error("region mapping was released")]
    RegionReleased,

    #[error("cannot bind a callable to empty code")]
    EmptyCode,
}

pub type Result<T> = std::result::Result<T, Error>;
