use crate::format::ScalarType;

/// Failure to parse an attribute format string such as `"4Bn"`
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("attribute format `{0}` is empty")]
    Empty(String),
    #[error("attribute format `{0}` must start with a component count between 1 and 4")]
    BadCount(String),
    #[error("attribute format `{format}` has unknown scalar type `{found}`")]
    UnknownType { format: String, found: char },
    #[error("attribute format `{format}` has unknown flag `{found}`")]
    UnknownFlag { format: String, found: char },
    #[error("attribute `{0}` is declared twice")]
    DuplicateAttribute(String),
}

/// Errors surfaced by domains, vertex lists and instances
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DomainError {
    #[error("attribute `{name}` needs {expected} values for this region but {actual} were supplied")]
    DataLengthMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("attribute `{name}` stores {expected:?} values but {actual:?} data was supplied")]
    ScalarTypeMismatch {
        name: String,
        expected: ScalarType,
        actual: ScalarType,
    },

    #[error("no attribute named `{0}` in this domain")]
    UnknownAttribute(String),

    #[error("cannot migrate between domains with attributes {source_names:?} and {target_names:?}")]
    IncompatibleDomain {
        source_names: Vec<String>,
        target_names: Vec<String>,
    },

    #[error("growing a buffer to {requested} bytes exceeds the device limit of {limit} bytes")]
    AllocationTooLarge { requested: usize, limit: usize },

    #[error("domain is unusable after an earlier allocation failure")]
    DomainFailed,

    #[error("index {index} is outside the vertex list of {count} vertices")]
    IndexOutOfRange { index: u32, count: usize },

    #[error("index {index} does not fit the domain index type {index_type:?}")]
    IndexOverflow {
        index: u64,
        index_type: crate::device::IndexType,
    },

    #[error("domain is not indexed")]
    NotIndexed,

    #[error("domain is not instanced")]
    NotInstanced,

    #[error("cached region is stale (cached at version {cached}, domain is at {current})")]
    StaleHandle { cached: u64, current: u64 },

    #[error("instance no longer exists")]
    UnknownInstance,

    #[error(transparent)]
    Format(#[from] FormatError),
}
