use thiserror::Error;

pub type Result<T> = std::result::Result<T, DtsError>;

/// Everything that can go wrong while reading, patching or composing a
/// device tree. All of these are fatal: the tool reports one and exits.
#[derive(Debug, Error)]
pub enum DtsError {
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{file}:{line}: unknown directive `{directive}`")]
    UnknownDirective {
        file: String,
        line: usize,
        directive: String,
    },

    #[error("{file}:{line}: cannot tokenize `{residue}`")]
    BadToken {
        file: String,
        line: usize,
        residue: String,
    },

    #[error("{file}:{line}: unterminated string")]
    UnterminatedString { file: String, line: usize },

    #[error("{file}:{line}: `{path}` is neither a header nor a source include")]
    BadInclude {
        file: String,
        line: usize,
        path: String,
    },

    #[error("{file}: expected {expected}, found `{found}`")]
    Unexpected {
        file: String,
        expected: String,
        found: String,
    },

    #[error("{file}: missing /dts-v1/ header")]
    MissingVersion { file: String },

    #[error("{file}: duplicate /dts-v1/ header")]
    DuplicateVersion { file: String },

    #[error("invalid /bits/ size `{0}`")]
    BadBits(String),

    #[error("unknown label `&{0}`")]
    UnknownLabel(String),

    #[error("duplicated label `{0}`")]
    DuplicateLabel(String),

    #[error("tree has no `__overrides__` node to satisfy parameters")]
    MissingOverrides,

    #[error("unknown parameter `{0}`")]
    UnknownParameter(String),

    #[error("invalid override declaration: {0}")]
    BadOverride(String),

    #[error("override parameter `{0}` already defined")]
    DuplicateOverride(String),

    #[error("no fragment {0} to enable or disable")]
    MissingFragment(String),

    #[error("offset {offset} is not a multiple of the element size {size}")]
    UnalignedOffset { offset: usize, size: usize },

    #[error("fragment `{0}` has no target in the base tree")]
    MissingTarget(String),

    #[error("`{0}` is not an overlay (missing /plugin/)")]
    NotPlugin(String),

    #[error("cannot interpret `{0}` as a boolean")]
    BadBoolean(String),

    #[error("cannot interpret `{0}` as an integer")]
    BadInteger(String),
}
