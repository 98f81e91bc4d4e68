#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Vulkan(#[from] triton_vulkan::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("unknown parameter group {0:?}")]
    UnknownGroup(String),

    #[error("parameter group {0:?} already exists")]
    DuplicateGroup(String),

    #[error("unknown parameter {parameter:?} in group {group:?}")]
    UnknownParameter { group: String, parameter: String },

    #[error("parameter {parameter:?} expected {expected} element(s) of {size} byte(s), got {actual} byte(s)")]
    ParameterSizeMismatch {
        parameter: String,
        expected: usize,
        size: usize,
        actual: usize,
    },

    #[error("parameter {parameter:?} index {index} out of range (len {len})")]
    IndexOutOfRange {
        parameter: String,
        index: usize,
        len: usize,
    },

    #[error("render buffer {0:?} already exists")]
    DuplicateRenderBuffer(String),

    #[error("unknown render buffer {0:?}")]
    UnknownRenderBuffer(String),

    #[error("render pass type {0:?} is already registered")]
    DuplicatePassType(String),

    #[error("no render pass type registered as {0:?}")]
    UnknownPassType(String),

    #[error("render pass {0:?} already exists")]
    DuplicatePassName(String),

    #[error("render buffers {0:?} and {1:?} have mismatched format or downscale")]
    FormatMismatch(String, String),

    #[error("root yaml node is not a stream")]
    NotAStream,

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub(crate) fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
