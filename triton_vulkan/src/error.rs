use crate::format::Format;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("vk error: {0}")]
    Vk(#[from] ash::vk::Result),

    #[error("gpu allocation error: {0}")]
    Alloc(#[from] gpu_allocator::AllocationError),

    #[error("no suitable physical device found")]
    NoSuitablePhysicalDevice,

    #[error("raytracing is not supported on this device")]
    RaytracingUnsupported,

    #[error("format {0:?} does not support the requested filter for blitting")]
    FormatNotFilterable(Format),

    #[error("command buffer or acquire wait exceeded its timeout")]
    Timeout,

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub(crate) fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
