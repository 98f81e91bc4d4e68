mod bind_set;
mod buffer;
mod caches;
mod command_buffer;
mod debug;
mod device;
mod error;
mod format;
mod handles;
mod instance;
mod pipeline;
mod raytracing;
mod render_pass;
mod sampler;
mod swapchain;
mod texture;

pub use bind_set::*;
pub use buffer::Buffer;
pub use command_buffer::{CommandBuffer, RenderTarget};
pub use device::{Device, Queue};
pub use error::{Error, Result};
pub use format::*;
pub use handles::*;
pub use instance::{score_physical_device, Instance, PhysicalDeviceInfo, Surface};
pub use pipeline::*;
pub use raytracing::{Blas, BlasInstance, RayTracePipeline, Tlas, TriangleGeometry};
pub use render_pass::{AttachmentDesc, FrameBuffer, RenderPass};
pub use sampler::*;
pub use swapchain::SwapChain;
pub use texture::{ImageViewSubrange, Texture};

pub use ash;

#[macro_use]
extern crate log;

pub type MemoryLocation = gpu_allocator::MemoryLocation;
