mod capabilities;
mod error;
mod framebuffer_cache;
mod gpu_bindings;
mod hash;
mod pass;
mod render_buffer;
mod render_graph;

pub use capabilities::*;
pub use error::{Error, Result};
pub use framebuffer_cache::FrameBufferCache;
pub use gpu_bindings::{GpuBindings, ParameterGroup, ParameterType};
pub use pass::{fullscreen_pass, AttachmentOp, GraphContext, GraphicsPass, RenderPass, SwapRenderBuffersPass};
pub use render_buffer::RenderBuffer;
pub use render_graph::{GraphStorage, RenderGraph};

#[macro_use]
extern crate log;
