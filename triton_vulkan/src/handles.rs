//! Strongly-typed, non-nullable handles.
//!
//! The original C-style API returns raw pointer-sized "handle" types that are
//! nullable and carry no type information beyond what the function name
//! implies. Per the redesign notes we replace each with a `slotmap` key
//! wrapped in a distinct newtype: identity equality, cheap `Copy`, and no
//! valid "null" value — absence is always `Option<Handle>` at the API
//! boundary instead of a sentinel.

macro_rules! define_handle {
    ($name:ident) => {
        slotmap::new_key_type! {
            pub struct $name;
        }
    };
}

define_handle!(VertexBufferHandle);
define_handle!(IndexBufferHandle);
define_handle!(UniformBufferHandle);
define_handle!(TextureHandle);
define_handle!(SamplerHandle);
define_handle!(FrameBufferHandle);
define_handle!(RenderPassHandle);
define_handle!(ShaderHandle);
define_handle!(BindSetHandle);
define_handle!(GraphicsPipelineHandle);
define_handle!(RayTracePipelineHandle);
define_handle!(BlasHandle);
define_handle!(TlasHandle);
define_handle!(CommandBufferHandle);
define_handle!(SwapChainHandle);
