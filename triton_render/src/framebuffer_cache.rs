//! Caches `FrameBuffer`s by the render pass plus ordered attachment list
//! they were built from, so two passes that target the same render buffers
//! through the same render pass share one `vk::Framebuffer`.

use triton_vulkan::{Device, FrameBufferHandle, RenderPassHandle, TextureHandle};

use crate::error::{Error, Result};
use crate::hash::{hash_key, Cache};

#[derive(Default)]
pub struct FrameBufferCache {
    cache: Cache<FrameBufferHandle>,
}

impl FrameBufferCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hashes `(render_pass, [(texture, base_layer=0, base_mip=0,
    /// num_layers=1) per attachment])`; the zeroed subrange fields are
    /// carried in the key even though every attachment here is a full,
    /// single-layer render buffer, so the key shape has room for a future
    /// partial-view attachment without changing.
    pub fn fetch(
        &mut self,
        device: &Device,
        render_pass: RenderPassHandle,
        attachments: &[TextureHandle],
        width: u32,
        height: u32,
    ) -> Result<FrameBufferHandle> {
        let subranges: Vec<(TextureHandle, u32, u32, u32)> =
            attachments.iter().map(|&t| (t, 0u32, 0u32, 1u32)).collect();
        let key = hash_key((render_pass, subranges));

        self.cache
            .fetch_or_build(key, || device.create_frame_buffer(render_pass, attachments, width, height))
            .map_err(Error::from)
    }

    pub fn invalidate(&mut self, device: &Device) {
        for framebuffer in self.cache.clear() {
            device.destroy_frame_buffer(framebuffer);
        }
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_render_pass_and_attachments_hash_equal() {
        let a = hash_key((1u64, vec![(2u64, 0u32, 0u32, 1u32)]));
        let b = hash_key((1u64, vec![(2u64, 0u32, 0u32, 1u32)]));
        assert_eq!(a, b);
    }

    #[test]
    fn different_attachment_order_hashes_differ() {
        let a = hash_key((1u64, vec![(2u64, 0u32, 0u32, 1u32), (3u64, 0u32, 0u32, 1u32)]));
        let b = hash_key((1u64, vec![(3u64, 0u32, 0u32, 1u32), (2u64, 0u32, 0u32, 1u32)]));
        assert_ne!(a, b);
    }
}
