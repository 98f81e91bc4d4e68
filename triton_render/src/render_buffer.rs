//! A graph-owned, resolution-relative texture: sized as `graph_size /
//! downscale`, materialized once and left alone until explicitly
//! invalidated (resize does this explicitly; a plain `flush` never
//! recreates an existing texture).

use triton_vulkan::{BindSetHandle, Device, Format, TextureHandle};

use crate::error::Result;

pub struct RenderBuffer {
    pub name: String,
    pub format: Format,
    pub downscale: u32,
    pub texture: Option<TextureHandle>,
    pub bind_set: Option<BindSetHandle>,
}

impl RenderBuffer {
    pub fn new(name: impl Into<String>, format: Format, downscale: u32) -> Self {
        Self {
            name: name.into(),
            format,
            downscale: downscale.max(1),
            texture: None,
            bind_set: None,
        }
    }

    pub fn resolved_size(&self, graph_width: u32, graph_height: u32) -> (u32, u32) {
        (
            (graph_width / self.downscale).max(1),
            (graph_height / self.downscale).max(1),
        )
    }

    /// No-op if the texture already exists. Returns whether it created one.
    pub fn flush(&mut self, device: &Device, graph_width: u32, graph_height: u32) -> Result<bool> {
        if self.texture.is_some() {
            return Ok(false);
        }

        let (width, height) = self.resolved_size(graph_width, graph_height);
        let texture = device.create_texture_2d(width, height, 1, self.format, None, 0)?;
        let bind_set = device.create_bind_set();
        device.bind_texture(bind_set, 0, texture, None);
        device.flush_bind_set(bind_set)?;

        self.texture = Some(texture);
        self.bind_set = Some(bind_set);
        Ok(true)
    }

    pub fn invalidate(&mut self, device: &Device) {
        if let Some(texture) = self.texture.take() {
            device.destroy_texture(texture);
        }
        if let Some(bind_set) = self.bind_set.take() {
            device.destroy_bind_set(bind_set);
        }
    }

    /// Swaps this buffer's GPU-side state with `other`'s, leaving both
    /// buffers' names and declared `format`/`downscale` untouched. Used for
    /// ping-pong patterns (e.g. iterative blur) instead of renaming.
    pub fn swap_state(&mut self, other: &mut Self) {
        std::mem::swap(&mut self.texture, &mut other.texture);
        std::mem::swap(&mut self.bind_set, &mut other.bind_set);
    }

    pub fn is_compatible_with(&self, other: &Self) -> bool {
        self.format == other.format && self.downscale == other.downscale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolved_size_floors_and_never_hits_zero() {
        let buffer = RenderBuffer::new("half", Format::R8G8B8A8Unorm, 2);
        assert_eq!(buffer.resolved_size(1920, 1080), (960, 540));

        let buffer = RenderBuffer::new("tiny", Format::R8G8B8A8Unorm, 64);
        assert_eq!(buffer.resolved_size(32, 32), (1, 1));
    }

    #[test]
    fn downscale_is_clamped_to_at_least_one() {
        let buffer = RenderBuffer::new("b", Format::R8G8B8A8Unorm, 0);
        assert_eq!(buffer.downscale, 1);
    }

    #[test]
    fn compatibility_requires_matching_format_and_downscale() {
        let a = RenderBuffer::new("a", Format::R8G8B8A8Unorm, 1);
        let b = RenderBuffer::new("b", Format::R8G8B8A8Unorm, 2);
        assert!(!a.is_compatible_with(&b));
    }
}
