//! Classic `VkRenderPass` + `VkFramebuffer` objects (no dynamic rendering),
//! per spec.md's explicit attachment/load-store model.

use crate::device::Device;
use crate::format::{Format, LoadOp, StoreOp};
use crate::handles::{FrameBufferHandle, RenderPassHandle, TextureHandle};
use crate::Result;
use ash::vk;

#[derive(Debug, Clone, Copy)]
pub struct AttachmentDesc {
    pub format: Format,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
}

pub struct RenderPass {
    pub(crate) handle: vk::RenderPass,
    pub(crate) color_attachment_count: u32,
    pub(crate) has_depth_stencil: bool,
}

pub struct FrameBuffer {
    pub(crate) handle: vk::Framebuffer,
    pub width: u32,
    pub height: u32,
}

impl Device {
    /// Builds a render pass from an ordered list of colour attachments plus
    /// an optional depth/stencil attachment. Each render pass has exactly
    /// one subpass; the caller is responsible for declaring attachments in
    /// the same order the framebuffer will bind views in.
    pub fn create_render_pass(
        &self,
        color_attachments: &[AttachmentDesc],
        depth_stencil_attachment: Option<AttachmentDesc>,
    ) -> Result<RenderPassHandle> {
        let mut descriptions = Vec::with_capacity(color_attachments.len() + 1);
        let mut color_refs = Vec::with_capacity(color_attachments.len());

        for attachment in color_attachments {
            let index = descriptions.len() as u32;
            descriptions.push(
                vk::AttachmentDescription::builder()
                    .format(attachment.format.to_vk())
                    .samples(vk::SampleCountFlags::TYPE_1)
                    .load_op(attachment.load_op.to_vk())
                    .store_op(attachment.store_op.to_vk())
                    .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(vk::ImageLayout::UNDEFINED)
                    .final_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                    .build(),
            );
            color_refs.push(vk::AttachmentReference {
                attachment: index,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            });
        }

        let depth_ref = depth_stencil_attachment.map(|attachment| {
            let index = descriptions.len() as u32;
            descriptions.push(
                vk::AttachmentDescription::builder()
                    .format(attachment.format.to_vk())
                    .samples(vk::SampleCountFlags::TYPE_1)
                    .load_op(attachment.load_op.to_vk())
                    .store_op(attachment.store_op.to_vk())
                    .stencil_load_op(if attachment.format.has_stencil() {
                        attachment.load_op.to_vk()
                    } else {
                        vk::AttachmentLoadOp::DONT_CARE
                    })
                    .stencil_store_op(if attachment.format.has_stencil() {
                        attachment.store_op.to_vk()
                    } else {
                        vk::AttachmentStoreOp::DONT_CARE
                    })
                    .initial_layout(vk::ImageLayout::UNDEFINED)
                    .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                    .build(),
            );
            vk::AttachmentReference {
                attachment: index,
                layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            }
        });

        let mut subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);
        if let Some(depth_ref) = &depth_ref {
            subpass = subpass.depth_stencil_attachment(depth_ref);
        }

        let handle = unsafe {
            self.core.create_render_pass(
                &vk::RenderPassCreateInfo::builder()
                    .attachments(&descriptions)
                    .subpasses(std::slice::from_ref(&subpass)),
                None,
            )
        }?;

        Ok(self.render_passes.lock().unwrap().insert(RenderPass {
            handle,
            color_attachment_count: color_attachments.len() as u32,
            has_depth_stencil: depth_stencil_attachment.is_some(),
        }))
    }

    /// A single-colour-attachment render pass matching a swap-chain image's
    /// format, used as the swap-chain's "dummy" render pass and by passes
    /// that target the swap-chain directly.
    pub(crate) fn create_swap_chain_render_pass(
        &self,
        format: Format,
        load_op: LoadOp,
        store_op: StoreOp,
    ) -> Result<RenderPassHandle> {
        self.create_render_pass(
            &[AttachmentDesc {
                format,
                load_op,
                store_op,
            }],
            None,
        )
    }

    pub fn destroy_render_pass(&self, handle: RenderPassHandle) {
        if let Some(pass) = self.render_passes.lock().unwrap().remove(handle) {
            unsafe { self.core.destroy_render_pass(pass.handle, None) };
        }
    }

    /// Fetches a view for each attachment texture (full subrange) and builds
    /// a framebuffer against `render_pass`.
    pub fn create_frame_buffer(
        &self,
        render_pass: RenderPassHandle,
        attachments: &[TextureHandle],
        width: u32,
        height: u32,
    ) -> Result<FrameBufferHandle> {
        let render_passes = self.render_passes.lock().unwrap();
        let pass = render_passes
            .get(render_pass)
            .ok_or_else(|| crate::Error::other("unknown render pass"))?;

        let textures = self.textures.lock().unwrap();
        let mut views = Vec::with_capacity(attachments.len());
        for &texture_handle in attachments {
            let texture = textures
                .get(texture_handle)
                .ok_or_else(|| crate::Error::other("unknown attachment texture"))?;
            views.push(texture.view(
                &self.core,
                crate::texture::ImageViewSubrange {
                    base_mip: 0,
                    num_mips: 1,
                    base_layer: 0,
                    num_layers: 1,
                },
            )?);
        }

        let handle = unsafe {
            self.core.create_framebuffer(
                &vk::FramebufferCreateInfo::builder()
                    .render_pass(pass.handle)
                    .attachments(&views)
                    .width(width)
                    .height(height)
                    .layers(1),
                None,
            )
        }?;

        Ok(self
            .frame_buffers
            .lock()
            .unwrap()
            .insert(FrameBuffer { handle, width, height }))
    }

    pub fn destroy_frame_buffer(&self, handle: FrameBufferHandle) {
        if let Some(fb) = self.frame_buffers.lock().unwrap().remove(handle) {
            unsafe { self.core.destroy_framebuffer(fb.handle, None) };
        }
    }
}
