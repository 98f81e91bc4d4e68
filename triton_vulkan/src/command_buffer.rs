//! Command buffer recording and submission.
//!
//! State machine: `CREATED -> (begin) RECORDING -> (end/submit) EXECUTABLE
//! or PENDING -> (wait) EXECUTABLE -> (reset) CREATED`. Calling `begin` on
//! anything but `CREATED` resets implicitly, matching the one-shot pattern
//! already used internally by `Device::one_shot`.

use crate::device::Device;
use crate::handles::{
    CommandBufferHandle, FrameBufferHandle, GraphicsPipelineHandle, IndexBufferHandle,
    RayTracePipelineHandle, RenderPassHandle, SwapChainHandle, VertexBufferHandle,
};
use crate::{Error, Result};
use ash::vk;

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Created,
    Recording,
    Executable,
    Pending,
}

pub enum RenderTarget {
    FrameBuffer(FrameBufferHandle),
    SwapChain(SwapChainHandle),
}

pub struct CommandBuffer {
    pub(crate) handle: vk::CommandBuffer,
    state: State,
    fence: vk::Fence,
    signal_semaphore: vk::Semaphore,
    active_render_pass: Option<RenderPassHandle>,
}

impl CommandBuffer {
    pub(crate) fn destroy(self, device: &Device) {
        unsafe {
            device.core.destroy_fence(self.fence, None);
            device.core.destroy_semaphore(self.signal_semaphore, None);
            device.core.free_command_buffers(device.command_pool, &[self.handle]);
        }
    }
}

impl Device {
    pub fn create_command_buffer(&self) -> Result<CommandBufferHandle> {
        let handle = unsafe {
            self.core.allocate_command_buffers(
                &vk::CommandBufferAllocateInfo::builder()
                    .command_pool(self.command_pool)
                    .level(vk::CommandBufferLevel::PRIMARY)
                    .command_buffer_count(1),
            )
        }?[0];

        let fence = unsafe {
            self.core.create_fence(
                &vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED),
                None,
            )
        }?;
        let signal_semaphore =
            unsafe { self.core.create_semaphore(&vk::SemaphoreCreateInfo::builder(), None) }?;

        Ok(self.command_buffers.lock().unwrap().insert(CommandBuffer {
            handle,
            state: State::Created,
            fence,
            signal_semaphore,
            active_render_pass: None,
        }))
    }

    pub fn destroy_command_buffer(&self, handle: CommandBufferHandle) {
        if let Some(cb) = self.command_buffers.lock().unwrap().remove(handle) {
            cb.destroy(self);
        }
    }

    /// Resets (if not already `CREATED`) and begins recording.
    pub fn begin(&self, handle: CommandBufferHandle) -> Result<()> {
        let mut cbs = self.command_buffers.lock().unwrap();
        let cb = cbs
            .get_mut(handle)
            .ok_or_else(|| Error::other("unknown command buffer"))?;

        if cb.state != State::Created {
            unsafe { self.core.reset_command_buffer(cb.handle, vk::CommandBufferResetFlags::empty()) }?;
        }

        unsafe {
            self.core.begin_command_buffer(
                cb.handle,
                &vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
            )
        }?;
        cb.state = State::Recording;
        cb.active_render_pass = None;
        Ok(())
    }

    pub fn begin_render_pass(
        &self,
        cb_handle: CommandBufferHandle,
        render_pass: RenderPassHandle,
        target: RenderTarget,
        clear_values: &[vk::ClearValue],
    ) -> Result<()> {
        let (framebuffer, width, height) = match target {
            RenderTarget::FrameBuffer(fb_handle) => {
                let frame_buffers = self.frame_buffers.lock().unwrap();
                let fb = frame_buffers
                    .get(fb_handle)
                    .ok_or_else(|| Error::other("unknown frame buffer"))?;
                (fb.handle, fb.width, fb.height)
            }
            RenderTarget::SwapChain(sc_handle) => {
                let framebuffer = self
                    .swap_chain_current_framebuffer(sc_handle)
                    .ok_or_else(|| Error::other("swap chain has no acquired image"))?;
                let (width, height) = self
                    .swap_chain_extent(sc_handle)
                    .ok_or_else(|| Error::other("unknown swap chain"))?;
                (framebuffer, width, height)
            }
        };

        let render_passes = self.render_passes.lock().unwrap();
        let vk_render_pass = render_passes
            .get(render_pass)
            .ok_or_else(|| Error::other("unknown render pass"))?
            .handle;
        drop(render_passes);

        let mut cbs = self.command_buffers.lock().unwrap();
        let cb = cbs
            .get_mut(cb_handle)
            .ok_or_else(|| Error::other("unknown command buffer"))?;
        if cb.state != State::Recording {
            return Err(Error::other("begin_render_pass called outside of recording"));
        }

        let render_area = vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent: vk::Extent2D { width, height },
        };

        unsafe {
            self.core.cmd_begin_render_pass(
                cb.handle,
                &vk::RenderPassBeginInfo::builder()
                    .render_pass(vk_render_pass)
                    .framebuffer(framebuffer)
                    .render_area(render_area)
                    .clear_values(clear_values),
                vk::SubpassContents::INLINE,
            );
            self.core.cmd_set_viewport(
                cb.handle,
                0,
                &[vk::Viewport {
                    x: 0.0,
                    y: 0.0,
                    width: width as f32,
                    height: height as f32,
                    min_depth: 0.0,
                    max_depth: 1.0,
                }],
            );
            self.core.cmd_set_scissor(cb.handle, 0, &[render_area]);
        }
        cb.active_render_pass = Some(render_pass);
        Ok(())
    }

    pub fn end_render_pass(&self, cb_handle: CommandBufferHandle) -> Result<()> {
        let mut cbs = self.command_buffers.lock().unwrap();
        let cb = cbs
            .get_mut(cb_handle)
            .ok_or_else(|| Error::other("unknown command buffer"))?;
        if cb.active_render_pass.take().is_none() {
            return Err(Error::other("end_render_pass called without a matching begin_render_pass"));
        }
        unsafe { self.core.cmd_end_render_pass(cb.handle) };
        Ok(())
    }

    /// Flushes the pipeline's bind sets and the pipeline itself, binds vertex
    /// streams / index buffer / descriptor sets / push constants, and draws.
    /// `vertex_buffers` must supply one buffer per vertex stream the pipeline
    /// declares, in stream order.
    pub fn draw_indexed_primitive_instanced(
        &self,
        cb_handle: CommandBufferHandle,
        pipeline_handle: GraphicsPipelineHandle,
        vertex_buffers: &[VertexBufferHandle],
        index_buffer: IndexBufferHandle,
        num_indices: u32,
        base_index: u32,
        base_vertex: i32,
        num_instances: u32,
        base_instance: u32,
    ) -> Result<()> {
        let vk_pipeline = self.flush_graphics_pipeline(pipeline_handle)?;
        let bind_sets = self.graphics_pipeline_bind_sets(pipeline_handle);
        for bind_set in &bind_sets {
            self.flush_bind_set(*bind_set)?;
        }

        let expected_streams = self.graphics_pipeline_vertex_stream_count(pipeline_handle);
        if vertex_buffers.len() != expected_streams {
            return Err(Error::other("vertex buffer count does not match pipeline vertex stream count"));
        }

        let layout = self
            .graphics_pipeline_layout(pipeline_handle)
            .ok_or_else(|| Error::other("graphics pipeline has no layout"))?;
        let descriptor_sets: Vec<vk::DescriptorSet> = bind_sets
            .iter()
            .filter_map(|s| self.bind_set_descriptor(*s))
            .collect();
        let push_constants = self.graphics_pipeline_push_constants(pipeline_handle);

        let vk_vertex_buffers: Vec<vk::Buffer> = {
            let buffers = self.vertex_buffers.lock().unwrap();
            vertex_buffers
                .iter()
                .map(|h| buffers.get(*h).map(|b| b.handle).ok_or_else(|| Error::other("unknown vertex buffer")))
                .collect::<Result<_>>()?
        };
        let vk_index_buffer = {
            let buffers = self.index_buffers.lock().unwrap();
            buffers
                .get(index_buffer)
                .map(|b| b.handle)
                .ok_or_else(|| Error::other("unknown index buffer"))?
        };

        let mut cbs = self.command_buffers.lock().unwrap();
        let cb = cbs
            .get_mut(cb_handle)
            .ok_or_else(|| Error::other("unknown command buffer"))?;
        if cb.state != State::Recording {
            return Err(Error::other("draw called outside of recording"));
        }
        let vk_cb = cb.handle;
        drop(cbs);

        unsafe {
            self.core.cmd_bind_pipeline(vk_cb, vk::PipelineBindPoint::GRAPHICS, vk_pipeline);
            if !descriptor_sets.is_empty() {
                self.core
                    .cmd_bind_descriptor_sets(vk_cb, vk::PipelineBindPoint::GRAPHICS, layout, 0, &descriptor_sets, &[]);
            }
            if let Some(data) = &push_constants {
                self.core.cmd_push_constants(vk_cb, layout, vk::ShaderStageFlags::ALL, 0, data);
            }
            if !vk_vertex_buffers.is_empty() {
                let offsets = vec![0u64; vk_vertex_buffers.len()];
                self.core.cmd_bind_vertex_buffers(vk_cb, 0, &vk_vertex_buffers, &offsets);
            }
            self.core.cmd_bind_index_buffer(vk_cb, vk_index_buffer, 0, vk::IndexType::UINT32);
            self.core
                .cmd_draw_indexed(vk_cb, num_indices, num_instances, base_index, base_vertex, base_instance);
        }
        Ok(())
    }

    /// Same flush/bind sequence as [`Device::draw_indexed_primitive_instanced`]
    /// but with no index buffer, for vertex-pulling draws (a fullscreen
    /// triangle with no bound vertex buffers at all is the common case).
    pub fn draw_primitive_instanced(
        &self,
        cb_handle: CommandBufferHandle,
        pipeline_handle: GraphicsPipelineHandle,
        vertex_buffers: &[VertexBufferHandle],
        num_vertices: u32,
        base_vertex: u32,
        num_instances: u32,
        base_instance: u32,
    ) -> Result<()> {
        let vk_pipeline = self.flush_graphics_pipeline(pipeline_handle)?;
        let bind_sets = self.graphics_pipeline_bind_sets(pipeline_handle);
        for bind_set in &bind_sets {
            self.flush_bind_set(*bind_set)?;
        }

        let expected_streams = self.graphics_pipeline_vertex_stream_count(pipeline_handle);
        if vertex_buffers.len() != expected_streams {
            return Err(Error::other("vertex buffer count does not match pipeline vertex stream count"));
        }

        let layout = self
            .graphics_pipeline_layout(pipeline_handle)
            .ok_or_else(|| Error::other("graphics pipeline has no layout"))?;
        let descriptor_sets: Vec<vk::DescriptorSet> = bind_sets
            .iter()
            .filter_map(|s| self.bind_set_descriptor(*s))
            .collect();
        let push_constants = self.graphics_pipeline_push_constants(pipeline_handle);

        let vk_vertex_buffers: Vec<vk::Buffer> = {
            let buffers = self.vertex_buffers.lock().unwrap();
            vertex_buffers
                .iter()
                .map(|h| buffers.get(*h).map(|b| b.handle).ok_or_else(|| Error::other("unknown vertex buffer")))
                .collect::<Result<_>>()?
        };

        let mut cbs = self.command_buffers.lock().unwrap();
        let cb = cbs
            .get_mut(cb_handle)
            .ok_or_else(|| Error::other("unknown command buffer"))?;
        if cb.state != State::Recording {
            return Err(Error::other("draw called outside of recording"));
        }
        let vk_cb = cb.handle;
        drop(cbs);

        unsafe {
            self.core.cmd_bind_pipeline(vk_cb, vk::PipelineBindPoint::GRAPHICS, vk_pipeline);
            if !descriptor_sets.is_empty() {
                self.core
                    .cmd_bind_descriptor_sets(vk_cb, vk::PipelineBindPoint::GRAPHICS, layout, 0, &descriptor_sets, &[]);
            }
            if let Some(data) = &push_constants {
                self.core.cmd_push_constants(vk_cb, layout, vk::ShaderStageFlags::ALL, 0, data);
            }
            if !vk_vertex_buffers.is_empty() {
                let offsets = vec![0u64; vk_vertex_buffers.len()];
                self.core.cmd_bind_vertex_buffers(vk_cb, 0, &vk_vertex_buffers, &offsets);
            }
            self.core.cmd_draw(vk_cb, num_vertices, num_instances, base_vertex, base_instance);
        }
        Ok(())
    }

    /// Delegates to [`Device::trace_rays`] after checking recording state.
    pub fn cmd_trace_rays(
        &self,
        cb_handle: CommandBufferHandle,
        pipeline: RayTracePipelineHandle,
        width: u32,
        height: u32,
        depth: u32,
        raygen_index: u32,
    ) -> Result<()> {
        let cbs = self.command_buffers.lock().unwrap();
        let cb = cbs
            .get(cb_handle)
            .ok_or_else(|| Error::other("unknown command buffer"))?;
        if cb.state != State::Recording {
            return Err(Error::other("trace_rays called outside of recording"));
        }
        let vk_cb = cb.handle;
        drop(cbs);
        self.trace_rays(vk_cb, pipeline, width, height, depth, raygen_index)
    }

    fn submit(
        &self,
        cb_handle: CommandBufferHandle,
        wait_semaphores: &[vk::Semaphore],
        wait_stages: &[vk::PipelineStageFlags],
        extra_signal_semaphores: &[vk::Semaphore],
    ) -> Result<()> {
        let mut cbs = self.command_buffers.lock().unwrap();
        let cb = cbs
            .get_mut(cb_handle)
            .ok_or_else(|| Error::other("unknown command buffer"))?;

        if cb.state == State::Recording {
            if cb.active_render_pass.take().is_some() {
                unsafe { self.core.cmd_end_render_pass(cb.handle) };
            }
            unsafe { self.core.end_command_buffer(cb.handle) }?;
            cb.state = State::Executable;
        }
        if cb.state != State::Executable {
            return Err(Error::other("command buffer is not in a submittable state"));
        }

        unsafe { self.core.reset_fences(&[cb.fence]) }?;

        let mut signal_semaphores = vec![cb.signal_semaphore];
        signal_semaphores.extend_from_slice(extra_signal_semaphores);

        let command_buffers = [cb.handle];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(wait_semaphores)
            .wait_dst_stage_mask(wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.core
                .queue_submit(self.graphics_queue.handle, &[submit_info.build()], cb.fence)
        }?;
        cb.state = State::Pending;
        Ok(())
    }

    /// Ends recording (if still open) and submits with no cross-command-buffer
    /// synchronization.
    pub fn submit_command_buffer(&self, cb_handle: CommandBufferHandle) -> Result<()> {
        self.submit(cb_handle, &[], &[], &[])
    }

    /// Submits waiting on `swap_chain`'s image-available semaphore, signalling
    /// its render-finished semaphore (the one `Device::present` waits on).
    pub fn submit_syncked_to_swap_chain(&self, cb_handle: CommandBufferHandle, swap_chain: SwapChainHandle) -> Result<()> {
        let wait = self
            .swap_chain_image_available_semaphore(swap_chain)
            .ok_or_else(|| Error::other("swap chain has no acquired image"))?;
        let signal = self
            .swap_chain_render_finished_semaphore(swap_chain)
            .ok_or_else(|| Error::other("swap chain has no acquired image"))?;
        self.submit(
            cb_handle,
            &[wait],
            &[vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
            &[signal],
        )
    }

    /// Submits after waiting on the completion semaphore of every command
    /// buffer in `wait_on`.
    pub fn submit_syncked_after(&self, cb_handle: CommandBufferHandle, wait_on: &[CommandBufferHandle]) -> Result<()> {
        let wait_semaphores: Vec<vk::Semaphore> = {
            let cbs = self.command_buffers.lock().unwrap();
            wait_on.iter().filter_map(|h| cbs.get(*h).map(|cb| cb.signal_semaphore)).collect()
        };
        let wait_stages = vec![vk::PipelineStageFlags::TOP_OF_PIPE; wait_semaphores.len()];
        self.submit(cb_handle, &wait_semaphores, &wait_stages, &[])
    }

    /// Blocks until this command buffer's fence is signalled, then returns it
    /// to `EXECUTABLE` so it can be resubmitted without a fresh `begin`.
    pub fn wait_command_buffer(&self, cb_handle: CommandBufferHandle) -> Result<()> {
        let mut cbs = self.command_buffers.lock().unwrap();
        let cb = cbs
            .get_mut(cb_handle)
            .ok_or_else(|| Error::other("unknown command buffer"))?;
        if cb.state != State::Pending {
            return Ok(());
        }
        unsafe { self.core.wait_for_fences(&[cb.fence], true, u64::MAX) }?;
        cb.state = State::Executable;
        Ok(())
    }

    pub fn reset_command_buffer(&self, cb_handle: CommandBufferHandle) -> Result<()> {
        let mut cbs = self.command_buffers.lock().unwrap();
        let cb = cbs
            .get_mut(cb_handle)
            .ok_or_else(|| Error::other("unknown command buffer"))?;
        unsafe { self.core.reset_command_buffer(cb.handle, vk::CommandBufferResetFlags::empty()) }?;
        cb.state = State::Created;
        cb.active_render_pass = None;
        Ok(())
    }
}
