//! Presentation surface + N images + per-image semaphores + a dummy render
//! pass used only for the acquire/present synchronization path.
//!
//! State machine: `FRESH -> (acquire) IMAGE_OWNED[i] -> (present) FRESH`.
//! Resize is destroy+recreate, not in-place resizing.

use crate::device::{Device, Queue};
use crate::format::{Format, LoadOp, StoreOp};
use crate::handles::{RenderPassHandle, SwapChainHandle};
use crate::instance::Surface;
use crate::{Error, Result};
use ash::vk;

const PREFERRED_IMAGE_COUNT: u32 = 3;
const MIN_IMAGE_COUNT: u32 = 2;
const MAX_IMAGE_COUNT: u32 = 8;

enum AcquireState {
    Fresh,
    ImageOwned(u32),
}

pub struct SwapChain {
    pub(crate) handle: vk::SwapchainKHR,
    pub(crate) format: Format,
    pub(crate) extent: vk::Extent2D,
    pub(crate) present_queue: Queue,
    pub(crate) render_pass: RenderPassHandle,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    framebuffers: Vec<vk::Framebuffer>,
    image_available_semaphores: Vec<vk::Semaphore>,
    render_finished_semaphores: Vec<vk::Semaphore>,
    image_fences: Vec<vk::Fence>,
    state: AcquireState,
    frame_index: usize,
}

impl SwapChain {
    pub(crate) fn destroy(self, device: &Device) {
        unsafe {
            for framebuffer in &self.framebuffers {
                device.core.destroy_framebuffer(*framebuffer, None);
            }
            for view in &self.views {
                device.core.destroy_image_view(*view, None);
            }
            for semaphore in self.image_available_semaphores.iter().chain(&self.render_finished_semaphores) {
                device.core.destroy_semaphore(*semaphore, None);
            }
            for fence in &self.image_fences {
                device.core.destroy_fence(*fence, None);
            }
            device.swapchain_ext.destroy_swapchain(self.handle, None);
        }
        device.destroy_render_pass(self.render_pass);
    }
}

fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    formats
        .iter()
        .find(|f| f.format == vk::Format::B8G8R8A8_SRGB && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
        .copied()
        .unwrap_or_else(|| formats[0])
}

/// The core's `Format` enum has no sRGB-encoding bit of its own; swapchain
/// images are only ever targeted by the dummy render pass, never sampled
/// through the texture cache, so the nearest linear layout is close enough.
fn format_from_surface_format(format: vk::Format) -> Format {
    match format {
        vk::Format::B8G8R8A8_SRGB | vk::Format::B8G8R8A8_UNORM => Format::B8G8R8A8Unorm,
        vk::Format::R8G8B8A8_SRGB | vk::Format::R8G8B8A8_UNORM => Format::R8G8B8A8Unorm,
        _ => Format::B8G8R8A8Unorm,
    }
}

fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

fn find_present_queue_family(
    instance: &ash::Instance,
    surface_ext: &ash::extensions::khr::Surface,
    physical: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    graphics_family: u32,
) -> Result<u32> {
    let properties = unsafe { instance.get_physical_device_queue_family_properties(physical) };
    unsafe {
        if surface_ext.get_physical_device_surface_support(physical, graphics_family, surface)? {
            return Ok(graphics_family);
        }
    }
    for (index, _) in properties.iter().enumerate() {
        let index = index as u32;
        if unsafe { surface_ext.get_physical_device_surface_support(physical, index, surface)? } {
            return Ok(index);
        }
    }
    Err(Error::other("no queue family supports presentation to this surface"))
}

impl Device {
    pub fn create_swap_chain(&self, surface: &Surface, width: u32, height: u32) -> Result<SwapChainHandle> {
        let surface_ext = surface.surface_ext();
        let physical = self.physical_handle();
        let surface_handle = surface.handle();

        let capabilities =
            unsafe { surface_ext.get_physical_device_surface_capabilities(physical, surface_handle) }?;
        let formats = unsafe { surface_ext.get_physical_device_surface_formats(physical, surface_handle) }?;
        let present_modes =
            unsafe { surface_ext.get_physical_device_surface_present_modes(physical, surface_handle) }?;

        let surface_format = choose_surface_format(&formats);
        let present_mode = choose_present_mode(&present_modes);

        let extent = if capabilities.current_extent.width != u32::MAX {
            capabilities.current_extent
        } else {
            vk::Extent2D {
                width: width.clamp(capabilities.min_image_extent.width, capabilities.max_image_extent.width),
                height: height.clamp(capabilities.min_image_extent.height, capabilities.max_image_extent.height),
            }
        };

        let image_count = PREFERRED_IMAGE_COUNT
            .max(MIN_IMAGE_COUNT)
            .min(MAX_IMAGE_COUNT)
            .max(capabilities.min_image_count)
            .min(if capabilities.max_image_count == 0 {
                MAX_IMAGE_COUNT
            } else {
                capabilities.max_image_count
            });

        let present_family = find_present_queue_family(
            self.instance_handle(),
            surface_ext,
            physical,
            surface_handle,
            self.graphics_queue.family_index,
        )?;
        // The logical device only ever requests a queue from the graphics
        // family (Device::new), so a present family that differs from it
        // has no queue to hand back; this only arises for a surface other
        // than the one `Instance::create_device` picked this physical
        // device's present-support against.
        if present_family != self.graphics_queue.family_index {
            return Err(Error::other(
                "surface requires a present queue family not requested at device creation",
            ));
        }
        let present_queue = self.graphics_queue;

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface_handle)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let handle = unsafe { self.swapchain_ext.create_swapchain(&create_info, None) }?;
        let images = unsafe { self.swapchain_ext.get_swapchain_images(handle) }?;

        let format = format_from_surface_format(surface_format.format);
        let render_pass = self.create_swap_chain_render_pass(format, LoadOp::Clear, StoreOp::Store)?;
        let render_passes = self.render_passes.lock().unwrap();
        let vk_render_pass = render_passes.get(render_pass).unwrap().handle;
        drop(render_passes);

        let mut views = Vec::with_capacity(images.len());
        let mut framebuffers = Vec::with_capacity(images.len());
        for &image in &images {
            let view = unsafe {
                self.core.create_image_view(
                    &vk::ImageViewCreateInfo::builder()
                        .image(image)
                        .view_type(vk::ImageViewType::TYPE_2D)
                        .format(surface_format.format)
                        .subresource_range(vk::ImageSubresourceRange {
                            aspect_mask: vk::ImageAspectFlags::COLOR,
                            base_mip_level: 0,
                            level_count: 1,
                            base_array_layer: 0,
                            layer_count: 1,
                        }),
                    None,
                )
            }?;
            views.push(view);
            let attachments = [view];
            let framebuffer = unsafe {
                self.core.create_framebuffer(
                    &vk::FramebufferCreateInfo::builder()
                        .render_pass(vk_render_pass)
                        .attachments(&attachments)
                        .width(extent.width)
                        .height(extent.height)
                        .layers(1),
                    None,
                )
            }?;
            framebuffers.push(framebuffer);
        }

        let mut image_available_semaphores = Vec::with_capacity(images.len());
        let mut render_finished_semaphores = Vec::with_capacity(images.len());
        let mut image_fences = Vec::with_capacity(images.len());
        for _ in &images {
            image_available_semaphores
                .push(unsafe { self.core.create_semaphore(&vk::SemaphoreCreateInfo::builder(), None) }?);
            render_finished_semaphores
                .push(unsafe { self.core.create_semaphore(&vk::SemaphoreCreateInfo::builder(), None) }?);
            image_fences.push(unsafe {
                self.core.create_fence(
                    &vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED),
                    None,
                )
            }?);
        }

        Ok(self.swap_chains.lock().unwrap().insert(SwapChain {
            handle,
            format,
            extent,
            present_queue,
            render_pass,
            images,
            views,
            framebuffers,
            image_available_semaphores,
            render_finished_semaphores,
            image_fences,
            state: AcquireState::Fresh,
            frame_index: 0,
        }))
    }

    pub fn destroy_swap_chain(&self, handle: SwapChainHandle) {
        if let Some(swap_chain) = self.swap_chains.lock().unwrap().remove(handle) {
            swap_chain.destroy(self);
        }
    }

    pub fn swap_chain_render_pass(&self, handle: SwapChainHandle) -> Option<RenderPassHandle> {
        self.swap_chains.lock().unwrap().get(handle).map(|sc| sc.render_pass)
    }

    pub fn swap_chain_extent(&self, handle: SwapChainHandle) -> Option<(u32, u32)> {
        self.swap_chains
            .lock()
            .unwrap()
            .get(handle)
            .map(|sc| (sc.extent.width, sc.extent.height))
    }

    pub(crate) fn swap_chain_current_framebuffer(&self, handle: SwapChainHandle) -> Option<vk::Framebuffer> {
        let swap_chains = self.swap_chains.lock().unwrap();
        let sc = swap_chains.get(handle)?;
        match sc.state {
            AcquireState::ImageOwned(index) => Some(sc.framebuffers[index as usize]),
            AcquireState::Fresh => None,
        }
    }

    pub(crate) fn swap_chain_image_available_semaphore(&self, handle: SwapChainHandle) -> Option<vk::Semaphore> {
        let swap_chains = self.swap_chains.lock().unwrap();
        let sc = swap_chains.get(handle)?;
        Some(sc.image_available_semaphores[sc.frame_index])
    }

    pub(crate) fn swap_chain_render_finished_semaphore(&self, handle: SwapChainHandle) -> Option<vk::Semaphore> {
        let swap_chains = self.swap_chains.lock().unwrap();
        let sc = swap_chains.get(handle)?;
        match sc.state {
            AcquireState::ImageOwned(index) => Some(sc.render_finished_semaphores[index as usize]),
            AcquireState::Fresh => None,
        }
    }

    /// Blocks on the per-image fence before returning the acquired index.
    pub fn acquire(&self, handle: SwapChainHandle) -> Result<u32> {
        let mut swap_chains = self.swap_chains.lock().unwrap();
        let sc = swap_chains
            .get_mut(handle)
            .ok_or_else(|| Error::other("unknown swap chain"))?;

        let semaphore = sc.image_available_semaphores[sc.frame_index];
        let (image_index, _suboptimal) = unsafe {
            self.swapchain_ext
                .acquire_next_image(sc.handle, u64::MAX, semaphore, vk::Fence::null())
        }?;

        unsafe {
            self.core
                .wait_for_fences(&[sc.image_fences[image_index as usize]], true, u64::MAX)?;
            self.core.reset_fences(&[sc.image_fences[image_index as usize]])?;
        }

        sc.state = AcquireState::ImageOwned(image_index);
        sc.frame_index = (sc.frame_index + 1) % sc.image_available_semaphores.len();
        Ok(image_index)
    }

    /// Signals the presentation semaphore after `wait_semaphores` (the
    /// rendering-finished semaphores of every command buffer that targeted
    /// this frame) are reached, then presents and returns to `FRESH`.
    pub fn present(&self, handle: SwapChainHandle, wait_semaphores: &[vk::Semaphore]) -> Result<()> {
        let mut swap_chains = self.swap_chains.lock().unwrap();
        let sc = swap_chains
            .get_mut(handle)
            .ok_or_else(|| Error::other("unknown swap chain"))?;

        let image_index = match sc.state {
            AcquireState::ImageOwned(index) => index,
            AcquireState::Fresh => return Err(Error::other("present called without a matching acquire")),
        };

        let swapchains = [sc.handle];
        let image_indices = [image_index];
        unsafe {
            self.swapchain_ext.queue_present(
                sc.present_queue.handle,
                &vk::PresentInfoKHR::builder()
                    .wait_semaphores(wait_semaphores)
                    .swapchains(&swapchains)
                    .image_indices(&image_indices),
            )
        }?;

        sc.state = AcquireState::Fresh;
        Ok(())
    }
}
