//! Logical device: queue, command pool, descriptor pool, memory allocator,
//! and the three global resource caches (descriptor-set-layout, pipeline-layout,
//! pipeline). Grounded in the teacher's `AshDevice`, resized to the spec's
//! classic render-pass model and fixed descriptor pool budget.

use crate::bind_set::BindSet;
use crate::buffer::Buffer;
use crate::caches::Cache;
use crate::debug::DebugMessenger;
use crate::handles::*;
use crate::instance::PhysicalDeviceInfo;
use crate::pipeline::GraphicsPipeline;
use crate::raytracing::{Blas, RayTracePipeline, Tlas};
use crate::render_pass::{FrameBuffer, RenderPass};
use crate::sampler::Sampler;
use crate::swapchain::SwapChain;
use crate::texture::Texture;
use crate::Result;
use ash::vk;
use slotmap::SlotMap;
use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex};

/// Descriptor pool budget from the resource-model spec: enough uniform
/// buffers and combined image samplers for a large frame graph, plus a
/// modest allotment of acceleration structures for ray tracing.
const MAX_UNIFORM_BUFFERS: u32 = 65_536;
const MAX_COMBINED_IMAGE_SAMPLERS: u32 = 65_536;
const MAX_STORAGE_IMAGES: u32 = 4_096;
const MAX_ACCELERATION_STRUCTURES: u32 = 2_048;
const MAX_DESCRIPTOR_SETS: u32 = 16_384;

pub(crate) struct RaytracingExtensions {
    pub acceleration_structure: ash::extensions::khr::AccelerationStructure,
    pub raytracing_pipeline: ash::extensions::khr::RayTracingPipeline,
    pub pipeline_properties: vk::PhysicalDeviceRayTracingPipelinePropertiesKHR,
}

#[derive(Clone, Copy)]
pub struct Queue {
    pub(crate) handle: vk::Queue,
    pub(crate) family_index: u32,
}

pub struct Device {
    physical: vk::PhysicalDevice,
    instance: ash::Instance,
    pub(crate) core: ash::Device,
    pub(crate) info: PhysicalDeviceInfo,
    pub(crate) swapchain_ext: ash::extensions::khr::Swapchain,
    pub(crate) raytracing: Option<RaytracingExtensions>,
    pub(crate) graphics_queue: Queue,
    pub(crate) command_pool: vk::CommandPool,
    pub(crate) descriptor_pool: vk::DescriptorPool,
    pub(crate) allocator: ManuallyDrop<Mutex<gpu_allocator::vulkan::Allocator>>,
    pub(crate) debug: Option<Arc<DebugMessenger>>,

    pub(crate) descriptor_set_layout_cache: Mutex<Cache<vk::DescriptorSetLayout>>,
    pub(crate) pipeline_layout_cache: Mutex<Cache<vk::PipelineLayout>>,
    pub(crate) pipeline_cache: Mutex<Cache<vk::Pipeline>>,

    pub(crate) vertex_buffers: Mutex<SlotMap<VertexBufferHandle, Buffer>>,
    pub(crate) index_buffers: Mutex<SlotMap<IndexBufferHandle, Buffer>>,
    pub(crate) uniform_buffers: Mutex<SlotMap<UniformBufferHandle, Buffer>>,
    pub(crate) textures: Mutex<SlotMap<TextureHandle, Texture>>,
    pub(crate) samplers: Mutex<SlotMap<SamplerHandle, Sampler>>,
    pub(crate) bind_sets: Mutex<SlotMap<BindSetHandle, BindSet>>,
    pub(crate) graphics_pipelines: Mutex<SlotMap<GraphicsPipelineHandle, GraphicsPipeline>>,
    pub(crate) raytrace_pipelines: Mutex<SlotMap<RayTracePipelineHandle, RayTracePipeline>>,
    pub(crate) blas: Mutex<SlotMap<BlasHandle, Blas>>,
    pub(crate) tlas: Mutex<SlotMap<TlasHandle, Tlas>>,
    pub(crate) render_passes: Mutex<SlotMap<RenderPassHandle, RenderPass>>,
    pub(crate) frame_buffers: Mutex<SlotMap<FrameBufferHandle, FrameBuffer>>,
    pub(crate) swap_chains: Mutex<SlotMap<SwapChainHandle, SwapChain>>,
    pub(crate) shaders: Mutex<SlotMap<ShaderHandle, vk::ShaderModule>>,
    pub(crate) command_buffers: Mutex<SlotMap<CommandBufferHandle, crate::command_buffer::CommandBuffer>>,
}

impl Device {
    pub(crate) fn new(
        instance: &ash::Instance,
        physical: vk::PhysicalDevice,
        graphics_queue_family_index: u32,
        info: PhysicalDeviceInfo,
        debug: Option<Arc<DebugMessenger>>,
    ) -> Result<Self> {
        let queue_create_infos = [vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(graphics_queue_family_index)
            .queue_priorities(&[1.0])
            .build()];

        let mut device_extension_names_raw = vec![ash::extensions::khr::Swapchain::name().as_ptr()];
        if info.raytracing_supported {
            device_extension_names_raw.push(ash::extensions::khr::AccelerationStructure::name().as_ptr());
            device_extension_names_raw.push(ash::extensions::khr::RayTracingPipeline::name().as_ptr());
            device_extension_names_raw.push(ash::extensions::khr::DeferredHostOperations::name().as_ptr());
        }

        let mut vulkan_12_features = vk::PhysicalDeviceVulkan12Features::builder()
            .buffer_device_address(info.raytracing_supported)
            .build();
        let mut vulkan_13_features = vk::PhysicalDeviceVulkan13Features::builder()
            .synchronization2(true)
            .build();
        let mut accel_structure_features =
            vk::PhysicalDeviceAccelerationStructureFeaturesKHR::builder()
                .acceleration_structure(true)
                .build();
        let mut raytracing_pipeline_features =
            vk::PhysicalDeviceRayTracingPipelineFeaturesKHR::builder()
                .ray_tracing_pipeline(true)
                .build();

        let features = vk::PhysicalDeviceFeatures::builder()
            .sampler_anisotropy(true)
            .sample_rate_shading(true)
            .build();

        let mut create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&device_extension_names_raw)
            .enabled_features(&features)
            .push_next(&mut vulkan_12_features)
            .push_next(&mut vulkan_13_features);

        if info.raytracing_supported {
            create_info = create_info
                .push_next(&mut accel_structure_features)
                .push_next(&mut raytracing_pipeline_features);
        }

        let core = unsafe { instance.create_device(physical, &create_info, None) }?;

        let swapchain_ext = ash::extensions::khr::Swapchain::new(instance, &core);

        let raytracing = if info.raytracing_supported {
            let acceleration_structure = ash::extensions::khr::AccelerationStructure::new(instance, &core);
            let raytracing_pipeline = ash::extensions::khr::RayTracingPipeline::new(instance, &core);

            let mut pipeline_properties =
                vk::PhysicalDeviceRayTracingPipelinePropertiesKHR::default();
            let mut properties2 =
                vk::PhysicalDeviceProperties2::builder().push_next(&mut pipeline_properties);
            unsafe { instance.get_physical_device_properties2(physical, &mut properties2) };

            Some(RaytracingExtensions {
                acceleration_structure,
                raytracing_pipeline,
                pipeline_properties,
            })
        } else {
            None
        };

        let graphics_queue = Queue {
            handle: unsafe { core.get_device_queue(graphics_queue_family_index, 0) },
            family_index: graphics_queue_family_index,
        };

        let command_pool = unsafe {
            core.create_command_pool(
                &vk::CommandPoolCreateInfo::builder()
                    .queue_family_index(graphics_queue_family_index)
                    .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER),
                None,
            )
        }?;

        let mut pool_sizes = vec![
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: MAX_UNIFORM_BUFFERS,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: MAX_COMBINED_IMAGE_SAMPLERS,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_IMAGE,
                descriptor_count: MAX_STORAGE_IMAGES,
            },
        ];
        if info.raytracing_supported {
            pool_sizes.push(vk::DescriptorPoolSize {
                ty: vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
                descriptor_count: MAX_ACCELERATION_STRUCTURES,
            });
        }

        let descriptor_pool = unsafe {
            core.create_descriptor_pool(
                &vk::DescriptorPoolCreateInfo::builder()
                    .max_sets(MAX_DESCRIPTOR_SETS)
                    .pool_sizes(&pool_sizes)
                    .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET),
                None,
            )
        }?;

        let allocator = ManuallyDrop::new(Mutex::new(gpu_allocator::vulkan::Allocator::new(
            &gpu_allocator::vulkan::AllocatorCreateDesc {
                instance: instance.clone(),
                device: core.clone(),
                physical_device: physical,
                debug_settings: gpu_allocator::AllocatorDebugSettings::default(),
                buffer_device_address: info.raytracing_supported,
            },
        )?));

        Ok(Self {
            physical,
            instance: instance.clone(),
            core,
            info,
            swapchain_ext,
            raytracing,
            graphics_queue,
            command_pool,
            descriptor_pool,
            allocator,
            debug,
            descriptor_set_layout_cache: Mutex::new(Cache::new()),
            pipeline_layout_cache: Mutex::new(Cache::new()),
            pipeline_cache: Mutex::new(Cache::new()),

            vertex_buffers: Mutex::new(SlotMap::with_key()),
            index_buffers: Mutex::new(SlotMap::with_key()),
            uniform_buffers: Mutex::new(SlotMap::with_key()),
            textures: Mutex::new(SlotMap::with_key()),
            samplers: Mutex::new(SlotMap::with_key()),
            bind_sets: Mutex::new(SlotMap::with_key()),
            graphics_pipelines: Mutex::new(SlotMap::with_key()),
            raytrace_pipelines: Mutex::new(SlotMap::with_key()),
            blas: Mutex::new(SlotMap::with_key()),
            tlas: Mutex::new(SlotMap::with_key()),
            render_passes: Mutex::new(SlotMap::with_key()),
            frame_buffers: Mutex::new(SlotMap::with_key()),
            swap_chains: Mutex::new(SlotMap::with_key()),
            shaders: Mutex::new(SlotMap::with_key()),
            command_buffers: Mutex::new(SlotMap::with_key()),
        })
    }

    /// Loads a pre-compiled SPIR-V (or SPIR-V-like IL) module. Shader
    /// compilation itself is an external capability; the device only ever
    /// consumes the compiled blob.
    pub fn create_shader(&self, il_code: &[u32]) -> Result<ShaderHandle> {
        let handle = unsafe {
            self.core
                .create_shader_module(&vk::ShaderModuleCreateInfo::builder().code(il_code), None)
        }?;
        Ok(self.shaders.lock().unwrap().insert(handle))
    }

    pub fn destroy_shader(&self, handle: ShaderHandle) {
        if let Some(module) = self.shaders.lock().unwrap().remove(handle) {
            unsafe { self.core.destroy_shader_module(module, None) };
        }
    }

    pub fn raytracing_supported(&self) -> bool {
        self.raytracing.is_some()
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Full device idle, per spec.md `wait()`.
    pub fn wait(&self) -> Result<()> {
        unsafe { self.core.device_wait_idle() }?;
        Ok(())
    }

    /// Allocates a transient command buffer, records `record` into it, and
    /// submits + waits synchronously. Used for one-off transfer and
    /// acceleration-structure build commands that don't warrant a full
    /// [`crate::command_buffer::CommandBuffer`].
    pub(crate) fn one_shot(&self, record: impl FnOnce(vk::CommandBuffer)) -> Result<()> {
        let cb = unsafe {
            self.core.allocate_command_buffers(
                &vk::CommandBufferAllocateInfo::builder()
                    .command_pool(self.command_pool)
                    .level(vk::CommandBufferLevel::PRIMARY)
                    .command_buffer_count(1),
            )
        }?[0];

        unsafe {
            self.core.begin_command_buffer(
                cb,
                &vk::CommandBufferBeginInfo::builder()
                    .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
            )
        }?;

        record(cb);

        unsafe { self.core.end_command_buffer(cb) }?;

        let fence = unsafe { self.core.create_fence(&vk::FenceCreateInfo::builder(), None) }?;
        let cbs = [cb];
        let submit = vk::SubmitInfo::builder().command_buffers(&cbs);
        let result = unsafe {
            self.core
                .queue_submit(self.graphics_queue.handle, &[submit.build()], fence)
                .and_then(|_| self.core.wait_for_fences(&[fence], true, u64::MAX))
        };

        unsafe {
            self.core.destroy_fence(fence, None);
            self.core.free_command_buffers(self.command_pool, &cbs);
        }

        result?;
        Ok(())
    }

    pub(crate) fn set_object_name<T: vk::Handle>(&self, object: T, name: &str) {
        if let Some(debug) = &self.debug {
            debug.set_object_name(self.core.handle(), object, name);
        }
    }

    pub(crate) fn physical_handle(&self) -> vk::PhysicalDevice {
        self.physical
    }

    pub(crate) fn instance_handle(&self) -> &ash::Instance {
        &self.instance
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            let _ = self.core.device_wait_idle();

            let command_buffers: Vec<_> = self.command_buffers.get_mut().unwrap().drain().collect();
            for (_, cb) in command_buffers {
                cb.destroy(self);
            }
            let swap_chains: Vec<_> = self.swap_chains.get_mut().unwrap().drain().collect();
            for (_, swap_chain) in swap_chains {
                swap_chain.destroy(self);
            }
            for (_, fb) in self.frame_buffers.get_mut().unwrap().drain() {
                self.core.destroy_framebuffer(fb.handle, None);
            }
            for (_, pass) in self.render_passes.get_mut().unwrap().drain() {
                self.core.destroy_render_pass(pass.handle, None);
            }
            let tlas_entries: Vec<_> = self.tlas.get_mut().unwrap().drain().collect();
            for (_, tlas) in tlas_entries {
                tlas.destroy(self);
            }
            let blas_entries: Vec<_> = self.blas.get_mut().unwrap().drain().collect();
            for (_, blas) in blas_entries {
                blas.destroy(self);
            }
            let rt_pipelines: Vec<_> = self.raytrace_pipelines.get_mut().unwrap().drain().collect();
            for (_, rt_pipeline) in rt_pipelines {
                rt_pipeline.destroy(self);
            }
            for (_, module) in self.shaders.get_mut().unwrap().drain() {
                self.core.destroy_shader_module(module, None);
            }
            for (_, sampler) in self.samplers.get_mut().unwrap().drain() {
                self.core.destroy_sampler(sampler.handle, None);
            }

            for layout in self.descriptor_set_layout_cache.get_mut().unwrap().clear() {
                self.core.destroy_descriptor_set_layout(layout, None);
            }
            for layout in self.pipeline_layout_cache.get_mut().unwrap().clear() {
                self.core.destroy_pipeline_layout(layout, None);
            }
            for pipeline in self.pipeline_cache.get_mut().unwrap().clear() {
                self.core.destroy_pipeline(pipeline, None);
            }

            for (_, texture) in self.textures.get_mut().unwrap().drain() {
                texture.destroy(&self.core, self.allocator.get_mut().unwrap());
            }
            for (_, buffer) in self.vertex_buffers.get_mut().unwrap().drain() {
                buffer.destroy(&self.core, self.allocator.get_mut().unwrap());
            }
            for (_, buffer) in self.index_buffers.get_mut().unwrap().drain() {
                buffer.destroy(&self.core, self.allocator.get_mut().unwrap());
            }
            for (_, buffer) in self.uniform_buffers.get_mut().unwrap().drain() {
                buffer.destroy(&self.core, self.allocator.get_mut().unwrap());
            }

            ManuallyDrop::drop(&mut self.allocator);

            self.core.destroy_descriptor_pool(self.descriptor_pool, None);
            self.core.destroy_command_pool(self.command_pool, None);
            self.core.destroy_device(None);
        }
    }
}
