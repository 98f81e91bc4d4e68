//! Bottom/top-level acceleration structures and the raygen/hit/miss pipeline
//! + shader binding table, gated entirely on `Device::raytracing_supported`.

use crate::buffer::Buffer;
use crate::device::Device;
use crate::handles::{BlasHandle, IndexBufferHandle, RayTracePipelineHandle, ShaderHandle, TlasHandle, VertexBufferHandle};
use crate::{Error, Result};
use ash::vk;
use gpu_allocator::MemoryLocation;

/// One triangle-geometry input to a bottom-level acceleration structure.
pub struct TriangleGeometry {
    pub vertex_buffer: VertexBufferHandle,
    pub vertex_stride: u64,
    pub vertex_count: u32,
    pub index_buffer: IndexBufferHandle,
    pub index_count: u32,
}

pub struct Blas {
    pub(crate) handle: vk::AccelerationStructureKHR,
    pub(crate) buffer: Buffer,
    pub(crate) device_address: vk::DeviceAddress,
}

impl Blas {
    pub(crate) fn destroy(self, device: &Device) {
        let Some(ext) = &device.raytracing else { return };
        unsafe { ext.acceleration_structure.destroy_acceleration_structure(self.handle, None) };
        self.buffer.destroy(&device.core, &device.allocator);
    }
}

/// A single BLAS instance placed in a top-level acceleration structure.
pub struct BlasInstance {
    pub blas: BlasHandle,
    pub transform: [f32; 12],
    pub instance_custom_index: u32,
    pub mask: u8,
}

pub struct Tlas {
    pub(crate) handle: vk::AccelerationStructureKHR,
    pub(crate) buffer: Buffer,
}

impl Tlas {
    pub(crate) fn destroy(self, device: &Device) {
        let Some(ext) = &device.raytracing else { return };
        unsafe { ext.acceleration_structure.destroy_acceleration_structure(self.handle, None) };
        self.buffer.destroy(&device.core, &device.allocator);
    }
}

/// A raygen/miss/hit shader table plus the materialized pipeline. Recursion
/// depth is fixed at 1: hit and miss shaders may not trace further rays.
pub struct RayTracePipeline {
    raygen_shaders: Vec<ShaderHandle>,
    miss_shaders: Vec<ShaderHandle>,
    hit_groups: Vec<(Option<ShaderHandle>, Option<ShaderHandle>, Option<ShaderHandle>)>,
    pipeline: Option<vk::Pipeline>,
    layout: Option<vk::PipelineLayout>,
    sbt_buffer: Option<Buffer>,
    last_key: Option<u64>,
    raygen_region: vk::StridedDeviceAddressRegionKHR,
    miss_region: vk::StridedDeviceAddressRegionKHR,
    hit_region: vk::StridedDeviceAddressRegionKHR,
}

impl Default for RayTracePipeline {
    fn default() -> Self {
        Self {
            raygen_shaders: Vec::new(),
            miss_shaders: Vec::new(),
            hit_groups: Vec::new(),
            pipeline: None,
            layout: None,
            sbt_buffer: None,
            last_key: None,
            raygen_region: vk::StridedDeviceAddressRegionKHR::default(),
            miss_region: vk::StridedDeviceAddressRegionKHR::default(),
            hit_region: vk::StridedDeviceAddressRegionKHR::default(),
        }
    }
}

impl RayTracePipeline {
    pub fn push_raygen_shader(&mut self, shader: ShaderHandle) {
        self.raygen_shaders.push(shader);
    }

    pub fn push_miss_shader(&mut self, shader: ShaderHandle) {
        self.miss_shaders.push(shader);
    }

    pub fn push_hit_group(
        &mut self,
        intersection: Option<ShaderHandle>,
        any_hit: Option<ShaderHandle>,
        closest_hit: Option<ShaderHandle>,
    ) {
        self.hit_groups.push((intersection, any_hit, closest_hit));
    }

    pub(crate) fn destroy(self, device: &Device) {
        if let Some(layout) = self.layout {
            unsafe { device.core.destroy_pipeline_layout(layout, None) };
        }
        if let Some(pipeline) = self.pipeline {
            unsafe { device.core.destroy_pipeline(pipeline, None) };
        }
        if let Some(buffer) = self.sbt_buffer {
            buffer.destroy(&device.core, &device.allocator);
        }
    }
}

fn align_up(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) / alignment * alignment
}

impl Device {
    pub fn create_bottom_level_acceleration_structure(&self, geometries: &[TriangleGeometry]) -> Result<BlasHandle> {
        let ext = self.raytracing.as_ref().ok_or(Error::RaytracingUnsupported)?;

        let vertex_buffers = self.vertex_buffers.lock().unwrap();
        let index_buffers = self.index_buffers.lock().unwrap();

        let mut vk_geometries = Vec::with_capacity(geometries.len());
        let mut range_infos = Vec::with_capacity(geometries.len());
        let mut max_primitive_counts = Vec::with_capacity(geometries.len());

        for geometry in geometries {
            let vertex_buffer = vertex_buffers
                .get(geometry.vertex_buffer)
                .ok_or_else(|| Error::other("unknown vertex buffer"))?;
            let index_buffer = index_buffers
                .get(geometry.index_buffer)
                .ok_or_else(|| Error::other("unknown index buffer"))?;

            let vertex_address = unsafe {
                self.core.get_buffer_device_address(
                    &vk::BufferDeviceAddressInfo::builder().buffer(vertex_buffer.handle),
                )
            };
            let index_address = unsafe {
                self.core
                    .get_buffer_device_address(&vk::BufferDeviceAddressInfo::builder().buffer(index_buffer.handle))
            };

            let triangles = vk::AccelerationStructureGeometryTrianglesDataKHR::builder()
                .vertex_format(vk::Format::R32G32B32_SFLOAT)
                .vertex_data(vk::DeviceOrHostAddressConstKHR { device_address: vertex_address })
                .vertex_stride(geometry.vertex_stride)
                .max_vertex(geometry.vertex_count.saturating_sub(1))
                .index_type(vk::IndexType::UINT32)
                .index_data(vk::DeviceOrHostAddressConstKHR { device_address: index_address })
                .build();

            vk_geometries.push(
                vk::AccelerationStructureGeometryKHR::builder()
                    .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
                    .geometry(vk::AccelerationStructureGeometryDataKHR { triangles })
                    .flags(vk::GeometryFlagsKHR::OPAQUE)
                    .build(),
            );
            let primitive_count = geometry.index_count / 3;
            range_infos.push(
                vk::AccelerationStructureBuildRangeInfoKHR::builder()
                    .primitive_count(primitive_count)
                    .build(),
            );
            max_primitive_counts.push(primitive_count);
        }
        drop(vertex_buffers);
        drop(index_buffers);

        let mut build_geometry_info = vk::AccelerationStructureBuildGeometryInfoKHR::builder()
            .ty(vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL)
            .flags(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE)
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .geometries(&vk_geometries)
            .build();

        let build_sizes = unsafe {
            ext.acceleration_structure.get_acceleration_structure_build_sizes(
                vk::AccelerationStructureBuildTypeKHR::DEVICE,
                &build_geometry_info,
                &max_primitive_counts,
            )
        };

        let buffer = Buffer::create(
            &self.core,
            &self.allocator,
            build_sizes.acceleration_structure_size,
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryLocation::GpuOnly,
        )?;

        let handle = unsafe {
            ext.acceleration_structure.create_acceleration_structure(
                &vk::AccelerationStructureCreateInfoKHR::builder()
                    .buffer(buffer.handle)
                    .size(build_sizes.acceleration_structure_size)
                    .ty(vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL),
                None,
            )
        }?;

        let scratch = Buffer::create(
            &self.core,
            &self.allocator,
            build_sizes.build_scratch_size,
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryLocation::GpuOnly,
        )?;
        let scratch_address = unsafe {
            self.core
                .get_buffer_device_address(&vk::BufferDeviceAddressInfo::builder().buffer(scratch.handle))
        };

        build_geometry_info.dst_acceleration_structure = handle;
        build_geometry_info.scratch_data = vk::DeviceOrHostAddressKHR { device_address: scratch_address };

        let range_info_refs: Vec<&[vk::AccelerationStructureBuildRangeInfoKHR]> =
            vec![range_infos.as_slice()];

        let build_result = self.one_shot(|cb| unsafe {
            ext.acceleration_structure
                .cmd_build_acceleration_structures(cb, &[build_geometry_info], &range_info_refs);
        });
        scratch.destroy(&self.core, &self.allocator);
        build_result?;

        let device_address = unsafe {
            ext.acceleration_structure
                .get_acceleration_structure_device_address(&vk::AccelerationStructureDeviceAddressInfoKHR::builder().acceleration_structure(handle))
        };

        Ok(self.blas.lock().unwrap().insert(Blas {
            handle,
            buffer,
            device_address,
        }))
    }

    pub fn destroy_bottom_level_acceleration_structure(&self, handle: BlasHandle) {
        if let Some(blas) = self.blas.lock().unwrap().remove(handle) {
            blas.destroy(self);
        }
    }

    pub fn create_top_level_acceleration_structure(&self, instances: &[BlasInstance]) -> Result<TlasHandle> {
        let ext = self.raytracing.as_ref().ok_or(Error::RaytracingUnsupported)?;

        let blas_store = self.blas.lock().unwrap();
        let mut vk_instances = Vec::with_capacity(instances.len());
        for instance in instances {
            let blas = blas_store
                .get(instance.blas)
                .ok_or_else(|| Error::other("unknown bottom-level acceleration structure"))?;
            vk_instances.push(vk::AccelerationStructureInstanceKHR {
                transform: vk::TransformMatrixKHR { matrix: instance.transform },
                instance_custom_index_and_mask: vk::Packed24_8::new(instance.instance_custom_index, instance.mask),
                instance_shader_binding_table_record_offset_and_flags: vk::Packed24_8::new(
                    0,
                    vk::GeometryInstanceFlagsKHR::TRIANGLE_FACING_CULL_DISABLE.as_raw() as u8,
                ),
                acceleration_structure_reference: vk::AccelerationStructureReferenceKHR {
                    device_handle: blas.device_address,
                },
            });
        }
        drop(blas_store);

        let instance_buffer_size = (vk_instances.len().max(1) * std::mem::size_of::<vk::AccelerationStructureInstanceKHR>()) as u64;
        let mut instance_buffer = Buffer::create(
            &self.core,
            &self.allocator,
            instance_buffer_size,
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryLocation::CpuToGpu,
        )?;
        if !vk_instances.is_empty() {
            let bytes = unsafe {
                std::slice::from_raw_parts(
                    vk_instances.as_ptr() as *const u8,
                    vk_instances.len() * std::mem::size_of::<vk::AccelerationStructureInstanceKHR>(),
                )
            };
            instance_buffer.write(bytes);
        }
        let instance_buffer_address = unsafe {
            self.core
                .get_buffer_device_address(&vk::BufferDeviceAddressInfo::builder().buffer(instance_buffer.handle))
        };

        let instances_data = vk::AccelerationStructureGeometryInstancesDataKHR::builder()
            .data(vk::DeviceOrHostAddressConstKHR { device_address: instance_buffer_address })
            .build();
        let geometry = vk::AccelerationStructureGeometryKHR::builder()
            .geometry_type(vk::GeometryTypeKHR::INSTANCES)
            .geometry(vk::AccelerationStructureGeometryDataKHR { instances: instances_data })
            .build();
        let geometries = [geometry];

        let mut build_geometry_info = vk::AccelerationStructureBuildGeometryInfoKHR::builder()
            .ty(vk::AccelerationStructureTypeKHR::TOP_LEVEL)
            .flags(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE)
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .geometries(&geometries)
            .build();

        let primitive_count = instances.len() as u32;
        let build_sizes = unsafe {
            ext.acceleration_structure.get_acceleration_structure_build_sizes(
                vk::AccelerationStructureBuildTypeKHR::DEVICE,
                &build_geometry_info,
                &[primitive_count],
            )
        };

        let buffer = Buffer::create(
            &self.core,
            &self.allocator,
            build_sizes.acceleration_structure_size,
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryLocation::GpuOnly,
        )?;

        let handle = unsafe {
            ext.acceleration_structure.create_acceleration_structure(
                &vk::AccelerationStructureCreateInfoKHR::builder()
                    .buffer(buffer.handle)
                    .size(build_sizes.acceleration_structure_size)
                    .ty(vk::AccelerationStructureTypeKHR::TOP_LEVEL),
                None,
            )
        }?;

        let scratch = Buffer::create(
            &self.core,
            &self.allocator,
            build_sizes.build_scratch_size,
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryLocation::GpuOnly,
        )?;
        let scratch_address = unsafe {
            self.core
                .get_buffer_device_address(&vk::BufferDeviceAddressInfo::builder().buffer(scratch.handle))
        };

        build_geometry_info.dst_acceleration_structure = handle;
        build_geometry_info.scratch_data = vk::DeviceOrHostAddressKHR { device_address: scratch_address };

        let range_info = vk::AccelerationStructureBuildRangeInfoKHR::builder()
            .primitive_count(primitive_count)
            .build();
        let range_infos = [range_info];
        let range_info_refs: Vec<&[vk::AccelerationStructureBuildRangeInfoKHR]> = vec![&range_infos];

        let build_result = self.one_shot(|cb| unsafe {
            ext.acceleration_structure
                .cmd_build_acceleration_structures(cb, &[build_geometry_info], &range_info_refs);
        });
        scratch.destroy(&self.core, &self.allocator);
        instance_buffer.destroy(&self.core, &self.allocator);
        build_result?;

        Ok(self.tlas.lock().unwrap().insert(Tlas { handle, buffer }))
    }

    pub fn destroy_top_level_acceleration_structure(&self, handle: TlasHandle) {
        if let Some(tlas) = self.tlas.lock().unwrap().remove(handle) {
            tlas.destroy(self);
        }
    }

    pub fn create_raytrace_pipeline(&self) -> Result<RayTracePipelineHandle> {
        self.raytracing.as_ref().ok_or(Error::RaytracingUnsupported)?;
        Ok(self.raytrace_pipelines.lock().unwrap().insert(RayTracePipeline::default()))
    }

    pub fn destroy_raytrace_pipeline(&self, handle: RayTracePipelineHandle) {
        if let Some(pipeline) = self.raytrace_pipelines.lock().unwrap().remove(handle) {
            pipeline.destroy(self);
        }
    }

    pub fn with_raytrace_pipeline<R>(
        &self,
        handle: RayTracePipelineHandle,
        f: impl FnOnce(&mut RayTracePipeline) -> R,
    ) -> Option<R> {
        self.raytrace_pipelines.lock().unwrap().get_mut(handle).map(f)
    }

    /// Materializes the pipeline (if its shader list changed) and packs the
    /// shader binding table: one `handle_size_aligned` stride per record,
    /// raygen/miss/hit regions each padded to `base_alignment`.
    pub fn flush_raytrace_pipeline(&self, handle: RayTracePipelineHandle) -> Result<()> {
        let ext = self.raytracing.as_ref().ok_or(Error::RaytracingUnsupported)?;
        let mut pipelines = self.raytrace_pipelines.lock().unwrap();
        let pipeline = pipelines
            .get_mut(handle)
            .ok_or_else(|| Error::other("unknown raytrace pipeline"))?;

        let key = crate::caches::hash_key((&pipeline.raygen_shaders, &pipeline.miss_shaders, &pipeline.hit_groups));
        if pipeline.last_key == Some(key) {
            return Ok(());
        }

        let shaders = self.shaders.lock().unwrap();
        let mut stages = Vec::new();
        let mut groups = Vec::new();
        let entry_point = std::ffi::CString::new("main").unwrap();

        let mut stage_index = |handle: ShaderHandle, stage: vk::ShaderStageFlags, stages: &mut Vec<vk::PipelineShaderStageCreateInfo>| -> Result<u32> {
            let module = *shaders.get(handle).ok_or_else(|| Error::other("unknown shader"))?;
            let index = stages.len() as u32;
            stages.push(
                vk::PipelineShaderStageCreateInfo::builder()
                    .stage(stage)
                    .module(module)
                    .name(&entry_point)
                    .build(),
            );
            Ok(index)
        };

        for &raygen in &pipeline.raygen_shaders {
            let index = stage_index(raygen, vk::ShaderStageFlags::RAYGEN_KHR, &mut stages)?;
            groups.push(
                vk::RayTracingShaderGroupCreateInfoKHR::builder()
                    .ty(vk::RayTracingShaderGroupTypeKHR::GENERAL)
                    .general_shader(index)
                    .closest_hit_shader(vk::SHADER_UNUSED_KHR)
                    .any_hit_shader(vk::SHADER_UNUSED_KHR)
                    .intersection_shader(vk::SHADER_UNUSED_KHR)
                    .build(),
            );
        }
        for &miss in &pipeline.miss_shaders {
            let index = stage_index(miss, vk::ShaderStageFlags::MISS_KHR, &mut stages)?;
            groups.push(
                vk::RayTracingShaderGroupCreateInfoKHR::builder()
                    .ty(vk::RayTracingShaderGroupTypeKHR::GENERAL)
                    .general_shader(index)
                    .closest_hit_shader(vk::SHADER_UNUSED_KHR)
                    .any_hit_shader(vk::SHADER_UNUSED_KHR)
                    .intersection_shader(vk::SHADER_UNUSED_KHR)
                    .build(),
            );
        }
        for &(intersection, any_hit, closest_hit) in &pipeline.hit_groups {
            let intersection_index = match intersection {
                Some(s) => stage_index(s, vk::ShaderStageFlags::INTERSECTION_KHR, &mut stages)?,
                None => vk::SHADER_UNUSED_KHR,
            };
            let any_hit_index = match any_hit {
                Some(s) => stage_index(s, vk::ShaderStageFlags::ANY_HIT_KHR, &mut stages)?,
                None => vk::SHADER_UNUSED_KHR,
            };
            let closest_hit_index = match closest_hit {
                Some(s) => stage_index(s, vk::ShaderStageFlags::CLOSEST_HIT_KHR, &mut stages)?,
                None => vk::SHADER_UNUSED_KHR,
            };
            groups.push(
                vk::RayTracingShaderGroupCreateInfoKHR::builder()
                    .ty(if intersection.is_some() {
                        vk::RayTracingShaderGroupTypeKHR::PROCEDURAL_HIT_GROUP
                    } else {
                        vk::RayTracingShaderGroupTypeKHR::TRIANGLES_HIT_GROUP
                    })
                    .general_shader(vk::SHADER_UNUSED_KHR)
                    .intersection_shader(intersection_index)
                    .any_hit_shader(any_hit_index)
                    .closest_hit_shader(closest_hit_index)
                    .build(),
            );
        }
        drop(shaders);

        let layout = unsafe {
            self.core
                .create_pipeline_layout(&vk::PipelineLayoutCreateInfo::builder(), None)
        }?;

        let vk_pipeline = unsafe {
            ext.raytracing_pipeline.create_ray_tracing_pipelines(
                vk::DeferredOperationKHR::null(),
                vk::PipelineCache::null(),
                &[vk::RayTracingPipelineCreateInfoKHR::builder()
                    .stages(&stages)
                    .groups(&groups)
                    .max_pipeline_ray_recursion_depth(1)
                    .layout(layout)
                    .build()],
                None,
            )
        }
        .map_err(|(_, err)| err)?[0];

        let handle_size = ext.pipeline_properties.shader_group_handle_size as u64;
        let base_alignment = ext.pipeline_properties.shader_group_base_alignment as u64;
        let handle_size_aligned = align_up(handle_size, ext.pipeline_properties.shader_group_handle_alignment as u64);

        let raygen_count = pipeline.raygen_shaders.len() as u64;
        let miss_count = pipeline.miss_shaders.len() as u64;
        let hit_count = pipeline.hit_groups.len() as u64;
        let group_count = raygen_count + miss_count + hit_count;

        let handle_data_size = group_count * handle_size;
        let handle_data = unsafe {
            ext.raytracing_pipeline.get_ray_tracing_shader_group_handles(
                vk_pipeline,
                0,
                group_count as u32,
                handle_data_size as usize,
            )
        }?;

        let raygen_region_size = align_up(raygen_count * handle_size_aligned, base_alignment);
        let miss_region_size = align_up(miss_count * handle_size_aligned, base_alignment);
        let hit_region_size = align_up(hit_count * handle_size_aligned, base_alignment);
        let sbt_size = raygen_region_size + miss_region_size + hit_region_size;

        let mut sbt = Buffer::create(
            &self.core,
            &self.allocator,
            sbt_size.max(1),
            vk::BufferUsageFlags::SHADER_BINDING_TABLE_KHR | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryLocation::CpuToGpu,
        )?;

        let mut packed = vec![0u8; sbt_size as usize];
        let mut write_region = |start: usize, count: u64, group_offset: u64| {
            for i in 0..count {
                let src = ((group_offset + i) * handle_size) as usize;
                let dst = start + (i * handle_size_aligned) as usize;
                packed[dst..dst + handle_size as usize].copy_from_slice(&handle_data[src..src + handle_size as usize]);
            }
        };
        write_region(0, raygen_count, 0);
        write_region(raygen_region_size as usize, miss_count, raygen_count);
        write_region((raygen_region_size + miss_region_size) as usize, hit_count, raygen_count + miss_count);
        sbt.write(&packed);

        let sbt_address = unsafe {
            self.core
                .get_buffer_device_address(&vk::BufferDeviceAddressInfo::builder().buffer(sbt.handle))
        };

        pipeline.raygen_region = vk::StridedDeviceAddressRegionKHR {
            device_address: sbt_address,
            stride: handle_size_aligned,
            size: raygen_region_size,
        };
        pipeline.miss_region = vk::StridedDeviceAddressRegionKHR {
            device_address: sbt_address + raygen_region_size,
            stride: handle_size_aligned,
            size: miss_region_size,
        };
        pipeline.hit_region = vk::StridedDeviceAddressRegionKHR {
            device_address: sbt_address + raygen_region_size + miss_region_size,
            stride: handle_size_aligned,
            size: hit_region_size,
        };

        if let Some(old_pipeline) = pipeline.pipeline.take() {
            unsafe { self.core.destroy_pipeline(old_pipeline, None) };
        }
        if let Some(old_layout) = pipeline.layout.take() {
            unsafe { self.core.destroy_pipeline_layout(old_layout, None) };
        }
        if let Some(old_sbt) = pipeline.sbt_buffer.take() {
            old_sbt.destroy(&self.core, &self.allocator);
        }

        pipeline.pipeline = Some(vk_pipeline);
        pipeline.layout = Some(layout);
        pipeline.sbt_buffer = Some(sbt);
        pipeline.last_key = Some(key);

        Ok(())
    }

    /// `raygen_index` selects which raygen record in the table is addressed;
    /// only one raygen shader is ever active per dispatch.
    pub fn trace_rays(
        &self,
        cb: vk::CommandBuffer,
        pipeline_handle: RayTracePipelineHandle,
        width: u32,
        height: u32,
        depth: u32,
        raygen_index: u32,
    ) -> Result<()> {
        let ext = self.raytracing.as_ref().ok_or(Error::RaytracingUnsupported)?;
        self.flush_raytrace_pipeline(pipeline_handle)?;

        let pipelines = self.raytrace_pipelines.lock().unwrap();
        let pipeline = pipelines
            .get(pipeline_handle)
            .ok_or_else(|| Error::other("unknown raytrace pipeline"))?;
        let vk_pipeline = pipeline.pipeline.ok_or_else(|| Error::other("raytrace pipeline not flushed"))?;

        let handle_size_aligned = pipeline.raygen_region.stride;
        let mut raygen_region = pipeline.raygen_region;
        raygen_region.device_address += raygen_index as u64 * handle_size_aligned;
        raygen_region.size = handle_size_aligned;

        unsafe {
            self.core.cmd_bind_pipeline(cb, vk::PipelineBindPoint::RAY_TRACING_KHR, vk_pipeline);
            ext.raytracing_pipeline.cmd_trace_rays(
                cb,
                &raygen_region,
                &pipeline.miss_region,
                &pipeline.hit_region,
                &vk::StridedDeviceAddressRegionKHR::default(),
                width,
                height,
                depth,
            );
        }
        Ok(())
    }
}
