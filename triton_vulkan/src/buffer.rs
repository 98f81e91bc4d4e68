//! `VertexBuffer`/`IndexBuffer`/`UniformBuffer` all wrap the same raw GPU
//! buffer + allocation; only the creation-time usage flags differ.

use crate::device::Device;
use crate::handles::{IndexBufferHandle, UniformBufferHandle, VertexBufferHandle};
use crate::Result;
use ash::vk;
use gpu_allocator::MemoryLocation;
use std::sync::Mutex;

pub struct Buffer {
    pub(crate) handle: vk::Buffer,
    pub(crate) allocation: gpu_allocator::vulkan::Allocation,
    pub(crate) size: u64,
}

impl Buffer {
    pub(crate) fn create(
        core: &ash::Device,
        allocator: &Mutex<gpu_allocator::vulkan::Allocator>,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> Result<Self> {
        let handle = unsafe {
            core.create_buffer(
                &vk::BufferCreateInfo::builder()
                    .size(size)
                    .usage(usage)
                    .sharing_mode(vk::SharingMode::EXCLUSIVE),
                None,
            )
        }?;

        let requirements = unsafe { core.get_buffer_memory_requirements(handle) };

        let allocation = match allocator
            .lock()
            .unwrap()
            .allocate(&gpu_allocator::vulkan::AllocationCreateDesc {
                name: "triton buffer",
                requirements,
                location,
                linear: true,
            }) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { core.destroy_buffer(handle, None) };
                return Err(e.into());
            }
        };

        if let Err(e) =
            unsafe { core.bind_buffer_memory(handle, allocation.memory(), allocation.offset()) }
        {
            unsafe { core.destroy_buffer(handle, None) };
            let _ = allocator.lock().unwrap().free(allocation);
            return Err(e.into());
        }

        Ok(Self {
            handle,
            allocation,
            size,
        })
    }

    pub(crate) fn destroy(
        mut self,
        core: &ash::Device,
        allocator: &Mutex<gpu_allocator::vulkan::Allocator>,
    ) {
        unsafe { core.destroy_buffer(self.handle, None) };
        let _ = allocator.lock().unwrap().free(std::mem::take(&mut self.allocation));
    }

    /// Maps the buffer's memory and copies `data` in starting at byte `0`.
    /// The caller is responsible for keeping `data.len()` within `size`.
    pub(crate) fn write(&mut self, data: &[u8]) {
        if let Some(slice) = self.allocation.mapped_slice_mut() {
            slice[..data.len()].copy_from_slice(data);
        }
    }
}

impl Device {
    pub fn create_vertex_buffer(&self, size: u64, data: Option<&[u8]>) -> Result<VertexBufferHandle> {
        let usage = vk::BufferUsageFlags::VERTEX_BUFFER
            | vk::BufferUsageFlags::TRANSFER_DST
            | vk::BufferUsageFlags::TRANSFER_SRC;
        let mut buffer = Buffer::create(&self.core, &self.allocator, size, usage, buffer_location(data))?;
        if let Some(data) = data {
            buffer.write(data);
        }
        Ok(self.vertex_buffers.lock().unwrap().insert(buffer))
    }

    pub fn create_index_buffer(&self, size: u64, data: Option<&[u8]>) -> Result<IndexBufferHandle> {
        let usage = vk::BufferUsageFlags::INDEX_BUFFER
            | vk::BufferUsageFlags::TRANSFER_DST
            | vk::BufferUsageFlags::TRANSFER_SRC;
        let mut buffer = Buffer::create(&self.core, &self.allocator, size, usage, buffer_location(data))?;
        if let Some(data) = data {
            buffer.write(data);
        }
        Ok(self.index_buffers.lock().unwrap().insert(buffer))
    }

    pub fn create_uniform_buffer(&self, size: u64) -> Result<UniformBufferHandle> {
        let usage = vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::TRANSFER_DST;
        let buffer = Buffer::create(&self.core, &self.allocator, size.max(1), usage, MemoryLocation::CpuToGpu)?;
        Ok(self.uniform_buffers.lock().unwrap().insert(buffer))
    }

    pub fn write_uniform_buffer(&self, handle: UniformBufferHandle, data: &[u8]) {
        if let Some(buffer) = self.uniform_buffers.lock().unwrap().get_mut(handle) {
            buffer.write(data);
        }
    }

    pub fn destroy_vertex_buffer(&self, handle: VertexBufferHandle) {
        if let Some(buffer) = self.vertex_buffers.lock().unwrap().remove(handle) {
            buffer.destroy(&self.core, &self.allocator);
        }
    }

    pub fn destroy_index_buffer(&self, handle: IndexBufferHandle) {
        if let Some(buffer) = self.index_buffers.lock().unwrap().remove(handle) {
            buffer.destroy(&self.core, &self.allocator);
        }
    }

    pub fn destroy_uniform_buffer(&self, handle: UniformBufferHandle) {
        if let Some(buffer) = self.uniform_buffers.lock().unwrap().remove(handle) {
            buffer.destroy(&self.core, &self.allocator);
        }
    }
}

/// Buffers created with initial data are staged host-visible so the data can
/// be written directly; otherwise they live device-local.
fn buffer_location(data: Option<&[u8]>) -> MemoryLocation {
    if data.is_some() {
        MemoryLocation::CpuToGpu
    } else {
        MemoryLocation::GpuOnly
    }
}
