//! Descriptor sets as a fixed 32-slot binding table, matching
//! `descpool`'s classic-pool pattern but keyed per binding signature instead
//! of a single fixed layout.

use crate::caches::hash_key;
use crate::device::Device;
use crate::handles::{BindSetHandle, SamplerHandle, TextureHandle, TlasHandle, UniformBufferHandle};
use crate::Result;
use ash::vk;

pub const MAX_BIND_SET_SLOTS: usize = 32;

#[derive(Clone, Copy)]
pub(crate) enum BoundResource {
    UniformBuffer(UniformBufferHandle),
    SampledTexture(TextureHandle, Option<SamplerHandle>),
    StorageImage(TextureHandle),
    AccelerationStructure(TlasHandle),
}

#[derive(Clone, Copy, Default)]
struct Slot {
    resource: Option<BoundResourceSlot>,
    dirty: bool,
}

#[derive(Clone, Copy)]
struct BoundResourceSlot {
    kind: vk::DescriptorType,
    resource: BoundResource,
}

impl Default for BoundResourceSlot {
    fn default() -> Self {
        Self {
            kind: vk::DescriptorType::UNIFORM_BUFFER,
            resource: BoundResource::UniformBuffer(UniformBufferHandle::default()),
        }
    }
}

pub struct BindSet {
    slots: [Slot; MAX_BIND_SET_SLOTS],
    descriptor_set: Option<vk::DescriptorSet>,
    layout_key: Option<u64>,
}

impl Default for BindSet {
    fn default() -> Self {
        Self {
            slots: [Slot::default(); MAX_BIND_SET_SLOTS],
            descriptor_set: None,
            layout_key: None,
        }
    }
}

impl BindSet {
    fn bind(&mut self, binding: usize, kind: vk::DescriptorType, resource: BoundResource) {
        let slot = &mut self.slots[binding];
        let same = match slot.resource {
            Some(existing) => existing.kind == kind && resource_eq(existing.resource, resource),
            None => false,
        };
        if same {
            return;
        }
        slot.resource = Some(BoundResourceSlot { kind, resource });
        slot.dirty = true;
    }

    fn layout_hash(&self) -> u64 {
        let used: Vec<(usize, vk::DescriptorType)> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.resource.map(|r| (i, r.kind)))
            .collect();
        hash_key(used)
    }
}

fn resource_eq(a: BoundResource, b: BoundResource) -> bool {
    match (a, b) {
        (BoundResource::UniformBuffer(a), BoundResource::UniformBuffer(b)) => a == b,
        (BoundResource::SampledTexture(a, sa), BoundResource::SampledTexture(b, sb)) => a == b && sa == sb,
        (BoundResource::StorageImage(a), BoundResource::StorageImage(b)) => a == b,
        (BoundResource::AccelerationStructure(a), BoundResource::AccelerationStructure(b)) => a == b,
        _ => false,
    }
}

impl Device {
    pub fn create_bind_set(&self) -> BindSetHandle {
        self.bind_sets.lock().unwrap().insert(BindSet::default())
    }

    pub fn destroy_bind_set(&self, handle: BindSetHandle) {
        if let Some(set) = self.bind_sets.lock().unwrap().remove(handle) {
            if let Some(descriptor_set) = set.descriptor_set {
                unsafe {
                    let _ = self
                        .core
                        .free_descriptor_sets(self.descriptor_pool, &[descriptor_set]);
                }
            }
        }
    }

    pub fn bind_uniform_buffer(&self, set: BindSetHandle, binding: usize, buffer: UniformBufferHandle) {
        if let Some(set) = self.bind_sets.lock().unwrap().get_mut(set) {
            set.bind(
                binding,
                vk::DescriptorType::UNIFORM_BUFFER,
                BoundResource::UniformBuffer(buffer),
            );
        }
    }

    pub fn bind_texture(
        &self,
        set: BindSetHandle,
        binding: usize,
        texture: TextureHandle,
        sampler: Option<SamplerHandle>,
    ) {
        if let Some(set) = self.bind_sets.lock().unwrap().get_mut(set) {
            set.bind(
                binding,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                BoundResource::SampledTexture(texture, sampler),
            );
        }
    }

    pub fn bind_storage_image(&self, set: BindSetHandle, binding: usize, texture: TextureHandle) {
        if let Some(set) = self.bind_sets.lock().unwrap().get_mut(set) {
            set.bind(binding, vk::DescriptorType::STORAGE_IMAGE, BoundResource::StorageImage(texture));
        }
    }

    pub fn bind_top_level_acceleration_structure(&self, set: BindSetHandle, binding: usize, tlas: TlasHandle) {
        if let Some(set) = self.bind_sets.lock().unwrap().get_mut(set) {
            set.bind(
                binding,
                vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
                BoundResource::AccelerationStructure(tlas),
            );
        }
    }

    /// (1) hash the used-slot layout, (2) fetch/build the descriptor-set
    /// layout, (3) allocate a fresh descriptor set if the layout changed,
    /// (4) write every dirty slot, (5) clear dirty flags.
    pub fn flush_bind_set(&self, handle: BindSetHandle) -> Result<()> {
        let mut bind_sets = self.bind_sets.lock().unwrap();
        let set = match bind_sets.get_mut(handle) {
            Some(set) => set,
            None => return Ok(()),
        };

        let layout_key = set.layout_hash();
        let layout_changed = set.layout_key != Some(layout_key);

        if layout_changed {
            let bindings: Vec<vk::DescriptorSetLayoutBinding> = set
                .slots
                .iter()
                .enumerate()
                .filter_map(|(i, slot)| {
                    slot.resource.map(|r| {
                        vk::DescriptorSetLayoutBinding::builder()
                            .binding(i as u32)
                            .descriptor_type(r.kind)
                            .descriptor_count(1)
                            .stage_flags(vk::ShaderStageFlags::ALL)
                            .build()
                    })
                })
                .collect();

            let core = &self.core;
            let layout = *self
                .descriptor_set_layout_cache
                .lock()
                .unwrap()
                .fetch_or_build(layout_key, || {
                    let layout = unsafe {
                        core.create_descriptor_set_layout(
                            &vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings),
                            None,
                        )
                    }?;
                    Ok(layout)
                })?;

            if let Some(old) = set.descriptor_set.take() {
                unsafe {
                    let _ = self.core.free_descriptor_sets(self.descriptor_pool, &[old]);
                }
            }

            let layouts = [layout];
            let descriptor_set = unsafe {
                self.core.allocate_descriptor_sets(
                    &vk::DescriptorSetAllocateInfo::builder()
                        .descriptor_pool(self.descriptor_pool)
                        .set_layouts(&layouts),
                )
            }?[0];

            set.descriptor_set = Some(descriptor_set);
            set.layout_key = Some(layout_key);
            for slot in &mut set.slots {
                if slot.resource.is_some() {
                    slot.dirty = true;
                }
            }
        }

        let descriptor_set = set.descriptor_set.unwrap();

        for (binding, slot) in set.slots.iter_mut().enumerate() {
            if !slot.dirty {
                continue;
            }
            let Some(bound) = slot.resource else { continue };

            match bound.resource {
                BoundResource::UniformBuffer(buffer_handle) => {
                    let buffers = self.uniform_buffers.lock().unwrap();
                    if let Some(buffer) = buffers.get(buffer_handle) {
                        let info = [vk::DescriptorBufferInfo {
                            buffer: buffer.handle,
                            offset: 0,
                            range: vk::WHOLE_SIZE,
                        }];
                        let write = vk::WriteDescriptorSet::builder()
                            .dst_set(descriptor_set)
                            .dst_binding(binding as u32)
                            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                            .buffer_info(&info)
                            .build();
                        unsafe { self.core.update_descriptor_sets(&[write], &[]) };
                    }
                }
                BoundResource::SampledTexture(texture_handle, sampler_handle) => {
                    let textures = self.textures.lock().unwrap();
                    let samplers = self.samplers.lock().unwrap();
                    if let Some(texture) = textures.get(texture_handle) {
                        if let Ok(view) = texture.view(
                            &self.core,
                            crate::texture::ImageViewSubrange {
                                base_mip: 0,
                                num_mips: texture.num_mipmaps,
                                base_layer: 0,
                                num_layers: texture.num_layers,
                            },
                        ) {
                            let sampler = sampler_handle
                                .and_then(|s| samplers.get(s))
                                .map(|s| s.handle)
                                .unwrap_or_default();
                            let info = [vk::DescriptorImageInfo {
                                sampler,
                                image_view: view,
                                image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                            }];
                            let write = vk::WriteDescriptorSet::builder()
                                .dst_set(descriptor_set)
                                .dst_binding(binding as u32)
                                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                                .image_info(&info)
                                .build();
                            unsafe { self.core.update_descriptor_sets(&[write], &[]) };
                        }
                    }
                }
                BoundResource::StorageImage(texture_handle) => {
                    let textures = self.textures.lock().unwrap();
                    if let Some(texture) = textures.get(texture_handle) {
                        if let Ok(view) = texture.view(
                            &self.core,
                            crate::texture::ImageViewSubrange {
                                base_mip: 0,
                                num_mips: texture.num_mipmaps,
                                base_layer: 0,
                                num_layers: texture.num_layers,
                            },
                        ) {
                            let info = [vk::DescriptorImageInfo {
                                sampler: vk::Sampler::null(),
                                image_view: view,
                                image_layout: vk::ImageLayout::GENERAL,
                            }];
                            let write = vk::WriteDescriptorSet::builder()
                                .dst_set(descriptor_set)
                                .dst_binding(binding as u32)
                                .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                                .image_info(&info)
                                .build();
                            unsafe { self.core.update_descriptor_sets(&[write], &[]) };
                        }
                    }
                }
                BoundResource::AccelerationStructure(tlas_handle) => {
                    let tlas_store = self.tlas.lock().unwrap();
                    if let Some(tlas) = tlas_store.get(tlas_handle) {
                        let accel_structures = [tlas.handle];
                        let mut write_accel = vk::WriteDescriptorSetAccelerationStructureKHR::builder()
                            .acceleration_structures(&accel_structures);
                        let mut write = vk::WriteDescriptorSet::builder()
                            .dst_set(descriptor_set)
                            .dst_binding(binding as u32)
                            .descriptor_type(vk::DescriptorType::ACCELERATION_STRUCTURE_KHR)
                            .push_next(&mut write_accel)
                            .build();
                        write.descriptor_count = 1;
                        unsafe { self.core.update_descriptor_sets(&[write], &[]) };
                    }
                }
            }

            slot.dirty = false;
        }

        Ok(())
    }

    pub(crate) fn bind_set_descriptor(&self, handle: BindSetHandle) -> Option<vk::DescriptorSet> {
        self.bind_sets.lock().unwrap().get(handle).and_then(|s| s.descriptor_set)
    }

    /// Looks up the descriptor-set layout a bind set resolved to on its last
    /// `flush_bind_set`. Returns `None` if the set has never been flushed.
    pub(crate) fn bind_set_layout(&self, handle: BindSetHandle) -> Option<vk::DescriptorSetLayout> {
        let key = self.bind_sets.lock().unwrap().get(handle)?.layout_key?;
        self.descriptor_set_layout_cache.lock().unwrap().get(key).copied()
    }
}
