//! 2D textures: image + allocation + a per-texture image-view cache keyed by
//! mip/layer subrange and aspect (spec.md §4.2).

use crate::buffer::Buffer;
use crate::caches::{hash_key, Cache};
use crate::device::Device;
use crate::format::{attachment_usage, Format};
use crate::handles::TextureHandle;
use crate::{Error, Result};
use ash::vk;
use gpu_allocator::MemoryLocation;
use std::sync::Mutex;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct ImageViewSubrange {
    pub base_mip: u32,
    pub num_mips: u32,
    pub base_layer: u32,
    pub num_layers: u32,
}

pub struct Texture {
    pub(crate) handle: vk::Image,
    allocation: gpu_allocator::vulkan::Allocation,
    pub(crate) format: Format,
    pub width: u32,
    pub height: u32,
    pub num_mipmaps: u32,
    pub num_layers: u32,
    cube_compatible: bool,
    view_cache: Mutex<Cache<vk::ImageView>>,
}

impl Texture {
    /// Returns a cached view for `subrange`, creating it on first use. The
    /// view type is inferred from the subrange shape and whether the texture
    /// is cube-compatible.
    pub(crate) fn view(
        &self,
        core: &ash::Device,
        subrange: ImageViewSubrange,
    ) -> Result<vk::ImageView> {
        let aspect = self.format.aspect_flags();
        let key = hash_key((
            vk::Handle::as_raw(self.handle),
            self.format,
            aspect,
            subrange.base_mip,
            subrange.num_mips,
            subrange.base_layer,
            subrange.num_layers,
        ));

        let view_type = if self.cube_compatible && subrange.num_layers == 6 {
            vk::ImageViewType::CUBE
        } else if subrange.num_layers > 1 {
            vk::ImageViewType::TYPE_2D_ARRAY
        } else {
            vk::ImageViewType::TYPE_2D
        };

        let handle = self.handle;
        let format = self.format.to_vk();
        *self
            .view_cache
            .lock()
            .unwrap()
            .fetch_or_build(key, || {
                let view = unsafe {
                    core.create_image_view(
                        &vk::ImageViewCreateInfo::builder()
                            .image(handle)
                            .view_type(view_type)
                            .format(format)
                            .subresource_range(vk::ImageSubresourceRange {
                                aspect_mask: aspect,
                                base_mip_level: subrange.base_mip,
                                level_count: subrange.num_mips,
                                base_array_layer: subrange.base_layer,
                                layer_count: subrange.num_layers,
                            }),
                        None,
                    )
                }?;
                Ok(view)
            })
            .map(|v| *v)
    }

    fn destroy(self, core: &ash::Device, allocator: &Mutex<gpu_allocator::vulkan::Allocator>) {
        for view in self.view_cache.into_inner().unwrap().clear() {
            unsafe { core.destroy_image_view(view, None) };
        }
        unsafe { core.destroy_image(self.handle, None) };
        let mut allocation = self.allocation;
        let _ = allocator.lock().unwrap().free(std::mem::take(&mut allocation));
    }
}

impl Device {
    /// Allocates a 2D image. Usage is `SAMPLED | TRANSFER_SRC | TRANSFER_DST`
    /// plus `COLOR_ATTACHMENT` or `DEPTH_STENCIL_ATTACHMENT` derived from
    /// `format`. If `data` is provided it is staged through a host-visible
    /// buffer and copied into the first `num_data_mips` levels.
    pub fn create_texture_2d(
        &self,
        width: u32,
        height: u32,
        num_mips: u32,
        format: Format,
        data: Option<&[u8]>,
        num_data_mips: u32,
    ) -> Result<TextureHandle> {
        let usage = vk::ImageUsageFlags::SAMPLED
            | vk::ImageUsageFlags::TRANSFER_SRC
            | vk::ImageUsageFlags::TRANSFER_DST
            | attachment_usage(format);

        let handle = unsafe {
            self.core.create_image(
                &vk::ImageCreateInfo::builder()
                    .image_type(vk::ImageType::TYPE_2D)
                    .format(format.to_vk())
                    .extent(vk::Extent3D {
                        width,
                        height,
                        depth: 1,
                    })
                    .mip_levels(num_mips.max(1))
                    .array_layers(1)
                    .samples(vk::SampleCountFlags::TYPE_1)
                    .tiling(vk::ImageTiling::OPTIMAL)
                    .usage(usage)
                    .sharing_mode(vk::SharingMode::EXCLUSIVE)
                    .initial_layout(vk::ImageLayout::UNDEFINED),
                None,
            )
        }?;

        let requirements = unsafe { self.core.get_image_memory_requirements(handle) };
        let allocation = match self.allocator.lock().unwrap().allocate(
            &gpu_allocator::vulkan::AllocationCreateDesc {
                name: "triton texture",
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
            },
        ) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.core.destroy_image(handle, None) };
                return Err(e.into());
            }
        };

        if let Err(e) = unsafe {
            self.core
                .bind_image_memory(handle, allocation.memory(), allocation.offset())
        } {
            unsafe { self.core.destroy_image(handle, None) };
            let _ = self.allocator.lock().unwrap().free(allocation);
            return Err(e.into());
        }

        let texture = Texture {
            handle,
            allocation,
            format,
            width,
            height,
            num_mipmaps: num_mips.max(1),
            num_layers: 1,
            cube_compatible: false,
            view_cache: Mutex::new(Cache::new()),
        };

        if let Some(data) = data {
            self.upload_texture_data(&texture, data, num_data_mips.max(1))?;
        } else {
            self.transition_layout(
                handle,
                format,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                num_mips.max(1),
            )?;
        }

        Ok(self.textures.lock().unwrap().insert(texture))
    }

    fn upload_texture_data(&self, texture: &Texture, data: &[u8], num_data_mips: u32) -> Result<()> {
        let staging = Buffer::create(
            &self.core,
            &self.allocator,
            data.len() as u64,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
        )?;
        let mut staging = staging;
        staging.write(data);

        self.one_shot(|cb| {
            Self::record_image_barrier(
                &self.core,
                cb,
                texture.handle,
                texture.format.aspect_flags(),
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                texture.num_mipmaps,
            );

            let mut offset: u64 = 0;
            let mut width = texture.width;
            let mut height = texture.height;
            for mip in 0..num_data_mips {
                let region = vk::BufferImageCopy::builder()
                    .buffer_offset(offset)
                    .image_subresource(vk::ImageSubresourceLayers {
                        aspect_mask: texture.format.aspect_flags(),
                        mip_level: mip,
                        base_array_layer: 0,
                        layer_count: 1,
                    })
                    .image_extent(vk::Extent3D {
                        width,
                        height,
                        depth: 1,
                    });
                unsafe {
                    self.core.cmd_copy_buffer_to_image(
                        cb,
                        staging.handle,
                        texture.handle,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[region.build()],
                    )
                };
                offset += (width as u64) * (height as u64) * 4;
                width = (width / 2).max(1);
                height = (height / 2).max(1);
            }

            Self::record_image_barrier(
                &self.core,
                cb,
                texture.handle,
                texture.format.aspect_flags(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                texture.num_mipmaps,
            );
        })?;

        staging.destroy(&self.core, &self.allocator);
        Ok(())
    }

    fn transition_layout(
        &self,
        image: vk::Image,
        format: Format,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
        mip_levels: u32,
    ) -> Result<()> {
        self.one_shot(|cb| {
            Self::record_image_barrier(&self.core, cb, image, format.aspect_flags(), old, new, mip_levels);
        })
    }

    fn record_image_barrier(
        core: &ash::Device,
        cb: vk::CommandBuffer,
        image: vk::Image,
        aspect: vk::ImageAspectFlags,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
        mip_levels: u32,
    ) {
        let barrier = vk::ImageMemoryBarrier::builder()
            .old_layout(old)
            .new_layout(new)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: mip_levels,
                base_array_layer: 0,
                layer_count: 1,
            })
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE | vk::AccessFlags::empty())
            .dst_access_mask(vk::AccessFlags::SHADER_READ | vk::AccessFlags::TRANSFER_WRITE);

        unsafe {
            core.cmd_pipeline_barrier(
                cb,
                vk::PipelineStageFlags::TOP_OF_PIPE | vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER | vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier.build()],
            )
        };
    }

    /// Chains `width/height -> 1x1` blits with linear filtering. The format
    /// must support linear blit filtering; this is verified up front rather
    /// than discovered mid-chain.
    pub fn generate_texture_2d_mipmaps(&self, handle: TextureHandle) -> Result<()> {
        let properties = unsafe {
            self.instance_handle()
                .get_physical_device_format_properties(self.physical_handle(), {
                    let textures = self.textures.lock().unwrap();
                    textures.get(handle).map(|t| t.format.to_vk()).unwrap_or(vk::Format::UNDEFINED)
                })
        };
        let textures = self.textures.lock().unwrap();
        let texture = textures.get(handle).ok_or_else(|| Error::other("unknown texture"))?;

        if !properties
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR)
        {
            return Err(Error::FormatNotFilterable(texture.format));
        }

        let (image, aspect, width, height, mips) = (
            texture.handle,
            texture.format.aspect_flags(),
            texture.width,
            texture.height,
            texture.num_mipmaps,
        );
        drop(textures);

        self.one_shot(|cb| {
            let mut mip_width = width as i32;
            let mut mip_height = height as i32;

            for mip in 1..mips {
                let barrier = vk::ImageMemoryBarrier::builder()
                    .old_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                    .new_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(image)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: aspect,
                        base_mip_level: mip - 1,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    });
                unsafe {
                    self.core.cmd_pipeline_barrier(
                        cb,
                        vk::PipelineStageFlags::FRAGMENT_SHADER,
                        vk::PipelineStageFlags::TRANSFER,
                        vk::DependencyFlags::empty(),
                        &[],
                        &[],
                        &[barrier.build()],
                    )
                };

                let next_width = (mip_width / 2).max(1);
                let next_height = (mip_height / 2).max(1);

                let blit = vk::ImageBlit::builder()
                    .src_offsets([
                        vk::Offset3D { x: 0, y: 0, z: 0 },
                        vk::Offset3D {
                            x: mip_width,
                            y: mip_height,
                            z: 1,
                        },
                    ])
                    .src_subresource(vk::ImageSubresourceLayers {
                        aspect_mask: aspect,
                        mip_level: mip - 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    })
                    .dst_offsets([
                        vk::Offset3D { x: 0, y: 0, z: 0 },
                        vk::Offset3D {
                            x: next_width,
                            y: next_height,
                            z: 1,
                        },
                    ])
                    .dst_subresource(vk::ImageSubresourceLayers {
                        aspect_mask: aspect,
                        mip_level: mip,
                        base_array_layer: 0,
                        layer_count: 1,
                    });

                unsafe {
                    self.core.cmd_blit_image(
                        cb,
                        image,
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[blit.build()],
                        vk::Filter::LINEAR,
                    )
                };

                mip_width = next_width;
                mip_height = next_height;
            }
        })
    }

    pub fn destroy_texture(&self, handle: TextureHandle) {
        if let Some(texture) = self.textures.lock().unwrap().remove(handle) {
            texture.destroy(&self.core, &self.allocator);
        }
    }
}

