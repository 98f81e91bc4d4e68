use crate::device::Device;
use crate::handles::SamplerHandle;
use crate::Result;
use ash::vk;

#[derive(Default, Debug, Copy, Clone)]
pub enum AddressMode {
    #[default]
    Repeat,
    MirroredRepeat,
    ClampToEdge,
    ClampToBorder,
}

impl AddressMode {
    fn to_vk(self) -> vk::SamplerAddressMode {
        match self {
            AddressMode::Repeat => vk::SamplerAddressMode::REPEAT,
            AddressMode::MirroredRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
            AddressMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
            AddressMode::ClampToBorder => vk::SamplerAddressMode::CLAMP_TO_BORDER,
        }
    }
}

#[derive(Default, Debug, Copy, Clone)]
pub enum FilterMode {
    #[default]
    Nearest,
    Linear,
}

impl FilterMode {
    fn to_vk(self) -> vk::Filter {
        match self {
            FilterMode::Nearest => vk::Filter::NEAREST,
            FilterMode::Linear => vk::Filter::LINEAR,
        }
    }

    fn to_mip_vk(self) -> vk::SamplerMipmapMode {
        match self {
            FilterMode::Nearest => vk::SamplerMipmapMode::NEAREST,
            FilterMode::Linear => vk::SamplerMipmapMode::LINEAR,
        }
    }
}

#[derive(Default, Debug, Copy, Clone)]
pub enum BorderColor {
    #[default]
    TransparentBlack,
    OpaqueBlack,
    OpaqueWhite,
}

impl BorderColor {
    fn to_vk(self) -> vk::BorderColor {
        match self {
            BorderColor::TransparentBlack => vk::BorderColor::FLOAT_TRANSPARENT_BLACK,
            BorderColor::OpaqueBlack => vk::BorderColor::FLOAT_OPAQUE_BLACK,
            BorderColor::OpaqueWhite => vk::BorderColor::FLOAT_OPAQUE_WHITE,
        }
    }
}

#[derive(Default, Debug, Clone)]
pub struct SamplerCreateInfo {
    pub address_mode_u: AddressMode,
    pub address_mode_v: AddressMode,
    pub address_mode_w: AddressMode,
    pub mag_filter: FilterMode,
    pub min_filter: FilterMode,
    pub mip_filter: FilterMode,
    pub lod_clamp_range: Option<std::ops::Range<f32>>,
    pub anisotropy_clamp: Option<f32>,
    pub border_color: BorderColor,
    pub unnormalized_coordinates: bool,
}

impl SamplerCreateInfo {
    fn to_vk(&self) -> vk::SamplerCreateInfo {
        let lod_clamp_range = self.lod_clamp_range.clone().unwrap_or(0.0..vk::LOD_CLAMP_NONE);
        vk::SamplerCreateInfo::builder()
            .address_mode_u(self.address_mode_u.to_vk())
            .address_mode_v(self.address_mode_v.to_vk())
            .address_mode_w(self.address_mode_w.to_vk())
            .mag_filter(self.mag_filter.to_vk())
            .min_filter(self.min_filter.to_vk())
            .mipmap_mode(self.mip_filter.to_mip_vk())
            .min_lod(lod_clamp_range.start)
            .max_lod(lod_clamp_range.end)
            .anisotropy_enable(self.anisotropy_clamp.is_some())
            .max_anisotropy(self.anisotropy_clamp.unwrap_or_default())
            .border_color(self.border_color.to_vk())
            .unnormalized_coordinates(self.unnormalized_coordinates)
            .build()
    }
}

pub struct Sampler {
    pub(crate) handle: vk::Sampler,
}

impl Device {
    pub fn create_sampler(&self, create_info: &SamplerCreateInfo) -> Result<SamplerHandle> {
        let handle = unsafe { self.core.create_sampler(&create_info.to_vk(), None) }?;
        Ok(self.samplers.lock().unwrap().insert(Sampler { handle }))
    }

    pub fn destroy_sampler(&self, handle: SamplerHandle) {
        if let Some(sampler) = self.samplers.lock().unwrap().remove(handle) {
            unsafe { self.core.destroy_sampler(sampler.handle, None) };
        }
    }
}
