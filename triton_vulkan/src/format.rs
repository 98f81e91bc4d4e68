use ash::vk;

/// Vulkan-style format tag set: the 8/16/32-bit UNORM/SNORM/UINT/SINT/SFLOAT
/// channel formats the core supports, plus the depth/stencil formats.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Format {
    #[default]
    Undefined,

    R8Unorm,
    R8Snorm,
    R8Uint,
    R8Sint,
    R8G8Unorm,
    R8G8Snorm,
    R8G8Uint,
    R8G8Sint,
    R8G8B8A8Unorm,
    R8G8B8A8Snorm,
    R8G8B8A8Uint,
    R8G8B8A8Sint,
    B8G8R8A8Unorm,
    B8G8R8A8Snorm,
    B8G8R8A8Uint,
    B8G8R8A8Sint,

    R16Unorm,
    R16Snorm,
    R16Uint,
    R16Sint,
    R16Sfloat,
    R16G16Unorm,
    R16G16Snorm,
    R16G16Uint,
    R16G16Sint,
    R16G16Sfloat,
    R16G16B16A16Unorm,
    R16G16B16A16Snorm,
    R16G16B16A16Uint,
    R16G16B16A16Sint,
    R16G16B16A16Sfloat,

    R32Uint,
    R32Sint,
    R32Sfloat,
    R32G32Uint,
    R32G32Sint,
    R32G32Sfloat,
    R32G32B32A32Uint,
    R32G32B32A32Sint,
    R32G32B32A32Sfloat,

    D16Unorm,
    D16UnormS8Uint,
    D24Unorm,
    D24UnormS8Uint,
    D32Sfloat,
    D32SfloatS8Uint,
}

impl Format {
    pub fn is_depth_stencil(self) -> bool {
        matches!(
            self,
            Format::D16Unorm
                | Format::D16UnormS8Uint
                | Format::D24Unorm
                | Format::D24UnormS8Uint
                | Format::D32Sfloat
                | Format::D32SfloatS8Uint
        )
    }

    pub fn has_stencil(self) -> bool {
        matches!(
            self,
            Format::D16UnormS8Uint | Format::D24UnormS8Uint | Format::D32SfloatS8Uint
        )
    }

    pub fn aspect_flags(self) -> vk::ImageAspectFlags {
        if !self.is_depth_stencil() {
            vk::ImageAspectFlags::COLOR
        } else if self.has_stencil() {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        } else {
            vk::ImageAspectFlags::DEPTH
        }
    }

    pub fn to_vk(self) -> vk::Format {
        match self {
            Format::Undefined => vk::Format::UNDEFINED,
            Format::R8Unorm => vk::Format::R8_UNORM,
            Format::R8Snorm => vk::Format::R8_SNORM,
            Format::R8Uint => vk::Format::R8_UINT,
            Format::R8Sint => vk::Format::R8_SINT,
            Format::R8G8Unorm => vk::Format::R8G8_UNORM,
            Format::R8G8Snorm => vk::Format::R8G8_SNORM,
            Format::R8G8Uint => vk::Format::R8G8_UINT,
            Format::R8G8Sint => vk::Format::R8G8_SINT,
            Format::R8G8B8A8Unorm => vk::Format::R8G8B8A8_UNORM,
            Format::R8G8B8A8Snorm => vk::Format::R8G8B8A8_SNORM,
            Format::R8G8B8A8Uint => vk::Format::R8G8B8A8_UINT,
            Format::R8G8B8A8Sint => vk::Format::R8G8B8A8_SINT,
            Format::B8G8R8A8Unorm => vk::Format::B8G8R8A8_UNORM,
            Format::B8G8R8A8Snorm => vk::Format::B8G8R8A8_SNORM,
            Format::B8G8R8A8Uint => vk::Format::B8G8R8A8_UINT,
            Format::B8G8R8A8Sint => vk::Format::B8G8R8A8_SINT,
            Format::R16Unorm => vk::Format::R16_UNORM,
            Format::R16Snorm => vk::Format::R16_SNORM,
            Format::R16Uint => vk::Format::R16_UINT,
            Format::R16Sint => vk::Format::R16_SINT,
            Format::R16Sfloat => vk::Format::R16_SFLOAT,
            Format::R16G16Unorm => vk::Format::R16G16_UNORM,
            Format::R16G16Snorm => vk::Format::R16G16_SNORM,
            Format::R16G16Uint => vk::Format::R16G16_UINT,
            Format::R16G16Sint => vk::Format::R16G16_SINT,
            Format::R16G16Sfloat => vk::Format::R16G16_SFLOAT,
            Format::R16G16B16A16Unorm => vk::Format::R16G16B16A16_UNORM,
            Format::R16G16B16A16Snorm => vk::Format::R16G16B16A16_SNORM,
            Format::R16G16B16A16Uint => vk::Format::R16G16B16A16_UINT,
            Format::R16G16B16A16Sint => vk::Format::R16G16B16A16_SINT,
            Format::R16G16B16A16Sfloat => vk::Format::R16G16B16A16_SFLOAT,
            Format::R32Uint => vk::Format::R32_UINT,
            Format::R32Sint => vk::Format::R32_SINT,
            Format::R32Sfloat => vk::Format::R32_SFLOAT,
            Format::R32G32Uint => vk::Format::R32G32_UINT,
            Format::R32G32Sint => vk::Format::R32G32_SINT,
            Format::R32G32Sfloat => vk::Format::R32G32_SFLOAT,
            Format::R32G32B32A32Uint => vk::Format::R32G32B32A32_UINT,
            Format::R32G32B32A32Sint => vk::Format::R32G32B32A32_SINT,
            Format::R32G32B32A32Sfloat => vk::Format::R32G32B32A32_SFLOAT,
            Format::D16Unorm => vk::Format::D16_UNORM,
            Format::D16UnormS8Uint => vk::Format::D16_UNORM_S8_UINT,
            Format::D24Unorm => vk::Format::X8_D24_UNORM_PACK32,
            Format::D24UnormS8Uint => vk::Format::D24_UNORM_S8_UINT,
            Format::D32Sfloat => vk::Format::D32_SFLOAT,
            Format::D32SfloatS8Uint => vk::Format::D32_SFLOAT_S8_UINT,
        }
    }
}

/// Whether an image's usage implies a colour or depth/stencil attachment,
/// derived from its format (spec.md §4.1 `create_texture_2d`).
pub fn attachment_usage(format: Format) -> vk::ImageUsageFlags {
    if format.is_depth_stencil() {
        vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
    } else {
        vk::ImageUsageFlags::COLOR_ATTACHMENT
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum LoadOp {
    Load,
    Clear,
    DontCare,
}

impl LoadOp {
    pub fn to_vk(self) -> vk::AttachmentLoadOp {
        match self {
            LoadOp::Load => vk::AttachmentLoadOp::LOAD,
            LoadOp::Clear => vk::AttachmentLoadOp::CLEAR,
            LoadOp::DontCare => vk::AttachmentLoadOp::DONT_CARE,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum StoreOp {
    Store,
    DontCare,
}

impl StoreOp {
    pub fn to_vk(self) -> vk::AttachmentStoreOp {
        match self {
            StoreOp::Store => vk::AttachmentStoreOp::STORE,
            StoreOp::DontCare => vk::AttachmentStoreOp::DONT_CARE,
        }
    }
}
