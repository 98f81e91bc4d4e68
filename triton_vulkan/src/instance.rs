//! Entry point: Vulkan instance creation, physical device enumeration and
//! scoring, and surface creation.
//!
//! Grounded in the teacher's `select_and_create_device` pattern, with the
//! discrete-GPU-preferred scoring and required-extension verification taken
//! from the original engine's `vulkan::Context::init` / `examinePhysicalDevice`.

use crate::debug::DebugMessenger;
use crate::device::Device;
use crate::{Error, Result};
use ash::vk;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::sync::Arc;

const REQUIRED_DEVICE_EXTENSIONS: &[&CStr] = &[ash::extensions::khr::Swapchain::name()];

const RAYTRACING_DEVICE_EXTENSIONS: &[&CStr] = &[
    ash::extensions::khr::AccelerationStructure::name(),
    ash::extensions::khr::RayTracingPipeline::name(),
    ash::extensions::khr::DeferredHostOperations::name(),
    ash::extensions::khr::BufferDeviceAddress::name(),
];

const VALIDATION_LAYER: &CStr =
    unsafe { CStr::from_bytes_with_nul_unchecked(b"VK_LAYER_KHRONOS_validation\0") };

/// Everything about a physical device the scoring function and the device
/// constructor need, gathered once at enumeration time.
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub limits: vk::PhysicalDeviceLimits,
    pub raytracing_supported: bool,
}

impl PhysicalDeviceInfo {
    fn new(properties: vk::PhysicalDeviceProperties, raytracing_supported: bool) -> Self {
        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        Self {
            name,
            device_type: properties.device_type,
            limits: properties.limits,
            raytracing_supported,
        }
    }
}

struct PhysicalDevice {
    handle: vk::PhysicalDevice,
    info: PhysicalDeviceInfo,
    graphics_queue_family_index: u32,
}

impl PhysicalDevice {
    fn enumerate(instance: &ash::Instance) -> Result<Vec<Self>> {
        let handles = unsafe { instance.enumerate_physical_devices() }?;

        let mut devices = Vec::with_capacity(handles.len());
        for handle in handles {
            let Some(graphics_queue_family_index) = find_graphics_queue_family(instance, handle)
            else {
                continue;
            };

            let supported_extensions =
                unsafe { instance.enumerate_device_extension_properties(handle) }?;
            if !has_all_extensions(&supported_extensions, REQUIRED_DEVICE_EXTENSIONS) {
                continue;
            }
            let raytracing_supported =
                has_all_extensions(&supported_extensions, RAYTRACING_DEVICE_EXTENSIONS);

            let properties = unsafe { instance.get_physical_device_properties(handle) };

            devices.push(Self {
                handle,
                info: PhysicalDeviceInfo::new(properties, raytracing_supported),
                graphics_queue_family_index,
            });
        }

        Ok(devices)
    }
}

fn find_graphics_queue_family(instance: &ash::Instance, device: vk::PhysicalDevice) -> Option<u32> {
    unsafe { instance.get_physical_device_queue_family_properties(device) }
        .iter()
        .enumerate()
        .find(|(_, family)| {
            family.queue_flags.contains(
                vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
            )
        })
        .map(|(index, _)| index as u32)
}

fn has_all_extensions(supported: &[vk::ExtensionProperties], required: &[&CStr]) -> bool {
    required.iter().all(|name| {
        supported.iter().any(|ext| {
            let ext_name = unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) };
            ext_name == *name
        })
    })
}

/// Discrete GPUs first, integrated second, everything else last. Used as the
/// default by [`Instance::create_device`]; callers may supply their own.
pub fn score_physical_device(info: &PhysicalDeviceInfo) -> u32 {
    match info.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 3,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 2,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 1,
        _ => 0,
    }
}

pub struct Surface {
    pub(crate) handle: vk::SurfaceKHR,
    surface_ext: Arc<ash::extensions::khr::Surface>,
}

impl Surface {
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    pub(crate) fn surface_ext(&self) -> &ash::extensions::khr::Surface {
        &self.surface_ext
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.surface_ext.destroy_surface(self.handle, None);
        }
    }
}

pub struct Instance {
    entry: ash::Entry,
    pub(crate) core: ash::Instance,
    pub(crate) debug: Option<Arc<DebugMessenger>>,
    surface_ext: Arc<ash::extensions::khr::Surface>,
    physical_devices: Vec<PhysicalDevice>,
}

impl Instance {
    pub fn new(app_name: &str) -> Result<Self> {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| Error::other(format!("failed to load Vulkan entry: {e}")))?;

        let app_name = CString::new(app_name).unwrap_or_else(|_| CString::new("triton").unwrap());
        let engine_name = CString::new("triton").unwrap();

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_3);

        let mut extension_names_raw = vec![ash::extensions::khr::Surface::name().as_ptr()];
        push_platform_surface_extensions(&mut extension_names_raw);

        let validation_enabled = cfg!(debug_assertions) && validation_layer_available(&entry)?;
        if validation_enabled {
            extension_names_raw.push(ash::extensions::ext::DebugUtils::name().as_ptr());
        }

        let layer_names_raw: Vec<*const c_char> = if validation_enabled {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            Vec::new()
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_layer_names(&layer_names_raw)
            .enabled_extension_names(&extension_names_raw);

        let core = unsafe { entry.create_instance(&create_info, None) }?;

        let debug = if validation_enabled {
            Some(Arc::new(DebugMessenger::new(&entry, &core)?))
        } else {
            None
        };

        let surface_ext = Arc::new(ash::extensions::khr::Surface::new(&entry, &core));
        let physical_devices = PhysicalDevice::enumerate(&core)?;

        Ok(Self {
            entry,
            core,
            debug,
            surface_ext,
            physical_devices,
        })
    }

    pub fn physical_devices(&self) -> impl Iterator<Item = &PhysicalDeviceInfo> {
        self.physical_devices.iter().map(|device| &device.info)
    }

    pub fn create_surface<
        T: raw_window_handle::HasRawWindowHandle + raw_window_handle::HasRawDisplayHandle,
    >(
        &self,
        window: &T,
    ) -> Result<Surface> {
        let handle = unsafe {
            ash_window::create_surface(
                &self.entry,
                &self.core,
                window.raw_display_handle(),
                window.raw_window_handle(),
                None,
            )
        }?;

        Ok(Surface {
            handle,
            surface_ext: self.surface_ext.clone(),
        })
    }

    /// Picks the highest-scoring physical device (optionally filtered by
    /// presentation support to `surface`) and builds a [`Device`] on it.
    pub fn create_device(
        &self,
        surface: Option<&Surface>,
        score_function: impl Fn(&PhysicalDeviceInfo) -> u32,
    ) -> Result<Device> {
        let best = self
            .physical_devices
            .iter()
            .filter(|device| match surface {
                Some(surface) => self.supports_present(device, surface),
                None => true,
            })
            .max_by_key(|device| score_function(&device.info));

        let best = best.ok_or(Error::NoSuitablePhysicalDevice)?;

        Device::new(
            &self.core,
            best.handle,
            best.graphics_queue_family_index,
            best.info.clone(),
            self.debug.clone(),
        )
    }

    fn supports_present(&self, device: &PhysicalDevice, surface: &Surface) -> bool {
        unsafe {
            self.surface_ext.get_physical_device_surface_support(
                device.handle,
                device.graphics_queue_family_index,
                surface.handle,
            )
        }
        .unwrap_or(false)
    }
}

fn validation_layer_available(entry: &ash::Entry) -> Result<bool> {
    let layers = entry.enumerate_instance_layer_properties()?;
    Ok(layers.iter().any(|layer| {
        let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
        name == VALIDATION_LAYER
    }))
}

fn push_platform_surface_extensions(extension_names_raw: &mut Vec<*const c_char>) {
    #[cfg(target_os = "windows")]
    extension_names_raw.push(ash::extensions::khr::Win32Surface::name().as_ptr());

    #[cfg(any(
        target_os = "linux",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "openbsd"
    ))]
    {
        extension_names_raw.push(ash::extensions::khr::XlibSurface::name().as_ptr());
        extension_names_raw.push(ash::extensions::khr::WaylandSurface::name().as_ptr());
    }

    #[cfg(target_os = "macos")]
    extension_names_raw.push(ash::extensions::ext::MetalSurface::name().as_ptr());
}

impl Drop for Instance {
    fn drop(&mut self) {
        self.debug.take();
        unsafe {
            self.core.destroy_instance(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(device_type: vk::PhysicalDeviceType) -> PhysicalDeviceInfo {
        PhysicalDeviceInfo {
            name: "test".into(),
            device_type,
            limits: vk::PhysicalDeviceLimits::default(),
            raytracing_supported: false,
        }
    }

    #[test]
    fn discrete_outranks_integrated() {
        assert!(
            score_physical_device(&info(vk::PhysicalDeviceType::DISCRETE_GPU))
                > score_physical_device(&info(vk::PhysicalDeviceType::INTEGRATED_GPU))
        );
    }

    #[test]
    fn integrated_outranks_cpu() {
        assert!(
            score_physical_device(&info(vk::PhysicalDeviceType::INTEGRATED_GPU))
                > score_physical_device(&info(vk::PhysicalDeviceType::CPU))
        );
    }
}
