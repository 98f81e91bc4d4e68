//! `VK_EXT_debug_utils` messenger and object naming, enabled alongside
//! validation layers in debug builds (SPEC_FULL.md §2 AMBIENT).

use ash::vk;
use ash::vk::DebugUtilsObjectNameInfoEXT;
use std::ffi::{CStr, CString};

use log::{error, info, trace, warn};

pub struct DebugMessenger {
    debug_utils: ash::extensions::ext::DebugUtils,
    messenger: vk::DebugUtilsMessengerEXT,
}

impl DebugMessenger {
    pub(crate) fn new(entry: &ash::Entry, instance: &ash::Instance) -> ash::prelude::VkResult<Self> {
        let debug_utils = ash::extensions::ext::DebugUtils::new(entry, instance);
        let messenger = unsafe {
            debug_utils.create_debug_utils_messenger(
                &vk::DebugUtilsMessengerCreateInfoEXT::builder()
                    .message_severity(
                        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                            | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                            | vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE,
                    )
                    .message_type(
                        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                    )
                    .pfn_user_callback(Some(vulkan_debug_callback)),
                None,
            )?
        };

        Ok(Self {
            debug_utils,
            messenger,
        })
    }

    pub(crate) fn set_object_name<T: vk::Handle>(&self, device: vk::Device, object: T, name: &str) {
        let name = match CString::new(name) {
            Ok(name) => name,
            Err(_) => return,
        };
        let result = unsafe {
            self.debug_utils.set_debug_utils_object_name(
                device,
                &DebugUtilsObjectNameInfoEXT::builder()
                    .object_type(T::TYPE)
                    .object_handle(object.as_raw())
                    .object_name(name.as_c_str())
                    .build(),
            )
        };
        if let Err(e) = result {
            warn!("failed to set debug object name {:?}: {}", name, e);
        }
    }

    pub(crate) fn cmd_begin_label(&self, cb: vk::CommandBuffer, label: &str, color: [f32; 4]) {
        let Ok(label) = CString::new(label) else {
            return;
        };
        unsafe {
            self.debug_utils.cmd_begin_debug_utils_label(
                cb,
                &vk::DebugUtilsLabelEXT::builder()
                    .label_name(label.as_c_str())
                    .color(color),
            );
        }
    }

    pub(crate) fn cmd_end_label(&self, cb: vk::CommandBuffer) {
        unsafe {
            self.debug_utils.cmd_end_debug_utils_label(cb);
        }
    }
}

impl Drop for DebugMessenger {
    fn drop(&mut self) {
        unsafe {
            self.debug_utils
                .destroy_debug_utils_messenger(self.messenger, None);
        }
    }
}

unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    use std::borrow::Cow;
    let callback_data = *p_callback_data;
    let message = if callback_data.p_message.is_null() {
        Cow::from("")
    } else {
        CStr::from_ptr(callback_data.p_message).to_string_lossy()
    };

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE => trace!("{}", message),
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => info!("{}", message),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => warn!("{}", message),
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => error!("{}", message),
        _ => info!("[{:?}] {}", message_severity, message),
    }

    vk::FALSE
}
