//! Vulkan device bootstrap
//!
//! Owns the instance, debug messenger, window surface, logical device,
//! queues and the command pool. Everything else receives an `Rc<Device>`
//! and calls only the helpers it needs.

use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::{vk, Entry, Instance};
use std::collections::HashSet;
use std::ffi::{CStr, CString};

use crate::config::EngineConfig;
use crate::render::error::{VulkanError, VulkanResult};
use crate::render::window::Window;

const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";

/// Surface capabilities, formats and present modes for the selected GPU
#[derive(Debug, Clone)]
pub struct SwapChainSupportDetails {
    /// Image count, extent and transform limits
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported format and color space pairs
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported presentation modes
    pub present_modes: Vec<vk::PresentModeKHR>,
}

/// Queue families used by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// Family with graphics and compute support
    pub graphics: u32,
    /// Family that can present to the surface
    pub present: u32,
}

/// Logical GPU device plus the instance-level objects it depends on
pub struct Device {
    command_pool: vk::CommandPool,
    swapchain_loader: SwapchainLoader,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    queue_families: QueueFamilyIndices,
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    surface: vk::SurfaceKHR,
    surface_loader: Surface,
    debug: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
    instance: Instance,
    _entry: Entry,
}

impl Device {
    /// Bring up Vulkan for `window`
    pub fn new(window: &Window, config: &EngineConfig) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }.map_err(|e| {
            VulkanError::InitializationFailed(format!("Failed to load Vulkan: {:?}", e))
        })?;

        let instance = create_instance(&entry, window, config)?;

        let debug = if config.enable_validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            let messenger = setup_debug_messenger(&debug_utils, config.debug_print)?;
            Some((debug_utils, messenger))
        } else {
            None
        };

        let surface_loader = Surface::new(&entry, &instance);
        let surface = window.create_surface(instance.handle()).map_err(|e| {
            VulkanError::InitializationFailed(format!("Surface creation: {}", e))
        })?;

        let (physical_device, queue_families) =
            pick_physical_device(&instance, &surface_loader, surface)?;
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        log::info!("Selected GPU: {}", unsafe {
            CStr::from_ptr(properties.device_name.as_ptr()).to_string_lossy()
        });

        let device = create_logical_device(&instance, physical_device, queue_families)?;
        let graphics_queue = unsafe { device.get_device_queue(queue_families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(queue_families.present, 0) };
        let swapchain_loader = SwapchainLoader::new(&instance, &device);

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(queue_families.graphics)
            .flags(
                vk::CommandPoolCreateFlags::TRANSIENT
                    | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            );
        let command_pool = unsafe {
            device
                .create_command_pool(&pool_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self {
            command_pool,
            swapchain_loader,
            graphics_queue,
            present_queue,
            queue_families,
            device,
            physical_device,
            properties,
            surface,
            surface_loader,
            debug,
            instance,
            _entry: entry,
        })
    }

    /// Raw logical device
    pub fn raw(&self) -> &ash::Device {
        &self.device
    }

    /// Instance the device was created from
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// Swapchain extension loader
    pub fn swapchain_loader(&self) -> &SwapchainLoader {
        &self.swapchain_loader
    }

    /// Window surface
    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// Graphics (and compute) queue
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Presentation queue
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    /// Queue family indices
    pub fn queue_families(&self) -> QueueFamilyIndices {
        self.queue_families
    }

    /// Pool every command buffer is allocated from
    pub fn command_pool(&self) -> vk::CommandPool {
        self.command_pool
    }

    /// Physical device properties
    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    /// Query what the surface supports right now
    pub fn swap_chain_support(&self) -> VulkanResult<SwapChainSupportDetails> {
        query_swap_chain_support(&self.surface_loader, self.physical_device, self.surface)
    }

    /// Index of a memory type allowed by `type_filter` with all of `properties`
    pub fn find_memory_type(
        &self,
        type_filter: u32,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<u32> {
        let memory = unsafe {
            self.instance
                .get_physical_device_memory_properties(self.physical_device)
        };

        (0..memory.memory_type_count)
            .find(|&index| {
                type_filter & (1 << index) != 0
                    && memory.memory_types[index as usize]
                        .property_flags
                        .contains(properties)
            })
            .ok_or(VulkanError::NoSuitableMemoryType)
    }

    /// First candidate whose `tiling` features include `features`
    pub fn find_supported_format(
        &self,
        candidates: &[vk::Format],
        tiling: vk::ImageTiling,
        features: vk::FormatFeatureFlags,
    ) -> Option<vk::Format> {
        candidates.iter().copied().find(|&format| {
            let props = unsafe {
                self.instance
                    .get_physical_device_format_properties(self.physical_device, format)
            };
            format_supports(&props, tiling, features)
        })
    }

    /// Create a buffer and bind freshly allocated memory to it
    pub fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<(vk::Buffer, vk::DeviceMemory)> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe {
            self.device
                .create_buffer(&buffer_info, None)
                .map_err(VulkanError::Api)?
        };

        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        let memory = match self.allocate(requirements, properties) {
            Ok(memory) => memory,
            Err(err) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(err);
            }
        };

        if let Err(result) = unsafe { self.device.bind_buffer_memory(buffer, memory, 0) } {
            unsafe {
                self.device.destroy_buffer(buffer, None);
                self.device.free_memory(memory, None);
            }
            return Err(VulkanError::Api(result));
        }

        Ok((buffer, memory))
    }

    /// Create an image from `image_info` and bind freshly allocated memory to it
    pub fn create_image_with_info(
        &self,
        image_info: &vk::ImageCreateInfo,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<(vk::Image, vk::DeviceMemory)> {
        let image = unsafe {
            self.device
                .create_image(image_info, None)
                .map_err(VulkanError::Api)?
        };

        let requirements = unsafe { self.device.get_image_memory_requirements(image) };
        let memory = match self.allocate(requirements, properties) {
            Ok(memory) => memory,
            Err(err) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(err);
            }
        };

        if let Err(result) = unsafe { self.device.bind_image_memory(image, memory, 0) } {
            unsafe {
                self.device.destroy_image(image, None);
                self.device.free_memory(memory, None);
            }
            return Err(VulkanError::Api(result));
        }

        Ok((image, memory))
    }

    fn allocate(
        &self,
        requirements: vk::MemoryRequirements,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<vk::DeviceMemory> {
        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(self.find_memory_type(requirements.memory_type_bits, properties)?);

        unsafe {
            self.device
                .allocate_memory(&alloc_info, None)
                .map_err(VulkanError::Api)
        }
    }

    /// Allocate and begin a one-shot command buffer
    pub fn begin_single_time_commands(&self) -> VulkanResult<vk::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_pool(self.command_pool)
            .command_buffer_count(1);

        let command_buffer = unsafe {
            self.device
                .allocate_command_buffers(&alloc_info)
                .map_err(VulkanError::Api)?[0]
        };

        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device
                .begin_command_buffer(command_buffer, &begin_info)
                .map_err(VulkanError::Api)?;
        }

        Ok(command_buffer)
    }

    /// Submit a one-shot command buffer, wait for it and free it
    pub fn end_single_time_commands(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        let command_buffers = [command_buffer];
        let result = unsafe {
            self.device
                .end_command_buffer(command_buffer)
                .and_then(|()| {
                    let submit_info = vk::SubmitInfo::builder()
                        .command_buffers(&command_buffers)
                        .build();
                    self.device
                        .queue_submit(self.graphics_queue, &[submit_info], vk::Fence::null())
                })
                .and_then(|()| self.device.queue_wait_idle(self.graphics_queue))
        };

        unsafe {
            self.device
                .free_command_buffers(self.command_pool, &command_buffers);
        }

        result.map_err(VulkanError::Api)
    }

    /// Copy `size` bytes between buffers and wait for completion
    pub fn copy_buffer(
        &self,
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    ) -> VulkanResult<()> {
        let command_buffer = self.begin_single_time_commands()?;
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        unsafe {
            self.device
                .cmd_copy_buffer(command_buffer, src, dst, &[region]);
        }
        self.end_single_time_commands(command_buffer)
    }

    /// Block until every queue is idle
    pub fn wait_idle(&self) -> VulkanResult<()> {
        unsafe { self.device.device_wait_idle().map_err(VulkanError::Api) }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some((debug_utils, messenger)) = self.debug.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

fn format_supports(
    props: &vk::FormatProperties,
    tiling: vk::ImageTiling,
    features: vk::FormatFeatureFlags,
) -> bool {
    match tiling {
        vk::ImageTiling::LINEAR => props.linear_tiling_features.contains(features),
        vk::ImageTiling::OPTIMAL => props.optimal_tiling_features.contains(features),
        _ => false,
    }
}

fn create_instance(entry: &Entry, window: &Window, config: &EngineConfig) -> VulkanResult<Instance> {
    let app_name = CString::new(config.window.name.as_str())
        .map_err(|e| VulkanError::InitializationFailed(format!("Invalid application name: {}", e)))?;
    let engine_name = CString::new("Shaman Engine")
        .map_err(|e| VulkanError::InitializationFailed(e.to_string()))?;
    let app_info = vk::ApplicationInfo::builder()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 1, 0, 0))
        .engine_name(&engine_name)
        .engine_version(vk::make_api_version(0, 1, 0, 0))
        .api_version(vk::API_VERSION_1_1);

    let required_extensions = window.required_instance_extensions().map_err(|e| {
        VulkanError::InitializationFailed(format!("Failed to get required extensions: {}", e))
    })?;
    let extension_names = required_extensions
        .iter()
        .map(|ext| CString::new(ext.as_str()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| VulkanError::InitializationFailed(e.to_string()))?;

    let mut extensions: Vec<*const std::os::raw::c_char> =
        extension_names.iter().map(|ext| ext.as_ptr()).collect();

    let mut layer_names = Vec::new();
    if config.enable_validation {
        ensure_layer_available(entry, VALIDATION_LAYER)?;
        layer_names.push(
            CString::new(VALIDATION_LAYER)
                .map_err(|e| VulkanError::InitializationFailed(e.to_string()))?,
        );
        extensions.push(DebugUtils::name().as_ptr());
    }
    let layer_ptrs: Vec<*const std::os::raw::c_char> =
        layer_names.iter().map(|name| name.as_ptr()).collect();

    let enabled_features = [vk::ValidationFeatureEnableEXT::DEBUG_PRINTF];
    let mut validation_features =
        vk::ValidationFeaturesEXT::builder().enabled_validation_features(&enabled_features);

    let mut create_info = vk::InstanceCreateInfo::builder()
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layer_ptrs);

    if config.enable_validation && config.debug_print {
        create_info = create_info.push_next(&mut validation_features);
    }

    unsafe {
        entry
            .create_instance(&create_info, None)
            .map_err(VulkanError::Api)
    }
}

fn ensure_layer_available(entry: &Entry, layer: &str) -> VulkanResult<()> {
    #[allow(unused_unsafe)]
    let available = unsafe { entry.enumerate_instance_layer_properties() }
        .map_err(VulkanError::Api)?;

    let found = available.iter().any(|props| {
        let name = unsafe { CStr::from_ptr(props.layer_name.as_ptr()) };
        name.to_str() == Ok(layer)
    });

    if found {
        Ok(())
    } else {
        Err(VulkanError::InitializationFailed(format!(
            "Validation layer {} requested but not available",
            layer
        )))
    }
}

fn setup_debug_messenger(
    debug_utils: &DebugUtils,
    debug_print: bool,
) -> VulkanResult<vk::DebugUtilsMessengerEXT> {
    let mut severity =
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR;
    if debug_print {
        severity |= vk::DebugUtilsMessageSeverityFlagsEXT::INFO;
    }

    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(severity)
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback));

    unsafe {
        debug_utils
            .create_debug_utils_messenger(&create_info, None)
            .map_err(VulkanError::Api)
    }
}

/// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if callback_data.is_null() || (*callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {:?} - {}", message_type, message);
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!("[Vulkan] {:?} - {}", message_type, message);
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::INFO {
        log::info!("[Vulkan] {:?} - {}", message_type, message);
    } else {
        log::debug!("[Vulkan] {:?} - {}", message_type, message);
    }

    vk::FALSE
}

fn query_swap_chain_support(
    surface_loader: &Surface,
    physical_device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
) -> VulkanResult<SwapChainSupportDetails> {
    unsafe {
        Ok(SwapChainSupportDetails {
            capabilities: surface_loader
                .get_physical_device_surface_capabilities(physical_device, surface)
                .map_err(VulkanError::Api)?,
            formats: surface_loader
                .get_physical_device_surface_formats(physical_device, surface)
                .map_err(VulkanError::Api)?,
            present_modes: surface_loader
                .get_physical_device_surface_present_modes(physical_device, surface)
                .map_err(VulkanError::Api)?,
        })
    }
}

fn pick_physical_device(
    instance: &Instance,
    surface_loader: &Surface,
    surface: vk::SurfaceKHR,
) -> VulkanResult<(vk::PhysicalDevice, QueueFamilyIndices)> {
    let devices = unsafe {
        instance
            .enumerate_physical_devices()
            .map_err(VulkanError::Api)?
    };
    log::debug!("Found {} physical device(s)", devices.len());

    for device in devices {
        match evaluate_device(instance, surface_loader, surface, device) {
            Ok(indices) => return Ok((device, indices)),
            Err(reason) => log::debug!("Skipping physical device: {}", reason),
        }
    }

    Err(VulkanError::InitializationFailed(
        "No suitable GPU found".to_string(),
    ))
}

fn evaluate_device(
    instance: &Instance,
    surface_loader: &Surface,
    surface: vk::SurfaceKHR,
    device: vk::PhysicalDevice,
) -> VulkanResult<QueueFamilyIndices> {
    let queue_families = unsafe { instance.get_physical_device_queue_family_properties(device) };

    let mut graphics = None;
    let mut present = None;
    for (index, family) in queue_families.iter().enumerate() {
        let index = index as u32;
        if graphics.is_none()
            && family.queue_count > 0
            && family
                .queue_flags
                .contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
        {
            graphics = Some(index);
        }

        let present_support = unsafe {
            surface_loader
                .get_physical_device_surface_support(device, index, surface)
                .map_err(VulkanError::Api)?
        };
        if present.is_none() && family.queue_count > 0 && present_support {
            present = Some(index);
        }

        if graphics.is_some() && present.is_some() {
            break;
        }
    }

    let indices = match (graphics, present) {
        (Some(graphics), Some(present)) => QueueFamilyIndices { graphics, present },
        _ => {
            return Err(VulkanError::InitializationFailed(
                "Missing graphics/compute or present queue family".to_string(),
            ))
        }
    };

    let extensions = unsafe {
        instance
            .enumerate_device_extension_properties(device)
            .map_err(VulkanError::Api)?
    };
    let has_swapchain = extensions.iter().any(|available| {
        let name = unsafe { CStr::from_ptr(available.extension_name.as_ptr()) };
        name == SwapchainLoader::name()
    });
    if !has_swapchain {
        return Err(VulkanError::InitializationFailed(
            "Swapchain extension not supported".to_string(),
        ));
    }

    let support = query_swap_chain_support(surface_loader, device, surface)?;
    if support.formats.is_empty() || support.present_modes.is_empty() {
        return Err(VulkanError::InitializationFailed(
            "Surface reports no formats or present modes".to_string(),
        ));
    }

    Ok(indices)
}

fn create_logical_device(
    instance: &Instance,
    physical_device: vk::PhysicalDevice,
    indices: QueueFamilyIndices,
) -> VulkanResult<ash::Device> {
    let unique_families: HashSet<u32> = [indices.graphics, indices.present].into_iter().collect();
    let priorities = [1.0_f32];

    let queue_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
        .iter()
        .map(|&family| {
            vk::DeviceQueueCreateInfo::builder()
                .queue_family_index(family)
                .queue_priorities(&priorities)
                .build()
        })
        .collect();

    let required_extensions = [SwapchainLoader::name().as_ptr()];
    let device_features = vk::PhysicalDeviceFeatures::default();

    let create_info = vk::DeviceCreateInfo::builder()
        .queue_create_infos(&queue_infos)
        .enabled_extension_names(&required_extensions)
        .enabled_features(&device_features);

    unsafe {
        instance
            .create_device(physical_device, &create_info, None)
            .map_err(VulkanError::Api)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_supports_checks_requested_tiling() {
        let props = vk::FormatProperties {
            linear_tiling_features: vk::FormatFeatureFlags::empty(),
            optimal_tiling_features: vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            buffer_features: vk::FormatFeatureFlags::empty(),
        };

        assert!(format_supports(
            &props,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
        ));
        assert!(!format_supports(
            &props,
            vk::ImageTiling::LINEAR,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
        ));
    }
}
