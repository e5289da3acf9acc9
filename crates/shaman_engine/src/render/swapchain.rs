//! Vulkan swap chain management
//!
//! [`SwapChain`] owns the presentable images together with everything derived
//! from them (views, depth buffers, framebuffers, the shared render pass) and
//! the per-slot synchronization objects. Recreation builds a complete new
//! instance next to the old one, which the caller then drops.

use ash::vk;
use std::rc::Rc;

use crate::render::device::Device;
use crate::render::error::{VulkanError, VulkanResult};
use crate::render::sync::{FrameSync, ImageFenceTracker};

/// Depth formats probed in priority order
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Stages that wait on the image-available semaphore. Raster frames write
/// the image as a color attachment, ray-traced frames as a copy target.
pub const ACQUIRE_WAIT_STAGES: vk::PipelineStageFlags = vk::PipelineStageFlags::from_raw(
    vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT.as_raw() | vk::PipelineStageFlags::TRANSFER.as_raw(),
);

/// Formats a swap chain settled on; must survive recreation unchanged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapChainFormats {
    /// Presentable image format
    pub image: vk::Format,
    /// Depth attachment format
    pub depth: vk::Format,
}

/// Everything owned per presentable image
#[derive(Debug, Clone, Copy)]
pub struct SwapChainImage {
    /// Image owned by the presentation engine
    pub image: vk::Image,
    /// Color view of `image`
    pub view: vk::ImageView,
    /// Depth attachment image
    pub depth_image: vk::Image,
    /// Memory backing `depth_image`
    pub depth_memory: vk::DeviceMemory,
    /// View of `depth_image`
    pub depth_view: vk::ImageView,
    /// Framebuffer binding `view` and `depth_view` to the render pass
    pub framebuffer: vk::Framebuffer,
}

impl SwapChainImage {
    fn new(image: vk::Image) -> Self {
        Self {
            image,
            view: vk::ImageView::null(),
            depth_image: vk::Image::null(),
            depth_memory: vk::DeviceMemory::null(),
            depth_view: vk::ImageView::null(),
            framebuffer: vk::Framebuffer::null(),
        }
    }

    /// Null handles are skipped by Vulkan, so partially built records are fine
    unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_framebuffer(self.framebuffer, None);
        device.destroy_image_view(self.depth_view, None);
        device.destroy_image(self.depth_image, None);
        device.free_memory(self.depth_memory, None);
        device.destroy_image_view(self.view, None);
    }
}

/// Presentable images plus per-slot synchronization
pub struct SwapChain {
    device: Rc<Device>,
    handle: vk::SwapchainKHR,
    render_pass: vk::RenderPass,
    images: Vec<SwapChainImage>,
    frames: Vec<FrameSync>,
    image_fences: ImageFenceTracker,
    formats: SwapChainFormats,
    extent: vk::Extent2D,
    image_usage: vk::ImageUsageFlags,
    current_frame: usize,
}

impl SwapChain {
    /// Build a swap chain for `window_extent`.
    ///
    /// `previous` is handed to the driver as the old swap chain so in-flight
    /// presentation can finish; the caller drops it once this returns.
    pub fn new(
        device: Rc<Device>,
        window_extent: vk::Extent2D,
        max_frames_in_flight: usize,
        previous: Option<&SwapChain>,
    ) -> VulkanResult<Self> {
        let support = device.swap_chain_support()?;
        let surface_format = choose_swap_surface_format(&support.formats)?;
        let present_mode = choose_swap_present_mode(&support.present_modes)?;
        let extent = choose_swap_extent(&support.capabilities, window_extent);
        let image_usage = choose_image_usage(support.capabilities.supported_usage_flags)?;
        let depth_format = select_depth_format(|format| {
            device
                .find_supported_format(
                    &[format],
                    vk::ImageTiling::OPTIMAL,
                    vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
                )
                .is_some()
        })?;

        let families = device.queue_families();
        let family_indices = [families.graphics, families.present];
        let mut create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(device.surface())
            .min_image_count(choose_image_count(&support.capabilities))
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(image_usage)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(previous.map_or_else(vk::SwapchainKHR::null, |old| old.handle));

        create_info = if families.graphics == families.present {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        } else {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&family_indices)
        };

        let handle = unsafe {
            device
                .swapchain_loader()
                .create_swapchain(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        let mut swap_chain = Self {
            device,
            handle,
            render_pass: vk::RenderPass::null(),
            images: Vec::new(),
            frames: Vec::new(),
            image_fences: ImageFenceTracker::new(0),
            formats: SwapChainFormats {
                image: surface_format.format,
                depth: depth_format,
            },
            extent,
            image_usage,
            current_frame: 0,
        };

        swap_chain.create_render_pass()?;
        swap_chain.create_image_resources()?;
        swap_chain.create_sync_objects(max_frames_in_flight)?;

        if let Some(previous) = previous {
            log::debug!(
                "Swap chain rebuilt, formats {:?} -> {:?}",
                previous.formats,
                swap_chain.formats
            );
        }
        log::info!(
            "Created swap chain {}x{} with {} images, {:?}, {:?}",
            extent.width,
            extent.height,
            swap_chain.images.len(),
            surface_format.format,
            present_mode
        );

        Ok(swap_chain)
    }

    fn create_render_pass(&mut self) -> VulkanResult<()> {
        let color_attachment = vk::AttachmentDescription::builder()
            .format(self.formats.image)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .build();

        let depth_attachment = vk::AttachmentDescription::builder()
            .format(self.formats.depth)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            .build();

        let attachments = [color_attachment, depth_attachment];

        let color_refs = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };

        let subpasses = [vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)
            .depth_stencil_attachment(&depth_ref)
            .build()];

        let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
        let dependencies = [vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(stages)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(stages)
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            )
            .build()];

        let create_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        self.render_pass = unsafe {
            self.device
                .raw()
                .create_render_pass(&create_info, None)
                .map_err(VulkanError::Api)?
        };
        Ok(())
    }

    /// One record per image: color view, depth buffer and framebuffer
    fn create_image_resources(&mut self) -> VulkanResult<()> {
        let device = Rc::clone(&self.device);
        let raw = device.raw();

        let images = unsafe {
            device
                .swapchain_loader()
                .get_swapchain_images(self.handle)
                .map_err(VulkanError::Api)?
        };

        for image in images {
            self.images.push(SwapChainImage::new(image));
            let record = self
                .images
                .last_mut()
                .ok_or_else(|| VulkanError::InvalidOperation {
                    reason: "swap chain image record vanished".to_string(),
                })?;

            record.view = create_view(raw, image, self.formats.image, vk::ImageAspectFlags::COLOR)?;

            let depth_info = vk::ImageCreateInfo::builder()
                .image_type(vk::ImageType::TYPE_2D)
                .extent(vk::Extent3D {
                    width: self.extent.width,
                    height: self.extent.height,
                    depth: 1,
                })
                .mip_levels(1)
                .array_layers(1)
                .format(self.formats.depth)
                .tiling(vk::ImageTiling::OPTIMAL)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
                .samples(vk::SampleCountFlags::TYPE_1)
                .sharing_mode(vk::SharingMode::EXCLUSIVE)
                .build();
            let (depth_image, depth_memory) =
                device.create_image_with_info(&depth_info, vk::MemoryPropertyFlags::DEVICE_LOCAL)?;
            record.depth_image = depth_image;
            record.depth_memory = depth_memory;
            record.depth_view = create_view(
                raw,
                depth_image,
                self.formats.depth,
                depth_aspect(self.formats.depth),
            )?;

            let attachments = [record.view, record.depth_view];
            let framebuffer_info = vk::FramebufferCreateInfo::builder()
                .render_pass(self.render_pass)
                .attachments(&attachments)
                .width(self.extent.width)
                .height(self.extent.height)
                .layers(1);
            record.framebuffer = unsafe {
                raw.create_framebuffer(&framebuffer_info, None)
                    .map_err(VulkanError::Api)?
            };
        }

        Ok(())
    }

    fn create_sync_objects(&mut self, max_frames_in_flight: usize) -> VulkanResult<()> {
        for _ in 0..max_frames_in_flight {
            self.frames.push(FrameSync::new(self.device.raw().clone())?);
        }
        self.image_fences = ImageFenceTracker::new(self.images.len());
        Ok(())
    }

    /// Wait for the current slot's fence, then acquire the next image.
    ///
    /// Returns the image index and whether the swap chain is suboptimal;
    /// stale swap chains come back as `VulkanError::Api(ERROR_OUT_OF_DATE_KHR)`.
    pub fn acquire_next_image(&self) -> VulkanResult<(u32, bool)> {
        let frame = &self.frames[self.current_frame];
        frame.in_flight.wait(u64::MAX)?;

        unsafe {
            self.device
                .swapchain_loader()
                .acquire_next_image(
                    self.handle,
                    u64::MAX,
                    frame.image_available.handle(),
                    vk::Fence::null(),
                )
                .map_err(VulkanError::Api)
        }
    }

    /// Submit `buffers` for `image_index`, present it and advance the slot.
    ///
    /// Returns whether presentation reported the swap chain as suboptimal.
    pub fn submit_command_buffers(
        &mut self,
        buffers: &[vk::CommandBuffer],
        image_index: u32,
    ) -> VulkanResult<bool> {
        let raw = self.device.raw();
        let frame = &self.frames[self.current_frame];
        let slot_fence = frame.in_flight.handle();

        // Only reached when there are more images than slots; the bookkeeping
        // is covered by `render::sync` `test_more_images_than_slots`
        if let Some(previous) = self.image_fences.claim(image_index as usize, slot_fence) {
            unsafe {
                raw.wait_for_fences(&[previous], true, u64::MAX)
                    .map_err(VulkanError::Api)?;
            }
        }

        let wait_semaphores = [frame.image_available.handle()];
        let wait_stages = [ACQUIRE_WAIT_STAGES];
        let signal_semaphores = [frame.render_finished.handle()];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        frame.in_flight.reset()?;
        unsafe {
            raw.queue_submit(self.device.graphics_queue(), &[submit_info], slot_fence)
                .map_err(VulkanError::Api)?;
        }

        let swapchains = [self.handle];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&signal_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            self.device
                .swapchain_loader()
                .queue_present(self.device.present_queue(), &present_info)
        };

        self.current_frame = (self.current_frame + 1) % self.frames.len();
        result.map_err(VulkanError::Api)
    }

    /// Render pass shared by every framebuffer
    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    /// Framebuffer for `image_index`
    pub fn framebuffer(&self, image_index: usize) -> vk::Framebuffer {
        self.images[image_index].framebuffer
    }

    /// Presentable image for `image_index`
    pub fn image(&self, image_index: usize) -> vk::Image {
        self.images[image_index].image
    }

    /// Per-image resource records
    pub fn images(&self) -> &[SwapChainImage] {
        &self.images
    }

    /// Number of presentable images
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Chosen image and depth formats
    pub fn formats(&self) -> SwapChainFormats {
        self.formats
    }

    /// Image extent
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Usage the presentable images were created with
    pub fn image_usage(&self) -> vk::ImageUsageFlags {
        self.image_usage
    }

    /// Slot whose sync objects the next acquire will use
    pub fn current_frame(&self) -> usize {
        self.current_frame
    }
}

impl Drop for SwapChain {
    fn drop(&mut self) {
        let raw = self.device.raw();
        unsafe {
            for image in &self.images {
                image.destroy(raw);
            }
            raw.destroy_render_pass(self.render_pass, None);
            self.device
                .swapchain_loader()
                .destroy_swapchain(self.handle, None);
        }
        // `frames` drops its semaphores and fences after this
    }
}

fn create_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
    aspect_mask: vk::ImageAspectFlags,
) -> VulkanResult<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });

    unsafe {
        device
            .create_image_view(&create_info, None)
            .map_err(VulkanError::Api)
    }
}

/// Aspects a depth attachment view must cover for `format`
pub fn depth_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D16_UNORM_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::DEPTH,
    }
}

/// Prefer 8-bit BGRA sRGB with the sRGB color space, else the first format
pub fn choose_swap_surface_format(
    formats: &[vk::SurfaceFormatKHR],
) -> VulkanResult<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|sf| {
            sf.format == vk::Format::B8G8R8A8_SRGB
                && sf.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
        .ok_or(VulkanError::NoSurfaceFormats)
}

/// Mailbox when available, otherwise FIFO (always supported)
pub fn choose_swap_present_mode(modes: &[vk::PresentModeKHR]) -> VulkanResult<vk::PresentModeKHR> {
    if modes.is_empty() {
        return Err(VulkanError::NoPresentModes);
    }

    if modes.contains(&vk::PresentModeKHR::MAILBOX) {
        log::debug!("Present mode: Mailbox");
        Ok(vk::PresentModeKHR::MAILBOX)
    } else {
        log::debug!("Present mode: V-Sync");
        Ok(vk::PresentModeKHR::FIFO)
    }
}

/// Surface extent, or the window extent clamped to the surface limits when
/// the surface leaves the choice to the application
pub fn choose_swap_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    window_extent: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: window_extent.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: window_extent.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// Color attachment usage, plus transfer destination when the surface allows
/// it so the compute path can copy into presentable images
pub fn choose_image_usage(supported: vk::ImageUsageFlags) -> VulkanResult<vk::ImageUsageFlags> {
    if !supported.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT) {
        return Err(VulkanError::InitializationFailed(
            "surface images do not support color attachment usage".to_string(),
        ));
    }
    Ok(vk::ImageUsageFlags::COLOR_ATTACHMENT | (supported & vk::ImageUsageFlags::TRANSFER_DST))
}

/// One more than the minimum, capped by the maximum when there is one
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        desired.min(capabilities.max_image_count)
    } else {
        desired
    }
}

/// First entry of [`DEPTH_FORMAT_CANDIDATES`] accepted by `supports`
pub fn select_depth_format(
    mut supports: impl FnMut(vk::Format) -> bool,
) -> VulkanResult<vk::Format> {
    DEPTH_FORMAT_CANDIDATES
        .iter()
        .copied()
        .find(|&format| supports(format))
        .ok_or(VulkanError::NoSupportedDepthFormat)
}
