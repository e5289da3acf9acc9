//! Vulkan implementation of [`FrameTarget`]
//!
//! Owns the swap chain and the active pipeline along with the layout (and, for
//! ray tracing, the descriptors and output image) that pipeline needs. Both
//! owners are replaced wholesale on recreation.

use ash::vk;
use std::path::PathBuf;
use std::rc::Rc;

use crate::config::{EngineConfig, RenderMode};
use crate::render::device::Device;
use crate::render::error::{VulkanError, VulkanResult};
use crate::render::frame::{FrameRenderer, FrameTarget};
use crate::render::pipeline::Pipeline;
use crate::render::raster::{self, RasterLayout};
use crate::render::raytrace::RayTraceResources;
use crate::render::swapchain::{SwapChain, SwapChainFormats};
use crate::scene::{Camera, Model, RenderObject};

/// Clear color for the swap chain render pass
pub const CLEAR_COLOR: [f32; 4] = [0.01, 0.01, 0.01, 1.0];

/// Resources the active pipeline depends on
pub enum ModeResources {
    /// Push-constant-only layout
    Raster(RasterLayout),
    /// Descriptors, layout and output image
    RayTrace(RayTraceResources),
}

/// Swap chain plus the pipeline drawing into it
pub struct VulkanFrameTarget {
    pipeline: Pipeline,
    resources: ModeResources,
    swap_chain: SwapChain,
    device: Rc<Device>,
    max_frames_in_flight: usize,
}

/// The ray-traced path copies its output into presentable images
fn require_copy_target(usage: vk::ImageUsageFlags) -> VulkanResult<()> {
    if usage.contains(vk::ImageUsageFlags::TRANSFER_DST) {
        Ok(())
    } else {
        Err(VulkanError::InitializationFailed(
            "surface images cannot be transfer destinations, ray tracing unavailable".to_string(),
        ))
    }
}

impl VulkanFrameTarget {
    /// Target drawing render objects with the graphics pipeline
    pub fn raster(
        device: Rc<Device>,
        window_extent: vk::Extent2D,
        config: &EngineConfig,
    ) -> VulkanResult<Self> {
        let swap_chain = SwapChain::new(
            Rc::clone(&device),
            window_extent,
            config.max_frames_in_flight,
            None,
        )?;
        let layout = RasterLayout::new(device.raw())?;
        let pipeline = Pipeline::graphics(
            device.raw().clone(),
            PathBuf::from(&config.shader_path),
            layout.pipeline_config(swap_chain.render_pass()),
        )?;

        log::info!("Raster frame target ready");
        Ok(Self {
            pipeline,
            resources: ModeResources::Raster(layout),
            swap_chain,
            device,
            max_frames_in_flight: config.max_frames_in_flight,
        })
    }

    /// Target tracing `scene` with the compute pipeline
    pub fn ray_traced(
        device: Rc<Device>,
        window_extent: vk::Extent2D,
        config: &EngineConfig,
        scene: Rc<Model>,
    ) -> VulkanResult<Self> {
        let swap_chain = SwapChain::new(
            Rc::clone(&device),
            window_extent,
            config.max_frames_in_flight,
            None,
        )?;
        require_copy_target(swap_chain.image_usage())?;
        let resources = RayTraceResources::new(Rc::clone(&device), scene, swap_chain.extent())?;
        let pipeline = Pipeline::compute(
            device.raw().clone(),
            PathBuf::from(&config.shader_path),
            resources.pipeline_config(),
        )?;

        log::info!("Ray tracing frame target ready");
        Ok(Self {
            pipeline,
            resources: ModeResources::RayTrace(resources),
            swap_chain,
            device,
            max_frames_in_flight: config.max_frames_in_flight,
        })
    }

    /// Which path this target renders with
    pub fn mode(&self) -> RenderMode {
        match self.resources {
            ModeResources::Raster(_) => RenderMode::Raster,
            ModeResources::RayTrace(_) => RenderMode::RayTrace,
        }
    }

    /// Current swap chain
    pub fn swap_chain(&self) -> &SwapChain {
        &self.swap_chain
    }

    /// Record raster draws for `objects`; must be inside the render pass
    pub fn record_objects(
        &self,
        command_buffer: vk::CommandBuffer,
        objects: &[RenderObject],
        camera: &Camera,
    ) -> VulkanResult<()> {
        match &self.resources {
            ModeResources::Raster(_) => {
                raster::record_objects(
                    self.device.raw(),
                    command_buffer,
                    &self.pipeline,
                    objects,
                    camera,
                );
                Ok(())
            }
            ModeResources::RayTrace(_) => Err(VulkanError::InvalidOperation {
                reason: "render_objects called on a ray tracing target".to_string(),
            }),
        }
    }

    /// Record the trace-and-copy sequence into swap chain image `image_index`
    pub fn record_rays(
        &self,
        command_buffer: vk::CommandBuffer,
        image_index: u32,
        camera: &Camera,
    ) -> VulkanResult<()> {
        match &self.resources {
            ModeResources::RayTrace(resources) => resources.record(
                command_buffer,
                &self.pipeline,
                camera,
                self.swap_chain.image(image_index as usize),
            ),
            ModeResources::Raster(_) => Err(VulkanError::InvalidOperation {
                reason: "render_rays called on a raster target".to_string(),
            }),
        }
    }
}

impl FrameTarget for VulkanFrameTarget {
    fn max_frames_in_flight(&self) -> usize {
        self.max_frames_in_flight
    }

    fn allocate_command_buffers(&mut self, count: usize) -> VulkanResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_pool(self.device.command_pool())
            .command_buffer_count(count as u32);

        unsafe {
            self.device
                .raw()
                .allocate_command_buffers(&alloc_info)
                .map_err(VulkanError::Api)
        }
    }

    fn free_command_buffers(&mut self, buffers: &[vk::CommandBuffer]) {
        if buffers.is_empty() {
            return;
        }
        unsafe {
            self.device
                .raw()
                .free_command_buffers(self.device.command_pool(), buffers);
        }
    }

    fn acquire_next_image(&mut self) -> VulkanResult<(u32, bool)> {
        self.swap_chain.acquire_next_image()
    }

    fn begin_command_buffer(&mut self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::builder();
        unsafe {
            self.device
                .raw()
                .begin_command_buffer(command_buffer, &begin_info)
                .map_err(VulkanError::Api)
        }
    }

    fn end_command_buffer(&mut self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        unsafe {
            self.device
                .raw()
                .end_command_buffer(command_buffer)
                .map_err(VulkanError::Api)
        }
    }

    fn submit_command_buffers(
        &mut self,
        command_buffer: vk::CommandBuffer,
        image_index: u32,
    ) -> VulkanResult<bool> {
        self.swap_chain
            .submit_command_buffers(&[command_buffer], image_index)
    }

    fn current_frame(&self) -> usize {
        self.swap_chain.current_frame()
    }

    fn extent(&self) -> vk::Extent2D {
        self.swap_chain.extent()
    }

    fn formats(&self) -> SwapChainFormats {
        self.swap_chain.formats()
    }

    fn begin_render_pass(&mut self, command_buffer: vk::CommandBuffer, image_index: u32) {
        let extent = self.swap_chain.extent();
        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: CLEAR_COLOR,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];
        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.swap_chain.render_pass())
            .framebuffer(self.swap_chain.framebuffer(image_index as usize))
            .render_area(render_area)
            .clear_values(&clear_values);

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };

        let raw = self.device.raw();
        unsafe {
            raw.cmd_begin_render_pass(command_buffer, &begin_info, vk::SubpassContents::INLINE);
            raw.cmd_set_viewport(command_buffer, 0, &[viewport]);
            raw.cmd_set_scissor(command_buffer, 0, &[render_area]);
        }
    }

    fn end_render_pass(&mut self, command_buffer: vk::CommandBuffer) {
        unsafe {
            self.device.raw().cmd_end_render_pass(command_buffer);
        }
    }

    fn wait_idle(&mut self) -> VulkanResult<()> {
        self.device.wait_idle()
    }

    fn rebuild_swap_chain(&mut self, extent: vk::Extent2D) -> VulkanResult<()> {
        let swap_chain = SwapChain::new(
            Rc::clone(&self.device),
            extent,
            self.max_frames_in_flight,
            Some(&self.swap_chain),
        )?;
        self.swap_chain = swap_chain;

        if let ModeResources::RayTrace(resources) = &mut self.resources {
            require_copy_target(self.swap_chain.image_usage())?;
            resources.resize(self.swap_chain.extent())?;
        }
        Ok(())
    }

    fn rebuild_pipeline(&mut self) -> VulkanResult<()> {
        match self.resources {
            ModeResources::Raster(_) => {
                self.pipeline.config_mut().render_pass = self.swap_chain.render_pass();
                self.pipeline.recreate_graphics_pipeline()
            }
            ModeResources::RayTrace(_) => self.pipeline.recreate_compute_pipeline(),
        }
    }
}

impl FrameRenderer<VulkanFrameTarget> {
    /// Draw `objects` with the graphics pipeline; call between
    /// `begin_swap_chain_render_pass` and `end_swap_chain_render_pass`
    pub fn render_objects(
        &self,
        command_buffer: vk::CommandBuffer,
        objects: &[RenderObject],
        camera: &Camera,
    ) -> VulkanResult<()> {
        assert_eq!(
            command_buffer,
            self.current_command_buffer(),
            "Can't render objects into a command buffer from a different frame"
        );
        self.target().record_objects(command_buffer, objects, camera)
    }

    /// Trace the scene into the acquired swap chain image; no render pass needed
    pub fn render_rays(&self, command_buffer: vk::CommandBuffer, camera: &Camera) -> VulkanResult<()> {
        assert_eq!(
            command_buffer,
            self.current_command_buffer(),
            "Can't render rays into a command buffer from a different frame"
        );
        self.target()
            .record_rays(command_buffer, self.image_index(), camera)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ray_tracing_requires_transfer_destination_images() {
        assert!(require_copy_target(
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST
        )
        .is_ok());
        assert!(matches!(
            require_copy_target(vk::ImageUsageFlags::COLOR_ATTACHMENT),
            Err(VulkanError::InitializationFailed(_))
        ));
    }
}
