//! Compute-shader ray tracing path
//!
//! A compute shader traces the scene's triangles into a storage image, which
//! is then copied into the acquired swap chain image. The storage image stays
//! in `GENERAL` between frames; only the copy window moves it through
//! `TRANSFER_SRC`.

use ash::vk;
use std::mem::size_of;
use std::rc::Rc;

use crate::foundation::math::{to_gpu_matrix, Mat4};
use crate::render::device::Device;
use crate::render::error::{VulkanError, VulkanResult};
use crate::render::pipeline::{Pipeline, PipelineConfigInfo};
use crate::render::sync::image_barrier;
use crate::scene::{Camera, Model};

/// Local size of `raytrace.comp` in both dimensions
pub const WORKGROUP_SIZE: u32 = 16;

/// Storage image format written by the compute shader
pub const OUTPUT_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// Workgroups needed to cover `extent`, rounding up at the edges
pub fn workgroup_counts(extent: vk::Extent2D) -> (u32, u32) {
    (
        (extent.width + WORKGROUP_SIZE - 1) / WORKGROUP_SIZE,
        (extent.height + WORKGROUP_SIZE - 1) / WORKGROUP_SIZE,
    )
}

/// Camera block for the compute shader
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayTracePushConstantData {
    /// Inverse of `projection * view`, unprojects clip-space rays
    pub inverse_projection_view: [[f32; 4]; 4],
    /// Output size in pixels
    pub resolution: [f32; 2],
    _padding: [f32; 2],
}

unsafe impl bytemuck::Pod for RayTracePushConstantData {}
unsafe impl bytemuck::Zeroable for RayTracePushConstantData {}

impl RayTracePushConstantData {
    /// Build from the camera and the output extent
    pub fn new(camera: &Camera, extent: vk::Extent2D) -> Self {
        let inverse = camera.projection_view().try_inverse().unwrap_or_else(|| {
            log::warn!("Camera projection-view is singular, tracing with identity");
            Mat4::identity()
        });

        Self {
            inverse_projection_view: to_gpu_matrix(&inverse),
            resolution: [extent.width as f32, extent.height as f32],
            _padding: [0.0; 2],
        }
    }

    /// Range covering the whole block
    pub fn range() -> vk::PushConstantRange {
        vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::COMPUTE,
            offset: 0,
            size: size_of::<Self>() as u32,
        }
    }
}

struct OutputImage {
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    extent: vk::Extent2D,
}

impl OutputImage {
    fn new(device: &Device, extent: vk::Extent2D) -> VulkanResult<Self> {
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(OUTPUT_FORMAT)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::TRANSFER_SRC)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .build();

        let (image, memory) =
            device.create_image_with_info(&image_info, vk::MemoryPropertyFlags::DEVICE_LOCAL)?;
        let mut output = Self {
            image,
            memory,
            view: vk::ImageView::null(),
            extent,
        };

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(OUTPUT_FORMAT)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        output.view = match unsafe { device.raw().create_image_view(&view_info, None) } {
            Ok(view) => view,
            Err(err) => {
                unsafe { output.destroy(device.raw()) };
                return Err(VulkanError::Api(err));
            }
        };

        if let Err(err) = output.transition_to_general(device) {
            unsafe { output.destroy(device.raw()) };
            return Err(err);
        }

        log::debug!(
            "Created ray tracing output image {}x{}",
            extent.width,
            extent.height
        );
        Ok(output)
    }

    fn transition_to_general(&self, device: &Device) -> VulkanResult<()> {
        let command_buffer = device.begin_single_time_commands()?;
        let barrier = image_barrier(
            self.image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::GENERAL,
            vk::AccessFlags::empty(),
            vk::AccessFlags::SHADER_WRITE,
        );
        unsafe {
            device.raw().cmd_pipeline_barrier(
                command_buffer,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
        device.end_single_time_commands(command_buffer)
    }

    unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_image_view(self.view, None);
        device.destroy_image(self.image, None);
        device.free_memory(self.memory, None);
    }
}

/// Descriptors, layout and output image of the ray tracing path
pub struct RayTraceResources {
    device: Rc<Device>,
    scene: Rc<Model>,
    set_layout: vk::DescriptorSetLayout,
    descriptor_pool: vk::DescriptorPool,
    descriptor_set: vk::DescriptorSet,
    pipeline_layout: vk::PipelineLayout,
    output: Option<OutputImage>,
}

impl RayTraceResources {
    /// Create resources tracing `scene` into an image of `extent`
    pub fn new(device: Rc<Device>, scene: Rc<Model>, extent: vk::Extent2D) -> VulkanResult<Self> {
        let mut resources = Self {
            device,
            scene,
            set_layout: vk::DescriptorSetLayout::null(),
            descriptor_pool: vk::DescriptorPool::null(),
            descriptor_set: vk::DescriptorSet::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            output: None,
        };
        resources.create_descriptors()?;
        resources.resize(extent)?;
        Ok(resources)
    }

    fn create_descriptors(&mut self) -> VulkanResult<()> {
        let raw = self.device.raw();

        let bindings = [
            vk::DescriptorSetLayoutBinding::builder()
                .binding(0)
                .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::COMPUTE)
                .build(),
            vk::DescriptorSetLayoutBinding::builder()
                .binding(1)
                .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::COMPUTE)
                .build(),
        ];
        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
        self.set_layout = unsafe {
            raw.create_descriptor_set_layout(&layout_info, None)
                .map_err(VulkanError::Api)?
        };

        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_BUFFER,
                descriptor_count: 1,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_IMAGE,
                descriptor_count: 1,
            },
        ];
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(1)
            .pool_sizes(&pool_sizes);
        self.descriptor_pool = unsafe {
            raw.create_descriptor_pool(&pool_info, None)
                .map_err(VulkanError::Api)?
        };

        let set_layouts = [self.set_layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.descriptor_pool)
            .set_layouts(&set_layouts);
        self.descriptor_set = unsafe {
            raw.allocate_descriptor_sets(&alloc_info)
                .map_err(VulkanError::Api)?[0]
        };

        let ranges = [RayTracePushConstantData::range()];
        let pipeline_layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&ranges);
        self.pipeline_layout = unsafe {
            raw.create_pipeline_layout(&pipeline_layout_info, None)
                .map_err(VulkanError::Api)?
        };

        let buffer_info = [vk::DescriptorBufferInfo {
            buffer: self.scene.buffer(),
            offset: 0,
            range: self.scene.size(),
        }];
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(self.descriptor_set)
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
            .buffer_info(&buffer_info)
            .build();
        unsafe { raw.update_descriptor_sets(&[write], &[]) };

        Ok(())
    }

    /// Replace the output image with one of `extent` and point the descriptor at it.
    ///
    /// The caller guarantees the old image is no longer in use.
    pub fn resize(&mut self, extent: vk::Extent2D) -> VulkanResult<()> {
        if let Some(old) = self.output.take() {
            unsafe { old.destroy(self.device.raw()) };
        }

        let output = OutputImage::new(&self.device, extent)?;
        let image_info = [vk::DescriptorImageInfo {
            sampler: vk::Sampler::null(),
            image_view: output.view,
            image_layout: vk::ImageLayout::GENERAL,
        }];
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(self.descriptor_set)
            .dst_binding(1)
            .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
            .image_info(&image_info)
            .build();
        unsafe { self.device.raw().update_descriptor_sets(&[write], &[]) };

        self.output = Some(output);
        Ok(())
    }

    /// Layout with the descriptor set and camera push range
    pub fn pipeline_layout(&self) -> vk::PipelineLayout {
        self.pipeline_layout
    }

    /// Pipeline config for the compute stage
    pub fn pipeline_config(&self) -> PipelineConfigInfo {
        PipelineConfigInfo {
            pipeline_layout: self.pipeline_layout,
            ..PipelineConfigInfo::default()
        }
    }

    /// Size of the current output image
    pub fn extent(&self) -> vk::Extent2D {
        self.output
            .as_ref()
            .map_or(vk::Extent2D::default(), |output| output.extent)
    }

    /// Trace the scene and copy the result into `swap_chain_image`, leaving it
    /// ready to present
    pub fn record(
        &self,
        command_buffer: vk::CommandBuffer,
        pipeline: &Pipeline,
        camera: &Camera,
        swap_chain_image: vk::Image,
    ) -> VulkanResult<()> {
        let output = self.output.as_ref().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "Ray tracing output image missing".to_string(),
        })?;
        let raw = self.device.raw();
        let extent = output.extent;
        let push = RayTracePushConstantData::new(camera, extent);
        let (groups_x, groups_y) = workgroup_counts(extent);

        pipeline.bind(command_buffer);
        unsafe {
            raw.cmd_bind_descriptor_sets(
                command_buffer,
                vk::PipelineBindPoint::COMPUTE,
                self.pipeline_layout,
                0,
                &[self.descriptor_set],
                &[],
            );
            raw.cmd_push_constants(
                command_buffer,
                self.pipeline_layout,
                vk::ShaderStageFlags::COMPUTE,
                0,
                bytemuck::bytes_of(&push),
            );
            raw.cmd_dispatch(command_buffer, groups_x, groups_y, 1);

            let to_transfer = [
                image_barrier(
                    output.image,
                    vk::ImageLayout::GENERAL,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    vk::AccessFlags::SHADER_WRITE,
                    vk::AccessFlags::TRANSFER_READ,
                ),
                image_barrier(
                    swap_chain_image,
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::AccessFlags::empty(),
                    vk::AccessFlags::TRANSFER_WRITE,
                ),
            ];
            raw.cmd_pipeline_barrier(
                command_buffer,
                vk::PipelineStageFlags::COMPUTE_SHADER | vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &to_transfer,
            );

            let layers = vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            };
            let region = vk::ImageCopy {
                src_subresource: layers,
                src_offset: vk::Offset3D::default(),
                dst_subresource: layers,
                dst_offset: vk::Offset3D::default(),
                extent: vk::Extent3D {
                    width: extent.width,
                    height: extent.height,
                    depth: 1,
                },
            };
            raw.cmd_copy_image(
                command_buffer,
                output.image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                swap_chain_image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );

            let to_present = [
                image_barrier(
                    output.image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    vk::ImageLayout::GENERAL,
                    vk::AccessFlags::TRANSFER_READ,
                    vk::AccessFlags::SHADER_WRITE,
                ),
                image_barrier(
                    swap_chain_image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::PRESENT_SRC_KHR,
                    vk::AccessFlags::TRANSFER_WRITE,
                    vk::AccessFlags::empty(),
                ),
            ];
            raw.cmd_pipeline_barrier(
                command_buffer,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::COMPUTE_SHADER | vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &to_present,
            );
        }
        Ok(())
    }
}

impl Drop for RayTraceResources {
    fn drop(&mut self) {
        let raw = self.device.raw();
        unsafe {
            if let Some(output) = self.output.take() {
                output.destroy(raw);
            }
            raw.destroy_pipeline_layout(self.pipeline_layout, None);
            // Destroying the pool frees the set
            raw.destroy_descriptor_pool(self.descriptor_pool, None);
            raw.destroy_descriptor_set_layout(self.set_layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_workgroups_cover_extent() {
        let hd = vk::Extent2D {
            width: 1280,
            height: 720,
        };
        assert_eq!(workgroup_counts(hd), (80, 45));

        let odd = vk::Extent2D {
            width: 1281,
            height: 1,
        };
        assert_eq!(workgroup_counts(odd), (81, 1));
    }

    #[test]
    fn test_push_constant_layout() {
        assert_eq!(size_of::<RayTracePushConstantData>(), 80);
        assert_eq!(RayTracePushConstantData::range().size, 80);
        assert_eq!(
            RayTracePushConstantData::range().stage_flags,
            vk::ShaderStageFlags::COMPUTE
        );
    }

    #[test]
    fn test_push_constant_inverts_camera() {
        let mut camera = Camera::default();
        camera.set_perspective_projection(1.0, 1.5, 0.1, 50.0);
        let extent = vk::Extent2D {
            width: 640,
            height: 480,
        };
        let push = RayTracePushConstantData::new(&camera, extent);

        let inverse = Mat4::from(push.inverse_projection_view);
        assert_relative_eq!(
            inverse * camera.projection_view(),
            Mat4::identity(),
            epsilon = 1e-4
        );
        assert_relative_eq!(push.resolution[0], 640.0);
        assert_relative_eq!(push.resolution[1], 480.0);
    }
}
