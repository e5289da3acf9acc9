//! Rasterized draw path: push constants, pipeline layout and per-object draws

use ash::vk;
use std::mem::size_of;

use crate::foundation::math::{to_gpu_matrix, Mat4, Vec3};
use crate::render::error::{VulkanError, VulkanResult};
use crate::render::pipeline::{Pipeline, PipelineConfigInfo};
use crate::scene::{Camera, RenderObject, Vertex};

/// Per-draw data: clip-space transform and flat color
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimplePushConstantData {
    /// `projection * view * model`, column-major
    pub transform: [[f32; 4]; 4],
    /// Linear RGB
    pub color: [f32; 3],
    _padding: f32, // vec3 occupies a vec4 slot
}

unsafe impl bytemuck::Pod for SimplePushConstantData {}
unsafe impl bytemuck::Zeroable for SimplePushConstantData {}

impl SimplePushConstantData {
    /// Pack a transform and color
    pub fn new(transform: &Mat4, color: &Vec3) -> Self {
        Self {
            transform: to_gpu_matrix(transform),
            color: [color.x, color.y, color.z],
            _padding: 0.0,
        }
    }

    /// Stages that read the block
    pub fn stages() -> vk::ShaderStageFlags {
        vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
    }

    /// Range covering the whole block
    pub fn range() -> vk::PushConstantRange {
        vk::PushConstantRange {
            stage_flags: Self::stages(),
            offset: 0,
            size: size_of::<Self>() as u32,
        }
    }
}

/// Pipeline layout for the raster path; push constants only
pub struct RasterLayout {
    device: ash::Device,
    layout: vk::PipelineLayout,
}

impl RasterLayout {
    /// Create the layout
    pub fn new(device: &ash::Device) -> VulkanResult<Self> {
        let ranges = [SimplePushConstantData::range()];
        let create_info = vk::PipelineLayoutCreateInfo::builder().push_constant_ranges(&ranges);

        let layout = unsafe {
            device
                .create_pipeline_layout(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self {
            device: device.clone(),
            layout,
        })
    }

    /// Raw layout handle
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }

    /// Pipeline config for drawing [`Vertex`] lists into `render_pass`
    pub fn pipeline_config(&self, render_pass: vk::RenderPass) -> PipelineConfigInfo {
        PipelineConfigInfo {
            binding_descriptions: Vertex::binding_descriptions(),
            attribute_descriptions: Vertex::attribute_descriptions(),
            pipeline_layout: self.layout,
            render_pass,
            ..PipelineConfigInfo::default()
        }
    }
}

impl Drop for RasterLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// Record one draw per object that has a model
pub fn record_objects(
    device: &ash::Device,
    command_buffer: vk::CommandBuffer,
    pipeline: &Pipeline,
    objects: &[RenderObject],
    camera: &Camera,
) {
    pipeline.bind(command_buffer);

    let projection_view = camera.projection_view();
    for object in objects {
        let Some(model) = &object.model else {
            continue;
        };

        let push = SimplePushConstantData::new(
            &(projection_view * object.transform.matrix()),
            &object.color,
        );
        unsafe {
            device.cmd_push_constants(
                command_buffer,
                pipeline.layout(),
                SimplePushConstantData::stages(),
                0,
                bytemuck::bytes_of(&push),
            );
        }
        model.bind(command_buffer);
        model.draw(command_buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_push_constant_layout() {
        assert_eq!(size_of::<SimplePushConstantData>(), 80);
        assert_eq!(SimplePushConstantData::range().size, 80);
        assert!(SimplePushConstantData::stages().contains(vk::ShaderStageFlags::FRAGMENT));
    }

    #[test]
    fn test_push_constant_bytes() {
        let mut transform = Mat4::identity();
        transform[(0, 3)] = 7.0;
        let push = SimplePushConstantData::new(&transform, &Vec3::new(0.1, 0.2, 0.3));

        let floats: [f32; 20] = bytemuck::cast(push);
        assert_relative_eq!(floats[12], 7.0);
        assert_relative_eq!(floats[16], 0.1);
        assert_relative_eq!(floats[18], 0.3);
        assert_relative_eq!(floats[19], 0.0);
    }
}
