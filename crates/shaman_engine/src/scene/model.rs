//! Vertex data and GPU-resident models

use ash::vk;
use std::mem::size_of;
use std::rc::Rc;

use crate::foundation::math::Vec3;
use crate::render::device::Device;
use crate::render::error::{VulkanError, VulkanResult};

/// Per-vertex data shared by the raster pipeline and the ray-tracing storage buffer
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    /// Object-space position
    pub position: [f32; 3],
    /// Linear RGB color
    pub color: [f32; 3],
}

unsafe impl bytemuck::Pod for Vertex {}
unsafe impl bytemuck::Zeroable for Vertex {}

impl Vertex {
    /// Single interleaved binding at index 0
    pub fn binding_descriptions() -> Vec<vk::VertexInputBindingDescription> {
        vec![vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }]
    }

    /// Position at location 0, color at location 1
    pub fn attribute_descriptions() -> Vec<vk::VertexInputAttributeDescription> {
        vec![
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: 0,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: 12, // 3 * sizeof(f32)
            },
        ]
    }
}

const CUBE_FACES: [([f32; 3], [[f32; 3]; 6]); 6] = [
    // left face (white)
    (
        [0.9, 0.9, 0.9],
        [
            [-0.5, -0.5, -0.5],
            [-0.5, 0.5, 0.5],
            [-0.5, -0.5, 0.5],
            [-0.5, -0.5, -0.5],
            [-0.5, 0.5, -0.5],
            [-0.5, 0.5, 0.5],
        ],
    ),
    // right face (yellow)
    (
        [0.8, 0.8, 0.1],
        [
            [0.5, -0.5, -0.5],
            [0.5, 0.5, 0.5],
            [0.5, -0.5, 0.5],
            [0.5, -0.5, -0.5],
            [0.5, 0.5, -0.5],
            [0.5, 0.5, 0.5],
        ],
    ),
    // top face (orange, y points down)
    (
        [0.9, 0.6, 0.1],
        [
            [-0.5, -0.5, -0.5],
            [0.5, -0.5, 0.5],
            [-0.5, -0.5, 0.5],
            [-0.5, -0.5, -0.5],
            [0.5, -0.5, -0.5],
            [0.5, -0.5, 0.5],
        ],
    ),
    // bottom face (red)
    (
        [0.8, 0.1, 0.1],
        [
            [-0.5, 0.5, -0.5],
            [0.5, 0.5, 0.5],
            [-0.5, 0.5, 0.5],
            [-0.5, 0.5, -0.5],
            [0.5, 0.5, -0.5],
            [0.5, 0.5, 0.5],
        ],
    ),
    // nose face (blue)
    (
        [0.1, 0.1, 0.8],
        [
            [-0.5, -0.5, 0.5],
            [0.5, 0.5, 0.5],
            [-0.5, 0.5, 0.5],
            [-0.5, -0.5, 0.5],
            [0.5, -0.5, 0.5],
            [0.5, 0.5, 0.5],
        ],
    ),
    // tail face (green)
    (
        [0.1, 0.8, 0.1],
        [
            [-0.5, -0.5, -0.5],
            [0.5, 0.5, -0.5],
            [-0.5, 0.5, -0.5],
            [-0.5, -0.5, -0.5],
            [0.5, -0.5, -0.5],
            [0.5, 0.5, -0.5],
        ],
    ),
];

/// Triangle list for a unit cube centered on `offset`, one color per face
pub fn cube_vertices(offset: Vec3) -> Vec<Vertex> {
    CUBE_FACES
        .iter()
        .flat_map(|(color, corners)| {
            corners.iter().map(move |corner| Vertex {
                position: [
                    corner[0] + offset.x,
                    corner[1] + offset.y,
                    corner[2] + offset.z,
                ],
                color: *color,
            })
        })
        .collect()
}

/// Device-local vertex buffer, also bindable as a storage buffer
pub struct Model {
    device: Rc<Device>,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    vertex_count: u32,
}

impl Model {
    /// Upload `vertices` into a new buffer; at least one triangle is required
    pub fn new(device: Rc<Device>, vertices: &[Vertex]) -> VulkanResult<Self> {
        if vertices.len() < 3 {
            return Err(VulkanError::InvalidOperation {
                reason: format!("Model needs at least 3 vertices, got {}", vertices.len()),
            });
        }

        let bytes: &[u8] = bytemuck::cast_slice(vertices);
        let size = bytes.len() as vk::DeviceSize;
        let (buffer, memory) = device.create_buffer(
            size,
            vk::BufferUsageFlags::VERTEX_BUFFER
                | vk::BufferUsageFlags::STORAGE_BUFFER
                | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        let model = Self {
            device,
            buffer,
            memory,
            vertex_count: vertices.len() as u32,
        };

        let (staging, staging_memory) = model.device.create_buffer(
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        let uploaded = model
            .write_staging(staging_memory, bytes)
            .and_then(|()| model.device.copy_buffer(staging, model.buffer, size));
        unsafe {
            let raw = model.device.raw();
            raw.destroy_buffer(staging, None);
            raw.free_memory(staging_memory, None);
        }
        uploaded?;

        log::debug!("Created model with {} vertices", model.vertex_count);
        Ok(model)
    }

    /// Unit cube shifted by `offset`
    pub fn cube(device: Rc<Device>, offset: Vec3) -> VulkanResult<Self> {
        Self::new(device, &cube_vertices(offset))
    }

    fn write_staging(&self, memory: vk::DeviceMemory, bytes: &[u8]) -> VulkanResult<()> {
        let raw = self.device.raw();
        unsafe {
            let mapped = raw
                .map_memory(
                    memory,
                    0,
                    bytes.len() as vk::DeviceSize,
                    vk::MemoryMapFlags::empty(),
                )
                .map_err(VulkanError::Api)?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), mapped.cast::<u8>(), bytes.len());
            raw.unmap_memory(memory);
        }
        Ok(())
    }

    /// Bind as vertex buffer 0
    pub fn bind(&self, command_buffer: vk::CommandBuffer) {
        unsafe {
            self.device
                .raw()
                .cmd_bind_vertex_buffers(command_buffer, 0, &[self.buffer], &[0]);
        }
    }

    /// Draw every vertex as a triangle list
    pub fn draw(&self, command_buffer: vk::CommandBuffer) {
        unsafe {
            self.device
                .raw()
                .cmd_draw(command_buffer, self.vertex_count, 1, 0, 0);
        }
    }

    /// Underlying buffer, for storage-buffer descriptors
    pub fn buffer(&self) -> vk::Buffer {
        self.buffer
    }

    /// Number of vertices uploaded
    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    /// Buffer size in bytes
    pub fn size(&self) -> vk::DeviceSize {
        vk::DeviceSize::from(self.vertex_count) * size_of::<Vertex>() as vk::DeviceSize
    }
}

impl Drop for Model {
    fn drop(&mut self) {
        unsafe {
            let raw = self.device.raw();
            raw.destroy_buffer(self.buffer, None);
            raw.free_memory(self.memory, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_vertex_layout() {
        assert_eq!(size_of::<Vertex>(), 24);

        let bindings = Vertex::binding_descriptions();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].stride, 24);

        let attributes = Vertex::attribute_descriptions();
        assert_eq!(attributes[0].offset, 0);
        assert_eq!(attributes[1].offset, 12);
        assert_eq!(attributes[1].location, 1);
    }

    #[test]
    fn test_cube_has_six_colored_faces() {
        let vertices = cube_vertices(Vec3::zeros());
        assert_eq!(vertices.len(), 36);

        for face in vertices.chunks(6) {
            assert!(face.iter().all(|v| v.color == face[0].color));
        }
        assert_eq!(vertices[0].color, [0.9, 0.9, 0.9]);
        assert_eq!(vertices[35].color, [0.1, 0.8, 0.1]);
    }

    #[test]
    fn test_cube_offset_shifts_positions() {
        let offset = Vec3::new(1.0, -2.0, 3.0);
        let vertices = cube_vertices(offset);

        let min_x = vertices.iter().map(|v| v.position[0]).fold(f32::MAX, f32::min);
        let max_z = vertices.iter().map(|v| v.position[2]).fold(f32::MIN, f32::max);
        assert_relative_eq!(min_x, 0.5);
        assert_relative_eq!(max_z, 3.5);
    }

    #[test]
    fn test_vertices_cast_to_bytes() {
        let vertices = cube_vertices(Vec3::zeros());
        let bytes: &[u8] = bytemuck::cast_slice(&vertices);
        assert_eq!(bytes.len(), 36 * 24);
    }
}
