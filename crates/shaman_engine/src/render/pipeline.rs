//! Shader loading and pipeline management
//!
//! A [`Pipeline`] owns its shader modules and pipeline handle. Fixed-function
//! state lives in [`PipelineConfigInfo`]; the caller assigns the layout and,
//! for graphics, the render pass before creation. Recreation destroys the
//! old handles and compiles again from the same config.

use ash::vk;
use std::ffi::CStr;
use std::fs::File;
use std::path::{Path, PathBuf};

use crate::render::error::{VulkanError, VulkanResult};

/// Vertex stage of the raster path
pub const SIMPLE_VERT_SHADER: &str = "simple_shader_vert.spv";
/// Fragment stage of the raster path
pub const SIMPLE_FRAG_SHADER: &str = "simple_shader_frag.spv";
/// Compute stage of the ray-tracing path
pub const RAYTRACE_SHADER: &str = "raytrace.spv";

const ENTRY_POINT: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"main\0") };

/// Which bind point a pipeline targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineKind {
    /// Vertex + fragment stages inside the swap chain render pass
    Graphics,
    /// Single compute stage
    Compute,
}

/// Fixed-function state and bindings for pipeline creation
#[derive(Debug, Clone)]
pub struct PipelineConfigInfo {
    /// Vertex buffer bindings
    pub binding_descriptions: Vec<vk::VertexInputBindingDescription>,
    /// Vertex attributes
    pub attribute_descriptions: Vec<vk::VertexInputAttributeDescription>,
    /// Primitive topology
    pub topology: vk::PrimitiveTopology,
    /// Fill mode
    pub polygon_mode: vk::PolygonMode,
    /// Face culling
    pub cull_mode: vk::CullModeFlags,
    /// Winding of front faces
    pub front_face: vk::FrontFace,
    /// Depth testing
    pub depth_test_enable: bool,
    /// Depth writes
    pub depth_write_enable: bool,
    /// Depth comparison
    pub depth_compare_op: vk::CompareOp,
    /// Alpha blending on the color attachment
    pub blend_enable: bool,
    /// State supplied at record time instead of baked in
    pub dynamic_states: Vec<vk::DynamicState>,
    /// Layout; must be assigned before creation
    pub pipeline_layout: vk::PipelineLayout,
    /// Render pass; must be assigned before graphics creation
    pub render_pass: vk::RenderPass,
    /// Subpass index within `render_pass`
    pub subpass: u32,
}

impl Default for PipelineConfigInfo {
    fn default() -> Self {
        Self {
            binding_descriptions: Vec::new(),
            attribute_descriptions: Vec::new(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::CLOCKWISE,
            depth_test_enable: true,
            depth_write_enable: true,
            depth_compare_op: vk::CompareOp::LESS,
            blend_enable: false,
            dynamic_states: vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR],
            pipeline_layout: vk::PipelineLayout::null(),
            render_pass: vk::RenderPass::null(),
            subpass: 0,
        }
    }
}

impl PipelineConfigInfo {
    /// Check that the handles `kind` depends on were assigned
    pub fn validate_for(&self, kind: PipelineKind) -> VulkanResult<()> {
        if self.pipeline_layout == vk::PipelineLayout::null() {
            return Err(VulkanError::MissingPipelineState("pipeline layout"));
        }
        if kind == PipelineKind::Graphics && self.render_pass == vk::RenderPass::null() {
            return Err(VulkanError::MissingPipelineState("render pass"));
        }
        Ok(())
    }
}

/// Read a SPIR-V file `name` from `dir`
pub fn read_shader(dir: &Path, name: &str) -> VulkanResult<Vec<u32>> {
    let path = dir.join(name);
    File::open(&path)
        .and_then(|mut file| ash::util::read_spv(&mut file))
        .map_err(|source| VulkanError::ShaderLoad { path, source })
}

/// Compiled graphics or compute pipeline
pub struct Pipeline {
    device: ash::Device,
    shader_dir: PathBuf,
    kind: PipelineKind,
    config: PipelineConfigInfo,
    pipeline: vk::Pipeline,
    shader_modules: Vec<vk::ShaderModule>,
}

impl Pipeline {
    /// Build a graphics pipeline from the raster shaders in `shader_dir`
    pub fn graphics(
        device: ash::Device,
        shader_dir: impl Into<PathBuf>,
        config: PipelineConfigInfo,
    ) -> VulkanResult<Self> {
        let mut pipeline = Self::empty(device, shader_dir.into(), PipelineKind::Graphics, config);
        pipeline.create_graphics_pipeline()?;
        Ok(pipeline)
    }

    /// Build a compute pipeline from the ray-tracing shader in `shader_dir`
    pub fn compute(
        device: ash::Device,
        shader_dir: impl Into<PathBuf>,
        config: PipelineConfigInfo,
    ) -> VulkanResult<Self> {
        let mut pipeline = Self::empty(device, shader_dir.into(), PipelineKind::Compute, config);
        pipeline.create_compute_pipeline()?;
        Ok(pipeline)
    }

    fn empty(
        device: ash::Device,
        shader_dir: PathBuf,
        kind: PipelineKind,
        config: PipelineConfigInfo,
    ) -> Self {
        Self {
            device,
            shader_dir,
            kind,
            config,
            pipeline: vk::Pipeline::null(),
            shader_modules: Vec::new(),
        }
    }

    fn check_config(&self, kind: PipelineKind) -> VulkanResult<()> {
        self.config.validate_for(kind).map_err(|err| {
            log::error!("{}", err);
            err
        })
    }

    fn load_module(&mut self, name: &str) -> VulkanResult<vk::ShaderModule> {
        let code = read_shader(&self.shader_dir, name)?;
        let create_info = vk::ShaderModuleCreateInfo::builder().code(&code);

        let module = unsafe {
            self.device
                .create_shader_module(&create_info, None)
                .map_err(VulkanError::Api)?
        };
        self.shader_modules.push(module);
        Ok(module)
    }

    /// Compile the vertex and fragment stages into a graphics pipeline
    pub fn create_graphics_pipeline(&mut self) -> VulkanResult<()> {
        self.check_config(PipelineKind::Graphics)?;

        let vert_module = self.load_module(SIMPLE_VERT_SHADER)?;
        let frag_module = self.load_module(SIMPLE_FRAG_SHADER)?;
        let config = &self.config;

        let stages = [
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vert_module)
                .name(ENTRY_POINT)
                .build(),
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(frag_module)
                .name(ENTRY_POINT)
                .build(),
        ];

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&config.binding_descriptions)
            .vertex_attribute_descriptions(&config.attribute_descriptions);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(config.topology)
            .primitive_restart_enable(false);

        // Viewport and scissor come from dynamic state
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(config.polygon_mode)
            .line_width(1.0)
            .cull_mode(config.cull_mode)
            .front_face(config.front_face)
            .depth_bias_enable(false);

        let multisample = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let blend_attachments = [vk::PipelineColorBlendAttachmentState {
            blend_enable: vk::Bool32::from(config.blend_enable),
            src_color_blend_factor: vk::BlendFactor::SRC_ALPHA,
            dst_color_blend_factor: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
            color_blend_op: vk::BlendOp::ADD,
            src_alpha_blend_factor: vk::BlendFactor::ONE,
            dst_alpha_blend_factor: vk::BlendFactor::ZERO,
            alpha_blend_op: vk::BlendOp::ADD,
            color_write_mask: vk::ColorComponentFlags::RGBA,
        }];
        let color_blend = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&blend_attachments);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(config.depth_test_enable)
            .depth_write_enable(config.depth_write_enable)
            .depth_compare_op(config.depth_compare_op)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&config.dynamic_states);

        let create_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .color_blend_state(&color_blend)
            .depth_stencil_state(&depth_stencil)
            .dynamic_state(&dynamic_state)
            .layout(config.pipeline_layout)
            .render_pass(config.render_pass)
            .subpass(config.subpass)
            .build();

        let pipelines = unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
                .map_err(|(_, err)| VulkanError::Api(err))?
        };
        self.pipeline = pipelines[0];

        log::debug!("Created graphics pipeline from {}", self.shader_dir.display());
        Ok(())
    }

    /// Compile the ray-tracing compute stage
    pub fn create_compute_pipeline(&mut self) -> VulkanResult<()> {
        self.check_config(PipelineKind::Compute)?;

        let module = self.load_module(RAYTRACE_SHADER)?;
        let stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module)
            .name(ENTRY_POINT)
            .build();

        let create_info = vk::ComputePipelineCreateInfo::builder()
            .stage(stage)
            .layout(self.config.pipeline_layout)
            .build();

        let pipelines = unsafe {
            self.device
                .create_compute_pipelines(vk::PipelineCache::null(), &[create_info], None)
                .map_err(|(_, err)| VulkanError::Api(err))?
        };
        self.pipeline = pipelines[0];

        log::debug!("Created compute pipeline from {}", self.shader_dir.display());
        Ok(())
    }

    /// Destroy and recompile the graphics pipeline
    pub fn recreate_graphics_pipeline(&mut self) -> VulkanResult<()> {
        self.destroy_handles();
        self.kind = PipelineKind::Graphics;
        self.create_graphics_pipeline()
    }

    /// Destroy and recompile the compute pipeline
    pub fn recreate_compute_pipeline(&mut self) -> VulkanResult<()> {
        self.destroy_handles();
        self.kind = PipelineKind::Compute;
        self.create_compute_pipeline()
    }

    fn destroy_handles(&mut self) {
        unsafe {
            for module in self.shader_modules.drain(..) {
                self.device.destroy_shader_module(module, None);
            }
            if self.pipeline != vk::Pipeline::null() {
                self.device.destroy_pipeline(self.pipeline, None);
                self.pipeline = vk::Pipeline::null();
            }
        }
    }

    /// Bind to the bind point matching the pipeline kind
    pub fn bind(&self, command_buffer: vk::CommandBuffer) {
        let bind_point = match self.kind {
            PipelineKind::Graphics => vk::PipelineBindPoint::GRAPHICS,
            PipelineKind::Compute => vk::PipelineBindPoint::COMPUTE,
        };
        unsafe {
            self.device
                .cmd_bind_pipeline(command_buffer, bind_point, self.pipeline);
        }
    }

    /// Mutable access to the config, used to point at a rebuilt render pass
    pub fn config_mut(&mut self) -> &mut PipelineConfigInfo {
        &mut self.config
    }

    /// Pipeline layout from the config
    pub fn layout(&self) -> vk::PipelineLayout {
        self.config.pipeline_layout
    }

    /// Graphics or compute
    pub fn kind(&self) -> PipelineKind {
        self.kind
    }

    /// Raw pipeline handle (null while torn down)
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.destroy_handles();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use std::io::Write;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("shaman_shaders_{}_{}", tag, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_default_config_uses_dynamic_viewport() {
        let config = PipelineConfigInfo::default();
        assert!(config.dynamic_states.contains(&vk::DynamicState::VIEWPORT));
        assert!(config.dynamic_states.contains(&vk::DynamicState::SCISSOR));
        assert_eq!(config.topology, vk::PrimitiveTopology::TRIANGLE_LIST);
        assert!(config.depth_test_enable);
    }

    #[test]
    fn test_missing_layout_is_rejected() {
        let config = PipelineConfigInfo::default();
        assert!(matches!(
            config.validate_for(PipelineKind::Compute),
            Err(VulkanError::MissingPipelineState("pipeline layout"))
        ));
    }

    #[test]
    fn test_graphics_requires_render_pass() {
        let config = PipelineConfigInfo {
            pipeline_layout: vk::PipelineLayout::from_raw(1),
            ..PipelineConfigInfo::default()
        };
        assert!(config.validate_for(PipelineKind::Compute).is_ok());
        assert!(matches!(
            config.validate_for(PipelineKind::Graphics),
            Err(VulkanError::MissingPipelineState("render pass"))
        ));

        let config = PipelineConfigInfo {
            render_pass: vk::RenderPass::from_raw(2),
            ..config
        };
        assert!(config.validate_for(PipelineKind::Graphics).is_ok());
    }

    #[test]
    fn test_missing_shader_file_is_an_error() {
        let dir = temp_dir("missing");
        match read_shader(&dir, RAYTRACE_SHADER) {
            Err(VulkanError::ShaderLoad { path, source }) => {
                assert_eq!(path, dir.join(RAYTRACE_SHADER));
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("expected ShaderLoad, got {:?}", other.map(|code| code.len())),
        }
    }

    #[test]
    fn test_reads_spirv_words() {
        let dir = temp_dir("valid");
        let words: [u32; 3] = [0x0723_0203, 0x0001_0000, 42];
        let mut file = File::create(dir.join(SIMPLE_VERT_SHADER)).unwrap();
        for word in words {
            file.write_all(&word.to_le_bytes()).unwrap();
        }
        drop(file);

        let code = read_shader(&dir, SIMPLE_VERT_SHADER).unwrap();
        assert_eq!(code, words.to_vec());
    }

    #[test]
    fn test_truncated_spirv_is_rejected() {
        let dir = temp_dir("truncated");
        std::fs::write(dir.join(SIMPLE_FRAG_SHADER), [0x03, 0x02, 0x23]).unwrap();
        assert!(matches!(
            read_shader(&dir, SIMPLE_FRAG_SHADER),
            Err(VulkanError::ShaderLoad { .. })
        ));
    }
}
