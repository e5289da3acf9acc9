//! # Rendering
//!
//! Vulkan frame lifecycle for the Shaman engine.
//!
//! ## Architecture
//!
//! - **Window / Device**: GLFW window, instance, queues and command pool
//! - **SwapChain**: presentable images, per-image resources, per-slot sync
//! - **Pipeline**: shader modules plus fixed-function state, rebuilt on recreation
//! - **FrameRenderer**: acquire → record → submit state machine over a [`FrameTarget`]
//! - **VulkanFrameTarget**: the concrete target, rasterizing or ray tracing
//!
//! Every component receives only the collaborators it calls. Swap chain and
//! pipeline are replaced as whole values, never patched in place.

pub mod device;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod raster;
pub mod raytrace;
pub mod swapchain;
pub mod sync;
pub mod target;
pub mod window;

pub use device::Device;
pub use error::{VulkanError, VulkanResult};
pub use frame::{wait_for_nonzero_extent, FrameRenderer, FrameTarget};
pub use pipeline::{Pipeline, PipelineConfigInfo, PipelineKind};
pub use raster::SimplePushConstantData;
pub use raytrace::RayTracePushConstantData;
pub use swapchain::{SwapChain, SwapChainFormats};
pub use target::VulkanFrameTarget;
pub use window::{SurfaceWindow, Window, WindowError};
