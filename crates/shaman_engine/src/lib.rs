//! # Shaman Engine
//!
//! A Vulkan frame lifecycle engine: swap chain management, a per-frame
//! orchestrator with automatic swap chain recreation, and graphics or
//! compute (ray tracing) pipelines drawing a small scene.
//!
//! ## Features
//!
//! - **Frame pipelining**: N frame slots in flight with per-image fence tracking
//! - **Recreation**: stale, suboptimal or resized surfaces rebuild swap chain and pipeline
//! - **Two render paths**: rasterized objects or a compute-shader ray tracer
//! - **Config files**: `key=value`, TOML or RON
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use shaman_engine::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::load_or_default(EngineConfig::DEFAULT_PATH)?;
//!     logging::init(config.debug_print);
//!     ShamanEngine::new(config)?.run()?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod engine;
pub mod foundation;
pub mod render;
pub mod scene;

pub use config::{EngineConfig, RenderMode, WindowConfig};
pub use engine::{EngineError, ShamanEngine};

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        config::{ConfigError, EngineConfig, RenderMode, WindowConfig},
        engine::{EngineError, ShamanEngine},
        foundation::{
            logging,
            math::{Mat4, Vec3},
        },
        render::{FrameRenderer, FrameTarget, SurfaceWindow, VulkanError, VulkanResult},
        scene::{Camera, KeyboardController, Model, RenderObject, Transform},
    };
}
