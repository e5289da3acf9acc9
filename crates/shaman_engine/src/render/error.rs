//! Vulkan error types shared by the device, swap chain, pipeline and frame layers

use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

use crate::render::swapchain::SwapChainFormats;

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with the unmodified result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// Vulkan context initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// No suitable memory type found for allocation
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,

    /// The surface reported no formats
    #[error("Surface reports no supported formats")]
    NoSurfaceFormats,

    /// The surface reported no present modes
    #[error("Surface reports no present modes")]
    NoPresentModes,

    /// None of the depth format candidates can back a depth/stencil attachment
    #[error("No supported depth format")]
    NoSupportedDepthFormat,

    /// A rebuilt swap chain picked different formats than its predecessor
    #[error("Swap chain image or depth format has changed ({previous:?} -> {current:?})")]
    SwapChainFormatChanged {
        /// Formats of the swap chain being replaced
        previous: SwapChainFormats,
        /// Formats chosen by the replacement
        current: SwapChainFormats,
    },

    /// Pipeline creation was attempted before its layout or render pass was assigned
    #[error("Cannot create pipeline: no {0} provided in config info")]
    MissingPipelineState(&'static str),

    /// A SPIR-V file could not be read
    #[error("Failed to load shader {path:?}: {source}")]
    ShaderLoad {
        /// File that was requested
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

impl VulkanError {
    /// True when the presentation engine reported the swap chain as stale
    pub fn is_out_of_date(&self) -> bool {
        matches!(self, Self::Api(vk::Result::ERROR_OUT_OF_DATE_KHR))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_date_detection() {
        assert!(VulkanError::Api(vk::Result::ERROR_OUT_OF_DATE_KHR).is_out_of_date());
        assert!(!VulkanError::Api(vk::Result::ERROR_DEVICE_LOST).is_out_of_date());
        assert!(!VulkanError::NoSupportedDepthFormat.is_out_of_date());
    }

    #[test]
    fn test_missing_state_message() {
        let err = VulkanError::MissingPipelineState("pipeline layout");
        assert_eq!(
            err.to_string(),
            "Cannot create pipeline: no pipeline layout provided in config info"
        );
    }
}
