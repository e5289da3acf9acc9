//! Configuration system
//!
//! [`EngineConfig`] is built once at startup and handed by reference to each
//! component that needs it. Files are read as TOML, RON, or the plain
//! `key=value` format used by `config/config.ini`.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// A known key carried a value of the wrong shape
    #[error("Invalid value '{value}' for '{key}' on line {line}")]
    InvalidValue {
        /// Offending key
        key: String,
        /// Raw value text
        value: String,
        /// 1-based line number
        line: usize,
    },

    /// The loaded values are inconsistent
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// Which pipeline path the frame loop records into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// Graphics pipeline drawing render objects into the swap chain render pass
    Raster,
    /// Compute pipeline writing an output image that is copied to the swap chain
    RayTrace,
}

/// Window creation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Initial width in screen coordinates
    pub width: u32,
    /// Initial height in screen coordinates
    pub height: u32,
    /// Window title
    pub name: String,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            name: "Shaman Engine".to_string(),
        }
    }
}

/// Engine-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Frame slots that may be prepared while the GPU works on earlier ones
    pub max_frames_in_flight: usize,
    /// Upper bound in seconds on the frame time fed to movement
    pub max_frame_time: f32,
    /// Directory holding compiled SPIR-V
    pub shader_path: String,
    /// Root asset directory
    pub asset_path: String,
    /// Model directory
    pub model_path: String,
    /// Texture directory
    pub texture_path: String,
    /// Enable the Khronos validation layer
    pub enable_validation: bool,
    /// Forward shader debug-printf and info-level validation output
    pub debug_print: bool,
    /// Use the compute ray-tracing path instead of rasterization
    pub ray_tracing: bool,
    /// Window settings
    pub window: WindowConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_frames_in_flight: 2,
            max_frame_time: 0.25,
            shader_path: "target/shaders/".to_string(),
            asset_path: "assets/".to_string(),
            model_path: "models/".to_string(),
            texture_path: "textures/".to_string(),
            enable_validation: cfg!(debug_assertions),
            debug_print: false,
            ray_tracing: false,
            window: WindowConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Default location of the configuration file
    pub const DEFAULT_PATH: &'static str = "config/config.ini";

    /// Load configuration, choosing the parser from the file extension
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;

        let config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => {
                toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))?
            }
            Some("ron") => {
                ron::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))?
            }
            _ => Self::from_key_values(&contents)?,
        };

        config.validate()?;
        log::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load configuration, falling back to defaults when the file is absent
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match Self::load(path) {
            Err(ConfigError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                log::warn!(
                    "Config file {} not found, using defaults",
                    path.display()
                );
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Parse the `key=value` format
    pub fn from_key_values(contents: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        for (index, raw_line) in contents.lines().enumerate() {
            let line_number = index + 1;
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with(['#', ';', '[']) {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                log::warn!("Ignoring config line {}: missing '='", line_number);
                continue;
            };
            config.apply(key.trim(), value.trim(), line_number)?;
        }

        Ok(config)
    }

    fn apply(&mut self, key: &str, value: &str, line: usize) -> Result<(), ConfigError> {
        match key {
            "width" => self.window.width = parse_value(key, value, line)?,
            "height" => self.window.height = parse_value(key, value, line)?,
            "name" | "window_name" => self.window.name = value.to_string(),
            "max_frames_in_flight" => self.max_frames_in_flight = parse_value(key, value, line)?,
            "max_frame_time" => self.max_frame_time = parse_value(key, value, line)?,
            "shader_path" => self.shader_path = value.to_string(),
            "asset_path" => self.asset_path = value.to_string(),
            "model_path" => self.model_path = value.to_string(),
            "texture_path" => self.texture_path = value.to_string(),
            "enable_validation" => self.enable_validation = parse_bool(key, value, line)?,
            "debug_print" => self.debug_print = parse_bool(key, value, line)?,
            "ray_tracing" => self.ray_tracing = parse_bool(key, value, line)?,
            _ => log::warn!("Unknown config key '{}' on line {}", key, line),
        }
        Ok(())
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_frames_in_flight == 0 {
            return Err(ConfigError::Invalid(
                "max_frames_in_flight must be at least 1".to_string(),
            ));
        }
        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "window size {}x{} has no area",
                self.window.width, self.window.height
            )));
        }
        if !(self.max_frame_time > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "max_frame_time must be positive, got {}",
                self.max_frame_time
            )));
        }
        Ok(())
    }

    /// Save configuration as TOML or RON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => {
                toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?
            }
            Some("ron") => ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?,
            _ => return Err(ConfigError::UnsupportedFormat(path.display().to_string())),
        };

        std::fs::write(path, contents).map_err(ConfigError::Io)
    }

    /// Pipeline path selected by the `ray_tracing` flag
    pub fn render_mode(&self) -> RenderMode {
        if self.ray_tracing {
            RenderMode::RayTrace
        } else {
            RenderMode::Raster
        }
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str, line: usize) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        line,
    })
}

fn parse_bool(key: &str, value: &str, line: usize) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            line,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.window.width, 1920);
        assert_eq!(config.window.height, 1080);
        assert_eq!(config.max_frames_in_flight, 2);
        assert_eq!(config.asset_path, "assets/");
        assert_eq!(config.model_path, "models/");
        assert_eq!(config.texture_path, "textures/");
        assert_eq!(config.render_mode(), RenderMode::Raster);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_key_values_skip_comments_and_sections() {
        let text = "\
# window
[window]
width=1280
height = 720
; frames
max_frames_in_flight=3
name=Cubes
ray_tracing=true
shader_path=shaders/
";
        let config = EngineConfig::from_key_values(text).unwrap();
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.window.height, 720);
        assert_eq!(config.window.name, "Cubes");
        assert_eq!(config.max_frames_in_flight, 3);
        assert_eq!(config.shader_path, "shaders/");
        assert_eq!(config.render_mode(), RenderMode::RayTrace);
    }

    #[test]
    fn test_unknown_keys_and_bare_lines_are_ignored() {
        let config = EngineConfig::from_key_values("vsync=on\njust some text\nwidth=800\n").unwrap();
        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.height, 1080);
    }

    #[test]
    fn test_invalid_number_reports_line() {
        let err = EngineConfig::from_key_values("width=800\nheight=tall\n").unwrap_err();
        match err {
            ConfigError::InvalidValue { key, value, line } => {
                assert_eq!(key, "height");
                assert_eq!(value, "tall");
                assert_eq!(line, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_bool_spellings() {
        for (text, expected) in [("1", true), ("off", false), ("Yes", true), ("FALSE", false)] {
            let config = EngineConfig::from_key_values(&format!("debug_print={text}")).unwrap();
            assert_eq!(config.debug_print, expected, "spelling {text}");
        }
        assert!(EngineConfig::from_key_values("debug_print=maybe").is_err());
    }

    #[test]
    fn test_validate_rejects_zero_frames() {
        let config = EngineConfig {
            max_frames_in_flight: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_empty_window_and_frame_time() {
        let mut config = EngineConfig::default();
        config.window.height = 0;
        assert!(config.validate().is_err());

        let config = EngineConfig {
            max_frame_time: 0.0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let path = std::env::temp_dir().join("shaman_engine_missing_config.ini");
        let _ = std::fs::remove_file(&path);
        let config = EngineConfig::load_or_default(&path).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_toml_round_trip_through_file() {
        let path = std::env::temp_dir().join(format!(
            "shaman_engine_config_{}.toml",
            std::process::id()
        ));
        let config = EngineConfig {
            max_frames_in_flight: 3,
            ray_tracing: true,
            ..EngineConfig::default()
        };
        config.save(&path).unwrap();
        let loaded = EngineConfig::load(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_save_rejects_unknown_extension() {
        let err = EngineConfig::default().save("config.ini").unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat(_)));
    }
}
