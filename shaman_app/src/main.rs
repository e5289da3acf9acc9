//! Shaman demo application
//!
//! Loads `config/config.ini` (falling back to defaults), then renders two
//! spinning cubes, rasterized or ray traced depending on `ray_tracing`.
//! WASD/QE move the viewer, arrow keys look around, Escape quits.

use std::path::Path;
use std::process::ExitCode;

use shaman_engine::foundation::logging;
use shaman_engine::{EngineConfig, ShamanEngine};

fn main() -> ExitCode {
    std::panic::set_hook(Box::new(|panic_info| {
        let message = panic_info
            .payload()
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| panic_info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        match panic_info.location() {
            Some(location) => log::error!(
                "Panic at {}:{}:{}: {}",
                location.file(),
                location.line(),
                location.column(),
                message
            ),
            None => log::error!("Panic: {}", message),
        }
    }));

    let config = match EngineConfig::load_or_default(EngineConfig::DEFAULT_PATH) {
        Ok(config) => config,
        Err(e) => {
            logging::init(false);
            log::error!("Failed to load {}: {}", EngineConfig::DEFAULT_PATH, e);
            return ExitCode::FAILURE;
        }
    };
    logging::init(config.debug_print);

    if Path::new(EngineConfig::DEFAULT_PATH).exists() {
        log::info!("Loaded configuration from {}", EngineConfig::DEFAULT_PATH);
    } else {
        log::warn!("{} not found, using defaults", EngineConfig::DEFAULT_PATH);
    }

    match ShamanEngine::new(config).and_then(|mut engine| engine.run()) {
        Ok(()) => {
            log::info!("Shaman finished successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("Application error: {}", e);
            ExitCode::FAILURE
        }
    }
}
