//! Logging setup on top of `env_logger`

pub use log::{debug, error, info, trace, warn};

/// Initialize the logging system.
///
/// `RUST_LOG` wins when set; otherwise the filter is `info`, or `debug`
/// when `debug_print` is on. A second call leaves the first logger in place.
pub fn init(debug_print: bool) {
    let default_filter = if debug_print { "debug" } else { "info" };
    let env = env_logger::Env::default().default_filter_or(default_filter);

    if env_logger::Builder::from_env(env).try_init().is_err() {
        log::debug!("Logger already initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_is_harmless() {
        init(false);
        init(true);
        info!("logging initialized");
    }
}
