//! log4rs setup
//!
//! The YAML file named in the logging config is preferred; without it the
//! server logs to the console with the same pattern.

use crate::config::LoggingConfig;
use log::{info, warn, LevelFilter};
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;

/// Console pattern; `user` comes from the MDC set per request
pub const CONSOLE_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S%.3f)} {h({l})} [{X(user)(-)}] {t} - {m}{n}";

fn console_config(level: LevelFilter) -> Result<Config, String> {
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(CONSOLE_PATTERN)))
        .build();

    Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(level))
        .map_err(|e| e.to_string())
}

/// Initialise the global logger once at startup
pub fn init_logging(config: &LoggingConfig) -> Result<(), String> {
    match log4rs::init_file(&config.config_file, Default::default()) {
        Ok(()) => {
            info!("Logging configured from {}", config.config_file);
            Ok(())
        }
        Err(file_err) => {
            log4rs::init_config(console_config(LevelFilter::Info)?).map_err(|e| e.to_string())?;
            warn!("Could not load {} ({}), logging to console", config.config_file, file_err);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_config_builds() {
        let config = console_config(LevelFilter::Debug).unwrap();
        assert_eq!(config.root().level(), LevelFilter::Debug);
        assert_eq!(config.appenders().len(), 1);
    }
}
