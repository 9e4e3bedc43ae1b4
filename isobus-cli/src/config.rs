//! Configuration loading and parsing

use crate::report::OutputFormat;
use anyhow::{Context, Result};
use isobus_decoder::DecoderConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main application configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub decoder: DecoderConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct InputConfig {
    /// Frame log to decode (stdin if absent)
    pub frames: Option<PathBuf>,
    /// Definition files (TOML or JSON)
    #[serde(default)]
    pub definitions: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub format: OutputFormat,
    /// Output file (stdout if absent)
    pub path: Option<PathBuf>,
    /// Do not write frames that match no definition
    #[serde(default)]
    pub skip_unknown: bool,
}

impl AppConfig {
    /// Resolve relative paths against the config file's directory
    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        self.input.frames.iter_mut().for_each(resolve);
        self.input.definitions.iter_mut().for_each(resolve);
        self.output.path.iter_mut().for_each(resolve);
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let mut config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    if let Some(base) = path.parent() {
        config.resolve_paths(base);
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_deserialization() {
        let toml_content = r#"
            [input]
            frames = "field_day.log"
            definitions = ["john_deere.toml", "/etc/isobus/case.json"]

            [output]
            format = "text"
            skip_unknown = true

            [decoder]
            fast_packet_stale_secs = 1.5

            [[decoder.fast_packet]]
            pgn = 129029
            frame_count = 7
        "#;

        let mut config: AppConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.input.definitions.len(), 2);
        assert_eq!(config.output.format, OutputFormat::Text);
        assert!(config.output.skip_unknown);
        assert_eq!(config.decoder.fast_packet_stale_secs, 1.5);
        assert!(config.decoder.is_fast_packet(129029));

        config.resolve_paths(Path::new("/data/run1"));
        assert_eq!(config.input.frames, Some(PathBuf::from("/data/run1/field_day.log")));
        assert_eq!(config.input.definitions[0], PathBuf::from("/data/run1/john_deere.toml"));
        assert_eq!(config.input.definitions[1], PathBuf::from("/etc/isobus/case.json"));
    }

    #[test]
    fn test_load_bundled_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config.toml");
        let config = load_config(&path).unwrap();
        assert!(config.input.definitions[0].ends_with("definitions/vehicle_position.toml"));
        assert!(config.input.definitions[0].exists());
        assert_eq!(config.decoder, DecoderConfig::default());
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert!(config.input.frames.is_none());
        assert_eq!(config.output.format, OutputFormat::Jsonl);
        assert_eq!(config.decoder, DecoderConfig::default());
    }
}
