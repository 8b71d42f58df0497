use std::path::Path;

use config::{Config, File, FileFormat};
use eyre::{Context, Result};

use crate::config::models::{GatewayConfig, RouteDefinition};

/// Load gateway configuration from a file using the config crate.
/// Supports multiple formats: YAML, JSON, TOML, etc.
pub fn load_config(config_path: &str) -> Result<GatewayConfig> {
    let path = Path::new(config_path);

    // Determine file format based on extension
    let format = match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        Some("toml") => FileFormat::Toml,
        _ => FileFormat::Yaml, // Default to YAML
    };

    let settings = Config::builder()
        .add_source(File::new(
            path.to_str()
                .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", path.display()))?,
            format,
        ))
        .build()
        .with_context(|| format!("Failed to build config from {}", path.display()))?;

    let gateway_config: GatewayConfig = settings
        .try_deserialize()
        .with_context(|| format!("Failed to deserialize config from {}", path.display()))?;

    Ok(gateway_config)
}

/// Load the critical fallback route set from a local JSON file.
///
/// The file holds a JSON array of route definitions that must stay
/// servable even when the remote store is unreachable.
pub fn load_fallback_routes(path: &str) -> Result<Vec<RouteDefinition>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read fallback route set from {path}"))?;
    let defs: Vec<RouteDefinition> = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse fallback route set from {path}"))?;
    Ok(defs)
}
