use anyhow::{Context, Result};
use clap::Parser;
use image::Rgb;
use std::env;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Directory holding locally stored photos.
    pub storage_dir: String,
    /// URL prefix under which locally stored photos are served.
    pub public_base: String,
    /// Byte budget for the local-filesystem path.
    pub max_bytes: usize,
    /// Remote blob endpoint base URL; unset disables `/blob-upload`.
    pub blob_endpoint: Option<String>,
    pub blob_token: Option<String>,
    /// Byte budget for the remote-blob path.
    pub blob_max_bytes: usize,
    /// Background color transparent uploads are flattened onto.
    pub background: Rgb<u8>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Size-budgeted photo compression and content-addressed storage API"
)]
pub struct Args {
    /// Host to bind to (overrides PHOTO_STORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides PHOTO_STORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where compressed photos are stored (overrides PHOTO_STORE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Public URL prefix for locally stored photos (overrides PHOTO_STORE_PUBLIC_BASE)
    #[arg(long)]
    pub public_base: Option<String>,

    /// Byte budget for locally stored photos (overrides PHOTO_STORE_MAX_BYTES)
    #[arg(long)]
    pub max_bytes: Option<usize>,

    /// Remote blob endpoint base URL (overrides PHOTO_STORE_BLOB_ENDPOINT)
    #[arg(long)]
    pub blob_endpoint: Option<String>,

    /// Bearer token for the blob endpoint (overrides PHOTO_STORE_BLOB_TOKEN)
    #[arg(long)]
    pub blob_token: Option<String>,

    /// Byte budget for blob-stored photos (overrides PHOTO_STORE_BLOB_MAX_BYTES)
    #[arg(long)]
    pub blob_max_bytes: Option<usize>,

    /// #rrggbb background for flattening transparent uploads (overrides PHOTO_STORE_BACKGROUND)
    #[arg(long)]
    pub background: Option<String>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("PHOTO_STORE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port: u16 = numeric_env("PHOTO_STORE_PORT", 3000)?;
        let env_storage =
            env::var("PHOTO_STORE_STORAGE_DIR").unwrap_or_else(|_| "./data/uploads".into());
        let env_public =
            env::var("PHOTO_STORE_PUBLIC_BASE").unwrap_or_else(|_| "/uploads".into());
        let env_max: usize = numeric_env("PHOTO_STORE_MAX_BYTES", 2 * 1024 * 1024)?;
        let env_blob_endpoint = env::var("PHOTO_STORE_BLOB_ENDPOINT").ok();
        let env_blob_token = env::var("PHOTO_STORE_BLOB_TOKEN").ok();
        let env_blob_max: usize = numeric_env("PHOTO_STORE_BLOB_MAX_BYTES", 1024 * 1024)?;
        let env_background =
            env::var("PHOTO_STORE_BACKGROUND").unwrap_or_else(|_| "#ffffff".into());

        // --- Merge ---
        let background_raw = args.background.unwrap_or(env_background);
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            public_base: args.public_base.unwrap_or(env_public),
            max_bytes: args.max_bytes.unwrap_or(env_max),
            blob_endpoint: args.blob_endpoint.or(env_blob_endpoint),
            blob_token: args.blob_token.or(env_blob_token),
            blob_max_bytes: args.blob_max_bytes.unwrap_or(env_blob_max),
            background: parse_background(&background_raw)?,
        };

        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn numeric_env<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

/// Parse a `#rrggbb` color string. A malformed value is a startup error,
/// not something to discover per request.
fn parse_background(value: &str) -> Result<Rgb<u8>> {
    let hex = value.strip_prefix('#').unwrap_or(value);
    anyhow::ensure!(
        hex.len() == 6 && hex.is_ascii(),
        "background color `{}` must be in #rrggbb form",
        value
    );
    let mut channels = [0u8; 3];
    for (i, channel) in channels.iter_mut().enumerate() {
        *channel = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
            .with_context(|| format!("parsing background color `{}`", value))?;
    }
    Ok(Rgb(channels))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn background_parses_with_and_without_hash() {
        assert_eq!(parse_background("#ffffff").unwrap(), Rgb([255, 255, 255]));
        assert_eq!(parse_background("0a0b0c").unwrap(), Rgb([10, 11, 12]));
    }

    #[test]
    fn malformed_background_is_an_error() {
        assert!(parse_background("#fff").is_err());
        assert!(parse_background("#zzzzzz").is_err());
        assert!(parse_background("").is_err());
    }
}
