use super::types::AppConfig;
use anyhow::{Context, Result};
use config::{Config, Environment, File};
use secrecy::SecretString;
use std::path::Path;

/// Configuration loader with builder pattern
pub struct ConfigLoader {
    config_file: Option<String>,
    load_env: bool,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self {
            config_file: None,
            load_env: false,
        }
    }

    /// Load configuration from file
    pub fn load_from_file(mut self, path: Option<&str>) -> Self {
        self.config_file = path.map(String::from);
        self
    }

    /// Load configuration from environment variables
    pub fn load_from_env(mut self) -> Self {
        self.load_env = true;
        self
    }

    /// Build the final configuration
    pub fn build(self) -> Result<AppConfig> {
        let mut builder = Config::builder().add_source(Config::try_from(&AppConfig::default())?);

        if let Some(config_path) = &self.config_file {
            builder = builder.add_source(File::with_name(config_path).required(true));
        } else {
            builder = builder
                .add_source(File::with_name("cloudlens").required(false))
                .add_source(File::with_name("config/cloudlens").required(false));
        }

        if self.load_env {
            builder = builder.add_source(
                Environment::with_prefix("CLOUDLENS")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let mut config: AppConfig = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        if self.load_env {
            apply_aws_env(&mut config);
        }

        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Standard AWS variables win over file values
fn apply_aws_env(config: &mut AppConfig) {
    if let Ok(region) = std::env::var("AWS_REGION").or_else(|_| std::env::var("AWS_DEFAULT_REGION"))
    {
        config.aws.region = region;
    }
    if let Ok(key_id) = std::env::var("AWS_ACCESS_KEY_ID") {
        config.aws.access_key_id = Some(key_id);
    }
    if let Ok(secret) = std::env::var("AWS_SECRET_ACCESS_KEY") {
        config.aws.secret_access_key = Some(SecretString::new(secret.into_boxed_str()));
    }
    if let Ok(token) = std::env::var("AWS_SESSION_TOKEN") {
        config.aws.session_token = Some(SecretString::new(token.into_boxed_str()));
    }
}

/// Write a commented sample configuration file
pub fn generate_sample_config(path: &Path) -> Result<()> {
    let toml_content = toml::to_string_pretty(&AppConfig::default())
        .context("Failed to render sample configuration")?;

    let sample_content = format!(
        r#"# cloudlens configuration
#
# Save as cloudlens.toml (or pass --config <path>).
# Every key can be overridden from the environment with the CLOUDLENS_ prefix
# and `__` between sections, e.g. CLOUDLENS_WAREHOUSE__DATABASE=security_logs.
# AWS credentials are read from AWS_ACCESS_KEY_ID / AWS_SECRET_ACCESS_KEY /
# AWS_SESSION_TOKEN and never written to this file.

{}"#,
        toml_content
    );

    std::fs::write(path, sample_content)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}
