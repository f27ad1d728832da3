//! Body consumption settings, read from the `[body]` table of a TOML file.
//!
//! ```toml
//! [body]
//! request_batch = 16
//! max_content_length = 1048576
//! ```

use std::num::NonZeroU32;
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    body: BodyConfig,
}

/// How a request body is drained when it is aggregated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyConfig {
    /// Elements requested per batch. `None` requests everything at once.
    pub request_batch: Option<NonZeroU32>,
    /// Largest aggregated body in bytes. `None` means unlimited.
    pub max_content_length: Option<usize>,
}

impl BodyConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let file: ConfigFile = toml::from_str(content)?;
        Ok(file.body)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        let file = ConfigFile { body: self.clone() };
        Ok(toml::to_string_pretty(&file)?)
    }

    pub fn with_request_batch(mut self, batch: NonZeroU32) -> Self {
        self.request_batch = Some(batch);
        self
    }

    pub fn with_max_content_length(mut self, limit: usize) -> Self {
        self.max_content_length = Some(limit);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full() {
        let config = BodyConfig::from_toml_str(
            r#"
[body]
request_batch = 4
max_content_length = 2048
"#,
        )
        .unwrap();
        assert_eq!(config.request_batch, NonZeroU32::new(4));
        assert_eq!(config.max_content_length, Some(2048));
    }

    #[test]
    fn missing_table_is_default() {
        let config = BodyConfig::from_toml_str("").unwrap();
        assert_eq!(config, BodyConfig::default());
        assert_eq!(config.request_batch, None);
        assert_eq!(config.max_content_length, None);
    }

    #[test]
    fn zero_batch_is_rejected() {
        let err = BodyConfig::from_toml_str("[body]\nrequest_batch = 0\n").unwrap_err();
        assert!(err.to_string().contains("nonzero"));
        assert!(BodyConfig::from_toml_str("[body]\nrequest_batch = -3\n").is_err());
    }

    #[test]
    fn wrong_type_is_rejected() {
        assert!(BodyConfig::from_toml_str("[body]\nmax_content_length = \"big\"\n").is_err());
    }

    #[test]
    fn builders_round_trip_through_toml() {
        let config = BodyConfig::default()
            .with_request_batch(NonZeroU32::new(8).unwrap())
            .with_max_content_length(512);
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("[body]"));
        assert_eq!(BodyConfig::from_toml_str(&toml_str).unwrap(), config);
    }

    #[test]
    fn from_file_reads_disk() {
        let path = std::env::temp_dir()
            .join(format!("bodyflow-config-{}.toml", std::process::id()));
        std::fs::write(&path, "[body]\nmax_content_length = 10\n").unwrap();
        let config = BodyConfig::from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(config.max_content_length, Some(10));

        assert!(BodyConfig::from_file(Path::new("/nonexistent/bodyflow.toml")).is_err());
    }
}
