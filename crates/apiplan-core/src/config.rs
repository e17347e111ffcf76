//! Run configuration

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Settings for one plan run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Swagger document path (JSON or YAML).
    pub spec: PathBuf,

    /// Test plan path (YAML).
    pub plan: PathBuf,

    /// Endpoint override; defaults to the document's schemes/host/basePath.
    #[serde(default)]
    pub base_url: Option<String>,

    /// PRNG seed, the only knob affecting reproducibility. Absent draws
    /// from OS entropy.
    #[serde(default)]
    pub seed: Option<u64>,

    /// Headers sent with every request (auth, API keys).
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            spec: PathBuf::from("swagger.yaml"),
            plan: PathBuf::from("plan.yaml"),
            base_url: None,
            seed: None,
            headers: HashMap::new(),
        }
    }
}

impl Config {
    /// Load config from file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e.to_string()))?;

        if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
        } else {
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
        }
    }

    /// Load from the default location (.apiplan.toml)
    pub fn load_default() -> Result<Self, ConfigError> {
        let candidates = [".apiplan.toml", ".apiplan.json", "apiplan.toml"];

        for name in candidates {
            let path = Path::new(name);
            if path.exists() {
                return Self::load(path);
            }
        }

        Ok(Self::default())
    }

    /// Example config file contents
    pub fn example() -> &'static str {
        r#"# apiplan configuration

# Swagger 2.0 document (JSON or YAML)
spec = "swagger.yaml"

# Test plan: a YAML sequence of named tests, e.g.
#   - name: create-pet
#     path: /pets
#     method: post
#   - name: fetch-pet
#     path: /pets/{id}
#     method: get
plan = "plan.yaml"

# Endpoint override (default: schemes/host/basePath from the document)
# base_url = "http://localhost:8080/v2"

# PRNG seed for reproducible runs
# seed = 42

# Headers sent with every request
[headers]
# Authorization = "Bearer your-token-here"
# X-API-Key = "your-api-key"
"#
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read {0}: {1}")]
    Io(PathBuf, String),
    #[error("Parse error: {0}")]
    Parse(String),
}
