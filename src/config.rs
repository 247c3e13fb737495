use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{MapperError, Result};

pub const DEFAULT_BASE_PATH: &str = "/_project_map";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Project configuration
    pub project: ProjectConfig,

    /// Source code parsing configuration
    pub parsing: ParsingConfig,

    /// Analysis limits and policies
    pub analysis: AnalysisConfig,

    /// Where the map surfaces are mounted
    pub endpoints: EndpointConfig,

    /// Output settings
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project name
    pub name: String,

    /// Source directories to analyze
    pub source_dirs: Vec<PathBuf>,

    /// Glob patterns to skip while walking sources
    pub ignore_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsingConfig {
    /// Maximum file size to parse (in bytes)
    pub max_file_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// How deep the tracer follows calls into sourced functions
    pub max_call_depth: usize,

    /// Fail the build on dependency cycles with no valid resolution order
    pub strict_dependency_cycles: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Prefix for `/json`, `/html`, `/dataflow/json` and `/dataflow/html`
    pub base_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Pretty-print JSON documents
    pub pretty: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_call_depth: 6,
            strict_dependency_cycles: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project: ProjectConfig {
                name: "Unnamed Service".to_string(),
                source_dirs: vec![PathBuf::from(".")],
                ignore_patterns: vec![
                    ".venv/".to_string(),
                    "venv/".to_string(),
                    "__pycache__/".to_string(),
                    ".git/".to_string(),
                ],
            },
            parsing: ParsingConfig {
                max_file_size: 1024 * 1024, // 1MB
            },
            analysis: AnalysisConfig::default(),
            endpoints: EndpointConfig {
                base_path: DEFAULT_BASE_PATH.to_string(),
            },
            output: OutputConfig { pretty: true },
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| MapperError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| MapperError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load configuration with fallback to default
    pub fn load_or_default<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        match path {
            Some(p) => {
                if p.as_ref().exists() {
                    Self::load(p)
                } else {
                    Ok(Self::default())
                }
            }
            None => {
                let candidates = ["projectmap.toml", ".projectmap.toml"];

                for candidate in &candidates {
                    if Path::new(candidate).exists() {
                        return Self::load(candidate);
                    }
                }

                Ok(Self::default())
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.analysis.max_call_depth == 0 {
            return Err(MapperError::Config(
                "analysis.max_call_depth must be at least 1".to_string(),
            ));
        }
        if !self.endpoints.base_path.starts_with('/') {
            return Err(MapperError::Config(format!(
                "endpoints.base_path must start with '/': {}",
                self.endpoints.base_path
            )));
        }
        Ok(())
    }
}
