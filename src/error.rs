use thiserror::Error;

/// Main error type for projectmap operations
#[derive(Error, Debug)]
pub enum MapperError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parser error: {0}")]
    Parser(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Template error: {0}")]
    Template(#[from] tera::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Route registry unavailable: {0}")]
    Registry(String),

    #[error("Unbreakable dependency cycle: {}", cycle.join(" -> "))]
    DependencyCycle { cycle: Vec<String> },

    #[error("Analysis panicked: {0}")]
    BuildPanicked(String),

    #[error("Build failed: {0}")]
    Build(String),
}

pub type Result<T> = std::result::Result<T, MapperError>;
