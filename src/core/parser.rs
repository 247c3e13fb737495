use std::path::{Path, PathBuf};
use ignore::overrides::OverrideBuilder;
use ignore::WalkBuilder;
use tracing::{debug, warn};

use crate::config::{ParsingConfig, ProjectConfig};
use crate::error::{MapperError, Result};

/// A Python source file read from disk
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// File path as discovered by the walker
    pub path: PathBuf,

    /// Raw source content
    pub content: String,
}

/// Walks configured source directories and loads Python files
pub struct CodeParser {
    parsing: ParsingConfig,
    ignore_patterns: Vec<String>,
}

impl CodeParser {
    pub fn new(project: &ProjectConfig, parsing: &ParsingConfig) -> Self {
        Self {
            parsing: parsing.clone(),
            ignore_patterns: project.ignore_patterns.clone(),
        }
    }

    /// Load every `.py` file under the given roots
    pub fn load_sources(&self, roots: &[PathBuf]) -> Result<Vec<SourceFile>> {
        let mut files = Vec::new();

        for root in roots {
            if !root.exists() {
                return Err(MapperError::Registry(format!(
                    "source directory {} does not exist",
                    root.display()
                )));
            }

            if root.is_file() {
                if let Some(file) = self.load_file(root)? {
                    files.push(file);
                }
                continue;
            }

            let mut overrides = OverrideBuilder::new(root);
            for pattern in &self.ignore_patterns {
                overrides
                    .add(&format!("!{}", pattern))
                    .map_err(|e| MapperError::Config(format!("Invalid ignore pattern {}: {}", pattern, e)))?;
            }
            let overrides = overrides
                .build()
                .map_err(|e| MapperError::Config(e.to_string()))?;

            // Use ignore crate to respect .gitignore and custom patterns
            let walker = WalkBuilder::new(root)
                .hidden(false)
                .git_ignore(true)
                .overrides(overrides)
                .sort_by_file_path(|a, b| a.cmp(b))
                .build();

            for entry in walker {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                        continue;
                    }
                };
                let path = entry.path();

                if path.is_file() && is_python(path) {
                    // One bad file must not hide the rest of the tree
                    match self.load_file(path) {
                        Ok(Some(file)) => files.push(file),
                        Ok(None) => {}
                        Err(e) => warn!("Skipping {}: {}", path.display(), e),
                    }
                }
            }
        }

        debug!("Loaded {} Python source files", files.len());
        Ok(files)
    }

    fn load_file(&self, path: &Path) -> Result<Option<SourceFile>> {
        let content = std::fs::read_to_string(path)?;

        if content.len() > self.parsing.max_file_size {
            warn!("Skipping {}: exceeds maximum size limit", path.display());
            return Ok(None);
        }

        Ok(Some(SourceFile {
            path: path.to_path_buf(),
            content,
        }))
    }
}

fn is_python(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some("py")
}
