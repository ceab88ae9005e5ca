use minijinja::Environment;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("invalid template name: {0}")]
    InvalidName(String),
    #[error("template not found: {0}")]
    NotFound(String),
    #[error("failed to read template {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to render template: {0}")]
    Render(#[from] minijinja::Error),
}

/// Renders `<dir>/<name>.html` with HTML auto-escaping.
#[derive(Clone, Debug)]
pub struct TemplateRenderer {
    dir: PathBuf,
}

impl TemplateRenderer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// # Errors
    /// Returns [`TemplateError`] when the name is invalid, the file is missing
    /// or unreadable, or rendering fails.
    pub async fn render(&self, name: &str, data: &Map<String, Value>) -> Result<String, TemplateError> {
        if !valid_name(name) {
            return Err(TemplateError::InvalidName(name.to_string()));
        }

        let file_name = format!("{name}.html");
        let source = match tokio::fs::read_to_string(self.dir.join(&file_name)).await {
            Ok(source) => source,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(TemplateError::NotFound(name.to_string()));
            }
            Err(source) => {
                return Err(TemplateError::Io {
                    name: name.to_string(),
                    source,
                });
            }
        };

        // The .html suffix turns on auto-escaping.
        let env = Environment::new();
        let template = env.template_from_named_str(&file_name, &source)?;
        Ok(template.render(data)?)
    }
}

// Names end up in a filesystem path.
fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}
