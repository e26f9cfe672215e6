//! Command generation interface
//!
//! Turns a natural-language query into candidate shell commands. The
//! moderated runner only depends on this trait; model backends live outside
//! this crate.

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::monitor::EnvironmentSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GenerationMode {
    #[default]
    Default,
    /// Richer prompting, may return multi-step commands
    Advanced,
}

impl fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Default => "default",
            Self::Advanced => "advanced",
        })
    }
}

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("No command generated for query: {0}")]
    Empty(String),
}

#[async_trait]
pub trait CommandGenerator: Send + Sync {
    /// Candidate commands for `query`, in preference order
    async fn generate(
        &self,
        query: &str,
        mode: GenerationMode,
        context: Option<&EnvironmentSnapshot>,
    ) -> Result<Vec<String>, GeneratorError>;
}

/// Returns the same commands for every query, e.g. commands typed on the CLI
#[derive(Debug, Clone, Default)]
pub struct StaticGenerator {
    commands: Vec<String>,
}

impl StaticGenerator {
    pub fn new<I, S>(commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            commands: commands.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl CommandGenerator for StaticGenerator {
    async fn generate(
        &self,
        query: &str,
        _mode: GenerationMode,
        _context: Option<&EnvironmentSnapshot>,
    ) -> Result<Vec<String>, GeneratorError> {
        if self.commands.is_empty() {
            return Err(GeneratorError::Empty(query.to_string()));
        }
        Ok(self.commands.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_generator() {
        let generator = StaticGenerator::new(["ls -la", "pwd"]);
        let commands = generator
            .generate("list files", GenerationMode::Advanced, None)
            .await
            .unwrap();
        assert_eq!(commands, vec!["ls -la", "pwd"]);

        let empty = StaticGenerator::default();
        let err = empty.generate("anything", GenerationMode::Default, None).await.unwrap_err();
        assert!(matches!(err, GeneratorError::Empty(q) if q == "anything"));
    }
}
