use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::domain::model::ForestInput;
use crate::source::{RecordSource, SourceError, SourceResult};

/// Reads the repository → records mapping from a JSON file on every load.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RecordSource for JsonFileSource {
    async fn load(&self) -> SourceResult<ForestInput> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| SourceError::Read {
                path: self.path.display().to_string(),
                source,
            })?;
        let input: ForestInput = serde_json::from_str(&raw)?;
        debug!(path = %self.path.display(), repos = input.len(), "loaded records");
        Ok(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_load_mixed_repo_shapes() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "org/app": [{{"branch": "feat", "parent_branch": "main", "pr_number": 3}}],
                "org/lib": {{"default_branch": "trunk", "branches": [{{"branch": "fix"}}]}}
            }}"#
        )
        .unwrap();

        let input = JsonFileSource::new(file.path()).load().await.unwrap();
        assert_eq!(input["org/app"].default_branch, None);
        assert_eq!(input["org/app"].branches[0].pr_number, Some(3));
        assert_eq!(input["org/lib"].default_branch.as_deref(), Some("trunk"));
    }

    #[tokio::test]
    async fn test_missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = JsonFileSource::new(dir.path().join("absent.json"))
            .load()
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Read { .. }));
    }

    #[tokio::test]
    async fn test_bad_json_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[not a mapping").unwrap();
        let err = JsonFileSource::new(file.path()).load().await.unwrap_err();
        assert!(matches!(err, SourceError::Parse(_)));
    }
}
