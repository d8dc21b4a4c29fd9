use crucible_domain::Output;

use crate::error::StoreError;

/// Externalizes captured process output above the large-output threshold
/// to a file under `output_store_root`, matching the durable-store
/// interface's "reference and a bounded preview" convention.
pub struct OutputStore {
    root: std::path::PathBuf,
    threshold_bytes: usize,
    preview_bytes: usize,
}

impl OutputStore {
    pub fn new(root: impl Into<std::path::PathBuf>, threshold_bytes: usize) -> Self {
        Self { root: root.into(), threshold_bytes, preview_bytes: 1024.min(threshold_bytes) }
    }

    pub async fn store(&self, evaluation_id: &str, stream_name: &str, data: &str) -> Result<Output, StoreError> {
        if data.len() <= self.threshold_bytes {
            return Ok(Output::inline(data));
        }

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| StoreError::Internal(format!("output store mkdir: {e}")))?;
        let path = self.root.join(format!("{evaluation_id}-{stream_name}.log"));
        tokio::fs::write(&path, data).await.map_err(|e| StoreError::Internal(format!("output store write: {e}")))?;

        let preview: String = data.chars().take(self.preview_bytes).collect();
        Ok(Output::Externalized { reference: path.display().to_string(), preview })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn small_output_stays_inline() {
        let dir = tempfile::tempdir().unwrap();
        let store = OutputStore::new(dir.path(), 1024);
        let out = store.store("e1", "stdout", "hello").await.unwrap();
        assert!(matches!(out, Output::Inline { .. }));
    }

    #[tokio::test]
    async fn large_output_is_externalized_with_a_preview() {
        let dir = tempfile::tempdir().unwrap();
        let store = OutputStore::new(dir.path(), 4);
        let out = store.store("e1", "stdout", "hello world").await.unwrap();
        match out {
            Output::Externalized { reference, preview } => {
                assert!(std::path::Path::new(&reference).exists());
                assert!(!preview.is_empty());
            }
            _ => panic!("expected externalized output"),
        }
    }
}
