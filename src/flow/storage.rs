/// Filesystem persistence for `.flow` documents
///
/// A collection is a directory of `<name>.flow` files. Writes go to a temporary file in
/// the same directory and are renamed into place, so readers never see a half-written
/// document.

use crate::error::{FlowError, Result};
use crate::flow::serializer::{FlowSerializer, LoadedFlow};
use crate::flow::types::FlowData;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// File extension of flow documents
pub const FLOW_EXTENSION: &str = "flow";

/// `.flow` file store for one collection directory
#[derive(Debug, Clone)]
pub struct FlowStore {
    root: PathBuf,
    serializer: FlowSerializer,
}

impl FlowStore {
    pub fn new(root: impl Into<PathBuf>, serializer: FlowSerializer) -> Self {
        Self {
            root: root.into(),
            serializer,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn serializer(&self) -> &FlowSerializer {
        &self.serializer
    }

    /// Path of the flow called `name`; rejects names that leave the collection
    pub fn flow_path(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.root.join(format!("{}.{}", name, FLOW_EXTENSION)))
    }

    /// Create a new flow file; `None` writes the empty sentinel
    ///
    /// Fails with an `AlreadyExists` I/O error if the flow is already present.
    pub async fn create_flow(&self, name: &str, flow: Option<&FlowData>) -> Result<PathBuf> {
        let path = self.flow_path(name)?;
        let loaded = flow.cloned().map_or(LoadedFlow::NotLoaded, LoadedFlow::Loaded);
        let text = self.serializer.to_text(&loaded)?;

        tokio::fs::create_dir_all(&self.root).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        file.write_all(text.as_bytes()).await?;
        file.flush().await?;

        tracing::info!("📄 Created flow '{}' at {}", name, path.display());
        Ok(path)
    }

    /// Read a flow; a missing file is an I/O `NotFound` error
    pub async fn read_flow(&self, name: &str) -> Result<LoadedFlow> {
        let path = self.flow_path(name)?;
        let text = tokio::fs::read_to_string(&path).await?;
        tracing::debug!("📖 Read flow '{}' ({} bytes)", name, text.len());
        self.serializer.from_text(&text)
    }

    /// Replace a flow's contents, creating the file if needed
    pub async fn update_flow(&self, name: &str, flow: &FlowData) -> Result<PathBuf> {
        let path = self.flow_path(name)?;
        let text = self.serializer.to_text(&LoadedFlow::Loaded(flow.clone()))?;

        tokio::fs::create_dir_all(&self.root).await?;
        write_atomic(&path, &text).await?;

        tracing::info!("💾 Saved flow '{}' ({} nodes)", name, flow.nodes.len());
        Ok(path)
    }

    /// Delete a flow; returns whether a file was removed
    pub async fn delete_flow(&self, name: &str) -> Result<bool> {
        let path = self.flow_path(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!("🗑️ Deleted flow '{}'", name);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Names of all flows in the collection, sorted
    pub async fn list_flows(&self) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(FLOW_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Reject empty names, hidden names and anything containing a path separator
pub fn validate_name(name: &str) -> Result<()> {
    let invalid = name.trim().is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\'])
        || name.contains("..");
    if invalid {
        return Err(FlowError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Write through a sibling temp file and rename it over the target
async fn write_atomic(path: &Path, contents: &str) -> std::io::Result<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("flow");
    let tmp = path.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

    if let Err(e) = tokio::fs::write(&tmp, contents).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}
