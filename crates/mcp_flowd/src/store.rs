//! Durable flow collection backed by a JSON array file.

use std::{
    fs,
    path::{Path, PathBuf},
};

use tokio::sync::Mutex;

use crate::{
    flow::{EndpointType, Flow},
    FlowdError,
};

/// Flow records on disk, serialized as a single JSON array.
///
/// All reads and writes happen under one async mutex, so every operation sees
/// a consistent snapshot of the file.
pub struct FlowStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FlowStore {
    /// Opens (or seeds) the store file, creating parent directories.
    pub fn new(path: PathBuf) -> Result<Self, FlowdError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| FlowdError::PrepareData {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        if !path.exists() {
            fs::write(&path, "[]").map_err(|source| FlowdError::StoreWrite {
                path: path.clone(),
                source,
            })?;
        }
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All flows in file order.
    pub async fn list(&self) -> Result<Vec<Flow>, FlowdError> {
        let _guard = self.lock.lock().await;
        self.read_all().await
    }

    /// A single flow by id.
    pub async fn get(&self, flow_id: &str) -> Result<Flow, FlowdError> {
        self.list()
            .await?
            .into_iter()
            .find(|flow| flow.id == flow_id)
            .ok_or_else(|| FlowdError::FlowNotFound(flow_id.to_string()))
    }

    /// Inserts the flow, or replaces the record with the same id.
    pub async fn upsert(&self, flow: Flow) -> Result<(), FlowdError> {
        let _guard = self.lock.lock().await;
        let mut flows = self.read_all().await?;
        match flows.iter_mut().find(|existing| existing.id == flow.id) {
            Some(existing) => *existing = flow,
            None => flows.push(flow),
        }
        self.write_all(&flows).await
    }

    /// Removes the flow; errors when the id is unknown.
    pub async fn delete(&self, flow_id: &str) -> Result<(), FlowdError> {
        let _guard = self.lock.lock().await;
        let mut flows = self.read_all().await?;
        let before = flows.len();
        flows.retain(|flow| flow.id != flow_id);
        if flows.len() == before {
            return Err(FlowdError::FlowNotFound(flow_id.to_string()));
        }
        self.write_all(&flows).await
    }

    /// First flow exposed under `route`, optionally filtered by target type.
    pub async fn find_by_route(
        &self,
        route: &str,
        target_type: Option<EndpointType>,
    ) -> Result<Option<Flow>, FlowdError> {
        Ok(self.list().await?.into_iter().find(|flow| {
            flow.route == route && target_type.map_or(true, |target| flow.target_type == target)
        }))
    }

    async fn read_all(&self) -> Result<Vec<Flow>, FlowdError> {
        let body =
            tokio::fs::read_to_string(&self.path)
                .await
                .map_err(|source| FlowdError::StoreRead {
                    path: self.path.clone(),
                    source,
                })?;
        let body = if body.trim().is_empty() { "[]" } else { &body };
        serde_json::from_str(body).map_err(|source| FlowdError::StoreParse {
            path: self.path.clone(),
            source,
        })
    }

    async fn write_all(&self, flows: &[Flow]) -> Result<(), FlowdError> {
        let body = serde_json::to_string_pretty(flows)?;
        tokio::fs::write(&self.path, body)
            .await
            .map_err(|source| FlowdError::StoreWrite {
                path: self.path.clone(),
                source,
            })
    }
}
