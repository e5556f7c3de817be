//! Capability lookup.
//!
//! The engine treats capability resolution as an external collaborator with a
//! single asynchronous contract: `lookup(id)` returns the capability document
//! or nothing. Two implementations ship with the crate — an in-memory store
//! and a directory of JSON documents — and network-backed registries plug in
//! through the same trait.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;

use crate::capability::types::Capability;
use crate::error::{EngineError, EngineResult};

#[async_trait]
pub trait CapabilityRegistry: Send + Sync {
    /// Resolve a capability identifier to its document, if one exists.
    async fn lookup(&self, id: &str) -> EngineResult<Option<Capability>>;
}

/// Registry over an in-memory map, for embedders that assemble capabilities
/// programmatically and for tests.
#[derive(Default)]
pub struct InMemoryRegistry {
    capabilities: RwLock<HashMap<String, Capability>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a capability under its own id, replacing any previous version.
    pub async fn register(&self, capability: Capability) {
        self.capabilities
            .write()
            .await
            .insert(capability.id.clone(), capability);
    }
}

#[async_trait]
impl CapabilityRegistry for InMemoryRegistry {
    async fn lookup(&self, id: &str) -> EngineResult<Option<Capability>> {
        Ok(self.capabilities.read().await.get(id).cloned())
    }
}

/// Registry over a directory of `<id>.json` capability documents.
pub struct DirectoryRegistry {
    root: PathBuf,
}

impl DirectoryRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl CapabilityRegistry for DirectoryRegistry {
    async fn lookup(&self, id: &str) -> EngineResult<Option<Capability>> {
        // Identifiers name files directly; path separators would escape the
        // registry root.
        if id.contains(['/', '\\']) || id.contains("..") {
            return Err(EngineError::Execution(format!(
                "invalid capability id '{}'",
                id
            )));
        }
        let path = self.root.join(format!("{}.json", id));
        let source = match tokio::fs::read_to_string(&path).await {
            Ok(source) => source,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Capability::from_json(&source).map(Some)
    }
}
