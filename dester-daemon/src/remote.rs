//! Per-category remote handles and the registry that owns them.
//!
//! The registry is an ordinary owned value (held by the startup context), one
//! handle per [`CategoryId`]. Handles share the daemon transport and nothing
//! else.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use dester_core::{Category, CategoryId};

use crate::error::DaemonError;
use crate::rc::{self, RcTransport};

/// One entry returned by `operations/list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RemoteEntry {
    pub path: String,
    pub name: String,
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub is_dir: bool,
}

/// Live API handle for one category.
#[derive(Clone)]
pub struct RemoteHandle {
    category: Category,
    transport: Arc<dyn RcTransport>,
    generation: u64,
}

impl std::fmt::Debug for RemoteHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteHandle")
            .field("category", &self.category.identifier)
            .field("generation", &self.generation)
            .finish()
    }
}

impl RemoteHandle {
    pub fn category(&self) -> &Category {
        &self.category
    }

    pub fn id(&self) -> &CategoryId {
        &self.category.identifier
    }

    /// Registry-unique instance number; a replaced handle gets a new one.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// rclone filesystem targets this category reads from.
    pub fn targets(&self) -> Vec<String> {
        self.category.targets()
    }

    /// Remote names configured in the daemon (`config/listremotes`).
    pub fn list_remotes(&self) -> Result<Vec<String>, DaemonError> {
        let response = self.transport.call(rc::LIST_REMOTES, json!({}))?;
        Ok(response
            .get("remotes")
            .and_then(Value::as_array)
            .map(|remotes| {
                remotes
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default())
    }

    /// List `path` under every target of the category, concatenated in
    /// selector order.
    pub fn list_dir(&self, path: &str) -> Result<Vec<RemoteEntry>, DaemonError> {
        let mut entries = Vec::new();
        for fs in self.targets() {
            let response = self
                .transport
                .call(rc::LIST, json!({ "fs": fs, "remote": path }))?;
            if let Some(list) = response.get("list") {
                let mut page: Vec<RemoteEntry> = serde_json::from_value(list.clone())?;
                entries.append(&mut page);
            }
        }
        Ok(entries)
    }
}

/// Category id → handle, in registration order.
pub struct RemoteRegistry {
    transport: Arc<dyn RcTransport>,
    handles: HashMap<CategoryId, RemoteHandle>,
    order: Vec<CategoryId>,
    next_generation: u64,
}

impl RemoteRegistry {
    pub fn new(transport: Arc<dyn RcTransport>) -> Self {
        Self {
            transport,
            handles: HashMap::new(),
            order: Vec::new(),
            next_generation: 1,
        }
    }

    /// Register `category`, replacing any handle already under its id.
    /// A replaced id keeps its original position.
    pub fn register(&mut self, category: Category) -> &RemoteHandle {
        let id = category.identifier.clone();
        let handle = RemoteHandle {
            category,
            transport: Arc::clone(&self.transport),
            generation: self.next_generation,
        };
        self.next_generation += 1;

        if self.handles.insert(id.clone(), handle).is_some() {
            tracing::debug!(category = %id, "replaced remote handle");
        } else {
            self.order.push(id.clone());
            tracing::debug!(category = %id, "registered remote handle");
        }
        &self.handles[&id]
    }

    /// Register every category in input order.
    pub fn setup(&mut self, categories: &[Category]) {
        for category in categories {
            self.register(category.clone());
        }
    }

    /// Drop every handle. Generations keep increasing across clears.
    pub fn clear(&mut self) {
        if !self.handles.is_empty() {
            tracing::debug!(count = self.handles.len(), "closing remote handles");
        }
        self.handles.clear();
        self.order.clear();
    }

    pub fn get(&self, id: &CategoryId) -> Option<&RemoteHandle> {
        self.handles.get(id)
    }

    pub fn contains(&self, id: &CategoryId) -> bool {
        self.handles.contains_key(id)
    }

    pub fn ids(&self) -> &[CategoryId] {
        &self.order
    }

    pub fn iter(&self) -> impl Iterator<Item = &RemoteHandle> {
        self.order.iter().filter_map(|id| self.handles.get(id))
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
