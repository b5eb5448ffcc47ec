//! Per-session checkpoint tree
//!
//! The multiplexer stores only checkpoint ids and parent links; checkpoint
//! payloads are the owning component's business. Ids are stable identifiers
//! (uuids), never reused counters, so a rolled-back session keeps producing
//! fresh ids whose ancestry records the branch point.

use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Unknown checkpoint: {0}")]
    Unknown(String),
}

#[derive(Debug, Clone)]
struct Node {
    parent: Option<String>,
}

/// Checkpoint ids and parent links for one feature set of one session.
#[derive(Debug, Default)]
pub struct CheckpointTree {
    nodes: HashMap<String, Node>,
    cursor: Option<String>,
}

impl CheckpointTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new checkpoint chained from the current cursor and move the
    /// cursor to it. Returns the new id.
    pub fn checkpoint(&mut self) -> String {
        let id = Uuid::new_v4().to_string();
        self.record(id.clone());
        id
    }

    /// Record a component-supplied checkpoint id (the owning component mints
    /// ids for its own payloads; the tree only tracks links).
    pub fn record(&mut self, id: String) {
        self.nodes.insert(
            id.clone(),
            Node {
                parent: self.cursor.clone(),
            },
        );
        self.cursor = Some(id);
    }

    /// Move the cursor back to an existing checkpoint. Later checkpoints stay
    /// in the tree; new checkpoints branch from here.
    pub fn rollback(&mut self, id: &str) -> Result<(), CheckpointError> {
        if !self.nodes.contains_key(id) {
            return Err(CheckpointError::Unknown(id.to_string()));
        }
        self.cursor = Some(id.to_string());
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    /// Ancestor chain of a checkpoint, nearest parent first.
    pub fn ancestry(&self, id: &str) -> Vec<String> {
        let mut chain = Vec::new();
        let mut current = self.nodes.get(id).and_then(|n| n.parent.clone());
        while let Some(parent_id) = current {
            current = self.nodes.get(&parent_id).and_then(|n| n.parent.clone());
            chain.push(parent_id);
        }
        chain
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
