//! Sharded on-disk locations for composites.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use super::ComposeError;

/// Width of each directory segment taken from the entity id.
const SEGMENT_WIDTH: usize = 3;

/// Deepest supported sharding.
pub const MAX_SHARD_DEPTH: usize = 3;

/// Maps entity ids to composite paths.
///
/// Uses a multi-level directory structure based on id prefix to bound
/// directory fan-out:
/// `{base}/{id[0..3]}/{id[3..6]}/{id}.json` at depth 2. Ids too short to fill
/// a segment simply get fewer directories.
///
/// Computed paths are memoized for the life of this value; create one per run.
#[derive(Debug)]
pub struct ShardedPaths {
    base: PathBuf,
    depth: usize,
    memo: Mutex<HashMap<String, PathBuf>>,
}

impl ShardedPaths {
    pub fn new(base: impl Into<PathBuf>, depth: usize) -> Result<Self, ComposeError> {
        if !(1..=MAX_SHARD_DEPTH).contains(&depth) {
            return Err(ComposeError::InvalidDepth {
                depth,
                max: MAX_SHARD_DEPTH,
            });
        }
        Ok(Self {
            base: base.into(),
            depth,
            memo: Mutex::new(HashMap::new()),
        })
    }

    /// Path of the composite for an entity.
    pub fn path_for(&self, entity_id: &str) -> Result<PathBuf, ComposeError> {
        if entity_id.is_empty() || !entity_id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ComposeError::InvalidEntity(entity_id.to_string()));
        }

        let mut memo = self.memo.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(path) = memo.get(entity_id) {
            return Ok(path.clone());
        }

        let mut path = self.base.clone();
        for level in 0..self.depth {
            let start = level * SEGMENT_WIDTH;
            if start >= entity_id.len() {
                break;
            }
            let end = (start + SEGMENT_WIDTH).min(entity_id.len());
            path.push(&entity_id[start..end]);
        }
        path.push(format!("{}.json", entity_id));

        memo.insert(entity_id.to_string(), path.clone());
        Ok(path)
    }
}
