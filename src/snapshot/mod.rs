use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::book::BookSnapshot;
use crate::config::ChainId;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("writing snapshot to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("reading snapshot from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing snapshot {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// `{orderBook, chainHeights}` — the value the pipeline captures on every
/// finality tick and the interleaver restores on fork recovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub order_book: BookSnapshot,
    pub chain_heights: HashMap<ChainId, u64>,
}

/// Persists snapshots atomically (write-temp-then-rename) and keeps a
/// bounded ring of historical backups.
pub struct SnapshotStore {
    current_path: PathBuf,
    backup_dir: PathBuf,
    backup_max_count: usize,
}

impl SnapshotStore {
    pub fn new(current_path: PathBuf, backup_dir: PathBuf, backup_max_count: usize) -> Self {
        SnapshotStore { current_path, backup_dir, backup_max_count }
    }

    /// `base_height` is the snapshot's captured base-chain height — the
    /// backup sidecar is named from it.
    pub fn save(&self, snapshot: &OrderBookSnapshot, base_height: u64) -> Result<(), SnapshotError> {
        let json = serde_json::to_string_pretty(snapshot).expect("snapshot serializes");

        self.write_atomic(&self.current_path, &json)?;

        std::fs::create_dir_all(&self.backup_dir).map_err(|source| SnapshotError::Write {
            path: self.backup_dir.clone(),
            source,
        })?;
        let backup_path = self.backup_dir.join(format!("snapshot-{base_height}.json"));
        self.write_atomic(&backup_path, &json)?;
        self.trim_backups()?;
        Ok(())
    }

    fn write_atomic(&self, path: &Path, contents: &str) -> Result<(), SnapshotError> {
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, contents).map_err(|source| SnapshotError::Write { path: tmp_path.clone(), source })?;
        std::fs::rename(&tmp_path, path).map_err(|source| SnapshotError::Write { path: path.to_path_buf(), source })?;
        Ok(())
    }

    fn trim_backups(&self) -> Result<(), SnapshotError> {
        let mut heights: Vec<(u64, PathBuf)> = std::fs::read_dir(&self.backup_dir)
            .map_err(|source| SnapshotError::Read { path: self.backup_dir.clone(), source })?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let path = entry.path();
                let stem = path.file_stem()?.to_str()?.to_string();
                let height: u64 = stem.strip_prefix("snapshot-")?.parse().ok()?;
                Some((height, path))
            })
            .collect();

        if heights.len() <= self.backup_max_count {
            return Ok(());
        }
        heights.sort_by_key(|(height, _)| *height);
        let excess = heights.len() - self.backup_max_count;
        for (_, path) in heights.into_iter().take(excess) {
            let _ = std::fs::remove_file(path);
        }
        Ok(())
    }

    pub fn load(&self) -> Result<Option<OrderBookSnapshot>, SnapshotError> {
        if !self.current_path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&self.current_path)
            .map_err(|source| SnapshotError::Read { path: self.current_path.clone(), source })?;
        let mut value: Value = serde_json::from_str(&contents)
            .map_err(|source| SnapshotError::Parse { path: self.current_path.clone(), source })?;
        rewrite_legacy_bid_fields(&mut value);
        let snapshot: OrderBookSnapshot = serde_json::from_value(value)
            .map_err(|source| SnapshotError::Parse { path: self.current_path.clone(), source })?;
        Ok(Some(snapshot))
    }
}

/// Older snapshots used `orderId`/`size` on bid orders; this node's schema
/// uses `id`/`value`. Rewrite in place so old snapshots still load.
fn rewrite_legacy_bid_fields(value: &mut Value) {
    let Some(bids) = value
        .get_mut("orderBook")
        .and_then(|ob| ob.get_mut("bidLimitOrders"))
        .and_then(|b| b.as_array_mut())
    else {
        return;
    };
    for bid in bids {
        let Some(obj) = bid.as_object_mut() else { continue };
        if !obj.contains_key("id") {
            if let Some(order_id) = obj.remove("orderId") {
                obj.insert("id".to_string(), order_id);
            }
        }
        if !obj.contains_key("value") {
            if let (Some(size), Some(price)) = (
                obj.get("size").and_then(Value::as_u64),
                obj.get("price").and_then(Value::as_u64),
            ) {
                obj.insert("value".to_string(), Value::from(size * price));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile_like::TempDir;

    mod tempfile_like {
        use std::path::PathBuf;

        /// Minimal scratch-directory helper so this test doesn't need a
        /// `tempfile` dependency just for one test.
        pub struct TempDir(pub PathBuf);

        impl TempDir {
            pub fn new(label: &str) -> Self {
                let path = std::env::temp_dir().join(format!("dex-coordinator-test-{label}-{}", std::process::id()));
                std::fs::create_dir_all(&path).unwrap();
                TempDir(path)
            }

            pub fn path(&self) -> &std::path::Path {
                &self.0
            }
        }

        impl Drop for TempDir {
            fn drop(&mut self) {
                let _ = std::fs::remove_dir_all(&self.0);
            }
        }
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = TempDir::new("snapshot-roundtrip");
        let store = SnapshotStore::new(dir.path().join("current.json"), dir.path().join("backups"), 10);

        let mut chain_heights = HashMap::new();
        chain_heights.insert(ChainId::new("A"), 100);
        chain_heights.insert(ChainId::new("B"), 200);
        let snapshot = OrderBookSnapshot {
            order_book: BookSnapshot { bid_limit_orders: vec![], ask_limit_orders: vec![] },
            chain_heights,
        };

        store.save(&snapshot, 100).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.chain_heights.get(&ChainId::new("A")), Some(&100));
    }
}
