// src/core/snapshot.rs
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{MapperError, Result};
use super::graph::{DataFlowGraph, StructureGraph};

/// Both graphs of one completed build
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub structure: StructureGraph,
    pub dataflow: DataFlowGraph,
    pub built_at: DateTime<Utc>,
    /// SHA-256 over both graphs; equal for unchanged structure
    pub fingerprint: String,
}

impl Snapshot {
    pub fn new(structure: StructureGraph, dataflow: DataFlowGraph) -> Result<Self> {
        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_vec(&structure)?);
        hasher.update(serde_json::to_vec(&dataflow)?);
        let fingerprint = format!("{:x}", hasher.finalize());

        Ok(Self {
            structure,
            dataflow,
            built_at: Utc::now(),
            fingerprint,
        })
    }
}

type BuildFn = dyn Fn() -> Result<Snapshot> + Send + Sync;

/// Holds the published snapshot and coalesces concurrent builds
pub struct SnapshotStore {
    current: ArcSwapOption<Snapshot>,
    build_gate: Mutex<()>,
    /// Bumped after every successful publish
    generation: AtomicU64,
    build: Arc<BuildFn>,
}

impl SnapshotStore {
    pub fn new<F>(build: F) -> Self
    where
        F: Fn() -> Result<Snapshot> + Send + Sync + 'static,
    {
        Self {
            current: ArcSwapOption::empty(),
            build_gate: Mutex::new(()),
            generation: AtomicU64::new(0),
            build: Arc::new(build),
        }
    }

    /// Last published snapshot without triggering a build
    pub fn current(&self) -> Option<Arc<Snapshot>> {
        self.current.load_full()
    }

    /// Published snapshot, building it on first use
    pub async fn get(&self) -> Result<Arc<Snapshot>> {
        if let Some(snapshot) = self.current.load_full() {
            return Ok(snapshot);
        }
        self.build_coalesced(false).await
    }

    /// Force a new build; callers waiting on an in-flight build share its result
    pub async fn rebuild(&self) -> Result<Arc<Snapshot>> {
        self.build_coalesced(true).await
    }

    async fn build_coalesced(&self, forced: bool) -> Result<Arc<Snapshot>> {
        let observed = self.generation.load(Ordering::Acquire);
        let _gate = self.build_gate.lock().await;

        let published_meanwhile = self.generation.load(Ordering::Acquire) != observed;
        if published_meanwhile || !forced {
            if let Some(snapshot) = self.current.load_full() {
                debug!("Reusing snapshot {} from a concurrent build", snapshot.fingerprint);
                return Ok(snapshot);
            }
        }

        let build = Arc::clone(&self.build);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| build()))
            .map_err(|payload| MapperError::BuildPanicked(panic_message(&*payload)))
            .and_then(|result| result);

        match outcome {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                self.current.store(Some(Arc::clone(&snapshot)));
                self.generation.fetch_add(1, Ordering::AcqRel);
                info!("Published snapshot {}", snapshot.fingerprint);
                Ok(snapshot)
            }
            Err(e) => {
                if self.current.load().is_some() {
                    warn!("Build failed, keeping the previous snapshot: {}", e);
                } else {
                    warn!("Build failed with no snapshot published yet: {}", e);
                }
                Err(e)
            }
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
