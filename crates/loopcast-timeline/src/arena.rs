//! Per-job scratch arena.
//!
//! Every intermediate artifact of a job lives in one directory owned by the
//! job. The arena is created on start and released when the job settles.

use loopcast_models::JobId;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, warn};

use crate::error::TimelineResult;

/// Scratch directory owned by one job or stream session.
#[derive(Debug)]
pub struct JobArena {
    root: PathBuf,
    counter: AtomicUsize,
    released: bool,
}

impl JobArena {
    /// Create `work_dir/job-<id>`.
    pub async fn create(work_dir: &Path, job_id: &JobId) -> TimelineResult<Self> {
        let root = work_dir.join(format!("job-{}", job_id));
        tokio::fs::create_dir_all(&root).await?;
        debug!(arena = %root.display(), "Created job arena");
        Ok(Self {
            root,
            counter: AtomicUsize::new(0),
            released: false,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Fresh artifact path; numbering keeps names unique and ordered.
    pub fn artifact(&self, name: &str, ext: &str) -> PathBuf {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        self.root.join(format!("{:04}-{}.{}", n, name, ext))
    }

    /// Remove the arena and everything in it.
    pub async fn release(mut self) {
        self.released = true;
        if let Err(e) = tokio::fs::remove_dir_all(&self.root).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(arena = %self.root.display(), "Failed to release job arena: {}", e);
            }
        }
    }
}

impl Drop for JobArena {
    fn drop(&mut self) {
        if !self.released {
            // Dropped without release(), e.g. on panic
            warn!(arena = %self.root.display(), "Job arena dropped without release, removing");
            let _ = std::fs::remove_dir_all(&self.root);
        }
    }
}
