//! Periodic removal of stale temporary files
//!
//! Best effort: a file that cannot be inspected or removed is logged and
//! skipped, and the next tick tries again.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub removed: usize,
    pub failed: usize,
}

/// Delete top-level entries of each folder last modified before `now - max_age`.
pub fn sweep(dirs: &[PathBuf], max_age: Duration, now: SystemTime) -> SweepStats {
    let mut stats = SweepStats::default();
    let Some(cutoff) = now.checked_sub(max_age) else {
        return stats;
    };

    for dir in dirs {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Skipping cleanup of {}: {}", dir.display(), e);
                continue;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            match remove_if_stale(&path, cutoff) {
                Ok(true) => stats.removed += 1,
                Ok(false) => {}
                Err(e) => {
                    stats.failed += 1;
                    warn!("Failed to clean up {}: {}", path.display(), e);
                }
            }
        }
    }

    stats
}

fn remove_if_stale(path: &Path, cutoff: SystemTime) -> std::io::Result<bool> {
    let metadata = fs::metadata(path)?;
    if metadata.modified()? >= cutoff {
        return Ok(false);
    }

    if metadata.is_dir() {
        fs::remove_dir_all(path)?;
    } else {
        fs::remove_file(path)?;
    }
    Ok(true)
}

/// Run [`sweep`] every `interval` until `token` is cancelled.
pub fn start_cleanup_task(
    dirs: Vec<PathBuf>,
    max_age: Duration,
    interval: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = token.cancelled() => {
                    info!("Cleanup task shutting down");
                    break;
                }
                _ = ticker.tick() => {}
            }

            let dirs = dirs.clone();
            match tokio::task::spawn_blocking(move || sweep(&dirs, max_age, SystemTime::now()))
                .await
            {
                Ok(stats) if stats.removed > 0 || stats.failed > 0 => {
                    info!(
                        "Cleanup removed {} stale entries ({} failures)",
                        stats.removed, stats.failed
                    );
                }
                Ok(_) => {}
                Err(e) => warn!("Cleanup sweep panicked: {}", e),
            }
        }
    })
}
