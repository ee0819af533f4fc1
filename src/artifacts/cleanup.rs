//! Retention sweep for generated images.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const SECS_PER_DAY: u64 = 86_400;

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub deleted: usize,
    pub errors: usize,
}

/// Delete regular files in `dir` whose age in whole days exceeds `max_age_days`.
///
/// A file 14.5 days old has a whole-day age of 14 and survives a threshold of 14.
/// Subdirectories are skipped. A missing `dir` is logged and yields zero counts. Per-file
/// failures are counted and logged; the sweep keeps going.
pub async fn clean_old_artifacts(dir: &Path, max_age_days: u64) -> CleanupReport {
    let mut report = CleanupReport::default();
    let now = SystemTime::now();

    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            error!(dir = %dir.display(), "Image directory does not exist");
            return report;
        }
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Failed to read image directory");
            report.errors += 1;
            return report;
        }
    };

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Failed to read directory entry");
                report.errors += 1;
                break;
            }
        };
        let path = entry.path();

        let metadata = match entry.metadata().await {
            Ok(m) => m,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to stat file");
                report.errors += 1;
                continue;
            }
        };
        if !metadata.is_file() {
            continue;
        }

        let modified = match metadata.modified() {
            Ok(t) => t,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "File has no modification time");
                report.errors += 1;
                continue;
            }
        };
        if !is_expired(now, modified, max_age_days) {
            continue;
        }

        match fs::remove_file(&path).await {
            Ok(()) => {
                info!(path = %path.display(), "Deleted expired image");
                report.deleted += 1;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to delete expired image");
                report.errors += 1;
            }
        }
    }

    info!(
        dir = %dir.display(),
        deleted = report.deleted,
        errors = report.errors,
        max_age_days,
        "Image cleanup finished"
    );
    report
}

fn is_expired(now: SystemTime, modified: SystemTime, max_age_days: u64) -> bool {
    // A modification time in the future has age zero.
    let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
    age.as_secs() / SECS_PER_DAY > max_age_days
}

/// Run `clean_old_artifacts` every `interval` until `cancel` fires.
/// The first sweep runs immediately.
pub fn spawn_cleanup_task(
    dir: PathBuf,
    max_age_days: u64,
    interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Cleanup task stopping");
                    break;
                }
                _ = ticker.tick() => {
                    clean_old_artifacts(&dir, max_age_days).await;
                }
            }
        }
    })
}
