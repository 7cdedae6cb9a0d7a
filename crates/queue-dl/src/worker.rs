//! Download worker - streams one queue item at a time to disk

use futures_util::StreamExt;
use log::{debug, info, warn};
use reqwest::header::RANGE;
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Instant;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::fs::move_file;
use crate::manager::{Job, Shared};
use crate::rate::RateTracker;
use crate::types::{DownloadCompleted, DownloadEvent, DownloadProgress, DownloadSource, QueueState};

/// How a single transfer ended
#[derive(Debug)]
enum Outcome {
    Completed(u64),
    /// Stopped by the caller; the partial file stays on disk
    Paused(u64),
    Failed(String),
}

/// Drain pending items until cancelled, sleeping while the queue has no work.
pub(crate) async fn run<S: DownloadSource>(shared: Arc<Shared<S>>, cancel: CancellationToken) {
    let mut rate = RateTracker::new(shared.config.rate_samples);

    while !cancel.is_cancelled() {
        let job = match shared.claim_next() {
            Some(job) => job,
            None => {
                rate.reset();
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = shared.work_available.notified() => continue,
                }
            }
        };

        info!(
            "download: {} -> {:?} (from byte {})",
            job.id, job.path, job.resume_from
        );
        let outcome = transfer(&shared, &job, &cancel, &mut rate).await;
        finish(&shared, &job, outcome).await;
        emit_progress(&shared, &rate);
    }
    debug!("download: worker loop exited");
}

fn emit_progress<S: DownloadSource>(shared: &Shared<S>, rate: &RateTracker) {
    let (total_queued, total_downloaded) = shared.totals();
    shared.emit(DownloadEvent::Progress(DownloadProgress {
        total_queued,
        total_downloaded,
        rate: rate.get_rate(),
    }));
}

async fn transfer<S: DownloadSource>(
    shared: &Shared<S>,
    job: &Job,
    cancel: &CancellationToken,
    rate: &mut RateTracker,
) -> Outcome {
    // Start the download request with range header if resuming
    let mut request = shared.client.get(&job.url);
    if job.resume_from > 0 {
        request = request.header(RANGE, format!("bytes={}-", job.resume_from));
    }

    let response = tokio::select! {
        _ = cancel.cancelled() => return Outcome::Paused(job.resume_from),
        response = request.send() => response,
    };
    let response = match response {
        Ok(r) => r,
        Err(e) => return Outcome::Failed(format!("Download request failed: {}", e)),
    };

    let status = response.status();
    if status == StatusCode::RANGE_NOT_SATISFIABLE && job.resume_from > 0 {
        // The local file already holds the whole body
        info!(
            "download: {} already complete at {} bytes",
            job.id, job.resume_from
        );
        return Outcome::Completed(job.resume_from);
    }
    if !status.is_success() {
        return Outcome::Failed(format!("Download failed: {}", status));
    }

    let mut offset = job.resume_from;
    if offset > 0 && status != StatusCode::PARTIAL_CONTENT {
        warn!(
            "download: {} server ignored range request ({}), restarting from zero",
            job.id, status
        );
        offset = 0;
        shared.set_downloaded(&job.id, 0);
    }

    let total_bytes = match response.content_length() {
        Some(len) => len + offset,
        None => job.size,
    };
    shared.set_size(&job.id, total_bytes);

    if let Some(parent) = job.path.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            return Outcome::Failed(format!("Failed to create directory: {}", e));
        }
    }

    // Open or create the destination file (append mode if resuming)
    let opened = if offset > 0 {
        OpenOptions::new()
            .append(true)
            .create(true)
            .open(&job.path)
            .await
    } else {
        File::create(&job.path).await
    };
    let mut file = match opened {
        Ok(f) => f,
        Err(e) => return Outcome::Failed(format!("Failed to open file: {}", e)),
    };

    let mut stream = response.bytes_stream();
    let mut last_emit = Instant::now();
    let mut bytes_since_emit: u64 = 0;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let _ = file.flush().await;
                return Outcome::Paused(offset);
            }
            next = stream.next() => next,
        };

        let chunk = match next {
            None => break,
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => {
                let _ = file.flush().await;
                return Outcome::Failed(format!("Failed to read chunk: {}", e));
            }
        };

        if let Err(e) = file.write_all(&chunk).await {
            return Outcome::Failed(format!("Failed to write file: {}", e));
        }
        offset += chunk.len() as u64;
        bytes_since_emit += chunk.len() as u64;
        shared.set_downloaded(&job.id, offset);

        let elapsed = last_emit.elapsed();
        if elapsed >= shared.config.progress_interval {
            rate.add_rate(bytes_since_emit as f64 / elapsed.as_secs_f64());
            emit_progress(shared, rate);
            last_emit = Instant::now();
            bytes_since_emit = 0;
        }
    }

    if let Err(e) = file.flush().await {
        return Outcome::Failed(format!("Failed to flush file: {}", e));
    }
    Outcome::Completed(offset)
}

async fn finish<S: DownloadSource>(shared: &Shared<S>, job: &Job, outcome: Outcome) {
    match outcome {
        Outcome::Completed(downloaded) => {
            shared.set_downloaded(&job.id, downloaded);
            if let Err(e) = relocate(shared, job).await {
                warn!("download: {} failed to move: {}", job.id, e);
                shared.transition(&job.id, |item| {
                    item.state = QueueState::Error;
                    item.error = Some(e);
                });
                return;
            }
            let present = shared.transition(&job.id, |item| {
                item.state = QueueState::Completed;
                item.size = downloaded;
            });
            if present {
                let local_path = shared
                    .local_path(&job.id)
                    .unwrap_or_else(|| job.path.clone());
                info!("download: {} completed ({} bytes)", job.id, downloaded);
                shared.emit(DownloadEvent::ItemCompleted(DownloadCompleted {
                    task_id: job.id.clone(),
                    local_path: local_path.to_string_lossy().into_owned(),
                }));
            }
        }
        Outcome::Paused(downloaded) => {
            info!("download: {} paused at {} bytes", job.id, downloaded);
            shared.transition(&job.id, |item| {
                item.state = QueueState::Paused;
                item.downloaded = downloaded;
            });
        }
        Outcome::Failed(error) => {
            warn!("download: {} failed: {}", job.id, error);
            shared.transition(&job.id, |item| {
                item.state = QueueState::Error;
                item.error = Some(error);
            });
        }
    }
}

/// Move a finished file into the configured move-to directory, if any
async fn relocate<S: DownloadSource>(shared: &Shared<S>, job: &Job) -> Result<(), String> {
    let move_dir = match &shared.config.move_dir {
        Some(dir) if *dir != shared.config.download_dir => dir.clone(),
        _ => return Ok(()),
    };
    let file_name = job
        .path
        .file_name()
        .ok_or_else(|| format!("Invalid local path: {:?}", job.path))?;
    let target = move_dir.join(file_name);

    shared.set_move_progress(&job.id, 0.0);
    move_file(&job.path, &target, |fraction| {
        shared.set_move_progress(&job.id, fraction)
    })
    .await?;
    shared.set_local_dir(&job.id, move_dir);
    Ok(())
}
