mod cli;

use clap::Parser;
use log::{debug, error, info, warn};
use std::process;
use tokio_util::sync::CancellationToken;

use cli::{Cli, Command};
use queue_dl::{DownloadEvent, QueueState};
use recsync_lib::config::AppConfig;
use recsync_lib::events::{Event, EventReceiver, ScanEvent};
use recsync_lib::{render_tree, Recorder};

/// Single consumer of the event bus: logs what a UI would display
async fn dispatch(mut rx: EventReceiver) {
    while let Some(event) = rx.recv().await {
        match &event {
            Event::Scan(ScanEvent::DeviceFound { name, host, .. }) => {
                info!("discovery: found {} at {}", name, host)
            }
            Event::Scan(ScanEvent::ScanCompleted {
                source,
                folders,
                files,
                failures,
            }) => info!(
                "{}: {} folders, {} recordings, {} failed requests",
                source, folders, files, failures
            ),
            Event::Download(DownloadEvent::Progress(p)) => info!(
                "download: {} / {} bytes at {:.0} B/s",
                p.total_downloaded, p.total_queued, p.rate
            ),
            Event::Download(DownloadEvent::StateChanged(s)) if s.state == QueueState::Error => {
                warn!(
                    "download: {} failed: {}",
                    s.task_id,
                    s.error.as_deref().unwrap_or("unknown error")
                )
            }
            _ => {}
        }
        if log::log_enabled!(log::Level::Trace) {
            if let Ok(json) = serde_json::to_string(&event) {
                log::trace!("event: {}", json);
            }
        }
    }
    debug!("event bus closed");
}

async fn run(
    command: Command,
    recorder: &Recorder,
    cancel: &CancellationToken,
) -> Result<(), String> {
    match command {
        Command::Scan => {
            let (discovery, transfer) = recorder.scan_all(cancel).await;
            if let Err(e) = discovery {
                warn!("discovery: {}", e);
            }
            if let Err(e) = transfer {
                warn!("ftp_scan: {}", e);
            }
            print!("{}", render_tree(recorder.tree()));
            Ok(())
        }
        Command::Download { paths } => {
            let (discovery, transfer) = recorder.scan_all(cancel).await;
            if let Err(e) = transfer {
                warn!("ftp_scan: {}", e);
            }
            // Transfer URLs only come from discovery
            discovery?;
            recorder.queue_paths(&paths).await?;

            let queue = recorder.queue();
            queue.start().await;
            tokio::select! {
                _ = queue.wait_until_settled() => {}
                _ = cancel.cancelled() => info!("download: interrupted, pausing"),
            }
            queue.stop().await;

            for item in queue.snapshot() {
                println!(
                    "{:<12} {:>12} / {:<12} {}",
                    item.state.to_string(),
                    item.downloaded,
                    item.size,
                    item.local_path
                );
            }
            Ok(())
        }
        Command::Unlock { path } => {
            let scanner = recorder.connect_transfer(cancel).await?;
            scanner.scan(cancel).await?;
            let node = recorder
                .tree()
                .find(&path)
                .ok_or_else(|| format!("No recording at {}", path))?;
            let outcome = scanner.unlock(&node).await.map_err(|e| e.to_string());
            if let Err(e) = scanner.disconnect().await {
                warn!("ftp_scan: {}", e);
            }
            println!("{}: {:?}", path, outcome?);
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = match AppConfig::load_or_default(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    };

    let (recorder, rx) = Recorder::new(config);
    let dispatcher = tokio::spawn(dispatch(rx));

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let result = run(cli.command, &recorder, &cancel).await;
    drop(recorder);
    let _ = dispatcher.await;

    if let Err(e) = result {
        error!("{}", e);
        process::exit(1);
    }
}
