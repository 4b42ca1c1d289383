use clap::Parser;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use catalogue_core::cli::{Cli, Command};
use catalogue_core::library::Library;
use catalogue_core::services::scanner::ScanProgress;
use catalogue_core::utils::config::get_config;
use catalogue_core::utils::db::get_application_store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let store = get_application_store().await?;
    let library = Library::new(store.clone());
    let config = get_config()?;

    library.migrate_sources(&config.sources.paths).await?;

    match cli.command {
        Command::Scan { source, full } => {
            let (progress_tx, progress_rx) = mpsc::channel::<ScanProgress>(64);
            let cancel = CancellationToken::new();

            let printer = tokio::spawn(print_progress(progress_rx));
            let signal_cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    log::info!("Cancelling scan...");
                    signal_cancel.cancel();
                }
            });

            let stats = match source {
                Some(source) => library.refresh_source(&source, progress_tx, cancel).await?,
                None if full => library.full_refresh(&config.sources.paths, progress_tx, cancel).await?,
                None => library.refresh(&config.sources.paths, progress_tx, cancel).await?,
            };

            printer.await.ok();

            for (source, stats) in stats {
                println!(
                    "{}: +{} added, ~{} updated, -{} removed",
                    source.display(),
                    stats.added.len(),
                    stats.updated.len(),
                    stats.removed.len()
                );
            }
        }

        Command::Search { query, albums_only } => {
            let rows = if albums_only {
                library.search_albums_fts(&query).await?
            } else {
                library.search_fts(&query).await?
            };

            for row in rows {
                match row.result_type.as_str() {
                    "artist" => println!("artist  {}", row.artist),
                    "album" => println!("album   {} - {} ({})", row.artist, row.album, row.year.map(|y| y.to_string()).unwrap_or_default()),
                    "track" => println!(
                        "track   {} - {} - {}",
                        row.track_artist.as_deref().unwrap_or(&row.artist),
                        row.album,
                        row.track_title.as_deref().unwrap_or("")
                    ),
                    other => println!("{other}  {}", row.artist),
                }
            }
        }

        Command::Reconcile => {
            let touched = library.verify_downloads_on_disk(&config.transfer.completed_root).await?;
            println!("Verified {} download(s) against disk.", touched.len());
        }
    }

    Ok(())
}

/// Drains `rx` as a stream, printing one line per event as it arrives
/// instead of waiting for the scan to finish.
async fn print_progress(rx: mpsc::Receiver<ScanProgress>) {
    let mut stream = ReceiverStream::new(rx);

    while let Some(event) = stream.next().await {
        match event.phase {
            catalogue_core::services::scanner::ScanPhase::Scanning => {
                print!("\rScanning... {} files found", event.current);
            }
            catalogue_core::services::scanner::ScanPhase::Processing => {
                print!("\rProcessing {}/{}", event.current, event.total);
            }
            catalogue_core::services::scanner::ScanPhase::Cleaning => {
                print!("\rCleaning {}/{}", event.current, event.total);
            }
            catalogue_core::services::scanner::ScanPhase::Done => {
                println!("\rScan complete.");
            }
        }
        use std::io::Write;
        let _ = std::io::stdout().flush();
    }
}
