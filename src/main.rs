//! Music library indexing daemon.
//!
//! Wires the file-system indexer and the library store together over a
//! broadcast bus, triggers the startup scan, and runs until interrupted.

mod config;
mod error;
mod indexer_manager;
mod library;
mod library_service;
mod media_file_discovery;
mod metadata_tags;
mod protocol;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use log::{error, info, warn};
use tokio::sync::broadcast;

use crate::indexer_manager::IndexerManager;
use crate::library::store::LibraryStore;
use crate::library_service::LibraryService;
use crate::protocol::{ConfigMessage, LibraryMessage, Message};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut clog = colog::default_builder();
    clog.filter(None, log::LevelFilter::Info);
    clog.init();

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));

    let config = config::load_or_create_config();
    let Some(database_path) = config::database_file_path(&config) else {
        error!("No data directory available for the library database");
        return Err("no data directory".into());
    };
    info!("Using library database at {}", database_path.display());

    // Bus for communication between components
    let (bus_sender, _) = broadcast::channel(1024);
    let stop = Arc::new(AtomicBool::new(false));

    let stop_for_signal = Arc::clone(&stop);
    let bus_for_signal = bus_sender.clone();
    ctrlc::set_handler(move || {
        info!("Interrupt received, shutting down");
        stop_for_signal.store(true, Ordering::Relaxed);
        let _ = bus_for_signal.send(Message::Config(ConfigMessage::Shutdown));
    })?;

    let store = LibraryStore::open(&database_path, bus_sender.clone())?;

    let mut library_service = LibraryService::new(
        bus_sender.subscribe(),
        bus_sender.clone(),
        store,
        Arc::clone(&stop),
    );
    let mut indexer = IndexerManager::new(
        bus_sender.subscribe(),
        bus_sender.clone(),
        Arc::clone(&stop),
    );
    let mut lifecycle = bus_sender.subscribe();

    let library_thread = thread::Builder::new()
        .name("library-service".to_string())
        .spawn(move || library_service.run())?;
    let indexer_thread = thread::Builder::new()
        .name("indexer".to_string())
        .spawn(move || indexer.run())?;

    bus_sender.send(Message::Config(ConfigMessage::ConfigChanged(config.clone())))?;
    if config.library.scan_on_start {
        if config.library.folders.is_empty() {
            warn!("No library folders configured, skipping startup scan");
        } else {
            bus_sender.send(Message::Library(LibraryMessage::RequestScan))?;
        }
    }

    loop {
        match lifecycle.blocking_recv() {
            Ok(Message::Library(LibraryMessage::ScanStarted)) => {
                info!("Library scan started");
            }
            Ok(Message::Library(LibraryMessage::ScanCompleted { indexed_tracks })) => {
                info!("Library scan finished, {} track(s) indexed", indexed_tracks);
            }
            Ok(Message::Library(LibraryMessage::ScanFailed(reason))) => {
                warn!("Library scan failed: {}", reason);
            }
            Ok(Message::Config(ConfigMessage::Shutdown)) => break,
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Main thread lagged on control bus, skipped {} message(s)", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }

    let _ = library_thread.join();
    let _ = indexer_thread.join();
    info!("Shutdown complete");
    Ok(())
}
