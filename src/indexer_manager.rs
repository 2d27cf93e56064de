//! File-system indexing runtime component.
//!
//! Walks the configured folders, diffs what it finds against the file list
//! the store remembers for the scan source, and feeds the store bounded
//! batches of inserts, re-imports, and removals.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::broadcast::{Receiver, Sender};

use crate::media_file_discovery;
use crate::metadata_tags;
use crate::protocol::{
    ConfigMessage, LibraryMessage, Message, RestoredFile, ScannerMessage, TrackMetadata,
};

const SCAN_BATCH_SIZE: usize = 128;

/// Scan classification of on-disk files against the stored baseline.
#[derive(Debug, Default, PartialEq)]
struct ScanDiff {
    new_files: Vec<String>,
    modified_files: Vec<String>,
    removed_files: Vec<String>,
}

fn diff_against_baseline(
    baseline: &HashMap<String, i64>,
    on_disk: &[(String, i64)],
) -> ScanDiff {
    let mut diff = ScanDiff::default();
    let mut seen = HashSet::with_capacity(on_disk.len());
    for (uri, file_modified_ms) in on_disk {
        seen.insert(uri.as_str());
        match baseline.get(uri) {
            None => diff.new_files.push(uri.clone()),
            Some(known) if *known != *file_modified_ms => diff.modified_files.push(uri.clone()),
            Some(_) => {}
        }
    }
    for uri in baseline.keys() {
        if !seen.contains(uri.as_str()) {
            diff.removed_files.push(uri.clone());
        }
    }
    diff.removed_files.sort_unstable();
    diff
}

/// Coordinates library folder scans against the stored file baseline.
pub struct IndexerManager {
    bus_consumer: Receiver<Message>,
    bus_producer: Sender<Message>,
    library_folders: Vec<String>,
    source_name: String,
    scan_pending: bool,
    stop: Arc<AtomicBool>,
}

impl IndexerManager {
    pub fn new(
        bus_consumer: Receiver<Message>,
        bus_producer: Sender<Message>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            bus_consumer,
            bus_producer,
            library_folders: Vec::new(),
            source_name: "local".to_string(),
            scan_pending: false,
            stop,
        }
    }

    /// Starts the blocking event loop for scan requests.
    pub fn run(&mut self) {
        loop {
            match self.bus_consumer.blocking_recv() {
                Ok(message) => match message {
                    Message::Config(ConfigMessage::ConfigChanged(config)) => {
                        self.library_folders = config.library.folders;
                        self.source_name = config.library.source_name;
                    }
                    Message::Config(ConfigMessage::Shutdown) => break,
                    Message::Library(LibraryMessage::RequestScan) => {
                        self.scan_pending = true;
                        self.send_scanner(ScannerMessage::RequestRestoredTracks {
                            source: self.source_name.clone(),
                        });
                    }
                    Message::Library(LibraryMessage::RestoredTracks { source, files }) => {
                        if self.scan_pending && source == self.source_name {
                            self.scan_pending = false;
                            self.run_scan(&files);
                        }
                    }
                    _ => {}
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        "IndexerManager lagged on control bus, skipped {} message(s)",
                        skipped
                    );
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    fn run_scan(&mut self, restored: &[RestoredFile]) {
        self.send_library(LibraryMessage::ScanStarted);

        let readable_folders: Vec<PathBuf> = self
            .library_folders
            .iter()
            .map(PathBuf::from)
            .filter(|folder| folder.is_dir())
            .collect();
        if readable_folders.is_empty() && !self.library_folders.is_empty() {
            warn!("None of the configured library folders are readable");
            self.send_library(LibraryMessage::ScanFailed(
                "no readable library folders".to_string(),
            ));
            return;
        }

        let baseline: HashMap<String, i64> = restored
            .iter()
            .map(|file| (file.uri.clone(), file.file_modified_ms))
            .collect();

        let mut on_disk = Vec::new();
        for folder in &readable_folders {
            for path in media_file_discovery::collect_audio_files_from_folder(folder) {
                let uri = path.to_string_lossy().to_string();
                let file_modified_ms = metadata_tags::file_modified_ms(&path);
                on_disk.push((uri, file_modified_ms));
            }
        }
        let diff = diff_against_baseline(&baseline, &on_disk);
        info!(
            "Scan of {} folder(s): {} new, {} changed, {} vanished",
            readable_folders.len(),
            diff.new_files.len(),
            diff.modified_files.len(),
            diff.removed_files.len()
        );

        let indexed_tracks = diff.new_files.len() + diff.modified_files.len();
        let mut cover_cache = HashMap::new();
        self.send_upsert_batches(&diff.new_files, &mut cover_cache, false);
        if self.stop.load(Ordering::Relaxed) {
            info!("Stop requested, abandoning scan");
            return;
        }
        self.send_upsert_batches(&diff.modified_files, &mut cover_cache, true);

        for removed in diff.removed_files.chunks(SCAN_BATCH_SIZE) {
            self.send_scanner(ScannerMessage::RemoveTracks {
                uris: removed.to_vec(),
            });
        }

        self.send_library(LibraryMessage::ScanCompleted { indexed_tracks });
    }

    /// Read tags for the given files and ship them in bounded batches so
    /// the store commits incrementally on large libraries.
    fn send_upsert_batches(
        &self,
        uris: &[String],
        cover_cache: &mut HashMap<PathBuf, Option<String>>,
        reimport: bool,
    ) {
        let mut tracks: Vec<TrackMetadata> = Vec::with_capacity(SCAN_BATCH_SIZE);
        let mut covers: HashMap<String, String> = HashMap::new();
        for uri in uris {
            if self.stop.load(Ordering::Relaxed) {
                break;
            }
            let path = Path::new(uri);
            let Some(track) = metadata_tags::read_track_metadata(path) else {
                debug!("Skipping unreadable file {}", uri);
                continue;
            };
            if let Some(cover_uri) = self.folder_cover_for(path, cover_cache) {
                covers.insert(uri.clone(), cover_uri);
            }
            tracks.push(track);
            if tracks.len() >= SCAN_BATCH_SIZE {
                self.send_upsert_batch(std::mem::take(&mut tracks), std::mem::take(&mut covers), reimport);
            }
        }
        if !tracks.is_empty() {
            self.send_upsert_batch(tracks, covers, reimport);
        }
    }

    fn send_upsert_batch(
        &self,
        tracks: Vec<TrackMetadata>,
        covers: HashMap<String, String>,
        reimport: bool,
    ) {
        let source = self.source_name.clone();
        let message = if reimport {
            ScannerMessage::ModifyTracks {
                tracks,
                covers,
                source,
            }
        } else {
            ScannerMessage::InsertTracks {
                tracks,
                covers,
                source,
            }
        };
        self.send_scanner(message);
    }

    fn folder_cover_for(
        &self,
        path: &Path,
        cover_cache: &mut HashMap<PathBuf, Option<String>>,
    ) -> Option<String> {
        let directory = path.parent()?.to_path_buf();
        cover_cache
            .entry(directory.clone())
            .or_insert_with(|| {
                media_file_discovery::folder_cover_for_directory(&directory)
                    .map(|cover| cover.to_string_lossy().to_string())
            })
            .clone()
    }

    fn send_scanner(&self, message: ScannerMessage) {
        let _ = self.bus_producer.send(Message::Scanner(message));
    }

    fn send_library(&self, message: LibraryMessage) {
        let _ = self.bus_producer.send(Message::Library(message));
    }
}
