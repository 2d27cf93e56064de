//! Library persistence runtime component.
//!
//! Owns the `LibraryStore` and serializes every scanner command through it
//! on one thread, so all database writes happen in submission order.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use log::{error, info, warn};
use tokio::sync::broadcast::{Receiver, Sender};

use crate::error::DatabaseError;
use crate::library::store::LibraryStore;
use crate::protocol::{ConfigMessage, LibraryMessage, Message, ScannerMessage};

/// Dispatches scanner commands to the library store.
pub struct LibraryService {
    bus_consumer: Receiver<Message>,
    bus_producer: Sender<Message>,
    store: LibraryStore,
    stop: Arc<AtomicBool>,
}

impl LibraryService {
    pub fn new(
        bus_consumer: Receiver<Message>,
        bus_producer: Sender<Message>,
        store: LibraryStore,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            bus_consumer,
            bus_producer,
            store,
            stop,
        }
    }

    /// Starts the blocking event loop for library writes.
    pub fn run(&mut self) {
        loop {
            match self.bus_consumer.blocking_recv() {
                Ok(message) => match message {
                    Message::Scanner(scanner_message) => {
                        self.handle_scanner_message(scanner_message);
                    }
                    Message::Library(library_message) => {
                        self.handle_library_message(library_message);
                    }
                    Message::Config(ConfigMessage::Shutdown) => break,
                    _ => {}
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        "LibraryService lagged on control bus, skipped {} message(s)",
                        skipped
                    );
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    fn handle_scanner_message(&mut self, message: ScannerMessage) {
        let stop = Arc::clone(&self.stop);
        match message {
            ScannerMessage::InsertTracks {
                tracks,
                covers,
                source,
            } => {
                if let Err(db_error) =
                    self.store.insert_tracks(&tracks, &covers, &source, &stop)
                {
                    error!("Track insert batch failed: {}", db_error);
                    self.publish(LibraryMessage::DatabaseError);
                }
            }
            ScannerMessage::ModifyTracks {
                tracks,
                covers,
                source,
            } => {
                if let Err(db_error) =
                    self.store.modify_tracks(&tracks, &covers, &source, &stop)
                {
                    error!("Track modify batch failed: {}", db_error);
                    self.publish(LibraryMessage::DatabaseError);
                }
            }
            ScannerMessage::RemoveTracks { uris } => {
                if let Err(db_error) = self.store.remove_tracks(&uris) {
                    error!("Track removal batch failed: {}", db_error);
                    self.publish(LibraryMessage::DatabaseError);
                }
            }
            ScannerMessage::RemoveAllFromSource { source } => {
                if let Err(db_error) = self.store.remove_all_tracks_from_source(&source) {
                    error!("Purge of source {} failed: {}", source, db_error);
                    self.publish(LibraryMessage::DatabaseError);
                }
            }
            ScannerMessage::RequestRestoredTracks { source } => {
                match self.store.restored_files_from_source(&source) {
                    Ok(files) => {
                        self.publish(LibraryMessage::RestoredTracks { source, files });
                    }
                    Err(db_error) => {
                        error!("File list for source {} failed: {}", source, db_error);
                        self.publish(LibraryMessage::DatabaseError);
                    }
                }
            }
            ScannerMessage::TrackStartedPlaying { uri, played_at_ms } => {
                if let Err(db_error) = self.store.track_started_playing(&uri, played_at_ms) {
                    error!("Play statistics for {} failed: {}", uri, db_error);
                    self.publish(LibraryMessage::DatabaseError);
                }
            }
        }
    }

    fn handle_library_message(&mut self, message: LibraryMessage) {
        match message {
            LibraryMessage::RequestTracks => match self.store.all_tracks() {
                Ok(tracks) => self.publish(LibraryMessage::TracksListed(tracks)),
                Err(db_error) => self.report_read_failure("track list", db_error),
            },
            LibraryMessage::RequestAlbums => match self.store.all_albums() {
                Ok(albums) => self.publish(LibraryMessage::AlbumsListed(albums)),
                Err(db_error) => self.report_read_failure("album list", db_error),
            },
            LibraryMessage::RequestArtists => match self.store.all_artists() {
                Ok(artists) => self.publish(LibraryMessage::ArtistsListed(artists)),
                Err(db_error) => self.report_read_failure("artist list", db_error),
            },
            LibraryMessage::RequestComposers => match self.store.all_composers() {
                Ok(composers) => self.publish(LibraryMessage::ComposersListed(composers)),
                Err(db_error) => self.report_read_failure("composer list", db_error),
            },
            LibraryMessage::RequestLyricists => match self.store.all_lyricists() {
                Ok(lyricists) => self.publish(LibraryMessage::LyricistsListed(lyricists)),
                Err(db_error) => self.report_read_failure("lyricist list", db_error),
            },
            LibraryMessage::RequestGenres => match self.store.all_genres() {
                Ok(genres) => self.publish(LibraryMessage::GenresListed(genres)),
                Err(db_error) => self.report_read_failure("genre list", db_error),
            },
            LibraryMessage::RequestArtistTracks { artist } => {
                match self.store.tracks_by_artist(&artist) {
                    Ok(tracks) => {
                        self.publish(LibraryMessage::ArtistTracksListed { artist, tracks });
                    }
                    Err(db_error) => self.report_read_failure("artist track list", db_error),
                }
            }
            LibraryMessage::RequestRecentlyPlayed { limit } => {
                match self.store.recently_played_tracks(limit) {
                    Ok(tracks) => self.publish(LibraryMessage::RecentlyPlayedListed(tracks)),
                    Err(db_error) => self.report_read_failure("recently played list", db_error),
                }
            }
            LibraryMessage::RequestFrequentlyPlayed { limit } => {
                match self.store.frequently_played_tracks(limit) {
                    Ok(tracks) => self.publish(LibraryMessage::FrequentlyPlayedListed(tracks)),
                    Err(db_error) => self.report_read_failure("frequently played list", db_error),
                }
            }
            LibraryMessage::RequestTrackId {
                title,
                artist,
                album_title,
                track_number,
                disc_number,
            } => {
                match self.store.track_id_by_metadata(
                    &title,
                    &artist,
                    &album_title,
                    track_number,
                    disc_number,
                ) {
                    Ok(track_id) => self.publish(LibraryMessage::TrackIdResolved(track_id)),
                    Err(db_error) => self.report_read_failure("track id lookup", db_error),
                }
            }
            LibraryMessage::ScanCompleted { indexed_tracks } => {
                match self.store.tracks_count() {
                    Ok(total) => info!(
                        "Scan indexed {} track(s), library now holds {}",
                        indexed_tracks, total
                    ),
                    Err(db_error) => warn!("Library size lookup failed: {}", db_error),
                }
            }
            _ => {}
        }
    }

    fn report_read_failure(&self, what: &str, db_error: DatabaseError) {
        error!("Library read of {} failed: {}", what, db_error);
        self.publish(LibraryMessage::DatabaseError);
    }

    fn publish(&self, message: LibraryMessage) {
        let _ = self.bus_producer.send(Message::Library(message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::TrackMetadata;
    use std::collections::HashMap;
    use tokio::sync::broadcast;

    fn test_service() -> (LibraryService, broadcast::Receiver<Message>) {
        let (sender, receiver) = broadcast::channel(1024);
        let store = LibraryStore::open_in_memory(sender.clone()).expect("store should open");
        let service = LibraryService::new(
            sender.subscribe(),
            sender.clone(),
            store,
            Arc::new(AtomicBool::new(false)),
        );
        (service, receiver)
    }

    fn drain_events(receiver: &mut broadcast::Receiver<Message>) -> Vec<LibraryMessage> {
        let mut events = Vec::new();
        while let Ok(message) = receiver.try_recv() {
            if let Message::Library(event) = message {
                events.push(event);
            }
        }
        events
    }

    #[test]
    fn test_insert_command_lands_in_store_and_notifies() {
        let (mut service, mut receiver) = test_service();
        let track = TrackMetadata {
            title: "track1".to_string(),
            artist: "artist1".to_string(),
            album_title: "album1".to_string(),
            duration_ms: 1_000,
            resource_uri: "/music/al1/01.mp3".to_string(),
            ..TrackMetadata::default()
        };

        service.handle_scanner_message(ScannerMessage::InsertTracks {
            tracks: vec![track],
            covers: HashMap::new(),
            source: "local".to_string(),
        });

        let events = drain_events(&mut receiver);
        assert!(events
            .iter()
            .any(|event| matches!(event, LibraryMessage::TracksAdded(tracks) if tracks.len() == 1)));
    }

    #[test]
    fn test_restored_tracks_request_echoes_known_files() {
        let (mut service, mut receiver) = test_service();
        let track = TrackMetadata {
            title: "track1".to_string(),
            artist: "artist1".to_string(),
            album_title: "album1".to_string(),
            duration_ms: 1_000,
            resource_uri: "/music/al1/01.mp3".to_string(),
            file_modified_ms: 42,
            ..TrackMetadata::default()
        };
        service.handle_scanner_message(ScannerMessage::InsertTracks {
            tracks: vec![track],
            covers: HashMap::new(),
            source: "local".to_string(),
        });
        drain_events(&mut receiver);

        service.handle_scanner_message(ScannerMessage::RequestRestoredTracks {
            source: "local".to_string(),
        });

        let events = drain_events(&mut receiver);
        match events.as_slice() {
            [LibraryMessage::RestoredTracks { source, files }] => {
                assert_eq!(source, "local");
                assert_eq!(files.len(), 1);
                assert_eq!(files[0].uri, "/music/al1/01.mp3");
                assert_eq!(files[0].file_modified_ms, 42);
            }
            other => panic!("expected a single RestoredTracks event, got {:?}", other),
        }
    }

    #[test]
    fn test_album_listing_request_returns_stored_albums() {
        let (mut service, mut receiver) = test_service();
        let track = TrackMetadata {
            title: "track1".to_string(),
            artist: "artist1".to_string(),
            album_title: "album1".to_string(),
            duration_ms: 1_000,
            resource_uri: "/music/al1/01.mp3".to_string(),
            ..TrackMetadata::default()
        };
        service.handle_scanner_message(ScannerMessage::InsertTracks {
            tracks: vec![track],
            covers: HashMap::new(),
            source: "local".to_string(),
        });
        drain_events(&mut receiver);

        service.handle_library_message(LibraryMessage::RequestAlbums);

        let events = drain_events(&mut receiver);
        match events.as_slice() {
            [LibraryMessage::AlbumsListed(albums)] => {
                assert_eq!(albums.len(), 1);
                assert_eq!(albums[0].title, "album1");
                assert_eq!(albums[0].track_count, 1);
            }
            other => panic!("expected a single AlbumsListed event, got {:?}", other),
        }
    }

    #[test]
    fn test_track_id_request_resolves_by_metadata() {
        let (mut service, mut receiver) = test_service();
        let track = TrackMetadata {
            title: "track1".to_string(),
            artist: "artist1".to_string(),
            album_title: "album1".to_string(),
            track_number: 3,
            disc_number: 1,
            duration_ms: 1_000,
            resource_uri: "/music/al1/03.mp3".to_string(),
            ..TrackMetadata::default()
        };
        service.handle_scanner_message(ScannerMessage::InsertTracks {
            tracks: vec![track],
            covers: HashMap::new(),
            source: "local".to_string(),
        });
        drain_events(&mut receiver);

        service.handle_library_message(LibraryMessage::RequestTrackId {
            title: "track1".to_string(),
            artist: "artist1".to_string(),
            album_title: "album1".to_string(),
            track_number: 3,
            disc_number: 1,
        });

        let events = drain_events(&mut receiver);
        assert!(matches!(
            events.as_slice(),
            [LibraryMessage::TrackIdResolved(Some(_))]
        ));
    }

    #[test]
    fn test_unknown_source_request_returns_empty_file_list() {
        let (mut service, mut receiver) = test_service();

        service.handle_scanner_message(ScannerMessage::RequestRestoredTracks {
            source: "network".to_string(),
        });

        let events = drain_events(&mut receiver);
        assert!(matches!(
            events.as_slice(),
            [LibraryMessage::RestoredTracks { files, .. }] if files.is_empty()
        ));
    }
}
