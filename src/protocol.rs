//! Event-bus protocol shared by all runtime components.
//!
//! This module defines the message payloads exchanged between the file-system
//! indexer, the library store, and runtime configuration handlers.

use std::collections::HashMap;

use crate::config::Config;

/// Top-level envelope for all bus traffic.
#[derive(Debug, Clone)]
pub enum Message {
    Scanner(ScannerMessage),
    Library(LibraryMessage),
    Config(ConfigMessage),
}

/// Commands sent by the indexer to the library store.
#[derive(Debug, Clone)]
pub enum ScannerMessage {
    /// Freshly discovered files, with directory covers keyed by track uri.
    InsertTracks {
        tracks: Vec<TrackMetadata>,
        covers: HashMap<String, String>,
        source: String,
    },
    /// Files whose on-disk modification time moved since the last scan.
    ModifyTracks {
        tracks: Vec<TrackMetadata>,
        covers: HashMap<String, String>,
        source: String,
    },
    /// Files that vanished from disk.
    RemoveTracks { uris: Vec<String> },
    /// Forget everything indexed under one scan source.
    RemoveAllFromSource { source: String },
    /// Ask the store for the known file list of a source, so the indexer
    /// can diff the file system against it.
    RequestRestoredTracks { source: String },
    /// A file started playing. Sent by playback frontends sharing the bus
    /// with this daemon; the indexer itself never produces it.
    TrackStartedPlaying { uri: String, played_at_ms: i64 },
}

/// Notifications published by the library store, plus scan lifecycle events.
#[derive(Debug, Clone)]
pub enum LibraryMessage {
    RequestScan,
    ScanStarted,
    ScanCompleted { indexed_tracks: usize },
    ScanFailed(String),
    /// Reply to `RequestRestoredTracks`: every file uri known for the
    /// source together with its recorded modification time.
    RestoredTracks {
        source: String,
        files: Vec<RestoredFile>,
    },
    RequestTracks,
    RequestAlbums,
    RequestArtists,
    RequestComposers,
    RequestLyricists,
    RequestGenres,
    RequestArtistTracks { artist: String },
    RequestRecentlyPlayed { limit: u32 },
    RequestFrequentlyPlayed { limit: u32 },
    /// Track id lookup for callers that only hold descriptive metadata.
    RequestTrackId {
        title: String,
        artist: String,
        album_title: String,
        track_number: i32,
        disc_number: i32,
    },
    TracksListed(Vec<TrackData>),
    AlbumsListed(Vec<AlbumData>),
    ArtistsListed(Vec<ArtistData>),
    ComposersListed(Vec<ArtistData>),
    LyricistsListed(Vec<ArtistData>),
    GenresListed(Vec<GenreData>),
    ArtistTracksListed { artist: String, tracks: Vec<TrackData> },
    RecentlyPlayedListed(Vec<TrackData>),
    FrequentlyPlayedListed(Vec<TrackData>),
    TrackIdResolved(Option<u64>),
    TracksAdded(Vec<TrackData>),
    TrackModified(TrackData),
    TrackRemoved(u64),
    AlbumsAdded(Vec<AlbumData>),
    AlbumModified(AlbumData, u64),
    AlbumRemoved(u64),
    ArtistsAdded(Vec<ArtistData>),
    ArtistRemoved(u64),
    GenresAdded(Vec<GenreData>),
    ComposersAdded(Vec<ArtistData>),
    LyricistsAdded(Vec<ArtistData>),
    /// A write failed. Details are in the log, not on the bus.
    DatabaseError,
}

/// Runtime configuration traffic.
#[derive(Debug, Clone)]
pub enum ConfigMessage {
    ConfigChanged(Config),
    Shutdown,
}

/// One known file of a scan source, as recorded in the database.
#[derive(Debug, Clone)]
pub struct RestoredFile {
    pub uri: String,
    pub file_modified_ms: i64,
}

/// Metadata for one audio file as parsed from its tags, before any
/// database resolution has happened.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackMetadata {
    pub title: String,
    pub artist: String,
    pub album_title: String,
    pub album_artist: String,
    pub track_number: i32,
    pub disc_number: i32,
    pub duration_ms: i64,
    pub rating: i32,
    pub resource_uri: String,
    pub file_modified_ms: i64,
    pub genre: String,
    pub composer: String,
    pub lyricist: String,
    pub comment: String,
    pub year: i32,
    pub channels: i32,
    pub bit_rate: i32,
    pub sample_rate: i32,
    pub has_embedded_cover: bool,
}

/// A fully resolved track row as read back from the database.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackData {
    pub id: u64,
    pub title: String,
    pub artist: String,
    pub album_title: String,
    pub album_artist: String,
    pub album_path: String,
    pub album_id: u64,
    pub album_cover_uri: String,
    pub track_number: i32,
    pub disc_number: i32,
    pub duration_ms: i64,
    pub rating: i32,
    pub resource_uri: String,
    pub file_modified_ms: i64,
    pub genre: String,
    pub composer: String,
    pub lyricist: String,
    pub comment: String,
    pub year: i32,
    pub channels: i32,
    pub bit_rate: i32,
    pub sample_rate: i32,
    pub has_embedded_cover: bool,
    pub import_date_ms: i64,
    pub first_play_date_ms: Option<i64>,
    pub last_play_date_ms: Option<i64>,
    pub play_counter: i64,
}

/// An album row as read back from the database.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlbumData {
    pub id: u64,
    pub title: String,
    /// Unset while every track of the album carries only a track artist.
    pub artist: Option<String>,
    pub album_path: String,
    pub cover_uri: String,
    pub track_count: u64,
}

/// A named person row: artist, composer, or lyricist.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArtistData {
    pub id: u64,
    pub name: String,
}

/// A genre row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenreData {
    pub id: u64,
    pub name: String,
}
