//! Transactional write/read engine for the music library.
//!
//! All writes run inside explicit transactions. Batch operations tolerate
//! per-row failures, report them on the bus, and keep going; transaction
//! control failures abort the whole batch.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::broadcast;

use crate::error::DatabaseError;
use crate::library::changes::{ChangeTracker, IdSet};
use crate::library::queries;
use crate::library::schema;
use crate::protocol::{
    AlbumData, ArtistData, GenreData, LibraryMessage, Message, RestoredFile, TrackData,
    TrackMetadata,
};

/// How the caller discovered the file being upserted.
#[derive(Debug, Clone, Copy, PartialEq)]
enum InsertType {
    NewFile,
    ModifiedFile,
}

/// Named side tables that resolve free-text tag values to rows.
#[derive(Debug, Clone, Copy, PartialEq)]
enum EntityKind {
    Artist,
    Composer,
    Lyricist,
    Genre,
}

impl EntityKind {
    fn label(self) -> &'static str {
        match self {
            EntityKind::Artist => "artist",
            EntityKind::Composer => "composer",
            EntityKind::Lyricist => "lyricist",
            EntityKind::Genre => "genre",
        }
    }

    fn select_sql(self) -> &'static str {
        match self {
            EntityKind::Artist => queries::SELECT_ARTIST_BY_NAME,
            EntityKind::Composer => queries::SELECT_COMPOSER_BY_NAME,
            EntityKind::Lyricist => queries::SELECT_LYRICIST_BY_NAME,
            EntityKind::Genre => queries::SELECT_GENRE_BY_NAME,
        }
    }

    fn insert_sql(self) -> &'static str {
        match self {
            EntityKind::Artist => queries::INSERT_ARTIST,
            EntityKind::Composer => queries::INSERT_COMPOSER,
            EntityKind::Lyricist => queries::INSERT_LYRICIST,
            EntityKind::Genre => queries::INSERT_GENRE,
        }
    }
}

/// In-memory id counters, seeded once from the row maxima at startup.
/// The store is the only writer, so the counters never go stale.
#[derive(Debug, Default)]
struct IdAllocator {
    tracks: u64,
    albums: u64,
    artists: u64,
    composers: u64,
    lyricists: u64,
    genres: u64,
    sources: u64,
}

impl IdAllocator {
    fn seed(connection: &Connection) -> Result<Self, DatabaseError> {
        let next = |sql: &str| -> Result<u64, DatabaseError> {
            let max: Option<u64> = connection
                .query_row(sql, [], |row| row.get(0))
                .map_err(|source| DatabaseError::QueryExecution {
                    context: "id counter seed",
                    source,
                })?;
            Ok(max.unwrap_or(0) + 1)
        };
        Ok(IdAllocator {
            tracks: next(queries::SELECT_MAX_TRACK_ID)?,
            albums: next(queries::SELECT_MAX_ALBUM_ID)?,
            artists: next(queries::SELECT_MAX_ARTIST_ID)?,
            composers: next(queries::SELECT_MAX_COMPOSER_ID)?,
            lyricists: next(queries::SELECT_MAX_LYRICIST_ID)?,
            genres: next(queries::SELECT_MAX_GENRE_ID)?,
            sources: next(queries::SELECT_MAX_SOURCE_ID)?,
        })
    }

    fn entity_counter(&mut self, kind: EntityKind) -> &mut u64 {
        match kind {
            EntityKind::Artist => &mut self.artists,
            EntityKind::Composer => &mut self.composers,
            EntityKind::Lyricist => &mut self.lyricists,
            EntityKind::Genre => &mut self.genres,
        }
    }
}

/// The tag fields whose equality makes a re-imported file a no-op.
/// Modification time and embedded-cover presence deliberately stay out.
#[derive(Debug, PartialEq)]
struct TrackFingerprint {
    title: String,
    artist: String,
    album_title: String,
    album_artist: String,
    track_number: i32,
    disc_number: i32,
    duration_ms: i64,
    rating: i32,
    resource_uri: String,
    genre: String,
    composer: String,
    lyricist: String,
    comment: String,
    year: i32,
    channels: i32,
    bit_rate: i32,
    sample_rate: i32,
}

impl From<&TrackMetadata> for TrackFingerprint {
    fn from(track: &TrackMetadata) -> Self {
        TrackFingerprint {
            title: track.title.clone(),
            artist: track.artist.clone(),
            album_title: track.album_title.clone(),
            album_artist: track.album_artist.clone(),
            track_number: track.track_number,
            disc_number: track.disc_number,
            duration_ms: track.duration_ms,
            rating: track.rating,
            resource_uri: track.resource_uri.clone(),
            genre: track.genre.clone(),
            composer: track.composer.clone(),
            lyricist: track.lyricist.clone(),
            comment: track.comment.clone(),
            year: track.year,
            channels: track.channels,
            bit_rate: track.bit_rate,
            sample_rate: track.sample_rate,
        }
    }
}

impl From<&TrackData> for TrackFingerprint {
    fn from(track: &TrackData) -> Self {
        TrackFingerprint {
            title: track.title.clone(),
            artist: track.artist.clone(),
            album_title: track.album_title.clone(),
            album_artist: track.album_artist.clone(),
            track_number: track.track_number,
            disc_number: track.disc_number,
            duration_ms: track.duration_ms,
            rating: track.rating,
            resource_uri: track.resource_uri.clone(),
            genre: track.genre.clone(),
            composer: track.composer.clone(),
            lyricist: track.lyricist.clone(),
            comment: track.comment.clone(),
            year: track.year,
            channels: track.channels,
            bit_rate: track.bit_rate,
            sample_rate: track.sample_rate,
        }
    }
}

/// Directory portion of a track uri, with scheme, authority, query, and
/// fragment stripped. This is the album grouping key.
pub fn album_path_from_uri(uri: &str) -> String {
    let without_fragment = uri.split('#').next().unwrap_or(uri);
    let without_query = without_fragment.split('?').next().unwrap_or(without_fragment);
    let path = match without_query.find("://") {
        Some(scheme_end) => {
            let rest = &without_query[scheme_end + 3..];
            match rest.find('/') {
                Some(slash) => &rest[slash..],
                None => "",
            }
        }
        None => without_query,
    };
    match path.rfind('/') {
        Some(0) => "/".to_string(),
        Some(last_slash) => path[..last_slash].to_string(),
        None => String::new(),
    }
}

fn is_unique_violation(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: rusqlite::ffi::ErrorCode::ConstraintViolation,
                ..
            },
            _,
        )
    )
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}

fn bind_optional(value: &str) -> Option<&str> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Owns the SQLite connection and every library mutation.
pub struct LibraryStore {
    connection: Connection,
    ids: IdAllocator,
    changes: ChangeTracker,
    notifications: broadcast::Sender<Message>,
}

impl LibraryStore {
    pub fn open(
        database_path: &Path,
        notifications: broadcast::Sender<Message>,
    ) -> Result<Self, DatabaseError> {
        if let Some(parent) = database_path.parent() {
            if let Err(error) = std::fs::create_dir_all(parent) {
                warn!(
                    "Could not create database directory {}: {}",
                    parent.display(),
                    error
                );
            }
        }
        let connection =
            Connection::open(database_path).map_err(|source| DatabaseError::Schema {
                context: "database open",
                source,
            })?;
        Self::from_connection(connection, notifications)
    }

    pub fn open_in_memory(
        notifications: broadcast::Sender<Message>,
    ) -> Result<Self, DatabaseError> {
        let connection = Connection::open_in_memory().map_err(|source| DatabaseError::Schema {
            context: "database open",
            source,
        })?;
        Self::from_connection(connection, notifications)
    }

    fn from_connection(
        connection: Connection,
        notifications: broadcast::Sender<Message>,
    ) -> Result<Self, DatabaseError> {
        schema::ensure_schema(&connection)?;
        let ids = IdAllocator::seed(&connection)?;
        Ok(LibraryStore {
            connection,
            ids,
            changes: ChangeTracker::default(),
            notifications,
        })
    }

    // Batch write operations.

    /// Upsert a batch of discovered files inside one transaction.
    ///
    /// Per-track failures are reported on the bus and skipped. When the
    /// stop flag is raised between tracks, the work done so far commits.
    pub fn insert_tracks(
        &mut self,
        tracks: &[TrackMetadata],
        covers: &HashMap<String, String>,
        source: &str,
        stop: &AtomicBool,
    ) -> Result<(), DatabaseError> {
        self.begin("track insert batch")?;
        self.changes.reset();
        let source_id = match self.resolve_source(source) {
            Ok(id) => id,
            Err(error) => {
                let _ = self.rollback();
                return Err(error);
            }
        };
        for track in tracks {
            if stop.load(Ordering::Relaxed) {
                info!("Stop requested, committing partial track insert batch");
                break;
            }
            if let Err(error) = self.upsert_discovered_file(track, covers, source_id) {
                warn!(
                    "Track {} could not be stored: {}",
                    track.resource_uri, error
                );
                self.publish(LibraryMessage::DatabaseError);
            }
        }
        self.commit_or_rollback("track insert batch")?;
        self.publish_changes();
        Ok(())
    }

    /// Re-import a batch of files whose content changed on disk.
    pub fn modify_tracks(
        &mut self,
        tracks: &[TrackMetadata],
        covers: &HashMap<String, String>,
        source: &str,
        stop: &AtomicBool,
    ) -> Result<(), DatabaseError> {
        self.begin("track modify batch")?;
        self.changes.reset();
        let source_id = match self.resolve_source(source) {
            Ok(id) => id,
            Err(error) => {
                let _ = self.rollback();
                return Err(error);
            }
        };
        for track in tracks {
            if stop.load(Ordering::Relaxed) {
                info!("Stop requested, committing partial track modify batch");
                break;
            }
            if let Err(error) = self.upsert_modified_file(track, covers, source_id) {
                warn!(
                    "Track {} could not be re-imported: {}",
                    track.resource_uri, error
                );
                self.publish(LibraryMessage::DatabaseError);
            }
        }
        self.commit_or_rollback("track modify batch")?;
        self.publish_changes();
        Ok(())
    }

    /// Drop the mappings of vanished files and sweep every track, album,
    /// and artist that no remaining file references.
    pub fn remove_tracks(&mut self, uris: &[String]) -> Result<(), DatabaseError> {
        self.begin("track removal batch")?;
        self.changes.reset();
        for uri in uris {
            if let Err(error) = self.remove_file_mapping(uri) {
                warn!("Mapping for {} could not be removed: {}", uri, error);
                self.publish(LibraryMessage::DatabaseError);
            }
        }
        if let Err(error) = self.remove_orphaned_tracks() {
            let _ = self.rollback();
            return Err(error);
        }
        self.commit_or_rollback("track removal batch")?;
        self.publish_changes();
        Ok(())
    }

    /// Forget every file of one scan source, then sweep. Unknown sources
    /// are a no-op.
    pub fn remove_all_tracks_from_source(&mut self, source: &str) -> Result<(), DatabaseError> {
        self.begin("source purge")?;
        self.changes.reset();
        if let Err(error) = self.purge_source_rows(source) {
            let _ = self.rollback();
            return Err(error);
        }
        self.commit_or_rollback("source purge")?;
        self.publish_changes();
        Ok(())
    }

    /// Bump play statistics for the track mapped to `uri`. First play date
    /// is only set once; unknown files are ignored.
    pub fn track_started_playing(
        &mut self,
        uri: &str,
        played_at_ms: i64,
    ) -> Result<(), DatabaseError> {
        let Some(track_id) = self.track_id_by_file_name(uri)? else {
            debug!("Play statistics skipped for unknown file {}", uri);
            return Ok(());
        };
        self.begin("play statistics")?;
        let updates = self
            .execute(
                queries::UPDATE_TRACK_FIRST_PLAY_DATE,
                params![track_id, played_at_ms],
                "first play date update",
            )
            .and_then(|_| {
                self.execute(
                    queries::UPDATE_TRACK_PLAY_STATISTICS,
                    params![track_id, played_at_ms],
                    "play statistics update",
                )
            });
        if let Err(error) = updates {
            let _ = self.rollback();
            return Err(error);
        }
        self.commit_or_rollback("play statistics")
    }

    // Read operations.

    /// All files recorded under one source, for diffing against the disk.
    pub fn restored_files_from_source(
        &self,
        source: &str,
    ) -> Result<Vec<RestoredFile>, DatabaseError> {
        let Some(source_id) =
            self.query_optional_id(queries::SELECT_SOURCE_BY_NAME, params![source], "source lookup")?
        else {
            return Ok(Vec::new());
        };
        self.files_from_source(source_id)
    }

    pub fn track_by_id(&self, track_id: u64) -> Result<Option<TrackData>, DatabaseError> {
        let mut statement = self.prepare(queries::SELECT_TRACK_BY_ID, "track lookup")?;
        statement
            .query_row(params![track_id], track_from_row)
            .optional()
            .map_err(|source| DatabaseError::QueryExecution {
                context: "track lookup",
                source,
            })
    }

    pub fn all_tracks(&self) -> Result<Vec<TrackData>, DatabaseError> {
        self.query_tracks(queries::SELECT_ALL_TRACKS, params![], "track list")
    }

    pub fn tracks_by_artist(&self, artist: &str) -> Result<Vec<TrackData>, DatabaseError> {
        self.query_tracks(
            queries::SELECT_TRACKS_BY_ARTIST,
            params![artist],
            "tracks by artist",
        )
    }

    pub fn recently_played_tracks(&self, limit: u32) -> Result<Vec<TrackData>, DatabaseError> {
        self.query_tracks(
            queries::SELECT_RECENTLY_PLAYED_TRACKS,
            params![limit],
            "recently played tracks",
        )
    }

    pub fn frequently_played_tracks(&self, limit: u32) -> Result<Vec<TrackData>, DatabaseError> {
        self.query_tracks(
            queries::SELECT_FREQUENTLY_PLAYED_TRACKS,
            params![limit],
            "frequently played tracks",
        )
    }

    pub fn album_by_id(&self, album_id: u64) -> Result<Option<AlbumData>, DatabaseError> {
        let mut statement = self.prepare(queries::SELECT_ALBUM_BY_ID, "album lookup")?;
        statement
            .query_row(params![album_id], album_from_row)
            .optional()
            .map_err(|source| DatabaseError::QueryExecution {
                context: "album lookup",
                source,
            })
    }

    pub fn all_albums(&self) -> Result<Vec<AlbumData>, DatabaseError> {
        let mut statement = self.prepare(queries::SELECT_ALL_ALBUMS, "album list")?;
        let rows = statement
            .query_map(params![], album_from_row)
            .map_err(|source| DatabaseError::QueryExecution {
                context: "album list",
                source,
            })?;
        collect_rows(rows, "album list")
    }

    pub fn all_artists(&self) -> Result<Vec<ArtistData>, DatabaseError> {
        let mut statement = self.prepare(queries::SELECT_ALL_ARTISTS, "artist list")?;
        let rows = statement
            .query_map(params![], |row| {
                Ok(ArtistData {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })
            .map_err(|source| DatabaseError::QueryExecution {
                context: "artist list",
                source,
            })?;
        collect_rows(rows, "artist list")
    }

    pub fn all_composers(&self) -> Result<Vec<ArtistData>, DatabaseError> {
        let mut statement = self.prepare(queries::SELECT_ALL_COMPOSERS, "composer list")?;
        let rows = statement
            .query_map(params![], |row| {
                Ok(ArtistData {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })
            .map_err(|source| DatabaseError::QueryExecution {
                context: "composer list",
                source,
            })?;
        collect_rows(rows, "composer list")
    }

    pub fn all_lyricists(&self) -> Result<Vec<ArtistData>, DatabaseError> {
        let mut statement = self.prepare(queries::SELECT_ALL_LYRICISTS, "lyricist list")?;
        let rows = statement
            .query_map(params![], |row| {
                Ok(ArtistData {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })
            .map_err(|source| DatabaseError::QueryExecution {
                context: "lyricist list",
                source,
            })?;
        collect_rows(rows, "lyricist list")
    }

    pub fn all_genres(&self) -> Result<Vec<GenreData>, DatabaseError> {
        let mut statement = self.prepare(queries::SELECT_ALL_GENRES, "genre list")?;
        let rows = statement
            .query_map(params![], |row| {
                Ok(GenreData {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })
            .map_err(|source| DatabaseError::QueryExecution {
                context: "genre list",
                source,
            })?;
        collect_rows(rows, "genre list")
    }

    /// Track id mapped to a file uri, if the file is known and linked.
    pub fn track_id_by_file_name(&self, uri: &str) -> Result<Option<u64>, DatabaseError> {
        let mut statement =
            self.prepare(queries::SELECT_MAPPING_BY_FILE_NAME, "mapping lookup")?;
        let mapped: Option<Option<u64>> = statement
            .query_row(params![uri], |row| row.get(0))
            .optional()
            .map_err(|source| DatabaseError::QueryExecution {
                context: "mapping lookup",
                source,
            })?;
        Ok(mapped.flatten())
    }

    /// Track id lookup by descriptive metadata, for callers that lost the
    /// file uri.
    pub fn track_id_by_metadata(
        &self,
        title: &str,
        artist: &str,
        album_title: &str,
        track_number: i32,
        disc_number: i32,
    ) -> Result<Option<u64>, DatabaseError> {
        self.query_optional_id(
            queries::SELECT_TRACK_ID_BY_TITLE_ALBUM_TRACK_DISC,
            params![title, artist, album_title, track_number, disc_number],
            "track id by metadata",
        )
    }

    pub fn tracks_count(&self) -> Result<u64, DatabaseError> {
        self.connection
            .query_row(queries::SELECT_TRACKS_COUNT, [], |row| row.get(0))
            .map_err(|source| DatabaseError::QueryExecution {
                context: "track count",
                source,
            })
    }

    // Transaction control.

    fn begin(&self, context: &'static str) -> Result<(), DatabaseError> {
        self.connection
            .execute_batch("BEGIN TRANSACTION")
            .map_err(|source| DatabaseError::Transaction { context, source })
    }

    fn commit(&self, context: &'static str) -> Result<(), DatabaseError> {
        self.connection
            .execute_batch("COMMIT")
            .map_err(|source| DatabaseError::Transaction { context, source })
    }

    /// Commit, falling back to rollback so a failed commit never leaves
    /// the connection inside a stale transaction.
    fn commit_or_rollback(&self, context: &'static str) -> Result<(), DatabaseError> {
        if let Err(error) = self.commit(context) {
            let _ = self.rollback();
            return Err(error);
        }
        Ok(())
    }

    fn rollback(&self) -> Result<(), DatabaseError> {
        self.connection
            .execute_batch("ROLLBACK")
            .map_err(|source| DatabaseError::Transaction {
                context: "rollback",
                source,
            })
    }

    // Upsert internals.

    /// One file reported by a fresh scan. New files gain an unlinked
    /// mapping first; known linked files refresh their mapping and flow
    /// through the modify path.
    fn upsert_discovered_file(
        &mut self,
        track: &TrackMetadata,
        covers: &HashMap<String, String>,
        source_id: u64,
    ) -> Result<u64, DatabaseError> {
        let insert_type = match self.mapping_by_file_name(&track.resource_uri)? {
            None => {
                self.insert_file_mapping(&track.resource_uri, track.file_modified_ms, source_id)?;
                InsertType::NewFile
            }
            Some(Some(track_id)) => {
                self.update_file_mapping(track_id, &track.resource_uri, track.file_modified_ms)?;
                InsertType::ModifiedFile
            }
            // Known file that never linked to a track: another batch in
            // this scan owns it.
            Some(None) => return Ok(0),
        };
        self.store_track(track, covers, insert_type)
    }

    /// One file whose modification time moved. Files without a mapping are
    /// treated as fresh inserts.
    fn upsert_modified_file(
        &mut self,
        track: &TrackMetadata,
        covers: &HashMap<String, String>,
        source_id: u64,
    ) -> Result<u64, DatabaseError> {
        let insert_type = match self.mapping_by_file_name(&track.resource_uri)? {
            None => {
                self.insert_file_mapping(&track.resource_uri, track.file_modified_ms, source_id)?;
                InsertType::NewFile
            }
            Some(Some(track_id)) => {
                self.update_file_mapping(track_id, &track.resource_uri, track.file_modified_ms)?;
                InsertType::ModifiedFile
            }
            Some(None) => InsertType::NewFile,
        };
        self.store_track(track, covers, insert_type)
    }

    /// Core upsert: resolve the album, detect duplicates, then either
    /// reconcile an existing track row or insert a new one.
    fn store_track(
        &mut self,
        track: &TrackMetadata,
        covers: &HashMap<String, String>,
        insert_type: InsertType,
    ) -> Result<u64, DatabaseError> {
        if track.title.trim().is_empty() {
            debug!("Skipping untitled file {}", track.resource_uri);
            return Ok(0);
        }
        let album_path = album_path_from_uri(&track.resource_uri);
        let cover = covers
            .get(&track.resource_uri)
            .map(String::as_str)
            .unwrap_or("");
        let album_id = self.resolve_album(
            &track.album_title,
            &track.album_artist,
            &track.artist,
            &album_path,
            cover,
        )?;

        let duplicate_id = self.query_optional_id(
            queries::SELECT_DUPLICATE_TRACK_ID,
            params![
                track.title,
                track.artist,
                track.album_title,
                track.album_artist,
                album_path,
                track.track_number,
                track.disc_number
            ],
            "duplicate track lookup",
        )?;

        if duplicate_id.is_some() || insert_type == InsertType::ModifiedFile {
            let origin_id = match duplicate_id {
                Some(id) => id,
                None => self.track_id_by_file_name(&track.resource_uri)?.unwrap_or(0),
            };
            if origin_id != 0 {
                if let Some(old) = self.track_by_id(origin_id)? {
                    return self.reconcile_existing_track(
                        origin_id,
                        &old,
                        track,
                        album_id,
                        cover,
                    );
                }
            }
            // The origin row is gone; fall through and insert fresh.
        }

        self.insert_new_track(track, album_id, cover)
    }

    /// A row already exists for this track. Either nothing but the file
    /// timestamp moved, or the tags changed and the row is rewritten in
    /// place so the track keeps its id.
    fn reconcile_existing_track(
        &mut self,
        origin_id: u64,
        old: &TrackData,
        track: &TrackMetadata,
        album_id: u64,
        cover: &str,
    ) -> Result<u64, DatabaseError> {
        if TrackFingerprint::from(old) == TrackFingerprint::from(track) {
            self.update_file_mapping(origin_id, &track.resource_uri, track.file_modified_ms)?;
            return Ok(origin_id);
        }

        let old_album_id = self
            .query_optional_id(
                queries::SELECT_ALBUM_ID_FOR_TRACK_TUPLE,
                params![old.album_title, old.album_artist, old.album_path],
                "previous album lookup",
            )?
            .unwrap_or(0);

        self.update_track_row(origin_id, track, album_id)?;
        self.update_file_mapping(origin_id, &track.resource_uri, track.file_modified_ms)?;
        let album_changed = self.update_album_from_track(album_id, cover, track)?;
        self.changes.record_modified_track(origin_id);
        if album_id != 0 {
            if album_changed {
                self.mark_album_tracks_modified(album_id, origin_id)?;
            }
            self.changes.record_modified_album(album_id);
        }
        if old_album_id != 0 && old_album_id != album_id {
            if self.album_track_count(old_album_id)? == 0 {
                self.execute(queries::DELETE_ALBUM, params![old_album_id], "album removal")?;
                self.changes.record_removed_album(old_album_id);
            } else {
                self.changes.record_modified_album(old_album_id);
            }
        }
        Ok(origin_id)
    }

    fn insert_new_track(
        &mut self,
        track: &TrackMetadata,
        album_id: u64,
        cover: &str,
    ) -> Result<u64, DatabaseError> {
        if !track.artist.is_empty() {
            self.resolve_entity(EntityKind::Artist, &track.artist)?;
        }
        if !track.genre.is_empty() {
            self.resolve_entity(EntityKind::Genre, &track.genre)?;
        }
        if !track.composer.is_empty() {
            self.resolve_entity(EntityKind::Composer, &track.composer)?;
        }
        if !track.lyricist.is_empty() {
            self.resolve_entity(EntityKind::Lyricist, &track.lyricist)?;
        }

        // The album tuple columns come from the album row, not the raw
        // tags, so foreign keys stay consistent when the two disagree.
        let album = if album_id != 0 {
            self.album_by_id(album_id)?
        } else {
            None
        };
        let (album_title, album_artist, album_path) = match &album {
            Some(album) => (
                Some(album.title.as_str()),
                album.artist.as_deref(),
                Some(album.album_path.as_str()),
            ),
            None => (None, None, None),
        };

        let id = self.ids.tracks;
        let inserted = {
            let mut statement =
                self.prepare(queries::INSERT_TRACK, "track insert")?;
            statement.execute(params![
                id,
                track.title,
                bind_optional(&track.artist),
                album_title,
                album_artist,
                album_path,
                track.track_number,
                track.disc_number,
                track.duration_ms,
                track.rating,
                bind_optional(&track.genre),
                bind_optional(&track.composer),
                bind_optional(&track.lyricist),
                track.comment,
                track.year,
                track.channels,
                track.bit_rate,
                track.sample_rate,
                track.has_embedded_cover,
                now_ms(),
            ])
        };
        match inserted {
            Ok(_) => {}
            Err(error) if is_unique_violation(&error) => {
                // An identical tuple landed first; adopt that row.
                let existing = self.query_optional_id(
                    queries::SELECT_DUPLICATE_TRACK_ID,
                    params![
                        track.title,
                        track.artist,
                        track.album_title,
                        track.album_artist,
                        album_path_from_uri(&track.resource_uri),
                        track.track_number,
                        track.disc_number
                    ],
                    "duplicate track lookup",
                )?;
                return match existing {
                    Some(existing_id) => {
                        self.update_file_mapping(
                            existing_id,
                            &track.resource_uri,
                            track.file_modified_ms,
                        )?;
                        Ok(existing_id)
                    }
                    None => Err(DatabaseError::DuplicateEntity { kind: "track" }),
                };
            }
            Err(source) => {
                return Err(DatabaseError::QueryExecution {
                    context: "track insert",
                    source,
                })
            }
        }
        self.ids.tracks += 1;

        self.update_file_mapping(id, &track.resource_uri, track.file_modified_ms)?;
        self.changes.record_inserted_track(id);
        if album_id != 0 {
            if self.update_album_from_track(album_id, cover, track)? {
                self.mark_album_tracks_modified(album_id, id)?;
            }
            self.changes.record_modified_album(album_id);
        }
        Ok(id)
    }

    fn update_track_row(
        &mut self,
        track_id: u64,
        track: &TrackMetadata,
        album_id: u64,
    ) -> Result<(), DatabaseError> {
        if !track.artist.is_empty() {
            self.resolve_entity(EntityKind::Artist, &track.artist)?;
        }
        if !track.genre.is_empty() {
            self.resolve_entity(EntityKind::Genre, &track.genre)?;
        }
        if !track.composer.is_empty() {
            self.resolve_entity(EntityKind::Composer, &track.composer)?;
        }
        if !track.lyricist.is_empty() {
            self.resolve_entity(EntityKind::Lyricist, &track.lyricist)?;
        }
        let album = if album_id != 0 {
            self.album_by_id(album_id)?
        } else {
            None
        };
        let (album_title, album_artist, album_path) = match &album {
            Some(album) => (
                Some(album.title.as_str()),
                album.artist.as_deref(),
                Some(album.album_path.as_str()),
            ),
            None => (None, None, None),
        };
        self.execute(
            queries::UPDATE_TRACK,
            params![
                track_id,
                track.title,
                bind_optional(&track.artist),
                album_title,
                album_artist,
                album_path,
                track.track_number,
                track.disc_number,
                track.duration_ms,
                track.rating,
                bind_optional(&track.genre),
                bind_optional(&track.composer),
                bind_optional(&track.lyricist),
                track.comment,
                track.year,
                track.channels,
                track.bit_rate,
                track.sample_rate,
                track.has_embedded_cover,
            ],
            "track update",
        )?;
        Ok(())
    }

    fn mark_album_tracks_modified(
        &mut self,
        album_id: u64,
        except_track_id: u64,
    ) -> Result<(), DatabaseError> {
        for track_id in self.track_ids_in_album(album_id)? {
            if track_id != except_track_id {
                self.changes.record_modified_track(track_id);
            }
        }
        Ok(())
    }

    // Album resolution.

    /// Find or create the album a track belongs to. Resolution prefers an
    /// exact artist match, then an artist-less album in the same folder,
    /// and only then creates a row.
    fn resolve_album(
        &mut self,
        title: &str,
        album_artist: &str,
        track_artist: &str,
        album_path: &str,
        cover: &str,
    ) -> Result<u64, DatabaseError> {
        if title.trim().is_empty() {
            return Ok(0);
        }
        let preferred_artist = if !album_artist.is_empty() {
            album_artist
        } else {
            track_artist
        };
        if !preferred_artist.is_empty() {
            if let Some(id) = self.query_optional_id(
                queries::SELECT_ALBUM_ID_BY_TITLE_ARTIST_PATH,
                params![title, preferred_artist, album_path],
                "album lookup",
            )? {
                return Ok(id);
            }
        }
        if let Some(id) = self.query_optional_id(
            queries::SELECT_ALBUM_ID_BY_TITLE_PATH_WITHOUT_ARTIST,
            params![title, album_path],
            "artist-less album lookup",
        )? {
            return Ok(id);
        }

        // Only a real album-artist tag names the new album's artist. A
        // plain track artist stays off the row until every track agrees.
        let artist = bind_optional(album_artist);
        if let Some(artist) = artist {
            self.resolve_entity(EntityKind::Artist, artist)?;
        }
        let id = self.ids.albums;
        let inserted = {
            let mut statement = self.prepare(queries::INSERT_ALBUM, "album insert")?;
            statement.execute(params![id, title, artist, album_path, cover])
        };
        match inserted {
            Ok(_) => {
                self.ids.albums += 1;
                self.changes.record_inserted_album(id);
                Ok(id)
            }
            Err(error) if is_unique_violation(&error) => {
                let existing = match artist {
                    Some(artist) => self.query_optional_id(
                        queries::SELECT_ALBUM_ID_BY_TITLE_ARTIST_PATH,
                        params![title, artist, album_path],
                        "album lookup",
                    )?,
                    None => self.query_optional_id(
                        queries::SELECT_ALBUM_ID_BY_TITLE_PATH_WITHOUT_ARTIST,
                        params![title, album_path],
                        "artist-less album lookup",
                    )?,
                };
                existing.ok_or(DatabaseError::DuplicateEntity { kind: "album" })
            }
            Err(source) => Err(DatabaseError::QueryExecution {
                context: "album insert",
                source,
            }),
        }
    }

    /// Fold one track's cover and album-artist knowledge into its album.
    /// Returns true when the album row changed.
    fn update_album_from_track(
        &mut self,
        album_id: u64,
        cover: &str,
        track: &TrackMetadata,
    ) -> Result<bool, DatabaseError> {
        if album_id == 0 {
            return Ok(false);
        }
        let Some(album) = self.album_by_id(album_id)? else {
            return Ok(false);
        };
        let mut changed = false;
        if !cover.is_empty() && album.cover_uri != cover {
            self.execute(
                queries::UPDATE_ALBUM_COVER,
                params![album_id, cover],
                "album cover update",
            )?;
            changed = true;
        }
        if album.artist.is_none() && !track.album_artist.trim().is_empty() {
            self.resolve_entity(EntityKind::Artist, &track.album_artist)?;
            self.execute(
                queries::UPDATE_ALBUM_ARTIST,
                params![album_id, track.album_artist],
                "album artist update",
            )?;
            self.execute(
                queries::UPDATE_TRACKS_ALBUM_ARTIST,
                params![album.title, album.album_path, track.album_artist],
                "album artist propagation",
            )?;
            changed = true;
        }
        Ok(changed)
    }

    fn album_track_count(&self, album_id: u64) -> Result<u64, DatabaseError> {
        self.connection
            .query_row(queries::COUNT_TRACKS_IN_ALBUM, params![album_id], |row| {
                row.get(0)
            })
            .map_err(|source| DatabaseError::QueryExecution {
                context: "album track count",
                source,
            })
    }

    fn track_ids_in_album(&self, album_id: u64) -> Result<Vec<u64>, DatabaseError> {
        let mut statement =
            self.prepare(queries::SELECT_TRACK_IDS_IN_ALBUM, "album track ids")?;
        let rows = statement
            .query_map(params![album_id], |row| row.get::<_, u64>(0))
            .map_err(|source| DatabaseError::QueryExecution {
                context: "album track ids",
                source,
            })?;
        collect_rows(rows, "album track ids")
    }

    // File mappings.

    /// Mapping row for a file uri: `None` for unknown files, `Some(None)`
    /// for known files not yet linked to a track.
    fn mapping_by_file_name(&self, uri: &str) -> Result<Option<Option<u64>>, DatabaseError> {
        let mut statement =
            self.prepare(queries::SELECT_MAPPING_BY_FILE_NAME, "mapping lookup")?;
        statement
            .query_row(params![uri], |row| row.get(0))
            .optional()
            .map_err(|source| DatabaseError::QueryExecution {
                context: "mapping lookup",
                source,
            })
    }

    fn insert_file_mapping(
        &mut self,
        uri: &str,
        file_modified_ms: i64,
        source_id: u64,
    ) -> Result<(), DatabaseError> {
        self.execute(
            queries::INSERT_MAPPING,
            params![uri, source_id, 1i64, file_modified_ms],
            "mapping insert",
        )?;
        Ok(())
    }

    /// Link a file to a track and refresh its modification time. The first
    /// file of a track takes priority 1; further copies queue up behind it.
    fn update_file_mapping(
        &mut self,
        track_id: u64,
        uri: &str,
        file_modified_ms: i64,
    ) -> Result<(), DatabaseError> {
        let priority = self.compute_mapping_priority(track_id, uri)?;
        self.execute(
            queries::UPDATE_MAPPING,
            params![uri, track_id, priority, file_modified_ms],
            "mapping update",
        )?;
        Ok(())
    }

    fn compute_mapping_priority(&self, track_id: u64, uri: &str) -> Result<i64, DatabaseError> {
        let existing: Option<i64> = {
            let mut statement =
                self.prepare(queries::SELECT_MAPPING_PRIORITY, "mapping priority lookup")?;
            statement
                .query_row(params![track_id, uri], |row| row.get(0))
                .optional()
                .map_err(|source| DatabaseError::QueryExecution {
                    context: "mapping priority lookup",
                    source,
                })?
        };
        if let Some(priority) = existing {
            return Ok(priority);
        }
        let mappings = self.mappings_by_track_id(track_id)?;
        Ok(mappings
            .last()
            .map(|(_, priority, _)| priority + 1)
            .unwrap_or(1))
    }

    fn mappings_by_track_id(
        &self,
        track_id: u64,
    ) -> Result<Vec<(String, i64, i64)>, DatabaseError> {
        let mut statement =
            self.prepare(queries::SELECT_MAPPINGS_BY_TRACK_ID, "track mappings")?;
        let rows = statement
            .query_map(params![track_id], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })
            .map_err(|source| DatabaseError::QueryExecution {
                context: "track mappings",
                source,
            })?;
        collect_rows(rows, "track mappings")
    }

    /// Delete one mapping and close the priority gap it leaves so the
    /// track's remaining files renumber from 1.
    fn remove_file_mapping(&mut self, uri: &str) -> Result<(), DatabaseError> {
        let mapped_track = self.mapping_by_file_name(uri)?.flatten();
        self.execute(queries::DELETE_MAPPING, params![uri], "mapping removal")?;
        if let Some(track_id) = mapped_track {
            let mappings = self.mappings_by_track_id(track_id)?;
            for (index, (file_name, priority, file_modified_ms)) in mappings.iter().enumerate() {
                let wanted = index as i64 + 1;
                if *priority != wanted {
                    self.execute(
                        queries::UPDATE_MAPPING,
                        params![file_name, track_id, wanted, file_modified_ms],
                        "mapping renumber",
                    )?;
                }
            }
        }
        Ok(())
    }

    fn files_from_source(&self, source_id: u64) -> Result<Vec<RestoredFile>, DatabaseError> {
        let mut statement =
            self.prepare(queries::SELECT_FILES_FROM_SOURCE, "source file list")?;
        let rows = statement
            .query_map(params![source_id], |row| {
                Ok(RestoredFile {
                    uri: row.get(0)?,
                    file_modified_ms: row.get(1)?,
                })
            })
            .map_err(|source| DatabaseError::QueryExecution {
                context: "source file list",
                source,
            })?;
        collect_rows(rows, "source file list")
    }

    fn purge_source_rows(&mut self, source: &str) -> Result<(), DatabaseError> {
        let Some(source_id) = self.query_optional_id(
            queries::SELECT_SOURCE_BY_NAME,
            params![source],
            "source lookup",
        )?
        else {
            debug!("Source {} is unknown, nothing to purge", source);
            return Ok(());
        };
        let files = self.files_from_source(source_id)?;
        for file in &files {
            // Going through the single-file removal keeps the surviving
            // mappings of a shared track densely numbered from priority 1.
            self.remove_file_mapping(&file.uri)?;
        }
        self.remove_orphaned_tracks()
    }

    // Cascading cleanup.

    /// Remove every track no file maps to any more, then every album and
    /// artist left without content. Safe to run repeatedly.
    fn remove_orphaned_tracks(&mut self) -> Result<(), DatabaseError> {
        let orphan_ids: Vec<u64> = {
            let mut statement =
                self.prepare(queries::SELECT_ORPHANED_TRACK_IDS, "orphaned tracks")?;
            let rows = statement
                .query_map(params![], |row| row.get::<_, u64>(0))
                .map_err(|source| DatabaseError::QueryExecution {
                    context: "orphaned tracks",
                    source,
                })?;
            collect_rows(rows, "orphaned tracks")?
        };

        let mut touched_albums = IdSet::default();
        for track_id in orphan_ids {
            let Some(track) = self.track_by_id(track_id)? else {
                continue;
            };
            self.execute(queries::DELETE_TRACK, params![track_id], "track removal")?;
            self.changes.record_removed_track(track_id);
            if track.album_id != 0 {
                touched_albums.insert(track.album_id);
                self.changes.record_modified_album(track.album_id);
            }
            if !track.artist.is_empty() {
                self.remove_artist_if_unreferenced(&track.artist)?;
            }
        }

        for album_id in touched_albums.drain() {
            let Some(album) = self.album_by_id(album_id)? else {
                continue;
            };
            if album.track_count == 0 {
                self.execute(queries::DELETE_ALBUM, params![album_id], "album removal")?;
                self.changes.record_removed_album(album_id);
                if let Some(artist) = &album.artist {
                    self.remove_artist_if_unreferenced(artist)?;
                }
            }
        }
        Ok(())
    }

    fn remove_artist_if_unreferenced(&mut self, name: &str) -> Result<(), DatabaseError> {
        let track_count: u64 = self
            .connection
            .query_row(queries::COUNT_TRACKS_BY_ARTIST, params![name], |row| {
                row.get(0)
            })
            .map_err(|source| DatabaseError::QueryExecution {
                context: "artist track count",
                source,
            })?;
        if track_count > 0 {
            return Ok(());
        }
        let album_count: u64 = self
            .connection
            .query_row(queries::COUNT_ALBUMS_BY_ARTIST, params![name], |row| {
                row.get(0)
            })
            .map_err(|source| DatabaseError::QueryExecution {
                context: "artist album count",
                source,
            })?;
        if album_count > 0 {
            return Ok(());
        }
        if let Some(artist_id) =
            self.query_optional_id(queries::SELECT_ARTIST_BY_NAME, params![name], "artist lookup")?
        {
            self.execute(queries::DELETE_ARTIST, params![artist_id], "artist removal")?;
            self.changes.record_removed_artist(artist_id);
        }
        Ok(())
    }

    // Entity resolution.

    /// Empty names resolve to 0 without touching the database. A lookup
    /// race against the unique index resolves to the winner's row.
    fn resolve_entity(&mut self, kind: EntityKind, name: &str) -> Result<u64, DatabaseError> {
        if name.trim().is_empty() {
            return Ok(0);
        }
        if let Some(id) = self.query_optional_id(kind.select_sql(), params![name], kind.label())? {
            return Ok(id);
        }
        let id = *self.ids.entity_counter(kind);
        let inserted = {
            let mut statement = self.prepare(kind.insert_sql(), kind.label())?;
            statement.execute(params![id, name])
        };
        match inserted {
            Ok(_) => {
                *self.ids.entity_counter(kind) += 1;
                match kind {
                    EntityKind::Artist => self.changes.record_inserted_artist(id),
                    EntityKind::Composer => self.changes.record_inserted_composer(id),
                    EntityKind::Lyricist => self.changes.record_inserted_lyricist(id),
                    EntityKind::Genre => self.changes.record_inserted_genre(id),
                }
                Ok(id)
            }
            Err(error) if is_unique_violation(&error) => self
                .query_optional_id(kind.select_sql(), params![name], kind.label())?
                .ok_or(DatabaseError::DuplicateEntity { kind: kind.label() }),
            Err(source) => Err(DatabaseError::QueryExecution {
                context: kind.label(),
                source,
            }),
        }
    }

    /// Find or create a scan source row.
    fn resolve_source(&mut self, name: &str) -> Result<u64, DatabaseError> {
        let id = self.ids.sources;
        let inserted = self.execute(queries::INSERT_SOURCE, params![id, name], "source insert")?;
        if inserted > 0 {
            self.ids.sources += 1;
            return Ok(id);
        }
        self.query_optional_id(queries::SELECT_SOURCE_BY_NAME, params![name], "source lookup")?
            .ok_or(DatabaseError::DuplicateEntity { kind: "source" })
    }

    // Notification publication.

    fn publish(&self, message: LibraryMessage) {
        let _ = self.notifications.send(Message::Library(message));
    }

    /// Drain the change tracker into bus events. Additions go out grouped
    /// before modifications, removals last, each in dependency order.
    fn publish_changes(&mut self) {
        let artist_ids = self.changes.inserted_artists.drain();
        if !artist_ids.is_empty() {
            let artists = self.load_named_rows(queries::SELECT_ARTIST_BY_ID, &artist_ids);
            self.publish(LibraryMessage::ArtistsAdded(artists));
        }
        let genre_ids = self.changes.inserted_genres.drain();
        if !genre_ids.is_empty() {
            let genres = self
                .load_named_rows(queries::SELECT_GENRE_BY_ID, &genre_ids)
                .into_iter()
                .map(|row| GenreData {
                    id: row.id,
                    name: row.name,
                })
                .collect();
            self.publish(LibraryMessage::GenresAdded(genres));
        }
        let composer_ids = self.changes.inserted_composers.drain();
        if !composer_ids.is_empty() {
            let composers = self.load_named_rows(queries::SELECT_COMPOSER_BY_ID, &composer_ids);
            self.publish(LibraryMessage::ComposersAdded(composers));
        }
        let lyricist_ids = self.changes.inserted_lyricists.drain();
        if !lyricist_ids.is_empty() {
            let lyricists = self.load_named_rows(queries::SELECT_LYRICIST_BY_ID, &lyricist_ids);
            self.publish(LibraryMessage::LyricistsAdded(lyricists));
        }

        let album_ids = self.changes.inserted_albums.drain();
        for album_id in &album_ids {
            self.changes.modified_albums.remove(*album_id);
        }
        if !album_ids.is_empty() {
            let mut albums = Vec::with_capacity(album_ids.len());
            for album_id in &album_ids {
                match self.album_by_id(*album_id) {
                    Ok(Some(album)) => albums.push(album),
                    Ok(None) => {}
                    Err(error) => warn!("Added album {} could not be read: {}", album_id, error),
                }
            }
            self.publish(LibraryMessage::AlbumsAdded(albums));
        }
        for album_id in self.changes.modified_albums.drain() {
            match self.album_by_id(album_id) {
                Ok(Some(album)) => self.publish(LibraryMessage::AlbumModified(album, album_id)),
                Ok(None) => {}
                Err(error) => warn!("Modified album {} could not be read: {}", album_id, error),
            }
        }

        let track_ids = self.changes.inserted_tracks.drain();
        for track_id in &track_ids {
            self.changes.modified_tracks.remove(*track_id);
        }
        if !track_ids.is_empty() {
            let mut tracks = Vec::with_capacity(track_ids.len());
            for track_id in &track_ids {
                match self.track_by_id(*track_id) {
                    Ok(Some(track)) => tracks.push(track),
                    Ok(None) => {}
                    Err(error) => warn!("Added track {} could not be read: {}", track_id, error),
                }
            }
            self.publish(LibraryMessage::TracksAdded(tracks));
        }
        for track_id in self.changes.modified_tracks.drain() {
            match self.track_by_id(track_id) {
                Ok(Some(track)) => self.publish(LibraryMessage::TrackModified(track)),
                Ok(None) => {}
                Err(error) => warn!("Modified track {} could not be read: {}", track_id, error),
            }
        }

        for track_id in self.changes.removed_tracks.drain() {
            self.publish(LibraryMessage::TrackRemoved(track_id));
        }
        for album_id in self.changes.removed_albums.drain() {
            self.publish(LibraryMessage::AlbumRemoved(album_id));
        }
        for artist_id in self.changes.removed_artists.drain() {
            self.publish(LibraryMessage::ArtistRemoved(artist_id));
        }
    }

    fn load_named_rows(&self, sql: &str, ids: &[u64]) -> Vec<ArtistData> {
        let mut rows = Vec::with_capacity(ids.len());
        for id in ids {
            let loaded = self.prepare(sql, "named row lookup").and_then(|mut statement| {
                statement
                    .query_row(params![id], |row| {
                        Ok(ArtistData {
                            id: row.get(0)?,
                            name: row.get(1)?,
                        })
                    })
                    .optional()
                    .map_err(|source| DatabaseError::QueryExecution {
                        context: "named row lookup",
                        source,
                    })
            });
            match loaded {
                Ok(Some(row)) => rows.push(row),
                Ok(None) => {}
                Err(error) => warn!("Added row {} could not be read: {}", id, error),
            }
        }
        rows
    }

    // Low-level statement helpers.

    fn prepare(
        &self,
        sql: &str,
        context: &'static str,
    ) -> Result<rusqlite::CachedStatement<'_>, DatabaseError> {
        self.connection
            .prepare_cached(sql)
            .map_err(|source| DatabaseError::QueryExecution { context, source })
    }

    fn execute<P: rusqlite::Params>(
        &self,
        sql: &str,
        parameters: P,
        context: &'static str,
    ) -> Result<usize, DatabaseError> {
        let mut statement = self.prepare(sql, context)?;
        statement
            .execute(parameters)
            .map_err(|source| DatabaseError::QueryExecution { context, source })
    }

    fn query_optional_id<P: rusqlite::Params>(
        &self,
        sql: &str,
        parameters: P,
        context: &'static str,
    ) -> Result<Option<u64>, DatabaseError> {
        let mut statement = self.prepare(sql, context)?;
        statement
            .query_row(parameters, |row| row.get(0))
            .optional()
            .map_err(|source| DatabaseError::QueryExecution { context, source })
    }

    fn query_tracks<P: rusqlite::Params>(
        &self,
        sql: &str,
        parameters: P,
        context: &'static str,
    ) -> Result<Vec<TrackData>, DatabaseError> {
        let mut statement = self.prepare(sql, context)?;
        let rows = statement
            .query_map(parameters, track_from_row)
            .map_err(|source| DatabaseError::QueryExecution { context, source })?;
        collect_rows(rows, context)
    }
}

fn collect_rows<T>(
    rows: impl Iterator<Item = rusqlite::Result<T>>,
    context: &'static str,
) -> Result<Vec<T>, DatabaseError> {
    rows.collect::<rusqlite::Result<Vec<T>>>()
        .map_err(|source| DatabaseError::QueryExecution { context, source })
}

fn track_from_row(row: &rusqlite::Row) -> rusqlite::Result<TrackData> {
    Ok(TrackData {
        id: row.get(0)?,
        title: row.get(1)?,
        artist: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        album_title: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        album_artist: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        album_path: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
        track_number: row.get(6)?,
        disc_number: row.get(7)?,
        duration_ms: row.get(8)?,
        rating: row.get(9)?,
        genre: row.get::<_, Option<String>>(10)?.unwrap_or_default(),
        composer: row.get::<_, Option<String>>(11)?.unwrap_or_default(),
        lyricist: row.get::<_, Option<String>>(12)?.unwrap_or_default(),
        comment: row.get::<_, Option<String>>(13)?.unwrap_or_default(),
        year: row.get(14)?,
        channels: row.get(15)?,
        bit_rate: row.get(16)?,
        sample_rate: row.get(17)?,
        has_embedded_cover: row.get(18)?,
        import_date_ms: row.get(19)?,
        first_play_date_ms: row.get(20)?,
        last_play_date_ms: row.get(21)?,
        play_counter: row.get(22)?,
        resource_uri: row.get::<_, Option<String>>(23)?.unwrap_or_default(),
        file_modified_ms: row.get::<_, Option<i64>>(24)?.unwrap_or_default(),
        album_id: row.get::<_, Option<u64>>(25)?.unwrap_or_default(),
        album_cover_uri: row.get::<_, Option<String>>(26)?.unwrap_or_default(),
    })
}

fn album_from_row(row: &rusqlite::Row) -> rusqlite::Result<AlbumData> {
    Ok(AlbumData {
        id: row.get(0)?,
        title: row.get(1)?,
        artist: row.get(2)?,
        album_path: row.get(3)?,
        cover_uri: row.get(4)?,
        track_count: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> (LibraryStore, broadcast::Receiver<Message>) {
        let (sender, receiver) = broadcast::channel(1024);
        let store = LibraryStore::open_in_memory(sender).expect("store should open");
        (store, receiver)
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

    fn sample_track(
        title: &str,
        artist: &str,
        album_title: &str,
        album_artist: &str,
        track_number: i32,
        uri: &str,
    ) -> TrackMetadata {
        TrackMetadata {
            title: title.to_string(),
            artist: artist.to_string(),
            album_title: album_title.to_string(),
            album_artist: album_artist.to_string(),
            track_number,
            disc_number: 1,
            duration_ms: 180_000,
            genre: "rock".to_string(),
            resource_uri: uri.to_string(),
            file_modified_ms: 1_000,
            year: 2001,
            channels: 2,
            bit_rate: 320_000,
            sample_rate: 44_100,
            ..TrackMetadata::default()
        }
    }

    fn insert(
        store: &mut LibraryStore,
        tracks: &[TrackMetadata],
    ) {
        let stop = AtomicBool::new(false);
        store
            .insert_tracks(tracks, &HashMap::new(), "local", &stop)
            .expect("insert batch should commit");
    }

    #[test]
    fn test_album_path_from_uri_strips_scheme_and_file_name() {
        assert_eq!(album_path_from_uri("file:///music/a/b.mp3"), "/music/a");
        assert_eq!(album_path_from_uri("/music/a/b.mp3"), "/music/a");
        assert_eq!(album_path_from_uri("file:///b.mp3"), "/");
        assert_eq!(
            album_path_from_uri("http://host/music/x.mp3?cache=1#frag"),
            "/music"
        );
        assert_eq!(album_path_from_uri("b.mp3"), "");
    }

    #[test]
    fn test_first_import_groups_tracks_and_reports_additions() {
        let (mut store, mut receiver) = test_store();
        insert(
            &mut store,
            &[
                sample_track("track1", "artist1", "album1", "artist1", 1, "/music/al1/01.mp3"),
                sample_track("track2", "artist1", "album1", "artist1", 2, "/music/al1/02.mp3"),
                sample_track("track3", "artist2", "album2", "", 1, "/music/al2/01.mp3"),
            ],
        );

        let events = drain_events(&mut receiver);
        assert_eq!(events.len(), 4);
        match &events[0] {
            LibraryMessage::ArtistsAdded(artists) => {
                let names: Vec<&str> =
                    artists.iter().map(|artist| artist.name.as_str()).collect();
                assert_eq!(names, vec!["artist1", "artist2"]);
            }
            other => panic!("expected ArtistsAdded, got {:?}", other),
        }
        match &events[1] {
            LibraryMessage::GenresAdded(genres) => {
                assert_eq!(genres.len(), 1);
                assert_eq!(genres[0].name, "rock");
            }
            other => panic!("expected GenresAdded, got {:?}", other),
        }
        match &events[2] {
            LibraryMessage::AlbumsAdded(albums) => {
                assert_eq!(albums.len(), 2);
                assert_eq!(albums[0].title, "album1");
                assert_eq!(albums[0].artist.as_deref(), Some("artist1"));
                assert_eq!(albums[0].track_count, 2);
                assert_eq!(albums[1].title, "album2");
                assert_eq!(albums[1].artist, None);
                assert_eq!(albums[1].track_count, 1);
            }
            other => panic!("expected AlbumsAdded, got {:?}", other),
        }
        match &events[3] {
            LibraryMessage::TracksAdded(tracks) => {
                assert_eq!(tracks.len(), 3);
                assert_eq!(tracks[0].title, "track1");
                assert_eq!(tracks[0].album_path, "/music/al1");
                assert_eq!(tracks[0].resource_uri, "/music/al1/01.mp3");
            }
            other => panic!("expected TracksAdded, got {:?}", other),
        }

        assert_eq!(store.tracks_count().expect("count should read"), 3);
    }

    #[test]
    fn test_new_track_in_known_album_reports_album_modified() {
        let (mut store, mut receiver) = test_store();
        insert(
            &mut store,
            &[
                sample_track("track1", "artist1", "album1", "artist1", 1, "/music/al1/01.mp3"),
            ],
        );
        drain_events(&mut receiver);

        insert(
            &mut store,
            &[
                sample_track("track2", "artist1", "album1", "artist1", 2, "/music/al1/02.mp3"),
            ],
        );

        let events = drain_events(&mut receiver);
        assert_eq!(events.len(), 2);
        match &events[0] {
            LibraryMessage::AlbumModified(album, _) => {
                assert_eq!(album.title, "album1");
                assert_eq!(album.track_count, 2);
            }
            other => panic!("expected AlbumModified, got {:?}", other),
        }
        assert!(matches!(&events[1], LibraryMessage::TracksAdded(tracks) if tracks.len() == 1));
    }

    #[test]
    fn test_reimporting_unchanged_track_only_touches_mapping() {
        let (mut store, mut receiver) = test_store();
        let mut track =
            sample_track("track1", "artist1", "album1", "artist1", 1, "/music/al1/01.mp3");
        insert(&mut store, &[track.clone()]);
        drain_events(&mut receiver);

        track.file_modified_ms = 9_000;
        insert(&mut store, &[track]);

        assert!(drain_events(&mut receiver).is_empty());
        let files = store
            .restored_files_from_source("local")
            .expect("file list should read");
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].file_modified_ms, 9_000);
        assert_eq!(store.tracks_count().expect("count should read"), 1);
    }

    #[test]
    fn test_retagged_track_keeps_its_id() {
        let (mut store, mut receiver) = test_store();
        let mut track =
            sample_track("old title", "artist1", "album1", "artist1", 1, "/music/al1/01.mp3");
        insert(&mut store, &[track.clone()]);
        drain_events(&mut receiver);
        let original_id = store
            .track_id_by_file_name("/music/al1/01.mp3")
            .expect("mapping should read")
            .expect("track should be mapped");

        track.title = "new title".to_string();
        track.file_modified_ms = 2_000;
        let stop = AtomicBool::new(false);
        store
            .modify_tracks(&[track], &HashMap::new(), "local", &stop)
            .expect("modify batch should commit");

        let events = drain_events(&mut receiver);
        let modified = events
            .iter()
            .find_map(|event| match event {
                LibraryMessage::TrackModified(track) => Some(track.clone()),
                _ => None,
            })
            .expect("a TrackModified event should be published");
        assert_eq!(modified.id, original_id);
        assert_eq!(modified.title, "new title");
        assert!(!events
            .iter()
            .any(|event| matches!(event, LibraryMessage::TracksAdded(_))));
    }

    #[test]
    fn test_removing_last_track_cascades_to_album_and_artist() {
        let (mut store, mut receiver) = test_store();
        insert(
            &mut store,
            &[sample_track("solo", "lonely", "alone", "lonely", 1, "/music/alone/01.mp3")],
        );
        drain_events(&mut receiver);
        let track_id = store
            .track_id_by_file_name("/music/alone/01.mp3")
            .expect("mapping should read")
            .expect("track should be mapped");

        store
            .remove_tracks(&["/music/alone/01.mp3".to_string()])
            .expect("removal batch should commit");

        let events = drain_events(&mut receiver);
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], LibraryMessage::TrackRemoved(id) if id == track_id));
        assert!(matches!(events[1], LibraryMessage::AlbumRemoved(_)));
        assert!(matches!(events[2], LibraryMessage::ArtistRemoved(_)));
        assert_eq!(store.tracks_count().expect("count should read"), 0);
        assert!(store.all_albums().expect("albums should read").is_empty());
        assert!(store.all_artists().expect("artists should read").is_empty());
    }

    #[test]
    fn test_removing_one_track_keeps_shared_album_and_artist() {
        let (mut store, mut receiver) = test_store();
        insert(
            &mut store,
            &[
                sample_track("track1", "artist1", "album1", "artist1", 1, "/music/al1/01.mp3"),
                sample_track("track2", "artist1", "album1", "artist1", 2, "/music/al1/02.mp3"),
            ],
        );
        drain_events(&mut receiver);

        store
            .remove_tracks(&["/music/al1/02.mp3".to_string()])
            .expect("removal batch should commit");

        let events = drain_events(&mut receiver);
        assert!(events
            .iter()
            .any(|event| matches!(event, LibraryMessage::TrackRemoved(_))));
        assert!(events.iter().any(
            |event| matches!(event, LibraryMessage::AlbumModified(album, _) if album.track_count == 1)
        ));
        assert!(!events
            .iter()
            .any(|event| matches!(event, LibraryMessage::AlbumRemoved(_))));
        assert!(!events
            .iter()
            .any(|event| matches!(event, LibraryMessage::ArtistRemoved(_))));
    }

    #[test]
    fn test_purging_unknown_source_is_silent() {
        let (mut store, mut receiver) = test_store();
        insert(
            &mut store,
            &[sample_track("track1", "artist1", "album1", "artist1", 1, "/music/al1/01.mp3")],
        );
        drain_events(&mut receiver);

        store
            .remove_all_tracks_from_source("network")
            .expect("purge should commit");

        assert!(drain_events(&mut receiver).is_empty());
        assert_eq!(store.tracks_count().expect("count should read"), 1);
    }

    #[test]
    fn test_purging_source_empties_the_library() {
        let (mut store, mut receiver) = test_store();
        insert(
            &mut store,
            &[
                sample_track("track1", "artist1", "album1", "artist1", 1, "/music/al1/01.mp3"),
                sample_track("track3", "artist2", "album2", "", 1, "/music/al2/01.mp3"),
            ],
        );
        drain_events(&mut receiver);

        store
            .remove_all_tracks_from_source("local")
            .expect("purge should commit");

        let events = drain_events(&mut receiver);
        assert_eq!(
            events
                .iter()
                .filter(|event| matches!(event, LibraryMessage::TrackRemoved(_)))
                .count(),
            2
        );
        assert_eq!(store.tracks_count().expect("count should read"), 0);
        assert!(store.all_albums().expect("albums should read").is_empty());
        assert!(store.all_artists().expect("artists should read").is_empty());
        assert!(store
            .restored_files_from_source("local")
            .expect("file list should read")
            .is_empty());
    }

    #[test]
    fn test_identical_copies_share_one_track_with_queued_priorities() {
        let (mut store, mut receiver) = test_store();
        let first = sample_track("track1", "artist1", "album1", "artist1", 1, "/music/al1/a.mp3");
        let mut second = first.clone();
        second.resource_uri = "/music/al1/b.mp3".to_string();
        insert(&mut store, &[first, second]);
        drain_events(&mut receiver);

        assert_eq!(store.tracks_count().expect("count should read"), 1);
        let tracks = store.all_tracks().expect("tracks should read");
        assert_eq!(tracks[0].resource_uri, "/music/al1/a.mp3");

        store
            .remove_tracks(&["/music/al1/a.mp3".to_string()])
            .expect("removal batch should commit");
        let events = drain_events(&mut receiver);
        assert!(!events
            .iter()
            .any(|event| matches!(event, LibraryMessage::TrackRemoved(_))));

        // The surviving copy is promoted to the canonical file.
        let tracks = store.all_tracks().expect("tracks should read");
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].resource_uri, "/music/al1/b.mp3");
    }

    #[test]
    fn test_purging_one_source_promotes_copy_from_another_source() {
        let (mut store, mut receiver) = test_store();
        let stop = AtomicBool::new(false);
        let first = sample_track("track1", "artist1", "album1", "artist1", 1, "/music/al1/a.mp3");
        let mut second = first.clone();
        second.resource_uri = "/music/al1/b.mp3".to_string();
        store
            .insert_tracks(&[first], &HashMap::new(), "sourceA", &stop)
            .expect("insert batch should commit");
        store
            .insert_tracks(&[second], &HashMap::new(), "sourceB", &stop)
            .expect("insert batch should commit");
        drain_events(&mut receiver);

        store
            .remove_all_tracks_from_source("sourceA")
            .expect("purge should commit");

        let events = drain_events(&mut receiver);
        assert!(!events
            .iter()
            .any(|event| matches!(event, LibraryMessage::TrackRemoved(_))));
        let tracks = store.all_tracks().expect("tracks should read");
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].resource_uri, "/music/al1/b.mp3");
    }

    #[test]
    fn test_whitespace_only_names_create_no_rows() {
        let (mut store, mut receiver) = test_store();
        let mut track =
            sample_track("track1", "artist1", "album1", "   ", 1, "/music/al1/01.mp3");
        track.genre = "   ".to_string();
        insert(&mut store, &[track]);
        drain_events(&mut receiver);

        assert!(store.all_genres().expect("genres should read").is_empty());
        let albums = store.all_albums().expect("albums should read");
        assert_eq!(albums.len(), 1);
        assert_eq!(albums[0].artist, None);
        let tracks = store.all_tracks().expect("tracks should read");
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].genre, "");
        assert_eq!(tracks[0].album_artist, "");
    }

    #[test]
    fn test_album_artist_promotion_reaches_earlier_tracks() {
        let (mut store, mut receiver) = test_store();
        insert(
            &mut store,
            &[sample_track("track1", "a1", "mix", "", 1, "/music/mix/01.mp3")],
        );
        drain_events(&mut receiver);
        let first_id = store
            .track_id_by_file_name("/music/mix/01.mp3")
            .expect("mapping should read")
            .expect("track should be mapped");

        insert(
            &mut store,
            &[sample_track("track2", "a2", "mix", "various", 2, "/music/mix/02.mp3")],
        );

        let events = drain_events(&mut receiver);
        assert!(events.iter().any(
            |event| matches!(event, LibraryMessage::AlbumModified(album, _)
                if album.artist.as_deref() == Some("various"))
        ));
        assert!(events.iter().any(
            |event| matches!(event, LibraryMessage::TrackModified(track) if track.id == first_id)
        ));
        let first = store
            .track_by_id(first_id)
            .expect("track should read")
            .expect("track should exist");
        assert_eq!(first.album_artist, "various");
    }

    #[test]
    fn test_untitled_files_are_skipped_but_remembered() {
        let (mut store, mut receiver) = test_store();
        insert(
            &mut store,
            &[sample_track("", "artist1", "album1", "", 1, "/music/al1/untitled.mp3")],
        );

        assert!(drain_events(&mut receiver).is_empty());
        assert_eq!(store.tracks_count().expect("count should read"), 0);
        // The file stays on record so rescans do not rediscover it.
        let files = store
            .restored_files_from_source("local")
            .expect("file list should read");
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_play_statistics_accumulate_and_pin_first_play() {
        let (mut store, mut receiver) = test_store();
        insert(
            &mut store,
            &[sample_track("track1", "artist1", "album1", "artist1", 1, "/music/al1/01.mp3")],
        );
        drain_events(&mut receiver);
        let track_id = store
            .track_id_by_file_name("/music/al1/01.mp3")
            .expect("mapping should read")
            .expect("track should be mapped");

        store
            .track_started_playing("/music/al1/01.mp3", 111)
            .expect("statistics should commit");
        store
            .track_started_playing("/music/al1/01.mp3", 222)
            .expect("statistics should commit");
        store
            .track_started_playing("/music/unknown.mp3", 333)
            .expect("unknown files are ignored");

        let track = store
            .track_by_id(track_id)
            .expect("track should read")
            .expect("track should exist");
        assert_eq!(track.first_play_date_ms, Some(111));
        assert_eq!(track.last_play_date_ms, Some(222));
        assert_eq!(track.play_counter, 2);

        let recent = store
            .recently_played_tracks(10)
            .expect("recent list should read");
        assert_eq!(recent.len(), 1);
        let frequent = store
            .frequently_played_tracks(10)
            .expect("frequent list should read");
        assert_eq!(frequent.len(), 1);
    }

    #[test]
    fn test_track_id_lookup_by_metadata() {
        let (mut store, mut receiver) = test_store();
        insert(
            &mut store,
            &[sample_track("track1", "artist1", "album1", "artist1", 1, "/music/al1/01.mp3")],
        );
        drain_events(&mut receiver);

        let found = store
            .track_id_by_metadata("track1", "artist1", "album1", 1, 1)
            .expect("lookup should run");
        assert!(found.is_some());
        let missing = store
            .track_id_by_metadata("track1", "artist1", "album1", 2, 1)
            .expect("lookup should run");
        assert!(missing.is_none());
    }

    #[test]
    fn test_stop_flag_commits_partial_batch() {
        let (mut store, mut receiver) = test_store();
        let stop = AtomicBool::new(true);
        store
            .insert_tracks(
                &[sample_track("track1", "artist1", "album1", "artist1", 1, "/music/al1/01.mp3")],
                &HashMap::new(),
                "local",
                &stop,
            )
            .expect("stopped batch should still commit");

        assert!(drain_events(&mut receiver).is_empty());
        assert_eq!(store.tracks_count().expect("count should read"), 0);
    }

    #[test]
    fn test_tracks_by_artist_reads_only_that_artist() {
        let (mut store, mut receiver) = test_store();
        insert(
            &mut store,
            &[
                sample_track("track1", "artist1", "album1", "artist1", 1, "/music/al1/01.mp3"),
                sample_track("track3", "artist2", "album2", "", 1, "/music/al2/01.mp3"),
            ],
        );
        drain_events(&mut receiver);

        let tracks = store.tracks_by_artist("artist2").expect("tracks should read");
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].title, "track3");
        assert_eq!(tracks[0].genre, "rock");
    }
}
