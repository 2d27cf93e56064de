//! Database schema creation and version migration.

use log::{debug, info};
use rusqlite::Connection;

use crate::error::DatabaseError;

/// Marker table whose presence means the schema is already current.
const VERSION_MARKER_TABLE: &str = "DatabaseVersionV9";

/// Tables left behind by earlier schema generations, dropped best-effort
/// before the current schema is created.
const LEGACY_TABLES: &[&str] = &[
    "DatabaseVersionV2",
    "DatabaseVersionV3",
    "DatabaseVersionV4",
    "DatabaseVersionV5",
    "DatabaseVersionV6",
    "DatabaseVersionV7",
    "DatabaseVersionV8",
    "AlbumsArtists",
    "TracksArtists",
    "TracksMapping",
    "Tracks",
    "Composer",
    "Genre",
    "Lyricist",
    "Albums",
    "DiscoverSource",
    "Artists",
];

const CREATE_TABLES: &[(&str, &str)] = &[
    (
        "DatabaseVersionV9",
        "CREATE TABLE `DatabaseVersionV9` (`Version` INTEGER PRIMARY KEY NOT NULL)",
    ),
    (
        "DiscoverSource",
        "CREATE TABLE `DiscoverSource` (
            `ID` INTEGER PRIMARY KEY NOT NULL,
            `Name` VARCHAR(55) NOT NULL,
            UNIQUE (`Name`)
        )",
    ),
    (
        "Artists",
        "CREATE TABLE `Artists` (
            `ID` INTEGER PRIMARY KEY NOT NULL,
            `Name` VARCHAR(55) NOT NULL,
            UNIQUE (`Name`)
        )",
    ),
    (
        "Composer",
        "CREATE TABLE `Composer` (
            `ID` INTEGER PRIMARY KEY NOT NULL,
            `Name` VARCHAR(55) NOT NULL,
            UNIQUE (`Name`)
        )",
    ),
    (
        "Genre",
        "CREATE TABLE `Genre` (
            `ID` INTEGER PRIMARY KEY NOT NULL,
            `Name` VARCHAR(85) NOT NULL,
            UNIQUE (`Name`)
        )",
    ),
    (
        "Lyricist",
        "CREATE TABLE `Lyricist` (
            `ID` INTEGER PRIMARY KEY NOT NULL,
            `Name` VARCHAR(55) NOT NULL,
            UNIQUE (`Name`)
        )",
    ),
    (
        "Albums",
        "CREATE TABLE `Albums` (
            `ID` INTEGER PRIMARY KEY NOT NULL,
            `Title` VARCHAR(55) NOT NULL,
            `ArtistName` VARCHAR(55),
            `AlbumPath` VARCHAR(255) NOT NULL,
            `CoverFileName` VARCHAR(255) NOT NULL,
            UNIQUE (`Title`, `ArtistName`, `AlbumPath`),
            CONSTRAINT fk_artists FOREIGN KEY (`ArtistName`)
                REFERENCES `Artists`(`Name`)
        )",
    ),
    (
        "Tracks",
        "CREATE TABLE `Tracks` (
            `ID` INTEGER PRIMARY KEY NOT NULL,
            `Title` VARCHAR(85) NOT NULL,
            `ArtistName` VARCHAR(55),
            `AlbumTitle` VARCHAR(55),
            `AlbumArtistName` VARCHAR(55),
            `AlbumPath` VARCHAR(255),
            `TrackNumber` INTEGER DEFAULT -1,
            `DiscNumber` INTEGER DEFAULT -1,
            `Duration` INTEGER NOT NULL,
            `Rating` INTEGER DEFAULT 0,
            `Genre` VARCHAR(55),
            `Composer` VARCHAR(55),
            `Lyricist` VARCHAR(55),
            `Comment` VARCHAR(255) DEFAULT '',
            `Year` INTEGER DEFAULT 0,
            `Channels` INTEGER DEFAULT -1,
            `BitRate` INTEGER DEFAULT -1,
            `SampleRate` INTEGER DEFAULT -1,
            `HasEmbeddedCover` BOOLEAN NOT NULL,
            `ImportDate` INTEGER NOT NULL,
            `FirstPlayDate` INTEGER,
            `LastPlayDate` INTEGER,
            `PlayCounter` INTEGER NOT NULL,
            UNIQUE (
                `Title`, `AlbumTitle`, `AlbumArtistName`,
                `AlbumPath`, `TrackNumber`, `DiscNumber`
            ),
            CONSTRAINT fk_artist FOREIGN KEY (`ArtistName`)
                REFERENCES `Artists`(`Name`),
            CONSTRAINT fk_tracks_composer FOREIGN KEY (`Composer`)
                REFERENCES `Composer`(`Name`),
            CONSTRAINT fk_tracks_lyricist FOREIGN KEY (`Lyricist`)
                REFERENCES `Lyricist`(`Name`),
            CONSTRAINT fk_tracks_genre FOREIGN KEY (`Genre`)
                REFERENCES `Genre`(`Name`),
            CONSTRAINT fk_tracks_album FOREIGN KEY (
                `AlbumTitle`, `AlbumArtistName`, `AlbumPath`)
                REFERENCES `Albums`(`Title`, `ArtistName`, `AlbumPath`)
        )",
    ),
    (
        "TracksMapping",
        "CREATE TABLE `TracksMapping` (
            `TrackID` INTEGER NULL,
            `DiscoverID` INTEGER NOT NULL,
            `FileName` VARCHAR(255) NOT NULL,
            `Priority` INTEGER NOT NULL,
            `FileModifiedTime` INTEGER NOT NULL,
            PRIMARY KEY (`FileName`),
            CONSTRAINT TracksUnique UNIQUE (`TrackID`, `Priority`),
            CONSTRAINT fk_tracksmapping_trackID FOREIGN KEY (`TrackID`)
                REFERENCES `Tracks`(`ID`) ON DELETE CASCADE,
            CONSTRAINT fk_tracksmapping_discoverID FOREIGN KEY (`DiscoverID`)
                REFERENCES `DiscoverSource`(`ID`)
        )",
    ),
];

const CREATE_INDEXES: &[(&str, &str)] = &[
    (
        "TitleAlbumsIndex",
        "CREATE INDEX IF NOT EXISTS `TitleAlbumsIndex` ON `Albums` (`Title`)",
    ),
    (
        "ArtistNameAlbumsIndex",
        "CREATE INDEX IF NOT EXISTS `ArtistNameAlbumsIndex` ON `Albums` (`ArtistName`)",
    ),
    (
        "TracksAlbumIndex",
        "CREATE INDEX IF NOT EXISTS `TracksAlbumIndex`
            ON `Tracks` (`AlbumTitle`, `AlbumArtistName`, `AlbumPath`)",
    ),
    (
        "ArtistNameIndex",
        "CREATE INDEX IF NOT EXISTS `ArtistNameIndex` ON `Tracks` (`ArtistName`)",
    ),
    (
        "AlbumArtistNameIndex",
        "CREATE INDEX IF NOT EXISTS `AlbumArtistNameIndex` ON `Tracks` (`AlbumArtistName`)",
    ),
    (
        "TracksFileNameIndex",
        "CREATE INDEX IF NOT EXISTS `TracksFileNameIndex` ON `TracksMapping` (`FileName`)",
    ),
];

/// True when the current-version marker table exists.
fn schema_is_current(connection: &Connection) -> Result<bool, DatabaseError> {
    let count: i64 = connection
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [VERSION_MARKER_TABLE],
            |row| row.get(0),
        )
        .map_err(|source| DatabaseError::Schema {
            context: "version marker lookup",
            source,
        })?;
    Ok(count > 0)
}

/// Create the current schema if it is not already in place.
///
/// Legacy tables are dropped best-effort first. Any failure while creating
/// a current table or index aborts setup.
pub fn ensure_schema(connection: &Connection) -> Result<(), DatabaseError> {
    connection
        .execute_batch("PRAGMA foreign_keys = ON")
        .map_err(|source| DatabaseError::Schema {
            context: "foreign key pragma",
            source,
        })?;

    if schema_is_current(connection)? {
        debug!("Database schema is current");
        return Ok(());
    }

    info!("Initializing database schema");
    for table in LEGACY_TABLES {
        if let Err(error) = connection.execute_batch(&format!("DROP TABLE IF EXISTS `{}`", table)) {
            debug!("Legacy table {} could not be dropped: {}", table, error);
        }
    }

    for &(table, ddl) in CREATE_TABLES {
        connection
            .execute_batch(ddl)
            .map_err(|source| DatabaseError::Schema {
                context: table,
                source,
            })?;
    }
    for &(index, ddl) in CREATE_INDEXES {
        connection
            .execute_batch(ddl)
            .map_err(|source| DatabaseError::Schema {
                context: index,
                source,
            })?;
    }

    connection
        .execute_batch("INSERT INTO `DatabaseVersionV9` (`Version`) VALUES (9)")
        .map_err(|source| DatabaseError::Schema {
            context: "version marker insert",
            source,
        })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_names(connection: &Connection) -> Vec<String> {
        let mut statement = connection
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .expect("statement should prepare");
        statement
            .query_map([], |row| row.get::<_, String>(0))
            .expect("query should run")
            .map(|name| name.expect("row should read"))
            .collect()
    }

    #[test]
    fn test_ensure_schema_creates_all_tables() {
        let connection = Connection::open_in_memory().expect("database should open");
        ensure_schema(&connection).expect("schema setup should succeed");

        let names = table_names(&connection);
        for expected in [
            "Albums",
            "Artists",
            "Composer",
            "DatabaseVersionV9",
            "DiscoverSource",
            "Genre",
            "Lyricist",
            "Tracks",
            "TracksMapping",
        ] {
            assert!(names.iter().any(|name| name == expected), "{}", expected);
        }
    }

    #[test]
    fn test_ensure_schema_is_idempotent() {
        let connection = Connection::open_in_memory().expect("database should open");
        ensure_schema(&connection).expect("first setup should succeed");
        connection
            .execute(
                "INSERT INTO `Artists` (`ID`, `Name`) VALUES (1, 'artist1')",
                [],
            )
            .expect("insert should succeed");

        ensure_schema(&connection).expect("second setup should succeed");
        let count: i64 = connection
            .query_row("SELECT COUNT(*) FROM `Artists`", [], |row| row.get(0))
            .expect("count should run");
        assert_eq!(count, 1);
    }

    #[test]
    fn test_ensure_schema_replaces_legacy_generation() {
        let connection = Connection::open_in_memory().expect("database should open");
        connection
            .execute_batch(
                "CREATE TABLE `DatabaseVersionV5` (`Version` INTEGER);
                 CREATE TABLE `Tracks` (`ID` INTEGER PRIMARY KEY, `OldColumn` TEXT)",
            )
            .expect("legacy tables should create");

        ensure_schema(&connection).expect("migration should succeed");

        let names = table_names(&connection);
        assert!(!names.iter().any(|name| name == "DatabaseVersionV5"));
        let has_title: i64 = connection
            .query_row(
                "SELECT COUNT(*) FROM pragma_table_info('Tracks') WHERE name = 'Title'",
                [],
                |row| row.get(0),
            )
            .expect("pragma should run");
        assert_eq!(has_title, 1);
    }
}
