//! SQL catalog for the library store.
//!
//! Every statement lives here as a named constant so the store can run them
//! through `prepare_cached` without scattering SQL through the control flow.

/// Shared track projection. The mapping join pins the priority-1 file as
/// the canonical resource of the track.
macro_rules! track_select {
    ($tail:expr) => {
        concat!(
            "SELECT
    t.`ID`, t.`Title`, t.`ArtistName`, t.`AlbumTitle`, t.`AlbumArtistName`,
    t.`AlbumPath`, t.`TrackNumber`, t.`DiscNumber`, t.`Duration`, t.`Rating`,
    t.`Genre`, t.`Composer`, t.`Lyricist`, t.`Comment`, t.`Year`,
    t.`Channels`, t.`BitRate`, t.`SampleRate`, t.`HasEmbeddedCover`,
    t.`ImportDate`, t.`FirstPlayDate`, t.`LastPlayDate`, t.`PlayCounter`,
    m.`FileName`, m.`FileModifiedTime`,
    (SELECT a.`ID` FROM `Albums` a
        WHERE a.`Title` = t.`AlbumTitle`
          AND (a.`ArtistName` = t.`AlbumArtistName`
               OR (a.`ArtistName` IS NULL AND t.`AlbumArtistName` IS NULL))
          AND a.`AlbumPath` = t.`AlbumPath`),
    (SELECT a.`CoverFileName` FROM `Albums` a
        WHERE a.`Title` = t.`AlbumTitle`
          AND (a.`ArtistName` = t.`AlbumArtistName`
               OR (a.`ArtistName` IS NULL AND t.`AlbumArtistName` IS NULL))
          AND a.`AlbumPath` = t.`AlbumPath`)
    FROM `Tracks` t
    LEFT JOIN `TracksMapping` m ON m.`TrackID` = t.`ID` AND m.`Priority` = 1
    ",
            $tail
        )
    };
}

pub const SELECT_TRACK_BY_ID: &str = track_select!("WHERE t.`ID` = ?1");

pub const SELECT_ALL_TRACKS: &str = track_select!("ORDER BY t.`ID`");

pub const SELECT_TRACKS_BY_ARTIST: &str =
    track_select!("WHERE t.`ArtistName` = ?1 ORDER BY t.`ID`");

pub const SELECT_RECENTLY_PLAYED_TRACKS: &str =
    track_select!("WHERE t.`LastPlayDate` IS NOT NULL ORDER BY t.`LastPlayDate` DESC LIMIT ?1");

pub const SELECT_FREQUENTLY_PLAYED_TRACKS: &str =
    track_select!("WHERE t.`PlayCounter` > 0 ORDER BY t.`PlayCounter` DESC, t.`ID` LIMIT ?1");

/// Empty string parameters stand in for NULL columns so one statement
/// covers both partially and fully tagged files.
pub const SELECT_DUPLICATE_TRACK_ID: &str = "
    SELECT `ID` FROM `Tracks`
    WHERE `Title` = ?1
      AND (`ArtistName` = ?2 OR (?2 = '' AND `ArtistName` IS NULL))
      AND (`AlbumTitle` = ?3 OR (?3 = '' AND `AlbumTitle` IS NULL))
      AND (`AlbumArtistName` = ?4 OR (?4 = '' AND `AlbumArtistName` IS NULL))
      AND (`AlbumPath` = ?5 OR (?5 = '' AND `AlbumPath` IS NULL))
      AND `TrackNumber` = ?6
      AND `DiscNumber` = ?7";

pub const SELECT_TRACK_ID_BY_TITLE_ALBUM_TRACK_DISC: &str = "
    SELECT `ID` FROM `Tracks`
    WHERE `Title` = ?1
      AND (`ArtistName` = ?2 OR (?2 = '' AND `ArtistName` IS NULL))
      AND (`AlbumTitle` = ?3 OR (?3 = '' AND `AlbumTitle` IS NULL))
      AND `TrackNumber` = ?4
      AND `DiscNumber` = ?5";

pub const INSERT_TRACK: &str = "
    INSERT INTO `Tracks` (
        `ID`, `Title`, `ArtistName`, `AlbumTitle`, `AlbumArtistName`,
        `AlbumPath`, `TrackNumber`, `DiscNumber`, `Duration`, `Rating`,
        `Genre`, `Composer`, `Lyricist`, `Comment`, `Year`,
        `Channels`, `BitRate`, `SampleRate`, `HasEmbeddedCover`,
        `ImportDate`, `PlayCounter`)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
            ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, 0)";

/// Play statistics are deliberately left untouched so re-tagging a file
/// keeps its history.
pub const UPDATE_TRACK: &str = "
    UPDATE `Tracks` SET
        `Title` = ?2, `ArtistName` = ?3, `AlbumTitle` = ?4,
        `AlbumArtistName` = ?5, `AlbumPath` = ?6, `TrackNumber` = ?7,
        `DiscNumber` = ?8, `Duration` = ?9, `Rating` = ?10,
        `Genre` = ?11, `Composer` = ?12, `Lyricist` = ?13, `Comment` = ?14,
        `Year` = ?15, `Channels` = ?16, `BitRate` = ?17, `SampleRate` = ?18,
        `HasEmbeddedCover` = ?19
    WHERE `ID` = ?1";

pub const DELETE_TRACK: &str = "DELETE FROM `Tracks` WHERE `ID` = ?1";

pub const SELECT_ORPHANED_TRACK_IDS: &str = "
    SELECT `ID` FROM `Tracks`
    WHERE `ID` NOT IN (
        SELECT `TrackID` FROM `TracksMapping` WHERE `TrackID` IS NOT NULL)
    ORDER BY `ID`";

pub const UPDATE_TRACK_PLAY_STATISTICS: &str = "
    UPDATE `Tracks`
    SET `LastPlayDate` = ?2, `PlayCounter` = `PlayCounter` + 1
    WHERE `ID` = ?1";

pub const UPDATE_TRACK_FIRST_PLAY_DATE: &str = "
    UPDATE `Tracks` SET `FirstPlayDate` = ?2
    WHERE `ID` = ?1 AND `FirstPlayDate` IS NULL";

pub const SELECT_TRACKS_COUNT: &str = "SELECT COUNT(*) FROM `Tracks`";

// File mapping.

pub const SELECT_MAPPING_BY_FILE_NAME: &str = "
    SELECT `TrackID`, `FileModifiedTime` FROM `TracksMapping` WHERE `FileName` = ?1";

pub const INSERT_MAPPING: &str = "
    INSERT INTO `TracksMapping` (`FileName`, `DiscoverID`, `Priority`, `FileModifiedTime`)
    VALUES (?1, ?2, ?3, ?4)";

pub const UPDATE_MAPPING: &str = "
    UPDATE `TracksMapping`
    SET `TrackID` = ?2, `Priority` = ?3, `FileModifiedTime` = ?4
    WHERE `FileName` = ?1";

pub const SELECT_MAPPING_PRIORITY: &str = "
    SELECT `Priority` FROM `TracksMapping` WHERE `TrackID` = ?1 AND `FileName` = ?2";

pub const SELECT_MAPPINGS_BY_TRACK_ID: &str = "
    SELECT `FileName`, `Priority`, `FileModifiedTime` FROM `TracksMapping`
    WHERE `TrackID` = ?1 ORDER BY `Priority`";

pub const DELETE_MAPPING: &str = "DELETE FROM `TracksMapping` WHERE `FileName` = ?1";

pub const SELECT_FILES_FROM_SOURCE: &str = "
    SELECT `FileName`, `FileModifiedTime` FROM `TracksMapping`
    WHERE `DiscoverID` = ?1 ORDER BY `FileName`";

// Scan sources.

pub const SELECT_SOURCE_BY_NAME: &str = "SELECT `ID` FROM `DiscoverSource` WHERE `Name` = ?1";

pub const INSERT_SOURCE: &str =
    "INSERT OR IGNORE INTO `DiscoverSource` (`ID`, `Name`) VALUES (?1, ?2)";

// Albums.

pub const SELECT_ALBUM_ID_BY_TITLE_ARTIST_PATH: &str = "
    SELECT `ID` FROM `Albums`
    WHERE `Title` = ?1 AND `ArtistName` = ?2 AND `AlbumPath` = ?3";

pub const SELECT_ALBUM_ID_BY_TITLE_PATH_WITHOUT_ARTIST: &str = "
    SELECT `ID` FROM `Albums`
    WHERE `Title` = ?1 AND `ArtistName` IS NULL AND `AlbumPath` = ?2";

pub const INSERT_ALBUM: &str = "
    INSERT INTO `Albums` (`ID`, `Title`, `ArtistName`, `AlbumPath`, `CoverFileName`)
    VALUES (?1, ?2, ?3, ?4, ?5)";

pub const SELECT_ALBUM_BY_ID: &str = "
    SELECT a.`ID`, a.`Title`, a.`ArtistName`, a.`AlbumPath`, a.`CoverFileName`,
        (SELECT COUNT(*) FROM `Tracks` t
            WHERE t.`AlbumTitle` = a.`Title`
              AND (t.`AlbumArtistName` = a.`ArtistName`
                   OR (t.`AlbumArtistName` IS NULL AND a.`ArtistName` IS NULL))
              AND t.`AlbumPath` = a.`AlbumPath`)
    FROM `Albums` a WHERE a.`ID` = ?1";

pub const SELECT_ALL_ALBUMS: &str = "
    SELECT a.`ID`, a.`Title`, a.`ArtistName`, a.`AlbumPath`, a.`CoverFileName`,
        (SELECT COUNT(*) FROM `Tracks` t
            WHERE t.`AlbumTitle` = a.`Title`
              AND (t.`AlbumArtistName` = a.`ArtistName`
                   OR (t.`AlbumArtistName` IS NULL AND a.`ArtistName` IS NULL))
              AND t.`AlbumPath` = a.`AlbumPath`)
    FROM `Albums` a ORDER BY a.`Title`, a.`ID`";

pub const UPDATE_ALBUM_COVER: &str = "UPDATE `Albums` SET `CoverFileName` = ?2 WHERE `ID` = ?1";

pub const UPDATE_ALBUM_ARTIST: &str = "UPDATE `Albums` SET `ArtistName` = ?2 WHERE `ID` = ?1";

/// Retags the album tuple on tracks that predate the album gaining an artist.
pub const UPDATE_TRACKS_ALBUM_ARTIST: &str = "
    UPDATE `Tracks` SET `AlbumArtistName` = ?3
    WHERE `AlbumTitle` = ?1 AND `AlbumPath` = ?2 AND `AlbumArtistName` IS NULL";

pub const DELETE_ALBUM: &str = "DELETE FROM `Albums` WHERE `ID` = ?1";

pub const COUNT_TRACKS_IN_ALBUM: &str = "
    SELECT COUNT(*) FROM `Tracks` t, `Albums` a
    WHERE a.`ID` = ?1
      AND t.`AlbumTitle` = a.`Title`
      AND (t.`AlbumArtistName` = a.`ArtistName`
           OR (t.`AlbumArtistName` IS NULL AND a.`ArtistName` IS NULL))
      AND t.`AlbumPath` = a.`AlbumPath`";

pub const SELECT_TRACK_IDS_IN_ALBUM: &str = "
    SELECT t.`ID` FROM `Tracks` t, `Albums` a
    WHERE a.`ID` = ?1
      AND t.`AlbumTitle` = a.`Title`
      AND (t.`AlbumArtistName` = a.`ArtistName`
           OR (t.`AlbumArtistName` IS NULL AND a.`ArtistName` IS NULL))
      AND t.`AlbumPath` = a.`AlbumPath`
    ORDER BY t.`ID`";

pub const SELECT_ALBUM_ID_FOR_TRACK_TUPLE: &str = "
    SELECT `ID` FROM `Albums`
    WHERE `Title` = ?1
      AND (`ArtistName` = ?2 OR (?2 = '' AND `ArtistName` IS NULL))
      AND `AlbumPath` = ?3";

// Named entities: artists, composers, lyricists, genres, sources.

pub const SELECT_ARTIST_BY_NAME: &str = "SELECT `ID` FROM `Artists` WHERE `Name` = ?1";
pub const INSERT_ARTIST: &str = "INSERT INTO `Artists` (`ID`, `Name`) VALUES (?1, ?2)";
pub const SELECT_ARTIST_BY_ID: &str = "SELECT `ID`, `Name` FROM `Artists` WHERE `ID` = ?1";
pub const SELECT_ALL_ARTISTS: &str = "SELECT `ID`, `Name` FROM `Artists` ORDER BY `Name`";
pub const DELETE_ARTIST: &str = "DELETE FROM `Artists` WHERE `ID` = ?1";
pub const COUNT_TRACKS_BY_ARTIST: &str =
    "SELECT COUNT(*) FROM `Tracks` WHERE `ArtistName` = ?1 OR `AlbumArtistName` = ?1";
pub const COUNT_ALBUMS_BY_ARTIST: &str = "SELECT COUNT(*) FROM `Albums` WHERE `ArtistName` = ?1";

pub const SELECT_COMPOSER_BY_NAME: &str = "SELECT `ID` FROM `Composer` WHERE `Name` = ?1";
pub const INSERT_COMPOSER: &str = "INSERT INTO `Composer` (`ID`, `Name`) VALUES (?1, ?2)";
pub const SELECT_COMPOSER_BY_ID: &str = "SELECT `ID`, `Name` FROM `Composer` WHERE `ID` = ?1";
pub const SELECT_ALL_COMPOSERS: &str = "SELECT `ID`, `Name` FROM `Composer` ORDER BY `Name`";

pub const SELECT_LYRICIST_BY_NAME: &str = "SELECT `ID` FROM `Lyricist` WHERE `Name` = ?1";
pub const INSERT_LYRICIST: &str = "INSERT INTO `Lyricist` (`ID`, `Name`) VALUES (?1, ?2)";
pub const SELECT_LYRICIST_BY_ID: &str = "SELECT `ID`, `Name` FROM `Lyricist` WHERE `ID` = ?1";
pub const SELECT_ALL_LYRICISTS: &str = "SELECT `ID`, `Name` FROM `Lyricist` ORDER BY `Name`";

pub const SELECT_GENRE_BY_NAME: &str = "SELECT `ID` FROM `Genre` WHERE `Name` = ?1";
pub const INSERT_GENRE: &str = "INSERT INTO `Genre` (`ID`, `Name`) VALUES (?1, ?2)";
pub const SELECT_GENRE_BY_ID: &str = "SELECT `ID`, `Name` FROM `Genre` WHERE `ID` = ?1";
pub const SELECT_ALL_GENRES: &str = "SELECT `ID`, `Name` FROM `Genre` ORDER BY `Name`";

// Id allocator seeds.

pub const SELECT_MAX_TRACK_ID: &str = "SELECT MAX(`ID`) FROM `Tracks`";
pub const SELECT_MAX_ALBUM_ID: &str = "SELECT MAX(`ID`) FROM `Albums`";
pub const SELECT_MAX_ARTIST_ID: &str = "SELECT MAX(`ID`) FROM `Artists`";
pub const SELECT_MAX_COMPOSER_ID: &str = "SELECT MAX(`ID`) FROM `Composer`";
pub const SELECT_MAX_LYRICIST_ID: &str = "SELECT MAX(`ID`) FROM `Lyricist`";
pub const SELECT_MAX_GENRE_ID: &str = "SELECT MAX(`ID`) FROM `Genre`";
pub const SELECT_MAX_SOURCE_ID: &str = "SELECT MAX(`ID`) FROM `DiscoverSource`";
