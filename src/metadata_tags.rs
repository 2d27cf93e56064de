//! Tag and audio-property reader backed by `lofty`.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::UNIX_EPOCH;

use lofty::config::{ParseOptions, ParsingMode};
use lofty::file::TaggedFile;
use lofty::file::TaggedFileExt;
use lofty::prelude::{Accessor, AudioFile};
use lofty::probe::Probe;
use lofty::tag::{ItemKey, Tag};
use log::debug;

use crate::protocol::TrackMetadata;

fn first_non_empty_value<F>(primary_tag: Option<&Tag>, tags: &[Tag], mut extractor: F) -> String
where
    F: FnMut(&Tag) -> Option<String>,
{
    if let Some(tag) = primary_tag {
        if let Some(value) = extractor(tag) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
    }

    for tag in tags {
        if let Some(value) = extractor(tag) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
    }

    String::new()
}

/// First run of four consecutive digits, so "1998-10-31" and "31.10.1998"
/// both yield 1998.
fn derive_year_from_date(date: &str) -> i32 {
    let mut consecutive_digits = String::with_capacity(4);
    for ch in date.chars() {
        if ch.is_ascii_digit() {
            consecutive_digits.push(ch);
            if consecutive_digits.len() == 4 {
                return consecutive_digits.parse().unwrap_or(0);
            }
        } else {
            consecutive_digits.clear();
        }
    }
    0
}

/// Leading integer of values like "3" or "3/12". Missing or unparsable
/// numbers map to -1, the database default.
fn parse_position(value: &str) -> i32 {
    let leading = value.split('/').next().unwrap_or(value).trim();
    leading.parse().unwrap_or(-1)
}

fn metadata_parse_options(parsing_mode: ParsingMode, max_junk_bytes: usize) -> ParseOptions {
    ParseOptions::new()
        .read_properties(true)
        .read_cover_art(true)
        .parsing_mode(parsing_mode)
        .max_junk_bytes(max_junk_bytes)
}

fn read_tagged_file(path: &Path) -> Option<TaggedFile> {
    let primary_options = metadata_parse_options(ParsingMode::BestAttempt, 1024);
    let relaxed_options = metadata_parse_options(ParsingMode::Relaxed, 64 * 1024);

    match Probe::open(path) {
        Ok(probe) => match probe.options(primary_options).read() {
            Ok(tagged_file) => return Some(tagged_file),
            Err(primary_error) => {
                debug!(
                    "Metadata read primary parse failed for {}: {}",
                    path.display(),
                    primary_error
                );
            }
        },
        Err(open_error) => {
            debug!(
                "Metadata read could not open {} with extension-based probe: {}",
                path.display(),
                open_error
            );
        }
    }

    let file = match File::open(path) {
        Ok(file) => file,
        Err(error) => {
            debug!(
                "Metadata read failed for {} while preparing content-based fallback: {}",
                path.display(),
                error
            );
            return None;
        }
    };

    let guessed_probe = match Probe::new(BufReader::new(file))
        .options(relaxed_options)
        .guess_file_type()
    {
        Ok(probe) => probe,
        Err(error) => {
            debug!(
                "Metadata read failed for {} while guessing file type from content: {}",
                path.display(),
                error
            );
            return None;
        }
    };

    match guessed_probe.read() {
        Ok(tagged_file) => Some(tagged_file),
        Err(error) => {
            debug!(
                "Metadata read failed for {} after content-based fallback: {}",
                path.display(),
                error
            );
            None
        }
    }
}

/// File modification time as milliseconds since the epoch, 0 when the
/// file system cannot say.
pub fn file_modified_ms(path: &Path) -> i64 {
    std::fs::metadata(path)
        .and_then(|metadata| metadata.modified())
        .ok()
        .and_then(|modified| modified.duration_since(UNIX_EPOCH).ok())
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}

/// Read everything the library store needs to know about one audio file.
/// Returns `None` when the file cannot be parsed at all.
pub fn read_track_metadata(path: &Path) -> Option<TrackMetadata> {
    let tagged_file = read_tagged_file(path)?;
    let primary_tag = tagged_file.primary_tag();
    let tags = tagged_file.tags();

    let title = first_non_empty_value(primary_tag, tags, |tag| {
        tag.title().map(|value| value.into_owned())
    });
    let artist = first_non_empty_value(primary_tag, tags, |tag| {
        tag.artist().map(|value| value.into_owned())
    });
    let album_title = first_non_empty_value(primary_tag, tags, |tag| {
        tag.album().map(|value| value.into_owned())
    });
    let album_artist = first_non_empty_value(primary_tag, tags, |tag| {
        tag.get_string(&ItemKey::AlbumArtist).map(str::to_string)
    });
    let genre = first_non_empty_value(primary_tag, tags, |tag| {
        tag.genre().map(|value| value.into_owned())
    });
    let composer = first_non_empty_value(primary_tag, tags, |tag| {
        tag.get_string(&ItemKey::Composer).map(str::to_string)
    });
    let lyricist = first_non_empty_value(primary_tag, tags, |tag| {
        tag.get_string(&ItemKey::Lyricist).map(str::to_string)
    });
    let comment = first_non_empty_value(primary_tag, tags, |tag| {
        tag.comment().map(|value| value.into_owned())
    });
    let track_number = first_non_empty_value(primary_tag, tags, |tag| {
        tag.get_string(&ItemKey::TrackNumber)
            .map(str::to_string)
            .or_else(|| tag.track().map(|value| value.to_string()))
    });
    let disc_number = first_non_empty_value(primary_tag, tags, |tag| {
        tag.get_string(&ItemKey::DiscNumber)
            .map(str::to_string)
            .or_else(|| tag.disk().map(|value| value.to_string()))
    });
    let date = first_non_empty_value(primary_tag, tags, |tag| {
        tag.get_string(&ItemKey::RecordingDate)
            .or_else(|| tag.get_string(&ItemKey::ReleaseDate))
            .or_else(|| tag.get_string(&ItemKey::OriginalReleaseDate))
            .or_else(|| tag.get_string(&ItemKey::Year))
            .map(str::to_string)
    });
    let year = {
        let direct_year = first_non_empty_value(primary_tag, tags, |tag| {
            tag.get_string(&ItemKey::Year).map(str::to_string)
        });
        if direct_year.is_empty() {
            derive_year_from_date(&date)
        } else {
            direct_year
                .parse()
                .unwrap_or_else(|_| derive_year_from_date(&direct_year))
        }
    };

    let has_embedded_cover = primary_tag
        .into_iter()
        .chain(tags.iter())
        .any(|tag| !tag.pictures().is_empty());

    let properties = tagged_file.properties();
    let duration_ms = properties.duration().as_millis() as i64;
    let channels = properties
        .channels()
        .map(|count| count as i32)
        .unwrap_or(-1);
    let bit_rate = properties
        .audio_bitrate()
        .map(|kbps| kbps as i32 * 1000)
        .unwrap_or(-1);
    let sample_rate = properties
        .sample_rate()
        .map(|rate| rate as i32)
        .unwrap_or(-1);

    Some(TrackMetadata {
        title,
        artist,
        album_title,
        album_artist,
        track_number: parse_position(&track_number),
        disc_number: parse_position(&disc_number),
        duration_ms,
        rating: 0,
        resource_uri: path.to_string_lossy().to_string(),
        file_modified_ms: file_modified_ms(path),
        genre,
        composer,
        lyricist,
        comment,
        year,
        channels,
        bit_rate,
        sample_rate,
        has_embedded_cover,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_year_from_date_with_full_value() {
        assert_eq!(derive_year_from_date("1998-10-31"), 1998);
        assert_eq!(derive_year_from_date("31.10.1998"), 1998);
    }

    #[test]
    fn test_derive_year_from_date_with_short_value() {
        assert_eq!(derive_year_from_date("99"), 0);
        assert_eq!(derive_year_from_date(""), 0);
    }

    #[test]
    fn test_parse_position_handles_totals_and_garbage() {
        assert_eq!(parse_position("3"), 3);
        assert_eq!(parse_position("3/12"), 3);
        assert_eq!(parse_position(" 7 / 9 "), 7);
        assert_eq!(parse_position("A"), -1);
        assert_eq!(parse_position(""), -1);
    }

    #[test]
    fn test_unparsable_file_yields_none() {
        let path = std::env::temp_dir().join(format!(
            "tunedex-metadata-test-{}.mp3",
            std::process::id()
        ));
        std::fs::write(&path, b"not an audio file").expect("file should write");
        assert!(read_track_metadata(&path).is_none());
        std::fs::remove_file(&path).expect("file should clean up");
    }
}
