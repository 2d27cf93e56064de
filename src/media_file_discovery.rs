//! File-system discovery of audio files and folder cover art.

use std::path::{Path, PathBuf};

use log::debug;

pub const SUPPORTED_AUDIO_EXTENSIONS: [&str; 7] =
    ["mp3", "wav", "ogg", "flac", "aac", "m4a", "mp4"];

const COVER_FILE_STEMS: [&str; 3] = ["cover", "folder", "front"];
const COVER_FILE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

pub fn is_supported_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            SUPPORTED_AUDIO_EXTENSIONS
                .iter()
                .any(|supported| ext.eq_ignore_ascii_case(supported))
        })
        .unwrap_or(false)
}

/// Recursively collect every supported audio file under a folder, sorted
/// for stable batch order.
pub fn collect_audio_files_from_folder(folder_path: &Path) -> Vec<PathBuf> {
    let mut pending_directories = vec![folder_path.to_path_buf()];
    let mut tracks = Vec::new();

    while let Some(directory) = pending_directories.pop() {
        let entries = match std::fs::read_dir(&directory) {
            Ok(entries) => entries,
            Err(err) => {
                debug!("Failed to read directory {}: {}", directory.display(), err);
                continue;
            }
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    debug!(
                        "Failed to read a directory entry in {}: {}",
                        directory.display(),
                        err
                    );
                    continue;
                }
            };

            let path = entry.path();
            let file_type = match entry.file_type() {
                Ok(file_type) => file_type,
                Err(err) => {
                    debug!("Failed to inspect {}: {}", path.display(), err);
                    continue;
                }
            };

            if file_type.is_dir() {
                pending_directories.push(path);
                continue;
            }

            if file_type.is_file() && is_supported_audio_file(&path) {
                tracks.push(path);
            }
        }
    }

    tracks.sort_unstable();
    tracks
}

/// Conventional cover image next to the audio files of a directory, if any.
pub fn folder_cover_for_directory(directory: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(directory).ok()?;
    let mut candidates: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| is_cover_file(path))
        .collect();
    candidates.sort_unstable();
    candidates.into_iter().next()
}

fn is_cover_file(path: &Path) -> bool {
    let stem_matches = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .map(|stem| {
            COVER_FILE_STEMS
                .iter()
                .any(|candidate| stem.eq_ignore_ascii_case(candidate))
        })
        .unwrap_or(false);
    let extension_matches = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            COVER_FILE_EXTENSIONS
                .iter()
                .any(|candidate| ext.eq_ignore_ascii_case(candidate))
        })
        .unwrap_or(false);
    stem_matches && extension_matches
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_audio_file_matching_is_case_insensitive() {
        assert!(is_supported_audio_file(Path::new("/music/a.mp3")));
        assert!(is_supported_audio_file(Path::new("/music/a.FLAC")));
        assert!(!is_supported_audio_file(Path::new("/music/a.txt")));
        assert!(!is_supported_audio_file(Path::new("/music/noextension")));
    }

    #[test]
    fn test_cover_file_matching() {
        assert!(is_cover_file(Path::new("/music/al1/cover.jpg")));
        assert!(is_cover_file(Path::new("/music/al1/Folder.PNG")));
        assert!(is_cover_file(Path::new("/music/al1/front.jpeg")));
        assert!(!is_cover_file(Path::new("/music/al1/back.jpg")));
        assert!(!is_cover_file(Path::new("/music/al1/cover.gif")));
    }

    #[test]
    fn test_collect_audio_files_walks_nested_folders() {
        let root = std::env::temp_dir().join(format!(
            "tunedex-discovery-test-{}",
            std::process::id()
        ));
        let nested = root.join("artist").join("album");
        std::fs::create_dir_all(&nested).expect("test directories should create");
        std::fs::write(root.join("top.mp3"), b"x").expect("file should write");
        std::fs::write(nested.join("deep.flac"), b"x").expect("file should write");
        std::fs::write(nested.join("notes.txt"), b"x").expect("file should write");

        let files = collect_audio_files_from_folder(&root);
        assert_eq!(files.len(), 2);
        assert!(files.iter().any(|path| path.ends_with("top.mp3")));
        assert!(files.iter().any(|path| path.ends_with("deep.flac")));

        std::fs::remove_dir_all(&root).expect("test directories should clean up");
    }

    #[test]
    fn test_folder_cover_prefers_existing_candidate() {
        let root = std::env::temp_dir().join(format!(
            "tunedex-cover-test-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&root).expect("test directory should create");
        std::fs::write(root.join("cover.jpg"), b"x").expect("file should write");
        std::fs::write(root.join("track.mp3"), b"x").expect("file should write");

        let cover = folder_cover_for_directory(&root);
        assert!(cover.is_some_and(|path| path.ends_with("cover.jpg")));

        std::fs::remove_dir_all(&root).expect("test directory should clean up");
    }
}
