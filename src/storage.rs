use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::info;

use crate::decode::{DecodedAudio, MPEG_MIME, OGG_MIME, WAV_MIME};
use crate::error::TtsError;

/// A generated audio file kept on disk. Files are written whole and deleted
/// whole, never rewritten in place.
#[derive(Debug, Clone)]
pub struct SavedAudio {
    pub path: PathBuf,
    pub created: SystemTime,
}

/// Flat-folder persistence for generated audio.
#[derive(Debug, Clone)]
pub struct AudioStore {
    dir: PathBuf,
}

impl AudioStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Writes `audio` under a `<stem>-<timestamp>.<ext>` name, creating the
    /// folder on first use. A same-second collision gets a counter suffix so
    /// an existing file is never overwritten.
    pub fn save(&self, stem: &str, audio: &DecodedAudio) -> Result<PathBuf, TtsError> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir)?;
        }

        let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        let extension = extension_for(audio.mime_type);

        let mut path = self.dir.join(format!("{stem}-{timestamp}.{extension}"));
        let mut counter = 1;
        while path.exists() {
            path = self
                .dir
                .join(format!("{stem}-{timestamp}-{counter}.{extension}"));
            counter += 1;
        }

        fs::write(&path, &audio.bytes)?;
        info!(path = %path.display(), "saved generated audio");

        Ok(path)
    }

    /// All audio files in the folder, oldest first.
    pub fn list(&self) -> Result<Vec<SavedAudio>, TtsError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            // Not every filesystem records a birth time; since these files
            // are never rewritten, the modified time is the same instant.
            let metadata = entry.metadata()?;
            let created = metadata.created().or_else(|_| metadata.modified())?;
            files.push(SavedAudio { path, created });
        }

        files.sort_by_key(|f| f.created);
        Ok(files)
    }

    /// Refuses paths outside the store's folder.
    pub fn delete(&self, path: &Path) -> Result<(), TtsError> {
        if path.parent() != Some(self.dir.as_path()) {
            return Err(TtsError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                format!("{} is not in the audio folder", path.display()),
            )));
        }

        fs::remove_file(path)?;
        info!(path = %path.display(), "deleted saved audio");
        Ok(())
    }
}

fn extension_for(mime_type: &str) -> &'static str {
    match mime_type {
        WAV_MIME => "wav",
        OGG_MIME => "ogg",
        MPEG_MIME => "mp3",
        _ => "bin",
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn audio(bytes: &'static [u8], mime_type: &'static str) -> DecodedAudio {
        DecodedAudio {
            bytes: Bytes::from_static(bytes),
            mime_type,
            duration_secs: None,
        }
    }

    #[test]
    fn save_list_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = AudioStore::new(dir.path().join("audio"));

        let path = store.save("walk-notes", &audio(b"RIFFfake", WAV_MIME)).unwrap();
        assert!(path.exists());
        assert_eq!(path.extension().unwrap(), "wav");
        assert_eq!(fs::read(&path).unwrap(), b"RIFFfake");

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].path, path);

        store.delete(&path).unwrap();
        assert!(!path.exists());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn same_second_saves_get_distinct_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = AudioStore::new(dir.path());

        let first = store.save("note", &audio(b"a", MPEG_MIME)).unwrap();
        let second = store.save("note", &audio(b"b", MPEG_MIME)).unwrap();

        assert_ne!(first, second);
        assert_eq!(fs::read(&first).unwrap(), b"a");
        assert_eq!(fs::read(&second).unwrap(), b"b");
    }

    #[test]
    fn list_reports_when_the_file_was_created() {
        use std::time::Duration;

        let dir = tempfile::tempdir().unwrap();
        let store = AudioStore::new(dir.path());

        // Generous bounds; filesystem timestamps can be coarse.
        let before = SystemTime::now() - Duration::from_secs(5);
        store.save("note", &audio(b"a", WAV_MIME)).unwrap();
        let after = SystemTime::now() + Duration::from_secs(5);

        let created = store.list().unwrap()[0].created;
        assert!(created >= before && created <= after);
    }

    #[test]
    fn delete_outside_the_folder_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let store = AudioStore::new(dir.path().join("audio"));

        let outside = dir.path().join("precious.wav");
        fs::write(&outside, b"keep me").unwrap();

        assert!(store.delete(&outside).is_err());
        assert!(outside.exists());
    }

    #[test]
    fn listing_a_missing_folder_is_empty_not_an_error() {
        let store = AudioStore::new("/nonexistent/audio-folder");
        assert!(store.list().unwrap().is_empty());
    }
}
