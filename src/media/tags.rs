//! Reading and writing metadata embedded in audio files.

use lofty::config::WriteOptions;
use lofty::file::{AudioFile, TaggedFile, TaggedFileExt};
use lofty::probe::Probe;
use lofty::tag::{Accessor, ItemKey, Tag};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// The subset of embedded metadata the library cares about.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AudioTags {
    pub identity: Option<String>,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub release_id: Option<String>,
    pub secondary_code: Option<String>,
    pub disc_number: Option<u32>,
    pub track_number: Option<u32>,
    pub total_tracks: Option<u32>,
}

#[derive(Debug, Error)]
pub enum TagError {
    #[error("failed to read tags from {path:?}: {message}")]
    Read { path: PathBuf, message: String },

    #[error("failed to write tags to {path:?}: {message}")]
    Write { path: PathBuf, message: String },
}

/// Tag I/O capability.
///
/// A file that parses but carries no identity reads as `Ok(None)`; a file
/// that cannot be parsed at all is an error.
pub trait TagIo: Send + Sync {
    fn read_tags(&self, path: &Path) -> Result<AudioTags, TagError>;

    fn read_identity(&self, path: &Path) -> Result<Option<String>, TagError> {
        Ok(self.read_tags(path)?.identity)
    }

    fn write_identity(&self, path: &Path, identity: &str) -> Result<(), TagError>;
}

/// [`TagIo`] over ID3v2, Vorbis comments, MP4 atoms and APE tags via `lofty`.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoftyTagIo;

impl LoftyTagIo {
    fn open(path: &Path) -> Result<TaggedFile, TagError> {
        let read_err = |e: lofty::error::LoftyError| TagError::Read {
            path: path.to_path_buf(),
            message: e.to_string(),
        };
        Probe::open(path)
            .map_err(read_err)?
            .guess_file_type()
            .map_err(|e| TagError::Read {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?
            .read()
            .map_err(read_err)
    }

    fn identity_of(tag: &Tag) -> Option<String> {
        tag.get_string(&ItemKey::MusicBrainzRecordingId)
            .or_else(|| tag.get_string(&ItemKey::Unknown("MUSICBRAINZ_TRACKID".to_string())))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    fn text(value: Option<std::borrow::Cow<'_, str>>) -> Option<String> {
        value
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
}

impl TagIo for LoftyTagIo {
    fn read_tags(&self, path: &Path) -> Result<AudioTags, TagError> {
        let tagged_file = Self::open(path)?;
        let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) else {
            debug!("No tags in {:?}", path);
            return Ok(AudioTags::default());
        };

        Ok(AudioTags {
            identity: Self::identity_of(tag),
            title: Self::text(tag.title()),
            artist: Self::text(tag.artist()),
            album: Self::text(tag.album()),
            release_id: tag
                .get_string(&ItemKey::MusicBrainzReleaseId)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            secondary_code: tag.get_string(&ItemKey::Isrc).map(str::to_string),
            disc_number: tag.disk(),
            track_number: tag.track(),
            total_tracks: tag.track_total(),
        })
    }

    fn write_identity(&self, path: &Path, identity: &str) -> Result<(), TagError> {
        let mut tagged_file = Self::open(path)?;
        if tagged_file.primary_tag().is_none() {
            let tag_type = tagged_file.primary_tag_type();
            tagged_file.insert_tag(Tag::new(tag_type));
        }
        let Some(tag) = tagged_file.primary_tag_mut() else {
            return Err(TagError::Write {
                path: path.to_path_buf(),
                message: "format does not support tags".to_string(),
            });
        };
        set_identity(tag, identity, path)?;

        tagged_file
            .save_to_path(path, WriteOptions::default())
            .map_err(|e| TagError::Write {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
    }
}

/// Fails when the tag format has no slot for a recording id (e.g. ID3v1).
fn set_identity(tag: &mut Tag, identity: &str, path: &Path) -> Result<(), TagError> {
    if tag.insert_text(ItemKey::MusicBrainzRecordingId, identity.to_string()) {
        Ok(())
    } else {
        Err(TagError::Write {
            path: path.to_path_buf(),
            message: format!("{:?} tags cannot hold a recording id", tag.tag_type()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lofty::tag::TagType;
    use tempfile::TempDir;

    #[test]
    fn unreadable_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.flac");
        std::fs::write(&path, b"definitely not audio").unwrap();

        let err = LoftyTagIo.read_identity(&path).unwrap_err();
        assert!(matches!(err, TagError::Read { .. }));
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let err = LoftyTagIo
            .write_identity(&dir.path().join("nope.mp3"), "abc")
            .unwrap_err();
        assert!(matches!(err, TagError::Read { .. }));
    }

    #[test]
    fn identity_write_fails_when_tag_has_no_slot() {
        let path = Path::new("track.flac");
        let mut id3v1 = Tag::new(TagType::Id3v1);
        let err = set_identity(&mut id3v1, "rec-1", path).unwrap_err();
        assert!(matches!(err, TagError::Write { .. }));

        let mut vorbis = Tag::new(TagType::VorbisComments);
        set_identity(&mut vorbis, "rec-1", path).unwrap();
        assert_eq!(vorbis.get_string(&ItemKey::MusicBrainzRecordingId), Some("rec-1"));
    }
}
