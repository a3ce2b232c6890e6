//! Path conventions shared by the library, the device and the catalog.

use lazy_static::lazy_static;
use regex::Regex;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// File extensions treated as audio when walking a tree.
pub const SUPPORTED_EXTENSIONS: &[&str] =
    &["flac", "mp3", "m4a", "ogg", "opus", "wav", "alac", "ape"];

pub const UNKNOWN_ARTIST: &str = "Unknown Artist";
pub const UNKNOWN_ALBUM: &str = "Unknown Album";
pub const UNKNOWN_TITLE: &str = "Unknown Title";

lazy_static! {
    static ref UNSAFE_CHARS: Regex = Regex::new(r#"[\\/*?:"<>|]"#).unwrap();
}

/// Makes `name` usable as a single path component on FAT-style filesystems.
pub fn sanitize_component(name: &str, fallback: &str) -> String {
    let replaced = UNSAFE_CHARS.replace_all(name, "_");
    let trimmed = replaced.trim().trim_end_matches('.').trim_end();
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}

/// `SafeArtist/SafeAlbum/SafeTitle.ext`, relative to whichever root it lands under.
pub fn layout_relative_path(artist: &str, album: &str, title: &str, extension: &str) -> PathBuf {
    let mut path = PathBuf::from(sanitize_component(artist, UNKNOWN_ARTIST));
    path.push(sanitize_component(album, UNKNOWN_ALBUM));
    path.push(format!(
        "{}.{}",
        sanitize_component(title, UNKNOWN_TITLE),
        extension.trim_start_matches('.')
    ));
    path
}

/// Canonical textual form for stored paths: forward slashes, no `.` or empty
/// segments, `..` folded into its parent where possible.
pub fn normalize_path_str(raw: &str) -> String {
    let unified = raw.trim().replace('\\', "/");
    let absolute = unified.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => match segments.last() {
                Some(last) if *last != ".." => {
                    segments.pop();
                }
                _ if absolute => {}
                _ => segments.push(".."),
            },
            other => segments.push(other),
        }
    }
    let joined = segments.join("/");
    if absolute {
        format!("/{}", joined)
    } else {
        joined
    }
}

pub fn normalize_path(path: &Path) -> String {
    normalize_path_str(&path.to_string_lossy())
}

/// Final component of a stored path, with stray surrounding quotes removed.
pub fn file_name_of(raw: &str) -> String {
    let normalized = normalize_path_str(raw.trim().trim_matches(|c| c == '"' || c == '\''));
    normalized
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Identity comparison used when checking embedded tags.
pub fn same_identity(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

pub fn lowercase_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

pub fn is_supported_audio(path: &Path) -> bool {
    lowercase_extension(path)
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Every supported audio file under `root` at least `min_size` bytes long,
/// in a stable order. Unreadable entries are skipped.
pub fn find_audio_files(root: &Path, min_size: u64) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| is_supported_audio(entry.path()))
        .filter(|entry| {
            entry
                .metadata()
                .map(|m| m.len() >= min_size)
                .unwrap_or(false)
        })
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}

/// `dest` for `n == 0`, otherwise its `"stem (n).ext"` sibling.
pub fn numbered_sibling(dest: &Path, n: u32) -> PathBuf {
    if n == 0 {
        return dest.to_path_buf();
    }
    let stem = dest
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = dest
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let parent = dest.parent().map(Path::to_path_buf).unwrap_or_default();
    parent.join(format!("{} ({}){}", stem, n, extension))
}

/// `dest` if free, otherwise the first `"stem (n).ext"` sibling that is.
pub fn non_colliding_path(dest: &Path) -> PathBuf {
    (0..)
        .map(|n| numbered_sibling(dest, n))
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| dest.to_path_buf())
}
