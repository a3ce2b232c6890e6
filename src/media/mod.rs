//! Collaborators at the edge of the engine: tag I/O, conversion, downloads,
//! metadata lookups and remote playlists, plus the path conventions they
//! share.

pub mod converter;
pub mod downloader;
pub mod metadata;
pub mod paths;
pub mod playlist_source;
pub mod tags;

pub use converter::{ConversionError, ConversionSpec, Converter, FfmpegConverter, OutputFormat};
pub use downloader::{DownloadError, Downloader, SearchFlags, SlskDownloader};
pub use metadata::{
    MetadataError, MetadataProvider, MusicBrainzClient, ReleaseTracklist, TracklistEntry,
};
pub use playlist_source::{
    PlaylistSource, PlaylistSourceError, SourcePlaylist, SourceTrack, SpotifyPlaylistSource,
};
pub use tags::{AudioTags, LoftyTagIo, TagError, TagIo};
