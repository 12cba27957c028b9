//! tl-media: HLS media playlist model, parsing and serialization.
//!
//! # Modules
//!
//! - [`hls`] - session manifest (`playlist.m3u8`) as a structured, ordered
//!   list of segment entries, with a parser for the on-disk text and a
//!   generator producing the exact on-disk format

pub mod hls;

// Re-export commonly used items at the crate root.
pub use hls::{
    generate_media_playlist, parse_media_playlist, parse_segment_index, segment_file_name,
    target_duration_for, MediaPlaylist, PlaylistEntry, SEGMENT_DURATION_SECS,
};
