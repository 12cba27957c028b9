//! HLS media playlist handling for recording sessions.

pub mod parser;
pub mod playlist;
pub mod types;

pub use parser::parse_media_playlist;
pub use playlist::generate_media_playlist;
pub use types::{
    parse_segment_index, segment_file_name, target_duration_for, MediaPlaylist, PlaylistEntry,
    SEGMENT_DURATION_SECS,
};
