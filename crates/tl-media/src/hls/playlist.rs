//! HLS media playlist generation.

use super::types::{MediaPlaylist, PLAYLIST_VERSION};

/// Generate the on-disk text of a session playlist.
///
/// Output includes:
/// - `#EXTM3U` header
/// - `#EXT-X-VERSION:3`
/// - `#EXT-X-TARGETDURATION`
/// - `#EXT-X-MEDIA-SEQUENCE`
/// - `#EXTINF` + URI for each entry, in the order stored
/// - `#EXT-X-ENDLIST` only when the playlist has been finalized
pub fn generate_media_playlist(playlist: &MediaPlaylist) -> String {
    let mut out = format!(
        "#EXTM3U\n#EXT-X-VERSION:{PLAYLIST_VERSION}\n#EXT-X-TARGETDURATION:{}\n#EXT-X-MEDIA-SEQUENCE:{}\n",
        playlist.target_duration, playlist.media_sequence
    );

    for entry in &playlist.entries {
        out.push_str(&format!("#EXTINF:{:.1},\n{}\n", entry.duration, entry.uri));
    }

    if playlist.ended {
        out.push_str("#EXT-X-ENDLIST\n");
    }

    out
}
