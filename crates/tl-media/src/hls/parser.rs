//! HLS media playlist parsing.
//!
//! Recovers the structured [`MediaPlaylist`] from the text written by
//! [`generate_media_playlist`](super::generate_media_playlist). The logical
//! order is taken from the index embedded in each segment URI, never from
//! the order lines appear in the file.

use tl_core::{Error, Result};

use super::types::{parse_segment_index, MediaPlaylist, PlaylistEntry, SEGMENT_DURATION_SECS};

/// Parse playlist text into a [`MediaPlaylist`] with entries sorted by index.
///
/// Unknown tags are ignored. A segment URI that does not follow the
/// `segment-{index}.ts` convention is an error, as is an `#EXTINF` tag with
/// no URI after it.
pub fn parse_media_playlist(text: &str) -> Result<MediaPlaylist> {
    let mut lines = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty());

    match lines.next() {
        Some("#EXTM3U") => {}
        Some(other) => {
            return Err(Error::Playlist(format!(
                "missing #EXTM3U header, found {other:?}"
            )))
        }
        None => return Err(Error::Playlist("playlist is empty".into())),
    }

    let mut playlist = MediaPlaylist::default();
    let mut pending_duration: Option<f64> = None;

    for line in lines {
        if let Some(value) = line.strip_prefix("#EXT-X-TARGETDURATION:") {
            playlist.target_duration = parse_number(value, "target duration")?;
        } else if let Some(value) = line.strip_prefix("#EXT-X-MEDIA-SEQUENCE:") {
            playlist.media_sequence = parse_number(value, "media sequence")?;
        } else if let Some(value) = line.strip_prefix("#EXTINF:") {
            let duration = value.split(',').next().unwrap_or_default().trim();
            pending_duration = Some(duration.parse().map_err(|_| {
                Error::Playlist(format!("invalid #EXTINF duration {duration:?}"))
            })?);
        } else if line == "#EXT-X-ENDLIST" {
            playlist.ended = true;
        } else if line.starts_with('#') {
            // Other tags carry nothing we rebuild from.
        } else {
            let index = parse_segment_index(line).ok_or_else(|| {
                Error::Playlist(format!("segment URI {line:?} has no chunk index"))
            })?;
            let duration = pending_duration
                .take()
                .unwrap_or(f64::from(SEGMENT_DURATION_SECS));
            playlist.entries.push(PlaylistEntry {
                index,
                uri: line.to_string(),
                duration,
            });
        }
    }

    if pending_duration.is_some() {
        return Err(Error::Playlist("#EXTINF without a segment URI".into()));
    }

    playlist.normalize();
    Ok(playlist)
}

fn parse_number<T: std::str::FromStr>(value: &str, what: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Playlist(format!("invalid {what} {value:?}")))
}
