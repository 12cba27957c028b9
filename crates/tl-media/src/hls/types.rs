//! HLS playlist types.

use serde::{Deserialize, Serialize};

/// Nominal duration of every transcoded segment, in seconds.
pub const SEGMENT_DURATION_SECS: u32 = 5;

/// Playlist protocol version written to `#EXT-X-VERSION`.
pub const PLAYLIST_VERSION: u32 = 3;

const SEGMENT_PREFIX: &str = "segment-";
const SEGMENT_SUFFIX: &str = ".ts";

/// File name of the segment produced from chunk `index`: `segment-{index}.ts`.
pub fn segment_file_name(index: u64) -> String {
    format!("{SEGMENT_PREFIX}{index}{SEGMENT_SUFFIX}")
}

/// Extract the chunk index from a segment URI such as `segment-12.ts`.
///
/// Only the last path component is inspected, so `media/segment-3.ts` also
/// yields 3. Returns `None` for URIs that do not follow the convention.
pub fn parse_segment_index(uri: &str) -> Option<u64> {
    let name = uri.rsplit('/').next()?;
    let digits = name.strip_prefix(SEGMENT_PREFIX)?.strip_suffix(SEGMENT_SUFFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Target duration advertised for segments of `segment_secs` nominal length.
///
/// One second of headroom above the nominal duration tolerates encoder
/// overruns (5 s segments advertise 6).
pub fn target_duration_for(segment_secs: u32) -> u32 {
    segment_secs + 1
}

/// One segment reference in a media playlist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistEntry {
    /// Chunk index the segment was produced from.
    pub index: u64,
    /// URI as written in the playlist (relative to the playlist).
    pub uri: String,
    /// Value of the `#EXTINF` duration tag.
    pub duration: f64,
}

impl PlaylistEntry {
    /// Entry for the segment of chunk `index` using the naming convention and
    /// the nominal duration.
    pub fn for_index(index: u64) -> Self {
        Self {
            index,
            uri: segment_file_name(index),
            duration: f64::from(SEGMENT_DURATION_SECS),
        }
    }
}

/// A session's media playlist.
///
/// Entries are kept sorted ascending by [`PlaylistEntry::index`] with at most
/// one entry per index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaPlaylist {
    /// `#EXT-X-TARGETDURATION` value in whole seconds.
    pub target_duration: u32,
    /// `#EXT-X-MEDIA-SEQUENCE` value.
    pub media_sequence: u64,
    /// Segment references in play order.
    pub entries: Vec<PlaylistEntry>,
    /// Whether `#EXT-X-ENDLIST` is present.
    pub ended: bool,
}

impl Default for MediaPlaylist {
    fn default() -> Self {
        Self {
            target_duration: target_duration_for(SEGMENT_DURATION_SECS),
            media_sequence: 0,
            entries: Vec::new(),
            ended: false,
        }
    }
}

impl MediaPlaylist {
    /// Insert an entry, replacing any entry with the same index, and keep the
    /// list in ascending index order.
    ///
    /// Returns `true` if an existing entry was replaced.
    pub fn upsert(&mut self, entry: PlaylistEntry) -> bool {
        match self.entries.binary_search_by_key(&entry.index, |e| e.index) {
            Ok(pos) => {
                self.entries[pos] = entry;
                true
            }
            Err(pos) => {
                self.entries.insert(pos, entry);
                false
            }
        }
    }

    /// Sort entries by index and drop duplicates, keeping the last occurrence
    /// of each index.
    pub fn normalize(&mut self) {
        // Stable sort keeps file order among equal indices; reverse so dedup
        // retains the entry written last.
        self.entries.reverse();
        self.entries.sort_by_key(|e| e.index);
        self.entries.dedup_by_key(|e| e.index);
    }

    /// Recompute the target duration from the nominal segment duration.
    pub fn recompute_target_duration(&mut self) {
        self.target_duration = target_duration_for(SEGMENT_DURATION_SECS);
    }

    /// Whether a segment for `index` is listed.
    pub fn contains(&self, index: u64) -> bool {
        self.entries
            .binary_search_by_key(&index, |e| e.index)
            .is_ok()
    }

    /// Indices of all listed segments, in play order.
    pub fn indices(&self) -> Vec<u64> {
        self.entries.iter().map(|e| e.index).collect()
    }
}
