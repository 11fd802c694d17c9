//! Inline tool-section sentinels and a stateless scanner for them.
//!
//! Some backends embed tool invocations inside the text stream, bracketed by
//! fixed literals instead of structured fields. Matching is byte-exact: a
//! different bracketed tag that merely shares words is never a sentinel.

/// Opens an inline tool-call section.
pub const TOOL_BEGIN: &str = "<|tool_calls_section_begin|>";
/// Closes an inline tool-call section.
pub const TOOL_END: &str = "<|tool_calls_section_end|>";

const MARKERS: [Marker; 2] = [Marker::ToolBegin, Marker::ToolEnd];

/// One of the two sentinel literals.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Marker {
    ToolBegin,
    ToolEnd,
}

impl Marker {
    /// Returns the wire literal for this marker.
    pub fn literal(self) -> &'static str {
        match self {
            Self::ToolBegin => TOOL_BEGIN,
            Self::ToolEnd => TOOL_END,
        }
    }

    pub fn byte_len(self) -> usize {
        self.literal().len()
    }
}

/// A sentinel occurrence inside a fragment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MarkerHit {
    pub marker: Marker,
    /// Byte offset of the first byte of the sentinel.
    pub offset: usize,
}

impl MarkerHit {
    /// Byte offset just past the sentinel.
    pub fn end(&self) -> usize {
        self.offset + self.marker.byte_len()
    }
}

/// Returns `true` if `text` contains `marker` byte-for-byte.
pub fn contains(text: &str, marker: Marker) -> bool {
    text.contains(marker.literal())
}

/// Returns `true` if `text` contains either sentinel.
pub fn contains_marker(text: &str) -> bool {
    MARKERS.iter().any(|marker| contains(text, *marker))
}

/// Reports every sentinel occurrence in `text`, ordered by offset.
pub fn scan(text: &str) -> Vec<MarkerHit> {
    let mut hits: Vec<MarkerHit> = MARKERS
        .iter()
        .flat_map(|marker| {
            text.match_indices(marker.literal())
                .map(move |(offset, _)| MarkerHit {
                    marker: *marker,
                    offset,
                })
        })
        .collect();
    hits.sort_by_key(|hit| hit.offset);
    hits
}

/// Returns the earliest sentinel occurrence in `text`, if any.
pub fn first_marker(text: &str) -> Option<MarkerHit> {
    MARKERS
        .iter()
        .filter_map(|marker| {
            text.find(marker.literal()).map(|offset| MarkerHit {
                marker: *marker,
                offset,
            })
        })
        .min_by_key(|hit| hit.offset)
}

/// Length of the longest suffix of `text` that is a proper prefix of a
/// sentinel, i.e. the bytes that could still grow into a sentinel once more
/// input arrives.
///
/// Sentinels are ASCII and start with `<`, so `text.len() - n` is always a
/// char boundary.
pub fn partial_marker_suffix_len(text: &str) -> usize {
    let bytes = text.as_bytes();
    let longest = MARKERS
        .iter()
        .map(|marker| marker.byte_len() - 1)
        .max()
        .unwrap_or(0)
        .min(bytes.len());
    (1..=longest)
        .rev()
        .find(|&n| {
            let suffix = &bytes[bytes.len() - n..];
            MARKERS.iter().any(|marker| {
                marker.byte_len() > n && marker.literal().as_bytes().starts_with(suffix)
            })
        })
        .unwrap_or(0)
}
