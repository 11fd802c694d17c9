//! Sentinel-aware content accumulator.
//!
//! Content fragments arrive with no alignment to sentinel boundaries. The
//! accumulator holds back the longest suffix that could still become a
//! sentinel, swallows everything inside a tool section, and only releases
//! text that is known to be sentinel-free.

use tracing::{debug, warn};

use crate::markers::{self, Marker};

/// What to do with an unresolved partial sentinel when the stream ends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrailingPartialPolicy {
    /// Emit the held-back bytes as ordinary text.
    #[default]
    FlushAsText,
    /// Discard the held-back bytes.
    Drop,
}

/// Classified output of the accumulator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Segment {
    /// Visible text, guaranteed free of sentinel bytes.
    Text(String),
    /// A begin sentinel opened a tool section.
    SectionBegin,
    /// An end sentinel closed the open tool section.
    SectionEnd,
}

/// Per-request sentinel state machine.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    pending_tail: String,
    in_tool_section: bool,
    swallowed_bytes: usize,
    trailing: TrailingPartialPolicy,
}

impl StreamAccumulator {
    pub fn new(trailing: TrailingPartialPolicy) -> Self {
        Self {
            trailing,
            ..Self::default()
        }
    }

    /// Whether a begin sentinel has been seen without its matching end.
    pub fn in_tool_section(&self) -> bool {
        self.in_tool_section
    }

    /// Bytes currently held back as a possible sentinel prefix.
    pub fn pending_tail(&self) -> &str {
        &self.pending_tail
    }

    /// Total tool-section payload bytes discarded so far.
    pub fn swallowed_bytes(&self) -> usize {
        self.swallowed_bytes
    }

    /// Feeds one content fragment and returns the segments it resolves.
    pub fn push(&mut self, fragment: &str) -> Vec<Segment> {
        let mut out = Vec::new();
        if fragment.is_empty() {
            return out;
        }
        self.pending_tail.push_str(fragment);

        while let Some(hit) = markers::first_marker(&self.pending_tail) {
            let before: String = self.pending_tail.drain(..hit.offset).collect();
            self.release(before, &mut out);
            self.pending_tail.drain(..hit.marker.byte_len());

            match (hit.marker, self.in_tool_section) {
                (Marker::ToolBegin, false) => {
                    self.in_tool_section = true;
                    out.push(Segment::SectionBegin);
                }
                (Marker::ToolEnd, true) => {
                    self.in_tool_section = false;
                    out.push(Segment::SectionEnd);
                }
                (marker, in_section) => {
                    debug!(?marker, in_section, "ignoring redundant tool section marker");
                }
            }
        }

        let hold = markers::partial_marker_suffix_len(&self.pending_tail);
        let resolved = self.pending_tail.len() - hold;
        if resolved > 0 {
            let text: String = self.pending_tail.drain(..resolved).collect();
            self.release(text, &mut out);
        }
        out
    }

    /// Resolves whatever is still held back at end of stream.
    pub fn finish(&mut self) -> Vec<Segment> {
        let mut out = Vec::new();
        let tail = std::mem::take(&mut self.pending_tail);
        if self.in_tool_section {
            warn!(
                swallowed_bytes = self.swallowed_bytes + tail.len(),
                "stream ended inside an unterminated tool section"
            );
            self.swallowed_bytes += tail.len();
            return out;
        }
        match self.trailing {
            TrailingPartialPolicy::FlushAsText => self.release(tail, &mut out),
            TrailingPartialPolicy::Drop => {
                if !tail.is_empty() {
                    debug!(bytes = tail.len(), "dropping unresolved partial marker");
                }
            }
        }
        out
    }

    fn release(&mut self, text: String, out: &mut Vec<Segment>) {
        if text.is_empty() {
            return;
        }
        if self.in_tool_section {
            self.swallowed_bytes += text.len();
        } else {
            out.push(Segment::Text(text));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markers::{TOOL_BEGIN, TOOL_END};

    fn feed(acc: &mut StreamAccumulator, fragments: &[&str]) -> Vec<Segment> {
        let mut out = Vec::new();
        for fragment in fragments {
            out.extend(acc.push(fragment));
        }
        out.extend(acc.finish());
        out
    }

    fn text(s: &str) -> Segment {
        Segment::Text(s.to_string())
    }

    fn visible(segments: &[Segment]) -> String {
        segments
            .iter()
            .filter_map(|s| match s {
                Segment::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn plain_fragment_passes_through_unchanged() {
        let mut acc = StreamAccumulator::default();
        assert_eq!(acc.push("Hello, how can I help you?"), vec![text("Hello, how can I help you?")]);
        assert!(!acc.in_tool_section());
        assert!(acc.pending_tail().is_empty());
    }

    #[test]
    fn empty_fragment_produces_nothing() {
        let mut acc = StreamAccumulator::default();
        assert!(acc.push("").is_empty());
        assert!(acc.finish().is_empty());
    }

    #[test]
    fn fragments_are_emitted_one_to_one() {
        let mut acc = StreamAccumulator::default();
        assert_eq!(
            feed(&mut acc, &["Hello ", "world"]),
            vec![text("Hello "), text("world")]
        );
    }

    #[test]
    fn inline_section_is_removed_from_visible_text() {
        let mut acc = StreamAccumulator::default();
        let out = feed(
            &mut acc,
            &["text <|tool_calls_section_begin|> payload <|tool_calls_section_end|> after"],
        );
        assert_eq!(
            out,
            vec![
                text("text "),
                Segment::SectionBegin,
                Segment::SectionEnd,
                text(" after"),
            ]
        );
        assert_eq!(acc.swallowed_bytes(), " payload ".len());
    }

    #[test]
    fn sentinel_split_across_fragments_matches_unsplit_delivery() {
        let whole = format!("abc{TOOL_BEGIN}payload{TOOL_END}def");
        let mut unsplit = StreamAccumulator::default();
        let expected = feed(&mut unsplit, &[whole.as_str()]);

        let mut split = StreamAccumulator::default();
        let first = split.push("abc<|tool_calls_sec");
        assert_eq!(first, vec![text("abc")]);
        assert_eq!(split.pending_tail(), "<|tool_calls_sec");
        let mut out = first;
        out.extend(split.push("tion_begin|>payload<|tool_calls_section_end|>def"));
        out.extend(split.finish());

        assert_eq!(out, expected);
        assert_eq!(
            out,
            vec![text("abc"), Segment::SectionBegin, Segment::SectionEnd, text("def")]
        );
    }

    #[test]
    fn every_split_point_yields_the_same_visible_text() {
        let whole = format!("before {TOOL_BEGIN}{{\"a\":1}}{TOOL_END} after <b>");
        for cut in 1..whole.len() {
            if !whole.is_char_boundary(cut) {
                continue;
            }
            let mut acc = StreamAccumulator::default();
            let out = feed(&mut acc, &[&whole[..cut], &whole[cut..]]);
            assert_eq!(visible(&out), "before  after <b>", "cut at {cut}");
            assert!(out.contains(&Segment::SectionBegin));
            assert!(out.contains(&Segment::SectionEnd));
        }
    }

    #[test]
    fn payload_split_over_many_chunks_never_leaks() {
        let mut acc = StreamAccumulator::default();
        let out = feed(
            &mut acc,
            &[
                "hi ",
                TOOL_BEGIN,
                "{\"path\":",
                "\"/etc/",
                "hosts\"}",
                "<|tool_calls_",
                "section_end|>",
                " bye",
            ],
        );
        let shown = visible(&out);
        assert_eq!(shown, "hi  bye");
        assert!(!shown.contains("hosts"));
    }

    #[test]
    fn adjacent_sentinels_toggle_without_text() {
        let mut acc = StreamAccumulator::default();
        let out = feed(&mut acc, &[&format!("{TOOL_BEGIN}{TOOL_END}")]);
        assert_eq!(out, vec![Segment::SectionBegin, Segment::SectionEnd]);
        assert!(!acc.in_tool_section());
    }

    #[test]
    fn duplicate_begins_collapse() {
        let mut acc = StreamAccumulator::default();
        let out = feed(
            &mut acc,
            &[&format!("a{TOOL_BEGIN}x{TOOL_BEGIN}y{TOOL_END}b")],
        );
        assert_eq!(
            out,
            vec![text("a"), Segment::SectionBegin, Segment::SectionEnd, text("b")]
        );
    }

    #[test]
    fn stray_end_outside_section_is_dropped() {
        let mut acc = StreamAccumulator::default();
        let out = feed(&mut acc, &[&format!("a{TOOL_END}b")]);
        assert_eq!(out, vec![text("a"), text("b")]);
        assert!(!acc.in_tool_section());
    }

    #[test]
    fn unmatched_partial_at_end_is_flushed_as_text_by_default() {
        let mut acc = StreamAccumulator::default();
        assert_eq!(acc.push("tail <|tool_"), vec![text("tail ")]);
        assert_eq!(acc.finish(), vec![text("<|tool_")]);
    }

    #[test]
    fn unmatched_partial_can_be_dropped() {
        let mut acc = StreamAccumulator::new(TrailingPartialPolicy::Drop);
        assert_eq!(acc.push("tail <|tool_"), vec![text("tail ")]);
        assert!(acc.finish().is_empty());
    }

    #[test]
    fn unterminated_section_swallows_remaining_content() {
        let mut acc = StreamAccumulator::default();
        let out = feed(&mut acc, &["ok ", TOOL_BEGIN, "{\"x\":", "1} <|tool_calls"]);
        assert_eq!(out, vec![text("ok "), Segment::SectionBegin]);
        assert!(acc.in_tool_section());
    }

    #[test]
    fn near_miss_marker_is_plain_text() {
        let mut acc = StreamAccumulator::default();
        let out = feed(
            &mut acc,
            &["<|other_section_begin|>some content<|other_section_end|>"],
        );
        assert_eq!(
            visible(&out),
            "<|other_section_begin|>some content<|other_section_end|>"
        );
    }
}
