//! fMP4 box parsing and segment classification (§4.3).
//!
//! Converts the encoder's output byte stream into a sequence of complete
//! boxes and classifies them for the init cache, the fan-out hub, and
//! the snapshot writer's keyframe heuristic.

mod parser;

pub use parser::{BoxParser, ParsedBox};

use bytes::Bytes;

use crate::protocol_constants::{
    BOX_TYPE_FTYP, BOX_TYPE_MDAT, BOX_TYPE_MOOF, BOX_TYPE_MOOV, EARLY_KEYFRAME_COUNT,
    EARLY_KEYFRAME_SIZE_FLOOR, FRAGMENT_SIZE_HISTORY, KEYFRAME_SIZE_RATIO,
};

/// What a parsed box should be done with once classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoxDisposition {
    /// Part of the init segment; buffered, not yet forwarded to the hub.
    InitPending,
    /// Init segment just completed; forward this box and notify the hub once.
    InitComplete,
    /// Forward to the hub as ordinary media.
    Media,
}

/// Output of classifying one parsed box.
pub struct ClassifiedBox {
    pub bytes: Bytes,
    pub disposition: BoxDisposition,
    /// Set when this box completes a candidate keyframe fragment.
    pub keyframe_fragment: Option<Bytes>,
}

/// Segments the encoder's box stream into init/media, and tracks the
/// adaptive keyframe heuristic for the snapshot writer.
pub struct Segmenter {
    init_ftyp: Option<Bytes>,
    init_moov: Option<Bytes>,
    init_complete: bool,
    init_segment: Option<Bytes>,

    candidate: Option<Vec<u8>>,
    fragment_count: usize,
    recent_sizes: std::collections::VecDeque<usize>,
    largest_seen: usize,
}

impl Default for Segmenter {
    fn default() -> Self {
        Self::new()
    }
}

impl Segmenter {
    pub fn new() -> Self {
        Self {
            init_ftyp: None,
            init_moov: None,
            init_complete: false,
            init_segment: None,
            candidate: None,
            fragment_count: 0,
            recent_sizes: std::collections::VecDeque::with_capacity(FRAGMENT_SIZE_HISTORY),
            largest_seen: 0,
        }
    }

    /// The cached init segment (`ftyp` + `moov`), once captured.
    pub fn init_segment(&self) -> Option<Bytes> {
        self.init_segment.clone()
    }

    /// Classifies one parsed box, updating internal keyframe-tracking state.
    pub fn classify(&mut self, parsed: &ParsedBox) -> ClassifiedBox {
        let box_type = parsed.box_type;
        let bytes = parsed.bytes.clone();

        let disposition = if !self.init_complete && box_type == BOX_TYPE_FTYP && self.init_ftyp.is_none() {
            self.init_ftyp = Some(bytes.clone());
            BoxDisposition::InitPending
        } else if !self.init_complete && box_type == BOX_TYPE_MOOV && self.init_ftyp.is_some() && self.init_moov.is_none() {
            self.init_moov = Some(bytes.clone());
            self.init_complete = true;
            let mut segment = Vec::with_capacity(
                self.init_ftyp.as_ref().unwrap().len() + bytes.len(),
            );
            segment.extend_from_slice(self.init_ftyp.as_ref().unwrap());
            segment.extend_from_slice(&bytes);
            self.init_segment = Some(Bytes::from(segment));
            BoxDisposition::InitComplete
        } else {
            BoxDisposition::Media
        };

        let keyframe_fragment = self.accumulate_for_snapshot(box_type, &bytes);

        ClassifiedBox {
            bytes,
            disposition,
            keyframe_fragment,
        }
    }

    fn accumulate_for_snapshot(&mut self, box_type: [u8; 4], bytes: &Bytes) -> Option<Bytes> {
        if box_type == BOX_TYPE_MOOF {
            // A `moof` without a prior `mdat` resets any open candidate.
            self.candidate = Some(bytes.to_vec());
            self.fragment_count += 1;
            None
        } else if box_type == BOX_TYPE_MDAT {
            let Some(mut candidate) = self.candidate.take() else {
                // `mdat` without a preceding `moof`: forwarded for live
                // delivery elsewhere, ignored by the snapshot path.
                return None;
            };
            candidate.extend_from_slice(bytes);
            let size = candidate.len();

            self.recent_sizes.push_back(size);
            if self.recent_sizes.len() > FRAGMENT_SIZE_HISTORY {
                self.recent_sizes.pop_front();
            }
            self.largest_seen = self.largest_seen.max(size);

            let is_keyframe = (self.fragment_count < EARLY_KEYFRAME_COUNT && size > EARLY_KEYFRAME_SIZE_FLOOR)
                || (self.largest_seen > 0 && size as f64 >= self.largest_seen as f64 * KEYFRAME_SIZE_RATIO);

            if is_keyframe {
                Some(Bytes::from(candidate))
            } else {
                None
            }
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxed(box_type: [u8; 4], body: &[u8]) -> ParsedBox {
        let mut data = Vec::new();
        data.extend_from_slice(&((body.len() + 8) as u32).to_be_bytes());
        data.extend_from_slice(&box_type);
        data.extend_from_slice(body);
        ParsedBox {
            box_type,
            bytes: Bytes::from(data),
        }
    }

    #[test]
    fn ftyp_then_moov_completes_init_segment() {
        let mut seg = Segmenter::new();
        let ftyp = boxed(BOX_TYPE_FTYP, b"isom");
        let moov = boxed(BOX_TYPE_MOOV, b"");

        let first = seg.classify(&ftyp);
        assert_eq!(first.disposition, BoxDisposition::InitPending);
        assert!(seg.init_segment().is_none());

        let second = seg.classify(&moov);
        assert_eq!(second.disposition, BoxDisposition::InitComplete);
        let init = seg.init_segment().unwrap();
        assert_eq!(init.len(), ftyp.bytes.len() + moov.bytes.len());
    }

    #[test]
    fn boxes_after_init_complete_are_media() {
        let mut seg = Segmenter::new();
        seg.classify(&boxed(BOX_TYPE_FTYP, b"isom"));
        seg.classify(&boxed(BOX_TYPE_MOOV, b""));

        let moof = seg.classify(&boxed(BOX_TYPE_MOOF, b"frag"));
        assert_eq!(moof.disposition, BoxDisposition::Media);
    }

    #[test]
    fn early_large_fragment_is_tagged_keyframe() {
        let mut seg = Segmenter::new();
        seg.classify(&boxed(BOX_TYPE_FTYP, b"isom"));
        seg.classify(&boxed(BOX_TYPE_MOOV, b""));

        let big_body = vec![0u8; 300 * 1024 + 1];
        let moof = seg.classify(&boxed(BOX_TYPE_MOOF, b""));
        assert!(moof.keyframe_fragment.is_none());
        let mdat = seg.classify(&boxed(BOX_TYPE_MDAT, &big_body));
        assert!(mdat.keyframe_fragment.is_some());
    }

    #[test]
    fn small_fragment_after_early_window_is_not_keyframe_unless_near_largest() {
        let mut seg = Segmenter::new();
        seg.classify(&boxed(BOX_TYPE_FTYP, b"isom"));
        seg.classify(&boxed(BOX_TYPE_MOOV, b""));

        // Push fragment_count past EARLY_KEYFRAME_COUNT with small fragments.
        for _ in 0..EARLY_KEYFRAME_COUNT + 1 {
            seg.classify(&boxed(BOX_TYPE_MOOF, b""));
            seg.classify(&boxed(BOX_TYPE_MDAT, &vec![0u8; 100]));
        }

        seg.classify(&boxed(BOX_TYPE_MOOF, b""));
        let small = seg.classify(&boxed(BOX_TYPE_MDAT, &vec![0u8; 100]));
        assert!(small.keyframe_fragment.is_some(), "100% of largestSeen (itself) clears the 70% bar");
    }

    #[test]
    fn moof_without_mdat_resets_candidate_to_new_moof() {
        let mut seg = Segmenter::new();
        seg.classify(&boxed(BOX_TYPE_FTYP, b"isom"));
        seg.classify(&boxed(BOX_TYPE_MOOV, b""));

        seg.classify(&boxed(BOX_TYPE_MOOF, b"first"));
        seg.classify(&boxed(BOX_TYPE_MOOF, b"second"));
        let candidate = seg.candidate.as_ref().unwrap();
        assert!(candidate.windows(6).any(|w| w == b"second"));
    }

    #[test]
    fn mdat_without_preceding_moof_is_ignored_by_snapshot_path() {
        let mut seg = Segmenter::new();
        seg.classify(&boxed(BOX_TYPE_FTYP, b"isom"));
        seg.classify(&boxed(BOX_TYPE_MOOV, b""));

        let mdat = seg.classify(&boxed(BOX_TYPE_MDAT, b"orphan"));
        assert_eq!(mdat.disposition, BoxDisposition::Media);
        assert!(mdat.keyframe_fragment.is_none());
    }
}
