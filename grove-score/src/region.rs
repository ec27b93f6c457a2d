use crate::cursor::{modulo, Cursor};

/// A half-open `[begin, begin + size)` interval of score time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Region {
    pub begin: Cursor,
    pub size: Cursor,
}

/// One output segment of [`Region::partition_loop`]: the segment's own span,
/// plus the offset (in beats, relative to the start of the thing being
/// partitioned) at which it begins.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionSegment {
    pub span: Region,
    pub cumulative_offset: Cursor,
}

impl Region {
    pub fn from_begin_end(begin: Cursor, end: Cursor, beats_per_measure: f64) -> Self {
        let size = end.sub_cursor(begin, beats_per_measure);
        Self { begin, size }
    }

    pub fn end(&self, beats_per_measure: f64) -> Cursor {
        self.begin.add_cursor(self.size, beats_per_measure)
    }

    pub fn is_empty(&self) -> bool {
        self.size == Cursor::zero()
    }

    pub fn contains(&self, cursor: Cursor, beats_per_measure: f64) -> bool {
        let end = self.end(beats_per_measure);
        !cursor.score_lt(self.begin) && cursor.score_lt(end)
    }

    pub fn intersects(&self, other: &Region, beats_per_measure: f64) -> bool {
        let self_end = self.end(beats_per_measure);
        let other_end = other.end(beats_per_measure);
        if !self.begin.score_lt(other.begin) {
            // self.begin >= other.begin
            self.begin.score_lt(other_end)
        } else {
            other.begin.score_lt(self_end)
        }
    }

    /// `(cursor mod size) + begin`, using the iterative [`modulo`].
    /// Deliberately does *not* subtract `begin` from `cursor` first — see
    /// [`keep_within`](Self::keep_within) for the variant that does.
    pub fn loop_cursor(&self, cursor: Cursor, beats_per_measure: f64) -> Cursor {
        let m = modulo(cursor, self.size, beats_per_measure);
        m.add_cursor(self.begin, beats_per_measure)
    }

    /// Wrap `cursor` into `[begin, begin+size)`. Equivalent to
    /// `(cursor - begin) % size + begin`; kept as a distinct name from
    /// [`loop_cursor`](Self::loop_cursor) because that one does not
    /// subtract `begin` first.
    pub fn keep_within(&self, cursor: Cursor, beats_per_measure: f64) -> Cursor {
        let relative = cursor.sub_cursor(self.begin, beats_per_measure);
        let wrapped = modulo(relative, self.size, beats_per_measure);
        wrapped.add_cursor(self.begin, beats_per_measure)
    }

    /// Split `source` (which begins inside `loop_region`) into up to `cap`
    /// segments, each lying strictly within `loop_region`, that join end to
    /// end at `loop_region.begin`. Returns the segments actually written
    /// (<= cap) and the count that *would* have been written without the
    /// cap (mirrors the collect-with-capacity convention used elsewhere in
    /// this crate's sibling, `grove-rt`).
    pub fn partition_loop(
        source: &Region,
        loop_region: &Region,
        beats_per_measure: f64,
        cap: usize,
    ) -> Vec<RegionSegment> {
        let mut out = Vec::new();
        if source.size == Cursor::zero() || loop_region.size == Cursor::zero() {
            return out;
        }
        let mut remaining = source.size;
        let mut position = source.begin;
        let mut cumulative = Cursor::zero();
        let loop_end = loop_region.end(beats_per_measure);
        loop {
            let pos_in_loop = loop_region.keep_within(position, beats_per_measure);
            let dist_to_loop_end = loop_end.sub_cursor(pos_in_loop, beats_per_measure);
            let segment_size = if dist_to_loop_end.score_lt(remaining) {
                dist_to_loop_end
            } else {
                remaining
            };
            if segment_size == Cursor::zero() {
                break;
            }
            if out.len() < cap {
                out.push(RegionSegment {
                    span: Region {
                        begin: position,
                        size: segment_size,
                    },
                    cumulative_offset: cumulative,
                });
            } else {
                break;
            }
            remaining = remaining.sub_cursor(segment_size, beats_per_measure);
            cumulative = cumulative.add_cursor(segment_size, beats_per_measure);
            position = position.add_cursor(segment_size, beats_per_measure);
            if remaining == Cursor::zero() {
                break;
            }
        }
        out
    }

    /// Distance from `p0` to `p1`, treating `p0` as preceding `p1` in wall
    /// time even if `p1 <= p0` in score-relative time (in which case the
    /// distance wraps through `span`). Equal points yield the full span
    /// size.
    pub fn distance_lt(p0: Cursor, p1: Cursor, span: &Region, beats_per_measure: f64) -> Cursor {
        if p0.score_lt(p1) {
            p1.sub_cursor(p0, beats_per_measure)
        } else {
            let to_end = span.end(beats_per_measure).sub_cursor(p0, beats_per_measure);
            let from_begin = p1.sub_cursor(span.begin, beats_per_measure);
            to_end.add_cursor(from_begin, beats_per_measure)
        }
    }

    /// As [`distance_lt`](Self::distance_lt), but equal points yield zero:
    /// `p1` is considered to be at-or-after `p0`.
    pub fn distance_le(p0: Cursor, p1: Cursor, span: &Region, beats_per_measure: f64) -> Cursor {
        if p0 == p1 {
            Cursor::zero()
        } else if p0.score_lt(p1) {
            p1.sub_cursor(p0, beats_per_measure)
        } else {
            let to_end = span.end(beats_per_measure).sub_cursor(p0, beats_per_measure);
            let from_begin = p1.sub_cursor(span.begin, beats_per_measure);
            to_end.add_cursor(from_begin, beats_per_measure)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BPM: f64 = 4.0;

    #[test]
    fn partition_loop_sums_to_source_size() {
        let source = Region {
            begin: Cursor { measure: 0, beat: 3.5 },
            size: Cursor { measure: 1, beat: 0.0 },
        };
        let loop_region = Region {
            begin: Cursor::zero(),
            size: Cursor { measure: 1, beat: 0.0 },
        };
        let segments = Region::partition_loop(&source, &loop_region, BPM, 8);
        let mut total = Cursor::zero();
        for seg in &segments {
            total = total.add_cursor(seg.span.size, BPM);
            assert!(seg.span.begin.score_lt(loop_region.end(BPM)));
        }
        assert!((total.to_beats(BPM) - source.size.to_beats(BPM)).abs() < 1e-9);
    }

    #[test]
    fn contains_is_half_open() {
        let r = Region {
            begin: Cursor::zero(),
            size: Cursor { measure: 0, beat: 2.0 },
        };
        assert!(r.contains(Cursor::zero(), BPM));
        assert!(r.contains(Cursor { measure: 0, beat: 1.99 }, BPM));
        assert!(!r.contains(Cursor { measure: 0, beat: 2.0 }, BPM));
    }

    #[test]
    fn intersects_detects_overlap() {
        let a = Region::from_begin_end(
            Cursor::zero(),
            Cursor { measure: 0, beat: 2.0 },
            BPM,
        );
        let b = Region::from_begin_end(
            Cursor { measure: 0, beat: 1.0 },
            Cursor { measure: 0, beat: 3.0 },
            BPM,
        );
        let c = Region::from_begin_end(
            Cursor { measure: 0, beat: 2.0 },
            Cursor { measure: 0, beat: 3.0 },
            BPM,
        );
        assert!(a.intersects(&b, BPM));
        assert!(!a.intersects(&c, BPM));
    }
}
