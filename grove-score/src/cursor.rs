use std::cmp::Ordering;

/// Musical time expressed as a whole measure count plus a real-valued beat
/// offset within that measure.
///
/// Ordering is lexicographic: `(measure, beat)`. All arithmetic that can
/// carry across a measure boundary takes `beats_per_measure` explicitly so
/// the same value works under any time signature, even though the rest of
/// this crate only ever passes [`crate::REFERENCE_BEATS_PER_MEASURE`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cursor {
    pub measure: i64,
    pub beat: f64,
}

impl Cursor {
    pub const fn zero() -> Self {
        Self {
            measure: 0,
            beat: 0.0,
        }
    }

    pub fn from_beats(beats: f64, beats_per_measure: f64) -> Self {
        let mut c = Self { measure: 0, beat: beats };
        c.wrap_beats(beats_per_measure);
        c
    }

    pub fn to_beats(self, beats_per_measure: f64) -> f64 {
        self.measure as f64 * beats_per_measure + self.beat
    }

    /// Carry `self.beat` into `[0, beats_per_measure)`, adjusting `measure`.
    pub fn wrap_beats(&mut self, beats_per_measure: f64) {
        carry_beat_into_range(&mut self.beat, beats_per_measure, &mut self.measure);
    }

    pub fn wrapped_add_beats(&mut self, beat_increment: f64, beats_per_measure: f64) {
        self.beat += beat_increment;
        self.wrap_beats(beats_per_measure);
    }

    pub fn wrapped_add_cursor(&mut self, other: Cursor, beats_per_measure: f64) {
        self.beat += other.beat;
        let mut carry = 0i64;
        carry_beat_into_range(&mut self.beat, beats_per_measure, &mut carry);
        self.measure += other.measure + carry;
    }

    pub fn wrapped_sub_cursor(&mut self, other: Cursor, beats_per_measure: f64) {
        self.beat -= other.beat;
        self.measure -= other.measure;
        let mut carry = 0i64;
        carry_beat_into_range(&mut self.beat, beats_per_measure, &mut carry);
        self.measure += carry;
    }

    pub fn wrapped_scale(&mut self, scalar: f64, beats_per_measure: f64) {
        self.beat *= scalar;
        let new_measure = self.measure as f64 * scalar;
        let floor_measure = new_measure.floor();
        self.beat += (new_measure - floor_measure) * beats_per_measure;
        self.measure = floor_measure as i64;
        self.wrap_beats(beats_per_measure);
    }

    pub fn add_cursor(mut self, other: Cursor, beats_per_measure: f64) -> Cursor {
        self.wrapped_add_cursor(other, beats_per_measure);
        self
    }

    pub fn sub_cursor(mut self, other: Cursor, beats_per_measure: f64) -> Cursor {
        self.wrapped_sub_cursor(other, beats_per_measure);
        self
    }

    /// Whether `self` precedes `other` under score-relative ordering.
    pub fn score_lt(self, other: Cursor) -> bool {
        self.partial_cmp(&other) == Some(Ordering::Less)
    }
}

impl PartialOrd for Cursor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match self.measure.cmp(&other.measure) {
            Ordering::Equal => self.beat.partial_cmp(&other.beat),
            ord => Some(ord),
        }
    }
}

/// `a mod span`, iterative: repeatedly subtract/add `span` until `a` lands
/// inside `[0, span)`. `span` must be strictly positive; callers in this
/// crate guarantee that, but a zero/negative span is clamped (returns `a`
/// unchanged) rather than looping forever.
pub fn modulo(mut a: Cursor, span: Cursor, beats_per_measure: f64) -> Cursor {
    debug_assert!(
        span.score_lt(Cursor::zero()) == false && span != Cursor::zero(),
        "modulo: span must be strictly positive"
    );
    if span == Cursor::zero() || span.score_lt(Cursor::zero()) {
        return a;
    }
    // Fast path: one division tells us how many whole spans to shift, then at
    // most one correcting step handles any floating-point remainder.
    let a_beats = a.to_beats(beats_per_measure);
    let span_beats = span.to_beats(beats_per_measure);
    if span_beats > 0.0 {
        let quotient = (a_beats / span_beats).floor();
        a = Cursor::from_beats(a_beats - quotient * span_beats, beats_per_measure);
    }
    while a.score_lt(Cursor::zero()) {
        a.wrapped_add_cursor(span, beats_per_measure);
    }
    while !a.score_lt(span) {
        a.wrapped_sub_cursor(span, beats_per_measure);
    }
    a
}

/// Wrap `beat` into `[0, beats_per_measure)`, returning the (possibly
/// negative) number of whole measures carried into `*measure`.
fn carry_beat_into_range(beat: &mut f64, beats_per_measure: f64, measure: &mut i64) {
    if beats_per_measure <= 0.0 {
        return;
    }
    let whole = (*beat / beats_per_measure).floor();
    *measure += whole as i64;
    *beat -= whole * beats_per_measure;
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const BPM: f64 = 4.0;

    #[test]
    fn add_then_sub_is_identity() {
        let a = Cursor { measure: 3, beat: 2.5 };
        let b = Cursor { measure: -1, beat: 3.5 };
        let added = a.add_cursor(b, BPM);
        let back = added.sub_cursor(b, BPM);
        assert_eq!(back.measure, a.measure);
        assert!((back.beat - a.beat).abs() < 1e-9);
    }

    #[test]
    fn wrap_beats_carries_into_measure() {
        let mut c = Cursor { measure: 0, beat: 5.5 };
        c.wrap_beats(BPM);
        assert_eq!(c.measure, 1);
        assert!((c.beat - 1.5).abs() < 1e-9);
    }

    #[test]
    fn modulo_result_is_within_span() {
        let span = Cursor { measure: 1, beat: 0.0 };
        let a = Cursor { measure: 5, beat: 3.75 };
        let m = modulo(a, span, BPM);
        assert!(m.score_lt(span));
        assert!(!m.score_lt(Cursor::zero()));
    }

    #[test]
    fn modulo_handles_negative_input() {
        let span = Cursor { measure: 2, beat: 0.0 };
        let a = Cursor { measure: -3, beat: 1.0 };
        let m = modulo(a, span, BPM);
        assert!(m.score_lt(span));
        assert!(!m.score_lt(Cursor::zero()));
    }

    proptest::proptest! {
        #[test]
        fn prop_add_sub_roundtrip(
            am in -50i64..50, ab in 0.0f64..4.0,
            bm in -50i64..50, bb in 0.0f64..4.0,
        ) {
            let a = Cursor { measure: am, beat: ab };
            let b = Cursor { measure: bm, beat: bb };
            let back = a.add_cursor(b, BPM).sub_cursor(b, BPM);
            prop_assert_eq!(back.measure, a.measure);
            prop_assert!((back.beat - a.beat).abs() < 1e-6);
        }

        #[test]
        fn prop_modulo_in_range(
            am in -50i64..50, ab in -4.0f64..8.0,
            sm in 0i64..10, sb in 0.0f64..4.0,
        ) {
            let span = Cursor { measure: sm.max(1), beat: sb };
            let a = Cursor { measure: am, beat: ab };
            let m = modulo(a, span, BPM);
            prop_assert!(!m.score_lt(Cursor::zero()));
            prop_assert!(m.score_lt(span));
        }
    }
}
