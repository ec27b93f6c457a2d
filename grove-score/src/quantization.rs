use crate::cursor::Cursor;

/// A beat-grid division label. Named after the fraction of a measure each
/// grid line falls on, under the reference 4/4 signature: `Measure` lines
/// occur once per measure, `Eighth` eight times, and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quantization {
    Measure,
    Half,
    Quarter,
    Eighth,
    Sixteenth,
    ThirtySecond,
    SixtyFourth,
}

impl Quantization {
    /// Number of grid lines per measure.
    pub fn divisions_per_measure(self) -> f64 {
        match self {
            Quantization::Measure => 1.0,
            Quantization::Half => 2.0,
            Quantization::Quarter => 4.0,
            Quantization::Eighth => 8.0,
            Quantization::Sixteenth => 16.0,
            Quantization::ThirtySecond => 32.0,
            Quantization::SixtyFourth => 64.0,
        }
    }

    /// Beats between consecutive grid lines.
    pub fn beats_per_quantum(self, beats_per_measure: f64) -> f64 {
        beats_per_measure / self.divisions_per_measure()
    }
}

/// Floor `beat` to the nearest grid line of `quantization`.
pub fn quantize_floor(beat: f64, quantization: Quantization, beats_per_measure: f64) -> f64 {
    let div = quantization.beats_per_quantum(beats_per_measure);
    if div <= 0.0 {
        return beat;
    }
    (beat / div).floor() * div
}

/// The smallest cursor `>= cursor` whose beat lies exactly on a
/// `quantization` grid line. If `cursor` is already on the grid, it is
/// returned unchanged.
pub fn next_quantum(cursor: Cursor, quantization: Quantization, beats_per_measure: f64) -> Cursor {
    let floored = quantize_floor(cursor.beat, quantization, beats_per_measure);
    if (floored - cursor.beat).abs() < 1e-9 {
        return cursor;
    }
    let div = quantization.beats_per_quantum(beats_per_measure);
    let mut result = Cursor {
        measure: cursor.measure,
        beat: floored + div,
    };
    result.wrap_beats(beats_per_measure);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    const BPM: f64 = 4.0;

    #[test]
    fn next_quantum_is_never_before_cursor() {
        let c = Cursor { measure: 2, beat: 1.3 };
        let q = next_quantum(c, Quantization::Quarter, BPM);
        assert!(!q.score_lt(c));
    }

    #[test]
    fn next_quantum_on_grid_is_unchanged() {
        let c = Cursor { measure: 2, beat: 1.0 };
        let q = next_quantum(c, Quantization::Quarter, BPM);
        assert_eq!(q, c);
    }

    #[test]
    fn consecutive_quanta_are_evenly_spaced() {
        let c = Cursor { measure: 0, beat: 0.1 };
        let q1 = next_quantum(c, Quantization::Eighth, BPM);
        let q2 = next_quantum(q1.add_cursor(Cursor { measure: 0, beat: 1e-6 }, BPM), Quantization::Eighth, BPM);
        let spacing = q2.to_beats(BPM) - q1.to_beats(BPM);
        assert!((spacing - Quantization::Eighth.beats_per_quantum(BPM)).abs() < 1e-6);
    }

    #[test]
    fn measure_quantization_crosses_measure_boundary() {
        let c = Cursor { measure: 0, beat: 1.5 };
        let q = next_quantum(c, Quantization::Measure, BPM);
        assert_eq!(q, Cursor { measure: 1, beat: 0.0 });
    }
}
