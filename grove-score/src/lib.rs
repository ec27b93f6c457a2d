//! Score-relative time arithmetic and MIDI value types.
//!
//! Everything here is pure: no allocation, no I/O, no shared state. Callers
//! supply a `beats_per_measure` modulus explicitly rather than reading it
//! from a global, so the same arithmetic works for the compile-time default
//! (4/4) and for any future time signature without touching this crate.

mod cursor;
mod midi;
mod quantization;
mod region;

pub use cursor::{modulo, Cursor};
pub use midi::{MidiMsg, MidiNote, PitchClass, REFERENCE_OCTAVE};
pub use quantization::{next_quantum, quantize_floor, Quantization};
pub use region::{Region, RegionSegment};

/// The compile-time reference time signature: 4 beats per measure.
pub const REFERENCE_BEATS_PER_MEASURE: f64 = 4.0;
