//! Global clock: play/stop state, cursor advance, and per-block
//! scheduling-quantum frame offsets.

use crate::rings::Ring;
use grove_score::{next_quantum, Cursor, Quantization};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportCommand {
    Play,
    Stop,
    Toggle,
}

const ALL_QUANTIZATIONS: [Quantization; 7] = [
    Quantization::Measure,
    Quantization::Half,
    Quantization::Quarter,
    Quantization::Eighth,
    Quantization::Sixteenth,
    Quantization::ThirtySecond,
    Quantization::SixtyFourth,
];

/// Frame offset within the current block at which each quantization's next
/// grid line falls, or `-1` if it falls outside the block.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuantizedEventFrameOffsets {
    offsets: [i32; ALL_QUANTIZATIONS.len()],
}

impl QuantizedEventFrameOffsets {
    pub fn get(&self, q: Quantization) -> i32 {
        self.offsets[ALL_QUANTIZATIONS.iter().position(|x| *x == q).unwrap()]
    }
}

pub struct Transport {
    pub cursor: Cursor,
    pub pausing_cursor: Cursor,
    pub playing: bool,
    pub just_played: bool,
    pub just_stopped: bool,
    pub quantized_event_frame_offsets: QuantizedEventFrameOffsets,
    commands: Ring<TransportCommand, 16>,
    bpm_bits: AtomicU64,
    beats_per_measure: f64,
}

impl Transport {
    pub fn new(beats_per_measure: f64, initial_bpm: f64) -> Self {
        Self {
            cursor: Cursor::zero(),
            pausing_cursor: Cursor::zero(),
            playing: false,
            just_played: false,
            just_stopped: false,
            quantized_event_frame_offsets: QuantizedEventFrameOffsets::default(),
            commands: Ring::new(),
            bpm_bits: AtomicU64::new(initial_bpm.to_bits()),
            beats_per_measure,
        }
    }

    pub fn push_command(&self, cmd: TransportCommand) -> bool {
        self.commands.push(cmd)
    }

    pub fn set_bpm(&self, bpm: f64) {
        self.bpm_bits.store(bpm.to_bits(), Ordering::Relaxed);
    }

    pub fn bpm(&self) -> f64 {
        f64::from_bits(self.bpm_bits.load(Ordering::Relaxed))
    }

    /// Called once at the start of a block's render. Applies at most one
    /// pending command, advances the cursors, and precomputes the
    /// quantization grid offsets generators will read this block.
    pub fn begin_render(&mut self, num_frames: u32, sample_rate: f64) {
        self.just_played = false;
        self.just_stopped = false;
        if let Some(cmd) = self.commands.pop() {
            let was_playing = self.playing;
            self.playing = match cmd {
                TransportCommand::Play => true,
                TransportCommand::Stop => false,
                TransportCommand::Toggle => !was_playing,
            };
            self.just_played = !was_playing && self.playing;
            self.just_stopped = was_playing && !self.playing;
        }
        if self.just_played {
            self.cursor = Cursor::zero();
            self.pausing_cursor = Cursor::zero();
        }
        if self.just_stopped {
            self.cursor = Cursor::zero();
        }

        let beats_per_sample = self.bpm() / 60.0 / sample_rate;
        let block_beats = num_frames as f64 * beats_per_sample;
        if self.playing {
            self.cursor
                .wrapped_add_beats(block_beats, self.beats_per_measure);
        }
        self.pausing_cursor
            .wrapped_add_beats(block_beats, self.beats_per_measure);

        let mut offsets = [-1i32; ALL_QUANTIZATIONS.len()];
        for (i, q) in ALL_QUANTIZATIONS.iter().enumerate() {
            let next = next_quantum(self.pausing_cursor, *q, self.beats_per_measure);
            let delta_beats =
                next.to_beats(self.beats_per_measure) - self.pausing_cursor.to_beats(self.beats_per_measure);
            let frame = (delta_beats / beats_per_sample).round() as i32;
            offsets[i] = if frame >= 0 && frame < num_frames as i32 {
                frame
            } else {
                -1
            };
        }
        self.quantized_event_frame_offsets = QuantizedEventFrameOffsets { offsets };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BPM_SIG: f64 = 4.0;

    #[test]
    fn stopped_transport_does_not_advance_cursor() {
        let mut t = Transport::new(BPM_SIG, 120.0);
        t.begin_render(512, 48_000.0);
        assert_eq!(t.cursor, Cursor::zero());
        assert!(t.pausing_cursor.to_beats(BPM_SIG) > 0.0);
    }

    #[test]
    fn play_command_sets_just_played_and_advances_cursor() {
        let mut t = Transport::new(BPM_SIG, 120.0);
        t.push_command(TransportCommand::Play);
        t.begin_render(512, 48_000.0);
        assert!(t.just_played);
        assert!(t.playing);
        assert!(t.cursor.to_beats(BPM_SIG) > 0.0);
    }

    #[test]
    fn stop_resets_cursor_but_not_pausing_cursor() {
        let mut t = Transport::new(BPM_SIG, 120.0);
        t.push_command(TransportCommand::Play);
        t.begin_render(512, 48_000.0);
        t.push_command(TransportCommand::Stop);
        t.begin_render(512, 48_000.0);
        assert!(t.just_stopped);
        assert_eq!(t.cursor, Cursor::zero());
        assert!(t.pausing_cursor.to_beats(BPM_SIG) > 0.0);
    }
}
