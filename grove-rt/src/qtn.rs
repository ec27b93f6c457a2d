//! Quantized Triggered Notes: the UI pushes `(note, quantization,
//! duration)` triggers; the render side starts each one on the next grid
//! line and chains a second trigger so rapid re-triggers still land
//! musically rather than stacking up.

use crate::midi_stream::{MidiStream, MidiStreamMessage};
use grove_score::{next_quantum, Cursor, MidiMsg, Quantization};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QtnTrigger {
    pub note_number: u8,
    pub velocity: u8,
    pub channel: u8,
    pub quantization: Quantization,
    pub beat_duration: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum RenderNoteInfo {
    Empty,
    Pending(QtnTrigger),
    On { trigger: QtnTrigger, start: Cursor },
}

/// One slot's pair of in-flight notes. Index 0 plays; index 1 queues
/// behind it so a trigger arriving mid-note still gets honored in order.
pub struct QtnSlot {
    notes: [RenderNoteInfo; 2],
    queue: VecDeque<QtnTrigger>,
    source_id: u8,
}

impl QtnSlot {
    pub fn new(source_id: u8) -> Self {
        Self {
            notes: [RenderNoteInfo::Empty, RenderNoteInfo::Empty],
            queue: VecDeque::new(),
            source_id,
        }
    }

    pub fn trigger(&mut self, t: QtnTrigger) {
        self.queue.push_back(t);
    }

    /// Runs one block: admits queued triggers into free note slots,
    /// advances pending notes past their onset quantum, and closes notes
    /// whose duration has elapsed.
    pub fn render_block(
        &mut self,
        stream: &mut MidiStream,
        latest_event: Cursor,
        block_end: Cursor,
        beats_per_measure: f64,
        beats_per_sample: f64,
    ) {
        for slot in 0..2 {
            if matches!(self.notes[slot], RenderNoteInfo::Empty) {
                if let Some(t) = self.queue.pop_front() {
                    self.notes[slot] = RenderNoteInfo::Pending(t);
                }
            }
        }

        for slot in 0..2 {
            match self.notes[slot] {
                RenderNoteInfo::Pending(t) => {
                    let onset_base = match self.notes[1 - slot] {
                        RenderNoteInfo::On { start, trigger, .. } => {
                            Cursor::from_beats(start.to_beats(beats_per_measure) + trigger.beat_duration, beats_per_measure)
                        }
                        _ => latest_event,
                    };
                    let loc = next_quantum(onset_base, t.quantization, beats_per_measure);
                    if !loc.score_lt(block_end) {
                        continue;
                    }
                    let frame = ((loc.to_beats(beats_per_measure) - latest_event.to_beats(beats_per_measure))
                        / beats_per_sample)
                        .round()
                        .max(0.0) as i32;
                    stream.push_messages(&[MidiStreamMessage {
                        frame,
                        source_id: self.source_id,
                        msg: MidiMsg::note_on(t.channel, t.note_number, t.velocity),
                    }]);
                    self.notes[slot] = RenderNoteInfo::On { trigger: t, start: loc };
                }
                RenderNoteInfo::On { trigger, start } => {
                    let end = Cursor::from_beats(
                        start.to_beats(beats_per_measure) + trigger.beat_duration,
                        beats_per_measure,
                    );
                    if end.score_lt(block_end) {
                        let frame = ((end.to_beats(beats_per_measure) - latest_event.to_beats(beats_per_measure))
                            / beats_per_sample)
                            .round()
                            .max(0.0) as i32;
                        stream.push_messages(&[MidiStreamMessage {
                            frame,
                            source_id: self.source_id,
                            msg: MidiMsg::note_off(trigger.channel, trigger.note_number, 0),
                        }]);
                        self.notes[slot] = RenderNoteInfo::Empty;
                    }
                }
                RenderNoteInfo::Empty => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BPM: f64 = 4.0;

    #[test]
    fn trigger_emits_note_on_once_quantum_is_reached() {
        let mut slot = QtnSlot::new(9);
        slot.trigger(QtnTrigger {
            note_number: 64,
            velocity: 100,
            channel: 0,
            quantization: Quantization::Measure,
            beat_duration: 1.0,
        });
        let mut stream = MidiStream::new(u32::MAX, u32::MAX, 64);
        let beats_per_sample = 120.0 / 60.0 / 44_100.0;
        let block_beats = 64.0 * beats_per_sample;
        let block_end = Cursor::from_beats(block_beats, BPM);

        stream.begin_process();
        slot.render_block(&mut stream, Cursor::zero(), block_end, BPM, beats_per_sample);
        stream.write();
        stream.end_process();
        assert_eq!(stream.output().len(), 1);
        assert!(stream.output()[0].msg.is_note_on());
    }

    #[test]
    fn second_queued_trigger_chains_after_the_first_ends() {
        let mut slot = QtnSlot::new(9);
        slot.trigger(QtnTrigger {
            note_number: 60,
            velocity: 100,
            channel: 0,
            quantization: Quantization::Measure,
            beat_duration: 0.01,
        });
        slot.trigger(QtnTrigger {
            note_number: 62,
            velocity: 100,
            channel: 0,
            quantization: Quantization::Measure,
            beat_duration: 0.01,
        });
        assert_eq!(slot.queue.len(), 2);
    }
}
