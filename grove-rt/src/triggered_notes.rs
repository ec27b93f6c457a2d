//! Live-triggered notes: a MIDI controller (or similar immediate-input
//! source) pushes on/off commands through a bounded ring; the render side
//! tracks each active note's timeout countdown, issuing a synthetic
//! `note_off` once it reaches zero, and reports every note's played span
//! back over a feedback ring so a recording track can fold it into a clip.

use crate::midi_stream::{MidiStream, MidiStreamMessage};
use crate::rings::Ring;
use grove_score::{Cursor, MidiMsg, MidiNote, Region};

/// All triggered notes from one instance share this source id, mirroring
/// [`crate::ncsm::SOURCE_ID_NCSM`]'s single-bit mask convention.
pub const SOURCE_ID_TRIGGERED_NOTES: u8 = 1;

const COMMAND_RING_CAPACITY: usize = 64;
const PLAY_RESULT_RING_CAPACITY: usize = 16;
/// Upper bound on commands drained per block: a UI thread pushing faster
/// than the audio thread drains just means later commands wait one more
/// block, never an unbounded drain loop on the realtime side.
const MAX_COMMANDS_PER_BLOCK: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TriggeredNoteCommand {
    On {
        note: MidiNote,
        channel: u8,
        timeout_seconds: f64,
    },
    Off {
        note: MidiNote,
        channel: u8,
    },
}

#[derive(Debug, Clone, Copy)]
struct ActiveTrigger {
    note: MidiNote,
    channel: u8,
    start: Cursor,
    timeout_seconds: f64,
}

/// A played note's outcome, reported once it ends (explicit `Off` or
/// timeout), in absolute transport time.
#[derive(Debug, Clone, Copy)]
pub struct TriggeredNotePlayResult {
    pub note: MidiNote,
    pub played_span: Region,
}

/// One instance's worth of live-triggered notes, sharing a MIDI stream
/// source id.
pub struct TriggeredNotes {
    commands: Ring<TriggeredNoteCommand, COMMAND_RING_CAPACITY>,
    play_results: Ring<TriggeredNotePlayResult, PLAY_RESULT_RING_CAPACITY>,
    active: Vec<ActiveTrigger>,
    source_id: u8,
}

impl TriggeredNotes {
    pub fn new(source_id: u8) -> Self {
        Self {
            commands: Ring::new(),
            play_results: Ring::new(),
            active: Vec::new(),
            source_id,
        }
    }

    /// UI side: queue a trigger. Returns `false` (command dropped) if the
    /// ring is full.
    pub fn push_command(&self, cmd: TriggeredNoteCommand) -> bool {
        self.commands.push(cmd)
    }

    /// UI/recording side: pop the next reported play result, if any.
    pub fn take_play_result(&self) -> Option<TriggeredNotePlayResult> {
        self.play_results.pop()
    }

    /// Runs one block: admits queued on/off commands (emitting an
    /// immediate note-on/off for each), decrements every still-active
    /// note's timeout by the block's wall-clock duration, and closes any
    /// note whose timeout has elapsed.
    pub fn render_block(
        &mut self,
        stream: &mut MidiStream,
        block_start: Cursor,
        beats_per_measure: f64,
        block_seconds: f64,
    ) {
        for _ in 0..MAX_COMMANDS_PER_BLOCK {
            let Some(cmd) = self.commands.pop() else { break };
            match cmd {
                TriggeredNoteCommand::On {
                    note,
                    channel,
                    timeout_seconds,
                } => {
                    stream.push_messages(&[MidiStreamMessage {
                        frame: 0,
                        source_id: self.source_id,
                        msg: MidiMsg::note_on(channel, note.note_number(), note.velocity),
                    }]);
                    self.active.push(ActiveTrigger {
                        note,
                        channel,
                        start: block_start,
                        timeout_seconds,
                    });
                }
                TriggeredNoteCommand::Off { note, channel } => {
                    if let Some(idx) = self.active.iter().position(|a| a.note == note && a.channel == channel) {
                        let a = self.active.remove(idx);
                        self.close(stream, block_start, beats_per_measure, a);
                    }
                }
            }
        }

        let mut i = 0;
        while i < self.active.len() {
            self.active[i].timeout_seconds -= block_seconds;
            if self.active[i].timeout_seconds <= 0.0 {
                let a = self.active.remove(i);
                self.close(stream, block_start, beats_per_measure, a);
            } else {
                i += 1;
            }
        }
    }

    fn close(&mut self, stream: &mut MidiStream, now: Cursor, beats_per_measure: f64, a: ActiveTrigger) {
        stream.push_messages(&[MidiStreamMessage {
            frame: 0,
            source_id: self.source_id,
            msg: MidiMsg::note_off(a.channel, a.note.note_number(), 0),
        }]);
        self.play_results.push(TriggeredNotePlayResult {
            note: a.note,
            played_span: Region::from_begin_end(a.start, now, beats_per_measure),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grove_score::PitchClass;

    const BPM: f64 = 4.0;

    fn note() -> MidiNote {
        MidiNote {
            pitch_class: PitchClass::C,
            octave: 3,
            velocity: 100,
        }
    }

    #[test]
    fn on_then_off_emits_note_on_then_note_off_and_reports_play_result() {
        let mut tn = TriggeredNotes::new(5);
        tn.push_command(TriggeredNoteCommand::On {
            note: note(),
            channel: 0,
            timeout_seconds: 10.0,
        });
        let mut stream = MidiStream::new(u32::MAX, u32::MAX, 64);
        stream.begin_process();
        tn.render_block(&mut stream, Cursor::zero(), BPM, 0.01);
        stream.write();
        stream.end_process();
        assert_eq!(stream.output().len(), 1);
        assert!(stream.output()[0].msg.is_note_on());

        tn.push_command(TriggeredNoteCommand::Off { note: note(), channel: 0 });
        let end = Cursor { measure: 0, beat: 1.0 };
        stream.begin_process();
        tn.render_block(&mut stream, end, BPM, 0.01);
        stream.write();
        stream.end_process();
        assert_eq!(stream.output().len(), 1);
        assert!(stream.output()[0].msg.is_note_off());

        let result = tn.take_play_result().expect("play result reported");
        assert_eq!(result.note, note());
        assert_eq!(result.played_span.begin, Cursor::zero());
        assert_eq!(result.played_span.end(BPM), end);
    }

    #[test]
    fn timeout_elapsing_closes_the_note_without_an_explicit_off() {
        let mut tn = TriggeredNotes::new(5);
        tn.push_command(TriggeredNoteCommand::On {
            note: note(),
            channel: 0,
            timeout_seconds: 0.05,
        });
        let mut stream = MidiStream::new(u32::MAX, u32::MAX, 64);
        stream.begin_process();
        tn.render_block(&mut stream, Cursor::zero(), BPM, 0.02);
        stream.write();
        stream.end_process();
        assert!(stream.output()[0].msg.is_note_on());

        // Two more blocks exhaust the 0.05s timeout (0.02 + 0.02 + 0.02).
        stream.begin_process();
        tn.render_block(&mut stream, Cursor { measure: 0, beat: 0.5 }, BPM, 0.02);
        stream.write();
        stream.end_process();
        assert!(stream.output().is_empty());

        stream.begin_process();
        tn.render_block(&mut stream, Cursor { measure: 0, beat: 1.0 }, BPM, 0.02);
        stream.write();
        stream.end_process();
        assert_eq!(stream.output().len(), 1);
        assert!(stream.output()[0].msg.is_note_off());
        assert!(tn.take_play_result().is_some());
    }
}
