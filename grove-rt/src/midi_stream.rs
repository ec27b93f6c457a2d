//! Per-track MIDI message streams: source masking, stable-sort merge
//! against note-on state, and frame-accurate output.

use crate::handshake::Handshake;
use grove_score::MidiMsg;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MidiStreamMessage {
    pub frame: i32,
    pub source_id: u8,
    pub msg: MidiMsg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamStats {
    pub dropped_pending: u64,
}

#[derive(Debug, Clone, Copy)]
enum StreamCommand {
    SetSourceMask(u32),
    SetOnsetMask(u32),
}

#[derive(Debug, Clone, Copy)]
struct ActiveNote {
    source_id: u8,
    channel: u8,
}

/// One per-track message stream, owned entirely by the render side. UI
/// control (source/onset masks) arrives over `commands`; onset feedback
/// leaves over `onset_feedback`.
pub struct MidiStream {
    pending: Vec<MidiStreamMessage>,
    prev_end: usize,
    output: Vec<MidiStreamMessage>,
    active: [Option<ActiveNote>; 128],
    source_mask: u32,
    onset_mask: u32,
    onset_bits: u128,
    commands: crate::rings::Ring<StreamCommand, 16>,
    onset_feedback: Handshake<u128>,
    stats: StreamStats,
    pending_capacity: usize,
}

impl MidiStream {
    pub fn new(source_mask: u32, onset_mask: u32, pending_capacity: usize) -> Self {
        Self {
            pending: Vec::new(),
            prev_end: 0,
            output: Vec::new(),
            active: [None; 128],
            source_mask,
            onset_mask,
            onset_bits: 0,
            commands: crate::rings::Ring::new(),
            onset_feedback: Handshake::new(),
            stats: StreamStats::default(),
            pending_capacity,
        }
    }

    pub fn set_source_mask(&self, mask: u32) -> bool {
        self.commands.push(StreamCommand::SetSourceMask(mask))
    }

    pub fn set_onset_mask(&self, mask: u32) -> bool {
        self.commands.push(StreamCommand::SetOnsetMask(mask))
    }

    pub fn take_onset_feedback(&self) -> Option<u128> {
        self.onset_feedback.read()
    }

    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    /// Resize/clear the output array, record the pending queue's current
    /// length, and drain mask-update commands.
    pub fn begin_process(&mut self) {
        self.output.clear();
        self.prev_end = self.pending.len();
        while let Some(cmd) = self.commands.pop() {
            match cmd {
                StreamCommand::SetSourceMask(m) => self.source_mask = m,
                StreamCommand::SetOnsetMask(m) => self.onset_mask = m,
            }
        }
    }

    /// Step 2: append messages iff their source is masked-in, or they are
    /// a note-off releasing a note this stream currently considers on
    /// (always allowed, regardless of source).
    pub fn push_messages(&mut self, msgs: &[MidiStreamMessage]) {
        for &m in msgs {
            let source_bit = 1u32 << (m.source_id as u32 % 32);
            let masked_in = self.source_mask & source_bit != 0;
            let releases_owned = m.msg.is_note_off()
                && self.active[m.msg.note_number() as usize]
                    .is_some_and(|a| a.source_id == m.source_id);
            if !masked_in && !releases_owned {
                continue;
            }
            if self.pending.len() >= self.pending_capacity {
                self.stats.dropped_pending += 1;
                continue;
            }
            self.pending.push(m);
        }
    }

    /// Step 3: stable-sort this block's newly appended messages, then walk
    /// the full pending queue (leftover-from-last-block first, already at
    /// frame 0) applying the note-on/off consistency rules, producing the
    /// output array and the queue to carry into the next block.
    pub fn write(&mut self) {
        let prev_end = self.prev_end;
        self.pending[prev_end..].sort_by(|a, b| {
            let a_off_first = !a.msg.is_note_off() as u8;
            let b_off_first = !b.msg.is_note_off() as u8;
            (a.frame, a.msg.note_number(), a_off_first).cmp(&(b.frame, b.msg.note_number(), b_off_first))
        });

        let mut leftover = Vec::new();
        for &m in &self.pending {
            if m.msg.is_note_off() {
                let note = m.msg.note_number() as usize;
                if self.active[note].is_some() {
                    self.active[note] = None;
                    self.output.push(m);
                }
                // off for a note not currently on: drop silently.
            } else if m.msg.is_note_on() {
                let note = m.msg.note_number() as usize;
                if let Some(owner) = self.active[note].take() {
                    self.output.push(MidiStreamMessage {
                        frame: m.frame,
                        source_id: owner.source_id,
                        msg: MidiMsg::note_off(owner.channel, m.msg.note_number(), 0),
                    });
                    leftover.push(MidiStreamMessage {
                        frame: 0,
                        source_id: m.source_id,
                        msg: m.msg,
                    });
                } else {
                    self.active[note] = Some(ActiveNote {
                        source_id: m.source_id,
                        channel: m.msg.channel(),
                    });
                    let source_bit = 1u32 << (m.source_id as u32 % 32);
                    if self.onset_mask & source_bit != 0 {
                        self.onset_bits |= 1u128 << note;
                    }
                    self.output.push(m);
                }
            } else {
                self.output.push(m);
            }
        }
        self.pending = leftover;
    }

    /// Step 4: try to flush accumulated onset bits to the UI-feedback
    /// handshake; only clear them locally if the publish succeeded.
    pub fn end_process(&mut self) {
        if self.onset_bits != 0 && self.onset_feedback.try_publish(self.onset_bits) {
            self.onset_bits = 0;
        }
    }

    pub fn output(&self) -> &[MidiStreamMessage] {
        &self.output
    }
}
