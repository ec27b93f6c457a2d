//! Note-Clip State Machine: multiple independent voices loop through a
//! shared list of sections, each section backed by a clip's note index.

use crate::midi_stream::{MidiStream, MidiStreamMessage};
use crate::note_index::{InstanceId, NoteIndexArena};
use crate::rings::Ring;
use grove_score::{Cursor, MidiMsg, Region};

/// All NCSM voices share this source id, so a track's MIDI stream can mask
/// "everything this generator produces" with a single bit.
pub const SOURCE_ID_NCSM: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Section {
    pub clip: InstanceId,
    pub span: Region,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PlayingNote {
    note_number: u8,
    channel: u8,
    /// Score-relative end, already wrapped into the clip's own span.
    end: Cursor,
}

pub struct NcsmVoice {
    section_index: usize,
    next_section_index: Option<usize>,
    elapsed: Cursor,
    playing_notes: Vec<PlayingNote>,
    num_section_repetitions: u32,
    channel: u8,
}

impl NcsmVoice {
    pub fn new(channel: u8) -> Self {
        Self {
            section_index: 0,
            next_section_index: None,
            elapsed: Cursor::zero(),
            playing_notes: Vec::new(),
            num_section_repetitions: 0,
            channel,
        }
    }

    pub fn request_section(&mut self, index: usize) {
        self.next_section_index = Some(index);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiceSnapshot {
    pub section: usize,
    pub elapsed: Cursor,
    pub next_section: Option<usize>,
    pub num_section_repetitions: u32,
}

pub struct Ncsm {
    sections: Vec<Section>,
    voices: Vec<NcsmVoice>,
    feedback: Ring<(u8, VoiceSnapshot), 32>,
    beats_per_measure: f64,
}

impl Ncsm {
    pub fn new(beats_per_measure: f64, num_voices: usize) -> Self {
        Self {
            sections: Vec::new(),
            voices: (0..num_voices).map(|_| NcsmVoice::new(0)).collect(),
            feedback: Ring::new(),
            beats_per_measure,
        }
    }

    pub fn set_sections(&mut self, sections: Vec<Section>) {
        self.sections = sections;
    }

    pub fn voice_mut(&mut self, index: usize) -> &mut NcsmVoice {
        &mut self.voices[index]
    }

    pub fn take_feedback(&self) -> Option<(u8, VoiceSnapshot)> {
        self.feedback.pop()
    }

    /// Runs one block for every voice. `global_cursor` is the transport
    /// position at the *start* of the block (before this block's advance).
    pub fn render_block(
        &mut self,
        arena: &NoteIndexArena,
        stream: &mut MidiStream,
        global_cursor: Cursor,
        just_played: bool,
        just_stopped: bool,
        block_beats: f64,
        beats_per_sample: f64,
    ) {
        let bpm = self.beats_per_measure;
        for voice_index in 0..self.voices.len() {
            if let Some(next) = self.voices[voice_index].next_section_index {
                if next != self.voices[voice_index].section_index {
                    self.voices[voice_index].section_index = next;
                    self.voices[voice_index].num_section_repetitions = 0;
                }
                self.voices[voice_index].next_section_index = None;
            }

            if just_stopped {
                for note in self.voices[voice_index].playing_notes.drain(..) {
                    stream.push_messages(&[MidiStreamMessage {
                        frame: 0,
                        source_id: SOURCE_ID_NCSM,
                        msg: MidiMsg::note_off(note.channel, note.note_number, 0),
                    }]);
                }
            }
            if just_played {
                if let Some(next) = self.voices[voice_index].next_section_index.take() {
                    self.voices[voice_index].section_index = next;
                }
            }

            let Some(section) = self.sections.get(self.voices[voice_index].section_index).copied() else {
                continue;
            };
            let clip_span = section.span;

            let mut remaining_beats = block_beats;
            let mut frame_offset = 0i32;
            let mut first_iteration = true;

            while remaining_beats > 1e-12 {
                let seg_begin = if first_iteration {
                    clip_span.loop_cursor(
                        global_cursor.sub_cursor(self.voices[voice_index].elapsed, bpm),
                        bpm,
                    )
                } else {
                    clip_span.begin
                };
                first_iteration = false;

                let seg_begin_beats = seg_begin.to_beats(bpm);
                let clip_end_beats = clip_span.end(bpm).to_beats(bpm);
                let seg_size_beats = (clip_end_beats - seg_begin_beats).min(remaining_beats).max(0.0);
                if seg_size_beats <= 1e-12 {
                    break;
                }
                let segment = Region {
                    begin: seg_begin,
                    size: Cursor::from_beats(seg_size_beats, bpm),
                };

                let (starting, _) = arena.collect_notes_starting_in_region(section.clip, segment, 64);
                for note in &starting {
                    let within_seg_beats = note.span.begin.to_beats(bpm) - seg_begin_beats;
                    let frame = frame_offset + (within_seg_beats / beats_per_sample).round() as i32;
                    stream.push_messages(&[MidiStreamMessage {
                        frame: frame.max(0),
                        source_id: SOURCE_ID_NCSM,
                        msg: MidiMsg::note_on(
                            self.voices[voice_index].channel,
                            note.note.note_number(),
                            note.note.velocity,
                        ),
                    }]);
                    let channel = self.voices[voice_index].channel;
                    self.voices[voice_index].playing_notes.push(PlayingNote {
                        note_number: note.note.note_number(),
                        channel,
                        end: clip_span.loop_cursor(note.span.end(bpm), bpm),
                    });
                }

                let mut stop_indices = Vec::new();
                for (i, playing) in self.voices[voice_index].playing_notes.iter().enumerate() {
                    if segment.contains(playing.end, bpm) {
                        stop_indices.push(i);
                    }
                }
                for &i in stop_indices.iter().rev() {
                    let playing = self.voices[voice_index].playing_notes.remove(i);
                    let within_seg_beats = playing.end.to_beats(bpm) - seg_begin_beats;
                    let frame = frame_offset + (within_seg_beats / beats_per_sample).round() as i32;
                    stream.push_messages(&[MidiStreamMessage {
                        frame: frame.max(0),
                        source_id: SOURCE_ID_NCSM,
                        msg: MidiMsg::note_off(playing.channel, playing.note_number, 0),
                    }]);
                }

                frame_offset += (seg_size_beats / beats_per_sample).round() as i32;
                remaining_beats -= seg_size_beats;
                if (clip_end_beats - (seg_begin_beats + seg_size_beats)).abs() < 1e-9 {
                    self.voices[voice_index].elapsed =
                        self.voices[voice_index].elapsed.add_cursor(clip_span.size, bpm);
                    self.voices[voice_index].num_section_repetitions += 1;
                    if let Some(next) = self.voices[voice_index].next_section_index.take() {
                        self.voices[voice_index].section_index = next;
                    }
                }
            }

            let snapshot = VoiceSnapshot {
                section: self.voices[voice_index].section_index,
                elapsed: self.voices[voice_index].elapsed,
                next_section: self.voices[voice_index].next_section_index,
                num_section_repetitions: self.voices[voice_index].num_section_repetitions,
            };
            self.feedback.push((voice_index as u8, snapshot));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grove_score::{MidiNote, PitchClass};

    const BPM: f64 = 4.0;

    fn clip_region() -> Region {
        Region {
            begin: Cursor::zero(),
            size: Cursor { measure: 1, beat: 0.0 },
        }
    }

    #[test]
    fn voice_emits_note_on_for_note_at_clip_start() {
        let mut arena = NoteIndexArena::new(BPM);
        let clip = arena.create(clip_region());
        arena.insert(
            clip,
            crate::note_index::ClipNote {
                span: Region {
                    begin: Cursor::zero(),
                    size: Cursor { measure: 0, beat: 1.0 },
                },
                note: MidiNote {
                    pitch_class: PitchClass::C,
                    octave: 3,
                    velocity: 100,
                },
            },
        );

        let mut ncsm = Ncsm::new(BPM, 1);
        ncsm.set_sections(vec![Section {
            clip,
            span: clip_region(),
        }]);

        let mut stream = MidiStream::new(u32::MAX, u32::MAX, 64);
        let beats_per_sample = 120.0 / 60.0 / 44_100.0;
        let block_beats = 64.0 * beats_per_sample;

        stream.begin_process();
        ncsm.render_block(
            &arena,
            &mut stream,
            Cursor::zero(),
            true,
            false,
            block_beats,
            beats_per_sample,
        );
        stream.write();
        stream.end_process();
        assert_eq!(stream.output().len(), 1);
        assert!(stream.output()[0].msg.is_note_on());
    }

    #[test]
    fn just_stopped_flushes_playing_notes() {
        let mut arena = NoteIndexArena::new(BPM);
        let clip = arena.create(clip_region());
        let mut ncsm = Ncsm::new(BPM, 1);
        ncsm.set_sections(vec![Section {
            clip,
            span: clip_region(),
        }]);
        ncsm.voices[0].playing_notes.push(PlayingNote {
            note_number: 60,
            channel: 0,
            end: Cursor { measure: 0, beat: 2.0 },
        });

        let mut stream = MidiStream::new(u32::MAX, u32::MAX, 64);
        stream.begin_process();
        ncsm.render_block(&arena, &mut stream, Cursor::zero(), false, true, 0.01, 1e-6);
        stream.write();
        stream.end_process();
        assert_eq!(stream.output().len(), 1);
        assert!(stream.output()[0].msg.is_note_off());
        assert!(ncsm.voices[0].playing_notes.is_empty());
    }
}
