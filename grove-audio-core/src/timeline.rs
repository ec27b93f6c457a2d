//! Per-track scheduling: non-overlapping audio clips on one kind of track,
//! MIDI note-clip placements on another, both walked once per audio block.
//!
//! The note-clip track's start/stop bookkeeping mirrors
//! [`grove_rt::Ncsm`]'s per-voice loop: partition the block against a loop
//! region with [`Region::partition_loop`], then for each resulting interval
//! find the clips that intersect it and translate note offsets through the
//! interval's `cumulative_offset`.

use crate::note_clip::{NoteClipHandle, NoteClipInstance};
use derive_more::Display;
use enumflags2::{bitflags, BitFlags};
use grove_rt::{ClipNote, MidiStream, MidiStreamMessage};
use grove_score::{Cursor, MidiMsg, MidiNote, Region};
use smallvec::SmallVec;

#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrackFlags {
    Muted,
    Soloed,
    RecordArmed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[display(fmt = "audio_clip#{}", _0)]
pub struct AudioClipHandle(pub u32);

#[derive(Debug, Clone, Copy)]
pub struct AudioClip {
    pub handle: AudioClipHandle,
    pub span: Region,
    pub buffer: grove_rt::BufferHandle,
    pub buffer_start_offset: Cursor,
}

/// Ordered, non-overlapping audio clips. Placing or resizing a clip
/// partitions whatever it now covers out of the clips it overlaps, the way
/// a piano-roll editor splits a clip you drag another clip on top of.
#[derive(Default)]
pub struct AudioTrack {
    clips: Vec<AudioClip>,
    flags: BitFlags<TrackFlags>,
    next_handle: u32,
}

impl AudioTrack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clips(&self) -> &[AudioClip] {
        &self.clips
    }

    pub fn flags(&self) -> BitFlags<TrackFlags> {
        self.flags
    }

    pub fn set_flag(&mut self, flag: TrackFlags, on: bool) {
        if on {
            self.flags.insert(flag);
        } else {
            self.flags.remove(flag);
        }
    }

    pub fn place_clip(
        &mut self,
        span: Region,
        buffer: grove_rt::BufferHandle,
        buffer_start_offset: Cursor,
        beats_per_measure: f64,
    ) -> AudioClipHandle {
        let handle = AudioClipHandle(self.next_handle);
        self.next_handle += 1;
        self.partition_intersecting_regions(span, beats_per_measure);
        self.insert_sorted(AudioClip {
            handle,
            span,
            buffer,
            buffer_start_offset,
        });
        handle
    }

    pub fn resize_clip(&mut self, handle: AudioClipHandle, new_span: Region, beats_per_measure: f64) {
        let Some(pos) = self.clips.iter().position(|c| c.handle == handle) else {
            return;
        };
        let clip = self.clips.remove(pos);
        self.partition_intersecting_regions(new_span, beats_per_measure);
        self.insert_sorted(AudioClip {
            span: new_span,
            ..clip
        });
    }

    pub fn destroy_clip(&mut self, handle: AudioClipHandle) {
        self.clips.retain(|c| c.handle != handle);
    }

    fn insert_sorted(&mut self, clip: AudioClip) {
        let pos = self
            .clips
            .iter()
            .position(|c| clip.span.begin.score_lt(c.span.begin))
            .unwrap_or(self.clips.len());
        self.clips.insert(pos, clip);
    }

    /// Splits every existing clip intersecting `new_span` into the
    /// pre/post remainders left over once `new_span` claims the middle.
    /// Both remainders keep the original clip's handle: they're fragments
    /// of the same underlying placement, not independently addressable
    /// clips.
    fn partition_intersecting_regions(&mut self, new_span: Region, beats_per_measure: f64) {
        let bpm = beats_per_measure;
        let new_end = new_span.end(bpm);
        let mut result = Vec::with_capacity(self.clips.len());
        for clip in self.clips.drain(..) {
            if !clip.span.intersects(&new_span, bpm) {
                result.push(clip);
                continue;
            }
            let clip_end = clip.span.end(bpm);
            if clip.span.begin.score_lt(new_span.begin) {
                result.push(AudioClip {
                    span: Region::from_begin_end(clip.span.begin, new_span.begin, bpm),
                    ..clip
                });
            }
            if new_end.score_lt(clip_end) {
                result.push(AudioClip {
                    span: Region::from_begin_end(new_end, clip_end, bpm),
                    ..clip
                });
            }
        }
        result.sort_by(|a, b| if a.span.begin.score_lt(b.span.begin) { std::cmp::Ordering::Less } else { std::cmp::Ordering::Greater });
        self.clips = result;
    }
}

#[derive(Debug, Clone, Copy)]
struct PlayingClipNote {
    clip: NoteClipHandle,
    span: Region,
    note: MidiNote,
    channel: u8,
    frame_on: i32,
}

/// A live-played note captured during recording, in absolute transport
/// time — e.g. from a MIDI controller a host forwards while a track is
/// record-armed.
#[derive(Debug, Clone, Copy)]
pub struct TriggeredNote {
    pub note: MidiNote,
    pub played_span: Region,
}

/// Ordered note-clip placements sharing one MIDI stream id, channel, and
/// optional loop region. Each placement's span (looked up from the
/// note-clip system) is both its position on this track and the
/// coordinate space its notes are stored in — the same convention
/// [`grove_rt::ncsm::Section`] uses for its one clip per voice.
pub struct NoteClipTrack {
    clip_handles: Vec<NoteClipHandle>,
    pub midi_stream_id: u32,
    pub channel: u8,
    pub loop_region: Option<Region>,
    pub recording_clip: Option<NoteClipHandle>,
    source_id: u8,
    flags: BitFlags<TrackFlags>,
    playing_notes: SmallVec<[PlayingClipNote; 8]>,
}

impl NoteClipTrack {
    pub fn new(midi_stream_id: u32, channel: u8, source_id: u8) -> Self {
        Self {
            clip_handles: Vec::new(),
            midi_stream_id,
            channel,
            loop_region: None,
            recording_clip: None,
            source_id,
            flags: BitFlags::empty(),
            playing_notes: SmallVec::new(),
        }
    }

    pub fn flags(&self) -> BitFlags<TrackFlags> {
        self.flags
    }

    pub fn set_flag(&mut self, flag: TrackFlags, on: bool) {
        if on {
            self.flags.insert(flag);
        } else {
            self.flags.remove(flag);
        }
    }

    pub fn place_clip(&mut self, handle: NoteClipHandle, clips: &NoteClipInstance) {
        let Some(span) = clips.span(handle) else { return };
        let pos = self
            .clip_handles
            .iter()
            .position(|h| clips.span(*h).is_some_and(|s| span.begin.score_lt(s.begin)))
            .unwrap_or(self.clip_handles.len());
        self.clip_handles.insert(pos, handle);
    }

    pub fn remove_clip(&mut self, handle: NoteClipHandle) {
        self.clip_handles.retain(|h| *h != handle);
    }

    /// Translates a just-recorded note into the track's active recording
    /// clip, wrapping its start through the loop region the way a looper
    /// pedal wraps an overdub back to the top of the loop.
    pub fn record_triggered_note(
        &self,
        clips: &mut crate::note_clip::NoteClipSystem,
        triggered: TriggeredNote,
        beats_per_measure: f64,
    ) {
        let Some(handle) = self.recording_clip else { return };
        let Some(clip_span) = clips.clip_span(handle) else { return };
        let loop_region = self.loop_region.unwrap_or(clip_span);
        let wrapped_begin = loop_region.keep_within(triggered.played_span.begin, beats_per_measure);
        let span = Region {
            begin: wrapped_begin,
            size: triggered.played_span.size,
        };
        clips.add_note(
            handle,
            ClipNote {
                span,
                note: triggered.note,
            },
        );
    }

    /// Runs one block's worth of note-on/note-off scheduling for this
    /// track. `block` is `[global_cursor, global_cursor + block_beats)` in
    /// the same absolute coordinate space clip spans are placed in.
    pub fn render_block(
        &mut self,
        clips: &NoteClipInstance,
        stream: &mut MidiStream,
        block: Region,
        playing: bool,
        just_stopped: bool,
        beats_per_measure: f64,
        beats_per_sample: f64,
    ) {
        let bpm = beats_per_measure;

        // 1. Discard notes whose source has moved or been deleted.
        let mut kept = SmallVec::new();
        for pn in std::mem::take(&mut self.playing_notes) {
            if clips.note_exists(pn.clip, pn.span, pn.note) {
                kept.push(pn);
            } else {
                self.push_note_off(stream, 0, pn.channel, pn.note.note_number());
            }
        }
        self.playing_notes = kept;

        // 2. A transport stop flushes everything still sounding.
        if just_stopped {
            for pn in std::mem::take(&mut self.playing_notes) {
                self.push_note_off(stream, 0, pn.channel, pn.note.note_number());
            }
            return;
        }
        if !playing {
            return;
        }

        let loop_region = self.loop_region.unwrap_or(block);
        let intervals = Region::partition_loop(&block, &loop_region, bpm, 64);

        // 3a. Start phase: new onsets within each interval.
        for interval in &intervals {
            for &handle in &self.clip_handles {
                let Some(span) = clips.span(handle) else { continue };
                if !span.intersects(&interval.span, bpm) {
                    continue;
                }
                let overlap = intersect(span, interval.span, bpm);
                for note in clips.collect_notes_starting_in(handle, overlap, 64) {
                    let offset_beats = interval.cumulative_offset.to_beats(bpm)
                        + (note.span.begin.to_beats(bpm) - interval.span.begin.to_beats(bpm));
                    let frame = (offset_beats / beats_per_sample).round() as i32;
                    stream.push_messages(&[MidiStreamMessage {
                        frame: frame.max(0),
                        source_id: self.source_id,
                        msg: MidiMsg::note_on(self.channel, note.note.note_number(), note.note.velocity),
                    }]);
                    self.playing_notes.push(PlayingClipNote {
                        clip: handle,
                        span: note.span,
                        note: note.note,
                        channel: self.channel,
                        frame_on: frame,
                    });
                }
            }
        }

        // 3b. Stop phase: end already-playing notes against the same
        // intervals, then flush anything that never intersected one.
        let mut touched = vec![false; self.playing_notes.len()];
        let mut to_stop: Vec<(usize, i32)> = Vec::new();
        let loop_end = loop_region.end(bpm);
        for interval in &intervals {
            for (idx, pn) in self.playing_notes.iter().enumerate() {
                if !pn.span.intersects(&interval.span, bpm) {
                    continue;
                }
                touched[idx] = true;
                let clip_end = clips.span(pn.clip).map(|s| s.end(bpm)).unwrap_or(loop_end);
                let effective_end = min_cursor(min_cursor(pn.span.end(bpm), clip_end), loop_end);
                // Inclusive of the interval's own end: a note ending exactly
                // at a loop wrap must still flush there, but `Region::contains`
                // is half-open and would otherwise skip it every pass.
                let interval_end = interval.span.end(bpm);
                if effective_end.score_lt(interval.span.begin) || interval_end.score_lt(effective_end) {
                    continue;
                }
                let offset_beats = interval.cumulative_offset.to_beats(bpm)
                    + (effective_end.to_beats(bpm) - interval.span.begin.to_beats(bpm));
                let stop_frame = (offset_beats / beats_per_sample).round() as i32;
                if stop_frame > pn.frame_on {
                    to_stop.push((idx, stop_frame));
                }
            }
        }
        for (idx, touched) in touched.iter().enumerate() {
            if !touched && !to_stop.iter().any(|(i, _)| *i == idx) {
                to_stop.push((idx, 0));
            }
        }
        to_stop.sort_by(|a, b| b.0.cmp(&a.0));
        to_stop.dedup_by_key(|(i, _)| *i);
        for (idx, frame) in to_stop {
            let pn = self.playing_notes.remove(idx);
            self.push_note_off(stream, frame.max(0), pn.channel, pn.note.note_number());
        }
    }

    fn push_note_off(&self, stream: &mut MidiStream, frame: i32, channel: u8, note_number: u8) {
        stream.push_messages(&[MidiStreamMessage {
            frame,
            source_id: self.source_id,
            msg: MidiMsg::note_off(channel, note_number, 0),
        }]);
    }
}

fn intersect(a: Region, b: Region, beats_per_measure: f64) -> Region {
    let bpm = beats_per_measure;
    let begin = if a.begin.score_lt(b.begin) { b.begin } else { a.begin };
    let end = min_cursor(a.end(bpm), b.end(bpm));
    Region::from_begin_end(begin, end, bpm)
}

fn min_cursor(a: Cursor, b: Cursor) -> Cursor {
    if a.score_lt(b) {
        a
    } else {
        b
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::note_clip::NoteClipSystem;

    const BPM: f64 = 4.0;

    fn region(begin_beat: f64, size_beat: f64) -> Region {
        Region {
            begin: Cursor { measure: 0, beat: begin_beat },
            size: Cursor { measure: 0, beat: size_beat },
        }
    }

    fn buffer_handle() -> grove_rt::BufferHandle {
        grove_rt::BufferHandle(0)
    }

    #[test]
    fn placing_a_clip_splits_the_one_it_overlaps() {
        let mut track = AudioTrack::new();
        track.place_clip(region(0.0, 4.0), buffer_handle(), Cursor::zero(), BPM);
        track.place_clip(region(1.0, 1.0), buffer_handle(), Cursor::zero(), BPM);
        assert_eq!(track.clips().len(), 3);
        assert_eq!(track.clips()[0].span.begin.beat, 0.0);
        assert_eq!(track.clips()[1].span.begin.beat, 1.0);
        assert_eq!(track.clips()[2].span.begin.beat, 2.0);
    }

    #[test]
    fn note_clip_track_emits_note_on_then_note_off() {
        let mut clips = NoteClipSystem::new(BPM);
        let clip = clips.create_clip(region(0.0, 4.0));
        clips.add_note(
            clip,
            ClipNote {
                span: region(0.0, 1.0),
                note: MidiNote {
                    pitch_class: grove_score::PitchClass::C,
                    octave: 3,
                    velocity: 100,
                },
            },
        );
        clips.end_update();
        clips.render_sync();

        let mut track = NoteClipTrack::new(0, 0, 9);
        track.place_clip(clip, clips.render_instance());
        track.loop_region = Some(region(0.0, 4.0));

        let mut stream = MidiStream::new(u32::MAX, u32::MAX, 64);
        let beats_per_sample = 120.0 / 60.0 / 44_100.0;
        let block_beats = 64.0 * beats_per_sample;

        stream.begin_process();
        track.render_block(
            clips.render_instance(),
            &mut stream,
            Region {
                begin: Cursor::zero(),
                size: Cursor::from_beats(block_beats, BPM),
            },
            true,
            false,
            BPM,
            beats_per_sample,
        );
        stream.write();
        stream.end_process();
        assert_eq!(stream.output().len(), 1);
        assert!(stream.output()[0].msg.is_note_on());
    }

    #[test]
    fn just_stopped_flushes_all_playing_notes() {
        let mut clips = NoteClipSystem::new(BPM);
        let clip = clips.create_clip(region(0.0, 4.0));
        clips.end_update();
        clips.render_sync();
        let mut track = NoteClipTrack::new(0, 0, 9);
        track.place_clip(clip, clips.render_instance());

        let mut stream = MidiStream::new(u32::MAX, u32::MAX, 64);
        stream.begin_process();
        track.render_block(
            clips.render_instance(),
            &mut stream,
            region(0.0, 0.01),
            false,
            true,
            BPM,
            1e-6,
        );
        stream.write();
        stream.end_process();
        assert!(stream.output().is_empty());
    }
}
