//! Owns the whole per-block pipeline a host actually drives: the realtime
//! renderer (triggered notes, QTN, arp, NCSM) from [`grove_rt`], the
//! note-clip CRUD system, and the timeline tracks built on top of it. Bridges
//! the two by implementing [`grove_rt::TimelineGenerator`] with a small
//! adapter built fresh each block, since [`grove_rt::AudioRenderer`] can
//! never own timeline tracks directly (they depend on this crate's note-clip
//! system, and `grove-rt` cannot depend back on `grove-audio-core`).

use crate::note_clip::{NoteClipInstance, NoteClipSystem};
use crate::timeline::{AudioTrack, NoteClipTrack};
use grove_rt::{AudioBuffer, AudioRenderer, BufferHandle, CopyForward, CoreConfig, DoubleBuffer, MidiStream, TimelineGenerator};
use grove_score::Region;
use std::collections::HashMap;
use std::sync::Arc;

/// Drives every note-clip track against one block's worth of the shared,
/// render-side note-clip snapshot. Built fresh per block rather than stored,
/// since it only ever borrows [`AudioCore`]'s own fields for the duration of
/// a single [`AudioRenderer::render_block`] call.
struct NoteClipTimeline<'a> {
    clips: &'a NoteClipInstance,
    tracks: &'a mut [NoteClipTrack],
}

impl TimelineGenerator for NoteClipTimeline<'_> {
    fn render_block(
        &mut self,
        stream: &mut MidiStream,
        block: Region,
        playing: bool,
        just_stopped: bool,
        beats_per_measure: f64,
        beats_per_sample: f64,
    ) {
        for track in self.tracks.iter_mut() {
            track.render_block(self.clips, stream, block, playing, just_stopped, beats_per_measure, beats_per_sample);
        }
    }
}

/// The top-level handle a host constructs once: the renderer plus every
/// track sitting on top of it. `render_block`/`render` are the only entry
/// points a driver callback needs; everything else is UI-thread CRUD.
pub struct AudioCore {
    renderer: AudioRenderer,
    note_clips: NoteClipSystem,
    note_clip_tracks: Vec<NoteClipTrack>,
    audio_tracks: Vec<AudioTrack>,
}

impl AudioCore {
    pub fn new(
        config: CoreConfig,
        initial_bpm: f64,
        buffers: Arc<DoubleBuffer<HashMap<BufferHandle, AudioBuffer>, CopyForward>>,
    ) -> Self {
        let beats_per_measure = config.beats_per_measure;
        Self {
            renderer: AudioRenderer::new(config, initial_bpm, buffers),
            note_clips: NoteClipSystem::new(beats_per_measure),
            note_clip_tracks: Vec::new(),
            audio_tracks: Vec::new(),
        }
    }

    pub fn renderer(&self) -> &AudioRenderer {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut AudioRenderer {
        &mut self.renderer
    }

    pub fn note_clips_mut(&mut self) -> &mut NoteClipSystem {
        &mut self.note_clips
    }

    pub fn add_note_clip_track(&mut self, track: NoteClipTrack) -> usize {
        self.note_clip_tracks.push(track);
        self.note_clip_tracks.len() - 1
    }

    pub fn note_clip_track_mut(&mut self, index: usize) -> Option<&mut NoteClipTrack> {
        self.note_clip_tracks.get_mut(index)
    }

    pub fn add_audio_track(&mut self, track: AudioTrack) -> usize {
        self.audio_tracks.push(track);
        self.audio_tracks.len() - 1
    }

    pub fn audio_track_mut(&mut self, index: usize) -> Option<&mut AudioTrack> {
        self.audio_tracks.get_mut(index)
    }

    /// Picks up the latest acknowledged note-clip snapshot, then runs one
    /// block through the renderer with every note-clip track wired in as
    /// its timeline step.
    pub fn render_block(&mut self, num_frames: u32, sample_rate: f64) {
        self.note_clips.render_sync();
        let mut timeline = NoteClipTimeline {
            clips: self.note_clips.render_instance(),
            tracks: &mut self.note_clip_tracks,
        };
        self.renderer.render_block(num_frames, sample_rate, &mut timeline);
    }

    /// As [`Self::render_block`], but also stages output samples the way
    /// [`AudioRenderer::render`] does for a driver callback.
    pub fn render(&mut self, num_frames: u32, sample_rate: f64, now: u64) {
        self.note_clips.render_sync();
        let mut timeline = NoteClipTimeline {
            clips: self.note_clips.render_instance(),
            tracks: &mut self.note_clip_tracks,
        };
        self.renderer.render(num_frames, sample_rate, now, &mut timeline);
    }

    pub fn output(&self, out_buf: &mut [f32]) -> bool {
        self.renderer.output(out_buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::note_clip::NoteClipHandle;
    use grove_rt::ClipNote;
    use grove_score::{Cursor, MidiNote, PitchClass};

    const BPM: f64 = 4.0;

    fn region(begin_beat: f64, size_beat: f64) -> Region {
        Region {
            begin: Cursor { measure: 0, beat: begin_beat },
            size: Cursor { measure: 0, beat: size_beat },
        }
    }

    fn buffers() -> Arc<DoubleBuffer<HashMap<BufferHandle, AudioBuffer>, CopyForward>> {
        Arc::new(DoubleBuffer::new(HashMap::new(), HashMap::new()))
    }

    #[test]
    fn a_placed_note_clip_reaches_output_through_a_timeline_track() {
        let mut core = AudioCore::new(CoreConfig::default(), 120.0, buffers());

        let clip: NoteClipHandle = core.note_clips_mut().create_clip(region(0.0, 4.0));
        core.note_clips_mut().add_note(
            clip,
            ClipNote {
                span: region(0.0, 1.0),
                note: MidiNote {
                    pitch_class: PitchClass::C,
                    octave: 3,
                    velocity: 100,
                },
            },
        );
        core.note_clips_mut().end_update();

        let mut track = NoteClipTrack::new(0, 0, 9);
        core.note_clips_mut().render_sync();
        track.place_clip(clip, core.note_clips_mut().render_instance());
        track.loop_region = Some(region(0.0, 4.0));
        core.add_note_clip_track(track);

        core.renderer_mut().push_transport_command(grove_rt::TransportCommand::Play);

        let mut saw_note_on = false;
        for _ in 0..8 {
            core.render_block(512, 44_100.0);
            if core.renderer().output_messages().iter().any(|m| m.msg.is_note_on()) {
                saw_note_on = true;
                break;
            }
        }
        assert!(saw_note_on);
    }

    #[test]
    fn render_runs_the_full_pipeline_with_no_tracks_attached() {
        let mut core = AudioCore::new(CoreConfig::default(), 120.0, buffers());
        core.render(64, 44_100.0, 0);
        let mut out = vec![1.0f32; 64 * 2];
        assert!(core.output(&mut out));
    }
}
