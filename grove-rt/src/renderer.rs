//! Block orchestrator: ties transport, parameter automation, the MIDI
//! stream, and the arp/QTN/NCSM generators into the single call a host's
//! audio callback makes once per block.

use crate::arp::ArpInstance;
use crate::buffer_store::{AudioBuffer, BufferHandle};
use crate::config::CoreConfig;
use crate::double_buffer::{CopyForward, DoubleBuffer};
use crate::midi_stream::{MidiStream, MidiStreamMessage};
use crate::ncsm::{Ncsm, NcsmVoice, Section};
use crate::note_index::NoteIndexArena;
use crate::params::{AudioParameterChange, AudioParameterSystem};
use crate::qtn::{QtnSlot, QtnTrigger};
use crate::transport::{Transport, TransportCommand};
use crate::triggered_notes::{TriggeredNoteCommand, TriggeredNotePlayResult, TriggeredNotes};
use grove_score::Region;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Hook for the per-block timeline step (audio-clip and note-clip track
/// scheduling) that [`AudioRenderer::render_block`] invokes in the fixed
/// generator order, right after triggered notes and before quantized
/// triggers. Timeline tracks live above this crate (they need the
/// note-clip system's CRUD layer), so the renderer only ever reaches them
/// through this trait rather than owning them directly.
pub trait TimelineGenerator {
    fn render_block(
        &mut self,
        stream: &mut MidiStream,
        block: Region,
        playing: bool,
        just_stopped: bool,
        beats_per_measure: f64,
        beats_per_sample: f64,
    );
}

/// No tracks hooked up: the step is a no-op. Used by callers (and this
/// crate's own tests) that don't need the timeline system.
pub struct NoTimeline;

impl TimelineGenerator for NoTimeline {
    fn render_block(
        &mut self,
        _stream: &mut MidiStream,
        _block: Region,
        _playing: bool,
        _just_stopped: bool,
        _beats_per_measure: f64,
        _beats_per_sample: f64,
    ) {
    }
}

/// The block most recently finished by [`AudioRenderer::render`], staged
/// for the driver callback to pick up via [`AudioRenderer::output`]. The
/// sample buffer here is silence: synthesizing it from the block's MIDI
/// streams and parameter changes is the DSP graph's job, a collaborator
/// this crate only ever calls through an interface, never implements.
struct CommittedBlock {
    samples: Vec<f32>,
    underflowed: bool,
}

/// Everything one [`AudioRenderer::render`] call touches. Owned entirely by
/// the audio thread; the UI side only ever reaches in through the
/// handshakes/rings each component already exposes.
pub struct AudioRenderer {
    config: CoreConfig,
    transport: Transport,
    params: AudioParameterSystem,
    stream: MidiStream,
    triggered_notes: TriggeredNotes,
    arp: ArpInstance,
    qtn_slots: Vec<QtnSlot>,
    ncsm: Ncsm,
    arena: NoteIndexArena,
    buffers: Arc<DoubleBuffer<HashMap<BufferHandle, AudioBuffer>, CopyForward>>,
    rng: StdRng,
    last_param_changes: Vec<AudioParameterChange>,
    /// Staged output a driver callback pulls from via [`Self::output`].
    /// Held by a plain `Mutex` rather than a spin-lock: the producer side
    /// (this renderer's own `render`/`on_stream_info_change` calls) never
    /// contends with itself, so the only real contention is the driver
    /// callback's `try_lock`, which is exactly what a `Mutex` gives for
    /// free without a hand-rolled spin primitive.
    committed: Mutex<CommittedBlock>,
    channels: usize,
}

impl AudioRenderer {
    pub fn new(
        config: CoreConfig,
        initial_bpm: f64,
        buffers: Arc<DoubleBuffer<HashMap<BufferHandle, AudioBuffer>, CopyForward>>,
    ) -> Self {
        Self {
            transport: Transport::new(config.beats_per_measure, initial_bpm),
            params: AudioParameterSystem::new(),
            stream: MidiStream::new(u32::MAX, u32::MAX, config.max_num_buffers_per_stream_sort),
            triggered_notes: TriggeredNotes::new(crate::triggered_notes::SOURCE_ID_TRIGGERED_NOTES),
            arp: ArpInstance::new(config.beats_per_measure),
            qtn_slots: Vec::new(),
            ncsm: Ncsm::new(config.beats_per_measure, config.max_num_voices_in_ncsm),
            arena: NoteIndexArena::new(config.beats_per_measure),
            buffers,
            rng: StdRng::seed_from_u64(0x9E3779B97F4A7C15),
            last_param_changes: Vec::new(),
            committed: Mutex::new(CommittedBlock {
                samples: Vec::new(),
                underflowed: false,
            }),
            channels: 2,
            config,
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn push_transport_command(&self, cmd: TransportCommand) -> bool {
        self.transport.push_command(cmd)
    }

    pub fn set_bpm(&self, bpm: f64) {
        self.transport.set_bpm(bpm);
    }

    pub fn params_mut(&mut self) -> &mut AudioParameterSystem {
        &mut self.params
    }

    pub fn arena_mut(&mut self) -> &mut NoteIndexArena {
        &mut self.arena
    }

    pub fn add_arp_slot(&mut self, slot: crate::arp::ArpSlot) -> Option<usize> {
        self.arp.add_slot(slot)
    }

    /// Queues an immediate note-on from a controller, closed automatically
    /// after `timeout_seconds` of wall-clock time unless
    /// [`Self::trigger_note_off`] arrives first. Returns `false` if the
    /// command ring is full.
    pub fn trigger_note_on(&self, note: grove_score::MidiNote, channel: u8, timeout_seconds: f64) -> bool {
        self.triggered_notes.push_command(TriggeredNoteCommand::On {
            note,
            channel,
            timeout_seconds,
        })
    }

    pub fn trigger_note_off(&self, note: grove_score::MidiNote, channel: u8) -> bool {
        self.triggered_notes
            .push_command(TriggeredNoteCommand::Off { note, channel })
    }

    /// Pops the next reported played span for a triggered note that has
    /// since ended (explicit off or timeout), for a recording track to fold
    /// into a clip.
    pub fn take_triggered_note_play_result(&self) -> Option<TriggeredNotePlayResult> {
        self.triggered_notes.take_play_result()
    }

    /// Adds a quantized-triggered-note slot, returning its index for use
    /// with [`trigger_qtn`](Self::trigger_qtn).
    pub fn add_qtn_slot(&mut self, source_id: u8) -> usize {
        self.qtn_slots.push(QtnSlot::new(source_id));
        self.qtn_slots.len() - 1
    }

    pub fn trigger_qtn(&mut self, slot_index: usize, trigger: QtnTrigger) {
        if let Some(slot) = self.qtn_slots.get_mut(slot_index) {
            slot.trigger(trigger);
        }
    }

    pub fn set_ncsm_sections(&mut self, sections: Vec<Section>) {
        self.ncsm.set_sections(sections);
    }

    pub fn ncsm_voice_mut(&mut self, index: usize) -> &mut NcsmVoice {
        self.ncsm.voice_mut(index)
    }

    pub fn take_ncsm_feedback(&self) -> Option<(u8, crate::ncsm::VoiceSnapshot)> {
        self.ncsm.take_feedback()
    }

    pub fn param_changes(&self) -> &[AudioParameterChange] {
        &self.last_param_changes
    }

    pub fn buffer(&self, handle: BufferHandle) -> Option<AudioBuffer> {
        self.buffers.reader_read().get(&handle).cloned()
    }

    /// The MIDI messages this renderer's generators produced for the most
    /// recently finished [`render_block`](Self::render_block) call.
    pub fn output_messages(&self) -> &[MidiStreamMessage] {
        self.stream.output()
    }

    /// Runs one block: advances the transport, recomputes the parameter
    /// change list, then lets every MIDI generator append into the block's
    /// message stream in a fixed order (triggered notes, timeline tracks,
    /// QTN slots, arp, NCSM) before the stream applies its note-on/off
    /// consistency pass.
    pub fn render_block(&mut self, num_frames: u32, sample_rate: f64, timeline: &mut dyn TimelineGenerator) {
        let start_cursor = self.transport.cursor;
        self.transport.begin_render(num_frames, sample_rate);
        let beats_per_sample = self.transport.bpm() / 60.0 / sample_rate;
        let block_beats = num_frames as f64 * beats_per_sample;
        let block_seconds = num_frames as f64 / sample_rate;

        self.last_param_changes =
            self.params
                .render_block(&self.transport, num_frames, sample_rate, self.config.beats_per_measure);

        self.stream.begin_process();

        self.triggered_notes.render_block(
            &mut self.stream,
            start_cursor,
            self.config.beats_per_measure,
            block_seconds,
        );

        timeline.render_block(
            &mut self.stream,
            Region::from_begin_end(start_cursor, self.transport.cursor, self.config.beats_per_measure),
            self.transport.playing,
            self.transport.just_stopped,
            self.config.beats_per_measure,
            beats_per_sample,
        );

        for slot in &mut self.qtn_slots {
            slot.render_block(
                &mut self.stream,
                start_cursor,
                self.transport.cursor,
                self.config.beats_per_measure,
                beats_per_sample,
            );
        }

        let offsets = self.transport.quantized_event_frame_offsets;
        self.arp.render_block(
            &mut self.stream,
            |q| offsets.get(q),
            block_beats,
            beats_per_sample,
            &mut self.rng,
        );

        self.ncsm.render_block(
            &self.arena,
            &mut self.stream,
            start_cursor,
            self.transport.just_played,
            self.transport.just_stopped,
            block_beats,
            beats_per_sample,
        );

        self.stream.write();
        self.stream.end_process();
    }

    /// Driver-callback entry point: run one block's pipeline and stage its
    /// output for [`Self::output`] to pick up. `now` is a host-supplied
    /// monotonic frame counter, carried through only so a future DSP-graph
    /// integration can timestamp its own state; this renderer doesn't
    /// interpret it.
    pub fn render(&mut self, num_frames: u32, sample_rate: f64, _now: u64, timeline: &mut dyn TimelineGenerator) {
        self.render_block(num_frames, sample_rate, timeline);
        let samples = vec![0.0f32; num_frames as usize * self.channels];
        let mut committed = self.committed.lock().unwrap();
        committed.samples = samples;
        committed.underflowed = false;
    }

    /// Driver-callback entry point: copy up to `out_buf.len()` staged
    /// samples out. Returns `false` (and zero-fills `out_buf`) if a
    /// concurrent [`Self::on_stream_info_change`] holds the lock, or if
    /// fewer samples were staged than requested.
    pub fn output(&self, out_buf: &mut [f32]) -> bool {
        let Ok(committed) = self.committed.try_lock() else {
            out_buf.fill(0.0);
            return false;
        };
        let available = committed.samples.len().min(out_buf.len());
        out_buf[..available].copy_from_slice(&committed.samples[..available]);
        if available < out_buf.len() {
            out_buf[available..].fill(0.0);
        }
        available == out_buf.len() && !committed.underflowed
    }

    /// Sample rate / channel-count / quantum change: blocks until any
    /// in-flight `output` call's `try_lock` releases, then clears the
    /// staged block so the driver doesn't replay stale samples at the new
    /// format.
    pub fn on_stream_info_change(&mut self, channels: usize) {
        self.channels = channels;
        let mut committed = self.committed.lock().unwrap();
        committed.samples.clear();
        committed.underflowed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grove_score::Quantization;

    #[test]
    fn render_block_runs_full_pipeline_without_panicking() {
        let buffers = Arc::new(DoubleBuffer::new(HashMap::new(), HashMap::new()));
        let mut renderer = AudioRenderer::new(CoreConfig::default(), 120.0, buffers);
        renderer.push_transport_command(TransportCommand::Play);
        for _ in 0..4 {
            renderer.render_block(512, 44_100.0, &mut NoTimeline);
        }
        // No generators attached: just asserts the pipeline runs cleanly.
        assert!(renderer.output_messages().is_empty());
    }

    #[test]
    fn qtn_trigger_reaches_output_once_quantum_is_crossed() {
        let buffers = Arc::new(DoubleBuffer::new(HashMap::new(), HashMap::new()));
        let mut renderer = AudioRenderer::new(CoreConfig::default(), 120.0, buffers);
        let slot = renderer.add_qtn_slot(5);
        renderer.trigger_qtn(
            slot,
            QtnTrigger {
                note_number: 60,
                velocity: 100,
                channel: 0,
                quantization: Quantization::Measure,
                beat_duration: 1.0,
            },
        );
        renderer.push_transport_command(TransportCommand::Play);
        let mut saw_note_on = false;
        for _ in 0..8 {
            renderer.render_block(512, 44_100.0, &mut NoTimeline);
            if renderer.output_messages().iter().any(|m| m.msg.is_note_on()) {
                saw_note_on = true;
                break;
            }
        }
        assert!(saw_note_on);
    }

    #[test]
    fn output_returns_silence_before_the_first_render() {
        let buffers = Arc::new(DoubleBuffer::new(HashMap::new(), HashMap::new()));
        let renderer = AudioRenderer::new(CoreConfig::default(), 120.0, buffers);
        let mut out = vec![1.0f32; 8];
        let ok = renderer.output(&mut out);
        assert!(!ok);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn output_matches_a_committed_block() {
        let buffers = Arc::new(DoubleBuffer::new(HashMap::new(), HashMap::new()));
        let mut renderer = AudioRenderer::new(CoreConfig::default(), 120.0, buffers);
        renderer.render(64, 44_100.0, 0, &mut NoTimeline);
        let mut out = vec![1.0f32; 64 * 2];
        assert!(renderer.output(&mut out));
        assert!(out.iter().all(|&s| s == 0.0));
    }
}
