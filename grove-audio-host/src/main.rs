//! Drives a [`grove_audio_core::AudioCore`] through a fixed-quantum loop the
//! way a real host's audio callback would, but against a no-op sink instead
//! of a sound card — useful for exercising the renderer's `render`/`output`
//! contract, and a placed note-clip track's timeline scheduling, without any
//! platform audio dependency.

use grove_audio_core::{
    AudioCore, BufferHandle, ClipNote, CoreConfig, Cursor, DoubleBuffer, MidiNote, NoteClipTrack, PitchClass,
    QtnTrigger, Quantization, Region, TransportCommand,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const BLOCK_FRAMES: u32 = 512;
const SAMPLE_RATE: f64 = 44_100.0;
const CHANNELS: usize = 2;
const BEATS_PER_MEASURE: f64 = 4.0;

fn setup_tracing() {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_env("GROVE_LOG"))
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn region(begin_beat: f64, size_beat: f64) -> Region {
    Region {
        begin: Cursor { measure: 0, beat: begin_beat },
        size: Cursor { measure: 0, beat: size_beat },
    }
}

fn main() {
    setup_tracing();

    let buffers = Arc::new(DoubleBuffer::new(
        HashMap::<BufferHandle, _>::new(),
        HashMap::new(),
    ));
    let mut core = AudioCore::new(CoreConfig::default(), 120.0, buffers);
    core.renderer_mut().on_stream_info_change(CHANNELS);

    let slot = core.renderer_mut().add_qtn_slot(0);
    core.renderer_mut().trigger_qtn(
        slot,
        QtnTrigger {
            note_number: 60,
            velocity: 100,
            channel: 0,
            quantization: Quantization::Measure,
            beat_duration: 1.0,
        },
    );

    let clip = core.note_clips_mut().create_clip(region(0.0, BEATS_PER_MEASURE));
    core.note_clips_mut().add_note(
        clip,
        ClipNote {
            span: region(0.0, 1.0),
            note: MidiNote {
                pitch_class: PitchClass::E,
                octave: 3,
                velocity: 90,
            },
        },
    );
    core.note_clips_mut().end_update();
    core.note_clips_mut().render_sync();

    let mut track = NoteClipTrack::new(0, 1, 9);
    track.loop_region = Some(region(0.0, BEATS_PER_MEASURE));
    track.place_clip(clip, core.note_clips_mut().render_instance());
    core.add_note_clip_track(track);

    core.renderer_mut().push_transport_command(TransportCommand::Play);

    let mut out = vec![0.0f32; BLOCK_FRAMES as usize * CHANNELS];
    let block_duration = Duration::from_secs_f64(BLOCK_FRAMES as f64 / SAMPLE_RATE);

    tracing::info!(frames = BLOCK_FRAMES, sample_rate = SAMPLE_RATE, "starting fixed-quantum render loop");
    for now in 0..200u64 {
        core.render(BLOCK_FRAMES, SAMPLE_RATE, now);
        let ok = core.output(&mut out);
        if !ok {
            tracing::warn!(block = now, "output underflowed or missed a staged block");
        }
        for msg in core.renderer().output_messages() {
            tracing::debug!(?msg, "midi message");
        }
        std::thread::sleep(block_duration);
    }
}
