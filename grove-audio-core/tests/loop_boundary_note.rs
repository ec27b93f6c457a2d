//! A note that crosses a loop's wrap point must re-trigger once per pass
//! through the loop: one note-on/note-off pair per playthrough, each
//! pair's off landing exactly at the wrap rather than being swallowed by
//! it.

use grove_audio_core::{ClipNote, Cursor, MidiNote, MidiStream, NoteClipSystem, NoteClipTrack, PitchClass, Region};

const BPM: f64 = 4.0;

fn region(begin_beat: f64, size_beat: f64) -> Region {
    Region {
        begin: Cursor { measure: 0, beat: begin_beat },
        size: Cursor { measure: 0, beat: size_beat },
    }
}

#[test]
fn note_crossing_loop_wrap_retriggers_once_per_pass() {
    let mut clips = NoteClipSystem::new(BPM);
    let clip = clips.create_clip(region(0.0, 4.0));
    clips.add_note(
        clip,
        ClipNote {
            span: region(3.5, 1.0),
            note: MidiNote {
                pitch_class: PitchClass::C,
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
    let beats_per_sample = 0.01; // 100 frames/beat, so frame math lands on whole numbers
    let block = region(0.0, 8.0);

    stream.begin_process();
    track.render_block(clips.render_instance(), &mut stream, block, true, false, BPM, beats_per_sample);
    stream.write();
    stream.end_process();

    let out = stream.output();
    assert_eq!(out.len(), 4, "expected two note-on/note-off pairs, got {out:?}");

    assert_eq!(out[0].frame, 350);
    assert!(out[0].msg.is_note_on());
    assert_eq!(out[1].frame, 400);
    assert!(out[1].msg.is_note_off());
    assert_eq!(out[2].frame, 750);
    assert!(out[2].msg.is_note_on());
    assert_eq!(out[3].frame, 800);
    assert!(out[3].msg.is_note_off());
}
