//! UI-facing surface of the grove audio core: re-exports the realtime
//! primitives from [`grove_score`] and [`grove_rt`] wholesale, then layers
//! the note-clip CRUD system and the per-track timeline scheduler on top —
//! the parts of the stack a host's UI thread calls into directly rather
//! than through the block renderer.

pub mod audio_core;
pub mod note_clip;
pub mod timeline;

pub use grove_rt::*;
pub use grove_score::*;

pub use audio_core::AudioCore;
pub use note_clip::{NoteClipHandle, NoteClipInstance, NoteClipModification, NoteClipSystem};
pub use timeline::{
    AudioClip, AudioClipHandle, AudioTrack, NoteClipTrack, TrackFlags, TriggeredNote,
};
