//! Realtime-thread data structures and generators: handshakes, double
//! buffers, bounded rings, the note-clip index, the MIDI message stream
//! system, transport, parameter automation, and the arpeggiator/QTN/NCSM
//! generators, finishing in the block renderer that drives all of them.
//!
//! Every type in this crate is safe to call from an audio callback: no
//! allocation, no locks, no syscalls on the hot path. Where a realtime
//! function needs to log, use [`rt_log_debug!`] rather than `tracing`'s
//! macros directly — it compiles to nothing unless the `rt-logging`
//! feature is on. Integration tests that exercise the hot path wrap calls
//! in `assert_no_alloc::assert_no_alloc` to catch a stray allocation
//! before it reaches a real audio thread.

pub mod arp;
pub mod buffer_store;
pub mod config;
pub mod double_buffer;
pub mod error;
pub mod handshake;
pub mod midi_stream;
pub mod ncsm;
pub mod note_index;
pub mod params;
pub mod qtn;
pub mod renderer;
pub mod rings;
pub mod transport;
pub mod triggered_notes;

pub use arp::{ArpInstance, ArpSlot, DurationMode, PitchMode, MAX_SLOTS};
pub use buffer_store::{AudioBuffer, BackingStoreType, BufferDescriptor, BufferHandle, BufferStore, RemoveResult};
pub use config::CoreConfig;
pub use double_buffer::{CopyForward, DoubleBuffer, SwapPolicy};
pub use error::CoreError;
pub use handshake::Handshake;
pub use midi_stream::{MidiStream, MidiStreamMessage, StreamStats};
pub use ncsm::{Ncsm, NcsmVoice, Section, VoiceSnapshot, SOURCE_ID_NCSM};
pub use note_index::{ClipNote, InstanceId, NoteIndexArena};
pub use params::{
    AudioParameterChange, AudioParameterSystem, BreakPoint, BreakPointSet, BreakPointSetHandle, Modification,
    ParamId, Value, WriterId,
};
pub use qtn::{QtnSlot, QtnTrigger};
pub use renderer::{AudioRenderer, NoTimeline, TimelineGenerator};
pub use rings::{LatestSlot, Ring};
pub use transport::{QuantizedEventFrameOffsets, Transport, TransportCommand};
pub use triggered_notes::{TriggeredNoteCommand, TriggeredNotePlayResult, TriggeredNotes, SOURCE_ID_TRIGGERED_NOTES};

/// Log at `debug` level from a realtime thread, compiled to nothing unless
/// the `rt-logging` feature is enabled. `tracing`'s own macros already
/// short-circuit to nothing when no subscriber is listening; this adds the
/// compile-time gate on top so a release build without the feature carries
/// no trace call sites in the hot path at all.
#[macro_export]
macro_rules! rt_log_debug {
    ($($arg:tt)*) => {
        #[cfg(feature = "rt-logging")]
        tracing::debug!($($arg)*);
    };
}

/// Log at `warn` level from a realtime thread. Always compiled in (even
/// without `rt-logging`) since a warning usually means a dropped message or
/// a queue overrun — something a host wants to see in production too.
#[macro_export]
macro_rules! rt_log_warn {
    ($($arg:tt)*) => {
        tracing::warn!($($arg)*);
    };
}
