//! UI-facing note-clip CRUD, published to a render-side snapshot the same
//! way [`grove_rt::AudioParameterSystem`] publishes break-point sets: a
//! queue of modifications applied immediately to an edit instance, then
//! replayed onto a staged instance and handed across a [`Handshake`] once
//! the previous snapshot has been acknowledged.

use derive_more::Display;
use grove_rt::{ClipNote, Handshake, InstanceId, NoteIndexArena};
use grove_score::{MidiNote, Region};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[display(fmt = "clip#{}", _0)]
pub struct NoteClipHandle(pub u32);

#[derive(Debug, Clone, Copy)]
struct ClipMeta {
    instance: InstanceId,
    span: Region,
}

#[derive(Debug, Clone)]
pub enum NoteClipModification {
    Create { handle: NoteClipHandle, span: Region },
    Clone { handle: NoteClipHandle, source: NoteClipHandle },
    Destroy { handle: NoteClipHandle },
    ModifyClip { handle: NoteClipHandle, span: Region },
    AddNote { handle: NoteClipHandle, note: ClipNote },
    RemoveNote { handle: NoteClipHandle, span: Region, note: MidiNote },
    ModifyNote {
        handle: NoteClipHandle,
        old_span: Region,
        old_note: MidiNote,
        new_note: ClipNote,
    },
    RemoveAllNotes { handle: NoteClipHandle },
}

/// One coherent snapshot of every clip's metadata and its note index,
/// cloned whole to move between edit/in-flight/render — see
/// [`NoteIndexArena`]'s own doc comment for why a whole-struct clone here
/// is the right tool, unlike the arena's own cheap `clone_instance`.
#[derive(Debug, Clone)]
pub struct NoteClipInstance {
    clips: HashMap<NoteClipHandle, ClipMeta>,
    arena: NoteIndexArena,
}

impl NoteClipInstance {
    fn new(beats_per_measure: f64) -> Self {
        Self {
            clips: HashMap::new(),
            arena: NoteIndexArena::new(beats_per_measure),
        }
    }

    pub fn span(&self, handle: NoteClipHandle) -> Option<Region> {
        self.clips.get(&handle).map(|m| m.span)
    }

    fn instance_id(&self, handle: NoteClipHandle) -> Option<InstanceId> {
        self.clips.get(&handle).map(|m| m.instance)
    }

    pub fn collect_notes_starting_in(&self, handle: NoteClipHandle, region: Region, cap: usize) -> Vec<ClipNote> {
        self.instance_id(handle)
            .map(|id| self.arena.collect_notes_starting_in_region(id, region, cap).0)
            .unwrap_or_default()
    }

    pub fn collect_notes_intersecting(&self, handle: NoteClipHandle, region: Region, cap: usize) -> Vec<ClipNote> {
        self.instance_id(handle)
            .map(|id| self.arena.collect_notes_intersecting_region(id, region, cap).0)
            .unwrap_or_default()
    }

    pub fn note_exists(&self, handle: NoteClipHandle, span: Region, note: MidiNote) -> bool {
        self.instance_id(handle).is_some_and(|id| {
            let (found, _) = self.arena.collect_notes_intersecting_region(id, span, 8);
            found.iter().any(|n| n.span == span && n.note == note)
        })
    }
}

fn replace_intersecting_same_pitch(arena: &mut NoteIndexArena, id: InstanceId, note: ClipNote) {
    loop {
        let (found, _) = arena.collect_notes_intersecting_region(id, note.span, 64);
        let Some(dup) = found
            .into_iter()
            .find(|n| n.note.pitch_class == note.note.pitch_class && n.note.octave == note.note.octave)
        else {
            break;
        };
        arena.remove(id, |n| n.span == dup.span && n.note == dup.note);
    }
    arena.insert(id, note);
}

fn apply(instance: &mut NoteClipInstance, m: &NoteClipModification) {
    match m.clone() {
        NoteClipModification::Create { handle, span } => {
            let id = instance.arena.create(span);
            instance.clips.insert(handle, ClipMeta { instance: id, span });
        }
        NoteClipModification::Clone { handle, source } => {
            if let Some(src) = instance.clips.get(&source).copied() {
                let id = instance.arena.clone_instance(src.instance);
                instance.clips.insert(
                    handle,
                    ClipMeta {
                        instance: id,
                        span: src.span,
                    },
                );
            }
        }
        NoteClipModification::Destroy { handle } => {
            if let Some(meta) = instance.clips.remove(&handle) {
                instance.arena.destroy(meta.instance);
            }
        }
        NoteClipModification::ModifyClip { handle, span } => {
            if let Some(meta) = instance.clips.get_mut(&handle) {
                meta.span = span;
            }
        }
        NoteClipModification::AddNote { handle, note } => {
            if let Some(meta) = instance.clips.get(&handle).copied() {
                replace_intersecting_same_pitch(&mut instance.arena, meta.instance, note);
            }
        }
        NoteClipModification::RemoveNote { handle, span, note } => {
            if let Some(meta) = instance.clips.get(&handle).copied() {
                instance.arena.remove(meta.instance, |n| n.span == span && n.note == note);
            }
        }
        NoteClipModification::ModifyNote {
            handle,
            old_span,
            old_note,
            new_note,
        } => {
            if let Some(meta) = instance.clips.get(&handle).copied() {
                instance
                    .arena
                    .remove(meta.instance, |n| n.span == old_span && n.note == old_note);
                replace_intersecting_same_pitch(&mut instance.arena, meta.instance, new_note);
            }
        }
        NoteClipModification::RemoveAllNotes { handle } => {
            if let Some(meta) = instance.clips.get(&handle).copied() {
                instance.arena.destroy(meta.instance);
                let id = instance.arena.create(meta.span);
                instance.clips.insert(
                    handle,
                    ClipMeta {
                        instance: id,
                        span: meta.span,
                    },
                );
            }
        }
    }
}

/// Owns the edit/in-flight/render triple-buffer and the UI-side call
/// surface. Call [`end_update`](Self::end_update) once per UI tick and
/// [`render_sync`](Self::render_sync) once per audio block.
pub struct NoteClipSystem {
    edit: NoteClipInstance,
    to_send: NoteClipInstance,
    modifications: Vec<NoteClipModification>,
    handshake: Handshake<NoteClipInstance>,
    published_once: bool,
    render: NoteClipInstance,
    next_handle: u32,
}

impl NoteClipSystem {
    pub fn new(beats_per_measure: f64) -> Self {
        Self {
            edit: NoteClipInstance::new(beats_per_measure),
            to_send: NoteClipInstance::new(beats_per_measure),
            modifications: Vec::new(),
            handshake: Handshake::new(),
            published_once: false,
            render: NoteClipInstance::new(beats_per_measure),
            next_handle: 0,
        }
    }

    fn apply_modification(&mut self, m: NoteClipModification) {
        apply(&mut self.edit, &m);
        self.modifications.push(m);
    }

    pub fn create_clip(&mut self, span: Region) -> NoteClipHandle {
        let handle = NoteClipHandle(self.next_handle);
        self.next_handle += 1;
        self.apply_modification(NoteClipModification::Create { handle, span });
        handle
    }

    pub fn clone_clip(&mut self, source: NoteClipHandle) -> NoteClipHandle {
        let handle = NoteClipHandle(self.next_handle);
        self.next_handle += 1;
        self.apply_modification(NoteClipModification::Clone { handle, source });
        handle
    }

    pub fn destroy_clip(&mut self, handle: NoteClipHandle) {
        self.apply_modification(NoteClipModification::Destroy { handle });
    }

    pub fn modify_clip_span(&mut self, handle: NoteClipHandle, span: Region) {
        self.apply_modification(NoteClipModification::ModifyClip { handle, span });
    }

    pub fn add_note(&mut self, handle: NoteClipHandle, note: ClipNote) {
        self.apply_modification(NoteClipModification::AddNote { handle, note });
    }

    pub fn remove_note(&mut self, handle: NoteClipHandle, span: Region, note: MidiNote) {
        self.apply_modification(NoteClipModification::RemoveNote { handle, span, note });
    }

    pub fn modify_note(&mut self, handle: NoteClipHandle, old_span: Region, old_note: MidiNote, new_note: ClipNote) {
        self.apply_modification(NoteClipModification::ModifyNote {
            handle,
            old_span,
            old_note,
            new_note,
        });
    }

    pub fn remove_all_notes(&mut self, handle: NoteClipHandle) {
        self.apply_modification(NoteClipModification::RemoveAllNotes { handle });
    }

    pub fn clip_span(&self, handle: NoteClipHandle) -> Option<Region> {
        self.edit.span(handle)
    }

    pub fn notes(&self, handle: NoteClipHandle, region: Region, cap: usize) -> Vec<ClipNote> {
        self.edit.collect_notes_intersecting(handle, region, cap)
    }

    /// UI-thread end-of-update: if the last snapshot was acknowledged,
    /// replay queued modifications onto the staged instance and publish it.
    pub fn end_update(&mut self) {
        if !self.published_once || self.handshake.acknowledged() {
            for m in self.modifications.drain(..) {
                apply(&mut self.to_send, &m);
            }
            self.handshake.publish(self.to_send.clone());
            self.published_once = true;
        }
    }

    /// Render side: pick up the latest acknowledged snapshot, if any.
    pub fn render_sync(&mut self) {
        if let Some(new_snapshot) = self.handshake.read() {
            self.render = new_snapshot;
        }
    }

    pub fn render_instance(&self) -> &NoteClipInstance {
        &self.render
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grove_score::{Cursor, PitchClass};

    const BPM: f64 = 4.0;

    fn region(begin_beat: f64, size_beat: f64) -> Region {
        Region {
            begin: Cursor { measure: 0, beat: begin_beat },
            size: Cursor { measure: 0, beat: size_beat },
        }
    }

    fn note(begin_beat: f64, size_beat: f64, octave: i8) -> ClipNote {
        ClipNote {
            span: region(begin_beat, size_beat),
            note: MidiNote {
                pitch_class: PitchClass::C,
                octave,
                velocity: 100,
            },
        }
    }

    #[test]
    fn add_note_replaces_intersecting_same_pitch() {
        let mut system = NoteClipSystem::new(BPM);
        let clip = system.create_clip(region(0.0, 4.0));
        system.add_note(clip, note(0.0, 1.0, 3));
        system.add_note(clip, note(0.5, 1.0, 3));
        let notes = system.notes(clip, region(0.0, 4.0), 16);
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].span.begin.beat, 0.5);
    }

    #[test]
    fn modify_note_moves_without_leaving_a_duplicate() {
        let mut system = NoteClipSystem::new(BPM);
        let clip = system.create_clip(region(0.0, 4.0));
        let first = note(0.0, 1.0, 3);
        system.add_note(clip, first);
        system.modify_note(clip, first.span, first.note, note(2.0, 1.0, 3));
        let notes = system.notes(clip, region(0.0, 4.0), 16);
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].span.begin.beat, 2.0);
    }

    #[test]
    fn destroyed_clip_publishes_cleanly() {
        let mut system = NoteClipSystem::new(BPM);
        let clip = system.create_clip(region(0.0, 4.0));
        system.add_note(clip, note(0.0, 1.0, 3));
        system.destroy_clip(clip);
        system.end_update();
        system.render_sync();
        assert!(system.render_instance().span(clip).is_none());
    }

    #[test]
    fn publish_waits_for_acknowledgement() {
        let mut system = NoteClipSystem::new(BPM);
        let clip = system.create_clip(region(0.0, 4.0));
        system.end_update();
        system.render_sync();
        system.add_note(clip, note(0.0, 1.0, 3));
        // not yet end_update()'d again: render side still sees the old snapshot
        assert!(system.render_instance().collect_notes_intersecting(clip, region(0.0, 4.0), 4).is_empty());
    }
}
