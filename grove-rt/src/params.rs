//! Break-point automation: UI-owned parameter state, published to the
//! render side, which turns it into a sorted per-block change list.

use crate::handshake::Handshake;
use crate::transport::Transport;
use grove_score::{Cursor, Region, RegionSegment};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamId {
    pub parent: u32,
    pub index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Float(f64),
    Int(i64),
}

impl Value {
    fn as_f64(self) -> f64 {
        match self {
            Value::Float(v) => v,
            Value::Int(v) => v as f64,
        }
    }

    fn is_float(self) -> bool {
        matches!(self, Value::Float(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BreakPoint {
    pub id: u64,
    pub position: Cursor,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BreakPointSetHandle(pub u32);

#[derive(Debug, Clone)]
pub struct BreakPointSet {
    pub span: Region,
    pub points: HashMap<ParamId, Vec<BreakPoint>>,
}

impl BreakPointSet {
    pub fn new(span: Region) -> Self {
        Self {
            span,
            points: HashMap::new(),
        }
    }

    fn sorted_insert(points: &mut Vec<BreakPoint>, point: BreakPoint) {
        let pos = points
            .iter()
            .position(|p| p.position.score_lt(point.position) == false)
            .unwrap_or(points.len());
        points.insert(pos, point);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WriterId(pub u32);

#[derive(Debug, Clone)]
pub enum Modification {
    SetValue {
        id: ParamId,
        value: Value,
        writer: WriterId,
    },
    RevertToBreakPoints {
        id: ParamId,
    },
    RemoveParent {
        id: ParamId,
    },
    CreateSet {
        handle: BreakPointSetHandle,
        span: Region,
    },
    DestroySet {
        handle: BreakPointSetHandle,
    },
    AddPoint {
        set: BreakPointSetHandle,
        param: ParamId,
        point: BreakPoint,
    },
    RemovePoint {
        set: BreakPointSetHandle,
        param: ParamId,
        id: u64,
    },
    ModifyPoint {
        set: BreakPointSetHandle,
        param: ParamId,
        id: u64,
        new_value: Value,
    },
    RemoveParentFromSet {
        set: BreakPointSetHandle,
        param: ParamId,
    },
    ActivateSet {
        handle: BreakPointSetHandle,
    },
}

/// One coherent UI-side view, published whole to the render side.
#[derive(Debug, Clone, Default)]
pub struct ParameterInstance {
    pub ui_values: HashMap<ParamId, Value>,
    pub controlled_by_ui: HashSet<ParamId>,
    pub needs_resync: HashSet<ParamId>,
    pub break_point_sets: Vec<(BreakPointSetHandle, BreakPointSet)>,
    pub active_set: Option<BreakPointSetHandle>,
}

impl ParameterInstance {
    fn find_set_mut(&mut self, handle: BreakPointSetHandle) -> Option<&mut BreakPointSet> {
        self.break_point_sets
            .iter_mut()
            .find(|(h, _)| *h == handle)
            .map(|(_, s)| s)
    }

    fn active_set(&self) -> Option<&BreakPointSet> {
        let handle = self.active_set?;
        self.break_point_sets
            .iter()
            .find(|(h, _)| *h == handle)
            .map(|(_, s)| s)
    }
}

fn apply(instance: &mut ParameterInstance, m: &Modification) {
    match m.clone() {
        Modification::SetValue { id, value, .. } => {
            instance.ui_values.insert(id, value);
            instance.controlled_by_ui.insert(id);
        }
        Modification::RevertToBreakPoints { id } => {
            instance.controlled_by_ui.remove(&id);
            instance.needs_resync.insert(id);
        }
        Modification::RemoveParent { id } => {
            instance.ui_values.remove(&id);
            instance.controlled_by_ui.remove(&id);
        }
        Modification::CreateSet { handle, span } => {
            instance.break_point_sets.push((handle, BreakPointSet::new(span)));
        }
        Modification::DestroySet { handle } => {
            instance.break_point_sets.retain(|(h, _)| *h != handle);
            if instance.active_set == Some(handle) {
                instance.active_set = None;
            }
        }
        Modification::AddPoint { set, param, point } => {
            if let Some(s) = instance.find_set_mut(set) {
                BreakPointSet::sorted_insert(s.points.entry(param).or_default(), point);
            }
        }
        Modification::RemovePoint { set, param, id } => {
            if let Some(s) = instance.find_set_mut(set) {
                if let Some(points) = s.points.get_mut(&param) {
                    points.retain(|p| p.id != id);
                }
            }
        }
        Modification::ModifyPoint {
            set,
            param,
            id,
            new_value,
        } => {
            if let Some(s) = instance.find_set_mut(set) {
                if let Some(points) = s.points.get_mut(&param) {
                    if let Some(p) = points.iter_mut().find(|p| p.id == id) {
                        p.value = new_value;
                    }
                }
            }
        }
        Modification::RemoveParentFromSet { set, param } => {
            if let Some(s) = instance.find_set_mut(set) {
                s.points.remove(&param);
            }
        }
        Modification::ActivateSet { handle } => {
            instance.active_set = Some(handle);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioParameterChange {
    pub ids: [ParamId; 1],
    pub value: Value,
    pub at_frame: i32,
    pub frame_distance: i32,
}

#[derive(Debug, Clone, Copy)]
struct ActiveInterpolation {
    from: Value,
    to: Value,
    start_beats: f64,
    span_beats: f64,
}

pub struct AudioParameterSystem {
    edit: ParameterInstance,
    to_send: ParameterInstance,
    modifications: Vec<Modification>,
    handshake: Handshake<ParameterInstance>,
    published_once: bool,
    writers: HashMap<ParamId, WriterId>,

    // render side
    render: ParameterInstance,
    prev_ui_values: HashMap<ParamId, Value>,
    last_active_set: Option<BreakPointSetHandle>,
    active_interpolations: HashMap<ParamId, ActiveInterpolation>,
    cursor_feedback: crate::rings::LatestSlot<Cursor>,
}

impl Default for AudioParameterSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioParameterSystem {
    pub fn new() -> Self {
        Self {
            edit: ParameterInstance::default(),
            to_send: ParameterInstance::default(),
            modifications: Vec::new(),
            handshake: Handshake::new(),
            published_once: false,
            writers: HashMap::new(),
            render: ParameterInstance::default(),
            prev_ui_values: HashMap::new(),
            last_active_set: None,
            active_interpolations: HashMap::new(),
            cursor_feedback: crate::rings::LatestSlot::new(),
        }
    }

    pub fn request_write(&mut self, id: ParamId, writer: WriterId) -> bool {
        match self.writers.get(&id) {
            Some(w) if *w != writer => false,
            _ => {
                self.writers.insert(id, writer);
                true
            }
        }
    }

    pub fn release_write(&mut self, id: ParamId, writer: WriterId) {
        if self.writers.get(&id) == Some(&writer) {
            self.writers.remove(&id);
        }
    }

    /// Request, write, and release a writer lock in one step. Fails (no-op)
    /// if another writer currently holds `id`.
    pub fn set_value_if_no_other_writer(&mut self, id: ParamId, value: Value, writer: WriterId) -> bool {
        if !self.request_write(id, writer) {
            return false;
        }
        self.apply_modification(Modification::SetValue { id, value, writer });
        self.release_write(id, writer);
        true
    }

    pub fn apply_modification(&mut self, m: Modification) {
        apply(&mut self.edit, &m);
        self.modifications.push(m);
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

    pub fn cursor_feedback(&self) -> Option<Cursor> {
        self.cursor_feedback.take()
    }

    /// Render side: compute the sorted change list for one block.
    pub fn render_block(
        &mut self,
        transport: &Transport,
        num_frames: u32,
        sample_rate: f64,
        beats_per_measure: f64,
    ) -> Vec<AudioParameterChange> {
        let mut changes = Vec::new();
        let beats_per_sample = transport.bpm() / 60.0 / sample_rate;
        let block_beats = num_frames as f64 * beats_per_sample;
        let block_region = Region {
            begin: transport.cursor,
            size: Cursor::from_beats(block_beats, beats_per_measure),
        };

        let mut break_points_changed = false;
        if let Some(new_snapshot) = self.handshake.read() {
            for (&id, &value) in &new_snapshot.ui_values {
                if self.prev_ui_values.get(&id) != Some(&value) {
                    changes.push(AudioParameterChange {
                        ids: [id],
                        value,
                        at_frame: 0,
                        frame_distance: 0,
                    });
                }
            }
            self.prev_ui_values = new_snapshot.ui_values.clone();
            break_points_changed = new_snapshot.active_set != self.last_active_set;
            self.render = new_snapshot;
        }

        if transport.playing {
            if let Some(set) = self.render.active_set().cloned() {
                let parts = grove_score::Region::partition_loop(&block_region, &set.span, beats_per_measure, 64);
                for seg in &parts {
                    for (param, points) in &set.points {
                        if self.render.controlled_by_ui.contains(param) {
                            continue;
                        }
                        self.emit_breakpoint_changes_in_segment(
                            *param, points, &set.span, seg, beats_per_measure, beats_per_sample, &mut changes,
                        );
                    }
                }
            }
        }

        let needs_resync: Vec<ParamId> = self.render.needs_resync.drain().collect();
        for id in needs_resync {
            self.push_resync_change(id, transport.cursor, beats_per_measure, &mut changes);
        }

        if break_points_changed {
            let ids: Vec<ParamId> = self
                .render
                .active_set()
                .map(|s| s.points.keys().copied().collect())
                .unwrap_or_default();
            for id in ids {
                if !self.render.controlled_by_ui.contains(&id) {
                    self.push_resync_change(id, transport.cursor, beats_per_measure, &mut changes);
                }
            }
            self.last_active_set = self.render.active_set;
        }

        if transport.just_stopped {
            let now_beats = transport.cursor.to_beats(beats_per_measure);
            for (id, interp) in self.active_interpolations.drain() {
                let t = ((now_beats - interp.start_beats) / interp.span_beats.max(1e-9)).clamp(0.0, 1.0);
                changes.push(AudioParameterChange {
                    ids: [id],
                    value: lerp_value(t, interp.from, interp.to),
                    at_frame: 0,
                    frame_distance: 0,
                });
            }
        }

        changes.sort_by(|a, b| (a.at_frame, a.ids).cmp(&(b.at_frame, b.ids)));
        self.cursor_feedback.write(transport.cursor);
        changes
    }

    fn emit_breakpoint_changes_in_segment(
        &mut self,
        param: ParamId,
        points: &[BreakPoint],
        span: &Region,
        seg: &RegionSegment,
        beats_per_measure: f64,
        beats_per_sample: f64,
        out: &mut Vec<AudioParameterChange>,
    ) {
        if points.is_empty() {
            return;
        }
        let seg_end = seg.span.end(beats_per_measure);
        for (i, point) in points.iter().enumerate() {
            if !seg.span.contains(point.position, beats_per_measure) {
                continue;
            }
            let offset_beats =
                point.position.to_beats(beats_per_measure) - seg.span.begin.to_beats(beats_per_measure);
            let frame = seg.cumulative_offset.to_beats(beats_per_measure) / beats_per_sample
                + offset_beats / beats_per_sample;
            let frame = frame.round() as i32;
            match point.value {
                Value::Float(_) => {
                    let next = points.get(i + 1).or(points.first()).copied().unwrap_or(*point);
                    let dist_beats = if next.position == point.position {
                        span.end(beats_per_measure).to_beats(beats_per_measure)
                            - span.begin.to_beats(beats_per_measure)
                    } else {
                        Region::distance_lt(point.position, next.position, span, beats_per_measure)
                            .to_beats(beats_per_measure)
                    };
                    let frame_distance = (dist_beats / beats_per_sample).round() as i32;
                    out.push(AudioParameterChange {
                        ids: [param],
                        value: next.value,
                        at_frame: frame,
                        frame_distance,
                    });
                    self.active_interpolations.insert(
                        param,
                        ActiveInterpolation {
                            from: point.value,
                            to: next.value,
                            start_beats: point.position.to_beats(beats_per_measure),
                            span_beats: dist_beats.max(1e-9),
                        },
                    );
                }
                Value::Int(_) => {
                    out.push(AudioParameterChange {
                        ids: [param],
                        value: point.value,
                        at_frame: frame,
                        frame_distance: 0,
                    });
                }
            }
            let _ = seg_end;
        }
    }

    fn push_resync_change(
        &mut self,
        id: ParamId,
        cursor: Cursor,
        beats_per_measure: f64,
        out: &mut Vec<AudioParameterChange>,
    ) {
        if let Some(&value) = self.render.ui_values.get(&id) {
            if self.render.controlled_by_ui.contains(&id) {
                out.push(AudioParameterChange {
                    ids: [id],
                    value,
                    at_frame: 0,
                    frame_distance: 0,
                });
                return;
            }
        }
        if let Some(set) = self.render.active_set() {
            if let Some(points) = set.points.get(&id) {
                if let Some((prev, next, to_prev)) = surrounding_points(points, &set.span, cursor, beats_per_measure)
                {
                    let total = if next.position == prev.position {
                        set.span.end(beats_per_measure).to_beats(beats_per_measure)
                            - set.span.begin.to_beats(beats_per_measure)
                    } else {
                        Region::distance_lt(prev.position, next.position, &set.span, beats_per_measure)
                            .to_beats(beats_per_measure)
                    };
                    let t = if total > 0.0 {
                        to_prev.to_beats(beats_per_measure) / total
                    } else {
                        0.0
                    };
                    out.push(AudioParameterChange {
                        ids: [id],
                        value: lerp_value(t.clamp(0.0, 1.0), prev.value, next.value),
                        at_frame: 0,
                        frame_distance: 0,
                    });
                }
            }
        }
    }
}

fn lerp_value(t: f64, a: Value, b: Value) -> Value {
    if a.is_float() || b.is_float() {
        Value::Float(a.as_f64() + (b.as_f64() - a.as_f64()) * t)
    } else {
        a // int parameters hold the prior value until the next point
    }
}

/// Find the break points surrounding `cursor` within `span`'s loop
/// modulus: `(prev, next, to_prev)`, where `to_prev` is the
/// [`Region::distance_le`] from `prev` to `cursor` (zero when `cursor`
/// lands exactly on `prev`). A single-point set degenerates to
/// `prev == next` and `to_prev == 0`.
pub fn surrounding_points(
    points: &[BreakPoint],
    span: &Region,
    cursor: Cursor,
    beats_per_measure: f64,
) -> Option<(BreakPoint, BreakPoint, Cursor)> {
    if points.is_empty() {
        return None;
    }
    if points.len() == 1 {
        return Some((points[0], points[0], Cursor::zero()));
    }
    let mut prev_idx = 0;
    for (i, p) in points.iter().enumerate() {
        if !p.position.score_lt(cursor) {
            break;
        }
        prev_idx = i;
    }
    let next_idx = (prev_idx + 1) % points.len();
    let prev = points[prev_idx];
    let to_prev = Region::distance_le(prev.position, cursor, span, beats_per_measure);
    Some((prev, points[next_idx], to_prev))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BPM: f64 = 4.0;

    fn cursor(measure: i64, beat: f64) -> Cursor {
        Cursor { measure, beat }
    }

    fn param(index: u32) -> ParamId {
        ParamId { parent: 0, index }
    }

    #[test]
    fn set_value_is_visible_to_render_after_one_round_trip() {
        let mut sys = AudioParameterSystem::new();
        let id = param(1);
        sys.set_value_if_no_other_writer(id, Value::Float(0.5), WriterId(1));
        sys.end_update();

        let transport = Transport::new(BPM, 120.0);
        let changes = sys.render_block(&transport, 64, 44_100.0, BPM);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].ids, [id]);
        assert_eq!(changes[0].value, Value::Float(0.5));
    }

    #[test]
    fn second_writer_is_rejected_while_first_holds_lock() {
        let mut sys = AudioParameterSystem::new();
        let id = param(1);
        assert!(sys.request_write(id, WriterId(1)));
        assert!(!sys.request_write(id, WriterId(2)));
        sys.release_write(id, WriterId(1));
        assert!(sys.request_write(id, WriterId(2)));
    }

    #[test]
    fn single_break_point_resync_degenerates_to_that_points_value() {
        let span = Region {
            begin: Cursor::zero(),
            size: cursor(1, 0.0),
        };
        let points = vec![BreakPoint {
            id: 1,
            position: cursor(0, 2.0),
            value: Value::Float(10.0),
        }];
        let (prev, next, to_prev) = surrounding_points(&points, &span, cursor(0, 3.0), BPM).unwrap();
        assert_eq!(prev.value, next.value);
        assert_eq!(to_prev, Cursor::zero());
    }

    #[test]
    fn break_point_set_drives_interpolation_once_activated() {
        let mut sys = AudioParameterSystem::new();
        let id = param(2);
        let handle = BreakPointSetHandle(0);
        let span = Region {
            begin: Cursor::zero(),
            size: cursor(1, 0.0),
        };
        sys.apply_modification(Modification::CreateSet { handle, span });
        sys.apply_modification(Modification::AddPoint {
            set: handle,
            param: id,
            point: BreakPoint {
                id: 1,
                position: cursor(0, 0.0),
                value: Value::Float(0.0),
            },
        });
        sys.apply_modification(Modification::AddPoint {
            set: handle,
            param: id,
            point: BreakPoint {
                id: 2,
                position: cursor(0, 2.0),
                value: Value::Float(4.0),
            },
        });
        sys.apply_modification(Modification::ActivateSet { handle });
        sys.end_update();

        let mut transport = Transport::new(BPM, 120.0);
        transport.playing = true;
        sys.render_block(&transport, 64, 44_100.0, BPM);

        assert!(sys.active_interpolations.contains_key(&id));
    }
}
