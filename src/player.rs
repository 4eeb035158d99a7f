use std::collections::HashSet;

use crate::{
    core::Millis,
    event::EventId,
    segment::{self, TimelineSegment},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerStatus {
    Loading,
    Playing,
    Paused,
    /// Pause variant entered when the learner asks a mid-lesson question;
    /// distinct from [`PlayerStatus::Paused`] only in the label the
    /// renderer sees.
    Interrupted,
    Complete,
}

/// Renderer-facing playback snapshot, recomputed every tick.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct PlaybackState {
    pub status: PlayerStatus,
    pub segment_index: usize,
    /// 0..1 within the current segment.
    pub segment_progress: f64,
    /// 0..1 across the whole lesson.
    pub total_progress: f64,
    pub speed: f64,
    pub current_step: u32,
    pub total_steps: u32,
    pub elapsed: Millis,
    pub total_duration: Millis,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct ActiveVisual {
    pub id: EventId,
    /// 0..1 through the visual's own time slot.
    pub progress: f64,
}

/// What one tick published: the state, the visual currently animating, the
/// visuals that finished during this tick, and the segment the player
/// entered (if any) so the host can start narration audio.
#[derive(Clone, Debug)]
pub struct PlaybackFrame {
    pub state: PlaybackState,
    pub active: Option<ActiveVisual>,
    pub newly_completed: Vec<EventId>,
    pub entered_segment: Option<usize>,
}

/// Clock-driven state machine that advances through segments and their
/// visual time slots. All operations take an explicit `now` timestamp; the
/// hosting runtime owns the re-arming tick loop. Time accounting keeps a
/// banked accumulator plus a re-basable clock origin so pause, resume,
/// interrupt, and speed changes never lose or double-count time.
#[derive(Debug)]
pub struct SegmentPlayer {
    segments: Vec<TimelineSegment>,
    status: PlayerStatus,
    seg_index: usize,
    /// Clock origin while running; `None` while frozen.
    started_at: Option<Millis>,
    /// Segment time already banked across pauses and speed changes.
    banked: Millis,
    speed: f64,
    completed: Vec<EventId>,
    completed_set: HashSet<EventId>,
    /// Sum of the durations of all segments before `seg_index`.
    prior_elapsed: Millis,
    total: Millis,
    total_steps: u32,
}

impl SegmentPlayer {
    pub fn new(segments: Vec<TimelineSegment>) -> Self {
        let total = segment::total_duration(&segments);
        let total_steps = segments.iter().filter(|s| s.is_step_start).count() as u32;
        Self {
            segments,
            status: PlayerStatus::Loading,
            seg_index: 0,
            started_at: None,
            banked: Millis::ZERO,
            speed: 1.0,
            completed: Vec::new(),
            completed_set: HashSet::new(),
            prior_elapsed: Millis::ZERO,
            total,
            total_steps,
        }
    }

    pub fn segments(&self) -> &[TimelineSegment] {
        &self.segments
    }

    pub fn status(&self) -> PlayerStatus {
        self.status
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn current_segment(&self) -> Option<&TimelineSegment> {
        self.segments.get(self.seg_index)
    }

    /// Visuals completed so far, in completion order.
    pub fn completed_visuals(&self) -> &[EventId] {
        &self.completed
    }

    /// Start from the beginning, clearing completed-visual history.
    pub fn play(&mut self, now: Millis) {
        self.completed.clear();
        self.completed_set.clear();
        self.seg_index = 0;
        self.prior_elapsed = Millis::ZERO;
        self.banked = Millis::ZERO;
        if self.segments.is_empty() {
            self.status = PlayerStatus::Complete;
            self.started_at = None;
        } else {
            self.status = PlayerStatus::Playing;
            self.started_at = Some(now);
        }
    }

    /// Explicit restart out of the terminal state.
    pub fn restart(&mut self, now: Millis) {
        self.play(now);
    }

    pub fn pause(&mut self, now: Millis) {
        self.freeze(now, PlayerStatus::Paused);
    }

    /// Same freezing behavior as pause, different renderer-visible label.
    pub fn interrupt(&mut self, now: Millis) {
        self.freeze(now, PlayerStatus::Interrupted);
    }

    pub fn resume(&mut self, now: Millis) {
        if matches!(self.status, PlayerStatus::Paused | PlayerStatus::Interrupted) {
            self.status = PlayerStatus::Playing;
            self.started_at = Some(now);
        }
    }

    /// Change the speed multiplier without losing time: elapsed real time
    /// is folded into the bank at the old multiplier, then the clock
    /// origin rebases to `now`.
    pub fn set_speed(&mut self, now: Millis, multiplier: f64) {
        if !multiplier.is_finite() || multiplier <= 0.0 {
            return;
        }
        if let Some(started) = self.started_at {
            self.banked += Millis((now - started).0 * self.speed);
            self.started_at = Some(now);
        }
        self.speed = multiplier;
    }

    /// Jump to a segment. The completed-visual set becomes exactly the
    /// visuals of all segments before it, regardless of prior state. An
    /// out-of-range index is ignored.
    pub fn seek_to_segment(&mut self, now: Millis, index: usize) {
        if index >= self.segments.len() {
            tracing::debug!(index, "seek past end ignored");
            return;
        }
        self.completed.clear();
        self.completed_set.clear();
        let mut prior = Millis::ZERO;
        for seg in &self.segments[..index] {
            prior += seg.duration;
            for v in &seg.visuals {
                if self.completed_set.insert(v.id.clone()) {
                    self.completed.push(v.id.clone());
                }
            }
        }
        self.seg_index = index;
        self.prior_elapsed = prior;
        self.banked = Millis::ZERO;
        self.started_at = Some(now);
        self.status = PlayerStatus::Playing;
    }

    /// Signal from the audio backend. Advancement is purely clock-driven,
    /// so this only leaves a trace for diagnostics.
    pub fn on_audio_ended(&mut self, id: &EventId) {
        tracing::debug!(clip = %id, "audio ended");
    }

    /// Advance the clock. Completes due slots, chains into following
    /// segments inside the same tick (carrying overshoot so late ticks do
    /// not stretch the lesson), and publishes the renderer snapshot.
    pub fn tick(&mut self, now: Millis) -> PlaybackFrame {
        let mut newly_completed = Vec::new();
        let mut entered_segment = None;

        if self.status == PlayerStatus::Playing {
            loop {
                let Some(seg) = self.segments.get(self.seg_index) else {
                    self.finish();
                    break;
                };
                let duration = seg.duration;
                let raw = self.raw_elapsed(now);

                if raw.0 >= duration.0 {
                    // Segment done: everything in it is complete; move on
                    // immediately, carrying the overshoot.
                    self.complete_due_slots(duration, &mut newly_completed);
                    self.prior_elapsed += duration;
                    self.seg_index += 1;
                    self.banked = Millis(raw.0 - duration.0);
                    self.started_at = Some(now);
                    if self.seg_index >= self.segments.len() {
                        self.finish();
                        break;
                    }
                    entered_segment = Some(self.seg_index);
                } else {
                    self.complete_due_slots(raw, &mut newly_completed);
                    break;
                }
            }
        } else {
            // Frozen or idle: keep the completed set honest for the
            // current frozen elapsed value, but never advance.
            if self.current_segment().is_some() {
                let elapsed = self.segment_elapsed(now);
                self.complete_due_slots(elapsed, &mut newly_completed);
            }
        }

        PlaybackFrame {
            state: self.state(now),
            active: self.active_visual(now),
            newly_completed,
            entered_segment,
        }
    }

    /// Current renderer-facing state without side effects.
    pub fn state(&self, now: Millis) -> PlaybackState {
        let elapsed_in_seg = self.segment_elapsed(now);
        let (segment_progress, elapsed) = match self.current_segment() {
            Some(seg) if seg.duration.0 > 0.0 => (
                (elapsed_in_seg.0 / seg.duration.0).clamp(0.0, 1.0),
                self.prior_elapsed + elapsed_in_seg,
            ),
            _ => (
                if self.status == PlayerStatus::Complete {
                    1.0
                } else {
                    0.0
                },
                self.prior_elapsed,
            ),
        };
        let total_progress = if self.total.0 > 0.0 {
            (elapsed.0 / self.total.0).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let current_step = self.segments[..self.seg_index.min(self.segments.len())]
            .iter()
            .chain(self.current_segment())
            .filter(|s| s.is_step_start)
            .count() as u32;

        PlaybackState {
            status: self.status,
            segment_index: self.seg_index.min(self.segments.len().saturating_sub(1)),
            segment_progress,
            total_progress,
            speed: self.speed,
            current_step,
            total_steps: self.total_steps,
            elapsed,
            total_duration: self.total,
        }
    }

    fn active_visual(&self, now: Millis) -> Option<ActiveVisual> {
        let seg = self.current_segment()?;
        if self.status == PlayerStatus::Complete {
            return None;
        }
        let elapsed = self.segment_elapsed(now);
        let slot = seg
            .slots
            .iter()
            .rev()
            .find(|s| s.start.0 <= elapsed.0 && elapsed.0 < s.end.0)?;
        let visual = seg.visuals.get(slot.visual)?;
        let len = (slot.end.0 - slot.start.0).max(f64::EPSILON);
        Some(ActiveVisual {
            id: visual.id.clone(),
            progress: ((elapsed.0 - slot.start.0) / len).clamp(0.0, 1.0),
        })
    }

    fn complete_due_slots(&mut self, elapsed: Millis, newly: &mut Vec<EventId>) {
        let Some(seg) = self.segments.get(self.seg_index) else {
            return;
        };
        let mut due = Vec::new();
        for slot in &seg.slots {
            if slot.end.0 <= elapsed.0
                && let Some(v) = seg.visuals.get(slot.visual)
                && !self.completed_set.contains(&v.id)
            {
                due.push(v.id.clone());
            }
        }
        for id in due {
            self.completed_set.insert(id.clone());
            self.completed.push(id.clone());
            newly.push(id);
        }
    }

    /// Unclamped segment-elapsed time for the running clock.
    fn raw_elapsed(&self, now: Millis) -> Millis {
        match self.started_at {
            Some(started) => Millis(self.banked.0 + (now - started).0.max(0.0) * self.speed),
            None => self.banked,
        }
    }

    /// Segment-elapsed clamped into the segment's duration.
    fn segment_elapsed(&self, now: Millis) -> Millis {
        let raw = self.raw_elapsed(now);
        match self.current_segment() {
            Some(seg) => raw.clamp(Millis::ZERO, seg.duration),
            None => raw,
        }
    }

    fn freeze(&mut self, now: Millis, status: PlayerStatus) {
        if self.status != PlayerStatus::Playing {
            return;
        }
        self.banked = self.raw_elapsed(now);
        self.started_at = None;
        self.status = status;
    }

    fn finish(&mut self) {
        self.status = PlayerStatus::Complete;
        self.started_at = None;
        self.banked = Millis::ZERO;
        self.seg_index = self.segments.len();
        self.prior_elapsed = self.total;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::Millis,
        event::{AudioRef, EventKind, EventPayload, TeachingEvent},
        segment::build_segments,
    };

    fn visual(id: &str, ms: f64) -> TeachingEvent {
        TeachingEvent {
            id: EventId(id.to_string()),
            kind: EventKind::WriteText,
            duration: Millis(ms),
            payload: EventPayload {
                text: Some(id.to_string()),
                ..EventPayload::default()
            },
        }
    }

    fn narrate(id: &str, audio_ms: f64) -> TeachingEvent {
        TeachingEvent {
            id: EventId(id.to_string()),
            kind: EventKind::Narrate,
            duration: Millis(audio_ms),
            payload: EventPayload {
                text: Some("spoken".to_string()),
                audio: Some(AudioRef {
                    url: format!("https://cdn/{id}.mp3"),
                    duration: Some(Millis(audio_ms)),
                }),
                ..EventPayload::default()
            },
        }
    }

    fn two_segment_player() -> SegmentPlayer {
        // Segment 0: 4000ms audio, visuals a(1000) b(1000).
        // Segment 1: 2000ms audio, visual c(500).
        let events = vec![
            narrate("n0", 4000.0),
            visual("a", 1000.0),
            visual("b", 1000.0),
            narrate("n1", 2000.0),
            visual("c", 500.0),
        ];
        SegmentPlayer::new(build_segments(&events))
    }

    #[test]
    fn empty_lesson_completes_immediately_with_zero_progress() {
        let mut p = SegmentPlayer::new(Vec::new());
        p.play(Millis(0.0));
        let f = p.tick(Millis(16.0));
        assert_eq!(f.state.status, PlayerStatus::Complete);
        assert_eq!(f.state.total_progress, 0.0);
        assert!(f.active.is_none());
    }

    #[test]
    fn slots_activate_and_complete_in_order() {
        let mut p = two_segment_player();
        p.play(Millis(0.0));

        // gap = (4000 - 2000) / 2 = 1000; a: 0..1000, b: 2000..3000.
        let f = p.tick(Millis(500.0));
        assert_eq!(f.active.as_ref().unwrap().id.as_str(), "a");
        assert!(f.newly_completed.is_empty());

        let f = p.tick(Millis(1500.0));
        assert_eq!(f.newly_completed, vec![EventId("a".into())]);
        assert!(f.active.is_none(), "inside the slack gap");

        let f = p.tick(Millis(2500.0));
        assert_eq!(f.active.as_ref().unwrap().id.as_str(), "b");
        let progress = f.active.unwrap().progress;
        assert!((progress - 0.5).abs() < 1e-9);
    }

    #[test]
    fn segment_boundary_chains_within_one_tick_and_carries_overshoot() {
        let mut p = two_segment_player();
        p.play(Millis(0.0));
        // Jump straight past segment 0 (4000ms) into segment 1.
        let f = p.tick(Millis(4100.0));
        assert_eq!(f.entered_segment, Some(1));
        assert_eq!(f.state.segment_index, 1);
        // a and b completed on the way through.
        assert_eq!(p.completed_visuals().len(), 2);
        // 100ms of overshoot landed in segment 1.
        assert!((f.state.elapsed.0 - 4100.0).abs() < 1e-9);
    }

    #[test]
    fn lesson_completes_and_is_restartable() {
        let mut p = two_segment_player();
        p.play(Millis(0.0));
        let f = p.tick(Millis(10_000.0));
        assert_eq!(f.state.status, PlayerStatus::Complete);
        assert_eq!(f.state.total_progress, 1.0);
        assert_eq!(p.completed_visuals().len(), 3);

        p.restart(Millis(20_000.0));
        assert_eq!(p.status(), PlayerStatus::Playing);
        assert!(p.completed_visuals().is_empty());
        let f = p.tick(Millis(20_000.0));
        assert_eq!(f.state.segment_index, 0);
        assert_eq!(f.state.total_progress, 0.0);
    }

    #[test]
    fn pause_freezes_elapsed_and_resume_rearms() {
        let mut p = two_segment_player();
        p.play(Millis(0.0));
        p.tick(Millis(1000.0));
        p.pause(Millis(1500.0));
        // Wall time passes while paused; elapsed must not move.
        let f = p.tick(Millis(9000.0));
        assert_eq!(f.state.status, PlayerStatus::Paused);
        assert!((f.state.elapsed.0 - 1500.0).abs() < 1e-9);

        p.resume(Millis(10_000.0));
        let f = p.tick(Millis(10_500.0));
        assert_eq!(f.state.status, PlayerStatus::Playing);
        assert!((f.state.elapsed.0 - 2000.0).abs() < 1e-9);
    }

    #[test]
    fn interrupt_then_immediate_resume_changes_nothing_but_status() {
        let mut p = two_segment_player();
        p.play(Millis(0.0));
        p.tick(Millis(1200.0));
        let before = p.state(Millis(1200.0));

        p.interrupt(Millis(1200.0));
        assert_eq!(p.status(), PlayerStatus::Interrupted);
        p.resume(Millis(1200.0));

        let after = p.state(Millis(1200.0));
        assert_eq!(after.status, PlayerStatus::Playing);
        assert_eq!(after.elapsed, before.elapsed);
        assert_eq!(after.segment_index, before.segment_index);
    }

    #[test]
    fn speed_change_preserves_elapsed_at_the_instant_of_the_call() {
        let mut p = two_segment_player();
        p.play(Millis(0.0));
        let before = p.state(Millis(1000.0)).elapsed;
        p.set_speed(Millis(1000.0), 2.0);
        let after = p.state(Millis(1000.0)).elapsed;
        assert_eq!(before, after);

        // From here time runs twice as fast.
        let f = p.tick(Millis(1500.0));
        assert!((f.state.elapsed.0 - 2000.0).abs() < 1e-9);
    }

    #[test]
    fn invalid_speed_is_ignored() {
        let mut p = two_segment_player();
        p.play(Millis(0.0));
        p.set_speed(Millis(100.0), 0.0);
        p.set_speed(Millis(100.0), f64::NAN);
        assert_eq!(p.speed(), 1.0);
    }

    #[test]
    fn seek_rebuilds_completed_history_from_prior_segments() {
        let mut p = two_segment_player();
        p.play(Millis(0.0));
        p.tick(Millis(500.0));

        p.seek_to_segment(Millis(600.0), 1);
        let ids: Vec<&str> = p.completed_visuals().iter().map(|i| i.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        let f = p.tick(Millis(600.0));
        assert_eq!(f.state.segment_index, 1);
        assert!((f.state.segment_progress).abs() < 1e-9);

        // Seeking backwards shrinks the set again.
        p.seek_to_segment(Millis(700.0), 0);
        assert!(p.completed_visuals().is_empty());
    }

    #[test]
    fn seek_out_of_range_is_a_no_op() {
        let mut p = two_segment_player();
        p.play(Millis(0.0));
        p.tick(Millis(500.0));
        let before = p.state(Millis(500.0));
        p.seek_to_segment(Millis(500.0), 99);
        assert_eq!(p.state(Millis(500.0)), before);
    }

    #[test]
    fn elapsed_is_monotonic_while_playing() {
        let mut p = two_segment_player();
        p.play(Millis(0.0));
        let mut last = -1.0;
        for i in 0..80 {
            let f = p.tick(Millis(i as f64 * 100.0));
            assert!(f.state.elapsed.0 >= last);
            last = f.state.elapsed.0;
        }
    }

    #[test]
    fn step_counters_follow_step_start_segments() {
        let mut events = vec![TeachingEvent {
            id: EventId("m1".into()),
            kind: EventKind::StepMarker,
            duration: Millis(300.0),
            payload: EventPayload {
                step_number: Some(1),
                step_title: Some("One".into()),
                ..EventPayload::default()
            },
        }];
        events.push(narrate("n0", 1000.0));
        events.push(TeachingEvent {
            id: EventId("m2".into()),
            kind: EventKind::StepMarker,
            duration: Millis(300.0),
            payload: EventPayload {
                step_number: Some(2),
                step_title: Some("Two".into()),
                ..EventPayload::default()
            },
        });
        events.push(narrate("n1", 1000.0));

        let mut p = SegmentPlayer::new(build_segments(&events));
        p.play(Millis(0.0));
        let f = p.tick(Millis(0.0));
        assert_eq!(f.state.total_steps, 2);
        assert_eq!(f.state.current_step, 1);
        let f = p.tick(Millis(1500.0));
        assert_eq!(f.state.current_step, 2);
    }
}
