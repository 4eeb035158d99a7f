use crate::{
    audio::{AudioPlayer, MediaBackend},
    core::{Millis, PageIndex},
    event::{ChatReply, EventId, LessonDoc, LessonStep, TeachingEvent},
    layout::{BoardLayout, BoardSnapshot},
    normalize::EventNormalizer,
    player::{ActiveVisual, PlaybackState, PlayerStatus, SegmentPlayer},
    segment,
};

/// Everything the renderer needs for one frame: read-only playback state,
/// the board restricted to the active page, the visual currently animating,
/// and the transition flags the host reacts to.
#[derive(Clone, Debug)]
pub struct LessonFrame {
    pub playback: PlaybackState,
    pub board: BoardSnapshot,
    pub active: Option<ActiveVisual>,
    pub completed: Vec<EventId>,
    /// A new segment began during this tick (narration already started).
    pub started_segment: Option<usize>,
    /// The board advanced to a new page during this tick.
    pub page_turned: bool,
}

/// Owns the full pipeline for one lesson: canonical events, the segment
/// player, the board, and narration audio. The renderer issues commands
/// and consumes [`LessonFrame`]s; it owns no scheduling or layout state.
pub struct LessonSession<B: MediaBackend> {
    events: Vec<TeachingEvent>,
    player: SegmentPlayer,
    audio: AudioPlayer<B>,
    board: BoardLayout,
    board_key: (usize, Option<EventId>),
    last_page: PageIndex,
}

impl<B: MediaBackend> LessonSession<B> {
    /// Build a session from canonical events.
    pub fn new(events: Vec<TeachingEvent>, backend: B) -> Self {
        let segments = segment::build_segments(&events);
        let mut audio = AudioPlayer::new(backend);
        for seg in &segments {
            if let Some(clip) = &seg.audio
                && let Some(url) = &clip.url
            {
                audio.preload(&clip.id, url);
            }
        }
        Self {
            events,
            player: SegmentPlayer::new(segments),
            audio,
            board: BoardLayout::build(&[]),
            board_key: (0, None),
            last_page: PageIndex(0),
        }
    }

    /// Normalize a whole lesson's steps (synthesizing granular events for
    /// steps that arrived without them) and build the session.
    #[tracing::instrument(skip(steps, backend), fields(steps = steps.len()))]
    pub fn from_steps(steps: &[LessonStep], backend: B) -> Self {
        let mut normalizer = EventNormalizer::new();
        let events = steps
            .iter()
            .flat_map(|s| normalizer.normalize_step(s))
            .collect();
        Self::new(events, backend)
    }

    /// Build a session from a whole lesson document: normalized steps
    /// first, then any loose trailing events, through one normalizer so id
    /// uniqueness spans the document.
    pub fn from_doc(doc: &LessonDoc, backend: B) -> Self {
        let mut normalizer = EventNormalizer::new();
        let mut events: Vec<TeachingEvent> = doc
            .steps
            .iter()
            .flat_map(|s| normalizer.normalize_step(s))
            .collect();
        events.extend(doc.events.iter().map(|v| normalizer.normalize_event(v)));
        Self::new(events, backend)
    }

    /// Build a session from raw wire event records.
    pub fn from_raw_events(raw: &[serde_json::Value], backend: B) -> Self {
        let mut normalizer = EventNormalizer::new();
        let events = raw.iter().map(|v| normalizer.normalize_event(v)).collect();
        Self::new(events, backend)
    }

    /// Build a session for a mid-lesson answer.
    pub fn from_reply(reply: &ChatReply, backend: B) -> Self {
        let mut normalizer = EventNormalizer::new();
        let events = normalizer.normalize_reply(reply);
        Self::new(events, backend)
    }

    pub fn events(&self) -> &[TeachingEvent] {
        &self.events
    }

    pub fn player(&self) -> &SegmentPlayer {
        &self.player
    }

    /// Board view for an arbitrary page; [`LessonFrame::board`] already
    /// carries the active one.
    pub fn board(&self, page: PageIndex) -> BoardSnapshot {
        self.board.snapshot(page)
    }

    pub fn play(&mut self, now: Millis) {
        self.player.play(now);
        self.start_segment_audio(now);
    }

    pub fn pause(&mut self, now: Millis) {
        self.player.pause(now);
        self.audio.pause();
    }

    pub fn resume(&mut self, now: Millis) {
        self.player.resume(now);
        self.audio.resume(now);
    }

    pub fn interrupt(&mut self, now: Millis) {
        self.player.interrupt(now);
        self.audio.pause();
    }

    pub fn set_speed(&mut self, now: Millis, multiplier: f64) {
        self.player.set_speed(now, multiplier);
        self.audio.set_speed(multiplier);
    }

    pub fn seek_to_segment(&mut self, now: Millis, index: usize) {
        self.player.seek_to_segment(now, index);
        self.start_segment_audio(now);
    }

    pub fn restart(&mut self, now: Millis) {
        self.player.restart(now);
        self.start_segment_audio(now);
    }

    /// One display-refresh tick: poll audio (signals never block the
    /// clock), advance the player, start narration for any segment entered,
    /// and refresh the board from the completed+active visual set.
    pub fn tick(&mut self, now: Millis) -> LessonFrame {
        if let Some(ended) = self.audio.poll(now) {
            self.player.on_audio_ended(&ended.id);
        }

        let frame = self.player.tick(now);
        if frame.entered_segment.is_some() {
            self.start_segment_audio(now);
        }

        let active = frame.active.clone();
        self.refresh_board(active.as_ref().map(|a| a.id.clone()));

        let page = self.board.active_page();
        let page_turned = page != self.last_page;
        self.last_page = page;

        LessonFrame {
            playback: frame.state,
            board: self.board.snapshot(page),
            active,
            completed: self.player.completed_visuals().to_vec(),
            started_segment: frame.entered_segment,
            page_turned,
        }
    }

    fn start_segment_audio(&mut self, now: Millis) {
        if self.player.status() != PlayerStatus::Playing {
            return;
        }
        let Some(clip) = self.player.current_segment().and_then(|s| s.audio.as_ref()) else {
            return;
        };
        let id = clip.id.clone();
        let url = clip.url.clone();
        self.audio.play(now, &id, url.as_deref());
    }

    /// Rebuild the board deterministically from the visible event history.
    /// Seek and interrupt reconstruct it from scratch the same way, so no
    /// incremental state can drift.
    fn refresh_board(&mut self, active: Option<EventId>) {
        let completed_len = self.player.completed_visuals().len();
        let key = (completed_len, active.clone());
        if key == self.board_key {
            return;
        }
        let visible: Vec<TeachingEvent> = self
            .events
            .iter()
            .filter(|ev| {
                ev.is_visual()
                    && (active.as_ref() == Some(&ev.id)
                        || self.player.completed_visuals().contains(&ev.id))
            })
            .cloned()
            .collect();
        self.board = BoardLayout::build(&visible);
        self.board_key = key;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SilentBackend;
    use crate::event::LessonStep;

    fn session() -> LessonSession<SilentBackend> {
        let steps = vec![
            LessonStep {
                step_number: 1,
                title: "Setup".to_string(),
                content: "Given: f(x) = x^2\n\nDifferentiate: $$f'(x) = 2x$$".to_string(),
                narration: Some("We start from the definition.".to_string()),
                ..LessonStep::default()
            },
            LessonStep {
                step_number: 2,
                title: "Check".to_string(),
                content: "Verify at x = 3".to_string(),
                ..LessonStep::default()
            },
        ];
        LessonSession::from_steps(&steps, SilentBackend::new())
    }

    #[test]
    fn lesson_plays_through_to_completion() {
        let mut s = session();
        s.play(Millis(0.0));

        let mut saw_board_content = false;
        let mut last_frame = None;
        for i in 0..600 {
            let f = s.tick(Millis(i as f64 * 100.0));
            if !f.board.objects.is_empty() {
                saw_board_content = true;
            }
            let done = f.playback.status == PlayerStatus::Complete;
            last_frame = Some(f);
            if done {
                break;
            }
        }
        let f = last_frame.unwrap();
        assert_eq!(f.playback.status, PlayerStatus::Complete);
        assert!(saw_board_content);
        // Every visual ended up completed.
        let visual_count = s.events().iter().filter(|e| e.is_visual()).count();
        assert_eq!(f.completed.len(), visual_count);
    }

    #[test]
    fn board_holds_only_completed_and_active_visuals() {
        let mut s = session();
        s.play(Millis(0.0));
        let f = s.tick(Millis(100.0));
        for o in &f.board.objects {
            let completed = f.completed.contains(&o.id);
            let active = f.active.as_ref().map(|a| &a.id) == Some(&o.id);
            assert!(completed || active);
        }
    }

    #[test]
    fn interrupt_resume_preserves_elapsed() {
        let mut s = session();
        s.play(Millis(0.0));
        s.tick(Millis(1000.0));
        s.interrupt(Millis(1500.0));
        let frozen = s.tick(Millis(50_000.0));
        assert_eq!(frozen.playback.status, PlayerStatus::Interrupted);
        assert!((frozen.playback.elapsed.0 - 1500.0).abs() < 1e-9);

        s.resume(Millis(60_000.0));
        let f = s.tick(Millis(60_000.0));
        assert_eq!(f.playback.status, PlayerStatus::Playing);
        assert!((f.playback.elapsed.0 - 1500.0).abs() < 1e-9);
    }

    #[test]
    fn seek_rebuilds_board_from_prior_segments() {
        let mut s = session();
        s.play(Millis(0.0));
        s.tick(Millis(0.0));

        let last = s.player().segments().len() - 1;
        s.seek_to_segment(Millis(10.0), last);
        let f = s.tick(Millis(10.0));

        // All visuals from earlier segments are on the board already.
        let prior_visuals: usize = s.player().segments()[..last]
            .iter()
            .map(|seg| seg.visuals.len())
            .sum();
        assert_eq!(f.completed.len(), prior_visuals);
    }

    #[test]
    fn raw_event_stream_builds_a_playable_session() {
        let raw = vec![
            serde_json::json!({"type": "narrate", "text": "Look here."}),
            serde_json::json!({"type": "write_equation", "latex": "x = 1"}),
        ];
        let mut s = LessonSession::from_raw_events(&raw, SilentBackend::new());
        assert_eq!(s.player().segments().len(), 1);
        s.play(Millis(0.0));
        let f = s.tick(Millis(0.0));
        assert_eq!(f.playback.status, PlayerStatus::Playing);
    }

    #[test]
    fn reply_session_uses_the_narrow_builder() {
        let reply = ChatReply {
            text: "Because the derivative is linear.".to_string(),
            ..ChatReply::default()
        };
        let mut s = LessonSession::from_reply(&reply, SilentBackend::new());
        assert!(!s.player().segments().is_empty());
        s.play(Millis(0.0));
        let f = s.tick(Millis(0.0));
        assert_eq!(f.playback.status, PlayerStatus::Playing);
    }
}
