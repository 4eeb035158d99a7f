use crate::{
    core::Millis,
    event::{EventId, EventKind, TeachingEvent},
};

/// No segment plays for less than this, so the renderer always gets a
/// perceptible beat even for degenerate input.
pub const MIN_SEGMENT_MS: f64 = 300.0;

/// Narration clip descriptor for one segment. The url is absent when the
/// backend declared narration but attached no audio; timing then runs off
/// the declared duration alone.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AudioClip {
    pub id: EventId,
    pub url: Option<String>,
    pub duration: Millis,
    pub narration: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StepTag {
    pub number: u32,
    pub title: String,
}

/// Time window of one visual inside its segment, relative to segment start.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct VisualSlot {
    /// Index into the segment's `visuals`.
    pub visual: usize,
    pub start: Millis,
    pub end: Millis,
}

/// One playback unit: at most one narration clip plus the visuals that play
/// alongside it. Read-only during playback.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct TimelineSegment {
    pub audio: Option<AudioClip>,
    pub visuals: Vec<TeachingEvent>,
    pub slots: Vec<VisualSlot>,
    /// Sum of the visual event durations (pauses excluded).
    pub visual_duration: Millis,
    /// max(audio, visual) plus pause extension, floored at [`MIN_SEGMENT_MS`].
    pub duration: Millis,
    pub step: Option<StepTag>,
    pub is_step_start: bool,
}

impl TimelineSegment {
    pub fn audio_duration(&self) -> Millis {
        self.audio.as_ref().map(|a| a.duration).unwrap_or(Millis::ZERO)
    }
}

/// Fold an ordered event stream into segments.
///
/// A narration event always closes the open segment and starts a new one;
/// visuals accumulate into the open segment (opening a silent one if
/// needed); a pause extends the open segment without adding a visual; a
/// step marker closes nothing but tags the next-opened segment. The open
/// segment is flushed on stream end.
#[tracing::instrument(skip(events), fields(events = events.len()))]
pub fn build_segments(events: &[TeachingEvent]) -> Vec<TimelineSegment> {
    let mut out = Vec::new();
    let mut open: Option<OpenSegment> = None;
    let mut pending_step: Option<StepTag> = None;

    for ev in events {
        match ev.kind {
            EventKind::Narrate => {
                if let Some(seg) = open.take() {
                    out.push(seg.close());
                }
                let mut seg = OpenSegment::new(Some(narration_clip(ev)));
                seg.take_step(&mut pending_step);
                open = Some(seg);
            }
            EventKind::StepMarker => {
                pending_step = Some(StepTag {
                    number: ev.payload.step_number.unwrap_or(0),
                    title: ev.payload.step_title.clone().unwrap_or_default(),
                });
            }
            EventKind::Pause => {
                let seg = open.get_or_insert_with(|| {
                    let mut seg = OpenSegment::new(None);
                    seg.take_step(&mut pending_step);
                    seg
                });
                seg.pause_extra += ev.duration;
            }
            _ => {
                debug_assert!(ev.is_visual());
                let seg = open.get_or_insert_with(|| {
                    let mut seg = OpenSegment::new(None);
                    seg.take_step(&mut pending_step);
                    seg
                });
                seg.visuals.push(ev.clone());
            }
        }
    }

    if let Some(seg) = open.take() {
        out.push(seg.close());
    }
    out
}

pub fn total_duration(segments: &[TimelineSegment]) -> Millis {
    segments
        .iter()
        .fold(Millis::ZERO, |acc, s| acc + s.duration)
}

fn narration_clip(ev: &TeachingEvent) -> AudioClip {
    let (url, declared) = match &ev.payload.audio {
        Some(a) => (Some(a.url.clone()), a.duration),
        None => (None, None),
    };
    AudioClip {
        id: ev.id.clone(),
        url,
        duration: declared.unwrap_or(ev.duration),
        narration: ev.payload.text.clone(),
    }
}

struct OpenSegment {
    audio: Option<AudioClip>,
    visuals: Vec<TeachingEvent>,
    pause_extra: Millis,
    step: Option<StepTag>,
    is_step_start: bool,
}

impl OpenSegment {
    fn new(audio: Option<AudioClip>) -> Self {
        Self {
            audio,
            visuals: Vec::new(),
            pause_extra: Millis::ZERO,
            step: None,
            is_step_start: false,
        }
    }

    fn take_step(&mut self, pending: &mut Option<StepTag>) {
        if let Some(tag) = pending.take() {
            self.step = Some(tag);
            self.is_step_start = true;
        }
    }

    fn close(self) -> TimelineSegment {
        let visual_duration = self
            .visuals
            .iter()
            .fold(Millis::ZERO, |acc, v| acc + v.duration);
        let audio_duration = self
            .audio
            .as_ref()
            .map(|a| a.duration)
            .unwrap_or(Millis::ZERO);
        let duration =
            (audio_duration.max(visual_duration) + self.pause_extra).max(Millis(MIN_SEGMENT_MS));
        let slots = compute_slots(&self.visuals, audio_duration);

        TimelineSegment {
            audio: self.audio,
            visuals: self.visuals,
            slots,
            visual_duration,
            duration,
            step: self.step,
            is_step_start: self.is_step_start,
        }
    }
}

/// Per-visual time windows. When the visuals fit inside the narration, the
/// slack is spread as an even trailing gap after each visual, never before
/// the first, so a visual can never run ahead of the narration. Otherwise
/// visuals pack back-to-back.
fn compute_slots(visuals: &[TeachingEvent], audio_duration: Millis) -> Vec<VisualSlot> {
    if visuals.is_empty() {
        return Vec::new();
    }
    let total: f64 = visuals.iter().map(|v| v.duration.0).sum();
    let gap = if total <= audio_duration.0 {
        (audio_duration.0 - total) / visuals.len() as f64
    } else {
        0.0
    };

    let mut slots = Vec::with_capacity(visuals.len());
    let mut t = 0.0;
    for (i, v) in visuals.iter().enumerate() {
        slots.push(VisualSlot {
            visual: i,
            start: Millis(t),
            end: Millis(t + v.duration.0),
        });
        t += v.duration.0 + gap;
    }
    slots
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventPayload;

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

    fn narrate(id: &str, ms: f64, audio_ms: Option<f64>) -> TeachingEvent {
        TeachingEvent {
            id: EventId(id.to_string()),
            kind: EventKind::Narrate,
            duration: Millis(ms),
            payload: EventPayload {
                text: Some("spoken".to_string()),
                audio: audio_ms.map(|d| crate::event::AudioRef {
                    url: format!("https://cdn/{id}.mp3"),
                    duration: Some(Millis(d)),
                }),
                ..EventPayload::default()
            },
        }
    }

    fn marker(number: u32, title: &str) -> TeachingEvent {
        TeachingEvent {
            id: EventId(format!("m{number}")),
            kind: EventKind::StepMarker,
            duration: Millis(300.0),
            payload: EventPayload {
                step_number: Some(number),
                step_title: Some(title.to_string()),
                ..EventPayload::default()
            },
        }
    }

    fn pause(ms: f64) -> TeachingEvent {
        TeachingEvent {
            id: EventId(format!("p{ms}")),
            kind: EventKind::Pause,
            duration: Millis(ms),
            payload: EventPayload::default(),
        }
    }

    #[test]
    fn narration_closes_and_opens_segments() {
        let events = vec![
            narrate("n1", 3000.0, Some(3000.0)),
            visual("v1", 1000.0),
            narrate("n2", 2000.0, Some(2000.0)),
            visual("v2", 1000.0),
        ];
        let segs = build_segments(&events);
        assert_eq!(segs.len(), 2);
        assert_eq!(segs[0].visuals.len(), 1);
        assert_eq!(segs[1].visuals.len(), 1);
        assert_eq!(segs[0].audio.as_ref().unwrap().id.as_str(), "n1");
    }

    #[test]
    fn leading_visuals_open_a_silent_segment() {
        let events = vec![visual("v1", 1000.0), narrate("n1", 2000.0, None)];
        let segs = build_segments(&events);
        assert_eq!(segs.len(), 2);
        assert!(segs[0].audio.is_none());
        assert_eq!(segs[0].duration, Millis(1000.0));
    }

    #[test]
    fn duration_is_max_of_audio_and_visuals_with_floor() {
        for seg in build_segments(&[
            narrate("n1", 5000.0, Some(5000.0)),
            visual("v1", 1000.0),
            visual("v2", 1500.0),
        ]) {
            assert!(seg.duration.0 >= seg.visual_duration.0);
        }

        let segs = build_segments(&[narrate("n", 3000.0, Some(3000.0)), visual("v", 4000.0)]);
        assert_eq!(segs[0].duration, Millis(4000.0));

        let segs = build_segments(&[visual("tiny", 50.0)]);
        assert_eq!(segs[0].duration, Millis(MIN_SEGMENT_MS));
        assert_eq!(segs[0].visual_duration, Millis(50.0));
    }

    #[test]
    fn pause_extends_duration_without_a_visual() {
        let segs = build_segments(&[
            narrate("n", 2000.0, Some(2000.0)),
            visual("v", 1000.0),
            pause(1200.0),
        ]);
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].visuals.len(), 1);
        assert_eq!(segs[0].visual_duration, Millis(1000.0));
        assert_eq!(segs[0].duration, Millis(3200.0));
    }

    #[test]
    fn step_marker_tags_the_next_opened_segment() {
        let events = vec![
            narrate("n1", 1000.0, None),
            marker(2, "Part two"),
            visual("v1", 500.0), // still inside the n1 segment
            narrate("n2", 1000.0, None),
        ];
        let segs = build_segments(&events);
        assert_eq!(segs.len(), 2);
        assert!(segs[0].step.is_none());
        assert!(!segs[0].is_step_start);
        // Marker arrived while segment 0 was open, so it tags segment 1.
        assert!(segs[1].is_step_start);
        assert_eq!(
            segs[1].step,
            Some(StepTag {
                number: 2,
                title: "Part two".to_string()
            })
        );
    }

    #[test]
    fn slack_is_distributed_after_visuals_never_before_the_first() {
        let segs = build_segments(&[
            narrate("n", 6000.0, Some(6000.0)),
            visual("a", 1000.0),
            visual("b", 1000.0),
            visual("c", 1000.0),
        ]);
        let slots = &segs[0].slots;
        assert_eq!(slots[0].start, Millis(0.0));
        // slack = 3000, gap = 1000 after each visual.
        assert_eq!(slots[1].start, Millis(2000.0));
        assert_eq!(slots[2].start, Millis(4000.0));
        for w in slots.windows(2) {
            assert!(w[1].start.0 >= w[0].start.0);
        }
    }

    #[test]
    fn overlong_visuals_pack_back_to_back() {
        let segs = build_segments(&[
            narrate("n", 1000.0, Some(1000.0)),
            visual("a", 2000.0),
            visual("b", 3000.0),
        ]);
        let slots = &segs[0].slots;
        assert_eq!(slots[0].start, Millis(0.0));
        assert_eq!(slots[0].end, Millis(2000.0));
        assert_eq!(slots[1].start, Millis(2000.0));
        assert_eq!(slots[1].end, Millis(5000.0));
        assert_eq!(segs[0].duration, Millis(5000.0));
    }

    #[test]
    fn empty_stream_builds_no_segments() {
        assert!(build_segments(&[]).is_empty());
        assert_eq!(total_duration(&[]), Millis::ZERO);
    }
}
