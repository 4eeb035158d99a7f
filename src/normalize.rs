use std::collections::HashSet;

use serde_json::Value;

use crate::{
    core::{Millis, Region},
    event::{
        AnnotationStyle, AudioRef, ChatReply, EventId, EventKind, EventPayload, ExplicitGeometry,
        Intent, LessonStep, MathBlock, TeachingEvent,
    },
};

/// Fixed durations for events whose length is not content-driven.
pub const STEP_MARKER_MS: f64 = 300.0;
pub const ANNOTATE_MS: f64 = 600.0;
pub const CLEAR_MS: f64 = 400.0;
pub const PAUSE_MS: f64 = 1200.0;
pub const DRAW_MS: f64 = 1000.0;

/// Converts heterogeneous wire records into canonical [`TeachingEvent`]s and
/// synthesizes event streams from flat lesson text when the backend supplied
/// none. Stateful only for id bookkeeping: synthesized ids are drawn from a
/// running counter and duplicate wire ids are suffixed, keeping ids unique
/// across the whole lesson.
#[derive(Debug, Default)]
pub struct EventNormalizer {
    counter: u64,
    seen: HashSet<String>,
    last_visual: Option<EventId>,
}

impl EventNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize one raw event record. Accepts both wire conventions
    /// (snake_case backend fields, camelCase frontend fields) and both
    /// payload placements (nested under `payload` or flattened at top
    /// level; nested wins on conflict). Malformed fields default silently;
    /// a non-object record degrades to a short pause.
    pub fn normalize_event(&mut self, raw: &Value) -> TeachingEvent {
        if !raw.is_object() {
            return TeachingEvent {
                id: self.fresh_id(),
                kind: EventKind::Pause,
                duration: Millis(STEP_MARKER_MS),
                payload: EventPayload::default(),
            };
        }

        let kind = parse_kind(
            lookup_str(raw, &["type", "event_type", "eventType", "kind"]).as_deref(),
        );
        let payload = self.extract_payload(raw, kind);

        let duration = lookup_f64(raw, &["duration", "duration_ms", "durationMs"])
            .filter(|d| *d > 0.0)
            .map(Millis)
            .unwrap_or_else(|| estimate_duration(kind, &payload));

        let id = match lookup_str(raw, &["id", "event_id", "eventId"]) {
            Some(s) if !s.trim().is_empty() => self.dedupe_id(s),
            _ => self.fresh_id(),
        };

        if kind.places_object() {
            self.last_visual = Some(id.clone());
        }

        TeachingEvent {
            id,
            kind,
            duration,
            payload,
        }
    }

    /// Normalize a whole step: pre-built events are taken through the wire
    /// boundary, otherwise a deterministic stream is synthesized from the
    /// flat step text.
    #[tracing::instrument(skip(self, step), fields(step = step.step_number))]
    pub fn normalize_step(&mut self, step: &LessonStep) -> Vec<TeachingEvent> {
        if step.events.is_empty() {
            return self.synthesize_step(step);
        }
        step.events
            .iter()
            .map(|raw| self.normalize_event(raw))
            .collect()
    }

    /// Deterministic fallback stream for a step with no granular events:
    /// step marker, narration for the step title, content blocks split on
    /// blank lines (whole-block display math becomes an equation, anything
    /// else one text event per line), leftover math blocks, trailing pause.
    pub fn synthesize_step(&mut self, step: &LessonStep) -> Vec<TeachingEvent> {
        let mut out = Vec::new();
        out.push(self.step_marker(Some(step.step_number), Some(step.title.clone())));
        out.push(self.narration(
            step.narration.clone().unwrap_or_else(|| step.title.clone()),
            step.audio_url.clone(),
            step.audio_duration,
            Some(step.step_number),
        ));

        let mut emitted_latex: Vec<String> = Vec::new();
        for block in split_blocks(&step.content) {
            let spans = display_math_spans(&block);
            if spans.is_empty() {
                for line in block.lines().map(str::trim).filter(|l| !l.is_empty()) {
                    out.push(self.text_line(line.to_string(), Some(step.step_number)));
                }
            } else {
                for latex in spans {
                    emitted_latex.push(latex.clone());
                    out.push(self.equation(latex, true, Some(step.step_number)));
                }
            }
        }

        for mb in &step.math_blocks {
            let latex = mb.latex.trim().to_string();
            if latex.is_empty() || emitted_latex.iter().any(|e| *e == latex) {
                continue;
            }
            out.push(self.equation(latex, mb.display, Some(step.step_number)));
        }

        out.push(self.pause(Some(step.step_number)));
        out
    }

    /// Narrower fallback for a mid-lesson answer: marker, narration, body
    /// lines, math blocks, pause. Pre-built events on the reply take the
    /// normal boundary instead.
    pub fn normalize_reply(&mut self, reply: &ChatReply) -> Vec<TeachingEvent> {
        if !reply.events.is_empty() {
            return reply
                .events
                .iter()
                .map(|raw| self.normalize_event(raw))
                .collect();
        }

        let mut out = Vec::new();
        out.push(self.step_marker(None, None));
        out.push(self.narration(
            reply.narration.clone().unwrap_or_else(|| reply.text.clone()),
            reply.audio_url.clone(),
            reply.audio_duration,
            None,
        ));
        for line in reply.text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            out.push(self.text_line(line.to_string(), None));
        }
        for mb in &reply.math_blocks {
            let latex = mb.latex.trim().to_string();
            if !latex.is_empty() {
                out.push(self.equation(latex, mb.display, None));
            }
        }
        out.push(self.pause(None));
        out
    }

    fn extract_payload(&mut self, raw: &Value, kind: EventKind) -> EventPayload {
        let mut p = EventPayload {
            text: lookup_str(raw, &["text", "content"]),
            latex: lookup_str(raw, &["latex", "equation"]),
            display: lookup_bool(raw, &["display"]),
            region: lookup_str(raw, &["region", "lane", "anchor", "zone", "position"])
                .and_then(|s| Region::parse(&s)),
            intent: lookup_str(raw, &["intent", "role"]).and_then(|s| parse_intent(&s)),
            geometry: extract_geometry(raw),
            order: lookup_f64(raw, &["order", "render_order", "renderOrder", "seq"])
                .map(|v| v as i32),
            audio: extract_audio(raw),
            annotation: lookup_str(raw, &["annotation_type", "annotationType", "style"])
                .and_then(|s| parse_annotation(&s)),
            target_id: None,
            chain_id: lookup_str(raw, &["chain_id", "chainId", "group_id", "groupId", "group"]),
            step_number: lookup_f64(raw, &["step_number", "stepNumber"]).map(|v| v as u32),
            step_title: lookup_str(raw, &["step_title", "stepTitle"]),
        };

        // Annotate and clear both address existing objects. An annotate
        // without a target means "the latest visual"; a clear without one
        // stays region- or board-scoped.
        if matches!(kind, EventKind::Annotate | EventKind::ClearRegion) {
            p.target_id = match lookup_str(raw, &["target_id", "targetId", "target"]) {
                Some(t) if t == "previous" => self.last_visual.clone(),
                Some(t) if !t.trim().is_empty() => Some(EventId(t)),
                _ if kind == EventKind::Annotate => self.last_visual.clone(),
                _ => None,
            };
        }
        p
    }

    fn step_marker(&mut self, number: Option<u32>, title: Option<String>) -> TeachingEvent {
        TeachingEvent {
            id: self.fresh_id(),
            kind: EventKind::StepMarker,
            duration: Millis(STEP_MARKER_MS),
            payload: EventPayload {
                step_number: number,
                step_title: title,
                ..EventPayload::default()
            },
        }
    }

    fn narration(
        &mut self,
        text: String,
        audio_url: Option<String>,
        audio_duration: Option<f64>,
        step_number: Option<u32>,
    ) -> TeachingEvent {
        let duration = audio_duration
            .filter(|d| *d > 0.0)
            .map(Millis)
            .unwrap_or_else(|| narrate_duration(&text));
        TeachingEvent {
            id: self.fresh_id(),
            kind: EventKind::Narrate,
            duration,
            payload: EventPayload {
                text: Some(text),
                audio: audio_url.map(|url| AudioRef {
                    url,
                    duration: audio_duration.map(Millis),
                }),
                step_number,
                ..EventPayload::default()
            },
        }
    }

    fn equation(&mut self, latex: String, display: bool, step_number: Option<u32>) -> TeachingEvent {
        let ev = TeachingEvent {
            id: self.fresh_id(),
            kind: EventKind::WriteEquation,
            duration: latex_duration(&latex),
            payload: EventPayload {
                latex: Some(latex),
                display: Some(display),
                step_number,
                ..EventPayload::default()
            },
        };
        self.last_visual = Some(ev.id.clone());
        ev
    }

    fn text_line(&mut self, text: String, step_number: Option<u32>) -> TeachingEvent {
        let ev = TeachingEvent {
            id: self.fresh_id(),
            kind: EventKind::WriteText,
            duration: text_duration(&text),
            payload: EventPayload {
                text: Some(text),
                step_number,
                ..EventPayload::default()
            },
        };
        self.last_visual = Some(ev.id.clone());
        ev
    }

    fn pause(&mut self, step_number: Option<u32>) -> TeachingEvent {
        TeachingEvent {
            id: self.fresh_id(),
            kind: EventKind::Pause,
            duration: Millis(PAUSE_MS),
            payload: EventPayload {
                step_number,
                ..EventPayload::default()
            },
        }
    }

    fn fresh_id(&mut self) -> EventId {
        loop {
            self.counter += 1;
            let candidate = format!("ev{}", self.counter);
            if self.seen.insert(candidate.clone()) {
                return EventId(candidate);
            }
        }
    }

    fn dedupe_id(&mut self, id: String) -> EventId {
        if self.seen.insert(id.clone()) {
            return EventId(id);
        }
        let mut n = 2u32;
        loop {
            let candidate = format!("{id}#{n}");
            if self.seen.insert(candidate.clone()) {
                tracing::debug!(original = %id, deduped = %candidate, "duplicate event id");
                return EventId(candidate);
            }
            n += 1;
        }
    }
}

/// Speech-rate estimate: ~150 words per minute, floor 1.5s.
pub fn narrate_duration(text: &str) -> Millis {
    let words = text.split_whitespace().count() as f64;
    Millis((words / 2.5 * 1000.0).max(1500.0))
}

/// Handwriting-rate estimate for plain text, floor 800ms.
pub fn text_duration(text: &str) -> Millis {
    Millis((text.chars().count() as f64 * 35.0).max(800.0))
}

/// Handwriting-rate estimate for equations, floor 1.2s.
pub fn latex_duration(latex: &str) -> Millis {
    Millis((latex.chars().count() as f64 * 60.0).max(1200.0))
}

fn estimate_duration(kind: EventKind, payload: &EventPayload) -> Millis {
    match kind {
        EventKind::Narrate => narrate_duration(payload.text.as_deref().unwrap_or("")),
        EventKind::WriteEquation => latex_duration(payload.latex.as_deref().unwrap_or("")),
        EventKind::WriteText => text_duration(payload.text.as_deref().unwrap_or("")),
        EventKind::Annotate => Millis(ANNOTATE_MS),
        EventKind::ClearRegion => Millis(CLEAR_MS),
        EventKind::DrawArrow | EventKind::DrawLine | EventKind::DrawBox => Millis(DRAW_MS),
        EventKind::Pause => Millis(PAUSE_MS),
        EventKind::StepMarker => Millis(STEP_MARKER_MS),
    }
}

fn parse_kind(s: Option<&str>) -> EventKind {
    let Some(s) = s else {
        return EventKind::Narrate;
    };
    let folded: String = s
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    match folded.as_str() {
        "narrate" | "speak" | "say" => EventKind::Narrate,
        "writeequation" | "equation" => EventKind::WriteEquation,
        "writetext" | "writenote" => EventKind::WriteText,
        "annotate" | "highlight" => EventKind::Annotate,
        "clearregion" | "clearsection" | "clear" => EventKind::ClearRegion,
        "drawarrow" | "arrow" => EventKind::DrawArrow,
        "drawline" | "line" => EventKind::DrawLine,
        "drawbox" | "box" | "drawrect" => EventKind::DrawBox,
        "pause" | "beat" => EventKind::Pause,
        "stepmarker" | "step" => EventKind::StepMarker,
        // The backend's own default for an unknown tag.
        _ => EventKind::Narrate,
    }
}

fn parse_intent(s: &str) -> Option<Intent> {
    let folded: String = s
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    match folded.as_str() {
        "introduce" => Some(Intent::Introduce),
        "derive" => Some(Intent::Derive),
        "emphasize" => Some(Intent::Emphasize),
        "result" => Some(Intent::Result),
        "sidenote" => Some(Intent::SideNote),
        _ => None,
    }
}

fn parse_annotation(s: &str) -> Option<AnnotationStyle> {
    match s.trim().to_ascii_lowercase().as_str() {
        "highlight" => Some(AnnotationStyle::Highlight),
        "underline" => Some(AnnotationStyle::Underline),
        "circle" => Some(AnnotationStyle::Circle),
        "box" => Some(AnnotationStyle::Box),
        _ => None,
    }
}

fn extract_audio(raw: &Value) -> Option<AudioRef> {
    let url = lookup_str(raw, &["audio_url", "audioUrl"])?;
    if url.trim().is_empty() {
        return None;
    }
    Some(AudioRef {
        url,
        duration: lookup_f64(raw, &["audio_duration", "audioDuration"])
            .filter(|d| *d > 0.0)
            .map(Millis),
    })
}

fn extract_geometry(raw: &Value) -> Option<ExplicitGeometry> {
    let nested = merged_field(raw, "geometry");
    let from = nested.as_ref().unwrap_or(raw);
    let g = ExplicitGeometry {
        x: lookup_f64(from, &["x"]),
        y: lookup_f64(from, &["y"]),
        width: lookup_f64(from, &["width", "w"]),
        height: lookup_f64(from, &["height", "h"]),
    };
    if g.x.is_none() && g.y.is_none() && g.width.is_none() && g.height.is_none() {
        None
    } else {
        Some(g)
    }
}

/// Look a field up in the nested payload first, then at top level.
fn merged_field<'a>(raw: &'a Value, key: &str) -> Option<Value> {
    if let Some(p) = raw.get("payload")
        && let Some(v) = p.get(key)
        && !v.is_null()
    {
        return Some(v.clone());
    }
    raw.get(key).filter(|v| !v.is_null()).cloned()
}

fn lookup_str(raw: &Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(v) = merged_field(raw, key)
            && let Some(s) = v.as_str()
        {
            return Some(s.to_string());
        }
    }
    None
}

fn lookup_f64(raw: &Value, keys: &[&str]) -> Option<f64> {
    for key in keys {
        if let Some(v) = merged_field(raw, key)
            && let Some(n) = v.as_f64()
        {
            return Some(n);
        }
    }
    None
}

fn lookup_bool(raw: &Value, keys: &[&str]) -> Option<bool> {
    for key in keys {
        if let Some(v) = merged_field(raw, key)
            && let Some(b) = v.as_bool()
        {
            return Some(b);
        }
    }
    None
}

fn split_blocks(content: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current = String::new();
    for line in content.lines() {
        if line.trim().is_empty() {
            if !current.trim().is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
            current.clear();
        } else {
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(line);
        }
    }
    if !current.trim().is_empty() {
        blocks.push(current);
    }
    blocks
}

/// Display-math spans (`$$...$$` or `\[...\]`) inside a block. A block that
/// carries any span becomes equation events; its lead-in prose is dropped as
/// redundant narration. Inline `$...$` inside prose stays text (detected at
/// render time, never extracted here).
fn display_math_spans(block: &str) -> Vec<String> {
    let mut spans = Vec::new();
    for (open, close) in [("$$", "$$"), ("\\[", "\\]")] {
        let mut rest = block;
        while let Some(start) = rest.find(open) {
            let after = &rest[start + open.len()..];
            let Some(end) = after.find(close) else {
                break;
            };
            let inner = after[..end].trim();
            if !inner.is_empty() {
                spans.push(inner.to_string());
            }
            rest = &after[end + close.len()..];
        }
    }
    spans
}
