use crate::{
    core::{Millis, Region},
    error::{ChalkError, ChalkResult},
};

/// Stable identifier of a teaching event, unique within a lesson.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct EventId(pub String);

impl EventId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Narrate,
    WriteEquation,
    WriteText,
    Annotate,
    ClearRegion,
    DrawArrow,
    DrawLine,
    DrawBox,
    Pause,
    StepMarker,
}

impl EventKind {
    /// Whether the event occupies board space and a visual time slot.
    pub fn is_visual(self) -> bool {
        matches!(
            self,
            EventKind::WriteEquation
                | EventKind::WriteText
                | EventKind::Annotate
                | EventKind::ClearRegion
                | EventKind::DrawArrow
                | EventKind::DrawLine
                | EventKind::DrawBox
        )
    }

    pub fn is_drawing(self) -> bool {
        matches!(
            self,
            EventKind::DrawArrow | EventKind::DrawLine | EventKind::DrawBox
        )
    }

    /// Whether the event produces a placed board object (as opposed to
    /// decorating or removing one).
    pub fn places_object(self) -> bool {
        matches!(
            self,
            EventKind::WriteEquation | EventKind::WriteText | EventKind::DrawArrow
                | EventKind::DrawLine
                | EventKind::DrawBox
        )
    }
}

/// Semantic role of a visual within the derivation, used to pick a region
/// when no explicit hint is present.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Introduce,
    Derive,
    Emphasize,
    Result,
    SideNote,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationStyle {
    Highlight,
    Underline,
    Circle,
    Box,
}

/// Caller-declared placement, bypassing the estimator.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ExplicitGeometry {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub width: Option<f64>,
    pub height: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AudioRef {
    pub url: String,
    /// Declared clip length; trusted over any estimate when present.
    pub duration: Option<Millis>,
}

/// Canonical payload. Every field is optional; which ones are meaningful
/// depends on the event kind. Absent fields are always safe.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EventPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<Region>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<ExplicitGeometry>,
    /// Render-order override; events carrying one are laid out first,
    /// sorted ascending, ties broken by emission order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<AnnotationStyle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<EventId>,
    /// Links successive transformations of one equation so they lay out
    /// contiguously and get evicted together.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_title: Option<String>,
}

impl EventPayload {
    /// The board-visible content string, if any.
    pub fn content(&self) -> Option<&str> {
        self.latex.as_deref().or(self.text.as_deref())
    }
}

/// One atomic unit of board/narration activity. Immutable after
/// normalization; placement is computed separately by the layout engine.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TeachingEvent {
    pub id: EventId,
    pub kind: EventKind,
    pub duration: Millis,
    pub payload: EventPayload,
}

impl TeachingEvent {
    pub fn is_visual(&self) -> bool {
        self.kind.is_visual()
    }
}

/// Inbound lesson step record from the generation backend.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct LessonStep {
    #[serde(default, alias = "stepNumber")]
    pub step_number: u32,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, alias = "mathBlocks")]
    pub math_blocks: Vec<MathBlock>,
    #[serde(default)]
    pub narration: Option<String>,
    #[serde(default, alias = "audioUrl")]
    pub audio_url: Option<String>,
    #[serde(default, alias = "audioDuration")]
    pub audio_duration: Option<f64>,
    /// Pre-built granular events; when empty the normalizer synthesizes them.
    #[serde(default)]
    pub events: Vec<serde_json::Value>,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct MathBlock {
    pub latex: String,
    #[serde(default = "default_true")]
    pub display: bool,
}

fn default_true() -> bool {
    true
}

/// Full inbound lesson document: prepared steps, a bare event stream, or
/// both (steps first).
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct LessonDoc {
    #[serde(default)]
    pub steps: Vec<LessonStep>,
    #[serde(default)]
    pub events: Vec<serde_json::Value>,
}

impl LessonDoc {
    pub fn from_json(s: &str) -> ChalkResult<Self> {
        let doc: LessonDoc =
            serde_json::from_str(s).map_err(|e| ChalkError::serde(e.to_string()))?;
        doc.validate()?;
        Ok(doc)
    }

    pub fn validate(&self) -> ChalkResult<()> {
        if self.steps.is_empty() && self.events.is_empty() {
            return Err(ChalkError::validation("lesson has neither steps nor events"));
        }
        Ok(())
    }
}

/// Mid-lesson answer to a learner question. Same shape family as a step,
/// normalized through the same boundary or the narrower fallback builder.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct ChatReply {
    #[serde(default)]
    pub text: String,
    #[serde(default, alias = "mathBlocks")]
    pub math_blocks: Vec<MathBlock>,
    #[serde(default)]
    pub narration: Option<String>,
    #[serde(default, alias = "audioUrl")]
    pub audio_url: Option<String>,
    #[serde(default, alias = "audioDuration")]
    pub audio_duration: Option<f64>,
    #[serde(default)]
    pub events: Vec<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visual_classification() {
        assert!(EventKind::WriteEquation.is_visual());
        assert!(EventKind::ClearRegion.is_visual());
        assert!(!EventKind::Narrate.is_visual());
        assert!(!EventKind::Pause.is_visual());
        assert!(!EventKind::StepMarker.is_visual());
        assert!(EventKind::DrawArrow.places_object());
        assert!(!EventKind::Annotate.places_object());
    }

    #[test]
    fn payload_content_prefers_latex() {
        let p = EventPayload {
            text: Some("note".into()),
            latex: Some("x^2".into()),
            ..EventPayload::default()
        };
        assert_eq!(p.content(), Some("x^2"));
    }

    #[test]
    fn lesson_doc_requires_steps_or_events() {
        assert!(LessonDoc::from_json("{}").is_err());
        assert!(LessonDoc::from_json("not json").is_err());
        assert!(LessonDoc::from_json(r#"{"events": [{"type": "pause"}]}"#).is_ok());
        assert!(LessonDoc::from_json(r#"{"steps": [{"title": "t"}]}"#).is_ok());
    }

    #[test]
    fn lesson_step_accepts_camel_case_audio_fields() {
        let step: LessonStep = serde_json::from_str(
            r#"{"step_number": 2, "title": "t", "content": "c", "audioUrl": "u", "audioDuration": 1500.0}"#,
        )
        .unwrap();
        assert_eq!(step.audio_url.as_deref(), Some("u"));
        assert_eq!(step.audio_duration, Some(1500.0));
    }
}
