#![forbid(unsafe_code)]

pub mod audio;
pub mod core;
pub mod error;
pub mod event;
pub mod layout;
pub mod measure;
pub mod normalize;
pub mod player;
pub mod segment;
pub mod session;

pub use audio::{AudioPlayer, ClipEnded, EndReason, MediaBackend, MediaState, SilentBackend};
pub use core::{Millis, PageIndex, Rect, Region};
pub use error::{ChalkError, ChalkResult};
pub use event::{
    AnnotationStyle, ChatReply, EventId, EventKind, EventPayload, Intent, LessonDoc, LessonStep,
    MathBlock, TeachingEvent,
};
pub use layout::{BoardAnnotation, BoardLayout, BoardObject, BoardSnapshot};
pub use normalize::EventNormalizer;
pub use player::{ActiveVisual, PlaybackFrame, PlaybackState, PlayerStatus, SegmentPlayer};
pub use segment::{AudioClip, TimelineSegment, VisualSlot, build_segments};
pub use session::{LessonFrame, LessonSession};
