use std::collections::{HashMap, HashSet};

use crate::{core::Millis, event::EventId};

/// If a clip makes no playback progress for this long, the player declares
/// it ended so scheduling is never stuck on broken media.
pub const STALL_TIMEOUT_MS: f64 = 2500.0;

/// Observable state of one clip inside the media backend.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MediaState {
    Idle,
    Loading,
    Ready,
    Playing { position: Millis },
    Ended,
    Failed,
}

/// The injected decode/playback black box. Implementations must never
/// block; every call is fire-and-forget and state is polled.
pub trait MediaBackend {
    fn load(&mut self, id: &EventId, url: &str);
    fn play(&mut self, id: &EventId, speed: f64);
    fn pause(&mut self, id: &EventId);
    fn resume(&mut self, id: &EventId);
    fn stop(&mut self, id: &EventId);
    fn set_speed(&mut self, id: &EventId, speed: f64);
    fn state(&self, id: &EventId) -> MediaState;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndReason {
    Ended,
    Failed,
    Stalled,
}

/// Raised by [`AudioPlayer::poll`] when the active clip finished, for any
/// reason. At most one is raised per clip.
#[derive(Clone, Debug, PartialEq)]
pub struct ClipEnded {
    pub id: EventId,
    pub reason: EndReason,
}

#[derive(Debug)]
struct ActiveClip {
    id: EventId,
    last_position: Millis,
    /// Wall time of the last observed progress; drives the stall timeout.
    last_progress_at: Millis,
    paused: bool,
}

/// Narration playback with graceful degradation: preload never fails,
/// playback of missing or broken audio degrades to silent timing, and a
/// bounded stall timeout guarantees a completion signal for every clip.
#[derive(Debug)]
pub struct AudioPlayer<B: MediaBackend> {
    backend: B,
    requested: HashSet<EventId>,
    urls: HashMap<EventId, String>,
    active: Option<ActiveClip>,
    speed: f64,
}

impl<B: MediaBackend> AudioPlayer<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            requested: HashSet::new(),
            urls: HashMap::new(),
            active: None,
            speed: 1.0,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn active_clip(&self) -> Option<&EventId> {
        self.active.as_ref().map(|a| &a.id)
    }

    /// Fetch and buffer a clip. Idempotent; repeated calls are free. Load
    /// failures are absorbed and resolved later by [`Self::poll`].
    pub fn preload(&mut self, id: &EventId, url: &str) {
        if !self.requested.insert(id.clone()) {
            return;
        }
        self.urls.insert(id.clone(), url.to_string());
        self.backend.load(id, url);
    }

    /// Start a clip, preloading on the fly when it was never requested.
    /// Replaces the currently active clip without raising a completion for
    /// it; the scheduler has already moved on.
    pub fn play(&mut self, now: Millis, id: &EventId, url: Option<&str>) {
        if let Some(url) = url {
            self.preload(id, url);
        }
        if !self.requested.contains(id) {
            // No source at all: leave no active clip, timing runs silent.
            tracing::debug!(clip = %id, "no audio source, silent timing");
            self.active = None;
            return;
        }
        self.backend.play(id, self.speed);
        self.active = Some(ActiveClip {
            id: id.clone(),
            last_position: Millis::ZERO,
            last_progress_at: now,
            paused: false,
        });
    }

    pub fn pause(&mut self) {
        if let Some(active) = &mut self.active {
            active.paused = true;
            self.backend.pause(&active.id);
        }
    }

    pub fn resume(&mut self, now: Millis) {
        if let Some(active) = &mut self.active {
            active.paused = false;
            active.last_progress_at = now;
            self.backend.resume(&active.id);
        }
    }

    /// Applies to the in-progress clip immediately and to every clip
    /// played afterwards.
    pub fn set_speed(&mut self, multiplier: f64) {
        if !multiplier.is_finite() || multiplier <= 0.0 {
            return;
        }
        self.speed = multiplier;
        if let Some(active) = &self.active {
            self.backend.set_speed(&active.id, multiplier);
        }
    }

    /// Observe the active clip. Returns the completion signal once, on
    /// natural end, failure, or after [`STALL_TIMEOUT_MS`] without
    /// progress, whichever comes first.
    pub fn poll(&mut self, now: Millis) -> Option<ClipEnded> {
        let active = self.active.as_mut()?;
        if active.paused {
            return None;
        }

        match self.backend.state(&active.id) {
            MediaState::Ended => {
                let id = active.id.clone();
                self.active = None;
                Some(ClipEnded {
                    id,
                    reason: EndReason::Ended,
                })
            }
            MediaState::Failed => {
                let id = active.id.clone();
                tracing::warn!(clip = %id, "audio failed, falling back to silent timing");
                self.active = None;
                Some(ClipEnded {
                    id,
                    reason: EndReason::Failed,
                })
            }
            MediaState::Playing { position } if position.0 > active.last_position.0 => {
                active.last_position = position;
                active.last_progress_at = now;
                None
            }
            // Playing without progress, or still loading: the stall clock
            // runs either way.
            _ => {
                if (now - active.last_progress_at).0 >= STALL_TIMEOUT_MS {
                    let id = active.id.clone();
                    tracing::warn!(clip = %id, "audio stalled, forcing completion");
                    self.backend.stop(&id);
                    self.active = None;
                    Some(ClipEnded {
                        id,
                        reason: EndReason::Stalled,
                    })
                } else {
                    None
                }
            }
        }
    }
}

/// Backend that plays nothing and completes instantly. Used by tests and
/// the CLI simulator; the scheduler's duration-driven timing does the rest.
#[derive(Debug, Default)]
pub struct SilentBackend {
    states: HashMap<EventId, MediaState>,
    /// Urls that pretend to fail, for degradation tests.
    pub fail_urls: HashSet<String>,
}

impl SilentBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MediaBackend for SilentBackend {
    fn load(&mut self, id: &EventId, url: &str) {
        let state = if self.fail_urls.contains(url) {
            MediaState::Failed
        } else {
            MediaState::Ready
        };
        self.states.insert(id.clone(), state);
    }

    fn play(&mut self, id: &EventId, _speed: f64) {
        let state = match self.states.get(id) {
            Some(MediaState::Failed) => MediaState::Failed,
            // A silent clip is over the moment it starts.
            _ => MediaState::Ended,
        };
        self.states.insert(id.clone(), state);
    }

    fn pause(&mut self, _id: &EventId) {}
    fn resume(&mut self, _id: &EventId) {}

    fn stop(&mut self, id: &EventId) {
        self.states.insert(id.clone(), MediaState::Idle);
    }

    fn set_speed(&mut self, _id: &EventId, _speed: f64) {}

    fn state(&self, id: &EventId) -> MediaState {
        self.states.get(id).copied().unwrap_or(MediaState::Idle)
    }
}
