//! Recognition lifecycle: gates frame analysis and tracks the current verdict.
//!
//! Frames are accepted only while the lifecycle is `Idle` and no analysis is
//! in flight. Taking an [`AnalysisPermit`] pauses frame intake; the verdict
//! keeps it paused until the caller acknowledges, enrolls, cancels or recovers.

use crate::types::MatchResult;
use image::RgbImage;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("cannot {action} while {state}")]
    InvalidTransition {
        action: &'static str,
        state: &'static str,
    },
}

/// Observable state of the recognition pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionState {
    /// Model and store are not ready yet.
    Loading,
    /// Waiting for a face.
    Idle,
    Recognized { name: String },
    /// Waiting for the operator to enroll or discard this face.
    Unknown { face: RgbImage },
    /// Waiting for explicit recovery.
    Error { message: String },
}

impl RecognitionState {
    pub fn label(&self) -> &'static str {
        match self {
            RecognitionState::Loading => "loading",
            RecognitionState::Idle => "idle",
            RecognitionState::Recognized { .. } => "recognized",
            RecognitionState::Unknown { .. } => "unknown",
            RecognitionState::Error { .. } => "error",
        }
    }
}

struct Shared {
    /// True while new frames may be analyzed.
    accepting: AtomicBool,
    state: watch::Sender<RecognitionState>,
}

/// Clone-safe handle to the shared lifecycle.
#[derive(Clone)]
pub struct Lifecycle {
    shared: Arc<Shared>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.borrow().label();
        f.debug_struct("Lifecycle")
            .field("state", &state)
            .field("accepting", &self.shared.accepting.load(Ordering::Relaxed))
            .finish()
    }
}

impl Lifecycle {
    /// Start in `Loading`. Frames are refused until [`Lifecycle::ready`].
    pub fn new() -> Self {
        let (state, _) = watch::channel(RecognitionState::Loading);
        Self {
            shared: Arc::new(Shared {
                accepting: AtomicBool::new(true),
                state,
            }),
        }
    }

    pub fn state(&self) -> RecognitionState {
        self.shared.state.borrow().clone()
    }

    /// Receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<RecognitionState> {
        self.shared.state.subscribe()
    }

    /// Whether a frame arriving now would be analyzed.
    pub fn is_accepting(&self) -> bool {
        self.shared.accepting.load(Ordering::Acquire)
            && matches!(*self.shared.state.borrow(), RecognitionState::Idle)
    }

    /// Claim the single analysis slot.
    ///
    /// Returns `None` unless the state is `Idle` and no other analysis holds
    /// the slot. Frame intake stays paused until the verdict is resolved.
    pub fn begin_analysis(&self) -> Option<AnalysisPermit> {
        if !matches!(*self.shared.state.borrow(), RecognitionState::Idle) {
            return None;
        }
        self.shared
            .accepting
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        Some(AnalysisPermit {
            lifecycle: self.clone(),
            finished: false,
        })
    }

    /// `Loading` → `Idle`.
    pub fn ready(&self) -> Result<(), LifecycleError> {
        self.transition("become ready", |state| match state {
            RecognitionState::Loading => Some(RecognitionState::Idle),
            _ => None,
        })
    }

    /// `Recognized` → `Idle` once the cool-down has elapsed.
    pub fn acknowledge(&self) -> Result<(), LifecycleError> {
        self.transition("acknowledge", |state| match state {
            RecognitionState::Recognized { .. } => Some(RecognitionState::Idle),
            _ => None,
        })?;
        self.resume();
        Ok(())
    }

    /// `Unknown` → `Idle` after the face was saved.
    pub fn enrolled(&self) -> Result<(), LifecycleError> {
        self.leave_unknown("finish enrollment")
    }

    /// `Unknown` → `Idle`, discarding the face.
    pub fn cancel(&self) -> Result<(), LifecycleError> {
        self.leave_unknown("cancel enrollment")
    }

    /// `Error` → `Idle`.
    pub fn recover(&self) -> Result<(), LifecycleError> {
        self.transition("recover", |state| match state {
            RecognitionState::Error { .. } => Some(RecognitionState::Idle),
            _ => None,
        })?;
        self.resume();
        Ok(())
    }

    /// Stop accepting frames regardless of state (used on shutdown).
    pub fn pause(&self) {
        self.shared.accepting.store(false, Ordering::Release);
    }

    fn resume(&self) {
        self.shared.accepting.store(true, Ordering::Release);
    }

    fn leave_unknown(&self, action: &'static str) -> Result<(), LifecycleError> {
        self.transition(action, |state| match state {
            RecognitionState::Unknown { .. } => Some(RecognitionState::Idle),
            _ => None,
        })?;
        self.resume();
        Ok(())
    }

    fn transition(
        &self,
        action: &'static str,
        next: impl FnOnce(&RecognitionState) -> Option<RecognitionState>,
    ) -> Result<(), LifecycleError> {
        let mut rejected = None;
        self.shared.state.send_if_modified(|state| match next(state) {
            Some(next) => {
                tracing::debug!(from = state.label(), to = next.label(), "lifecycle transition");
                *state = next;
                true
            }
            None => {
                rejected = Some(state.label());
                false
            }
        });

        match rejected {
            Some(state) => Err(LifecycleError::InvalidTransition { action, state }),
            None => Ok(()),
        }
    }

    fn publish(&self, next: RecognitionState) {
        tracing::debug!(to = next.label(), "lifecycle verdict");
        self.shared.state.send_replace(next);
    }
}

/// Exclusive right to analyze one face.
///
/// Dropping the permit without [`AnalysisPermit::finish`] returns the
/// lifecycle to accepting frames.
#[must_use = "dropping the permit immediately resumes frame intake"]
pub struct AnalysisPermit {
    lifecycle: Lifecycle,
    finished: bool,
}

impl fmt::Debug for AnalysisPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisPermit")
            .field("finished", &self.finished)
            .finish()
    }
}

impl AnalysisPermit {
    /// Publish the verdict for the analyzed face. Frame intake stays paused.
    pub fn finish<E: fmt::Display>(mut self, outcome: Result<MatchResult, E>) -> RecognitionState {
        let next = match outcome {
            Ok(MatchResult::Recognized { persona_name, .. }) if persona_name.is_empty() => {
                RecognitionState::Error {
                    message: "recognized persona has an empty name".to_string(),
                }
            }
            Ok(MatchResult::Recognized { persona_name, .. }) => RecognitionState::Recognized {
                name: persona_name,
            },
            Ok(MatchResult::Unknown { face }) => RecognitionState::Unknown { face },
            Err(e) => RecognitionState::Error { message: e.to_string() },
        };
        self.finished = true;
        self.lifecycle.publish(next.clone());
        next
    }
}

impl Drop for AnalysisPermit {
    fn drop(&mut self) {
        if !self.finished {
            self.lifecycle.resume();
        }
    }
}
