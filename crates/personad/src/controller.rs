//! Drives the recognition lifecycle from verdicts and operator answers.

use crate::engine::EngineHandle;
use crate::frames::CroppedFace;
use image::RgbImage;
use persona_core::lifecycle::LifecycleError;
use persona_core::{Lifecycle, RecognitionState};
use std::time::Duration;
use tokio::sync::mpsc;

/// The human side of the pipeline.
#[allow(async_fn_in_trait)]
pub trait Operator {
    /// Name for an unknown face, or `None` to discard it.
    async fn ask_name(&mut self, face: &RgbImage) -> Option<String>;
    async fn greet(&mut self, name: &str);
    async fn enrollment_failed(&mut self, error: &str);
    /// Returns once the operator has seen the error.
    async fn acknowledge_error(&mut self, message: &str);
}

pub struct Controller<O> {
    engine: EngineHandle,
    lifecycle: Lifecycle,
    operator: O,
    cooldown: Duration,
}

impl<O: Operator> Controller<O> {
    pub fn new(
        engine: EngineHandle,
        lifecycle: Lifecycle,
        operator: O,
        cooldown: Duration,
    ) -> Self {
        Self {
            engine,
            lifecycle,
            operator,
            cooldown,
        }
    }

    /// Handle faces until the frame worker goes away.
    pub async fn run(mut self, mut faces: mpsc::Receiver<CroppedFace>) {
        while let Some(face) = faces.recv().await {
            self.handle(face).await;
        }
        tracing::info!("face channel closed; controller exiting");
    }

    /// Analyze one face and resolve its verdict back to `Idle`.
    pub async fn handle(&mut self, cropped: CroppedFace) -> RecognitionState {
        let CroppedFace { face, permit, sequence } = cropped;

        let outcome = self.engine.analyze(face).await;
        let verdict = permit.finish(outcome);
        tracing::info!(sequence, verdict = verdict.label(), "face analyzed");

        let resolved = match &verdict {
            RecognitionState::Recognized { name } => {
                self.operator.greet(name).await;
                tokio::time::sleep(self.cooldown).await;
                self.lifecycle.acknowledge()
            }
            RecognitionState::Unknown { face } => self.resolve_unknown(face).await,
            RecognitionState::Error { message } => {
                tracing::warn!(error = %message, "analysis failed; waiting for operator");
                self.operator.acknowledge_error(message).await;
                self.lifecycle.recover()
            }
            RecognitionState::Loading | RecognitionState::Idle => Ok(()),
        };

        if let Err(e) = resolved {
            tracing::warn!(error = %e, "lifecycle did not resume");
        }
        verdict
    }

    /// Ask for a name until enrollment succeeds or the operator cancels.
    async fn resolve_unknown(&mut self, face: &RgbImage) -> Result<(), LifecycleError> {
        loop {
            let Some(name) = self.operator.ask_name(face).await else {
                tracing::info!("enrollment cancelled");
                return self.lifecycle.cancel();
            };

            match self.engine.enroll(None, name, face.clone()).await {
                Ok(persona) => {
                    tracing::info!(persona = %persona.id, name = %persona.name, "new face saved");
                    return self.lifecycle.enrolled();
                }
                Err(e) => {
                    tracing::warn!(error = %e, "enrollment failed");
                    self.operator.enrollment_failed(&e.to_string()).await;
                }
            }
        }
    }
}
