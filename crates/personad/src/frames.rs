//! Frame worker: capture → detect → crop on a dedicated thread.
//!
//! Frames are only analyzed while the lifecycle accepts them. At most one
//! face per frame is handed to the controller, together with the permit
//! that keeps frame intake paused until its verdict is resolved.

use image::RgbImage;
use persona_core::mapper::map_to_view;
use persona_core::{AnalysisPermit, BoundingBox, Lifecycle, Size};
use persona_hw::{crop_face, FaceDetector, Frame, FrameSource};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;

/// A face crop waiting for analysis.
#[derive(Debug)]
pub struct CroppedFace {
    pub face: RgbImage,
    pub permit: AnalysisPermit,
    pub sequence: u32,
}

/// What happened to one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Lifecycle is not accepting frames.
    Skipped,
    NoFace,
    Dispatched,
    /// Another analysis claimed the slot first.
    Busy,
    DetectFailed,
    /// The controller is gone.
    Closed,
}

pub struct FrameWorker<D> {
    detector: D,
    lifecycle: Lifecycle,
    faces: mpsc::Sender<CroppedFace>,
    view: Size,
    overlay: Vec<BoundingBox>,
}

impl<D: FaceDetector> FrameWorker<D> {
    pub fn new(
        detector: D,
        lifecycle: Lifecycle,
        faces: mpsc::Sender<CroppedFace>,
        view: Size,
    ) -> Self {
        Self {
            detector,
            lifecycle,
            faces,
            view,
            overlay: Vec::new(),
        }
    }

    /// Boxes of the last frame with faces, in view coordinates.
    pub fn overlay(&self) -> &[BoundingBox] {
        &self.overlay
    }

    pub fn process(&mut self, frame: &Frame) -> FrameOutcome {
        if !self.lifecycle.is_accepting() {
            return FrameOutcome::Skipped;
        }

        let upright = frame.upright();
        let boxes = match self.detector.detect(&upright) {
            Ok(boxes) => boxes,
            Err(e) => {
                tracing::warn!(sequence = frame.sequence, error = %e, "face detection failed");
                return FrameOutcome::DetectFailed;
            }
        };
        let Some(&first) = boxes.first() else {
            return FrameOutcome::NoFace;
        };

        self.overlay = boxes
            .iter()
            .filter_map(|&rect| {
                map_to_view(rect, frame.sensor_size(), self.view, frame.rotation).ok()
            })
            .collect();
        tracing::debug!(
            sequence = frame.sequence,
            faces = boxes.len(),
            overlay = ?self.overlay.iter().map(|b| b.rect).collect::<Vec<_>>(),
            "faces detected"
        );

        let face = match crop_face(&upright, first) {
            Ok(face) => face,
            Err(e) => {
                tracing::warn!(sequence = frame.sequence, error = %e, "dropping face crop");
                return FrameOutcome::NoFace;
            }
        };

        let Some(permit) = self.lifecycle.begin_analysis() else {
            return FrameOutcome::Busy;
        };

        let cropped = CroppedFace {
            face,
            permit,
            sequence: frame.sequence,
        };
        match self.faces.blocking_send(cropped) {
            Ok(()) => FrameOutcome::Dispatched,
            Err(_) => FrameOutcome::Closed,
        }
    }
}

/// Run `worker` over `source` on a dedicated OS thread until the source ends,
/// `stop` is raised, or the controller goes away.
pub fn spawn_frame_worker<S, D>(
    mut source: S,
    mut worker: FrameWorker<D>,
    stop: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>>
where
    S: FrameSource + 'static,
    D: FaceDetector + 'static,
{
    std::thread::Builder::new()
        .name("persona-frames".into())
        .spawn(move || {
            tracing::info!("frame worker started");
            while !stop.load(Ordering::Acquire) {
                let lease = match source.next_frame() {
                    Ok(Some(lease)) => lease,
                    Ok(None) => {
                        tracing::info!("frame source ended");
                        break;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "frame source failed");
                        break;
                    }
                };

                let outcome = worker.process(&lease);
                drop(lease);
                tracing::trace!(?outcome, overlay = worker.overlay().len(), "frame done");
                if outcome == FrameOutcome::Closed {
                    tracing::info!("controller closed; stopping frames");
                    break;
                }
            }
            source.stop();
            tracing::info!("frame worker exiting");
        })
}
