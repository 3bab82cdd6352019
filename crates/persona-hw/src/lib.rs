//! persona-hw — Frame plumbing between the camera side and the recognition pipeline.
//!
//! Provides the frame type and its scoped lease, upright rotation and face
//! cropping, frame sources, and the face detector seam.

pub mod detector;
pub mod frame;
pub mod lease;
pub mod source;

pub use detector::{DetectError, FaceDetector, FullFrameDetector};
pub use frame::{crop_face, Frame, FrameError};
pub use lease::FrameLease;
pub use source::{DirectorySource, FrameSource, SourceError};
