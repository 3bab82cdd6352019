//! Frame sources. The live pipeline only sees the [`FrameSource`] trait;
//! [`DirectorySource`] replays still images as a paced stream.

use crate::frame::Frame;
use crate::lease::FrameLease;
use persona_core::Rotation;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "ppm"];

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("no image files in {0}")]
    Empty(PathBuf),
    #[error("none of the images in {0} could be decoded")]
    Undecodable(PathBuf),
}

/// Something that produces camera frames.
pub trait FrameSource: Send {
    /// Next frame, or `None` once the stream has ended or was stopped.
    fn next_frame(&mut self) -> Result<Option<FrameLease>, SourceError>;

    /// Stop producing frames. Later calls to `next_frame` return `None`.
    fn stop(&mut self) {}
}

/// Replays the image files of a directory in name order.
pub struct DirectorySource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    position: usize,
    rotation: Rotation,
    interval: Duration,
    looping: bool,
    last_frame: Option<Instant>,
    sequence: u32,
    outstanding: Arc<AtomicUsize>,
    stopped: bool,
}

impl DirectorySource {
    pub fn open(
        dir: &Path,
        rotation: Rotation,
        interval: Duration,
        looping: bool,
    ) -> Result<Self, SourceError> {
        let io_err = |source| SourceError::Io {
            path: dir.to_path_buf(),
            source,
        };

        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            if path.is_file() && is_image(&path) {
                files.push(path);
            }
        }
        files.sort();

        if files.is_empty() {
            return Err(SourceError::Empty(dir.to_path_buf()));
        }

        tracing::info!(
            dir = %dir.display(),
            files = files.len(),
            rotation = rotation.degrees(),
            interval_ms = interval.as_millis() as u64,
            looping,
            "frame directory opened"
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            files,
            position: 0,
            rotation,
            interval,
            looping,
            last_frame: None,
            sequence: 0,
            outstanding: Arc::new(AtomicUsize::new(0)),
            stopped: false,
        })
    }

    /// Number of leased frames not yet released.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    fn pace(&mut self) {
        if let Some(last) = self.last_frame {
            let elapsed = last.elapsed();
            if elapsed < self.interval {
                std::thread::sleep(self.interval - elapsed);
            }
        }
        self.last_frame = Some(Instant::now());
    }

    fn lease(&mut self, frame: Frame) -> FrameLease {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        let outstanding = self.outstanding.clone();
        FrameLease::new(frame, move |sequence| {
            outstanding.fetch_sub(1, Ordering::SeqCst);
            tracing::trace!(sequence, "frame released");
        })
    }
}

impl FrameSource for DirectorySource {
    fn next_frame(&mut self) -> Result<Option<FrameLease>, SourceError> {
        let mut failures = 0;
        loop {
            if self.stopped {
                return Ok(None);
            }
            if self.position >= self.files.len() {
                if !self.looping {
                    return Ok(None);
                }
                self.position = 0;
            }
            if failures >= self.files.len() {
                return Err(SourceError::Undecodable(self.dir.clone()));
            }

            let path = self.files[self.position].clone();
            self.position += 1;

            match image::open(&path) {
                Ok(decoded) => {
                    self.pace();
                    self.sequence = self.sequence.wrapping_add(1);
                    let frame = Frame::new(decoded.to_rgb8(), self.rotation, self.sequence);
                    tracing::debug!(
                        path = %path.display(),
                        sequence = self.sequence,
                        "frame captured"
                    );
                    return Ok(Some(self.lease(frame)));
                }
                Err(e) => {
                    failures += 1;
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "skipping undecodable frame"
                    );
                }
            }
        }
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            tracing::info!(
                dir = %self.dir.display(),
                outstanding = self.outstanding(),
                "frame source stopped"
            );
        }
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn write_frames(dir: &Path, count: u8) {
        for i in 0..count {
            RgbImage::from_pixel(4, 3, Rgb([i, i, i]))
                .save(dir.join(format!("frame_{i:03}.png")))
                .unwrap();
        }
    }

    #[test]
    fn test_replays_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(dir.path(), 3);
        std::fs::write(dir.path().join("notes.txt"), "not a frame").unwrap();

        let mut source =
            DirectorySource::open(dir.path(), Rotation::Deg0, Duration::ZERO, false).unwrap();
        let mut values = Vec::new();
        while let Some(lease) = source.next_frame().unwrap() {
            values.push(lease.image.get_pixel(0, 0).0[0]);
        }
        assert_eq!(values, vec![0, 1, 2]);
    }

    #[test]
    fn test_outstanding_tracks_leases() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(dir.path(), 2);
        let mut source =
            DirectorySource::open(dir.path(), Rotation::Deg90, Duration::ZERO, false).unwrap();

        let first = source.next_frame().unwrap().unwrap();
        let second = source.next_frame().unwrap().unwrap();
        assert_eq!(first.rotation, Rotation::Deg90);
        assert_eq!(source.outstanding(), 2);
        drop(first);
        assert_eq!(source.outstanding(), 1);
        drop(second);
        assert_eq!(source.outstanding(), 0);
    }

    #[test]
    fn test_looping_wraps_around() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(dir.path(), 2);
        let mut source =
            DirectorySource::open(dir.path(), Rotation::Deg0, Duration::ZERO, true).unwrap();
        let sequences: Vec<u32> = (0..5)
            .map(|_| source.next_frame().unwrap().unwrap().sequence)
            .collect();
        assert_eq!(sequences, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_stop_ends_stream() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(dir.path(), 2);
        let mut source =
            DirectorySource::open(dir.path(), Rotation::Deg0, Duration::ZERO, true).unwrap();
        source.stop();
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_empty_directory_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = DirectorySource::open(dir.path(), Rotation::Deg0, Duration::ZERO, false).err();
        assert!(matches!(err, Some(SourceError::Empty(_))));
    }

    #[test]
    fn test_all_undecodable_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.png"), b"not a png").unwrap();
        let mut source =
            DirectorySource::open(dir.path(), Rotation::Deg0, Duration::ZERO, true).unwrap();
        assert!(matches!(source.next_frame(), Err(SourceError::Undecodable(_))));
    }
}
