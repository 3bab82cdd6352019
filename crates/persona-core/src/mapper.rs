//! Camera ↔ view coordinate mapping for detection overlays.
//!
//! Boxes reported by the detector are in upright camera coordinates (the
//! sensor image already rotated by `rotation`). The view shows that upright
//! image letterboxed: scaled uniformly to fit and centered with symmetric
//! padding on one axis.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MapError {
    #[error("unsupported rotation: {0} degrees (expected 0, 90, 180 or 270)")]
    UnsupportedRotation(u32),
    #[error("{what} size {width}x{height} has no area")]
    EmptySize {
        what: &'static str,
        width: u32,
        height: u32,
    },
    #[error("box is in {found:?} space, expected {expected:?}")]
    WrongSpace {
        expected: CoordinateSpace,
        found: CoordinateSpace,
    },
}

/// Pixel dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Dimensions after applying `rotation`: 90 and 270 swap the axes.
    pub fn rotated(self, rotation: Rotation) -> Self {
        if rotation.swaps_axes() {
            Self::new(self.height, self.width)
        } else {
            self
        }
    }

    fn aspect(self) -> f64 {
        self.width as f64 / self.height as f64
    }

    fn require_area(self, what: &'static str) -> Result<Self, MapError> {
        if self.width == 0 || self.height == 0 {
            return Err(MapError::EmptySize {
                what,
                width: self.width,
                height: self.height,
            });
        }
        Ok(self)
    }
}

/// Integer rectangle with exclusive right/bottom edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    /// Rectangle spanning two corner points given in any order.
    fn from_corners((x0, y0): (i32, i32), (x1, y1): (i32, i32)) -> Self {
        Self::new(x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1))
    }
}

/// Clockwise rotation that turns the sensor image upright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rotation {
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn from_degrees(degrees: u32) -> Result<Self, MapError> {
        match degrees {
            0 => Ok(Rotation::Deg0),
            90 => Ok(Rotation::Deg90),
            180 => Ok(Rotation::Deg180),
            270 => Ok(Rotation::Deg270),
            other => Err(MapError::UnsupportedRotation(other)),
        }
    }

    pub fn degrees(self) -> u32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    pub fn swaps_axes(self) -> bool {
        matches!(self, Rotation::Deg90 | Rotation::Deg270)
    }
}

/// Which pixel grid a box lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CoordinateSpace {
    /// Upright camera image.
    Camera,
    /// On-screen overlay view.
    View,
}

/// A rectangle together with the space it lives in and the transform
/// parameters needed to move it to the other space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub rect: Rect,
    pub space: CoordinateSpace,
    pub rotation: Rotation,
    /// Sensor dimensions in native (unrotated) orientation.
    pub camera: Size,
    pub view: Size,
}

impl BoundingBox {
    pub fn in_camera(rect: Rect, camera: Size, view: Size, rotation: Rotation) -> Self {
        Self {
            rect,
            space: CoordinateSpace::Camera,
            rotation,
            camera,
            view,
        }
    }

    pub fn to_view(&self) -> Result<BoundingBox, MapError> {
        self.expect_space(CoordinateSpace::Camera)?;
        map_to_view(self.rect, self.camera, self.view, self.rotation)
    }

    pub fn to_camera(&self) -> Result<BoundingBox, MapError> {
        self.expect_space(CoordinateSpace::View)?;
        map_to_camera(self.rect, self.camera, self.view, self.rotation)
    }

    fn expect_space(&self, expected: CoordinateSpace) -> Result<(), MapError> {
        if self.space != expected {
            return Err(MapError::WrongSpace {
                expected,
                found: self.space,
            });
        }
        Ok(())
    }
}

/// Uniform scale-to-fit with symmetric padding on one axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f64,
    pub pad_x: f64,
    pub pad_y: f64,
}

impl Letterbox {
    /// Fit the upright camera image (`camera` rotated by `rotation`) into `view`.
    pub fn fit(camera: Size, view: Size, rotation: Rotation) -> Result<Self, MapError> {
        let upright = camera.require_area("camera")?.rotated(rotation);
        let view = view.require_area("view")?;

        let letterbox = if upright.aspect() > view.aspect() {
            // Camera is relatively wider: fill the width, pad top and bottom.
            let scale = view.width as f64 / upright.width as f64;
            Letterbox {
                scale,
                pad_x: 0.0,
                pad_y: (view.height as f64 - scale * upright.height as f64) / 2.0,
            }
        } else {
            let scale = view.height as f64 / upright.height as f64;
            Letterbox {
                scale,
                pad_x: (view.width as f64 - scale * upright.width as f64) / 2.0,
                pad_y: 0.0,
            }
        };
        Ok(letterbox)
    }

    pub fn to_view(&self, rect: Rect) -> Rect {
        let x = |v: i32| (v as f64 * self.scale + self.pad_x).round() as i32;
        let y = |v: i32| (v as f64 * self.scale + self.pad_y).round() as i32;
        Rect::new(x(rect.left), y(rect.top), x(rect.right), y(rect.bottom))
    }

    pub fn to_camera(&self, rect: Rect) -> Rect {
        let x = |v: i32| ((v as f64 - self.pad_x) / self.scale).round() as i32;
        let y = |v: i32| ((v as f64 - self.pad_y) / self.scale).round() as i32;
        Rect::new(x(rect.left), y(rect.top), x(rect.right), y(rect.bottom))
    }
}

/// Map a box from upright camera space into view space.
pub fn map_to_view(
    rect: Rect,
    camera: Size,
    view: Size,
    rotation: Rotation,
) -> Result<BoundingBox, MapError> {
    let letterbox = Letterbox::fit(camera, view, rotation)?;
    Ok(BoundingBox {
        rect: letterbox.to_view(rect),
        space: CoordinateSpace::View,
        rotation,
        camera,
        view,
    })
}

/// Map a box from view space back into upright camera space.
pub fn map_to_camera(
    rect: Rect,
    camera: Size,
    view: Size,
    rotation: Rotation,
) -> Result<BoundingBox, MapError> {
    let letterbox = Letterbox::fit(camera, view, rotation)?;
    Ok(BoundingBox {
        rect: letterbox.to_camera(rect),
        space: CoordinateSpace::Camera,
        rotation,
        camera,
        view,
    })
}

/// Rotate a box from native sensor orientation into the upright image.
///
/// `sensor` is the unrotated sensor size; the result lives in
/// `sensor.rotated(rotation)`.
pub fn rotate_to_upright(rect: Rect, sensor: Size, rotation: Rotation) -> Rect {
    let (w, h) = (sensor.width as i32, sensor.height as i32);
    let point = |x: i32, y: i32| match rotation {
        Rotation::Deg0 => (x, y),
        Rotation::Deg90 => (h - y, x),
        Rotation::Deg180 => (w - x, h - y),
        Rotation::Deg270 => (y, w - x),
    };
    Rect::from_corners(point(rect.left, rect.top), point(rect.right, rect.bottom))
}

/// Inverse of [`rotate_to_upright`].
pub fn rotate_to_sensor(rect: Rect, sensor: Size, rotation: Rotation) -> Rect {
    let (w, h) = (sensor.width as i32, sensor.height as i32);
    let point = |x: i32, y: i32| match rotation {
        Rotation::Deg0 => (x, y),
        Rotation::Deg90 => (y, h - x),
        Rotation::Deg180 => (w - x, h - y),
        Rotation::Deg270 => (w - y, x),
    };
    Rect::from_corners(point(rect.left, rect.top), point(rect.right, rect.bottom))
}

/// Map a view box all the way back to native sensor orientation.
pub fn map_to_sensor(
    rect: Rect,
    camera: Size,
    view: Size,
    rotation: Rotation,
) -> Result<Rect, MapError> {
    let upright = map_to_camera(rect, camera, view, rotation)?;
    Ok(rotate_to_sensor(upright.rect, camera, rotation))
}
