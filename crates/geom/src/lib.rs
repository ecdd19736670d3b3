//! Basic geometry of the arm, as seen from the operator's console.
//!
//! Coordinates come in two conventions. The "operator frame" is the one
//! shown to and edited by the person at the console: `x` runs left to right
//! across the work area and `y` runs forward, away from the base. The
//! arm's controller is mounted rotated relative to that, so its "firmware
//! frame" has `x` and `y` swapped. Everything in this crate is in the
//! operator frame unless it is wrapped in a [`FirmwarePose`].
//!
//! All lengths are in centimeters and the effector opening is in degrees.

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

pub struct Pixels;

/// A point on a plotting surface, measured from its top-left corner.
pub type PlotPoint = euclid::Point2D<f64, Pixels>;
pub type Viewport = euclid::Size2D<f64, Pixels>;

pub const X_RANGE: RangeInclusive<f64> = -30.0..=30.0;
pub const Y_RANGE: RangeInclusive<f64> = 0.0..=40.0;
pub const Z_RANGE: RangeInclusive<f64> = 0.0..=20.0;
pub const EFFECTOR_RANGE: RangeInclusive<f64> = 0.0..=90.0;

/// A target (or reported) arm configuration in the operator frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Opening angle of the end effector.
    pub effector: f64,
}

/// A pose in the firmware's axis convention.
///
/// This is only ever produced by [`Pose::to_firmware_frame`] or by decoding
/// something the arm sent us, and the only way back out is
/// [`FirmwarePose::to_operator_frame`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FirmwarePose(pub Pose);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
    Z,
    Effector,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("coordinates must be finite numbers")]
    InvalidNumber,
    #[error("effector angle must be between 0 and 90")]
    EffectorOutOfRange,
    #[error("x must be between -30 and 30")]
    XOutOfRange,
    #[error("y must be between 0 and 40")]
    YOutOfRange,
    #[error("z must be between 0 and 20")]
    ZOutOfRange,
}

impl Axis {
    pub const ALL: [Axis; 4] = [Axis::X, Axis::Y, Axis::Z, Axis::Effector];

    pub fn name(self) -> &'static str {
        match self {
            Axis::X => "x",
            Axis::Y => "y",
            Axis::Z => "z",
            Axis::Effector => "effector",
        }
    }

    pub fn range(self) -> RangeInclusive<f64> {
        match self {
            Axis::X => X_RANGE,
            Axis::Y => Y_RANGE,
            Axis::Z => Z_RANGE,
            Axis::Effector => EFFECTOR_RANGE,
        }
    }
}

impl std::str::FromStr for Axis {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "x" => Ok(Axis::X),
            "y" => Ok(Axis::Y),
            "z" => Ok(Axis::Z),
            "e" | "effector" => Ok(Axis::Effector),
            _ => Err(format!("unknown axis {s:?}")),
        }
    }
}

impl Pose {
    pub const fn new(x: f64, y: f64, z: f64, effector: f64) -> Self {
        Pose { x, y, z, effector }
    }

    pub fn get(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
            Axis::Effector => self.effector,
        }
    }

    /// Returns a copy of this pose with one axis replaced.
    pub fn with(self, axis: Axis, value: f64) -> Pose {
        let mut ret = self;
        match axis {
            Axis::X => ret.x = value,
            Axis::Y => ret.y = value,
            Axis::Z => ret.z = value,
            Axis::Effector => ret.effector = value,
        }
        ret
    }

    /// Checks that this pose is something the arm can be asked to do.
    ///
    /// The checks run in a fixed order and the first failure is reported:
    /// well-formedness of all four numbers, then the effector, then x, y
    /// and z.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if Axis::ALL.iter().any(|&a| !self.get(a).is_finite()) {
            return Err(ValidationError::InvalidNumber);
        }
        if !EFFECTOR_RANGE.contains(&self.effector) {
            return Err(ValidationError::EffectorOutOfRange);
        }
        if !X_RANGE.contains(&self.x) {
            return Err(ValidationError::XOutOfRange);
        }
        if !Y_RANGE.contains(&self.y) {
            return Err(ValidationError::YOutOfRange);
        }
        if !Z_RANGE.contains(&self.z) {
            return Err(ValidationError::ZOutOfRange);
        }
        Ok(())
    }

    fn swap_xy(self) -> Pose {
        Pose {
            x: self.y,
            y: self.x,
            ..self
        }
    }

    pub fn to_firmware_frame(self) -> FirmwarePose {
        FirmwarePose(self.swap_xy())
    }

    /// Where this pose lands on a plot of the work area that is `viewport`
    /// pixels large.
    ///
    /// There is no clamping: a pose that passes [`Pose::validate`] lands
    /// inside the viewport, anything else may not.
    pub fn project(&self, viewport: Viewport) -> PlotPoint {
        project_xy(self.x, self.y, viewport)
    }
}

impl FirmwarePose {
    pub fn to_operator_frame(self) -> Pose {
        self.0.swap_xy()
    }
}

/// Projects an operator-frame `(x, y)` onto a plot.
///
/// The plot's vertical axis grows downwards while `y` grows away from the
/// base, so `y` is flipped.
pub fn project_xy(x: f64, y: f64, viewport: Viewport) -> PlotPoint {
    let x_span = X_RANGE.end() - X_RANGE.start();
    let y_span = Y_RANGE.end() - Y_RANGE.start();
    PlotPoint::new(
        (x - X_RANGE.start()) / x_span * viewport.width,
        (1.0 - (y - Y_RANGE.start()) / y_span) * viewport.height,
    )
}
