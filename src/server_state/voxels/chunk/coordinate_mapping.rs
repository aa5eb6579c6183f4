//! # Coordinate Mappings
//!
//! A chunk container stores its chunks on a straight cube grid. The mapping
//! chosen for the container decides how a position in the container's space is
//! brought back onto that grid before voxel coordinates are computed.
//!
//! ## Key Components
//! - `CubeMapping`: identity; the world *is* the grid
//! - `DeformedMapping`: rounded planet shell around a center, flat inside `radius`

use cgmath::{InnerSpace, Vector3};
use std::fmt::Debug;

/// Strategy turning a container-space position into straight grid space.
pub trait CoordinateMapping: Send + Sync + Debug {
    /// Maps `position` onto the undeformed cube grid.
    fn map_position(&self, position: Vector3<f32>) -> Vector3<f32>;
}

/// Undeformed cube grid.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct CubeMapping;

impl CoordinateMapping for CubeMapping {
    fn map_position(&self, position: Vector3<f32>) -> Vector3<f32> {
        position
    }
}

/// Rounded shell around `center`.
///
/// Points whose largest per-axis distance to the center is at most `radius` lie
/// in the flat region and map to themselves. Points further out are split into
/// an inner point, clamped into the axis-aligned box of half-extent
/// `distance - radius`, and an outward normal from that inner point; the result
/// lies `radius` along that normal. A radius of zero is an undeformed cube.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeformedMapping {
    center: Vector3<f32>,
    radius: f32,
}

impl DeformedMapping {
    /// Creates a mapping. Negative (or NaN) radii are clamped to zero.
    pub fn new(center: Vector3<f32>, radius: f32) -> Self {
        Self {
            center,
            radius: radius.max(0.0),
        }
    }

    /// Center of the deformation.
    pub fn center(&self) -> Vector3<f32> {
        self.center
    }

    /// Radius of the rounded region.
    pub fn radius(&self) -> f32 {
        self.radius
    }
}

impl CoordinateMapping for DeformedMapping {
    fn map_position(&self, position: Vector3<f32>) -> Vector3<f32> {
        let relative = position - self.center;
        let dist_to_center = relative
            .x
            .abs()
            .max(relative.y.abs())
            .max(relative.z.abs());

        if dist_to_center <= self.radius {
            return position;
        }

        let inner_reduction = (dist_to_center - self.radius).max(0.0);
        let inner_position = Vector3::new(
            position.x.clamp(
                self.center.x - inner_reduction,
                self.center.x + inner_reduction,
            ),
            position.y.clamp(
                self.center.y - inner_reduction,
                self.center.y + inner_reduction,
            ),
            position.z.clamp(
                self.center.z - inner_reduction,
                self.center.z + inner_reduction,
            ),
        );

        let outward = position - inner_position;
        let length = outward.magnitude();
        if length <= f32::EPSILON {
            return position;
        }

        inner_position + (outward / length) * self.radius.min(dist_to_center)
    }
}
