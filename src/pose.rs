//! Rigid poses and homogeneous 3×4 transforms.
//!
//! Scene graphs compose raw transform stacks as [`Transform`] (a 3×3 block
//! that may carry scale, plus a translation column). Joint origins, link
//! frames and geometry placements are stored as [`Pose`], which is always a
//! unit quaternion plus a position. Converting a `Transform` to a `Pose`
//! discards scale; [`Transform::decompose`] recovers it separately.

use nalgebra::{Matrix3, Quaternion, Unit, UnitQuaternion, Vector3};
use tracing::warn;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Squared quaternion norm below which a rotation is treated as degenerate.
const DEGENERATE_NORM_SQUARED: f64 = 1e-20;

/// A rigid transform: rotation followed by translation.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Pose {
    /// Translation in meters.
    pub position: Vector3<f64>,
    /// Orientation.
    pub rotation: UnitQuaternion<f64>,
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

impl Pose {
    /// The identity pose.
    #[must_use]
    pub fn identity() -> Self {
        Self {
            position: Vector3::zeros(),
            rotation: UnitQuaternion::identity(),
        }
    }

    /// Create a pose from a position and rotation.
    #[must_use]
    pub fn new(position: Vector3<f64>, rotation: UnitQuaternion<f64>) -> Self {
        Self { position, rotation }
    }

    /// A pure translation.
    #[must_use]
    pub fn from_translation(position: Vector3<f64>) -> Self {
        Self {
            position,
            rotation: UnitQuaternion::identity(),
        }
    }

    /// A pure rotation of `angle` radians about `axis`.
    #[must_use]
    pub fn from_axis_angle(axis: Vector3<f64>, angle: f64) -> Self {
        Self {
            position: Vector3::zeros(),
            rotation: quat_from_axis_angle(axis, angle),
        }
    }

    /// Compose `self` after `other`: the result maps `other`'s child frame
    /// into `self`'s parent frame.
    #[must_use]
    pub fn mul(&self, other: &Self) -> Self {
        Self {
            position: self.rotation * other.position + self.position,
            rotation: renormalize(self.rotation.into_inner() * other.rotation.into_inner()),
        }
    }

    /// The inverse pose, so that `p.mul(&p.inverse())` is identity.
    #[must_use]
    pub fn inverse(&self) -> Self {
        let rotation = self.rotation.inverse();
        Self {
            position: -(rotation * self.position),
            rotation,
        }
    }

    /// Apply this pose to a point.
    #[must_use]
    pub fn transform_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * p + self.position
    }

    /// Rotate a direction without translating it.
    #[must_use]
    pub fn rotate_vector(&self, v: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * v
    }

    /// Whether both parts are within `eps` of identity.
    #[must_use]
    pub fn is_identity(&self, eps: f64) -> bool {
        self.position.norm() <= eps && self.rotation.angle() <= eps
    }

    /// Convert to a homogeneous transform.
    #[must_use]
    pub fn to_transform(&self) -> Transform {
        Transform {
            matrix: self.rotation.to_rotation_matrix().into_inner(),
            translation: self.position,
        }
    }

    /// Convert a homogeneous transform, dropping any scale or shear.
    #[must_use]
    pub fn from_transform(t: &Transform) -> Self {
        Self {
            position: t.translation,
            rotation: quat_from_matrix(&t.matrix),
        }
    }
}

/// A 3×4 homogeneous transform: linear block plus translation column.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Transform {
    /// Rotation and scale block.
    pub matrix: Matrix3<f64>,
    /// Translation column.
    pub translation: Vector3<f64>,
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transform {
    /// The identity transform.
    #[must_use]
    pub fn identity() -> Self {
        Self {
            matrix: Matrix3::identity(),
            translation: Vector3::zeros(),
        }
    }

    /// Create a transform from its linear block and translation.
    #[must_use]
    pub fn new(matrix: Matrix3<f64>, translation: Vector3<f64>) -> Self {
        Self {
            matrix,
            translation,
        }
    }

    /// A pure translation.
    #[must_use]
    pub fn from_translation(translation: Vector3<f64>) -> Self {
        Self {
            matrix: Matrix3::identity(),
            translation,
        }
    }

    /// A rotation of `angle` radians about `axis`. A zero axis yields identity.
    #[must_use]
    pub fn from_axis_angle(axis: Vector3<f64>, angle: f64) -> Self {
        Self {
            matrix: quat_from_axis_angle(axis, angle)
                .to_rotation_matrix()
                .into_inner(),
            translation: Vector3::zeros(),
        }
    }

    /// A non-uniform scale.
    #[must_use]
    pub fn from_scale(scale: Vector3<f64>) -> Self {
        Self {
            matrix: Matrix3::from_diagonal(&scale),
            translation: Vector3::zeros(),
        }
    }

    /// Build from 16 row-major values, scaling the translation by `unit`.
    ///
    /// The bottom row is ignored.
    #[must_use]
    pub fn from_row_major(m: &[f64; 16], unit: f64) -> Self {
        Self {
            matrix: Matrix3::new(m[0], m[1], m[2], m[4], m[5], m[6], m[8], m[9], m[10]),
            translation: Vector3::new(m[3], m[7], m[11]) * unit,
        }
    }

    /// Compose `self` after `other`.
    #[must_use]
    pub fn mul(&self, other: &Self) -> Self {
        Self {
            matrix: self.matrix * other.matrix,
            translation: self.matrix * other.translation + self.translation,
        }
    }

    /// The inverse transform. A singular linear block inverts as its transpose.
    #[must_use]
    pub fn inverse(&self) -> Self {
        let matrix = self.matrix.try_inverse().unwrap_or_else(|| {
            warn!(
                determinant = self.matrix.determinant(),
                "singular transform, inverting with the transpose"
            );
            self.matrix.transpose()
        });
        Self {
            matrix,
            translation: -(matrix * self.translation),
        }
    }

    /// Apply this transform to a point.
    #[must_use]
    pub fn transform_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.matrix * p + self.translation
    }

    /// Split into a rigid pose and per-axis scale (column norms of the linear block).
    ///
    /// A zero column keeps a scale of zero and contributes no rotation.
    #[must_use]
    pub fn decompose(&self) -> (Pose, Vector3<f64>) {
        let mut scale = Vector3::zeros();
        let mut rotation = self.matrix;
        for c in 0..3 {
            let n = self.matrix.column(c).norm();
            scale[c] = n;
            if n > 0.0 {
                rotation.set_column(c, &(self.matrix.column(c) / n));
            }
        }
        let pose = Pose {
            position: self.translation,
            rotation: quat_from_matrix(&rotation),
        };
        (pose, scale)
    }
}

impl From<Pose> for Transform {
    fn from(p: Pose) -> Self {
        p.to_transform()
    }
}

/// Quaternion for a rotation of `angle` radians about `axis`.
///
/// The axis need not be normalized; a zero axis yields identity.
#[must_use]
pub fn quat_from_axis_angle(axis: Vector3<f64>, angle: f64) -> UnitQuaternion<f64> {
    let n = axis.norm();
    if n <= 0.0 {
        return UnitQuaternion::identity();
    }
    UnitQuaternion::from_axis_angle(&Unit::new_unchecked(axis / n), angle)
}

/// Quaternion from the rotation part of a 3×3 matrix.
///
/// Uses the trace branch of largest magnitude and renormalizes the result,
/// so a matrix carrying mild scale still yields a unit quaternion.
#[must_use]
pub fn quat_from_matrix(m: &Matrix3<f64>) -> UnitQuaternion<f64> {
    let tr = m[(0, 0)] + m[(1, 1)] + m[(2, 2)];
    let (w, x, y, z) = if tr > 0.0 {
        let s = (tr + 1.0).sqrt() * 2.0;
        (
            0.25 * s,
            (m[(2, 1)] - m[(1, 2)]) / s,
            (m[(0, 2)] - m[(2, 0)]) / s,
            (m[(1, 0)] - m[(0, 1)]) / s,
        )
    } else if m[(0, 0)] > m[(1, 1)] && m[(0, 0)] > m[(2, 2)] {
        let s = (1.0 + m[(0, 0)] - m[(1, 1)] - m[(2, 2)]).sqrt() * 2.0;
        (
            (m[(2, 1)] - m[(1, 2)]) / s,
            0.25 * s,
            (m[(0, 1)] + m[(1, 0)]) / s,
            (m[(0, 2)] + m[(2, 0)]) / s,
        )
    } else if m[(1, 1)] > m[(2, 2)] {
        let s = (1.0 + m[(1, 1)] - m[(0, 0)] - m[(2, 2)]).sqrt() * 2.0;
        (
            (m[(0, 2)] - m[(2, 0)]) / s,
            (m[(0, 1)] + m[(1, 0)]) / s,
            0.25 * s,
            (m[(1, 2)] + m[(2, 1)]) / s,
        )
    } else {
        let s = (1.0 + m[(2, 2)] - m[(0, 0)] - m[(1, 1)]).sqrt() * 2.0;
        (
            (m[(1, 0)] - m[(0, 1)]) / s,
            (m[(0, 2)] + m[(2, 0)]) / s,
            (m[(1, 2)] + m[(2, 1)]) / s,
            0.25 * s,
        )
    };
    renormalize(Quaternion::new(w, x, y, z))
}

fn renormalize(q: Quaternion<f64>) -> UnitQuaternion<f64> {
    if q.norm_squared() < DEGENERATE_NORM_SQUARED || !q.norm_squared().is_finite() {
        UnitQuaternion::identity()
    } else {
        UnitQuaternion::new_normalize(q)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::{FRAC_PI_2, PI};

    fn sample_poses() -> Vec<Pose> {
        let mut poses = Vec::new();
        for i in 0..12 {
            let t = f64::from(i);
            let axis = Vector3::new(t.sin(), (0.7 * t).cos(), 0.3 + 0.1 * t);
            poses.push(Pose::new(
                Vector3::new(t, -0.5 * t, 2.0 - t),
                quat_from_axis_angle(axis, 0.37 * t - 1.5),
            ));
        }
        poses
    }

    #[test]
    fn test_pose_times_inverse_is_identity() {
        for p in sample_poses() {
            let id = p.mul(&p.inverse());
            assert_relative_eq!(id.position.norm(), 0.0, epsilon = 1e-9);
            assert_relative_eq!(id.rotation.angle(), 0.0, epsilon = 1e-9);
            let id = p.inverse().mul(&p);
            assert!(id.is_identity(1e-9));
        }
    }

    #[test]
    fn test_quat_from_matrix_is_unit() {
        for p in sample_poses() {
            let m = p.rotation.to_rotation_matrix().into_inner();
            let q = quat_from_matrix(&m);
            assert_relative_eq!(q.into_inner().norm(), 1.0, epsilon = 1e-9);
            assert_relative_eq!(q.angle_to(&p.rotation), 0.0, epsilon = 1e-9);
        }
        // Half-turns exercise the non-trace branches.
        for axis in [Vector3::x(), Vector3::y(), Vector3::z()] {
            let m = quat_from_axis_angle(axis, PI).to_rotation_matrix().into_inner();
            let q = quat_from_matrix(&m);
            assert_relative_eq!(q.into_inner().norm(), 1.0, epsilon = 1e-9);
            assert_relative_eq!(q.angle(), PI, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_composition_order() {
        let translate = Pose::from_translation(Vector3::new(1.0, 0.0, 0.0));
        let rotate = Pose::from_axis_angle(Vector3::z(), FRAC_PI_2);
        let p = rotate.mul(&translate).transform_point(&Vector3::zeros());
        assert_relative_eq!(p, Vector3::new(0.0, 1.0, 0.0), epsilon = 1e-12);
        let p = translate.mul(&rotate).transform_point(&Vector3::zeros());
        assert_relative_eq!(p, Vector3::new(1.0, 0.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn test_zero_axis_is_identity() {
        let q = quat_from_axis_angle(Vector3::zeros(), 1.0);
        assert_relative_eq!(q.angle(), 0.0);
    }

    #[test]
    fn test_transform_matches_pose() {
        for p in sample_poses() {
            let t = p.to_transform();
            let v = Vector3::new(0.3, -1.2, 4.0);
            assert_relative_eq!(t.transform_point(&v), p.transform_point(&v), epsilon = 1e-9);
            let back = Pose::from_transform(&t.inverse().inverse());
            assert_relative_eq!(back.position, p.position, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_decompose_scale() {
        let rot = Transform::from_axis_angle(Vector3::new(1.0, 1.0, 0.0), 0.8);
        let t = Transform::from_translation(Vector3::new(1.0, 2.0, 3.0))
            .mul(&rot)
            .mul(&Transform::from_scale(Vector3::new(2.0, 3.0, 0.5)));
        let (pose, scale) = t.decompose();
        assert_relative_eq!(scale, Vector3::new(2.0, 3.0, 0.5), epsilon = 1e-9);
        assert_relative_eq!(pose.position, Vector3::new(1.0, 2.0, 3.0), epsilon = 1e-12);
        assert_relative_eq!(pose.rotation.angle(), 0.8, epsilon = 1e-9);
    }

    #[test]
    fn test_singular_inverse_uses_transpose() {
        let t = Transform::new(
            Matrix3::new(0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 2.0),
            Vector3::new(1.0, 2.0, 3.0),
        );
        let inv = t.inverse();
        assert_relative_eq!(inv.matrix, t.matrix.transpose());
        assert_relative_eq!(inv.translation, -(t.matrix.transpose() * t.translation));
    }

    #[test]
    fn test_row_major_matrix() {
        let m = [
            0.0, -1.0, 0.0, 10.0, //
            1.0, 0.0, 0.0, 20.0, //
            0.0, 0.0, 1.0, 30.0, //
            0.0, 0.0, 0.0, 1.0,
        ];
        let t = Transform::from_row_major(&m, 0.01);
        let p = t.transform_point(&Vector3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(p, Vector3::new(0.1, 1.2, 0.3), epsilon = 1e-12);
    }
}
