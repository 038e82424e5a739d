//! Principal-axis decomposition of symmetric 3x3 tensors.
//!
//! The tensor is reduced to tridiagonal form with a single plane rotation,
//! then diagonalized by QL iteration with implicit shifts. Eigenvectors are
//! the columns of the returned frame, which is always right-handed.

use nalgebra::{Matrix3, UnitQuaternion, Vector3};
use tracing::warn;

use crate::pose::quat_from_matrix;
use crate::types::Inertia;

const EPSILON: f64 = 1e-15;

/// QL iterations allowed per eigenvalue.
const MAX_ITERATIONS: usize = 32;

/// Eigen-decomposition of a symmetric 3x3 tensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrincipalAxes {
    /// Eigenvalues (principal moments), in the order of `frame`'s columns.
    pub moments: Vector3<f64>,
    /// Rotation whose columns are the unit eigenvectors.
    pub frame: Matrix3<f64>,
}

impl PrincipalAxes {
    /// The principal frame as a unit quaternion.
    #[must_use]
    pub fn rotation(&self) -> UnitQuaternion<f64> {
        quat_from_matrix(&self.frame)
    }
}

impl Inertia {
    /// Principal moments and axes of this tensor.
    #[must_use]
    pub fn principal_axes(&self) -> PrincipalAxes {
        eigen_symmetric3(&self.to_matrix())
    }
}

/// Decompose a symmetric matrix into eigenvalues and a right-handed
/// eigenvector frame.
///
/// Only the upper triangle of `m` is read.
#[must_use]
pub fn eigen_symmetric3(m: &Matrix3<f64>) -> PrincipalAxes {
    let mut vectors = [[0.0; 3]; 3];
    let mut diag = [0.0; 3];
    let mut subd = [0.0; 3];
    tridiagonalize(m, &mut vectors, &mut diag, &mut subd);
    if !ql_iterate(&mut vectors, &mut diag, &mut subd) {
        warn!("inertia decomposition did not converge in {MAX_ITERATIONS} iterations");
    }

    let mut frame = Matrix3::from_fn(|r, c| vectors[r][c]);
    if frame.determinant() < 0.0 {
        frame.column_mut(2).neg_mut();
    }
    PrincipalAxes {
        moments: Vector3::from(diag),
        frame,
    }
}

/// Householder reduction of a 3x3 symmetric matrix.
fn tridiagonalize(m: &Matrix3<f64>, q: &mut [[f64; 3]; 3], diag: &mut [f64; 3], subd: &mut [f64; 3]) {
    let (a, mut b, mut c) = (m[(0, 0)], m[(0, 1)], m[(0, 2)]);
    let (d, e, f) = (m[(1, 1)], m[(1, 2)], m[(2, 2)]);

    diag[0] = a;
    subd[2] = 0.0;
    if c.abs() >= EPSILON {
        let ell = b.hypot(c);
        b /= ell;
        c /= ell;
        let t = 2.0 * b * e + c * (f - d);
        diag[1] = d + c * t;
        diag[2] = f - c * t;
        subd[0] = ell;
        subd[1] = e - b * t;
        *q = [[1.0, 0.0, 0.0], [0.0, b, c], [0.0, c, -b]];
    } else {
        diag[1] = d;
        diag[2] = f;
        subd[0] = b;
        subd[1] = e;
        *q = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
    }
}

/// Implicitly shifted QL on the tridiagonal form, accumulating rotations
/// into `q`. Returns `false` if an eigenvalue failed to converge.
fn ql_iterate(q: &mut [[f64; 3]; 3], diag: &mut [f64; 3], subd: &mut [f64; 3]) -> bool {
    for i0 in 0..3 {
        let mut converged = false;
        for _ in 0..MAX_ITERATIONS {
            let mut i1 = i0;
            while i1 <= 1 {
                let sum = diag[i1].abs() + diag[i1 + 1].abs();
                if subd[i1].abs() + sum == sum {
                    break;
                }
                i1 += 1;
            }
            if i1 == i0 {
                converged = true;
                break;
            }

            let mut g = (diag[i0 + 1] - diag[i0]) / (2.0 * subd[i0]);
            let mut r = (g * g + 1.0).sqrt();
            g = if g < 0.0 {
                diag[i1] - diag[i0] + subd[i0] / (g - r)
            } else {
                diag[i1] - diag[i0] + subd[i0] / (g + r)
            };
            let (mut sin, mut cos, mut p) = (1.0, 1.0, 0.0);
            for i2 in (i0..i1).rev() {
                let f = sin * subd[i2];
                let b = cos * subd[i2];
                if f.abs() >= g.abs() {
                    cos = g / f;
                    r = (cos * cos + 1.0).sqrt();
                    subd[i2 + 1] = f * r;
                    sin = 1.0 / r;
                    cos *= sin;
                } else {
                    sin = f / g;
                    r = (sin * sin + 1.0).sqrt();
                    subd[i2 + 1] = g * r;
                    cos = 1.0 / r;
                    sin *= cos;
                }
                g = diag[i2 + 1] - p;
                r = (diag[i2] - g) * sin + 2.0 * b * cos;
                p = sin * r;
                diag[i2 + 1] = g + p;
                g = cos * r - b;

                for row in q.iter_mut() {
                    let t = row[i2 + 1];
                    row[i2 + 1] = sin * row[i2] + cos * t;
                    row[i2] = cos * row[i2] - sin * t;
                }
            }
            diag[i0] -= p;
            subd[i0] = g;
            subd[i1] = 0.0;
        }
        if !converged {
            return false;
        }
    }
    true
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn reconstruct(p: &PrincipalAxes) -> Matrix3<f64> {
        p.frame * Matrix3::from_diagonal(&p.moments) * p.frame.transpose()
    }

    #[test]
    fn test_diagonal_tensor_is_identity_frame() {
        let p = Inertia::diagonal(1.0, 2.0, 3.0).principal_axes();
        assert_relative_eq!(p.moments, Vector3::new(1.0, 2.0, 3.0), epsilon = 1e-12);
        assert_relative_eq!(p.frame, Matrix3::identity(), epsilon = 1e-12);
    }

    #[test]
    fn test_full_tensor_reconstructs() {
        let inertia = Inertia {
            ixx: 2.0,
            ixy: 0.3,
            ixz: -0.4,
            iyy: 1.5,
            iyz: 0.2,
            izz: 1.0,
        };
        let p = inertia.principal_axes();
        assert_relative_eq!(reconstruct(&p), inertia.to_matrix(), epsilon = 1e-9);
        assert_relative_eq!(p.frame.determinant(), 1.0, epsilon = 1e-9);
        assert_relative_eq!(p.frame.transpose() * p.frame, Matrix3::identity(), epsilon = 1e-9);
    }

    #[test]
    fn test_zero_xz_coupling_skips_rotation() {
        let m = Matrix3::new(1.0, 0.5, 0.0, 0.5, 1.0, 0.0, 0.0, 0.0, 2.0);
        let p = eigen_symmetric3(&m);
        let mut moments: Vec<f64> = p.moments.iter().copied().collect();
        moments.sort_by(f64::total_cmp);
        assert_relative_eq!(moments[0], 0.5, epsilon = 1e-12);
        assert_relative_eq!(moments[1], 1.5, epsilon = 1e-12);
        assert_relative_eq!(moments[2], 2.0, epsilon = 1e-12);
        assert_relative_eq!(reconstruct(&p), m, epsilon = 1e-9);
    }

    #[test]
    fn test_rotation_is_unit() {
        let inertia = Inertia {
            ixx: 3.0,
            ixy: 1.0,
            ixz: 1.0,
            iyy: 3.0,
            iyz: 1.0,
            izz: 3.0,
        };
        let q = inertia.principal_axes().rotation();
        assert_relative_eq!(q.norm(), 1.0, epsilon = 1e-9);
    }
}
