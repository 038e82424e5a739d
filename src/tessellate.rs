//! Triangulation of box, sphere and cylinder primitives.
//!
//! All generators return position-only [`TriangleMesh`] buffers centered on
//! the primitive's own origin. The tessellation factor scales resolution and
//! is clamped to [`MIN_TESSELLATION`].

#![allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]

use std::f64::consts::PI;

use hashbrown::HashMap;
use nalgebra::Vector3;
use tracing::debug;

use crate::config::MIN_TESSELLATION;
use crate::types::TriangleMesh;

/// Icosahedron coordinate on the long side of each golden rectangle.
const ICO_X: f64 = 0.850_650_808_352_039_932;
/// Icosahedron coordinate on the short side of each golden rectangle.
const ICO_Y: f64 = 0.525_731_112_119_133_606;
const ICO_Z: f64 = 0.0;

const ICOSAHEDRON_INDICES: [u32; 60] = [
    0, 1, 2, 1, 3, 4, 3, 5, 6, 2, 4, 7, 5, 6, 8, 2, 7, 9, 0, 5, 8, 7, 9, 10, 0, 1, 5, 7, 10, 11, 1,
    3, 5, 6, 10, 11, 3, 6, 11, 9, 10, 8, 3, 4, 11, 6, 8, 10, 4, 7, 11, 1, 2, 4, 0, 8, 9, 0, 2, 9,
];

const BOX_INDICES: [u32; 36] = [
    0, 1, 2, 1, 2, 3, 4, 5, 6, 5, 6, 7, 0, 1, 4, 1, 4, 5, 2, 3, 6, 3, 6, 7, 0, 2, 4, 2, 4, 6, 1, 3,
    5, 3, 5, 7,
];

/// Number of sphere subdivision levels for a tessellation factor.
///
/// `max(0, 3 + floor(log2(factor)))`, so factor 1.0 gives 3 levels.
#[must_use]
pub fn sphere_levels(tessellation: f64) -> u32 {
    let levels = 3.0 + tessellation.max(MIN_TESSELLATION).log2().floor();
    if levels <= 0.0 { 0 } else { levels as u32 }
}

/// Box from half extents: 8 corners, 12 triangles.
///
/// Each triangle is wound so its signed volume from the origin is non-negative.
#[must_use]
pub fn tessellate_box(half_extents: &Vector3<f64>) -> TriangleMesh {
    let (x, y, z) = (half_extents.x, half_extents.y, half_extents.z);
    let vertices = vec![
        Vector3::new(x, y, z),
        Vector3::new(x, y, -z),
        Vector3::new(x, -y, z),
        Vector3::new(x, -y, -z),
        Vector3::new(-x, y, z),
        Vector3::new(-x, y, -z),
        Vector3::new(-x, -y, z),
        Vector3::new(-x, -y, -z),
    ];
    let mut indices = BOX_INDICES.to_vec();
    for tri in indices.chunks_exact_mut(3) {
        let (a, b, c) = (
            &vertices[tri[0] as usize],
            &vertices[tri[1] as usize],
            &vertices[tri[2] as usize],
        );
        if signed_volume(a, b, c) < 0.0 {
            tri.swap(0, 1);
        }
    }
    TriangleMesh::from_buffers(vertices, indices)
}

/// Geodesic sphere built by subdividing an icosahedron.
#[must_use]
pub fn tessellate_sphere(radius: f64, tessellation: f64) -> TriangleMesh {
    let levels = sphere_levels(tessellation);
    let mut mesh = unit_icosphere(levels);
    for v in &mut mesh.vertices {
        *v *= radius;
    }
    mesh
}

/// Cylinder along Z with `ceil(24 * factor) + 3` ring segments.
///
/// Vertices 0 and 1 are the cap centers; each ring step adds a top and a
/// bottom vertex plus two cap and two side triangles.
#[must_use]
pub fn tessellate_cylinder(radius: f64, height: f64, tessellation: f64) -> TriangleMesh {
    let tessellation = tessellation.max(MIN_TESSELLATION);
    let half = height * 0.5;
    let segments = (tessellation * 24.0).ceil() as u32 + 3;
    let dtheta = 2.0 * PI / f64::from(segments);

    let mut vertices = vec![
        Vector3::new(0.0, 0.0, half),
        Vector3::new(0.0, 0.0, -half),
        Vector3::new(radius, 0.0, half),
        Vector3::new(radius, 0.0, -half),
    ];
    let mut indices = Vec::with_capacity(12 * (segments as usize + 1));
    for i in 0..=segments {
        let theta = dtheta * f64::from(i);
        let (s, c) = (radius * theta.sin(), radius * theta.cos());
        let off = vertices.len() as u32;
        vertices.push(Vector3::new(c, s, half));
        vertices.push(Vector3::new(c, s, -half));
        indices.extend_from_slice(&[
            0,
            off,
            off - 2,
            1,
            off - 1,
            off + 1,
            off - 2,
            off,
            off - 1,
            off,
            off - 1,
            off + 1,
        ]);
    }
    TriangleMesh::from_buffers(vertices, indices)
}

/// Unit icosphere after `levels` rounds of 4-way subdivision.
#[must_use]
pub fn unit_icosphere(levels: u32) -> TriangleMesh {
    let mut vertices = vec![
        Vector3::new(ICO_Z, ICO_X, -ICO_Y),
        Vector3::new(ICO_X, ICO_Y, ICO_Z),
        Vector3::new(ICO_Y, ICO_Z, -ICO_X),
        Vector3::new(ICO_Y, ICO_Z, ICO_X),
        Vector3::new(ICO_X, -ICO_Y, ICO_Z),
        Vector3::new(ICO_Z, ICO_X, ICO_Y),
        Vector3::new(-ICO_Y, ICO_Z, ICO_X),
        Vector3::new(ICO_Z, -ICO_X, -ICO_Y),
        Vector3::new(-ICO_X, ICO_Y, ICO_Z),
        Vector3::new(-ICO_Y, ICO_Z, -ICO_X),
        Vector3::new(-ICO_X, -ICO_Y, ICO_Z),
        Vector3::new(ICO_Z, -ICO_X, ICO_Y),
    ];
    let mut indices = ICOSAHEDRON_INDICES.to_vec();

    // Orient every face counter-clockwise when seen from outside.
    for tri in indices.chunks_exact_mut(3) {
        let v0 = vertices[tri[0] as usize];
        let v1 = vertices[tri[1] as usize];
        let v2 = vertices[tri[2] as usize];
        if v0.dot(&(v1 - v0).cross(&(v2 - v0))) < 0.0 {
            tri.swap(0, 1);
        }
    }

    for level in 0..levels {
        let mut midpoints: HashMap<(u32, u32), u32> = HashMap::with_capacity(indices.len());
        let mut next = Vec::with_capacity(indices.len() * 4);
        for tri in indices.chunks_exact(3) {
            let mut mids = [0u32; 3];
            for j in 0..3 {
                let a = tri[j];
                let b = tri[(j + 1) % 3];
                let key = (a.min(b), a.max(b));
                mids[j] = *midpoints.entry(key).or_insert_with(|| {
                    let m = (vertices[a as usize] + vertices[b as usize]).normalize();
                    vertices.push(m);
                    (vertices.len() - 1) as u32
                });
            }
            next.extend_from_slice(&[
                tri[0], mids[0], mids[2], //
                mids[0], tri[1], mids[1], //
                mids[2], mids[0], mids[1], //
                mids[2], mids[1], tri[2],
            ]);
        }
        indices = next;
        debug!(
            level,
            vertices = vertices.len(),
            faces = indices.len() / 3,
            "Subdivided icosphere"
        );
    }

    TriangleMesh::from_buffers(vertices, indices)
}

fn signed_volume(a: &Vector3<f64>, b: &Vector3<f64>, c: &Vector3<f64>) -> f64 {
    a.dot(&b.cross(c)) / 6.0
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use hashbrown::HashSet;

    fn vertex_key(v: &Vector3<f64>) -> (i64, i64, i64) {
        let q = |x: f64| (x * 1e9).round() as i64;
        (q(v.x), q(v.y), q(v.z))
    }

    #[test]
    fn test_box_counts_and_winding() {
        let mesh = tessellate_box(&Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(mesh.vertex_count(), 8);
        assert_eq!(mesh.indices.len(), 36);
        for [a, b, c] in mesh.triangles() {
            let vol = signed_volume(
                &mesh.vertices[a as usize],
                &mesh.vertices[b as usize],
                &mesh.vertices[c as usize],
            );
            assert!(vol >= 0.0);
        }
    }

    #[test]
    fn test_sphere_levels() {
        assert_eq!(sphere_levels(1.0), 3);
        assert_eq!(sphere_levels(2.0), 4);
        assert_eq!(sphere_levels(0.5), 2);
        assert_eq!(sphere_levels(0.0), 0);
    }

    #[test]
    fn test_sphere_edge_midpoints_shared() {
        let mut previous = 0;
        for levels in 0..=3 {
            let mesh = unit_icosphere(levels);
            // Each shared edge adds exactly one vertex: V = 10 * 4^L + 2.
            assert_eq!(mesh.vertex_count(), 10 * 4usize.pow(levels) + 2);
            assert_eq!(mesh.triangle_count(), 20 * 4usize.pow(levels));
            assert!(mesh.vertex_count() > previous);
            previous = mesh.vertex_count();

            let unique: HashSet<_> = mesh.vertices.iter().map(vertex_key).collect();
            assert_eq!(unique.len(), mesh.vertex_count());
        }
    }

    #[test]
    fn test_sphere_radius() {
        let mesh = tessellate_sphere(2.5, 1.0);
        assert_eq!(mesh.vertex_count(), 642);
        for v in &mesh.vertices {
            assert_relative_eq!(v.norm(), 2.5, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_sphere_outward_winding() {
        let mesh = unit_icosphere(1);
        for [a, b, c] in mesh.triangles() {
            let (v0, v1, v2) = (
                mesh.vertices[a as usize],
                mesh.vertices[b as usize],
                mesh.vertices[c as usize],
            );
            assert!(v0.dot(&(v1 - v0).cross(&(v2 - v0))) > 0.0);
        }
    }

    #[test]
    fn test_cylinder_ring() {
        let mesh = tessellate_cylinder(0.5, 2.0, 1.0);
        let segments = 27;
        assert_eq!(mesh.vertex_count(), 4 + 2 * (segments + 1));
        assert_eq!(mesh.triangle_count(), 4 * (segments + 1));
        for v in &mesh.vertices[2..] {
            assert_relative_eq!(v.xy().norm(), 0.5, epsilon = 1e-12);
            assert_relative_eq!(v.z.abs(), 1.0);
        }
        let max_index = mesh.indices.iter().copied().max().unwrap() as usize;
        assert!(max_index < mesh.vertex_count());
    }
}
