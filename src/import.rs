//! External mesh import collaborator.

use nalgebra::Vector3;

use crate::error::Result;
use crate::types::TriangleMesh;

/// Loads externally referenced mesh files.
///
/// Implementations return the triangle groups of the file already in the
/// mesh's local frame with `scale` applied. Placement is the caller's job.
pub trait MeshImporter {
    /// Import the mesh at `uri`.
    ///
    /// # Errors
    ///
    /// Implementations return [`ColladaError::Import`](crate::ColladaError::Import)
    /// when the resource cannot be loaded.
    fn import(&self, uri: &str, scale: Vector3<f64>) -> Result<Vec<TriangleMesh>>;
}

impl<F> MeshImporter for F
where
    F: Fn(&str, Vector3<f64>) -> Result<Vec<TriangleMesh>>,
{
    fn import(&self, uri: &str, scale: Vector3<f64>) -> Result<Vec<TriangleMesh>> {
        self(uri, scale)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::ColladaError;
    use approx::assert_relative_eq;

    #[test]
    fn test_closure_importer() {
        let importer = |uri: &str, scale: Vector3<f64>| -> Result<Vec<TriangleMesh>> {
            if uri.ends_with(".stl") {
                Ok(vec![TriangleMesh::from_buffers(
                    vec![Vector3::zeros(), Vector3::x() * scale.x, Vector3::y() * scale.y],
                    vec![0, 1, 2],
                )])
            } else {
                Err(ColladaError::Import(format!("unknown format: {uri}")))
            }
        };
        let meshes = importer
            .import("package://arm/base.stl", Vector3::repeat(2.0))
            .unwrap();
        assert_relative_eq!(meshes[0].vertices[1].x, 2.0);
        assert!(importer.import("base.obj", Vector3::repeat(1.0)).is_err());
    }
}
