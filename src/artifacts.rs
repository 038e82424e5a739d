//! Caller-owned store of merged link meshes.
//!
//! Robot descriptions downstream of the converter cannot hold inline
//! triangle meshes, so each link's merged geometry is also rendered as a
//! standalone COLLADA document. The store owns those artifacts by link name;
//! writing them anywhere is left to the caller.

use std::collections::BTreeMap;

use crate::emit::{Emitter, esc, join};
use crate::types::{Color, TriangleMesh};

/// One colored triangle group of a merged link mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactPart {
    /// Triangles in the link's visual frame.
    pub mesh: TriangleMesh,
    /// Ambient color, already adjusted for viewers.
    pub ambient: Color,
    /// Diffuse color.
    pub diffuse: Color,
}

/// Merged mesh of one link.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshArtifact {
    /// Link the mesh belongs to.
    pub link: String,
    /// Colored triangle groups.
    pub parts: Vec<ArtifactPart>,
}

impl MeshArtifact {
    /// Total vertex count over all parts.
    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.parts.iter().map(|p| p.mesh.vertex_count()).sum()
    }

    /// Render as a standalone COLLADA 1.4.1 document.
    ///
    /// Each part gets its own effect, material (`blinn2_<k>`) and geometry
    /// (`base2_M1KShape<k>`), all instanced by one node named after the link.
    #[must_use]
    pub fn to_collada(&self) -> String {
        let mut out = Emitter::new();
        out.write_line(r#"<?xml version="1.0" encoding="utf-8"?>"#);
        out.open(r#"<COLLADA xmlns="http://www.collada.org/2005/11/COLLADASchema" version="1.4.1">"#);
        out.open("<asset>");
        out.open("<contributor>");
        out.leaf("comments", "robot_model/urdf temporary collada geometry");
        out.close("</contributor>");
        out.write_line(r#"<unit name="meter" meter="1.0"/>"#);
        out.leaf("up_axis", "Y_UP");
        out.close("</asset>");

        out.open("<library_materials>");
        for k in 0..self.parts.len() {
            out.open(&format!(r#"<material id="blinn2_{k}" name="blinn2_{k}">"#));
            out.write_line(&format!(r##"<instance_effect url="#blinn2-fx_{k}"/>"##));
            out.close("</material>");
        }
        out.close("</library_materials>");

        out.open("<library_effects>");
        for (k, part) in self.parts.iter().enumerate() {
            out.open(&format!(r#"<effect id="blinn2-fx_{k}">"#));
            out.open("<profile_COMMON>");
            out.open(r#"<technique sid="common">"#);
            out.open("<phong>");
            for (tag, color) in [("ambient", part.ambient), ("diffuse", part.diffuse)] {
                out.open(&format!("<{tag}>"));
                out.leaf("color", join(color.to_array()));
                out.close(&format!("</{tag}>"));
            }
            out.open("<specular>");
            out.leaf("color", "0 0 0 1");
            out.close("</specular>");
            out.close("</phong>");
            out.close("</technique>");
            out.close("</profile_COMMON>");
            out.close("</effect>");
        }
        out.close("</library_effects>");

        out.open("<library_geometries>");
        for (k, part) in self.parts.iter().enumerate() {
            let mesh = &part.mesh;
            out.open(&format!(
                r#"<geometry id="base2_M1KShape{k}" name="base2_M1KShape{k}">"#
            ));
            out.open("<mesh>");
            out.open(&format!(r#"<source id="geo{k}.positions">"#));
            out.leaf(
                &format!(
                    r#"float_array id="geo{k}.positions-array" count="{}""#,
                    mesh.vertex_count() * 3
                ),
                join(mesh.vertices.iter().flat_map(|v| [v.x, v.y, v.z])),
            );
            out.open("<technique_common>");
            out.open(&format!(
                r##"<accessor count="{}" source="#geo{k}.positions-array" stride="3">"##,
                mesh.vertex_count()
            ));
            for axis in ["X", "Y", "Z"] {
                out.write_line(&format!(r#"<param name="{axis}" type="float"/>"#));
            }
            out.close("</accessor>");
            out.close("</technique_common>");
            out.close("</source>");
            out.open(&format!(r#"<vertices id="geo{k}.vertices">"#));
            out.write_line(&format!(
                r##"<input semantic="POSITION" source="#geo{k}.positions"/>"##
            ));
            out.close("</vertices>");
            out.open(&format!(
                r#"<triangles count="{}" material="lambert2SG">"#,
                mesh.triangle_count()
            ));
            out.write_line(&format!(
                r##"<input offset="0" semantic="VERTEX" source="#geo{k}.vertices"/>"##
            ));
            out.leaf("p", join(mesh.indices.iter()));
            out.close("</triangles>");
            out.close("</mesh>");
            out.close("</geometry>");
        }
        out.close("</library_geometries>");

        let name = esc(&self.link);
        out.open("<library_visual_scenes>");
        out.open(r#"<visual_scene id="VisualSceneNode" name="base1d_med">"#);
        out.open(&format!(r#"<node id="{name}" name="{name}" type="NODE">"#));
        for k in 0..self.parts.len() {
            out.open(&format!(r##"<instance_geometry url="#base2_M1KShape{k}">"##));
            out.open("<bind_material>");
            out.open("<technique_common>");
            out.write_line(&format!(
                r##"<instance_material symbol="lambert2SG" target="#blinn2_{k}"/>"##
            ));
            out.close("</technique_common>");
            out.close("</bind_material>");
            out.close("</instance_geometry>");
        }
        out.close("</node>");
        out.close("</visual_scene>");
        out.close("</library_visual_scenes>");
        out.open("<scene>");
        out.write_line(r##"<instance_visual_scene url="#VisualSceneNode"/>"##);
        out.close("</scene>");
        out.close("</COLLADA>");
        out.finish()
    }
}

/// Merged link meshes keyed by link name.
#[derive(Debug, Clone, Default)]
pub struct ArtifactStore {
    artifacts: BTreeMap<String, MeshArtifact>,
}

impl ArtifactStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an artifact, returning the one it replaces.
    pub fn insert(&mut self, artifact: MeshArtifact) -> Option<MeshArtifact> {
        self.artifacts.insert(artifact.link.clone(), artifact)
    }

    /// Artifact of a link.
    #[must_use]
    pub fn get(&self, link: &str) -> Option<&MeshArtifact> {
        self.artifacts.get(link)
    }

    /// Remove and return the artifact of a link.
    pub fn remove(&mut self, link: &str) -> Option<MeshArtifact> {
        self.artifacts.remove(link)
    }

    /// Number of stored artifacts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// Iterate artifacts in link name order.
    pub fn iter(&self) -> impl Iterator<Item = &MeshArtifact> {
        self.artifacts.values()
    }

    /// Drop every artifact.
    pub fn clear(&mut self) {
        self.artifacts.clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::document::{Document, ElementKind};
    use crate::mesh::extract_geometry;
    use crate::tessellate::tessellate_box;
    use hashbrown::HashMap;
    use nalgebra::Vector3;

    fn artifact() -> MeshArtifact {
        MeshArtifact {
            link: "base".into(),
            parts: vec![
                ArtifactPart {
                    mesh: tessellate_box(&Vector3::new(1.0, 1.0, 1.0)),
                    ambient: Color::new(0.05, 0.0001, 0.0001, 1.0),
                    diffuse: Color::new(0.1, 0.2, 0.3, 1.0),
                },
                ArtifactPart {
                    mesh: tessellate_box(&Vector3::new(0.5, 0.5, 0.5)),
                    ambient: Color::new(0.5, 0.5, 0.5, 1.0),
                    diffuse: Color::new(0.9, 0.9, 0.9, 1.0),
                },
            ],
        }
    }

    #[test]
    fn test_collada_artifact_reads_back() {
        let art = artifact();
        let doc = Document::parse(&art.to_collada()).unwrap();
        let geometries: Vec<_> = doc.elements_of(ElementKind::Geometry).collect();
        assert_eq!(geometries.len(), 2);
        assert_eq!(doc.attr(geometries[1], "id"), Some("base2_M1KShape1"));

        let mut materials = HashMap::new();
        materials.insert("lambert2SG".to_string(), doc.by_id("blinn2_0").unwrap());
        let parts = extract_geometry(&doc, geometries[0], &materials);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].diffuse, Color::new(0.1, 0.2, 0.3, 1.0));
        match &parts[0].geometry {
            crate::types::Geometry::Mesh(m) => assert_eq!(m.triangle_count(), 12),
            other => panic!("expected mesh, got {other:?}"),
        }
        assert!(doc.by_id("base").is_some());
    }

    #[test]
    fn test_store_keyed_by_link() {
        let mut store = ArtifactStore::new();
        assert!(store.insert(artifact()).is_none());
        assert!(store.insert(artifact()).is_some());
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("base").unwrap().vertex_count(), 16);
        assert!(store.remove("base").is_some());
        assert!(store.is_empty());
    }
}
