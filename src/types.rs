//! Link/joint tree produced by conversion.
//!
//! These types are the flat, name-keyed robot description consumed by
//! serializers and kinematics solvers. Every link and joint is stored once in
//! a map keyed by its unique name; parent/child relations are by name.

use std::borrow::Cow;
use std::collections::BTreeMap;

use nalgebra::{Matrix3, Vector3};

use crate::pose::{Pose, Transform};
use crate::tessellate::{tessellate_box, tessellate_cylinder, tessellate_sphere};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

// ============================================================================
// Color and material
// ============================================================================

/// Linear RGBA color.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Color {
    /// Red.
    pub r: f64,
    /// Green.
    pub g: f64,
    /// Blue.
    pub b: f64,
    /// Alpha.
    pub a: f64,
}

impl Color {
    /// Create a color from its channels.
    #[must_use]
    pub const fn new(r: f64, g: f64, b: f64, a: f64) -> Self {
        Self { r, g, b, a }
    }

    /// Channels as an array.
    #[must_use]
    pub const fn to_array(&self) -> [f64; 4] {
        [self.r, self.g, self.b, self.a]
    }

    /// Build from the first four values of a slice, if present.
    #[must_use]
    pub fn from_slice(v: &[f64]) -> Option<Self> {
        match v {
            [r, g, b, a, ..] => Some(Self::new(*r, *g, *b, *a)),
            _ => None,
        }
    }
}

/// Default ambient color for geometry without a resolvable material.
pub const DEFAULT_AMBIENT: Color = Color::new(0.1, 0.1, 0.1, 0.0);

/// Default diffuse color for geometry without a resolvable material.
pub const DEFAULT_DIFFUSE: Color = Color::new(1.0, 1.0, 1.0, 0.0);

/// Named visual material.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Material {
    /// Material name.
    pub name: String,
    /// Display color.
    pub color: Color,
}

impl Material {
    /// Material assigned to every newly created link.
    #[must_use]
    pub fn link_default() -> Self {
        Self {
            name: "Red".to_string(),
            color: Color::new(0.0, 1.0, 0.0, 1.0),
        }
    }
}

// ============================================================================
// Geometry
// ============================================================================

/// Position-only triangle buffer.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TriangleMesh {
    /// Vertex positions.
    pub vertices: Vec<Vector3<f64>>,
    /// Flat triangle indices, three per face.
    pub indices: Vec<u32>,
}

impl TriangleMesh {
    /// Create an empty mesh.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create from vertex and index buffers.
    #[must_use]
    pub fn from_buffers(vertices: Vec<Vector3<f64>>, indices: Vec<u32>) -> Self {
        Self { vertices, indices }
    }

    /// Number of vertices.
    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Number of triangles.
    #[must_use]
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Whether the mesh has no vertices.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Iterate triangles as index triples.
    pub fn triangles(&self) -> impl Iterator<Item = [u32; 3]> + '_ {
        self.indices.chunks_exact(3).map(|t| [t[0], t[1], t[2]])
    }

    /// Apply a transform to every vertex.
    pub fn transform(&mut self, t: &Transform) {
        for v in &mut self.vertices {
            *v = t.transform_point(v);
        }
    }

    /// Append another mesh's triangles after applying `pose` to its vertices.
    #[allow(clippy::cast_possible_truncation)]
    pub fn append(&mut self, other: &Self, pose: &Pose) {
        let base = self.vertices.len() as u32;
        self.vertices
            .extend(other.vertices.iter().map(|v| pose.transform_point(v)));
        self.indices.extend(other.indices.iter().map(|i| base + i));
    }
}

/// Geometric shape attached to a link.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Geometry {
    /// Box with half extents (x, y, z) in meters.
    Box {
        /// Half of the box size along each axis.
        half_extents: Vector3<f64>,
    },
    /// Sphere.
    Sphere {
        /// Sphere radius.
        radius: f64,
    },
    /// Cylinder along Z, centered on the origin.
    Cylinder {
        /// Cylinder radius.
        radius: f64,
        /// Full cylinder height.
        height: f64,
    },
    /// Explicit triangle mesh.
    Mesh(TriangleMesh),
    /// Mesh stored in an external file, loaded through a [`MeshImporter`](crate::MeshImporter).
    MeshFile {
        /// File reference.
        uri: String,
        /// Per-axis scale applied on import.
        scale: Vector3<f64>,
    },
}

impl Geometry {
    /// Triangulation of this shape for collision or export.
    ///
    /// Primitives are tessellated on demand; meshes are borrowed. External
    /// mesh files cannot be triangulated without an importer and yield `None`.
    #[must_use]
    pub fn collision_mesh(&self, tessellation: f64) -> Option<Cow<'_, TriangleMesh>> {
        match self {
            Self::Box { half_extents } => Some(Cow::Owned(tessellate_box(half_extents))),
            Self::Sphere { radius } => Some(Cow::Owned(tessellate_sphere(*radius, tessellation))),
            Self::Cylinder { radius, height } => Some(Cow::Owned(tessellate_cylinder(
                *radius,
                *height,
                tessellation,
            ))),
            Self::Mesh(mesh) => Some(Cow::Borrowed(mesh)),
            Self::MeshFile { .. } => None,
        }
    }
}

/// One geometry primitive found on a link, placed relative to the link frame.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GeometryPart {
    /// The shape.
    pub geometry: Geometry,
    /// Placement relative to the link's visual origin.
    pub origin: Pose,
    /// Diffuse color hint.
    pub diffuse: Color,
    /// Ambient color hint.
    pub ambient: Color,
}

/// Visual element of a link.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Visual {
    /// Rendered geometry.
    pub geometry: Geometry,
    /// Geometry frame relative to the link frame.
    pub origin: Pose,
    /// Optional material.
    pub material: Option<Material>,
}

/// Collision element of a link.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Collision {
    /// Collision geometry.
    pub geometry: Geometry,
    /// Geometry frame relative to the link frame.
    pub origin: Pose,
}

// ============================================================================
// Inertial properties
// ============================================================================

/// Symmetric inertia tensor, upper-triangular elements.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Inertia {
    /// Moment of inertia about X axis.
    pub ixx: f64,
    /// Product of inertia XY.
    pub ixy: f64,
    /// Product of inertia XZ.
    pub ixz: f64,
    /// Moment of inertia about Y axis.
    pub iyy: f64,
    /// Product of inertia YZ.
    pub iyz: f64,
    /// Moment of inertia about Z axis.
    pub izz: f64,
}

impl Default for Inertia {
    fn default() -> Self {
        Self::diagonal(0.0, 0.0, 0.0)
    }
}

impl Inertia {
    /// Create a diagonal inertia tensor.
    #[must_use]
    pub fn diagonal(ixx: f64, iyy: f64, izz: f64) -> Self {
        Self {
            ixx,
            ixy: 0.0,
            ixz: 0.0,
            iyy,
            iyz: 0.0,
            izz,
        }
    }

    /// Convert to a 3x3 matrix.
    #[must_use]
    pub fn to_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.ixx, self.ixy, self.ixz, self.ixy, self.iyy, self.iyz, self.ixz, self.iyz,
            self.izz,
        )
    }
}

/// Mass properties of a link.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Inertial {
    /// Mass in kg.
    pub mass: f64,
    /// Inertia about the inertial origin.
    pub inertia: Inertia,
    /// Center of mass frame relative to the link frame.
    pub origin: Pose,
}

impl Default for Inertial {
    fn default() -> Self {
        Self {
            mass: 0.0,
            inertia: Inertia::default(),
            origin: Pose::identity(),
        }
    }
}

// ============================================================================
// Link
// ============================================================================

/// A rigid link.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Link {
    /// Unique link name.
    pub name: String,
    /// Mass properties, when a physics body is bound.
    pub inertial: Option<Inertial>,
    /// Visual, holding the merged mesh of all geometry parts.
    pub visual: Option<Visual>,
    /// Collision, sharing the visual geometry and origin.
    pub collision: Option<Collision>,
    /// Individual geometry primitives found on the link.
    pub parts: Vec<GeometryPart>,
}

impl Link {
    /// Create a link with no mass, geometry or material.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inertial: None,
            visual: None,
            collision: None,
            parts: Vec::new(),
        }
    }

    /// Set the inertial properties.
    #[must_use]
    pub fn with_inertial(mut self, inertial: Inertial) -> Self {
        self.inertial = Some(inertial);
        self
    }

    /// Set the visual element.
    #[must_use]
    pub fn with_visual(mut self, visual: Visual) -> Self {
        self.visual = Some(visual);
        self
    }

    /// Check if this link has no mass.
    #[must_use]
    pub fn is_massless(&self) -> bool {
        self.inertial.is_none_or(|i| i.mass <= 0.0)
    }
}

// ============================================================================
// Joint
// ============================================================================

/// Joint type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum JointType {
    /// Revolute joint with limits.
    Revolute,
    /// Continuous (unlimited revolute) joint.
    Continuous,
    /// Prismatic (sliding) joint.
    Prismatic,
    /// Fixed (welded) joint.
    Fixed,
}

impl JointType {
    /// Whether the joint rotates (limits in radians).
    #[must_use]
    pub fn is_rotational(&self) -> bool {
        matches!(self, Self::Revolute | Self::Continuous)
    }

    /// Lowercase name as used by robot descriptions.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Revolute => "revolute",
            Self::Continuous => "continuous",
            Self::Prismatic => "prismatic",
            Self::Fixed => "fixed",
        }
    }
}

/// Joint limits.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct JointLimits {
    /// Lower position limit (rad or m).
    pub lower: f64,
    /// Upper position limit (rad or m).
    pub upper: f64,
    /// Maximum velocity (rad/s or m/s).
    pub velocity: f64,
    /// Maximum effort (N·m or N).
    pub effort: f64,
}

impl Default for JointLimits {
    fn default() -> Self {
        Self {
            lower: 0.0,
            upper: 0.0,
            velocity: 0.0,
            effort: 0.0,
        }
    }
}

impl JointLimits {
    /// Whether the range collapses to a single position.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.lower == 0.0 && self.upper == 0.0
    }
}

/// Affine dependency of one joint on another: `multiplier * joint + offset`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Mimic {
    /// Name of the driving joint.
    pub joint: String,
    /// Multiplier.
    pub multiplier: f64,
    /// Offset.
    pub offset: f64,
}

/// A single-DOF joint between two links.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Joint {
    /// Unique joint name.
    pub name: String,
    /// Joint type.
    pub joint_type: JointType,
    /// Parent link name.
    pub parent_link: String,
    /// Child link name.
    pub child_link: String,
    /// Joint axis in the joint frame (unit vector).
    pub axis: Vector3<f64>,
    /// Limits.
    pub limits: JointLimits,
    /// Joint frame relative to the parent link frame.
    pub origin: Pose,
    /// Optional mimic dependency.
    pub mimic: Option<Mimic>,
}

impl Joint {
    /// Create a joint with identity origin, Z axis and zero limits.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        joint_type: JointType,
        parent_link: impl Into<String>,
        child_link: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            joint_type,
            parent_link: parent_link.into(),
            child_link: child_link.into(),
            axis: Vector3::z(),
            limits: JointLimits::default(),
            origin: Pose::identity(),
            mimic: None,
        }
    }
}

// ============================================================================
// Robot
// ============================================================================

/// A complete link/joint tree.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RobotModel {
    /// Model name.
    pub name: String,
    /// Links keyed by name.
    pub links: BTreeMap<String, Link>,
    /// Joints keyed by name.
    pub joints: BTreeMap<String, Joint>,
    /// The unique link that is no joint's child.
    pub root_link: String,
}

impl RobotModel {
    /// Create an empty model.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            links: BTreeMap::new(),
            joints: BTreeMap::new(),
            root_link: String::new(),
        }
    }

    /// Insert a link, replacing any link of the same name.
    pub fn add_link(&mut self, link: Link) {
        self.links.insert(link.name.clone(), link);
    }

    /// Insert a joint, replacing any joint of the same name.
    pub fn add_joint(&mut self, joint: Joint) {
        self.joints.insert(joint.name.clone(), joint);
    }

    /// Get a link by name.
    #[must_use]
    pub fn link(&self, name: &str) -> Option<&Link> {
        self.links.get(name)
    }

    /// Get a joint by name.
    #[must_use]
    pub fn joint(&self, name: &str) -> Option<&Joint> {
        self.joints.get(name)
    }

    /// The joint whose child is `link`, if any.
    #[must_use]
    pub fn parent_joint(&self, link: &str) -> Option<&Joint> {
        self.joints.values().find(|j| j.child_link == link)
    }

    /// Joints whose parent is `link`, in name order.
    pub fn child_joints<'a>(&'a self, link: &'a str) -> impl Iterator<Item = &'a Joint> + 'a {
        self.joints.values().filter(move |j| j.parent_link == link)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_mesh_append_offsets_indices() {
        let tri = TriangleMesh::from_buffers(
            vec![Vector3::zeros(), Vector3::x(), Vector3::y()],
            vec![0, 1, 2],
        );
        let mut merged = TriangleMesh::new();
        merged.append(&tri, &Pose::identity());
        merged.append(&tri, &Pose::from_translation(Vector3::new(0.0, 0.0, 1.0)));
        assert_eq!(merged.vertex_count(), 6);
        assert_eq!(merged.indices, vec![0, 1, 2, 3, 4, 5]);
        assert_relative_eq!(merged.vertices[5], Vector3::new(0.0, 1.0, 1.0));
    }

    #[test]
    fn test_collision_mesh_lazy() {
        let b = Geometry::Box {
            half_extents: Vector3::new(1.0, 2.0, 3.0),
        };
        let mesh = b.collision_mesh(1.0).unwrap();
        assert_eq!(mesh.vertex_count(), 8);
        assert_eq!(mesh.triangle_count(), 12);

        let file = Geometry::MeshFile {
            uri: "package://arm/base.stl".into(),
            scale: Vector3::repeat(1.0),
        };
        assert!(file.collision_mesh(1.0).is_none());
    }

    #[test]
    fn test_inertia_matrix_symmetric() {
        let i = Inertia {
            ixx: 1.0,
            ixy: 0.1,
            ixz: 0.2,
            iyy: 2.0,
            iyz: 0.3,
            izz: 3.0,
        };
        let m = i.to_matrix();
        assert_relative_eq!(m, m.transpose());
    }

    #[test]
    fn test_robot_lookup() {
        let mut robot = RobotModel::new("arm");
        robot.add_link(Link::new("base"));
        robot.add_link(Link::new("tip"));
        robot.add_joint(Joint::new("j", JointType::Revolute, "base", "tip"));
        assert_eq!(robot.parent_joint("tip").unwrap().name, "j");
        assert!(robot.parent_joint("base").is_none());
        assert_eq!(robot.child_joints("base").count(), 1);
        assert!(robot.link("tip").unwrap().is_massless());
    }
}
