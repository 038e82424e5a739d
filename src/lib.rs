//! COLLADA kinematics scene to link/joint tree conversion.
//!
//! This crate reads [COLLADA](https://www.khronos.org/collada/) 1.5 documents
//! that describe an articulated mechanism (a visual scene, a kinematics
//! scene and optionally a physics scene tied together by scoped bindings)
//! and rebuilds the flat tree of named links and single-DOF joints that
//! robot-description consumers expect. The reverse direction writes such a
//! tree back out as an equivalent COLLADA scene.
//!
//! # Features
//!
//! - SIDREF and bind/newparam resolution across kinematics, articulated
//!   system and kinematics model instances
//! - Multi-axis joints split into chains of single-DOF joints with synthetic
//!   `<parent>_dummy<k>` links
//! - Joint limit, lock and motion overrides from `axis_info` elements
//! - Triangle, fan, strip and polygon-list mesh decoding plus box, sphere and
//!   cylinder tessellation
//! - Mimic joints from restricted linear MathML formulas
//! - Principal-axis decomposition of rigid body inertia
//! - Kinematic tree validation
//!
//! # Layer 0
//!
//! This is a Layer 0 crate with **zero Bevy dependencies**. All traversals
//! use explicit worklists, so document depth does not grow the call stack.
//!
//! # Example
//!
//! ```
//! use sim_collada::{ArtifactStore, ConversionConfig, JointType, convert_str};
//!
//! let collada = r##"
//! <COLLADA>
//!   <library_visual_scenes>
//!     <visual_scene id="vscene">
//!       <node id="base_node">
//!         <node id="arm_node"><rotate sid="rot">0 0 1 0</rotate></node>
//!       </node>
//!     </visual_scene>
//!   </library_visual_scenes>
//!   <library_kinematics_models>
//!     <kinematics_model id="arm">
//!       <technique_common>
//!         <joint sid="j" name="shoulder">
//!           <revolute sid="ax"><axis>0 0 1</axis></revolute>
//!         </joint>
//!         <link sid="base" name="base">
//!           <attachment_full joint="arm/j"><link sid="upper" name="upper"/></attachment_full>
//!         </link>
//!       </technique_common>
//!     </kinematics_model>
//!   </library_kinematics_models>
//!   <library_kinematics_scenes>
//!     <kinematics_scene id="kscene">
//!       <instance_kinematics_model url="#arm" sid="arm_inst"/>
//!     </kinematics_scene>
//!   </library_kinematics_scenes>
//!   <scene>
//!     <instance_visual_scene url="#vscene"/>
//!     <instance_kinematics_scene url="#kscene">
//!       <bind_kinematics_model node="base_node"><SIDREF>kscene/arm_inst</SIDREF></bind_kinematics_model>
//!       <bind_joint_axis target="arm_node/rot">
//!         <axis><SIDREF>kscene/arm_inst/j/ax</SIDREF></axis>
//!       </bind_joint_axis>
//!     </instance_kinematics_scene>
//!   </scene>
//! </COLLADA>"##;
//!
//! let mut artifacts = ArtifactStore::new();
//! let robot = convert_str(collada, &ConversionConfig::default(), &mut artifacts)
//!     .expect("should convert");
//! assert_eq!(robot.root_link, "base");
//! assert_eq!(robot.joints["shoulder"].joint_type, JointType::Continuous);
//! ```
//!
//! # Limitations
//!
//! - Only the first articulated mechanism that resolves is returned
//! - Mimic formulas must be `a * x + b`, `-x` or `x`
//! - `convex_mesh`, `<polygons>`, `lookat` and `skew` are skipped with a warning
//! - Externally referenced meshes are loaded through a caller-supplied
//!   [`MeshImporter`]; none is bundled

#![doc(html_root_url = "https://docs.rs/sim-collada/0.7.0")]
#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(
    clippy::missing_const_for_fn,
    clippy::module_name_repetitions,
    clippy::similar_names,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::many_single_char_names,
    clippy::float_cmp,
    clippy::cast_possible_truncation,
    clippy::items_after_statements,
    clippy::map_unwrap_or,
    clippy::option_if_let_else,
    clippy::unused_self
)]

mod artifacts;
mod bindings;
mod builder;
mod config;
mod document;
mod emit;
mod error;
mod import;
mod inertia;
mod mesh;
mod mimic;
mod pose;
mod resolver;
mod tessellate;
mod transforms;
mod types;
mod validation;
mod writer;

pub use artifacts::{ArtifactPart, ArtifactStore, MeshArtifact};
pub use bindings::{AxisBinding, LinkBinding, ModelBinding, SceneBindings, is_axis_constraint};
pub use builder::{convert_document, convert_str};
pub use config::{ConversionConfig, MIN_TESSELLATION, WriterConfig};
pub use document::{Document, Element, ElementId, ElementKind};
pub use error::{ColladaError, Result};
pub use import::MeshImporter;
pub use inertia::{PrincipalAxes, eigen_symmetric3};
pub use mesh::{
    MaterialColors, bound_materials, decode_primitive, extract_geometry, material_colors,
    position_source, primitive_shape,
};
pub use mimic::{LinearFormula, formula_math, parse_mimic_formula};
pub use pose::{Pose, Transform, quat_from_axis_angle, quat_from_matrix};
pub use resolver::Resolver;
pub use tessellate::{
    sphere_levels, tessellate_box, tessellate_cylinder, tessellate_sphere, unit_icosphere,
};
pub use transforms::{element_transform, full_pose, full_transform, parent_transform};
pub use types::{
    Collision, Color, DEFAULT_AMBIENT, DEFAULT_DIFFUSE, Geometry, GeometryPart, Inertia, Inertial,
    Joint, JointLimits, JointType, Link, Material, Mimic, RobotModel, TriangleMesh, Visual,
};
pub use validation::{ValidationResult, validate};
pub use writer::{compute_id, write_collada};
