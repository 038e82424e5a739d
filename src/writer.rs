//! Link/joint tree to COLLADA 1.5 scene conversion.
//!
//! The writer is the inverse of the tree builder. It emits one visual scene
//! whose node hierarchy mirrors the link tree, one kinematics model with
//! nested `link`/`attachment_full` elements, two articulated systems
//! (`robot0_kinematics` wrapped by `robot0_motion`), one kinematics scene
//! and one physics scene.
//!
//! ## Binding chain
//!
//! Every kinematics reference made from the `<scene>` goes through the
//! forwarding tables of the articulated systems:
//!
//! | Element | Symbol | Resolves to |
//! |---------|--------|-------------|
//! | `instance_kinematics_scene` bind | `kscene_kmodel0_inst` | `robot0_motion/robot0_motion_kmodel0_inst` |
//! | motion `newparam` | `robot0_motion_kmodel0_inst` | `robot0_kinematics/kmodel0_inst` |
//! | kinematics `newparam` | `kmodel0_inst_<joint>_axis0` | `kmodel0/<joint>/axis0` |
//!
//! Output is deterministic: links are numbered parent-first, joints in name
//! order, and identifiers are sanitized with [`compute_id`] and made unique.

use hashbrown::{HashMap, HashSet};
use nalgebra::Vector3;
use tracing::{debug, warn};

use crate::config::WriterConfig;
use crate::emit::{Emitter, esc, join, vec3};
use crate::error::Result;
use crate::import::MeshImporter;
use crate::pose::Pose;
use crate::types::{
    Color, DEFAULT_AMBIENT, DEFAULT_DIFFUSE, Geometry, Joint, JointType, Link, RobotModel,
    TriangleMesh,
};
use crate::validation::validate;

/// Tessellation factor for primitives written as meshes.
const WRITE_TESSELLATION: f64 = 1.0;

/// Squared sine of half the rotation angle below which a rotation is written
/// as identity.
const IDENTITY_ROTATION_EPS: f64 = 1e-10;

/// Map characters that are illegal in COLLADA ids (`/`, space, `.`) to `_`.
#[must_use]
pub fn compute_id(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | ' ' | '.' => '_',
            c => c,
        })
        .collect()
}

/// Write `model` as a COLLADA 1.5 document.
///
/// `Geometry::MeshFile` visuals are loaded through `importer`. A missing
/// importer or a failed import drops that link's geometry with a warning.
///
/// # Errors
///
/// Returns a validation error if `model` is not a single tree.
pub fn write_collada(
    model: &RobotModel,
    config: &WriterConfig,
    importer: Option<&dyn MeshImporter>,
) -> Result<String> {
    let writer = SceneWriter::new(model, config, importer)?;
    Ok(writer.write())
}

/// Collision-free identifiers derived from names.
#[derive(Debug, Default)]
struct IdAllocator {
    taken: HashSet<String>,
}

impl IdAllocator {
    fn reserve(&mut self, id: &str) {
        self.taken.insert(id.to_owned());
    }

    fn allocate(&mut self, name: &str) -> String {
        let base = compute_id(name);
        let mut id = base.clone();
        let mut n = 1;
        while self.taken.contains(&id) {
            id = format!("{base}_{n}");
            n += 1;
        }
        self.taken.insert(id.clone());
        id
    }
}

/// A link's mesh as written to `library_geometries`.
struct LinkGeometry {
    id: String,
    mesh: TriangleMesh,
    ambient: Color,
    diffuse: Color,
}

/// Per-link data fixed before emission.
struct LinkEntry<'a> {
    link: &'a Link,
    index: usize,
    sid: String,
    world: Pose,
    geometry: Option<LinkGeometry>,
}

/// Tree traversal step for nested output.
enum Step<'a> {
    Enter(&'a str, Option<&'a Joint>),
    Exit(Option<&'a Joint>),
}

struct SceneWriter<'a> {
    model: &'a RobotModel,
    config: &'a WriterConfig,
    root: String,
    /// Links in parent-first order.
    links: Vec<LinkEntry<'a>>,
    link_by_name: HashMap<&'a str, usize>,
    /// Joints in name order with their sids.
    joints: Vec<(&'a Joint, String)>,
    joint_sid: HashMap<&'a str, String>,
    out: Emitter,
}

impl<'a> SceneWriter<'a> {
    fn new(
        model: &'a RobotModel,
        config: &'a WriterConfig,
        importer: Option<&dyn MeshImporter>,
    ) -> Result<Self> {
        let tree = validate(model)?;

        let mut ids = IdAllocator::default();
        let joints: Vec<(&Joint, String)> = model
            .joints
            .values()
            .enumerate()
            .map(|(i, j)| (j, format!("jointsid{i}")))
            .collect();
        for (_, sid) in &joints {
            ids.reserve(sid);
        }
        let joint_sid = joints
            .iter()
            .map(|(j, sid)| (j.name.as_str(), sid.clone()))
            .collect();

        let mut links: Vec<LinkEntry<'a>> = Vec::with_capacity(tree.sorted_links.len());
        let mut link_by_name: HashMap<&'a str, usize> = HashMap::new();
        for name in &tree.sorted_links {
            let Some((key, link)) = model.links.get_key_value(name.as_str()) else {
                continue;
            };
            let world = match model.parent_joint(name) {
                Some(joint) => link_by_name
                    .get(joint.parent_link.as_str())
                    .map_or(joint.origin, |&p| links[p].world.mul(&joint.origin)),
                None => Pose::identity(),
            };
            let index = links.len();
            let sid = ids.allocate(name);
            let geometry = link_mesh(link, importer).map(|mesh| LinkGeometry {
                id: format!("g0_{sid}_geom0"),
                mesh,
                ambient: DEFAULT_AMBIENT,
                diffuse: link
                    .visual
                    .as_ref()
                    .and_then(|v| v.material.as_ref())
                    .map_or(DEFAULT_DIFFUSE, |m| m.color),
            });
            link_by_name.insert(key.as_str(), index);
            links.push(LinkEntry {
                link,
                index,
                sid,
                world,
                geometry,
            });
        }

        Ok(Self {
            model,
            config,
            root: tree.root_link,
            links,
            link_by_name,
            joints,
            joint_sid,
            out: Emitter::new(),
        })
    }

    fn write(mut self) -> String {
        self.out
            .write_line(r#"<?xml version="1.0" encoding="utf-8"?>"#);
        self.out.open(
            r#"<COLLADA xmlns="http://www.collada.org/2008/03/COLLADASchema" version="1.5.0">"#,
        );
        self.write_asset();
        self.write_visual_scene();
        self.write_geometries();
        self.write_kinematics_model();
        self.write_articulated_systems();
        self.write_kinematics_scene();
        self.write_physics();
        self.write_scene();
        self.out.close("</COLLADA>");
        debug!(
            "Wrote robot '{}': {} links, {} joints",
            self.model.name,
            self.links.len(),
            self.joints.len()
        );
        self.out.finish()
    }

    fn entry(&self, link: &str) -> Option<&LinkEntry<'a>> {
        self.link_by_name.get(link).map(|&i| &self.links[i])
    }

    /// Links in depth-first order with open and close events.
    fn steps(&self) -> Vec<Step<'a>> {
        let model = self.model;
        let mut steps = Vec::new();
        let Some((root, _)) = model.links.get_key_value(self.root.as_str()) else {
            return steps;
        };
        let mut stack = vec![Step::Enter(root.as_str(), None)];
        while let Some(step) = stack.pop() {
            if let Step::Enter(link, joint) = step {
                stack.push(Step::Exit(joint));
                let children: Vec<&Joint> = model.child_joints(link).collect();
                for child in children.into_iter().rev() {
                    stack.push(Step::Enter(child.child_link.as_str(), Some(child)));
                }
            }
            steps.push(step);
        }
        steps
    }

    fn write_asset(&mut self) {
        let out = &mut self.out;
        out.open("<asset>");
        out.open("<contributor>");
        out.leaf("authoring_tool", esc(&self.config.author));
        out.close("</contributor>");
        out.write_line(r#"<unit name="meter" meter="1.0"/>"#);
        out.leaf("up_axis", "Z_UP");
        out.close("</asset>");
    }

    fn write_visual_scene(&mut self) {
        let name = esc(&self.model.name).into_owned();
        let mut out = std::mem::take(&mut self.out);
        out.open("<library_visual_scenes>");
        out.open(&format!(r#"<visual_scene id="vscene" name="{name}_visual_scene">"#));
        out.open(&format!(r#"<node id="visual0" name="{name}">"#));
        for step in self.steps() {
            match step {
                Step::Enter(link, joint) => {
                    let Some(entry) = self.entry(link) else {
                        continue;
                    };
                    let i = entry.index;
                    out.open(&format!(
                        r#"<node id="v0_node{i}" sid="node{i}" name="{}">"#,
                        esc(link)
                    ));
                    if let Some(joint) = joint {
                        write_pose(&mut out, &joint.origin);
                        let sid = &self.joint_sid[joint.name.as_str()];
                        let axis = vec3(&joint.axis);
                        if joint.joint_type == JointType::Prismatic {
                            out.leaf(&format!(r#"translate sid="node_{sid}_axis0""#), "0 0 0");
                        } else {
                            out.leaf(&format!(r#"rotate sid="node_{sid}_axis0""#), format!("{axis} 0"));
                        }
                    }
                    if let Some(geometry) = &entry.geometry {
                        write_instance_geometry(&mut out, &geometry.id);
                    }
                }
                Step::Exit(_) => out.close("</node>"),
            }
        }
        out.close("</node>");
        out.close("</visual_scene>");
        out.close("</library_visual_scenes>");
        self.out = out;
    }

    fn write_geometries(&mut self) {
        let out = &mut self.out;
        let geometries: Vec<&LinkGeometry> =
            self.links.iter().filter_map(|l| l.geometry.as_ref()).collect();

        out.open("<library_geometries>");
        for g in &geometries {
            let id = &g.id;
            let mesh = &g.mesh;
            out.open(&format!(r#"<geometry id="{id}">"#));
            out.open("<mesh>");
            out.open(&format!(r#"<source id="{id}_positions">"#));
            out.leaf(
                &format!(
                    r#"float_array id="{id}_positions-array" count="{}""#,
                    mesh.vertex_count() * 3
                ),
                join(mesh.vertices.iter().flat_map(|v| [v.x, v.y, v.z])),
            );
            out.open("<technique_common>");
            out.open(&format!(
                r##"<accessor count="{}" source="#{id}_positions-array" stride="3">"##,
                mesh.vertex_count()
            ));
            for axis in ["X", "Y", "Z"] {
                out.write_line(&format!(r#"<param name="{axis}" type="float"/>"#));
            }
            out.close("</accessor>");
            out.close("</technique_common>");
            out.close("</source>");
            out.open(&format!(r#"<vertices id="{id}_vertices">"#));
            out.write_line(&format!(
                r##"<input semantic="POSITION" source="#{id}_positions"/>"##
            ));
            out.close("</vertices>");
            out.open(&format!(
                r#"<triangles count="{}" material="mat0">"#,
                mesh.triangle_count()
            ));
            out.write_line(&format!(
                r##"<input offset="0" semantic="VERTEX" source="#{id}_vertices"/>"##
            ));
            out.leaf("p", join(mesh.indices.iter()));
            out.close("</triangles>");
            out.close("</mesh>");
            out.close("</geometry>");
        }
        out.close("</library_geometries>");

        out.open("<library_effects>");
        for g in &geometries {
            out.open(&format!(r#"<effect id="{}_eff">"#, g.id));
            out.open("<profile_COMMON>");
            out.open(r#"<technique sid="common">"#);
            out.open("<phong>");
            for (tag, color) in [("ambient", g.ambient), ("diffuse", g.diffuse)] {
                out.open(&format!("<{tag}>"));
                out.leaf("color", join(color.to_array()));
                out.close(&format!("</{tag}>"));
            }
            out.close("</phong>");
            out.close("</technique>");
            out.close("</profile_COMMON>");
            out.close("</effect>");
        }
        out.close("</library_effects>");

        out.open("<library_materials>");
        for g in &geometries {
            out.open(&format!(r#"<material id="{0}_mat">"#, g.id));
            out.write_line(&format!(r##"<instance_effect url="#{}_eff"/>"##, g.id));
            out.close("</material>");
        }
        out.close("</library_materials>");
    }

    fn write_kinematics_model(&mut self) {
        let mut out = std::mem::take(&mut self.out);
        out.open("<library_kinematics_models>");
        out.open(&format!(
            r#"<kinematics_model id="kmodel0" name="{}">"#,
            esc(&self.model.name)
        ));
        out.open("<technique_common>");

        for (joint, sid) in &self.joints {
            let (kind, limits) = match joint.joint_type {
                JointType::Revolute => (
                    "revolute",
                    Some((joint.limits.lower.to_degrees(), joint.limits.upper.to_degrees())),
                ),
                JointType::Fixed => ("revolute", Some((0.0, 0.0))),
                JointType::Continuous => ("revolute", None),
                JointType::Prismatic => ("prismatic", Some((joint.limits.lower, joint.limits.upper))),
            };
            out.open(&format!(
                r#"<joint name="{}" sid="{sid}">"#,
                esc(&joint.name)
            ));
            out.open(&format!(r#"<{kind} sid="axis0">"#));
            out.leaf("axis", vec3(&joint.axis));
            if let Some((lower, upper)) = limits {
                out.open("<limits>");
                out.leaf("min", lower);
                out.leaf("max", upper);
                out.close("</limits>");
            }
            out.close(&format!("</{kind}>"));
            out.close("</joint>");
        }

        for step in self.steps() {
            match step {
                Step::Enter(link, joint) => {
                    let Some(entry) = self.entry(link) else {
                        continue;
                    };
                    if let Some(joint) = joint {
                        let sid = &self.joint_sid[joint.name.as_str()];
                        out.open(&format!(r#"<attachment_full joint="kmodel0/{sid}">"#));
                        write_pose(&mut out, &joint.origin);
                    }
                    out.open(&format!(
                        r#"<link sid="{}" name="{}">"#,
                        entry.sid,
                        esc(link)
                    ));
                }
                Step::Exit(joint) => {
                    out.close("</link>");
                    if joint.is_some() {
                        out.close("</attachment_full>");
                    }
                }
            }
        }

        for (joint, sid) in &self.joints {
            let Some(mimic) = &joint.mimic else {
                continue;
            };
            let Some(source) = self.joint_sid.get(mimic.joint.as_str()) else {
                warn!(
                    "joint {} mimics unknown joint {}, formula skipped",
                    joint.name, mimic.joint
                );
                continue;
            };
            let expression = format!(
                "<apply><plus/><apply><times/><cn>{}</cn><csymbol encoding=\"COLLADA\">kmodel0/{source}</csymbol></apply><cn>{}</cn></apply>",
                mimic.multiplier, mimic.offset
            );
            let math = r#"math xmlns="http://www.w3.org/1998/Math/MathML""#;
            out.open(&format!(
                r#"<formula sid="{}_formula">"#,
                compute_id(&joint.name)
            ));
            out.open("<target>");
            out.leaf("param", format!("kmodel0/{sid}"));
            out.close("</target>");
            out.open("<technique_common>");
            out.leaf(math, &expression);
            out.close("</technique_common>");
            out.open(r#"<technique profile="OpenRAVE">"#);
            out.open(&format!(
                r#"<equation type="position" target="kmodel0/{sid}">"#
            ));
            out.leaf(math, &expression);
            out.close("</equation>");
            out.open(&format!(
                r#"<equation type="first_partial" target="kmodel0/{source}">"#
            ));
            out.leaf(math, format!("<cn>{}</cn>", mimic.multiplier));
            out.close("</equation>");
            out.open(&format!(
                r#"<equation type="second_partial" target="kmodel0/{source}">"#
            ));
            out.leaf(math, "<cn>0</cn>");
            out.close("</equation>");
            out.close("</technique>");
            out.close("</formula>");
        }

        out.close("</technique_common>");
        out.close("</kinematics_model>");
        out.close("</library_kinematics_models>");
        self.out = out;
    }

    fn write_articulated_systems(&mut self) {
        let name = esc(&self.model.name).into_owned();
        let out = &mut self.out;
        out.open("<library_articulated_systems>");

        out.open(&format!(
            r#"<articulated_system id="robot0_kinematics" name="{name}">"#
        ));
        out.open("<kinematics>");
        out.open(r##"<instance_kinematics_model url="#kmodel0" sid="kmodel0_inst">"##);
        for (_, sid) in &self.joints {
            out.open(&format!(r#"<newparam sid="kmodel0_inst_{sid}_axis0">"#));
            out.leaf("SIDREF", format!("kmodel0/{sid}/axis0"));
            out.close("</newparam>");
        }
        out.close("</instance_kinematics_model>");
        out.open("<technique_common>");
        for (i, (joint, sid)) in self.joints.iter().enumerate() {
            let limits = &joint.limits;
            let active = joint.mimic.is_none() && limits.lower != limits.upper;
            out.open(&format!(
                r#"<axis_info sid="axis_info_inst{i}" axis="kmodel0/{sid}/axis0">"#
            ));
            out.open("<active>");
            out.leaf("bool", active);
            out.close("</active>");
            out.open("<locked>");
            out.leaf("bool", false);
            out.close("</locked>");
            let range = match joint.joint_type {
                JointType::Revolute => Some((limits.lower.to_degrees(), limits.upper.to_degrees())),
                JointType::Fixed => Some((0.0, 0.0)),
                JointType::Continuous => None,
                JointType::Prismatic => Some((limits.lower, limits.upper)),
            };
            if let Some((lower, upper)) = range {
                out.open("<limits>");
                for (tag, value) in [("min", lower), ("max", upper)] {
                    out.open(&format!("<{tag}>"));
                    out.leaf("float", value);
                    out.close(&format!("</{tag}>"));
                }
                out.close("</limits>");
            }
            out.close("</axis_info>");
        }
        out.close("</technique_common>");
        out.close("</kinematics>");
        out.close("</articulated_system>");

        out.open(&format!(
            r#"<articulated_system id="robot0_motion" name="{name}">"#
        ));
        out.open("<motion>");
        out.open(r##"<instance_articulated_system url="#robot0_kinematics">"##);
        out.open(r#"<newparam sid="robot0_motion_kmodel0_inst">"#);
        out.leaf("SIDREF", "robot0_kinematics/kmodel0_inst");
        out.close("</newparam>");
        for (_, sid) in &self.joints {
            out.open(&format!(
                r#"<newparam sid="robot0_motion_kmodel0_inst_{sid}_axis0">"#
            ));
            out.leaf("SIDREF", format!("robot0_kinematics/kmodel0_inst_{sid}_axis0"));
            out.close("</newparam>");
        }
        out.close("</instance_articulated_system>");
        out.open("<technique_common>");
        for (i, (joint, _)) in self.joints.iter().enumerate() {
            out.open(&format!(
                r#"<axis_info axis="robot0_kinematics/axis_info_inst{i}">"#
            ));
            out.open("<speed>");
            out.leaf("float", joint.limits.velocity);
            out.close("</speed>");
            out.open("<acceleration>");
            out.leaf("float", joint.limits.effort);
            out.close("</acceleration>");
            out.close("</axis_info>");
        }
        out.close("</technique_common>");
        out.close("</motion>");
        out.close("</articulated_system>");

        out.close("</library_articulated_systems>");
    }

    fn write_kinematics_scene(&mut self) {
        let name = esc(&self.model.name).into_owned();
        let out = &mut self.out;
        out.open("<library_kinematics_scenes>");
        out.open(r#"<kinematics_scene id="kscene">"#);
        out.open(&format!(
            r##"<instance_articulated_system sid="robot0_motion_inst" url="#robot0_motion" name="{name}">"##
        ));
        out.open(r#"<bind symbol="kscene_kmodel0_inst">"#);
        out.write_line(r#"<param ref="robot0_motion/robot0_motion_kmodel0_inst"/>"#);
        out.close("</bind>");
        for (_, sid) in &self.joints {
            out.open(&format!(r#"<bind symbol="kscene_kmodel0_inst_{sid}_axis0">"#));
            out.write_line(&format!(
                r#"<param ref="robot0_motion/robot0_motion_kmodel0_inst_{sid}_axis0"/>"#
            ));
            out.close("</bind>");
        }
        out.close("</instance_articulated_system>");
        out.close("</kinematics_scene>");
        out.close("</library_kinematics_scenes>");
    }

    fn write_physics(&mut self) {
        let name = esc(&self.model.name).into_owned();
        let mut out = std::mem::take(&mut self.out);
        let bodies: Vec<&LinkEntry<'a>> = self
            .links
            .iter()
            .filter(|l| l.link.inertial.is_some())
            .collect();

        out.open("<library_physics_models>");
        out.open(&format!(r#"<physics_model id="pmodel0" name="{name}">"#));
        for entry in &bodies {
            let Some(inertial) = &entry.link.inertial else {
                continue;
            };
            let principal = inertial.inertia.principal_axes();
            let frame = entry
                .world
                .mul(&inertial.origin)
                .mul(&Pose::new(Vector3::zeros(), principal.rotation()));
            out.open(&format!(
                r#"<rigid_body sid="rigid{}" name="{}">"#,
                entry.index,
                esc(&entry.link.name)
            ));
            out.open("<technique_common>");
            out.leaf("dynamic", true);
            out.leaf("mass", inertial.mass);
            out.open("<mass_frame>");
            write_pose(&mut out, &frame);
            out.close("</mass_frame>");
            out.leaf("inertia", vec3(&principal.moments));
            out.close("</technique_common>");
            out.close("</rigid_body>");
        }
        out.close("</physics_model>");
        out.close("</library_physics_models>");

        out.open("<library_physics_scenes>");
        out.open(r#"<physics_scene id="pscene">"#);
        out.open(r##"<instance_physics_model url="#pmodel0" sid="pmodel0_inst" parent="#visual0">"##);
        for entry in &bodies {
            out.write_line(&format!(
                r##"<instance_rigid_body body="rigid{0}" target="#v0_node{0}"/>"##,
                entry.index
            ));
        }
        out.close("</instance_physics_model>");
        out.open("<technique_common>");
        out.leaf("gravity", vec3(&self.config.gravity));
        out.close("</technique_common>");
        out.close("</physics_scene>");
        out.close("</library_physics_scenes>");
        self.out = out;
    }

    fn write_scene(&mut self) {
        let out = &mut self.out;
        out.open("<scene>");
        out.write_line(r##"<instance_physics_scene url="#pscene"/>"##);
        out.write_line(r##"<instance_visual_scene url="#vscene"/>"##);
        out.open(r##"<instance_kinematics_scene url="#kscene" sid="kscene_inst">"##);
        out.open(r#"<bind_kinematics_model node="visual0/node0">"#);
        out.leaf("param", "kscene_kmodel0_inst");
        out.close("</bind_kinematics_model>");
        for (joint, sid) in &self.joints {
            let Some(&child) = self.link_by_name.get(joint.child_link.as_str()) else {
                continue;
            };
            out.open(&format!(
                r#"<bind_joint_axis target="v0_node{child}/node_{sid}_axis0">"#
            ));
            out.open("<axis>");
            out.leaf("param", format!("kscene_kmodel0_inst_{sid}_axis0"));
            out.close("</axis>");
            out.open("<value>");
            out.leaf("float", 0);
            out.close("</value>");
            out.close("</bind_joint_axis>");
        }
        out.close("</instance_kinematics_scene>");
        out.close("</scene>");
    }
}

/// A link's visual as one triangle mesh in the link frame.
fn link_mesh(link: &Link, importer: Option<&dyn MeshImporter>) -> Option<TriangleMesh> {
    let visual = link.visual.as_ref()?;
    let mut mesh = TriangleMesh::new();
    match &visual.geometry {
        Geometry::MeshFile { uri, scale } => {
            let Some(importer) = importer else {
                warn!("no importer for {uri}, skipping geometry of link {}", link.name);
                return None;
            };
            match importer.import(uri, *scale) {
                Ok(groups) => {
                    for group in &groups {
                        mesh.append(group, &visual.origin);
                    }
                }
                Err(e) => {
                    warn!("skipping geometry of link {}: {e}", link.name);
                    return None;
                }
            }
        }
        geometry => {
            let tessellated = geometry.collision_mesh(WRITE_TESSELLATION)?;
            mesh.append(&tessellated, &visual.origin);
        }
    }
    (!mesh.is_empty()).then_some(mesh)
}

fn write_instance_geometry(out: &mut Emitter, id: &str) {
    out.open(&format!(r##"<instance_geometry url="#{id}">"##));
    out.open("<bind_material>");
    out.open("<technique_common>");
    out.write_line(&format!(
        r##"<instance_material symbol="mat0" target="#{id}_mat"/>"##
    ));
    out.close("</technique_common>");
    out.close("</bind_material>");
    out.close("</instance_geometry>");
}

/// Write `pose` as `translate` followed by `rotate` (axis, degrees).
fn write_pose(out: &mut Emitter, pose: &Pose) {
    out.leaf("translate", vec3(&pose.position));
    out.leaf("rotate", rotate_text(pose));
}

fn rotate_text(pose: &Pose) -> String {
    let q = pose.rotation.quaternion();
    let (w, v) = if q.w < 0.0 {
        (-q.w, -q.imag())
    } else {
        (q.w, q.imag())
    };
    let sin_sq = 1.0 - w * w;
    if sin_sq < IDENTITY_ROTATION_EPS {
        return "1 0 0 0".to_owned();
    }
    let axis = v / sin_sq.sqrt();
    let angle = 2.0 * w.min(1.0).acos();
    format!("{} {}", vec3(&axis), angle.to_degrees())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::document::{Document, ElementKind};
    use crate::error::ColladaError;
    use crate::pose::Transform;
    use crate::transforms::full_pose;
    use crate::types::{Material, Visual};
    use approx::assert_relative_eq;

    fn arm() -> RobotModel {
        let mut model = RobotModel::new("arm");
        model.add_link(Link::new("base").with_visual(Visual {
            geometry: Geometry::Box {
                half_extents: Vector3::new(0.1, 0.2, 0.3),
            },
            origin: Pose::from_translation(Vector3::new(0.0, 0.0, 0.5)),
            material: Some(Material::link_default()),
        }));
        model.add_link(Link::new("upper.arm"));
        let mut joint = Joint::new("shoulder", JointType::Revolute, "base", "upper.arm");
        joint.limits.lower = -1.0;
        joint.limits.upper = 1.0;
        joint.origin = Pose::from_axis_angle(Vector3::z(), 0.3);
        model.add_joint(joint);
        model
    }

    #[test]
    fn test_compute_id() {
        assert_eq!(compute_id("base link/part.1"), "base_link_part_1");
        assert_eq!(compute_id("plain"), "plain");
    }

    #[test]
    fn test_id_allocator_avoids_collisions() {
        let mut ids = IdAllocator::default();
        ids.reserve("jointsid0");
        assert_eq!(ids.allocate("a.b"), "a_b");
        assert_eq!(ids.allocate("a/b"), "a_b_1");
        assert_eq!(ids.allocate("jointsid0"), "jointsid0_1");
    }

    #[test]
    fn test_pose_round_trips_through_transforms() {
        let pose = Pose::new(
            Vector3::new(0.1, -0.2, 0.3),
            crate::pose::quat_from_axis_angle(Vector3::new(1.0, 1.0, 0.0), 2.0),
        );
        let mut out = Emitter::new();
        out.open("<node id=\"n\">");
        write_pose(&mut out, &pose);
        out.close("</node>");
        let doc = Document::parse(&out.finish()).unwrap();
        let read = full_pose(&doc, doc.by_id("n").unwrap());
        assert_relative_eq!(read.position, pose.position, epsilon = 1e-12);
        assert_relative_eq!(read.rotation.angle_to(&pose.rotation), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_identity_rotation_text() {
        assert_eq!(rotate_text(&Pose::identity()), "1 0 0 0");
        let flipped = Pose::new(
            Vector3::zeros(),
            nalgebra::UnitQuaternion::new_unchecked(nalgebra::Quaternion::new(-1.0, 0.0, 0.0, 0.0)),
        );
        assert_eq!(rotate_text(&flipped), "1 0 0 0");
    }

    #[test]
    fn test_document_structure() {
        let xml = write_collada(&arm(), &WriterConfig::default(), None).unwrap();
        let doc = Document::parse(&xml).unwrap();

        for id in [
            "vscene",
            "visual0",
            "v0_node0",
            "v0_node1",
            "kmodel0",
            "robot0_kinematics",
            "robot0_motion",
            "kscene",
            "pmodel0",
            "pscene",
            "g0_base_geom0",
            "g0_base_geom0_eff",
            "g0_base_geom0_mat",
        ] {
            assert!(doc.by_id(id).is_some(), "missing {id}");
        }
        // The dotted link name is sanitized for its sid but kept as its name.
        let link = doc
            .elements_of(ElementKind::Link)
            .find(|&l| doc.name_of(l) == Some("upper.arm"))
            .unwrap();
        assert_eq!(doc.sid_of(link), Some("upper_arm"));
        // No inertial, no rigid bodies.
        assert_eq!(doc.elements_of(ElementKind::RigidBody).count(), 0);
    }

    #[test]
    fn test_geometry_is_baked_into_link_frame() {
        let xml = write_collada(&arm(), &WriterConfig::default(), None).unwrap();
        let doc = Document::parse(&xml).unwrap();
        let floats = doc
            .elements_of(ElementKind::FloatArray)
            .next()
            .map(|f| doc.floats(f).unwrap())
            .unwrap();
        let max_z = floats.chunks(3).map(|v| v[2]).fold(f64::MIN, f64::max);
        assert_relative_eq!(max_z, 0.8, epsilon = 1e-12);
    }

    #[test]
    fn test_mesh_file_uses_importer() {
        let mut model = arm();
        model.links.get_mut("base").unwrap().visual.as_mut().unwrap().geometry =
            Geometry::MeshFile {
                uri: "package://arm/base.stl".into(),
                scale: Vector3::repeat(1.0),
            };

        let without = write_collada(&model, &WriterConfig::default(), None).unwrap();
        assert!(!without.contains("g0_base_geom0"));

        let importer = |_: &str, _: Vector3<f64>| -> Result<Vec<TriangleMesh>> {
            Ok(vec![TriangleMesh::from_buffers(
                vec![Vector3::zeros(), Vector3::x(), Vector3::y()],
                vec![0, 1, 2],
            )])
        };
        let with = write_collada(&model, &WriterConfig::default(), Some(&importer)).unwrap();
        assert!(with.contains(r#"<triangles count="1" material="mat0">"#));

        let failing = |uri: &str, _: Vector3<f64>| -> Result<Vec<TriangleMesh>> {
            Err(ColladaError::Import(uri.to_owned()))
        };
        let skipped = write_collada(&model, &WriterConfig::default(), Some(&failing)).unwrap();
        assert!(!skipped.contains("g0_base_geom0"));
    }

    #[test]
    fn test_rigid_body_mass_frame() {
        let mut model = arm();
        model.links.get_mut("upper.arm").unwrap().inertial = Some(crate::types::Inertial {
            mass: 2.0,
            inertia: crate::types::Inertia::diagonal(1.0, 2.0, 3.0),
            origin: Pose::from_translation(Vector3::new(0.5, 0.0, 0.0)),
        });
        let xml = write_collada(&model, &WriterConfig::default(), None).unwrap();
        let doc = Document::parse(&xml).unwrap();
        let body = doc.elements_of(ElementKind::RigidBody).next().unwrap();
        assert_eq!(doc.sid_of(body), Some("rigid1"));
        let frame = doc.descendant(body, ElementKind::MassFrame).unwrap();
        let pose = full_pose(&doc, frame);
        // Link world pose (0.3 rad about z) applied to the inertial offset.
        let expected = Transform::from_axis_angle(Vector3::z(), 0.3)
            .transform_point(&Vector3::new(0.5, 0.0, 0.0));
        assert_relative_eq!(pose.position, expected, epsilon = 1e-12);
        let irb = doc.elements_of(ElementKind::InstanceRigidBody).next().unwrap();
        assert_eq!(doc.attr(irb, "target"), Some("#v0_node1"));
    }

    #[test]
    fn test_rejects_forest() {
        let mut model = arm();
        model.add_link(Link::new("stray"));
        assert!(matches!(
            write_collada(&model, &WriterConfig::default(), None),
            Err(ColladaError::MultipleRootLinks(_))
        ));
    }
}
