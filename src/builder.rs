//! Kinematic tree reconstruction.
//!
//! The builder walks one kinematics scene instance at a time. Articulated
//! systems are unwrapped through their `motion` layers down to the
//! `kinematics` section, each bound kinematics model is walked link by link,
//! and every `attachment_full` becomes one joint per axis constraint. Links
//! and attachments are processed from an explicit worklist in depth-first
//! order, so joint numbering matches a recursive walk without using the call
//! stack.
//!
//! Per-element failures are logged and skipped. Only a missing scene, the
//! absence of any extractable model, or a broken tree abort the conversion.

use std::f64::consts::PI;

use hashbrown::HashMap;
use nalgebra::Vector3;
use smallvec::SmallVec;
use tracing::{debug, info, warn};

use crate::artifacts::{ArtifactPart, ArtifactStore, MeshArtifact};
use crate::bindings::{SceneBindings, is_axis_constraint};
use crate::config::ConversionConfig;
use crate::document::{Document, ElementId, ElementKind};
use crate::error::{ColladaError, Result};
use crate::mesh::{bound_materials, extract_geometry};
use crate::mimic::{formula_math, parse_mimic_formula};
use crate::pose::{Pose, Transform};
use crate::resolver::Resolver;
use crate::transforms::{full_pose, full_transform, parent_transform};
use crate::types::{
    Collision, Color, Geometry, GeometryPart, Inertia, Inertial, Joint, JointType, Link, Material,
    Mimic, RobotModel, TriangleMesh, Visual,
};
use crate::validation::validate;

/// Ambient colors are darkened by this factor in mesh artifacts.
const ARTIFACT_AMBIENT_GAIN: f64 = 0.5;

/// Substitute for exactly-zero color channels in mesh artifacts.
const ARTIFACT_ZERO_CHANNEL: f64 = 0.0001;

/// Convert a parsed document into a link/joint tree.
///
/// Mesh artifacts are committed to `store` only when the conversion succeeds.
///
/// # Errors
///
/// Returns [`ColladaError::MalformedDocument`] if the document has no
/// `<scene>` or no kinematics scene yields a model, and a validation error if
/// the extracted links and joints do not form a single tree.
pub fn convert_document(
    doc: &Document,
    config: &ConversionConfig,
    store: &mut ArtifactStore,
) -> Result<RobotModel> {
    let (model, artifacts) = TreeBuilder::new(doc, config).build()?;
    for artifact in artifacts {
        store.insert(artifact);
    }
    Ok(model)
}

/// Parse COLLADA text and convert it.
///
/// # Errors
///
/// Returns an XML error for unparsable input, otherwise as
/// [`convert_document`].
pub fn convert_str(
    xml: &str,
    config: &ConversionConfig,
    store: &mut ArtifactStore,
) -> Result<RobotModel> {
    let doc = Document::parse(xml)?;
    convert_document(&doc, config, store)
}

/// State of one extraction attempt.
struct Extraction {
    model: RobotModel,
    bindings: SceneBindings,
    /// Joint definitions to the name of their first extracted joint.
    joint_names: HashMap<ElementId, String>,
    artifacts: Vec<MeshArtifact>,
    root_origin: Pose,
    visual_root_origin: Transform,
}

impl Extraction {
    fn new(bindings: SceneBindings) -> Self {
        Self {
            model: RobotModel::new(String::new()),
            bindings,
            joint_names: HashMap::new(),
            artifacts: Vec::new(),
            root_origin: Pose::identity(),
            visual_root_origin: Transform::identity(),
        }
    }
}

/// Pending step of the link walk.
enum Work {
    Link {
        name: String,
        link: ElementId,
        node: Option<ElementId>,
        parent_world: Pose,
        parent_link: Pose,
    },
    Attachment {
        parent: String,
        attachment: ElementId,
        parent_world_link: Pose,
    },
}

struct TreeBuilder<'d, 'c> {
    doc: &'d Document,
    resolver: Resolver<'d>,
    config: &'c ConversionConfig,
}

impl<'d, 'c> TreeBuilder<'d, 'c> {
    fn new(doc: &'d Document, config: &'c ConversionConfig) -> Self {
        Self {
            doc,
            resolver: Resolver::new(doc),
            config,
        }
    }

    fn build(&self) -> Result<(RobotModel, Vec<MeshArtifact>)> {
        let doc = self.doc;
        let scene = doc
            .child(doc.root(), ElementKind::Scene)
            .ok_or_else(|| ColladaError::malformed("document has no <scene>"))?;

        let mut deferred = Vec::new();
        for iks in doc.children_of(scene, ElementKind::InstanceKinematicsScene) {
            let Some(kscene) = doc.instantiated(iks) else {
                warn!("{} does not reference a kinematics scene", doc.describe(iks));
                continue;
            };
            let bindings = SceneBindings::extract(&self.resolver, scene, iks);
            debug!(
                "Kinematics scene {}: {} model, {} axis and {} link bindings",
                doc.describe(kscene),
                bindings.models.len(),
                bindings.axes.len(),
                bindings.links.len()
            );
            for ias in doc.children_of(kscene, ElementKind::InstanceArticulatedSystem) {
                let mut ex = Extraction::new(bindings.clone());
                if self.extract_articulated_system(&mut ex, ias) && !ex.model.links.is_empty() {
                    return self.finish(ex);
                }
            }
            for ikm in doc.children_of(kscene, ElementKind::InstanceKinematicsModel) {
                deferred.push((ikm, bindings.clone()));
            }
        }

        for (ikm, bindings) in deferred {
            let mut ex = Extraction::new(bindings);
            if self.extract_kinematics_model(&mut ex, ikm) && !ex.model.links.is_empty() {
                return self.finish(ex);
            }
        }

        Err(ColladaError::malformed(
            "no kinematics scene yields an articulated system or kinematics model",
        ))
    }

    fn finish(&self, mut ex: Extraction) -> Result<(RobotModel, Vec<MeshArtifact>)> {
        let validation = validate(&ex.model)?;
        ex.model.root_link = validation.root_link;
        info!(
            "Extracted robot '{}': {} links, {} joints, root '{}'",
            ex.model.name,
            ex.model.links.len(),
            ex.model.joints.len(),
            ex.model.root_link
        );
        Ok((ex.model, ex.artifacts))
    }

    /// Unwrap `motion` layers until a `kinematics` section is reached.
    fn extract_articulated_system(&self, ex: &mut Extraction, ias: ElementId) -> bool {
        let doc = self.doc;
        let mut systems = Vec::new();
        let mut current = ias;

        let extracted = loop {
            let Some(system) = doc
                .instantiated(current)
                .filter(|&s| doc.kind(s) == ElementKind::ArticulatedSystem)
            else {
                warn!(
                    "{} does not reference an articulated system",
                    doc.describe(current)
                );
                break false;
            };
            if systems.contains(&system) {
                warn!("articulated system {} instantiates itself", doc.describe(system));
                break false;
            }
            systems.push(system);
            self.log_interface_type(system);
            if ex.model.name.is_empty() {
                ex.model.name = first_nonempty([
                    doc.name_of(current),
                    doc.sid_of(current),
                    doc.name_of(system),
                    doc.id_of(system),
                ])
                .unwrap_or_default()
                .to_owned();
            }

            if let Some(motion) = doc.child(system, ElementKind::Motion) {
                let Some(inner) = doc.child(motion, ElementKind::InstanceArticulatedSystem) else {
                    warn!("{} has no instance_articulated_system", doc.describe(motion));
                    break false;
                };
                self.add_motion_axis_info(ex, motion, inner);
                current = inner;
                continue;
            }

            let Some(kinematics) = doc.child(system, ElementKind::Kinematics) else {
                warn!(
                    "articulated system {} has neither kinematics nor motion",
                    doc.describe(system)
                );
                break false;
            };
            let instances: Vec<ElementId> = doc
                .children_of(kinematics, ElementKind::InstanceKinematicsModel)
                .collect();
            if let Some(common) = doc.child(kinematics, ElementKind::TechniqueCommon) {
                for info in doc.children_of(common, ElementKind::AxisInfo) {
                    ex.bindings
                        .add_axis_info(&self.resolver, &instances, info, None);
                }
            }
            let mut any = false;
            for &ikm in &instances {
                any |= self.extract_kinematics_model(ex, ikm);
            }
            break any;
        };

        if extracted {
            for &system in systems.iter().rev() {
                self.extract_actuators(ex, system);
            }
        }
        extracted
    }

    fn add_motion_axis_info(&self, ex: &mut Extraction, motion: ElementId, inner: ElementId) {
        let doc = self.doc;
        let Some(common) = doc.child(motion, ElementKind::TechniqueCommon) else {
            return;
        };
        let inner_system = doc.instantiated(inner);
        for motion_info in doc.children_of(common, ElementKind::AxisInfo) {
            let reference = doc.attr(motion_info, "axis").unwrap_or_default();
            let kinematics_info = inner_system
                .and_then(|s| self.resolver.sidref(reference, s))
                .filter(|&e| doc.kind(e) == ElementKind::AxisInfo);
            let Some(kinematics_info) = kinematics_info else {
                warn!("failed to find kinematics axis_info {reference}");
                continue;
            };
            let Some(kinematics) = doc.ancestor(kinematics_info, ElementKind::Kinematics) else {
                warn!("axis_info {reference} is not inside a kinematics section");
                continue;
            };
            let instances: Vec<ElementId> = doc
                .children_of(kinematics, ElementKind::InstanceKinematicsModel)
                .collect();
            ex.bindings.add_axis_info(
                &self.resolver,
                &instances,
                kinematics_info,
                Some(motion_info),
            );
        }
    }

    fn log_interface_type(&self, system: ElementId) {
        let doc = self.doc;
        for extra in doc.children_of(system, ElementKind::Extra) {
            if doc.attr(extra, "type") != Some("interface_type") {
                continue;
            }
            let interface = openrave_technique(doc, extra).and_then(|t| {
                doc.children(t)
                    .iter()
                    .copied()
                    .find(|&c| doc.get(c).tag == "interface")
            });
            if let Some(interface) = interface {
                debug!("robot interface type: {}", doc.text(interface));
            }
        }
    }

    fn extract_kinematics_model(&self, ex: &mut Extraction, ikm: ElementId) -> bool {
        let doc = self.doc;
        let Some(kmodel) = doc
            .instantiated(ikm)
            .filter(|&m| doc.kind(m) == ElementKind::KinematicsModel)
        else {
            warn!("{} does not reference a kinematics model", doc.describe(ikm));
            return false;
        };
        let Some(node) = ex.bindings.model_node(ikm) else {
            warn!(
                "no visual node bound to kinematics model {}",
                doc.describe(kmodel)
            );
            return false;
        };
        let Some(common) = doc.child(kmodel, ElementKind::TechniqueCommon) else {
            warn!("{} has no technique_common", doc.describe(kmodel));
            return false;
        };
        if ex.model.name.is_empty() {
            ex.model.name = first_nonempty([doc.name_of(ikm), doc.id_of(ikm), doc.id_of(kmodel)])
                .unwrap_or_default()
                .to_owned();
        }

        let roots: Vec<ElementId> = doc.children_of(common, ElementKind::Link).collect();
        for (i, &link) in roots.iter().enumerate() {
            ex.root_origin = full_pose(doc, link);
            let link_name = doc.name_of(link);
            if let Some(binding) = ex
                .bindings
                .models
                .iter()
                .find(|m| link_name.is_some() && doc.name_of(m.node) == link_name)
            {
                ex.visual_root_origin = parent_transform(doc, binding.node);
            }
            let node = (i == 0).then_some(node);
            self.extract_link_tree(ex, link, node);
        }

        self.extract_formulas(ex, common);
        true
    }

    fn extract_link_tree(&self, ex: &mut Extraction, root: ElementId, node: Option<ElementId>) {
        let mut stack = vec![Work::Link {
            name: self.link_name(ex, root, node),
            link: root,
            node,
            parent_world: Pose::identity(),
            parent_link: Pose::identity(),
        }];
        while let Some(work) = stack.pop() {
            match work {
                Work::Link {
                    name,
                    link,
                    node,
                    parent_world,
                    parent_link,
                } => {
                    self.process_link(ex, &name, link, node, &parent_world, &parent_link, &mut stack);
                }
                Work::Attachment {
                    parent,
                    attachment,
                    parent_world_link,
                } => {
                    self.process_attachment(ex, &parent, attachment, &parent_world_link, &mut stack);
                }
            }
        }
    }

    fn link_name(&self, ex: &Extraction, link: ElementId, node: Option<ElementId>) -> String {
        let doc = self.doc;
        first_nonempty([
            doc.name_of(link),
            doc.id_of(link),
            doc.sid_of(link),
            node.and_then(|n| doc.name_of(n)),
            node.and_then(|n| doc.id_of(n)),
        ])
        .map_or_else(|| format!("link{}", ex.model.links.len()), str::to_owned)
    }

    #[allow(clippy::too_many_arguments)]
    fn process_link(
        &self,
        ex: &mut Extraction,
        name: &str,
        link: ElementId,
        node: Option<ElementId>,
        parent_world: &Pose,
        parent_link: &Pose,
        stack: &mut Vec<Work>,
    ) {
        let doc = self.doc;
        if !ex.model.links.contains_key(name) {
            ex.model.add_link(Link::new(name));
        }

        let tlink = full_pose(doc, link);
        let world_link = parent_world.mul(&tlink);

        let inertial = node
            .and_then(|n| ex.bindings.link(n))
            .and_then(|b| self.rigid_body_inertial(ex, b.rigid_body, &world_link));

        let visual_origin = parent_link.mul(&tlink);
        let parts = match node {
            Some(n) => self.node_geometry(ex, n, &world_link.mul(&visual_origin)),
            None => Vec::new(),
        };
        let (merged, artifact_parts) = self.merge_parts(&parts);
        debug!(
            "Link {name}: {} geometry parts, {} vertices",
            parts.len(),
            merged.vertex_count()
        );

        if self.config.collect_artifacts && !merged.is_empty() {
            ex.artifacts.push(MeshArtifact {
                link: name.to_owned(),
                parts: artifact_parts,
            });
        }

        if let Some(entry) = ex.model.links.get_mut(name) {
            if inertial.is_some() {
                entry.inertial = inertial;
            }
            if merged.vertex_count() == 0 {
                entry.visual = None;
                entry.collision = None;
            } else {
                entry.collision = Some(Collision {
                    geometry: Geometry::Mesh(merged.clone()),
                    origin: visual_origin,
                });
                entry.visual = Some(Visual {
                    geometry: Geometry::Mesh(merged),
                    origin: visual_origin,
                    material: Some(Material::link_default()),
                });
            }
            entry.parts.extend(parts);
        }

        for &child in doc.children(link) {
            match doc.kind(child) {
                ElementKind::AttachmentStart => warn!("attachment_start is not supported"),
                ElementKind::AttachmentEnd => warn!("attachment_end is not supported"),
                _ => {}
            }
        }
        let attachments: Vec<ElementId> = doc
            .children_of(link, ElementKind::AttachmentFull)
            .collect();
        for &attachment in attachments.iter().rev() {
            stack.push(Work::Attachment {
                parent: name.to_owned(),
                attachment,
                parent_world_link: world_link,
            });
        }
    }

    fn rigid_body_inertial(
        &self,
        ex: &Extraction,
        rigid_body: ElementId,
        world_link: &Pose,
    ) -> Option<Inertial> {
        let doc = self.doc;
        let common = doc.child(rigid_body, ElementKind::TechniqueCommon)?;
        let mut inertial = Inertial::default();
        if let Some(mass) = doc
            .child(common, ElementKind::Mass)
            .and_then(|m| doc.float(m))
        {
            inertial.mass = mass;
        }
        if let Some(values) = doc
            .child(common, ElementKind::Inertia)
            .and_then(|i| doc.floats(i).ok())
        {
            if let &[ixx, iyy, izz, ..] = values.as_slice() {
                inertial.inertia = Inertia::diagonal(ixx, iyy, izz);
            }
        }
        if let Some(frame) = doc.child(common, ElementKind::MassFrame) {
            inertial.origin = ex
                .root_origin
                .inverse()
                .mul(world_link)
                .inverse()
                .mul(&full_pose(doc, frame));
        }
        Some(inertial)
    }

    /// Geometry of `node` and of unclaimed child nodes, re-expressed in
    /// `link_frame`. Children are visited before their parent.
    fn node_geometry(&self, ex: &Extraction, node: ElementId, link_frame: &Pose) -> Vec<GeometryPart> {
        let doc = self.doc;
        let frame = link_frame
            .to_transform()
            .inverse()
            .mul(&ex.visual_root_origin.inverse());

        let mut parts = Vec::new();
        let mut stack = vec![(node, false)];
        while let Some((n, expanded)) = stack.pop() {
            if !expanded {
                stack.push((n, true));
                let children: Vec<ElementId> = doc
                    .children_of(n, ElementKind::Node)
                    .filter(|&c| !ex.bindings.is_axis_node(c))
                    .collect();
                stack.extend(children.into_iter().rev().map(|c| (c, false)));
                continue;
            }

            let tm = frame
                .mul(&parent_transform(doc, n))
                .mul(&full_transform(doc, n));
            let (pose, scale) = tm.decompose();
            for ig in doc.children_of(n, ElementKind::InstanceGeometry) {
                let Some(geometry) = doc
                    .instantiated(ig)
                    .filter(|&g| doc.kind(g) == ElementKind::Geometry)
                else {
                    warn!("{} does not reference a geometry", doc.describe(ig));
                    continue;
                };
                let materials = bound_materials(doc, ig);
                for mut part in extract_geometry(doc, geometry, &materials) {
                    place_part(&mut part, &tm, &pose, &scale);
                    parts.push(part);
                }
            }
        }
        parts
    }

    fn merge_parts(&self, parts: &[GeometryPart]) -> (TriangleMesh, Vec<ArtifactPart>) {
        let tessellation = self.config.effective_tessellation();
        let mut merged = TriangleMesh::new();
        let mut artifact_parts = Vec::new();
        for part in parts {
            let Some(mesh) = part.geometry.collision_mesh(tessellation) else {
                continue;
            };
            merged.append(&mesh, &part.origin);
            if self.config.collect_artifacts {
                let mut placed = TriangleMesh::new();
                placed.append(&mesh, &part.origin);
                artifact_parts.push(ArtifactPart {
                    mesh: placed,
                    ambient: artifact_ambient(part.ambient),
                    diffuse: part.diffuse,
                });
            }
        }
        (merged, artifact_parts)
    }

    fn process_attachment(
        &self,
        ex: &mut Extraction,
        parent: &str,
        attachment: ElementId,
        parent_world_link: &Pose,
        stack: &mut Vec<Work>,
    ) {
        let doc = self.doc;
        let tatt = full_pose(doc, attachment);
        let reference = doc.attr(attachment, "joint").unwrap_or_default();
        let joint_el = self
            .resolver
            .sidref(reference, attachment)
            .and_then(|j| match doc.kind(j) {
                ElementKind::InstanceJoint => doc.instantiated(j),
                _ => Some(j),
            })
            .filter(|&j| doc.kind(j) == ElementKind::Joint);
        let Some(joint_el) = joint_el else {
            warn!("unable to find joint {reference}, skipping attachment");
            return;
        };
        let Some(child) = doc.child(attachment, ElementKind::Link) else {
            warn!("attachment to joint {reference} has no child link");
            return;
        };

        let axes: SmallVec<[ElementId; 4]> = doc
            .children(joint_el)
            .iter()
            .copied()
            .filter(|&c| is_axis_constraint(doc, c))
            .collect();
        let child_node = axes
            .iter()
            .find_map(|&a| ex.bindings.axis(a).and_then(|b| b.visual_node));
        let child_name = self.link_name(ex, child, child_node);
        let tjc = full_pose(doc, child);
        let base_name = doc
            .name_of(joint_el)
            .filter(|n| !n.is_empty())
            .map_or_else(|| format!("dummy{}", ex.model.joints.len()), str::to_owned);

        if axes.is_empty() {
            warn!("joint {base_name} has no axes, attaching {child_name} rigidly");
            let mut joint = Joint::new(&base_name, JointType::Fixed, parent, &child_name);
            joint.origin = tatt.mul(&tjc);
            ex.model.add_joint(joint);
        } else {
            let mut joint_parent = parent.to_owned();
            for (k, &axis) in axes.iter().enumerate() {
                let joint_name = if k == 0 {
                    base_name.clone()
                } else {
                    format!("{base_name}_axis{k}")
                };
                let joint_child = if k + 1 == axes.len() {
                    child_name.clone()
                } else {
                    add_dummy_link(&mut ex.model, parent)
                };
                let mut joint = self.axis_joint(ex, &joint_name, axis, &joint_parent, &joint_child, &tjc);
                if k == 0 {
                    joint.origin = tatt.mul(&tjc);
                }
                debug!(
                    "Joint {joint_name} ({}): {joint_parent} -> {joint_child}",
                    joint.joint_type.as_str()
                );
                ex.model.add_joint(joint);
                joint_parent = joint_child;
            }
        }
        ex.joint_names.insert(joint_el, base_name);

        stack.push(Work::Link {
            name: child_name,
            link: child,
            node: child_node,
            parent_world: parent_world_link.mul(&tatt),
            parent_link: tatt,
        });
    }

    /// One joint for one axis constraint, with overrides applied.
    fn axis_joint(
        &self,
        ex: &Extraction,
        name: &str,
        axis: ElementId,
        parent: &str,
        child: &str,
        child_pose: &Pose,
    ) -> Joint {
        let doc = self.doc;
        let resolver = &self.resolver;
        let binding = ex.bindings.axis(axis);
        let kinematics_info = binding.and_then(|b| b.kinematics_info);
        let motion_info = binding.and_then(|b| b.motion_info);
        let joint_type = if doc.kind(axis) == ElementKind::Revolute {
            JointType::Revolute
        } else {
            JointType::Prismatic
        };
        let rotational = joint_type.is_rotational();

        let mut joint = Joint::new(name, joint_type, parent, child);
        let raw = doc
            .child(axis, ElementKind::Axis)
            .and_then(|a| doc.floats(a).ok())
            .and_then(|v| match v.as_slice() {
                &[x, y, z, ..] => Some(Vector3::new(x, y, z)),
                _ => None,
            })
            .unwrap_or_else(Vector3::z);
        joint.axis = child_pose
            .inverse()
            .rotate_vector(&raw)
            .try_normalize(1e-12)
            .unwrap_or_else(Vector3::z);

        if let Some(info) = kinematics_info {
            if let Some(active) = doc.child(info, ElementKind::Active) {
                if !resolver.resolve_bool(active, info) {
                    info!("joint {name} is passive");
                }
            }
        }

        if let Some(motion) = motion_info {
            if let Some(speed) = doc.child(motion, ElementKind::Speed) {
                joint.limits.velocity = resolver.resolve_float(speed, motion);
            }
            if let Some(acceleration) = doc.child(motion, ElementKind::Acceleration) {
                joint.limits.effort = resolver.resolve_float(acceleration, motion);
            }
        } else {
            warn!("no motion info for joint {name}, using default speed");
        }

        let scale_for = |el: ElementId| {
            if rotational {
                PI / 180.0
            } else {
                doc.unit_scale(el)
            }
        };
        let locked = kinematics_info.is_some_and(|info| {
            doc.child(info, ElementKind::Locked)
                .is_some_and(|l| resolver.resolve_bool(l, info))
        });
        let range = if locked {
            Some((0.0, 0.0))
        } else if let Some((info, limits)) = kinematics_info
            .and_then(|info| doc.child(info, ElementKind::Limits).map(|l| (info, l)))
        {
            let value = |kind| {
                doc.child(limits, kind)
                    .map_or(0.0, |e| resolver.resolve_float(e, info))
            };
            let s = scale_for(info);
            Some((value(ElementKind::Min) * s, value(ElementKind::Max) * s))
        } else if let Some(limits) = doc.child(axis, ElementKind::Limits) {
            let value = |kind| {
                doc.child(limits, kind)
                    .and_then(|e| inline_float(doc, e))
                    .unwrap_or(0.0)
            };
            let s = scale_for(axis);
            Some((value(ElementKind::Min) * s, value(ElementKind::Max) * s))
        } else {
            None
        };

        match range {
            Some((lower, upper)) => {
                joint.limits.lower = lower;
                joint.limits.upper = upper;
                if joint.limits.is_locked() {
                    joint.joint_type = JointType::Fixed;
                }
            }
            None if rotational => {
                joint.joint_type = JointType::Continuous;
                joint.limits.lower = -PI;
                joint.limits.upper = PI;
            }
            None => {
                let span = self.config.prismatic_range_fallback;
                joint.limits.lower = -span;
                joint.limits.upper = span;
            }
        }

        // Locked axes keep the fallback of the axis kind.
        let fallback = if rotational {
            self.config.revolute_velocity_fallback
        } else {
            self.config.prismatic_velocity_fallback
        };
        if joint.limits.velocity == 0.0 {
            joint.limits.velocity = fallback;
        }
        if joint.limits.effort == 0.0 {
            joint.limits.effort = fallback;
        }
        joint
    }

    fn extract_formulas(&self, ex: &mut Extraction, common: ElementId) {
        let doc = self.doc;
        for formula in doc.children_of(common, ElementKind::Formula) {
            let Some(target) = doc.path(formula, &[ElementKind::Target, ElementKind::Param]) else {
                warn!("{} has no target param", doc.describe(formula));
                continue;
            };
            let Some(dependent) = self.joint_from_ref(ex, doc.text(target), formula) else {
                warn!(
                    "formula target {} is not an extracted joint",
                    doc.text(target)
                );
                continue;
            };
            let candidates = formula_math(doc, formula);
            if candidates.is_empty() {
                warn!("formula for {dependent} has no equation");
                continue;
            }
            let mut parsed = None;
            for &math in &candidates {
                match parse_mimic_formula(doc, math) {
                    Ok(f) => {
                        parsed = Some(f);
                        break;
                    }
                    Err(e) => debug!("formula for {dependent}: {e}, trying next equation"),
                }
            }
            let Some(parsed) = parsed else {
                warn!("skipping formula for {dependent}: no supported equation");
                continue;
            };
            let Some(source) = self.joint_from_ref(ex, &parsed.symbol, formula) else {
                warn!(
                    "formula for {dependent} refers to unknown joint {}",
                    parsed.symbol
                );
                continue;
            };
            if let Some(joint) = ex.model.joints.get_mut(&dependent) {
                debug!(
                    "Joint {dependent} mimics {source} ({} * x + {})",
                    parsed.multiplier, parsed.offset
                );
                joint.mimic = Some(Mimic {
                    joint: source,
                    multiplier: parsed.multiplier,
                    offset: parsed.offset,
                });
            }
        }
    }

    /// Name of the extracted joint a SIDREF points to.
    fn joint_from_ref(&self, ex: &Extraction, reference: &str, context: ElementId) -> Option<String> {
        let doc = self.doc;
        let found = self.resolver.sidref(reference, context)?;
        let joint = match doc.kind(found) {
            ElementKind::InstanceJoint => doc.instantiated(found)?,
            _ => found,
        };
        if doc.kind(joint) != ElementKind::Joint {
            return None;
        }
        let name = ex.joint_names.get(&joint)?;
        ex.model.joints.contains_key(name).then(|| name.clone())
    }

    fn extract_actuators(&self, ex: &mut Extraction, system: ElementId) {
        let doc = self.doc;
        for extra in doc.children_of(system, ElementKind::Extra) {
            if doc.attr(extra, "type") != Some("attach_actuator") {
                continue;
            }
            let Some(technique) = openrave_technique(doc, extra) else {
                continue;
            };
            let Some(reference) = doc
                .child(technique, ElementKind::BindActuator)
                .and_then(|b| doc.attr(b, "joint"))
            else {
                warn!("{} has no bind_actuator joint", doc.describe(extra));
                continue;
            };
            let Some(joint_name) = self.joint_from_ref(ex, reference, system) else {
                warn!("actuator bound to unknown joint {reference}");
                continue;
            };
            let torque = doc
                .child(technique, ElementKind::InstanceActuator)
                .and_then(|ia| doc.instantiated(ia))
                .and_then(|actuator| doc.descendant(actuator, ElementKind::NominalTorque))
                .and_then(|t| doc.float(t));
            if let (Some(torque), Some(joint)) = (torque, ex.model.joints.get_mut(&joint_name)) {
                debug!("Joint {joint_name} effort {torque} from actuator");
                joint.limits.effort = torque;
            }
        }
    }
}

/// Apply a node's transform and scale to one decoded part.
fn place_part(part: &mut GeometryPart, tm: &Transform, pose: &Pose, scale: &Vector3<f64>) {
    part.origin = *pose;
    match &mut part.geometry {
        Geometry::Box { half_extents } => *half_extents = half_extents.component_mul(scale),
        Geometry::Sphere { radius } => *radius *= scale.max(),
        Geometry::Cylinder { radius, height } => {
            *radius *= scale.x.max(scale.y);
            *height *= scale.z;
        }
        Geometry::Mesh(mesh) => {
            mesh.transform(tm);
            part.origin = Pose::identity();
        }
        Geometry::MeshFile { scale: s, .. } => *s = s.component_mul(scale),
    }
}

/// First free `<parent>_dummy<k>` link, inserted into `model`.
fn add_dummy_link(model: &mut RobotModel, parent: &str) -> String {
    let name = (0..)
        .map(|k| format!("{parent}_dummy{k}"))
        .find(|n| !model.links.contains_key(n))
        .unwrap_or_else(|| format!("{parent}_dummy"));
    model.add_link(Link::new(&name));
    name
}

/// Scaled ambient color with zero channels raised off zero.
fn artifact_ambient(color: Color) -> Color {
    let channel = |v: f64| {
        let v = v * ARTIFACT_AMBIENT_GAIN;
        if v == 0.0 { ARTIFACT_ZERO_CHANNEL } else { v }
    };
    Color::new(channel(color.r), channel(color.g), channel(color.b), color.a)
}

fn openrave_technique(doc: &Document, parent: ElementId) -> Option<ElementId> {
    doc.children_of(parent, ElementKind::Technique)
        .find(|&t| doc.attr(t, "profile") == Some("OpenRAVE"))
}

/// A limit written as text or as a `float` child.
fn inline_float(doc: &Document, el: ElementId) -> Option<f64> {
    doc.float(el)
        .or_else(|| doc.child(el, ElementKind::Float).and_then(|f| doc.float(f)))
}

fn first_nonempty<'a, const N: usize>(candidates: [Option<&'a str>; N]) -> Option<&'a str> {
    candidates.into_iter().flatten().find(|s| !s.is_empty())
}
