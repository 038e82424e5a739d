//! Cross-scene bindings of one kinematics scene instance.
//!
//! A COLLADA scene ties three sub-scenes together. Kinematics models are
//! bound to visual nodes, joint axes to the visual transforms they drive, and
//! physics rigid bodies to the nodes of the links they weigh. These bindings
//! are collected once before tree building and then looked up by element
//! identity.

use tracing::warn;

use crate::document::{Document, ElementId, ElementKind};
use crate::resolver::Resolver;

/// A kinematic axis and the visual node whose subtree it moves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AxisBinding {
    /// The `revolute`/`prismatic` axis constraint.
    pub axis: ElementId,
    /// Transform element targeted by `bind_joint_axis`.
    pub target: ElementId,
    /// Nearest node enclosing the target.
    pub visual_node: Option<ElementId>,
    /// Kinematics `axis_info` override.
    pub kinematics_info: Option<ElementId>,
    /// Motion `axis_info` override.
    pub motion_info: Option<ElementId>,
}

/// A kinematics model instance bound to its root visual node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelBinding {
    /// Visual node.
    pub node: ElementId,
    /// `instance_kinematics_model`.
    pub instance: ElementId,
}

/// A rigid body bound to the node of the link it weighs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkBinding {
    /// Visual node.
    pub node: ElementId,
    /// `rigid_body` definition.
    pub rigid_body: ElementId,
    /// `instance_rigid_body`.
    pub instance: ElementId,
}

/// Every binding reachable from one `instance_kinematics_scene`.
#[derive(Debug, Clone, Default)]
pub struct SceneBindings {
    /// Model to visual node bindings.
    pub models: Vec<ModelBinding>,
    /// Axis to visual transform bindings.
    pub axes: Vec<AxisBinding>,
    /// Rigid body to node bindings.
    pub links: Vec<LinkBinding>,
}

impl SceneBindings {
    /// Collect visual and physics bindings for `instance_kinematics_scene`
    /// within `scene`.
    #[must_use]
    pub fn extract(resolver: &Resolver<'_>, scene: ElementId, instance_kinematics_scene: ElementId) -> Self {
        let mut bindings = Self::default();
        bindings.extract_visual(resolver, scene, instance_kinematics_scene);
        bindings.extract_physics(resolver, scene);
        bindings
    }

    fn extract_visual(&mut self, resolver: &Resolver<'_>, scene: ElementId, iks: ElementId) {
        let doc = resolver.document();
        let Some(kscene) = doc.instantiated(iks) else {
            return;
        };
        let Some(visual_scene) = doc
            .child(scene, ElementKind::InstanceVisualScene)
            .and_then(|ivs| doc.instantiated(ivs))
        else {
            warn!("scene has no instance_visual_scene, kinematics bindings skipped");
            return;
        };

        for bind in doc.children_of(iks, ElementKind::BindKinematicsModel) {
            let Some(reference) = doc.attr(bind, "node") else {
                warn!("do not support kinematics models without references to nodes");
                continue;
            };
            let node = resolver
                .sidref(reference, visual_scene)
                .filter(|&n| doc.kind(n) == ElementKind::Node);
            let Some(node) = node else {
                warn!("bind_kinematics_model does not reference valid node {reference}");
                continue;
            };
            match resolver.sidref_or_param(bind, kscene) {
                Some(instance) if doc.kind(instance) == ElementKind::InstanceKinematicsModel => {
                    self.models.push(ModelBinding { node, instance });
                }
                Some(other) => warn!(
                    "bind_kinematics_model cannot find reference to {}",
                    doc.get(other).tag
                ),
                None => warn!("bind_kinematics_model does not reference element"),
            }
        }

        for bind in doc.children_of(iks, ElementKind::BindJointAxis) {
            let reference = doc.attr(bind, "target").unwrap_or_default();
            let Some(target) = resolver.sidref(reference, visual_scene) else {
                warn!("target node {reference} not found");
                continue;
            };
            let axis = doc
                .child(bind, ElementKind::Axis)
                .and_then(|a| resolver.sidref_or_param(a, kscene))
                .filter(|&a| is_axis_constraint(doc, a));
            let Some(axis) = axis else {
                warn!("bind_joint_axis {reference} does not resolve to an axis");
                continue;
            };
            let visual_node = doc.ancestor(target, ElementKind::Node);
            if visual_node.is_none() {
                warn!("couldn't find parent node of {}", doc.describe(axis));
            }
            self.axes.push(AxisBinding {
                axis,
                target,
                visual_node,
                kinematics_info: None,
                motion_info: None,
            });
        }
    }

    fn extract_physics(&mut self, resolver: &Resolver<'_>, scene: ElementId) {
        let doc = resolver.document();
        for ips in doc.children_of(scene, ElementKind::InstancePhysicsScene) {
            let Some(pscene) = doc.instantiated(ips) else {
                warn!("{} does not reference a physics scene", doc.describe(ips));
                continue;
            };
            for ipm in doc.children_of(pscene, ElementKind::InstancePhysicsModel) {
                let Some(pmodel) = doc.instantiated(ipm) else {
                    continue;
                };
                for irb in doc.children_of(ipm, ElementKind::InstanceRigidBody) {
                    let node = doc
                        .attr(irb, "target")
                        .and_then(|t| doc.resolve_url(t))
                        .filter(|&n| doc.kind(n) == ElementKind::Node);
                    let rigid_body = doc
                        .attr(irb, "body")
                        .and_then(|b| resolver.sidref(b, pmodel))
                        .filter(|&b| doc.kind(b) == ElementKind::RigidBody);
                    if let (Some(node), Some(rigid_body)) = (node, rigid_body) {
                        self.links.push(LinkBinding {
                            node,
                            rigid_body,
                            instance: irb,
                        });
                    }
                }
            }
        }
    }

    /// Attach an `axis_info` override to the axis it names.
    ///
    /// The `axis` attribute is resolved against each kinematics model
    /// instantiated by `instances`. Returns whether a binding was updated.
    pub fn add_axis_info(
        &mut self,
        resolver: &Resolver<'_>,
        instances: &[ElementId],
        kinematics_info: ElementId,
        motion_info: Option<ElementId>,
    ) -> bool {
        let doc = resolver.document();
        let reference = doc.attr(kinematics_info, "axis").unwrap_or_default();
        for &ikm in instances {
            let Some(axis) = doc
                .instantiated(ikm)
                .and_then(|model| resolver.sidref(reference, model))
            else {
                continue;
            };
            let Some(binding) = self.axes.iter_mut().find(|b| b.axis == axis) else {
                warn!(
                    "could not find binding for axis: {reference}, {}",
                    doc.sid_of(axis).unwrap_or_default()
                );
                return false;
            };
            binding.kinematics_info = Some(kinematics_info);
            if motion_info.is_some() {
                binding.motion_info = motion_info;
            }
            return true;
        }
        warn!("could not find kinematics axis target: {reference}");
        false
    }

    /// Visual node bound to a kinematics model instance.
    #[must_use]
    pub fn model_node(&self, instance: ElementId) -> Option<ElementId> {
        self.models
            .iter()
            .find(|m| m.instance == instance)
            .map(|m| m.node)
    }

    /// Binding of an axis constraint.
    #[must_use]
    pub fn axis(&self, axis: ElementId) -> Option<&AxisBinding> {
        self.axes.iter().find(|b| b.axis == axis)
    }

    /// Rigid body bound to a node.
    #[must_use]
    pub fn link(&self, node: ElementId) -> Option<&LinkBinding> {
        self.links.iter().find(|l| l.node == node)
    }

    /// Whether `node` is the visual node of some joint axis.
    #[must_use]
    pub fn is_axis_node(&self, node: ElementId) -> bool {
        self.axes.iter().any(|b| b.visual_node == Some(node))
    }
}

/// Whether an element is a single-DOF axis constraint.
#[must_use]
pub fn is_axis_constraint(doc: &Document, id: ElementId) -> bool {
    matches!(doc.kind(id), ElementKind::Revolute | ElementKind::Prismatic)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const DOC: &str = r##"<COLLADA>
        <library_visual_scenes>
            <visual_scene id="vs">
                <node id="vbase" sid="base">
                    <node id="varm" sid="arm">
                        <rotate sid="j0_axis">0 0 1 0</rotate>
                    </node>
                </node>
            </visual_scene>
        </library_visual_scenes>
        <library_kinematics_models>
            <kinematics_model id="km">
                <technique_common>
                    <joint sid="j0"><revolute sid="axis0"><axis>0 0 1</axis></revolute></joint>
                    <link sid="l0"/>
                </technique_common>
            </kinematics_model>
        </library_kinematics_models>
        <library_physics_models>
            <physics_model id="pm">
                <rigid_body sid="rb0"><technique_common><mass>2</mass></technique_common></rigid_body>
            </physics_model>
        </library_physics_models>
        <library_physics_scenes>
            <physics_scene id="ps">
                <instance_physics_model url="#pm">
                    <instance_rigid_body body="rb0" target="#vbase"/>
                    <instance_rigid_body body="missing" target="#varm"/>
                </instance_physics_model>
            </physics_scene>
        </library_physics_scenes>
        <library_kinematics_scenes>
            <kinematics_scene id="ks">
                <instance_kinematics_model url="#km" sid="kmi">
                    <newparam sid="kmi_ref"><SIDREF>ks/kmi</SIDREF></newparam>
                    <newparam sid="axis_ref"><SIDREF>km/j0/axis0</SIDREF></newparam>
                </instance_kinematics_model>
            </kinematics_scene>
        </library_kinematics_scenes>
        <scene>
            <instance_physics_scene url="#ps"/>
            <instance_visual_scene url="#vs"/>
            <instance_kinematics_scene url="#ks">
                <bind_kinematics_model node="vbase"><param>kmi_ref</param></bind_kinematics_model>
                <bind_joint_axis target="vbase/arm/j0_axis">
                    <axis><param>axis_ref</param></axis>
                </bind_joint_axis>
                <bind_joint_axis target="vbase/nowhere"><axis><param>axis_ref</param></axis></bind_joint_axis>
            </instance_kinematics_scene>
        </scene>
    </COLLADA>"##;

    fn extract(doc: &Document) -> SceneBindings {
        let resolver = Resolver::new(doc);
        let scene = doc.elements_of(ElementKind::Scene).next().unwrap();
        let iks = doc.child(scene, ElementKind::InstanceKinematicsScene).unwrap();
        SceneBindings::extract(&resolver, scene, iks)
    }

    #[test]
    fn test_visual_bindings() {
        let doc = Document::parse(DOC).unwrap();
        let bindings = extract(&doc);
        assert_eq!(bindings.models.len(), 1);
        assert_eq!(bindings.models[0].node, doc.by_id("vbase").unwrap());
        let ikm = doc.elements_of(ElementKind::InstanceKinematicsModel).next().unwrap();
        assert_eq!(bindings.model_node(ikm), doc.by_id("vbase"));

        assert_eq!(bindings.axes.len(), 1);
        let axis = doc.elements_of(ElementKind::Revolute).next().unwrap();
        let binding = bindings.axis(axis).unwrap();
        assert_eq!(binding.visual_node, doc.by_id("varm"));
        assert!(bindings.is_axis_node(doc.by_id("varm").unwrap()));
        assert!(!bindings.is_axis_node(doc.by_id("vbase").unwrap()));
    }

    #[test]
    fn test_physics_bindings_skip_unresolved_bodies() {
        let doc = Document::parse(DOC).unwrap();
        let bindings = extract(&doc);
        assert_eq!(bindings.links.len(), 1);
        let lb = bindings.link(doc.by_id("vbase").unwrap()).unwrap();
        assert_eq!(doc.kind(lb.rigid_body), ElementKind::RigidBody);
        assert!(bindings.link(doc.by_id("varm").unwrap()).is_none());
    }

    #[test]
    fn test_add_axis_info() {
        let xml = DOC.replace(
            "<link sid=\"l0\"/>",
            "<link sid=\"l0\"/></technique_common></kinematics_model>\
             <articulated_system id=\"as\"><kinematics><technique_common>\
             <axis_info sid=\"ai0\" axis=\"km/j0/axis0\"/>\
             <axis_info sid=\"ai1\" axis=\"km/j9/axis0\"/>\
             </technique_common></kinematics></articulated_system>\
             <kinematics_model id=\"unused\"><technique_common>",
        );
        let doc = Document::parse(&xml).unwrap();
        let resolver = Resolver::new(&doc);
        let mut bindings = extract(&doc);
        let ikms: Vec<_> = doc.elements_of(ElementKind::InstanceKinematicsModel).collect();
        let infos: Vec<_> = doc.elements_of(ElementKind::AxisInfo).collect();

        assert!(bindings.add_axis_info(&resolver, &ikms, infos[0], None));
        assert_eq!(bindings.axes[0].kinematics_info, Some(infos[0]));
        assert!(!bindings.add_axis_info(&resolver, &ikms, infos[1], None));
    }
}
