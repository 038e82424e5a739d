//! COLLADA element arena.
//!
//! The XML text is parsed once into a flat arena of [`Element`]s addressed by
//! [`ElementId`]. Each element's [`ElementKind`] is decided at parse time, so
//! later passes dispatch with a `match` instead of comparing tag names. The
//! arena is immutable after parsing; all traversals are read-only.

use std::fmt;
use std::io::BufRead;

use hashbrown::HashMap;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::error::{ColladaError, Result};

/// Index of an element in a [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(usize);

impl ElementId {
    /// Position in the arena; parents always precede their children.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Element kinds the converter dispatches on.
///
/// Tag names are matched on their local part, so `math:apply` and `apply`
/// map to the same kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ElementKind {
    Collada,
    Asset,
    Unit,
    Contributor,
    Scene,
    Extra,
    Technique,
    TechniqueCommon,

    // Visual scene
    VisualScene,
    InstanceVisualScene,
    Node,
    Translate,
    Rotate,
    Scale,
    Matrix,
    Lookat,
    Skew,

    // Geometry
    Geometry,
    InstanceGeometry,
    BindMaterial,
    InstanceMaterial,
    Mesh,
    ConvexMesh,
    Source,
    FloatArray,
    Vertices,
    Input,
    Triangles,
    Trifans,
    Tristrips,
    Polylist,
    Polygons,
    P,
    Vcount,
    Box,
    Sphere,
    Cylinder,
    HalfExtents,
    Radius,
    Height,

    // Materials
    Material,
    InstanceEffect,
    Effect,
    Phong,
    Ambient,
    Diffuse,
    Color,

    // Kinematics
    KinematicsScene,
    InstanceKinematicsScene,
    ArticulatedSystem,
    InstanceArticulatedSystem,
    Kinematics,
    Motion,
    AxisInfo,
    Active,
    Locked,
    Limits,
    Min,
    Max,
    Speed,
    Acceleration,
    KinematicsModel,
    InstanceKinematicsModel,
    Joint,
    InstanceJoint,
    Revolute,
    Prismatic,
    Axis,
    Link,
    AttachmentFull,
    AttachmentStart,
    AttachmentEnd,
    Formula,
    Target,
    BindKinematicsModel,
    BindJointAxis,
    Value,

    // Parameters
    Bind,
    Newparam,
    Setparam,
    Param,
    Sidref,
    Float,
    Bool,

    // Physics
    PhysicsScene,
    InstancePhysicsScene,
    PhysicsModel,
    InstancePhysicsModel,
    RigidBody,
    InstanceRigidBody,
    Dynamic,
    Mass,
    MassFrame,
    Inertia,
    Gravity,

    // Actuators
    Actuator,
    InstanceActuator,
    BindActuator,
    NominalTorque,

    // MathML
    Math,
    Apply,
    Plus,
    Minus,
    Times,
    Cn,
    Csymbol,
    Equation,

    Other,
}

impl ElementKind {
    /// Map a local tag name to its kind.
    #[must_use]
    pub fn from_tag(local_name: &str) -> Self {
        match local_name {
            "COLLADA" => Self::Collada,
            "asset" => Self::Asset,
            "unit" => Self::Unit,
            "contributor" => Self::Contributor,
            "scene" => Self::Scene,
            "extra" => Self::Extra,
            "technique" => Self::Technique,
            "technique_common" => Self::TechniqueCommon,
            "visual_scene" => Self::VisualScene,
            "instance_visual_scene" => Self::InstanceVisualScene,
            "node" => Self::Node,
            "translate" => Self::Translate,
            "rotate" => Self::Rotate,
            "scale" => Self::Scale,
            "matrix" => Self::Matrix,
            "lookat" => Self::Lookat,
            "skew" => Self::Skew,
            "geometry" => Self::Geometry,
            "instance_geometry" => Self::InstanceGeometry,
            "bind_material" => Self::BindMaterial,
            "instance_material" => Self::InstanceMaterial,
            "mesh" => Self::Mesh,
            "convex_mesh" => Self::ConvexMesh,
            "source" => Self::Source,
            "float_array" => Self::FloatArray,
            "vertices" => Self::Vertices,
            "input" => Self::Input,
            "triangles" => Self::Triangles,
            "trifans" => Self::Trifans,
            "tristrips" => Self::Tristrips,
            "polylist" => Self::Polylist,
            "polygons" => Self::Polygons,
            "p" => Self::P,
            "vcount" => Self::Vcount,
            "box" => Self::Box,
            "sphere" => Self::Sphere,
            "cylinder" => Self::Cylinder,
            "half_extents" => Self::HalfExtents,
            "radius" => Self::Radius,
            "height" => Self::Height,
            "material" => Self::Material,
            "instance_effect" => Self::InstanceEffect,
            "effect" => Self::Effect,
            "phong" => Self::Phong,
            "ambient" => Self::Ambient,
            "diffuse" => Self::Diffuse,
            "color" => Self::Color,
            "kinematics_scene" => Self::KinematicsScene,
            "instance_kinematics_scene" => Self::InstanceKinematicsScene,
            "articulated_system" => Self::ArticulatedSystem,
            "instance_articulated_system" => Self::InstanceArticulatedSystem,
            "kinematics" => Self::Kinematics,
            "motion" => Self::Motion,
            "axis_info" => Self::AxisInfo,
            "active" => Self::Active,
            "locked" => Self::Locked,
            "limits" => Self::Limits,
            "min" => Self::Min,
            "max" => Self::Max,
            "speed" => Self::Speed,
            "acceleration" => Self::Acceleration,
            "kinematics_model" => Self::KinematicsModel,
            "instance_kinematics_model" => Self::InstanceKinematicsModel,
            "joint" => Self::Joint,
            "instance_joint" => Self::InstanceJoint,
            "revolute" => Self::Revolute,
            "prismatic" => Self::Prismatic,
            "axis" => Self::Axis,
            "link" => Self::Link,
            "attachment_full" => Self::AttachmentFull,
            "attachment_start" => Self::AttachmentStart,
            "attachment_end" => Self::AttachmentEnd,
            "formula" => Self::Formula,
            "target" => Self::Target,
            "bind_kinematics_model" => Self::BindKinematicsModel,
            "bind_joint_axis" => Self::BindJointAxis,
            "value" => Self::Value,
            "bind" => Self::Bind,
            "newparam" => Self::Newparam,
            "setparam" => Self::Setparam,
            "param" => Self::Param,
            "SIDREF" => Self::Sidref,
            "float" => Self::Float,
            "bool" => Self::Bool,
            "physics_scene" => Self::PhysicsScene,
            "instance_physics_scene" => Self::InstancePhysicsScene,
            "physics_model" => Self::PhysicsModel,
            "instance_physics_model" => Self::InstancePhysicsModel,
            "rigid_body" => Self::RigidBody,
            "instance_rigid_body" => Self::InstanceRigidBody,
            "dynamic" => Self::Dynamic,
            "mass" => Self::Mass,
            "mass_frame" => Self::MassFrame,
            "inertia" => Self::Inertia,
            "gravity" => Self::Gravity,
            "actuator" => Self::Actuator,
            "instance_actuator" => Self::InstanceActuator,
            "bind_actuator" => Self::BindActuator,
            "nominal_torque" => Self::NominalTorque,
            "math" => Self::Math,
            "apply" => Self::Apply,
            "plus" => Self::Plus,
            "minus" => Self::Minus,
            "times" => Self::Times,
            "cn" => Self::Cn,
            "csymbol" => Self::Csymbol,
            "equation" => Self::Equation,
            _ => Self::Other,
        }
    }

    /// Whether this kind is one of the node transform operations.
    #[must_use]
    pub fn is_transform(self) -> bool {
        matches!(
            self,
            Self::Translate | Self::Rotate | Self::Scale | Self::Matrix | Self::Lookat | Self::Skew
        )
    }
}

/// One parsed XML element.
#[derive(Debug, Clone)]
pub struct Element {
    /// Kind decided at parse time.
    pub kind: ElementKind,
    /// Local tag name.
    pub tag: String,
    /// Attributes in document order.
    pub attributes: Vec<(String, String)>,
    /// Concatenated text content.
    pub text: String,
    /// Parent element.
    pub parent: Option<ElementId>,
    /// Child elements in document order.
    pub children: Vec<ElementId>,
    /// Meters per document unit in effect for this element.
    pub unit: f64,
}

impl Element {
    /// Get an attribute value.
    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// A parsed COLLADA document.
#[derive(Debug, Clone)]
pub struct Document {
    elements: Vec<Element>,
    ids: HashMap<String, ElementId>,
}

impl Document {
    /// Parse COLLADA XML text.
    ///
    /// # Errors
    ///
    /// Returns [`ColladaError::XmlParse`] if the XML is malformed and
    /// [`ColladaError::MalformedDocument`] if it has no root element.
    pub fn parse(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);
        let mut doc = Self {
            elements: Vec::new(),
            ids: HashMap::new(),
        };
        doc.read_elements(&mut reader)?;
        if doc.elements.is_empty() {
            return Err(ColladaError::malformed("document has no root element"));
        }
        doc.assign_units();
        Ok(doc)
    }

    fn read_elements<R: BufRead>(&mut self, reader: &mut Reader<R>) -> Result<()> {
        let mut buf = Vec::new();
        let mut open: Vec<ElementId> = Vec::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(ref e)) => {
                    let id = self.push_element(e, open.last().copied())?;
                    open.push(id);
                }
                Ok(Event::Empty(ref e)) => {
                    self.push_element(e, open.last().copied())?;
                }
                Ok(Event::End(_)) => {
                    open.pop();
                }
                Ok(Event::Text(ref t)) => {
                    if let Some(&current) = open.last() {
                        let text = t
                            .unescape()
                            .map_err(|e| ColladaError::XmlParse(e.to_string()))?;
                        self.elements[current.0].text.push_str(&text);
                    }
                }
                Ok(Event::CData(ref t)) => {
                    if let Some(&current) = open.last() {
                        let text = String::from_utf8_lossy(t);
                        self.elements[current.0].text.push_str(&text);
                    }
                }
                Ok(Event::Eof) => {
                    if let Some(&current) = open.last() {
                        return Err(ColladaError::XmlParse(format!(
                            "unexpected EOF in <{}>",
                            self.elements[current.0].tag
                        )));
                    }
                    break;
                }
                Ok(_) => {}
                Err(e) => return Err(ColladaError::XmlParse(e.to_string())),
            }
            buf.clear();
        }
        Ok(())
    }

    fn push_element(&mut self, start: &BytesStart, parent: Option<ElementId>) -> Result<ElementId> {
        let tag = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| ColladaError::XmlParse(e.to_string()))?;
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|e| ColladaError::XmlParse(e.to_string()))?
                .into_owned();
            attributes.push((key, value));
        }

        let id = ElementId(self.elements.len());
        if let Some((_, v)) = attributes.iter().find(|(k, _)| k == "id") {
            self.ids.entry(v.clone()).or_insert(id);
        }
        self.elements.push(Element {
            kind: ElementKind::from_tag(&tag),
            tag,
            attributes,
            text: String::new(),
            parent,
            children: Vec::new(),
            unit: 1.0,
        });
        if let Some(p) = parent {
            self.elements[p.0].children.push(id);
        }
        Ok(id)
    }

    /// Propagate `asset/unit@meter` down each subtree.
    fn assign_units(&mut self) {
        for i in 0..self.elements.len() {
            let inherited = self.elements[i]
                .parent
                .map_or(1.0, |p| self.elements[p.0].unit);
            let own = self
                .child(ElementId(i), ElementKind::Asset)
                .and_then(|asset| self.child(asset, ElementKind::Unit))
                .and_then(|unit| self.attr(unit, "meter"))
                .and_then(|m| m.trim().parse::<f64>().ok());
            self.elements[i].unit = own.unwrap_or(inherited);
        }
    }

    /// The document root element.
    #[must_use]
    pub fn root(&self) -> ElementId {
        ElementId(0)
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Whether the document is empty (never true for a parsed document).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Borrow an element.
    #[must_use]
    pub fn get(&self, id: ElementId) -> &Element {
        &self.elements[id.0]
    }

    /// Kind of an element.
    #[must_use]
    pub fn kind(&self, id: ElementId) -> ElementKind {
        self.elements[id.0].kind
    }

    /// Get an attribute value.
    #[must_use]
    pub fn attr(&self, id: ElementId, name: &str) -> Option<&str> {
        self.elements[id.0].attr(name)
    }

    /// The `id` attribute.
    #[must_use]
    pub fn id_of(&self, id: ElementId) -> Option<&str> {
        self.attr(id, "id")
    }

    /// The `sid` attribute.
    #[must_use]
    pub fn sid_of(&self, id: ElementId) -> Option<&str> {
        self.attr(id, "sid")
    }

    /// The `name` attribute.
    #[must_use]
    pub fn name_of(&self, id: ElementId) -> Option<&str> {
        self.attr(id, "name")
    }

    /// Trimmed text content.
    #[must_use]
    pub fn text(&self, id: ElementId) -> &str {
        self.elements[id.0].text.trim()
    }

    /// Parent element.
    #[must_use]
    pub fn parent(&self, id: ElementId) -> Option<ElementId> {
        self.elements[id.0].parent
    }

    /// Children in document order.
    #[must_use]
    pub fn children(&self, id: ElementId) -> &[ElementId] {
        &self.elements[id.0].children
    }

    /// Children of one kind.
    pub fn children_of(
        &self,
        id: ElementId,
        kind: ElementKind,
    ) -> impl Iterator<Item = ElementId> + '_ {
        self.elements[id.0]
            .children
            .iter()
            .copied()
            .filter(move |c| self.elements[c.0].kind == kind)
    }

    /// First child of one kind.
    #[must_use]
    pub fn child(&self, id: ElementId, kind: ElementKind) -> Option<ElementId> {
        self.children_of(id, kind).next()
    }

    /// Follow a path of child kinds.
    #[must_use]
    pub fn path(&self, id: ElementId, kinds: &[ElementKind]) -> Option<ElementId> {
        kinds.iter().try_fold(id, |at, &k| self.child(at, k))
    }

    /// First descendant of one kind in document order.
    #[must_use]
    pub fn descendant(&self, id: ElementId, kind: ElementKind) -> Option<ElementId> {
        let mut stack: Vec<ElementId> = self.children(id).iter().rev().copied().collect();
        while let Some(e) = stack.pop() {
            if self.kind(e) == kind {
                return Some(e);
            }
            stack.extend(self.children(e).iter().rev().copied());
        }
        None
    }

    /// Nearest strict ancestor of one kind.
    #[must_use]
    pub fn ancestor(&self, id: ElementId, kind: ElementKind) -> Option<ElementId> {
        let mut at = self.parent(id);
        while let Some(e) = at {
            if self.kind(e) == kind {
                return Some(e);
            }
            at = self.parent(e);
        }
        None
    }

    /// All elements of one kind in document order.
    pub fn elements_of(&self, kind: ElementKind) -> impl Iterator<Item = ElementId> + '_ {
        self.elements
            .iter()
            .enumerate()
            .filter(move |(_, e)| e.kind == kind)
            .map(|(i, _)| ElementId(i))
    }

    /// Look up an element by document id.
    #[must_use]
    pub fn by_id(&self, id: &str) -> Option<ElementId> {
        self.ids.get(id).copied()
    }

    /// Resolve a local URL (`#id`); the leading `#` is optional.
    #[must_use]
    pub fn resolve_url(&self, url: &str) -> Option<ElementId> {
        self.by_id(url.strip_prefix('#').unwrap_or(url))
    }

    /// Resolve the `url` attribute of an instance element.
    #[must_use]
    pub fn instantiated(&self, id: ElementId) -> Option<ElementId> {
        self.attr(id, "url").and_then(|u| self.resolve_url(u))
    }

    /// Meters per unit in effect for an element.
    #[must_use]
    pub fn unit_scale(&self, id: ElementId) -> f64 {
        self.elements[id.0].unit
    }

    /// Parse the text as whitespace-separated floats.
    ///
    /// # Errors
    ///
    /// Returns [`ColladaError::InvalidNumber`] for a token that is not a number.
    pub fn floats(&self, id: ElementId) -> Result<Vec<f64>> {
        self.text(id)
            .split_whitespace()
            .map(|t| {
                t.parse::<f64>()
                    .map_err(|_| ColladaError::invalid_number(&self.elements[id.0].tag, t))
            })
            .collect()
    }

    /// Parse the text as whitespace-separated indices.
    ///
    /// # Errors
    ///
    /// Returns [`ColladaError::InvalidNumber`] for a token that is not an index.
    pub fn indices(&self, id: ElementId) -> Result<Vec<usize>> {
        self.text(id)
            .split_whitespace()
            .map(|t| {
                t.parse::<usize>()
                    .map_err(|_| ColladaError::invalid_number(&self.elements[id.0].tag, t))
            })
            .collect()
    }

    /// Parse the text as a single float.
    #[must_use]
    pub fn float(&self, id: ElementId) -> Option<f64> {
        self.text(id).parse().ok()
    }

    /// Parse the text as a boolean (`true`/`false`/`1`/`0`).
    #[must_use]
    pub fn bool(&self, id: ElementId) -> Option<bool> {
        match self.text(id) {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        }
    }

    /// Short label for diagnostics, e.g. `<node id="base">`.
    #[must_use]
    pub fn describe(&self, id: ElementId) -> String {
        let e = &self.elements[id.0];
        match (e.attr("id"), e.attr("sid"), e.attr("name")) {
            (Some(v), _, _) => format!("<{} id=\"{v}\">", e.tag),
            (None, Some(v), _) => format!("<{} sid=\"{v}\">", e.tag),
            (None, None, Some(v)) => format!("<{} name=\"{v}\">", e.tag),
            _ => format!("<{}>", e.tag),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const DOC: &str = r#"
        <COLLADA xmlns="http://www.collada.org/2008/03/COLLADASchema" xmlns:math="http://www.w3.org/1998/Math/MathML">
            <asset><unit meter="0.01" name="centimeter"/></asset>
            <library_visual_scenes>
                <visual_scene id="vs">
                    <node id="base" sid="base_sid" name="Base">
                        <translate>1 2 3</translate>
                        <node id="arm"/>
                    </node>
                </visual_scene>
            </library_visual_scenes>
            <library_geometries>
                <asset><unit meter="1"/></asset>
                <geometry id="g"><mesh/></geometry>
            </library_geometries>
            <library_formulas>
                <formula><math:math><math:apply><math:plus/></math:apply></math:math></formula>
            </library_formulas>
        </COLLADA>
    "#;

    #[test]
    fn test_parse_tree() {
        let doc = Document::parse(DOC).unwrap();
        assert_eq!(doc.kind(doc.root()), ElementKind::Collada);
        let base = doc.by_id("base").unwrap();
        assert_eq!(doc.kind(base), ElementKind::Node);
        assert_eq!(doc.sid_of(base), Some("base_sid"));
        assert_eq!(doc.name_of(base), Some("Base"));
        let t = doc.child(base, ElementKind::Translate).unwrap();
        assert_eq!(doc.floats(t).unwrap(), vec![1.0, 2.0, 3.0]);
        let arm = doc.resolve_url("#arm").unwrap();
        assert_eq!(doc.parent(arm), Some(base));
        assert_eq!(doc.ancestor(arm, ElementKind::VisualScene), doc.by_id("vs"));
    }

    #[test]
    fn test_unit_inheritance() {
        let doc = Document::parse(DOC).unwrap();
        assert_relative_eq!(doc.unit_scale(doc.by_id("arm").unwrap()), 0.01);
        assert_relative_eq!(doc.unit_scale(doc.by_id("g").unwrap()), 1.0);
    }

    #[test]
    fn test_namespaced_tags() {
        let doc = Document::parse(DOC).unwrap();
        let math = doc.elements_of(ElementKind::Math).next().unwrap();
        let apply = doc.child(math, ElementKind::Apply).unwrap();
        assert!(doc.child(apply, ElementKind::Plus).is_some());
    }

    #[test]
    fn test_invalid_number() {
        let doc = Document::parse("<COLLADA><translate>1 x 3</translate></COLLADA>").unwrap();
        let t = doc.elements_of(ElementKind::Translate).next().unwrap();
        let err = doc.floats(t).unwrap_err();
        assert!(err.to_string().contains("translate"));
    }

    #[test]
    fn test_truncated_document() {
        assert!(matches!(
            Document::parse("<COLLADA><scene>"),
            Err(ColladaError::XmlParse(_))
        ));
        assert!(matches!(
            Document::parse(""),
            Err(ColladaError::MalformedDocument(_))
        ));
    }
}
