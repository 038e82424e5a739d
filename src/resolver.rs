//! Scoped symbol resolution.
//!
//! Two reference styles are resolved here:
//!
//! - **SIDREFs** (`id/sid/sid`, `./sid`, or a bare `sid`) walk the element
//!   tree from a context element. A leading sid is searched in the context
//!   subtree, then in each ancestor's subtree; later tokens search the
//!   descendants of the previous match. Instance elements expose the
//!   definition named by their `url` to the search.
//! - **Bind symbols** scan a scope's `bind` table, then its `newparam` table.
//!   Kinematics scenes and articulated systems are not scopes themselves;
//!   they delegate to the instances they contain.
//!
//! A match that is a `newparam` forwarding through a `SIDREF` is followed to
//! its final target. Resolution never fails hard: callers get `None` and
//! decide what to skip.

use std::collections::VecDeque;

use hashbrown::HashSet;
use tracing::warn;

use crate::document::{Document, ElementId, ElementKind};

/// Upper bound on chained `newparam` forwards.
const MAX_PARAM_HOPS: usize = 32;

/// Reference resolver over one document.
#[derive(Debug, Clone, Copy)]
pub struct Resolver<'d> {
    doc: &'d Document,
}

impl<'d> Resolver<'d> {
    /// Create a resolver for `doc`.
    #[must_use]
    pub fn new(doc: &'d Document) -> Self {
        Self { doc }
    }

    /// The underlying document.
    #[must_use]
    pub fn document(&self) -> &'d Document {
        self.doc
    }

    /// Resolve a SIDREF from `context`, following forwarding parameters.
    #[must_use]
    pub fn sidref(&self, reference: &str, context: ElementId) -> Option<ElementId> {
        self.sidref_raw(reference, context)
            .map(|found| self.follow_params(found))
    }

    /// Resolve a SIDREF without following forwarding parameters.
    #[must_use]
    pub fn sidref_raw(&self, reference: &str, context: ElementId) -> Option<ElementId> {
        let mut tokens = reference.split('/').filter(|t| !t.is_empty());
        let first = tokens.next()?;
        let mut at = if first == "." {
            context
        } else if let Some(e) = self.doc.by_id(first) {
            e
        } else {
            self.find_sid_upward(context, first)?
        };
        for token in tokens {
            at = self.find_sid(at, token, false)?;
        }
        Some(at)
    }

    /// Search `context`'s subtree, then each ancestor's, for `sid`.
    fn find_sid_upward(&self, context: ElementId, sid: &str) -> Option<ElementId> {
        let mut scope = Some(context);
        while let Some(s) = scope {
            if let Some(found) = self.find_sid(s, sid, true) {
                return Some(found);
            }
            scope = self.doc.parent(s);
        }
        None
    }

    /// Breadth-first search below `start` for an element with `sid`.
    fn find_sid(&self, start: ElementId, sid: &str, include_start: bool) -> Option<ElementId> {
        let doc = self.doc;
        let mut queue = VecDeque::from([start]);
        let mut visited = HashSet::new();
        visited.insert(start);
        while let Some(e) = queue.pop_front() {
            if (include_start || e != start) && doc.sid_of(e) == Some(sid) {
                return Some(e);
            }
            for &c in doc.children(e) {
                if visited.insert(c) {
                    queue.push_back(c);
                }
            }
            if exposes_definition(doc.kind(e)) {
                if let Some(def) = doc.instantiated(e) {
                    if visited.insert(def) {
                        queue.push_back(def);
                    }
                }
            }
        }
        None
    }

    /// Follow `newparam → SIDREF` forwards from `start`.
    #[must_use]
    pub fn follow_params(&self, start: ElementId) -> ElementId {
        let doc = self.doc;
        let mut at = start;
        for _ in 0..MAX_PARAM_HOPS {
            if doc.kind(at) != ElementKind::Newparam {
                break;
            }
            let Some(sidref) = doc.child(at, ElementKind::Sidref) else {
                break;
            };
            let context = doc
                .parent(at)
                .and_then(|p| doc.instantiated(p))
                .unwrap_or(at);
            match self.sidref_raw(doc.text(sidref), context) {
                Some(next) if next != at => at = next,
                _ => break,
            }
        }
        at
    }

    /// Resolve a bind symbol against a kinematics scene, articulated system
    /// or kinematics instance.
    #[must_use]
    pub fn search_binding(&self, symbol: &str, scope: ElementId) -> Option<ElementId> {
        let doc = self.doc;
        match doc.kind(scope) {
            ElementKind::KinematicsScene => doc
                .children_of(scope, ElementKind::InstanceArticulatedSystem)
                .chain(doc.children_of(scope, ElementKind::InstanceKinematicsModel))
                .find_map(|inst| self.search_binding(symbol, inst)),
            ElementKind::ArticulatedSystem => {
                let from_kinematics = doc
                    .child(scope, ElementKind::Kinematics)
                    .and_then(|k| {
                        doc.children_of(k, ElementKind::InstanceKinematicsModel)
                            .find_map(|ikm| self.search_binding(symbol, ikm))
                    });
                from_kinematics.or_else(|| {
                    doc.child(scope, ElementKind::Motion)
                        .and_then(|m| doc.child(m, ElementKind::InstanceArticulatedSystem))
                        .and_then(|ias| self.search_binding(symbol, ias))
                })
            }
            ElementKind::InstanceArticulatedSystem | ElementKind::InstanceKinematicsModel => {
                self.search_instance(symbol, scope)
            }
            _ => None,
        }
    }

    fn search_instance(&self, symbol: &str, instance: ElementId) -> Option<ElementId> {
        let doc = self.doc;
        let definition = doc.instantiated(instance)?;
        for bind in doc.children_of(instance, ElementKind::Bind) {
            if doc.attr(bind, "symbol") != Some(symbol) {
                continue;
            }
            if let Some(reference) = doc
                .child(bind, ElementKind::Param)
                .and_then(|p| doc.attr(p, "ref"))
            {
                return self.sidref(reference, definition);
            }
            if let Some(sidref) = doc.child(bind, ElementKind::Sidref) {
                return self.sidref(doc.text(sidref), definition);
            }
        }
        for newparam in doc.children_of(instance, ElementKind::Newparam) {
            if doc.sid_of(newparam) != Some(symbol) {
                continue;
            }
            if let Some(sidref) = doc.child(newparam, ElementKind::Sidref) {
                return self.sidref(doc.text(sidref), definition);
            }
            warn!("newparam sid={symbol} does not have SIDREF");
        }
        None
    }

    /// Resolve an element holding either a `SIDREF` child (relative to
    /// `scope`) or a `param` child (a bind symbol searched in `scope`).
    #[must_use]
    pub fn sidref_or_param(&self, holder: ElementId, scope: ElementId) -> Option<ElementId> {
        let doc = self.doc;
        if let Some(sidref) = doc.child(holder, ElementKind::Sidref) {
            return self.sidref(doc.text(sidref), scope);
        }
        if let Some(param) = doc.child(holder, ElementKind::Param) {
            return self.search_binding(doc.text(param), scope);
        }
        None
    }

    /// Resolve a `bool`-or-`param` element; `owner` holds the `newparam` table.
    ///
    /// Unresolvable values are `false` with a warning.
    #[must_use]
    pub fn resolve_bool(&self, holder: ElementId, owner: ElementId) -> bool {
        self.resolve_value(holder, owner, ElementKind::Bool, |e| self.doc.bool(e))
            .unwrap_or(false)
    }

    /// Resolve a `float`-or-`param` element; `owner` holds the `newparam` table.
    ///
    /// Unresolvable values are `0.0` with a warning.
    #[must_use]
    pub fn resolve_float(&self, holder: ElementId, owner: ElementId) -> f64 {
        self.resolve_value(holder, owner, ElementKind::Float, |e| self.doc.float(e))
            .unwrap_or(0.0)
    }

    fn resolve_value<T>(
        &self,
        holder: ElementId,
        owner: ElementId,
        literal: ElementKind,
        read: impl Fn(ElementId) -> Option<T>,
    ) -> Option<T> {
        let doc = self.doc;
        if let Some(lit) = doc.child(holder, literal) {
            let value = read(lit);
            if value.is_none() {
                warn!("invalid literal in {}", doc.describe(holder));
            }
            return value;
        }
        let Some(param) = doc.child(holder, ElementKind::Param) else {
            warn!("param not specified in {}, using default", doc.describe(holder));
            return None;
        };
        let name = doc.text(param);
        for newparam in doc.children_of(owner, ElementKind::Newparam) {
            if doc.sid_of(newparam) != Some(name) {
                continue;
            }
            if let Some(lit) = doc.child(newparam, literal) {
                return read(lit);
            }
            if let Some(sidref) = doc.child(newparam, ElementKind::Sidref) {
                let target = self
                    .sidref(doc.text(sidref), newparam)
                    .and_then(|t| {
                        if doc.kind(t) == literal {
                            Some(t)
                        } else {
                            doc.child(t, literal)
                        }
                    })
                    .and_then(&read);
                if target.is_some() {
                    return target;
                }
                warn!("failed to resolve {} from {name}", doc.text(sidref));
            }
        }
        warn!("failed to resolve {name}, using default");
        None
    }
}

/// Instance kinds whose `url` target takes part in sid lookup.
fn exposes_definition(kind: ElementKind) -> bool {
    matches!(
        kind,
        ElementKind::InstanceKinematicsModel
            | ElementKind::InstanceArticulatedSystem
            | ElementKind::InstanceJoint
            | ElementKind::InstancePhysicsModel
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const DOC: &str = r##"
        <COLLADA>
            <library_kinematics_models>
                <kinematics_model id="km">
                    <technique_common>
                        <joint sid="j0" name="elbow">
                            <revolute sid="ax"><axis>0 0 1</axis></revolute>
                        </joint>
                    </technique_common>
                </kinematics_model>
            </library_kinematics_models>
            <library_articulated_systems>
                <articulated_system id="kin">
                    <kinematics>
                        <instance_kinematics_model url="#km" sid="ikm">
                            <newparam sid="fwd_model"><SIDREF>kin/ikm</SIDREF></newparam>
                            <newparam sid="fwd_axis"><SIDREF>kin/ikm/j0/ax</SIDREF></newparam>
                        </instance_kinematics_model>
                        <technique_common>
                            <axis_info sid="ai0" axis="km/j0/ax">
                                <newparam sid="is_locked"><bool>true</bool></newparam>
                                <newparam sid="lim"><float>45</float></newparam>
                                <newparam sid="via"><SIDREF>ai0/lim</SIDREF></newparam>
                                <locked><param>is_locked</param></locked>
                                <limits>
                                    <min><float>-30</float></min>
                                    <max><param>via</param></max>
                                </limits>
                            </axis_info>
                        </technique_common>
                    </kinematics>
                </articulated_system>
                <articulated_system id="mot">
                    <motion>
                        <instance_articulated_system url="#kin" sid="ias_kin">
                            <newparam sid="mot_model"><SIDREF>kin/fwd_model</SIDREF></newparam>
                        </instance_articulated_system>
                    </motion>
                </articulated_system>
            </library_articulated_systems>
            <library_kinematics_scenes>
                <kinematics_scene id="ks">
                    <instance_articulated_system url="#mot" sid="ias">
                        <bind symbol="scene_model"><param ref="mot/mot_model"/></bind>
                        <bind symbol="scene_axis"><SIDREF>kin/fwd_axis</SIDREF></bind>
                    </instance_articulated_system>
                </kinematics_scene>
            </library_kinematics_scenes>
        </COLLADA>
    "##;

    #[test]
    fn test_sidref_paths() {
        let doc = Document::parse(DOC).unwrap();
        let r = Resolver::new(&doc);
        let km = doc.by_id("km").unwrap();
        let axis = r.sidref("km/j0/ax", km).unwrap();
        assert_eq!(doc.kind(axis), ElementKind::Revolute);
        // Bare sid searched from a context inside the model.
        let joint = r.sidref("j0", axis).unwrap();
        assert_eq!(doc.name_of(joint), Some("elbow"));
        // Instance elements expose their definition.
        let through_instance = r.sidref("kin/ikm/j0/ax", km).unwrap();
        assert_eq!(through_instance, axis);
        assert!(r.sidref("km/missing", km).is_none());
    }

    #[test]
    fn test_binding_chains() {
        let doc = Document::parse(DOC).unwrap();
        let r = Resolver::new(&doc);
        let ks = doc.by_id("ks").unwrap();
        let ikm = r.search_binding("scene_model", ks).unwrap();
        assert_eq!(doc.kind(ikm), ElementKind::InstanceKinematicsModel);
        assert_eq!(doc.sid_of(ikm), Some("ikm"));
        let axis = r.search_binding("scene_axis", ks).unwrap();
        assert_eq!(doc.kind(axis), ElementKind::Revolute);
        assert!(r.search_binding("nothing", ks).is_none());
    }

    #[test]
    fn test_articulated_system_falls_through_to_motion() {
        let doc = Document::parse(DOC).unwrap();
        let r = Resolver::new(&doc);
        let mot = doc.by_id("mot").unwrap();
        let ikm = r.search_binding("mot_model", mot).unwrap();
        assert_eq!(doc.sid_of(ikm), Some("ikm"));
    }

    #[test]
    fn test_resolve_values() {
        let doc = Document::parse(DOC).unwrap();
        let r = Resolver::new(&doc);
        let info = doc.elements_of(ElementKind::AxisInfo).next().unwrap();
        let locked = doc.child(info, ElementKind::Locked).unwrap();
        assert!(r.resolve_bool(locked, info));
        let limits = doc.child(info, ElementKind::Limits).unwrap();
        let min = doc.child(limits, ElementKind::Min).unwrap();
        let max = doc.child(limits, ElementKind::Max).unwrap();
        assert_relative_eq!(r.resolve_float(min, info), -30.0);
        assert_relative_eq!(r.resolve_float(max, info), 45.0);
        // No newparam table on the limits element itself.
        assert_relative_eq!(r.resolve_float(max, limits), 0.0);
    }
}
