//! Tree validation of an extracted link/joint graph.
//!
//! Checks the kinematic structure of a [`RobotModel`] and derives its root.

use std::collections::{HashMap, HashSet};

use crate::error::{ColladaError, Result};
use crate::types::RobotModel;

/// Validation result containing the root link and kinematic structure.
#[derive(Debug)]
pub struct ValidationResult {
    /// The root link name (link with no parent joint).
    pub root_link: String,
    /// Map from link name to its parent joint name.
    pub link_parent_joint: HashMap<String, String>,
    /// Map from link name to its child joint names.
    pub link_child_joints: HashMap<String, Vec<String>>,
    /// Link names ordered parent first, starting at the root.
    pub sorted_links: Vec<String>,
}

/// Validate the link/joint tree of a model.
///
/// This checks:
/// - All joints reference existing links
/// - No link has more than one parent joint
/// - Exactly one root link (no parent)
/// - No kinematic loops
///
/// # Errors
///
/// Returns [`ColladaError::UndefinedLink`], [`ColladaError::KinematicLoop`],
/// [`ColladaError::NoRootLink`] or [`ColladaError::MultipleRootLinks`].
pub fn validate(robot: &RobotModel) -> Result<ValidationResult> {
    let mut link_parent_joint: HashMap<String, String> = HashMap::new();
    let mut link_child_joints: HashMap<String, Vec<String>> = robot
        .links
        .keys()
        .map(|name| (name.clone(), Vec::new()))
        .collect();

    for joint in robot.joints.values() {
        if !robot.links.contains_key(&joint.parent_link) {
            return Err(ColladaError::undefined_link(&joint.parent_link, &joint.name));
        }
        if !robot.links.contains_key(&joint.child_link) {
            return Err(ColladaError::undefined_link(&joint.child_link, &joint.name));
        }
        if joint.parent_link == joint.child_link {
            return Err(ColladaError::KinematicLoop(format!(
                "joint '{}' connects link '{}' to itself",
                joint.name, joint.child_link
            )));
        }

        if link_parent_joint.contains_key(&joint.child_link) {
            return Err(ColladaError::KinematicLoop(format!(
                "link '{}' has multiple parent joints",
                joint.child_link
            )));
        }
        link_parent_joint.insert(joint.child_link.clone(), joint.name.clone());

        link_child_joints
            .entry(joint.parent_link.clone())
            .or_default()
            .push(joint.name.clone());
    }

    let root_links: Vec<&String> = robot
        .links
        .keys()
        .filter(|name| !link_parent_joint.contains_key(*name))
        .collect();

    let root_link = match root_links.as_slice() {
        [] => return Err(ColladaError::NoRootLink),
        [root] => (*root).clone(),
        _ => {
            return Err(ColladaError::MultipleRootLinks(
                root_links.into_iter().cloned().collect(),
            ));
        }
    };

    let sorted_links = parent_first_order(robot, &root_link, &link_child_joints)?;

    Ok(ValidationResult {
        root_link,
        link_parent_joint,
        link_child_joints,
        sorted_links,
    })
}

/// Pre-order walk from the root with an explicit stack.
fn parent_first_order(
    robot: &RobotModel,
    root: &str,
    link_child_joints: &HashMap<String, Vec<String>>,
) -> Result<Vec<String>> {
    let mut sorted = Vec::with_capacity(robot.links.len());
    let mut visited: HashSet<&str> = HashSet::new();
    let mut stack: Vec<&str> = vec![root];

    while let Some(link) = stack.pop() {
        if !visited.insert(link) {
            return Err(ColladaError::KinematicLoop(format!(
                "cycle detected involving link '{link}'"
            )));
        }
        sorted.push(link.to_string());
        if let Some(children) = link_child_joints.get(link) {
            for joint_name in children.iter().rev() {
                if let Some(joint) = robot.joints.get(joint_name) {
                    stack.push(joint.child_link.as_str());
                }
            }
        }
    }

    // Single parents plus a unique root leave only cycles detached from the root.
    if sorted.len() != robot.links.len() {
        let detached: Vec<&str> = robot
            .links
            .keys()
            .map(String::as_str)
            .filter(|name| !visited.contains(name))
            .collect();
        return Err(ColladaError::KinematicLoop(format!(
            "links not reachable from root '{root}': {}",
            detached.join(", ")
        )));
    }

    Ok(sorted)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::{Joint, JointType, Link};

    fn robot(links: &[&str], joints: &[(&str, &str, &str)]) -> RobotModel {
        let mut robot = RobotModel::new("test");
        for name in links {
            robot.add_link(Link::new(*name));
        }
        for (name, parent, child) in joints {
            robot.add_joint(Joint::new(*name, JointType::Revolute, *parent, *child));
        }
        robot
    }

    #[test]
    fn test_valid_chain() {
        let r = robot(&["base", "link1", "link2"], &[("j1", "base", "link1"), ("j2", "link1", "link2")]);
        let result = validate(&r).unwrap();
        assert_eq!(result.root_link, "base");
        assert_eq!(result.sorted_links, vec!["base", "link1", "link2"]);
        assert_eq!(result.link_parent_joint.get("link2").unwrap(), "j2");
        assert_eq!(result.link_child_joints.get("base").unwrap(), &vec!["j1".to_string()]);
    }

    #[test]
    fn test_undefined_link() {
        let r = robot(&["base"], &[("j1", "base", "ghost")]);
        assert!(matches!(validate(&r), Err(ColladaError::UndefinedLink { .. })));
    }

    #[test]
    fn test_multiple_roots() {
        let r = robot(&["a", "b", "c"], &[("j1", "a", "c")]);
        match validate(&r) {
            Err(ColladaError::MultipleRootLinks(roots)) => assert_eq!(roots, vec!["a", "b"]),
            other => panic!("expected MultipleRootLinks, got {other:?}"),
        }
    }

    #[test]
    fn test_multiple_parents() {
        let r = robot(&["a", "b", "c"], &[("j1", "a", "c"), ("j2", "b", "c")]);
        assert!(matches!(validate(&r), Err(ColladaError::KinematicLoop(_))));
    }

    #[test]
    fn test_cycle_without_root() {
        let r = robot(&["a", "b"], &[("j1", "a", "b"), ("j2", "b", "a")]);
        assert!(matches!(validate(&r), Err(ColladaError::NoRootLink)));
    }

    #[test]
    fn test_detached_cycle() {
        let r = robot(
            &["root", "a", "b"],
            &[("j1", "a", "b"), ("j2", "b", "a")],
        );
        assert!(matches!(validate(&r), Err(ColladaError::KinematicLoop(_))));
    }
}
