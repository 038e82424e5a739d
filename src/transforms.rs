//! Transform stacks of scene-graph elements.
//!
//! An element's local transform is the ordered product of its transform
//! children (`translate`, `rotate`, `scale`, `matrix`). Non-transform
//! children contribute nothing.

use nalgebra::Vector3;
use tracing::warn;

use crate::document::{Document, ElementId, ElementKind};
use crate::pose::{Pose, Transform};

/// Local transform of one transform element.
///
/// `rotate` is in degrees. Translations use the unit scale in effect at the
/// element. Unsupported or malformed elements are identity with a warning.
#[must_use]
pub fn element_transform(doc: &Document, el: ElementId) -> Transform {
    let values = match doc.floats(el) {
        Ok(v) => v,
        Err(e) => {
            warn!("{e}");
            return Transform::identity();
        }
    };
    let unit = doc.unit_scale(el);
    match (doc.kind(el), values.as_slice()) {
        (ElementKind::Rotate, &[x, y, z, angle, ..]) => {
            Transform::from_axis_angle(Vector3::new(x, y, z), angle.to_radians())
        }
        (ElementKind::Translate, &[x, y, z, ..]) => {
            Transform::from_translation(Vector3::new(x, y, z) * unit)
        }
        (ElementKind::Scale, &[x, y, z, ..]) => Transform::from_scale(Vector3::new(x, y, z)),
        (ElementKind::Matrix, v) if v.len() >= 16 => {
            let mut m = [0.0; 16];
            m.copy_from_slice(&v[..16]);
            Transform::from_row_major(&m, unit)
        }
        (ElementKind::Lookat, _) => {
            warn!("look at transform not implemented");
            Transform::identity()
        }
        (ElementKind::Skew, _) => {
            warn!("skew transform not implemented");
            Transform::identity()
        }
        (kind, v) => {
            if kind.is_transform() {
                warn!("{} has {} values", doc.describe(el), v.len());
            }
            Transform::identity()
        }
    }
}

/// Product of every transform child of `el`, in document order.
#[must_use]
pub fn full_transform(doc: &Document, el: ElementId) -> Transform {
    doc.children(el)
        .iter()
        .filter(|&&c| doc.kind(c).is_transform())
        .fold(Transform::identity(), |acc, &c| {
            acc.mul(&element_transform(doc, c))
        })
}

/// Rigid part of [`full_transform`].
#[must_use]
pub fn full_pose(doc: &Document, el: ElementId) -> Pose {
    Pose::from_transform(&full_transform(doc, el))
}

/// World transform of the node enclosing `el`: the product of the local
/// transforms of every ancestor node, outermost first.
#[must_use]
pub fn parent_transform(doc: &Document, el: ElementId) -> Transform {
    let mut chain = Vec::new();
    let mut at = doc.parent(el);
    while let Some(p) = at {
        if doc.kind(p) != ElementKind::Node {
            break;
        }
        chain.push(p);
        at = doc.parent(p);
    }
    chain
        .iter()
        .rev()
        .fold(Transform::identity(), |acc, &n| acc.mul(&full_transform(doc, n)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    const DOC: &str = r#"<COLLADA>
        <visual_scene id="vs">
            <asset><unit meter="0.01"/></asset>
            <node id="a">
                <translate>100 0 0</translate>
                <rotate>0 0 1 90</rotate>
                <node id="b">
                    <translate>0 100 0</translate>
                    <scale>2 2 2</scale>
                    <lookat>0 0 0 1 1 1 0 0 1</lookat>
                    <node id="c"/>
                </node>
            </node>
            <node id="m">
                <matrix>1 0 0 100  0 1 0 0  0 0 1 0  0 0 0 1</matrix>
            </node>
        </visual_scene>
    </COLLADA>"#;

    #[test]
    fn test_full_transform_order_and_units() {
        let doc = Document::parse(DOC).unwrap();
        let a = full_transform(&doc, doc.by_id("a").unwrap());
        // translate then rotate: the rotation acts in the translated frame.
        let p = a.transform_point(&Vector3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(p, Vector3::new(1.0, 1.0, 0.0), epsilon = 1e-12);
        let (pose, _) = a.decompose();
        assert_relative_eq!(pose.rotation.angle(), FRAC_PI_2, epsilon = 1e-12);
    }

    #[test]
    fn test_parent_transform_composes_ancestors() {
        let doc = Document::parse(DOC).unwrap();
        let c = doc.by_id("c").unwrap();
        let world = parent_transform(&doc, c);
        // a: (1,0,0) rotated 90 about z; b: (0,1,0) in a's frame -> (-1,0,0).
        assert_relative_eq!(world.translation, Vector3::new(0.0, 0.0, 0.0), epsilon = 1e-12);
        let (_, scale) = world.decompose();
        assert_relative_eq!(scale, Vector3::repeat(2.0), epsilon = 1e-12);
        assert_relative_eq!(
            parent_transform(&doc, doc.by_id("a").unwrap()).translation,
            Vector3::zeros()
        );
    }

    #[test]
    fn test_matrix_translation_scaled() {
        let doc = Document::parse(DOC).unwrap();
        let m = full_pose(&doc, doc.by_id("m").unwrap());
        assert_relative_eq!(m.position, Vector3::new(1.0, 0.0, 0.0), epsilon = 1e-12);
    }
}
