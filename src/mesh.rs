//! Decoding of COLLADA `<geometry>` elements into triangle buffers.
//!
//! The four primitive encodings (`triangles`, `trifans`, `tristrips`,
//! `polylist`) are normalized into one unshared-vertex [`TriangleMesh`] per
//! primitive group. Positions are taken from the `POSITION` input of the
//! mesh's `<vertices>` and scaled by the unit in effect on their `<source>`.
//! Only positions are read; normals and texture coordinates are skipped by
//! stepping over each vertex's full input stride.

#![allow(clippy::cast_possible_truncation)]

use hashbrown::HashMap;
use nalgebra::Vector3;
use tracing::{debug, warn};

use crate::document::{Document, ElementId, ElementKind};
use crate::error::{ColladaError, Result};
use crate::pose::Pose;
use crate::types::{Color, Geometry, GeometryPart, TriangleMesh};

/// Components per position in a `float_array`.
const POSITION_STRIDE: usize = 3;

/// Ambient and diffuse colors resolved from a material.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaterialColors {
    /// Phong ambient color.
    pub ambient: Color,
    /// Phong diffuse color.
    pub diffuse: Color,
}

impl Default for MaterialColors {
    fn default() -> Self {
        Self {
            ambient: Color::new(0.0, 0.0, 0.0, 1.0),
            diffuse: Color::new(0.0, 0.0, 0.0, 1.0),
        }
    }
}

/// Resolve `material → instance_effect → effect → phong` colors.
///
/// Channels the material does not declare keep their defaults.
#[must_use]
pub fn material_colors(doc: &Document, material: ElementId) -> MaterialColors {
    let mut colors = MaterialColors::default();
    let Some(phong) = doc
        .child(material, ElementKind::InstanceEffect)
        .and_then(|ie| doc.instantiated(ie))
        .and_then(|effect| doc.descendant(effect, ElementKind::Phong))
    else {
        return colors;
    };
    let read = |kind| {
        doc.path(phong, &[kind, ElementKind::Color])
            .and_then(|c| doc.floats(c).ok())
            .and_then(|v| Color::from_slice(&v))
    };
    if let Some(c) = read(ElementKind::Ambient) {
        colors.ambient = c;
    }
    if let Some(c) = read(ElementKind::Diffuse) {
        colors.diffuse = c;
    }
    colors
}

/// Material symbol table of an `instance_geometry`.
#[must_use]
pub fn bound_materials(doc: &Document, instance_geometry: ElementId) -> HashMap<String, ElementId> {
    let mut map = HashMap::new();
    let Some(common) = doc.path(
        instance_geometry,
        &[ElementKind::BindMaterial, ElementKind::TechniqueCommon],
    ) else {
        return map;
    };
    for im in doc.children_of(common, ElementKind::InstanceMaterial) {
        let (Some(symbol), Some(target)) = (
            doc.attr(im, "symbol"),
            doc.attr(im, "target").and_then(|t| doc.resolve_url(t)),
        ) else {
            continue;
        };
        map.insert(symbol.to_string(), target);
    }
    map
}

/// Decode every supported primitive inside a `<geometry>` element.
///
/// Each primitive group becomes one part with an identity origin.
/// Unsupported or broken groups are skipped with a warning.
#[must_use]
pub fn extract_geometry(
    doc: &Document,
    geometry: ElementId,
    materials: &HashMap<String, ElementId>,
) -> Vec<GeometryPart> {
    let mut parts = Vec::new();
    for &shape in doc.children(geometry) {
        match doc.kind(shape) {
            ElementKind::Mesh => extract_mesh(doc, shape, materials, &mut parts),
            ElementKind::ConvexMesh => {
                warn!(
                    "convex_mesh in {} is not supported, skipping",
                    doc.describe(geometry)
                );
            }
            ElementKind::Box | ElementKind::Sphere | ElementKind::Cylinder => {
                match primitive_shape(doc, shape) {
                    Ok(g) => parts.push(GeometryPart {
                        geometry: g,
                        origin: Pose::identity(),
                        diffuse: MaterialColors::default().diffuse,
                        ambient: MaterialColors::default().ambient,
                    }),
                    Err(e) => warn!("{e}"),
                }
            }
            _ => {}
        }
    }
    parts
}

fn extract_mesh(
    doc: &Document,
    mesh: ElementId,
    materials: &HashMap<String, ElementId>,
    parts: &mut Vec<GeometryPart>,
) {
    let Some(vertices) = doc.child(mesh, ElementKind::Vertices) else {
        warn!("{} has no <vertices>", doc.describe(mesh));
        return;
    };
    for &prim in doc.children(mesh) {
        match doc.kind(prim) {
            ElementKind::Triangles
            | ElementKind::Trifans
            | ElementKind::Tristrips
            | ElementKind::Polylist => {}
            ElementKind::Polygons => {
                warn!("collada <polygons> are not supported");
                continue;
            }
            _ => continue,
        }
        let decoded = match decode_primitive(doc, prim, vertices) {
            Ok(m) => m,
            Err(e) => {
                warn!("skipping {}: {e}", doc.describe(prim));
                continue;
            }
        };
        let colors = doc
            .attr(prim, "material")
            .and_then(|symbol| materials.get(symbol))
            .map(|&m| material_colors(doc, m))
            .unwrap_or_default();
        debug!(
            "Decoded {}: {} vertices, {} triangles",
            doc.get(prim).tag,
            decoded.vertex_count(),
            decoded.triangle_count()
        );
        parts.push(GeometryPart {
            geometry: Geometry::Mesh(decoded),
            origin: Pose::identity(),
            diffuse: colors.diffuse,
            ambient: colors.ambient,
        });
    }
}

/// Box, sphere or cylinder declared with `half_extents`, `radius` and `height`.
///
/// # Errors
///
/// Returns [`ColladaError::UnsupportedShape`] if a required child is missing.
pub fn primitive_shape(doc: &Document, shape: ElementId) -> Result<Geometry> {
    let unit = doc.unit_scale(shape);
    let values = |kind| -> Result<Vec<f64>> {
        let e = doc.child(shape, kind).ok_or_else(|| {
            ColladaError::unsupported(format!("{} without <{kind:?}>", doc.describe(shape)))
        })?;
        doc.floats(e)
    };
    match doc.kind(shape) {
        ElementKind::Box => match values(ElementKind::HalfExtents)?.as_slice() {
            [x, y, z, ..] => Ok(Geometry::Box {
                half_extents: Vector3::new(*x, *y, *z) * unit,
            }),
            _ => Err(ColladaError::unsupported("box half_extents needs 3 values")),
        },
        ElementKind::Sphere => match values(ElementKind::Radius)?.first() {
            Some(r) => Ok(Geometry::Sphere { radius: r * unit }),
            None => Err(ColladaError::unsupported("sphere without radius")),
        },
        ElementKind::Cylinder => {
            let radius = values(ElementKind::Radius)?;
            let height = values(ElementKind::Height)?;
            match (radius.first(), height.first()) {
                (Some(r), Some(h)) => Ok(Geometry::Cylinder {
                    radius: r * unit,
                    height: h * unit,
                }),
                _ => Err(ColladaError::unsupported("cylinder needs radius and height")),
            }
        }
        other => Err(ColladaError::unsupported(format!("{other:?} primitive"))),
    }
}

/// Scaled positions of a mesh's `<vertices>` POSITION source.
///
/// # Errors
///
/// Returns [`ColladaError::UnresolvedReference`] if the source is missing and
/// [`ColladaError::InvalidNumber`] if its array is not numeric.
pub fn position_source(doc: &Document, vertices: ElementId) -> Result<Vec<f64>> {
    let input = doc
        .children_of(vertices, ElementKind::Input)
        .find(|&i| doc.attr(i, "semantic") == Some("POSITION"))
        .ok_or_else(|| ColladaError::unresolved("POSITION", doc.describe(vertices)))?;
    let reference = doc.attr(input, "source").unwrap_or_default();
    let source = doc
        .resolve_url(reference)
        .ok_or_else(|| ColladaError::unresolved(reference, doc.describe(input)))?;
    let array = doc
        .child(source, ElementKind::FloatArray)
        .ok_or_else(|| ColladaError::malformed(format!("{} has no float_array", doc.describe(source))))?;
    let unit = doc.unit_scale(source);
    Ok(doc.floats(array)?.into_iter().map(|f| f * unit).collect())
}

/// Input stride and `VERTEX` offset of a primitive group.
fn vertex_layout(doc: &Document, prim: ElementId) -> Result<(usize, usize)> {
    let mut stride = 0;
    let mut vertex_offset = None;
    for input in doc.children_of(prim, ElementKind::Input) {
        let offset = doc
            .attr(input, "offset")
            .and_then(|o| o.trim().parse::<usize>().ok())
            .unwrap_or(0);
        if doc.attr(input, "semantic") == Some("VERTEX") {
            vertex_offset = Some(offset);
        }
        stride = stride.max(offset);
    }
    let vertex_offset = vertex_offset.ok_or_else(|| {
        ColladaError::malformed(format!("{} has no VERTEX input", doc.describe(prim)))
    })?;
    let stride = stride.checked_add(1).ok_or_else(|| {
        ColladaError::malformed(format!("{} input offset out of range", doc.describe(prim)))
    })?;
    Ok((stride, vertex_offset))
}

fn declared_count(doc: &Document, prim: ElementId) -> usize {
    doc.attr(prim, "count")
        .and_then(|c| c.trim().parse().ok())
        .unwrap_or(0)
}

/// Reads positions out of a primitive's index list.
struct VertexReader<'a> {
    positions: &'a [f64],
    stride: usize,
    vertex_offset: usize,
}

impl VertexReader<'_> {
    fn position(&self, index: usize) -> Result<Vector3<f64>> {
        let range = index
            .checked_mul(POSITION_STRIDE)
            .and_then(|base| Some(base..base.checked_add(POSITION_STRIDE)?));
        match range.and_then(|r| self.positions.get(r)) {
            Some(p) => Ok(Vector3::new(p[0], p[1], p[2])),
            None => Err(ColladaError::malformed(format!(
                "vertex index {index} out of range"
            ))),
        }
    }

    /// Positions of every vertex in `p`, stepping by the input stride.
    fn all(&self, p: &[usize]) -> Result<Vec<Vector3<f64>>> {
        p.iter()
            .skip(self.vertex_offset)
            .step_by(self.stride)
            .map(|&i| self.position(i))
            .collect()
    }
}

/// Decode one primitive group into an unshared triangle buffer.
///
/// # Errors
///
/// Returns an error if the group has no `VERTEX` input, its position source
/// does not resolve, or an index points past the position array.
pub fn decode_primitive(doc: &Document, prim: ElementId, vertices: ElementId) -> Result<TriangleMesh> {
    let (stride, vertex_offset) = vertex_layout(doc, prim)?;
    let positions = position_source(doc, vertices)?;
    let reader = VertexReader {
        positions: &positions,
        stride,
        vertex_offset,
    };
    let count = declared_count(doc, prim);
    let mut mesh = TriangleMesh::new();

    match doc.kind(prim) {
        ElementKind::Triangles => {
            let p = match doc.child(prim, ElementKind::P) {
                Some(p) => doc.indices(p)?,
                None => Vec::new(),
            };
            let mut k = vertex_offset;
            for _ in 0..count {
                let last = stride.checked_mul(2).and_then(|d| d.checked_add(k));
                if last.is_none_or(|last| last >= p.len()) {
                    break;
                }
                for _ in 0..3 {
                    push_vertex(&mut mesh, reader.position(p[k])?);
                    k += stride;
                }
            }
            if mesh.indices.len() != 3 * count {
                warn!("triangles declares wrong count");
            }
        }
        ElementKind::Trifans | ElementKind::Tristrips => {
            let groups: Vec<ElementId> = doc.children_of(prim, ElementKind::P).collect();
            let mut used = count;
            if used > groups.len() {
                warn!("{} has incorrect count", doc.get(prim).tag);
                used = groups.len();
            }
            let strip = doc.kind(prim) == ElementKind::Tristrips;
            for &group in &groups[..used] {
                let verts = reader.all(&doc.indices(group)?)?;
                if strip {
                    push_strip(&mut mesh, &verts);
                } else {
                    push_fan(&mut mesh, &verts);
                }
            }
        }
        ElementKind::Polylist => {
            let vcount = match doc.child(prim, ElementKind::Vcount) {
                Some(v) => doc.indices(v)?,
                None => Vec::new(),
            };
            let p = match doc.child(prim, ElementKind::P) {
                Some(p) => doc.indices(p)?,
                None => Vec::new(),
            };
            let mut k = vertex_offset;
            for &n in vcount.iter().take(count.max(vcount.len())) {
                let span = n.checked_mul(stride);
                let last = n
                    .checked_sub(1)
                    .and_then(|m| m.checked_mul(stride))
                    .and_then(|d| d.checked_add(k));
                if last.is_none_or(|last| last >= p.len()) {
                    k = span.and_then(|d| d.checked_add(k)).ok_or_else(|| {
                        ColladaError::malformed(format!("vertex count {n} out of range"))
                    })?;
                    continue;
                }
                let mut polygon = Vec::with_capacity(n);
                for _ in 0..n {
                    polygon.push(reader.position(p[k])?);
                    k += stride;
                }
                push_fan(&mut mesh, &polygon);
            }
        }
        other => {
            return Err(ColladaError::unsupported(format!("{other:?} primitive group")));
        }
    }
    Ok(mesh)
}

fn push_vertex(mesh: &mut TriangleMesh, v: Vector3<f64>) {
    mesh.indices.push(mesh.vertices.len() as u32);
    mesh.vertices.push(v);
}

/// Fan around the first vertex: `(0, i-1, i)`.
fn push_fan(mesh: &mut TriangleMesh, verts: &[Vector3<f64>]) {
    let start = mesh.vertices.len() as u32;
    mesh.vertices.extend_from_slice(verts);
    for i in 2..verts.len() as u32 {
        mesh.indices
            .extend_from_slice(&[start, start + i - 1, start + i]);
    }
}

/// Strip with alternating winding.
fn push_strip(mesh: &mut TriangleMesh, verts: &[Vector3<f64>]) {
    let start = mesh.vertices.len() as u32;
    mesh.vertices.extend_from_slice(verts);
    let mut flip = false;
    for i in 2..verts.len() as u32 {
        let v = start + i;
        if flip {
            mesh.indices.extend_from_slice(&[v - 2, v, v - 1]);
        } else {
            mesh.indices.extend_from_slice(&[v - 2, v - 1, v]);
        }
        flip = !flip;
    }
}
