//! Restricted MathML interpreter for mimic joint formulas.
//!
//! Only affine dependencies on a single joint are understood:
//!
//! | Shape                                   | multiplier | offset |
//! |-----------------------------------------|------------|--------|
//! | `(plus (times a x) b)` or `(plus x b)`  | `a` or 1   | `b`    |
//! | `(minus x)`                             | -1         | 0      |
//! | `(x)` or bare `x`                       | 1          | 0      |
//!
//! `x` is a `csymbol` with `encoding="COLLADA"` whose text is a SIDREF to
//! the driving joint. Operands of `plus` and `times` may appear in either
//! order.

use smallvec::SmallVec;
use tracing::warn;

use crate::document::{Document, ElementId, ElementKind};
use crate::error::{ColladaError, Result};

/// `multiplier * symbol + offset`, with the symbol still unresolved.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearFormula {
    /// SIDREF text of the driving joint.
    pub symbol: String,
    /// Multiplier.
    pub multiplier: f64,
    /// Offset.
    pub offset: f64,
}

/// Candidate equations of a `<formula>`, in the order they should be tried.
///
/// An OpenRAVE `position` equation comes before the `technique_common`
/// math. Each returned element is a container whose first child is the
/// expression.
#[must_use]
pub fn formula_math(doc: &Document, formula: ElementId) -> SmallVec<[ElementId; 2]> {
    let mut candidates = SmallVec::new();
    let technique = doc
        .children_of(formula, ElementKind::Technique)
        .find(|&t| doc.attr(t, "profile") == Some("OpenRAVE"));
    if let Some(technique) = technique {
        let equation = doc
            .children_of(technique, ElementKind::Equation)
            .find(|&e| doc.attr(e, "type") == Some("position"));
        if let Some(equation) = equation {
            candidates.push(doc.child(equation, ElementKind::Math).unwrap_or(equation));
        }
    }

    if let Some(common) = doc.child(formula, ElementKind::TechniqueCommon) {
        let mut math = None;
        for &c in doc.children(common) {
            if doc.kind(c) == ElementKind::Math {
                math = Some(c);
            } else {
                warn!("unsupported formula element: {}", doc.get(c).tag);
            }
        }
        candidates.extend(math);
    }
    candidates
}

/// Parse the expression held by `container` (a `math` or `equation`).
///
/// # Errors
///
/// Returns [`ColladaError::UnsupportedShape`] for any expression outside the
/// affine patterns, and [`ColladaError::InvalidNumber`] for a bad `cn`.
pub fn parse_mimic_formula(doc: &Document, container: ElementId) -> Result<LinearFormula> {
    let top = doc
        .children(container)
        .first()
        .copied()
        .ok_or_else(|| ColladaError::unsupported("empty formula"))?;
    if doc.kind(top) == ElementKind::Csymbol {
        return Ok(LinearFormula {
            symbol: symbol_ref(doc, top)?,
            multiplier: 1.0,
            offset: 0.0,
        });
    }
    let args = apply_args(doc, top)?;
    let (op, operands) = args
        .split_first()
        .ok_or_else(|| ColladaError::unsupported("empty <apply>"))?;

    match (doc.kind(*op), operands) {
        (ElementKind::Plus, &[lhs, rhs]) => {
            // Whichever operand is not a constant carries the joint.
            let (term, constant) = if doc.kind(lhs) == ElementKind::Cn {
                (rhs, lhs)
            } else {
                (lhs, rhs)
            };
            let offset = number(doc, constant)?;
            let (symbol, multiplier) = match doc.kind(term) {
                ElementKind::Csymbol => (symbol_ref(doc, term)?, 1.0),
                ElementKind::Apply => scaled_symbol(doc, term)?,
                other => {
                    return Err(ColladaError::unsupported(format!(
                        "plus operand {other:?}"
                    )));
                }
            };
            Ok(LinearFormula {
                symbol,
                multiplier,
                offset,
            })
        }
        (ElementKind::Minus, &[x, ..]) if doc.kind(x) == ElementKind::Csymbol => {
            Ok(LinearFormula {
                symbol: symbol_ref(doc, x)?,
                multiplier: -1.0,
                offset: 0.0,
            })
        }
        (ElementKind::Csymbol, _) => Ok(LinearFormula {
            symbol: symbol_ref(doc, *op)?,
            multiplier: 1.0,
            offset: 0.0,
        }),
        _ => Err(ColladaError::unsupported(format!(
            "formula shape <{}> with {} operands",
            doc.get(*op).tag,
            operands.len()
        ))),
    }
}

/// `(times a x)` or `(times x a)`.
fn scaled_symbol(doc: &Document, apply: ElementId) -> Result<(String, f64)> {
    match apply_args(doc, apply)? {
        &[op, a, b] if doc.kind(op) == ElementKind::Times => {
            let (symbol, constant) = if doc.kind(a) == ElementKind::Csymbol {
                (a, b)
            } else {
                (b, a)
            };
            if doc.kind(symbol) != ElementKind::Csymbol {
                return Err(ColladaError::unsupported("times without a joint symbol"));
            }
            Ok((symbol_ref(doc, symbol)?, number(doc, constant)?))
        }
        _ => Err(ColladaError::unsupported("expected (times a x)")),
    }
}

fn apply_args(doc: &Document, apply: ElementId) -> Result<&[ElementId]> {
    if doc.kind(apply) != ElementKind::Apply {
        return Err(ColladaError::unsupported(format!(
            "expected <apply>, found <{}>",
            doc.get(apply).tag
        )));
    }
    Ok(doc.children(apply))
}

fn number(doc: &Document, cn: ElementId) -> Result<f64> {
    if doc.kind(cn) != ElementKind::Cn {
        return Err(ColladaError::unsupported(format!(
            "expected <cn>, found <{}>",
            doc.get(cn).tag
        )));
    }
    doc.float(cn)
        .ok_or_else(|| ColladaError::invalid_number("cn", doc.text(cn)))
}

fn symbol_ref(doc: &Document, csymbol: ElementId) -> Result<String> {
    match doc.attr(csymbol, "encoding") {
        Some("COLLADA") => Ok(doc.text(csymbol).to_string()),
        other => Err(ColladaError::unsupported(format!(
            "csymbol encoding {}",
            other.unwrap_or("<none>")
        ))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn parse(math_body: &str) -> Result<LinearFormula> {
        let xml = format!(
            r#"<formula sid="f" xmlns:math="http://www.w3.org/1998/Math/MathML">
                <technique_common><math:math>{math_body}</math:math></technique_common>
            </formula>"#
        );
        let doc = Document::parse(&xml).unwrap();
        let math = formula_math(&doc, doc.root());
        parse_mimic_formula(&doc, math[0])
    }

    #[test]
    fn test_affine_formula() {
        let f = parse(
            r#"<math:apply><math:plus/>
                <math:apply><math:times/>
                    <math:csymbol encoding="COLLADA">kmodel0/j1</math:csymbol>
                    <math:cn>2.0</math:cn>
                </math:apply>
                <math:cn>0.5</math:cn>
            </math:apply>"#,
        )
        .unwrap();
        assert_eq!(f.symbol, "kmodel0/j1");
        assert_relative_eq!(f.multiplier, 2.0);
        assert_relative_eq!(f.offset, 0.5);
    }

    #[test]
    fn test_affine_formula_swapped_operands() {
        let f = parse(
            r#"<math:apply><math:plus/>
                <math:cn>-1.25</math:cn>
                <math:apply><math:times/>
                    <math:cn>3</math:cn>
                    <math:csymbol encoding="COLLADA">j1</math:csymbol>
                </math:apply>
            </math:apply>"#,
        )
        .unwrap();
        assert_relative_eq!(f.multiplier, 3.0);
        assert_relative_eq!(f.offset, -1.25);
    }

    #[test]
    fn test_plus_without_times() {
        let f = parse(
            r#"<math:apply><math:plus/>
                <math:csymbol encoding="COLLADA">j1</math:csymbol><math:cn>0.1</math:cn>
            </math:apply>"#,
        )
        .unwrap();
        assert_relative_eq!(f.multiplier, 1.0);
        assert_relative_eq!(f.offset, 0.1);
    }

    #[test]
    fn test_minus_ignores_offset_term() {
        // A trailing constant under minus is not read; the offset stays 0.
        let f = parse(
            r#"<math:apply><math:minus/>
                <math:csymbol encoding="COLLADA">j1</math:csymbol><math:cn>0.3</math:cn>
            </math:apply>"#,
        )
        .unwrap();
        assert_relative_eq!(f.multiplier, -1.0);
        assert_relative_eq!(f.offset, 0.0);
    }

    #[test]
    fn test_bare_symbol() {
        let f = parse(r#"<math:apply><math:csymbol encoding="COLLADA">j1</math:csymbol></math:apply>"#)
            .unwrap();
        assert_eq!(f.symbol, "j1");
        assert_relative_eq!(f.multiplier, 1.0);
        assert_relative_eq!(f.offset, 0.0);
    }

    #[test]
    fn test_rejected_shapes() {
        let err = parse(
            r#"<math:apply><math:times/>
                <math:csymbol encoding="COLLADA">j1</math:csymbol><math:cn>2</math:cn>
            </math:apply>"#,
        )
        .unwrap_err();
        assert!(matches!(err, ColladaError::UnsupportedShape(_)));
        assert!(!err.is_fatal());

        let err = parse(r#"<math:apply><math:csymbol encoding="MathML">j1</math:csymbol></math:apply>"#)
            .unwrap_err();
        assert!(matches!(err, ColladaError::UnsupportedShape(_)));

        let err = parse(
            r#"<math:apply><math:plus/>
                <math:csymbol encoding="COLLADA">j1</math:csymbol><math:cn>abc</math:cn>
            </math:apply>"#,
        )
        .unwrap_err();
        assert!(matches!(err, ColladaError::InvalidNumber { .. }));
    }

    #[test]
    fn test_openrave_equation_preferred() {
        let doc = Document::parse(
            r#"<formula sid="f">
                <technique_common><math><apply><csymbol encoding="COLLADA">common</csymbol></apply></math></technique_common>
                <technique profile="OpenRAVE">
                    <equation type="first_partial" target="j1"><cn>2</cn></equation>
                    <equation type="position"><math><apply><minus/><csymbol encoding="COLLADA">rave</csymbol></apply></math></equation>
                </technique>
            </formula>"#,
        )
        .unwrap();
        let math = formula_math(&doc, doc.root());
        assert_eq!(math.len(), 2);
        let f = parse_mimic_formula(&doc, math[0]).unwrap();
        assert_eq!(f.symbol, "rave");
        assert_relative_eq!(f.multiplier, -1.0);
        let f = parse_mimic_formula(&doc, math[1]).unwrap();
        assert_eq!(f.symbol, "common");
    }
}
