//! Constraint residual evaluation.
//!
//! Each constraint yields exactly one scalar residual, zero when satisfied,
//! multiplied by the constraint's weight.

use crate::assembly::{Assembly, PositionMap};
use crate::constraint::{Constraint, ConstraintKind};
use crate::error::SolverError;
use crate::system::{Body, CompiledConstraint, ConstraintSystem, Pose};

/// Unweighted residual for one constraint kind.
///
/// `b` is `None` only for Fixed, which has no second component.
pub fn evaluate(kind: &ConstraintKind, a: &Body, b: Option<&Body>) -> f64 {
    let Some(b) = b else {
        return 0.0;
    };
    let pa = a.pose.position;
    let pb = b.pose.position;
    match kind {
        ConstraintKind::Coincident { .. } => (pb - pa).length(),
        ConstraintKind::Distance { value, .. } => (pb - pa).length() - value,
        ConstraintKind::Fixed { .. } => 0.0,
        ConstraintKind::Parallel { .. } => {
            let cos = a.pose.orientation.direction().cos_angle_to(&b.pose.orientation.direction());
            cos.abs() - 1.0
        }
        ConstraintKind::Perpendicular { .. } => a
            .pose
            .orientation
            .direction()
            .cos_angle_to(&b.pose.orientation.direction()),
        ConstraintKind::Angle { value, .. } => {
            let actual = a
                .pose
                .orientation
                .direction()
                .angle_to(&b.pose.orientation.direction());
            actual.to_degrees() - value
        }
        ConstraintKind::Tangent { .. } => (pb - pa).length() - (a.radius + b.radius),
        ConstraintKind::Symmetric { plane, .. } => pb.distance_to(&plane.mirror(&pa)),
    }
}

/// Weighted residual of a compiled constraint at `state`.
pub(crate) fn weighted(system: &ConstraintSystem, c: &CompiledConstraint, state: &[f64]) -> f64 {
    let a = system.body(c.a, state);
    let b = c.b.map(|b| system.body(b, state));
    c.weight * evaluate(&c.kind, &a, b.as_ref())
}

/// One weighted residual per constraint, in constraint order.
pub fn residual_vector(system: &ConstraintSystem, state: &[f64]) -> Vec<f64> {
    system
        .constraints
        .iter()
        .map(|c| weighted(system, c, state))
        .collect()
}

/// Weighted error of a single constraint against explicit positions.
///
/// Components missing from `positions` are evaluated at their stored
/// position. Orientation and radius always come from the assembly.
pub fn constraint_error(
    constraint: &Constraint,
    assembly: &Assembly,
    positions: &PositionMap,
) -> Result<f64, SolverError> {
    let body = |id: &str| -> Result<Body, SolverError> {
        let component = assembly
            .component(id)
            .ok_or_else(|| SolverError::UnknownComponent {
                constraint: constraint.id.clone(),
                component: id.to_string(),
            })?;
        Ok(Body {
            pose: Pose {
                position: positions.get(id).copied().unwrap_or(component.position),
                orientation: component.orientation,
            },
            radius: component.radius(),
        })
    };

    let a = body(constraint.element_a())?;
    let b = constraint.element_b().map(body).transpose()?;
    Ok(constraint.weight * evaluate(&constraint.kind, &a, b.as_ref()))
}
