//! Jacobian assembly: one row per constraint, one column per free variable.
//!
//! Distance, coincidence and tangency use the closed-form gradient of the
//! Euclidean distance. Every other kind uses centred finite differences over the free
//! variables of the components it references.

use crate::constraint::ConstraintKind;
use crate::geometry::Vec3;
use crate::linalg::Matrix;
use crate::residual;
use crate::system::{CompiledConstraint, ConstraintSystem};

/// Below this separation the distance gradient is undefined.
const MIN_SEPARATION: f64 = 1e-12;

/// Build the `(constraints x free variables)` Jacobian at `state`.
pub fn build_jacobian(system: &ConstraintSystem, state: &[f64], fd_step: f64) -> Matrix {
    let m = system.num_constraints();
    let n = system.num_variables();
    let mut jac = Matrix::zeros(m, n);
    let mut scratch = state.to_vec();

    for (i, c) in system.constraints.iter().enumerate() {
        match &c.kind {
            ConstraintKind::Distance { .. } => distance_row(system, c, state, true, jac.row_mut(i)),
            // Tangency is a distance with the radii as a constant offset.
            ConstraintKind::Tangent { .. } => {
                distance_row(system, c, state, true, jac.row_mut(i))
            }
            ConstraintKind::Coincident { .. } => {
                distance_row(system, c, state, false, jac.row_mut(i))
            }
            ConstraintKind::Fixed { .. }
            | ConstraintKind::Parallel { .. }
            | ConstraintKind::Perpendicular { .. }
            | ConstraintKind::Angle { .. }
            | ConstraintKind::Symmetric { .. } => {
                finite_difference_row(system, c, &mut scratch, fd_step, jac.row_mut(i))
            }
        }
    }
    jac
}

/// `d|p_B - p_A| / dp_A = (p_A - p_B) / |p_A - p_B|`, negated for `p_B`.
fn distance_row(
    system: &ConstraintSystem,
    c: &CompiledConstraint,
    state: &[f64],
    has_target: bool,
    row: &mut [f64],
) {
    let Some(b) = c.b else {
        return;
    };
    let pa = system.pose(c.a, state).position;
    let pb = system.pose(b, state).position;
    let d = pb - pa;
    let len = d.length();
    let unit = if len > MIN_SEPARATION {
        d / len
    } else if has_target {
        // Coincident endpoints with a separation target: push apart along +X.
        Vec3::X
    } else {
        return;
    };
    let grad_b = unit * c.weight;
    let grad_a = -grad_b;

    for (idx, g) in system.vars.position_range(c.a).zip(grad_a.to_array()) {
        row[idx] += g;
    }
    for (idx, g) in system.vars.position_range(b).zip(grad_b.to_array()) {
        row[idx] += g;
    }
}

/// Centred difference over every free variable the constraint touches.
///
/// The step is `fd_step * max(1, |x|)` so large coordinates are not lost to
/// rounding. `scratch` must equal the evaluation state and is restored.
fn finite_difference_row(
    system: &ConstraintSystem,
    c: &CompiledConstraint,
    scratch: &mut [f64],
    fd_step: f64,
    row: &mut [f64],
) {
    for j in system.constraint_variables(c) {
        let orig = scratch[j];
        let h = fd_step * orig.abs().max(1.0);
        scratch[j] = orig + h;
        let r_plus = residual::weighted(system, c, scratch);
        scratch[j] = orig - h;
        let r_minus = residual::weighted(system, c, scratch);
        scratch[j] = orig;
        row[j] = (r_plus - r_minus) / (2.0 * h);
    }
}
