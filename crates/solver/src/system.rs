//! Compiled form of an assembly.
//!
//! Component ids are resolved to indices once, and every component that is
//! not pinned by a Fixed constraint is given a slot in the flat state vector.
//! Layout per free component: `[x, y, z]`, or `[x, y, z, roll, pitch, yaw]`
//! when orientations are solved.

use std::collections::{HashMap, HashSet};

use crate::assembly::{Assembly, OrientationMap, PositionMap};
use crate::constraint::{Constraint, ConstraintKind};
use crate::error::SolverError;
use crate::geometry::{EulerAngles, Point3};

/// Position and orientation of one component at one state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Point3,
    pub orientation: EulerAngles,
}

/// What the residual evaluator needs to know about a component.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Body {
    pub pose: Pose,
    pub radius: f64,
}

#[derive(Debug, Clone)]
struct ComponentState {
    id: String,
    start: Pose,
    radius: f64,
}

#[derive(Debug, Clone)]
pub(crate) struct CompiledConstraint {
    pub id: String,
    pub kind: ConstraintKind,
    pub a: usize,
    pub b: Option<usize>,
    pub weight: f64,
    pub tolerance: Option<f64>,
}

/// Map from component index to its offset in the state vector.
#[derive(Debug, Clone)]
pub(crate) struct VariableMap {
    offsets: Vec<Option<usize>>,
    stride: usize,
    len: usize,
}

impl VariableMap {
    fn new(pinned: &[bool], solve_orientations: bool) -> Self {
        let stride = if solve_orientations { 6 } else { 3 };
        let mut len = 0;
        let offsets = pinned
            .iter()
            .map(|&is_pinned| {
                if is_pinned {
                    None
                } else {
                    let off = len;
                    len += stride;
                    Some(off)
                }
            })
            .collect();
        Self {
            offsets,
            stride,
            len,
        }
    }

    pub fn offset(&self, component: usize) -> Option<usize> {
        self.offsets[component]
    }

    /// State-vector indices owned by a component (empty when pinned).
    pub fn range(&self, component: usize) -> std::ops::Range<usize> {
        match self.offsets[component] {
            Some(off) => off..off + self.stride,
            None => 0..0,
        }
    }

    /// Indices of the position coordinates only.
    pub fn position_range(&self, component: usize) -> std::ops::Range<usize> {
        match self.offsets[component] {
            Some(off) => off..off + 3,
            None => 0..0,
        }
    }

    pub fn solves_orientations(&self) -> bool {
        self.stride == 6
    }

    pub fn len(&self) -> usize {
        self.len
    }
}

/// An assembly resolved against an initial guess, ready to iterate on.
#[derive(Debug, Clone)]
pub struct ConstraintSystem {
    components: Vec<ComponentState>,
    pub(crate) constraints: Vec<CompiledConstraint>,
    pub(crate) vars: VariableMap,
}

impl ConstraintSystem {
    /// Resolve ids and lay out free variables.
    ///
    /// Components absent from `initial` start at their stored position.
    pub fn compile(
        assembly: &Assembly,
        initial: &PositionMap,
        solve_orientations: bool,
    ) -> Result<Self, SolverError> {
        if let Some(err) = check_assembly(assembly).into_iter().next() {
            return Err(err);
        }

        let index: HashMap<&str, usize> = assembly
            .components
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id.as_str(), i))
            .collect();

        let mut components = Vec::with_capacity(assembly.components.len());
        for c in &assembly.components {
            let position = initial.get(&c.id).copied().unwrap_or(c.position);
            if !position.is_finite() || !c.orientation.is_finite() || !c.radius().is_finite() {
                return Err(SolverError::NonFiniteInput {
                    component: c.id.clone(),
                });
            }
            components.push(ComponentState {
                id: c.id.clone(),
                start: Pose {
                    position,
                    orientation: c.orientation,
                },
                radius: c.radius(),
            });
        }

        let mut pinned = vec![false; components.len()];
        let mut constraints = Vec::with_capacity(assembly.constraints.len());
        for c in &assembly.constraints {
            // Every reference was checked above.
            let a = index[c.element_a()];
            let b = c.element_b().map(|id| index[id]);
            if matches!(c.kind, ConstraintKind::Fixed { .. }) {
                pinned[a] = true;
            }
            constraints.push(CompiledConstraint {
                id: c.id.clone(),
                kind: c.kind.clone(),
                a,
                b,
                weight: c.weight,
                tolerance: c.tolerance,
            });
        }

        let vars = VariableMap::new(&pinned, solve_orientations);
        Ok(Self {
            components,
            constraints,
            vars,
        })
    }

    pub fn num_variables(&self) -> usize {
        self.vars.len()
    }

    pub fn num_constraints(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_pinned(&self, component: usize) -> bool {
        self.vars.offset(component).is_none()
    }

    /// The state vector at the initial guess.
    pub fn initial_state(&self) -> Vec<f64> {
        let mut state = vec![0.0; self.vars.len()];
        for (i, c) in self.components.iter().enumerate() {
            if let Some(off) = self.vars.offset(i) {
                state[off..off + 3].copy_from_slice(&c.start.position.to_array());
                if self.vars.solves_orientations() {
                    state[off + 3..off + 6].copy_from_slice(&c.start.orientation.to_array());
                }
            }
        }
        state
    }

    pub fn pose(&self, component: usize, state: &[f64]) -> Pose {
        let start = self.components[component].start;
        match self.vars.offset(component) {
            None => start,
            Some(off) => {
                let position = Point3::new(state[off], state[off + 1], state[off + 2]);
                let orientation = if self.vars.solves_orientations() {
                    EulerAngles::new(state[off + 3], state[off + 4], state[off + 5])
                } else {
                    start.orientation
                };
                Pose {
                    position,
                    orientation,
                }
            }
        }
    }

    pub fn body(&self, component: usize, state: &[f64]) -> Body {
        Body {
            pose: self.pose(component, state),
            radius: self.components[component].radius,
        }
    }

    /// Free state indices a constraint depends on, in component order.
    pub(crate) fn constraint_variables(&self, c: &CompiledConstraint) -> Vec<usize> {
        let mut vars: Vec<usize> = self.vars.range(c.a).collect();
        match c.b {
            Some(b) if b != c.a => vars.extend(self.vars.range(b)),
            _ => {}
        }
        vars
    }

    pub fn positions(&self, state: &[f64]) -> PositionMap {
        (0..self.components.len())
            .map(|i| (self.components[i].id.clone(), self.pose(i, state).position))
            .collect()
    }

    pub fn orientations(&self, state: &[f64]) -> OrientationMap {
        (0..self.components.len())
            .map(|i| {
                (
                    self.components[i].id.clone(),
                    self.pose(i, state).orientation,
                )
            })
            .collect()
    }
}

/// Every structural input problem in an assembly, in discovery order.
///
/// `solve` stops at the first entry; validation reports all of them.
pub fn check_assembly(assembly: &Assembly) -> Vec<SolverError> {
    let mut problems = Vec::new();

    if assembly.components.is_empty() && !assembly.constraints.is_empty() {
        problems.push(SolverError::EmptyAssembly {
            constraints: assembly.constraints.len(),
        });
    }

    let mut seen = HashSet::new();
    for c in &assembly.components {
        if !seen.insert(c.id.as_str()) {
            problems.push(SolverError::DuplicateComponent {
                component: c.id.clone(),
            });
        }
        let radius = c.radius();
        if !radius.is_finite() {
            problems.push(SolverError::NonFiniteInput {
                component: c.id.clone(),
            });
        } else if radius < 0.0 {
            problems.push(SolverError::InvalidComponent {
                component: c.id.clone(),
                reason: format!("radius must be non-negative, got {radius}"),
            });
        }
    }

    let mut seen_constraints = HashSet::new();
    for c in &assembly.constraints {
        if !seen_constraints.insert(c.id.as_str()) {
            problems.push(SolverError::DuplicateConstraint {
                constraint: c.id.clone(),
            });
        }
        for component in c.components() {
            if !seen.contains(component) {
                problems.push(SolverError::UnknownComponent {
                    constraint: c.id.clone(),
                    component: component.to_string(),
                });
            }
        }
        if let Some(reason) = constraint_problem(c) {
            problems.push(SolverError::InvalidConstraint {
                constraint: c.id.clone(),
                reason,
            });
        }
    }

    problems
}

fn constraint_problem(c: &Constraint) -> Option<String> {
    if !c.weight.is_finite() || c.weight <= 0.0 {
        return Some(format!("weight must be positive and finite, got {}", c.weight));
    }
    if let Some(tol) = c.tolerance {
        if !tol.is_finite() || tol < 0.0 {
            return Some(format!("tolerance must be non-negative and finite, got {tol}"));
        }
    }
    match &c.kind {
        ConstraintKind::Distance { value, .. } if !value.is_finite() || *value < 0.0 => Some(
            format!("distance target must be non-negative and finite, got {value}"),
        ),
        ConstraintKind::Angle { value, .. } if !value.is_finite() => {
            Some(format!("angle target must be finite, got {value}"))
        }
        ConstraintKind::Symmetric { plane, .. } if !plane.offset.is_finite() => {
            Some(format!("symmetry plane offset must be finite, got {}", plane.offset))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::Component;
    use crate::constraint::Constraint;

    fn two_panels() -> Assembly {
        let mut asm = Assembly::new("test");
        asm.add_panel("a", Point3::new(0.0, 0.0, 0.0));
        asm.add_panel("b", Point3::new(10.0, 0.0, 0.0));
        asm
    }

    #[test]
    fn test_fixed_components_are_eliminated() {
        let mut asm = two_panels();
        asm.add_constraint(Constraint::fixed("f", "a"));
        asm.add_constraint(Constraint::distance("d", "a", "b", 5.0));
        let sys = ConstraintSystem::compile(&asm, &PositionMap::new(), false).unwrap();
        assert_eq!(sys.num_variables(), 3);
        assert!(sys.is_pinned(0));
        assert!(!sys.is_pinned(1));
        assert_eq!(sys.initial_state(), vec![10.0, 0.0, 0.0]);
    }

    #[test]
    fn test_orientation_layout() {
        let mut asm = Assembly::new("test");
        asm.add_component(
            Component::new("a", Point3::new(1.0, 2.0, 3.0))
                .with_orientation(EulerAngles::new(0.1, 0.2, 0.3)),
        );
        let sys = ConstraintSystem::compile(&asm, &PositionMap::new(), true).unwrap();
        assert_eq!(sys.initial_state(), vec![1.0, 2.0, 3.0, 0.1, 0.2, 0.3]);
        let pose = sys.pose(0, &[0.0, 0.0, 0.0, 0.0, 0.0, 0.5]);
        assert_eq!(pose.orientation.yaw, 0.5);
    }

    #[test]
    fn test_initial_positions_override_component_positions() {
        let asm = two_panels();
        let mut initial = PositionMap::new();
        initial.insert("b".into(), Point3::new(3.0, 4.0, 0.0));
        let sys = ConstraintSystem::compile(&asm, &initial, false).unwrap();
        let positions = sys.positions(&sys.initial_state());
        assert_eq!(positions["a"], Point3::ORIGIN);
        assert_eq!(positions["b"], Point3::new(3.0, 4.0, 0.0));
    }

    #[test]
    fn test_unknown_component_fails_fast() {
        let mut asm = two_panels();
        asm.add_constraint(Constraint::distance("d", "a", "missing", 5.0));
        let err = ConstraintSystem::compile(&asm, &PositionMap::new(), false).unwrap_err();
        assert_eq!(
            err,
            SolverError::UnknownComponent {
                constraint: "d".into(),
                component: "missing".into()
            }
        );
    }

    #[test]
    fn test_non_finite_initial_position_rejected() {
        let asm = two_panels();
        let mut initial = PositionMap::new();
        initial.insert("a".into(), Point3::new(f64::NAN, 0.0, 0.0));
        let err = ConstraintSystem::compile(&asm, &initial, false).unwrap_err();
        assert!(matches!(err, SolverError::NonFiniteInput { .. }));
    }

    #[test]
    fn test_check_assembly_collects_everything() {
        let mut asm = two_panels();
        asm.add_panel("a", Point3::ORIGIN);
        asm.add_constraint(Constraint::distance("d", "a", "x", -1.0));
        asm.add_constraint(Constraint::fixed("d", "y").with_weight(0.0));
        let problems = check_assembly(&asm);
        assert!(problems.contains(&SolverError::DuplicateComponent {
            component: "a".into()
        }));
        assert!(problems.contains(&SolverError::DuplicateConstraint {
            constraint: "d".into()
        }));
        let unknown = problems
            .iter()
            .filter(|p| matches!(p, SolverError::UnknownComponent { .. }))
            .count();
        assert_eq!(unknown, 2);
        let invalid = problems
            .iter()
            .filter(|p| matches!(p, SolverError::InvalidConstraint { .. }))
            .count();
        assert_eq!(invalid, 2);
    }

    #[test]
    fn test_bad_radius_rejected() {
        let mut asm = two_panels();
        asm.components[0]
            .properties
            .insert(crate::assembly::RADIUS_PROPERTY.into(), f64::NAN);
        asm.add_component(Component::new("c", Point3::ORIGIN).with_radius(-5.0));
        asm.add_constraint(Constraint::tangent("t", "a", "b"));

        let problems = check_assembly(&asm);
        assert!(problems.contains(&SolverError::NonFiniteInput {
            component: "a".into()
        }));
        assert!(
            problems
                .iter()
                .any(|p| matches!(p, SolverError::InvalidComponent { component, .. } if component == "c"))
        );
        let err = ConstraintSystem::compile(&asm, &PositionMap::new(), false).unwrap_err();
        assert_eq!(
            err,
            SolverError::NonFiniteInput {
                component: "a".into()
            }
        );
    }

    #[test]
    fn test_empty_assembly_with_constraints() {
        let mut asm = Assembly::new("empty");
        asm.add_constraint(Constraint::fixed("f", "ghost"));
        let problems = check_assembly(&asm);
        assert_eq!(problems[0], SolverError::EmptyAssembly { constraints: 1 });
    }
}
