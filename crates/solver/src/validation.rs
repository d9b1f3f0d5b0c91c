//! Constraint-system validation.
//!
//! Runs before solving and never iterates. Reports structural input
//! problems, missing anchors, degree-of-freedom balance and the numerical
//! rank of the Jacobian at the initial guess.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use nalgebra::SVD;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::assembly::{Assembly, PositionMap};
use crate::constraint::ConstraintKind;
use crate::error::SolverError;
use crate::jacobian::build_jacobian;
use crate::linalg::{self, Matrix};
use crate::solver::SolverConfig;
use crate::system::{ConstraintSystem, check_assembly};

/// Targets closer than this are treated as the same value.
const TARGET_EPS: f64 = 1e-9;

/// Severity of a validation finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    /// Makes the system invalid.
    Error,
    /// Informational, may be intentional.
    Warning,
}

/// Classification of validation findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IssueCode {
    UnknownComponent,
    DuplicateComponent,
    DuplicateConstraint,
    EmptyAssembly,
    InvalidConstraint,
    InvalidComponent,
    NonFiniteInput,
    /// Constraint references the same component twice.
    SelfReference,
    /// No Fixed constraint, so the whole assembly can move as a rigid body.
    NoFixedConstraint,
    /// More degrees of freedom removed than exist.
    OverConstrained,
    /// Degrees of freedom remain after all constraints.
    UnderConstrained,
    /// Same kind on the same pair with different targets.
    ConflictingConstraints,
    /// Jacobian rank is below the number of informative rows.
    RedundantConstraints,
    /// Direction-based constraint while orientations are held fixed.
    InertConstraint,
}

impl fmt::Display for IssueCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A single validation finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub code: IssueCode,
    pub severity: Severity,
    pub message: String,
    /// Offending constraint, when the finding is about one.
    pub constraint: Option<String>,
}

impl ValidationIssue {
    fn error(code: IssueCode, message: impl Into<String>) -> Self {
        Self {
            code,
            severity: Severity::Error,
            message: message.into(),
            constraint: None,
        }
    }

    fn warning(code: IssueCode, message: impl Into<String>) -> Self {
        Self {
            code,
            severity: Severity::Warning,
            message: message.into(),
            constraint: None,
        }
    }

    fn on(mut self, constraint: &str) -> Self {
        self.constraint = Some(constraint.to_string());
        self
    }
}

impl From<SolverError> for ValidationIssue {
    fn from(err: SolverError) -> Self {
        let (code, constraint) = match &err {
            SolverError::UnknownComponent { constraint, .. } => {
                (IssueCode::UnknownComponent, Some(constraint.clone()))
            }
            SolverError::DuplicateComponent { .. } => (IssueCode::DuplicateComponent, None),
            SolverError::DuplicateConstraint { constraint } => {
                (IssueCode::DuplicateConstraint, Some(constraint.clone()))
            }
            SolverError::EmptyAssembly { .. } => (IssueCode::EmptyAssembly, None),
            SolverError::NonFiniteInput { .. } => (IssueCode::NonFiniteInput, None),
            SolverError::InvalidComponent { .. } => (IssueCode::InvalidComponent, None),
            SolverError::InvalidConstraint { constraint, .. } => {
                (IssueCode::InvalidConstraint, Some(constraint.clone()))
            }
            SolverError::InvalidConfig(_) => (IssueCode::InvalidConstraint, None),
        };
        Self {
            code,
            severity: Severity::Error,
            message: err.to_string(),
            constraint,
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sev = match self.severity {
            Severity::Error => "ERROR",
            Severity::Warning => "WARN",
        };
        write!(f, "[{sev}] {}: {}", self.code, self.message)?;
        if let Some(c) = &self.constraint {
            write!(f, " (constraint {c})")?;
        }
        Ok(())
    }
}

/// Outcome of [`validate_constraint_system`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// True when there are no errors. Warnings do not affect validity.
    pub is_valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    /// Free variables minus the degrees of freedom removed by constraints.
    /// Negative means over-constrained.
    pub degrees_of_freedom: i64,
    /// Numerical rank of the Jacobian at the initial guess. `None` when the
    /// system could not be compiled.
    pub structural_rank: Option<usize>,
}

impl ValidationReport {
    /// Error messages as plain strings.
    pub fn error_messages(&self) -> Vec<String> {
        self.errors.iter().map(|e| e.message.clone()).collect()
    }

    pub fn has_error(&self, code: IssueCode) -> bool {
        self.errors.iter().any(|e| e.code == code)
    }

    pub fn has_warning(&self, code: IssueCode) -> bool {
        self.warnings.iter().any(|w| w.code == code)
    }
}

/// Validate with the default solver configuration.
pub fn validate_constraint_system(assembly: &Assembly) -> ValidationReport {
    validate_with_config(assembly, &SolverConfig::default())
}

/// Validate against a given configuration.
///
/// The configuration decides whether orientations count as free variables.
#[instrument(skip_all, fields(
    assembly = %assembly.metadata.name,
    components = assembly.components.len(),
    constraints = assembly.constraints.len()
))]
pub fn validate_with_config(assembly: &Assembly, config: &SolverConfig) -> ValidationReport {
    let mut issues: Vec<ValidationIssue> = check_assembly(assembly)
        .into_iter()
        .map(ValidationIssue::from)
        .collect();
    let structurally_sound = issues.is_empty();

    for c in &assembly.constraints {
        if c.element_b() == Some(c.element_a()) {
            issues.push(
                ValidationIssue::error(
                    IssueCode::SelfReference,
                    format!(
                        "{} constraint '{}' references '{}' twice",
                        c.kind_name(),
                        c.id,
                        c.element_a()
                    ),
                )
                .on(&c.id),
            );
        }
    }
    issues.extend(conflicting_targets(assembly));

    if !config.solve_orientations {
        for c in assembly.constraints.iter().filter(|c| c.kind.is_directional()) {
            issues.push(
                ValidationIssue::warning(
                    IssueCode::InertConstraint,
                    format!(
                        "{} constraint '{}' depends only on orientations, which are not \
                         solved; enable solve_orientations to enforce it",
                        c.kind_name(),
                        c.id
                    ),
                )
                .on(&c.id),
            );
        }
    }

    let has_anchor = assembly
        .constraints
        .iter()
        .any(|c| matches!(c.kind, ConstraintKind::Fixed { .. }));
    if !assembly.components.is_empty() && !has_anchor {
        issues.push(ValidationIssue::error(
            IssueCode::NoFixedConstraint,
            "no fixed constraint: the assembly can drift as a rigid body",
        ));
    }

    let dof = degrees_of_freedom(assembly, config.solve_orientations);
    if dof < 0 {
        issues.push(ValidationIssue::error(
            IssueCode::OverConstrained,
            format!("over-constrained by {} degree(s) of freedom", -dof),
        ));
    } else if dof > 0 && !assembly.components.is_empty() {
        issues.push(ValidationIssue::warning(
            IssueCode::UnderConstrained,
            format!(
                "{dof} degree(s) of freedom remain after {} constraint(s)",
                assembly.constraints.len()
            ),
        ));
    }

    let mut structural_rank = None;
    if structurally_sound {
        match ConstraintSystem::compile(assembly, &PositionMap::new(), config.solve_orientations) {
            Ok(system) => {
                let (rank, informative) = jacobian_rank(&system, config.fd_step);
                if rank < informative {
                    issues.push(ValidationIssue::warning(
                        IssueCode::RedundantConstraints,
                        format!(
                            "{} constraint row(s) are linearly dependent at the initial guess \
                             (rank {rank} of {informative})",
                            informative - rank
                        ),
                    ));
                }
                structural_rank = Some(rank);
            }
            Err(err) => issues.push(err.into()),
        }
    }

    let (errors, warnings): (Vec<_>, Vec<_>) = issues
        .into_iter()
        .partition(|i| i.severity == Severity::Error);

    info!(
        dof,
        errors = errors.len(),
        warnings = warnings.len(),
        rank = ?structural_rank,
        "validation complete"
    );

    ValidationReport {
        is_valid: errors.is_empty(),
        errors,
        warnings,
        degrees_of_freedom: dof,
        structural_rank,
    }
}

/// `stride * components - sum of DOF removed by each constraint`.
///
/// A component pinned by several Fixed constraints is only counted once.
pub fn degrees_of_freedom(assembly: &Assembly, solve_orientations: bool) -> i64 {
    let stride: i64 = if solve_orientations { 6 } else { 3 };
    let mut removed: i64 = 0;
    let mut pinned = BTreeSet::new();
    for c in &assembly.constraints {
        if matches!(c.kind, ConstraintKind::Fixed { .. }) && !pinned.insert(c.element_a()) {
            continue;
        }
        removed += c.kind.dof_removed(solve_orientations);
    }
    stride * assembly.components.len() as i64 - removed
}

/// Distance and Angle constraints on the same unordered pair that disagree
/// on their target.
fn conflicting_targets(assembly: &Assembly) -> Vec<ValidationIssue> {
    let mut seen: BTreeMap<(&str, &str, &str), (&str, f64)> = BTreeMap::new();
    let mut issues = Vec::new();
    for c in &assembly.constraints {
        let (Some(b), Some(target)) = (c.element_b(), c.target()) else {
            continue;
        };
        let a = c.element_a();
        let pair = if a <= b { (a, b) } else { (b, a) };
        let key = (c.kind_name(), pair.0, pair.1);
        match seen.get(&key) {
            Some((other, value)) if (value - target).abs() > TARGET_EPS => {
                issues.push(
                    ValidationIssue::error(
                        IssueCode::ConflictingConstraints,
                        format!(
                            "{} constraints '{other}' ({value}) and '{}' ({target}) disagree on \
                             '{}'/'{}'",
                            c.kind_name(),
                            c.id,
                            pair.0,
                            pair.1
                        ),
                    )
                    .on(&c.id),
                );
            }
            Some(_) => {}
            None => {
                seen.insert(key, (c.id.as_str(), target));
            }
        }
    }
    issues
}

/// SVD rank of the Jacobian's informative rows, and how many such rows there are.
fn jacobian_rank(system: &ConstraintSystem, fd_step: f64) -> (usize, usize) {
    let jac = build_jacobian(system, &system.initial_state(), fd_step);
    let rows: Vec<usize> = (0..jac.rows())
        .filter(|&i| linalg::norm(jac.row(i)) > 1e-14)
        .collect();
    if rows.is_empty() || jac.cols() == 0 {
        return (0, 0);
    }
    let informative: Matrix = jac.select_rows(&rows);
    let (m, n) = (informative.rows(), informative.cols());
    let svd = SVD::new(informative.to_nalgebra(), false, false);
    let sv = &svd.singular_values;
    let max_sv = sv.iter().cloned().fold(0.0_f64, f64::max);
    let threshold = max_sv * (m.max(n) as f64) * f64::EPSILON;
    let rank = sv.iter().filter(|&&s| s > threshold).count();
    (rank, m)
}
