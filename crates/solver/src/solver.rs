use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::assembly::{Assembly, OrientationMap, PositionMap};
use crate::error::SolverError;
use crate::jacobian::build_jacobian;
use crate::linalg::{self, Matrix};
use crate::lu::{StepMethod, solve_lu};
use crate::residual::residual_vector;
use crate::system::ConstraintSystem;
use crate::validation::{ValidationReport, validate_with_config};

/// Rows with a smaller norm are left unscaled by the preconditioner.
const PRECONDITION_MIN_NORM: f64 = 1e-12;

/// Configuration for the Newton-Raphson solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Convergence threshold on the residual norm.
    pub tolerance: f64,
    pub max_iterations: usize,
    /// Initial damping factor in (0, 1].
    pub damping: f64,
    /// Consecutive non-improving iterations tolerated before rolling back
    /// to the best iterate.
    pub rollback_threshold: usize,
    pub damping_growth: f64,
    pub damping_shrink: f64,
    pub min_damping: f64,
    /// Consecutive growing iterations at the damping floor that count as
    /// divergence.
    pub divergence_window: usize,
    /// Finite-difference step, scaled by `max(1, |x|)`.
    pub fd_step: f64,
    pub pivot_threshold: f64,
    /// Scale each Jacobian row (and its residual) to unit norm before solving.
    pub precondition: bool,
    /// Also solve component orientations, not only positions.
    pub solve_orientations: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-6,
            max_iterations: 100,
            damping: 1.0,
            rollback_threshold: 5,
            damping_growth: 1.05,
            damping_shrink: 0.7,
            min_damping: 1e-3,
            divergence_window: 5,
            fd_step: 1e-6,
            pivot_threshold: 1e-12,
            precondition: true,
            solve_orientations: false,
        }
    }
}

impl SolverConfig {
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_damping(mut self, damping: f64) -> Self {
        self.damping = damping;
        self
    }

    pub fn with_rollback_threshold(mut self, threshold: usize) -> Self {
        self.rollback_threshold = threshold;
        self
    }

    pub fn with_orientations(mut self, solve_orientations: bool) -> Self {
        self.solve_orientations = solve_orientations;
        self
    }

    pub fn with_precondition(mut self, precondition: bool) -> Self {
        self.precondition = precondition;
        self
    }

    pub fn validate(&self) -> Result<(), SolverError> {
        let positive = |name: &str, v: f64| {
            if v.is_finite() && v > 0.0 {
                Ok(())
            } else {
                Err(SolverError::InvalidConfig(format!(
                    "{name} must be positive and finite, got {v}"
                )))
            }
        };
        positive("tolerance", self.tolerance)?;
        positive("fd_step", self.fd_step)?;
        positive("pivot_threshold", self.pivot_threshold)?;
        positive("min_damping", self.min_damping)?;
        if !(self.min_damping..=1.0).contains(&self.damping) {
            return Err(SolverError::InvalidConfig(format!(
                "damping must lie in [{}, 1], got {}",
                self.min_damping, self.damping
            )));
        }
        if !(self.damping_growth.is_finite() && self.damping_growth >= 1.0) {
            return Err(SolverError::InvalidConfig(format!(
                "damping_growth must be >= 1, got {}",
                self.damping_growth
            )));
        }
        if !(self.damping_shrink > 0.0 && self.damping_shrink < 1.0) {
            return Err(SolverError::InvalidConfig(format!(
                "damping_shrink must lie in (0, 1), got {}",
                self.damping_shrink
            )));
        }
        if self.divergence_window == 0 {
            return Err(SolverError::InvalidConfig(
                "divergence_window must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Iteration controller states. The last three are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolverState {
    Initializing,
    Iterating,
    Converged,
    MaxIterationsReached,
    Diverged,
}

impl SolverState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SolverState::Converged | SolverState::MaxIterationsReached | SolverState::Diverged
        )
    }
}

/// One Newton iteration as seen by the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: usize,
    /// Residual norm at the tentative iterate.
    pub trial_error: f64,
    /// Best residual norm seen up to and including this iteration.
    pub best_error: f64,
    /// Damping used for this step.
    pub damping: f64,
    pub accepted: bool,
    pub rolled_back: bool,
    pub method: StepMethod,
    pub singular_pivots: usize,
    /// Constraint rows that carried information into the linear solve.
    pub rows_used: usize,
}

/// Final residual of one constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintReport {
    pub id: String,
    pub residual: f64,
    pub satisfied: bool,
}

/// Result of running the constraint solver.
///
/// Always describes the best iterate found, which is not necessarily the
/// last one visited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverResult {
    pub positions: PositionMap,
    pub orientations: OrientationMap,
    /// One weighted residual per constraint, in constraint order.
    pub residuals: Vec<f64>,
    pub constraint_reports: Vec<ConstraintReport>,
    pub iterations: usize,
    pub converged: bool,
    pub status: SolverState,
    /// Norm of `residuals`.
    pub error: f64,
    /// Residual norm at the initial guess.
    pub initial_error: f64,
    pub message: String,
    pub history: Vec<IterationRecord>,
}

impl SolverResult {
    /// Ids of constraints whose residual exceeds their tolerance.
    pub fn unsatisfied(&self) -> Vec<&str> {
        self.constraint_reports
            .iter()
            .filter(|r| !r.satisfied)
            .map(|r| r.id.as_str())
            .collect()
    }

    /// Write the solved positions (and orientations) back into `assembly`.
    pub fn apply_to(&self, assembly: &mut Assembly) {
        assembly.apply_positions(&self.positions);
        assembly.apply_orientations(&self.orientations);
    }
}

/// Newton-Raphson constraint solver.
///
/// Holds only configuration; every call to [`ConstraintSolver::solve`] works
/// on its own buffers, so one solver can be shared across threads.
#[derive(Debug, Clone, Default)]
pub struct ConstraintSolver {
    config: SolverConfig,
}

impl ConstraintSolver {
    pub fn new(config: SolverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Solve the assembly's constraints starting from `initial_positions`.
    ///
    /// Fails only on malformed input. Non-convergence and divergence are
    /// reported through the result.
    #[instrument(skip_all, fields(
        assembly = %assembly.metadata.name,
        components = assembly.components.len(),
        constraints = assembly.constraints.len()
    ))]
    pub fn solve(
        &self,
        assembly: &Assembly,
        initial_positions: &PositionMap,
    ) -> Result<SolverResult, SolverError> {
        self.config.validate()?;
        let system =
            ConstraintSystem::compile(assembly, initial_positions, self.config.solve_orientations)?;

        let outcome = NewtonIteration::new(&system, &self.config).run();
        let result = self.finish(&system, outcome);

        info!(
            status = ?result.status,
            iterations = result.iterations,
            error = result.error,
            initial_error = result.initial_error,
            "solve complete"
        );
        Ok(result)
    }

    /// Validate the assembly against this solver's configuration.
    pub fn validate_constraint_system(&self, assembly: &Assembly) -> ValidationReport {
        validate_with_config(assembly, &self.config)
    }

    fn finish(&self, system: &ConstraintSystem, outcome: Outcome) -> SolverResult {
        let residuals = residual_vector(system, &outcome.best);
        let error = linalg::norm(&residuals);
        let constraint_reports = system
            .constraints
            .iter()
            .zip(&residuals)
            .map(|(c, r)| ConstraintReport {
                id: c.id.clone(),
                residual: *r,
                satisfied: r.abs() <= c.tolerance.unwrap_or(self.config.tolerance),
            })
            .collect();

        let message = match outcome.status {
            SolverState::Converged => format!(
                "converged in {} iteration(s), error {:.3e}",
                outcome.iterations, error
            ),
            SolverState::MaxIterationsReached if system.num_variables() == 0 => format!(
                "no free variables to adjust, error {error:.3e}"
            ),
            SolverState::MaxIterationsReached => format!(
                "not converged after {} iteration(s), best error {:.3e}",
                outcome.iterations, error
            ),
            SolverState::Diverged => format!(
                "diverged after {} iteration(s), best error {:.3e}",
                outcome.iterations, error
            ),
            SolverState::Initializing | SolverState::Iterating => {
                format!("stopped in non-terminal state {:?}", outcome.status)
            }
        };

        SolverResult {
            positions: system.positions(&outcome.best),
            orientations: system.orientations(&outcome.best),
            residuals,
            constraint_reports,
            iterations: outcome.iterations,
            converged: outcome.status == SolverState::Converged,
            status: outcome.status,
            error,
            initial_error: outcome.initial_error,
            message,
            history: outcome.history,
        }
    }
}

/// Solve with the default configuration.
pub fn solve(
    assembly: &Assembly,
    initial_positions: &PositionMap,
) -> Result<SolverResult, SolverError> {
    ConstraintSolver::default().solve(assembly, initial_positions)
}

struct Outcome {
    status: SolverState,
    best: Vec<f64>,
    iterations: usize,
    initial_error: f64,
    history: Vec<IterationRecord>,
}

/// Working state of one Newton run. Lives only for the duration of a solve.
struct NewtonIteration<'a> {
    system: &'a ConstraintSystem,
    config: &'a SolverConfig,
    state: SolverState,
    x: Vec<f64>,
    residuals: Vec<f64>,
    error: f64,
    best: Vec<f64>,
    best_error: f64,
    damping: f64,
    no_improvement: usize,
    growth_streak: usize,
    last_trial_error: f64,
    history: Vec<IterationRecord>,
}

impl<'a> NewtonIteration<'a> {
    fn new(system: &'a ConstraintSystem, config: &'a SolverConfig) -> Self {
        let x = system.initial_state();
        let residuals = residual_vector(system, &x);
        let error = linalg::norm(&residuals);
        Self {
            system,
            config,
            state: SolverState::Initializing,
            best: x.clone(),
            x,
            residuals,
            error,
            best_error: error,
            damping: config.damping,
            no_improvement: 0,
            growth_streak: 0,
            last_trial_error: error,
            history: Vec::new(),
        }
    }

    fn run(mut self) -> Outcome {
        let initial_error = self.error;
        let mut iterations = 0;

        if !initial_error.is_finite() {
            warn!("initial residual is not finite");
            self.state = SolverState::Diverged;
        } else if self.error < self.config.tolerance {
            self.state = SolverState::Converged;
        } else if self.system.num_variables() == 0 {
            self.state = SolverState::MaxIterationsReached;
        } else {
            self.state = SolverState::Iterating;
        }

        while self.state == SolverState::Iterating {
            if iterations >= self.config.max_iterations {
                self.state = SolverState::MaxIterationsReached;
                break;
            }
            iterations += 1;
            self.step(iterations);
        }

        Outcome {
            status: self.state,
            best: self.best,
            iterations,
            initial_error,
            history: self.history,
        }
    }

    /// One Newton iteration: linearise, solve, damp, accept or reject.
    fn step(&mut self, iteration: usize) {
        let mut jacobian = build_jacobian(self.system, &self.x, self.config.fd_step);
        let mut rhs = self.residuals.clone();
        if self.config.precondition {
            precondition_rows(&mut jacobian, &mut rhs);
        }
        let step = solve_lu(&jacobian, &rhs, self.config.pivot_threshold);

        let damping = self.damping;
        let at_floor = damping <= self.config.min_damping;

        let (trial, trial_residuals, trial_error) = if step.is_zero() {
            (None, None, self.error)
        } else {
            let mut trial = self.x.clone();
            linalg::axpy(damping, &step.dx, &mut trial);
            let r = residual_vector(self.system, &trial);
            let e = linalg::norm(&r);
            (Some(trial), Some(r), e)
        };

        let improved = trial_error.is_finite() && trial_error < self.best_error;
        let mut rolled_back = false;

        if improved {
            if let (Some(trial), Some(r)) = (trial, trial_residuals) {
                self.best.clone_from(&trial);
                self.x = trial;
                self.residuals = r;
            }
            self.error = trial_error;
            self.best_error = trial_error;
            self.damping = (damping * self.config.damping_growth).min(1.0);
            self.no_improvement = 0;
        } else {
            self.no_improvement += 1;
            self.damping = (damping * self.config.damping_shrink).max(self.config.min_damping);
            // Keep drifting from the tentative point unless it is unusable.
            if trial_error.is_finite() {
                if let (Some(trial), Some(r)) = (trial, trial_residuals) {
                    self.x = trial;
                    self.residuals = r;
                    self.error = trial_error;
                }
            }
            if self.no_improvement > self.config.rollback_threshold {
                warn!(
                    iteration,
                    best_error = self.best_error,
                    current_error = self.error,
                    "no improvement, rolling back to best iterate"
                );
                self.x.clone_from(&self.best);
                self.residuals = residual_vector(self.system, &self.x);
                self.error = self.best_error;
                self.no_improvement = 0;
                rolled_back = true;
            }
        }

        let growing = !trial_error.is_finite() || trial_error > self.last_trial_error;
        if !improved && at_floor && growing {
            self.growth_streak += 1;
        } else {
            self.growth_streak = 0;
        }
        self.last_trial_error = trial_error;

        debug!(
            iteration,
            trial_error,
            best_error = self.best_error,
            damping,
            accepted = improved,
            method = ?step.method,
            "newton iteration"
        );
        self.history.push(IterationRecord {
            iteration,
            trial_error,
            best_error: self.best_error,
            damping,
            accepted: improved,
            rolled_back,
            method: step.method,
            singular_pivots: step.singular_pivots,
            rows_used: step.rows_used,
        });

        if self.error < self.config.tolerance {
            self.state = SolverState::Converged;
        } else if self.growth_streak >= self.config.divergence_window {
            warn!(
                iteration,
                trial_error,
                best_error = self.best_error,
                "error keeps growing at minimum damping, giving up"
            );
            self.state = SolverState::Diverged;
        }
    }
}

/// Scale every row of `J` and the matching residual by `1 / |row|`.
///
/// This is a left diagonal preconditioner, so the square system keeps the
/// same solution while its conditioning improves.
fn precondition_rows(jacobian: &mut Matrix, residuals: &mut [f64]) {
    for (i, r) in residuals.iter_mut().enumerate() {
        let row = jacobian.row_mut(i);
        let row_norm = linalg::norm(row);
        if row_norm > PRECONDITION_MIN_NORM {
            linalg::scale(row, 1.0 / row_norm);
            *r /= row_norm;
        }
    }
}
