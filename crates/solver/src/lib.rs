//! Geometric constraint solver for panel assemblies.
//!
//! Components are rigid bodies with a position and an orientation. Constraints
//! relate pairs of components (distance, coincidence, parallelism, ...) or pin
//! one in place. [`solve`] runs a damped Newton-Raphson iteration over the
//! free positions and returns the best layout it found, while
//! [`validate_constraint_system`] checks the constraint graph before solving.

pub mod assembly;
pub mod constraint;
pub mod error;
pub mod geometry;
pub mod jacobian;
pub mod linalg;
pub mod lu;
pub mod residual;
pub mod solver;
pub mod system;
pub mod validation;

pub use assembly::*;
pub use constraint::*;
pub use error::*;
pub use geometry::*;
pub use lu::StepMethod;
pub use residual::constraint_error;
pub use solver::*;
pub use system::ConstraintSystem;
pub use validation::*;
