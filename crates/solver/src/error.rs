use thiserror::Error;

/// Input errors detected before any iteration starts.
///
/// Numerical outcomes (singular steps, non-convergence, divergence) are not
/// errors; they are reported through [`crate::SolverResult`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolverError {
    #[error("constraint `{constraint}` references unknown component `{component}`")]
    UnknownComponent {
        constraint: String,
        component: String,
    },

    #[error("component id `{component}` appears more than once in the assembly")]
    DuplicateComponent { component: String },

    #[error("constraint id `{constraint}` appears more than once in the assembly")]
    DuplicateConstraint { constraint: String },

    #[error("assembly has {constraints} constraint(s) but no components")]
    EmptyAssembly { constraints: usize },

    #[error("component `{component}` has a non-finite position, orientation or radius")]
    NonFiniteInput { component: String },

    #[error("component `{component}` is invalid: {reason}")]
    InvalidComponent { component: String, reason: String },

    #[error("constraint `{constraint}` is invalid: {reason}")]
    InvalidConstraint { constraint: String, reason: String },

    #[error("invalid solver configuration: {0}")]
    InvalidConfig(String),
}
