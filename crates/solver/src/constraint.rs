use serde::{Deserialize, Serialize};

use crate::assembly::ComponentId;
use crate::geometry::Point3;

/// A geometric relationship between one or two components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub id: String,
    #[serde(flatten)]
    pub kind: ConstraintKind,
    /// Per-constraint satisfaction threshold for reporting. Falls back to
    /// the solver tolerance when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<f64>,
    /// Scales this constraint's residual and Jacobian row.
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

/// The closed set of constraint kinds.
///
/// Component references live inside each variant, so a two-component kind
/// can never be built with one side missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConstraintKind {
    /// Both component positions coincide. Residual `|p_B - p_A|`.
    Coincident {
        element_a: ComponentId,
        element_b: ComponentId,
    },
    /// Signed distance error `|p_B - p_A| - value`.
    Distance {
        element_a: ComponentId,
        element_b: ComponentId,
        value: f64,
    },
    /// Pins a component where it starts. Pinned components are removed from
    /// the free variables, so the residual is always zero.
    Fixed { element_a: ComponentId },
    /// Directions are parallel or anti-parallel. Residual `|cos t| - 1`.
    Parallel {
        element_a: ComponentId,
        element_b: ComponentId,
    },
    /// Directions are perpendicular. Residual `cos t`.
    Perpendicular {
        element_a: ComponentId,
        element_b: ComponentId,
    },
    /// Angle between directions, `value` in degrees.
    Angle {
        element_a: ComponentId,
        element_b: ComponentId,
        value: f64,
    },
    /// External tangency of the components' `radius` properties.
    Tangent {
        element_a: ComponentId,
        element_b: ComponentId,
    },
    /// `p_B` is the mirror image of `p_A` across `plane`.
    Symmetric {
        element_a: ComponentId,
        element_b: ComponentId,
        #[serde(default)]
        plane: SymmetryPlane,
    },
}

/// Axis-aligned mirror plane used by symmetric constraints.
///
/// The plane is normal to `axis` and passes through `offset` on that axis.
/// The default is the YZ-plane through the origin, i.e. left/right symmetry
/// about a cabinet's centre line when the carcass is centred on x = 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SymmetryPlane {
    pub axis: Axis,
    #[serde(default)]
    pub offset: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    #[default]
    X,
    Y,
    Z,
}

impl SymmetryPlane {
    pub fn new(axis: Axis, offset: f64) -> Self {
        Self { axis, offset }
    }

    /// Reflect a point across the plane.
    pub fn mirror(&self, p: &Point3) -> Point3 {
        let twice = 2.0 * self.offset;
        match self.axis {
            Axis::X => Point3::new(twice - p.x, p.y, p.z),
            Axis::Y => Point3::new(p.x, twice - p.y, p.z),
            Axis::Z => Point3::new(p.x, p.y, twice - p.z),
        }
    }
}

impl Constraint {
    pub fn new(id: impl Into<String>, kind: ConstraintKind) -> Self {
        Self {
            id: id.into(),
            kind,
            tolerance: None,
            weight: 1.0,
        }
    }

    pub fn coincident(id: impl Into<String>, a: impl Into<String>, b: impl Into<String>) -> Self {
        Self::new(
            id,
            ConstraintKind::Coincident {
                element_a: a.into(),
                element_b: b.into(),
            },
        )
    }

    pub fn distance(
        id: impl Into<String>,
        a: impl Into<String>,
        b: impl Into<String>,
        value: f64,
    ) -> Self {
        Self::new(
            id,
            ConstraintKind::Distance {
                element_a: a.into(),
                element_b: b.into(),
                value,
            },
        )
    }

    pub fn fixed(id: impl Into<String>, component: impl Into<String>) -> Self {
        Self::new(
            id,
            ConstraintKind::Fixed {
                element_a: component.into(),
            },
        )
    }

    pub fn parallel(id: impl Into<String>, a: impl Into<String>, b: impl Into<String>) -> Self {
        Self::new(
            id,
            ConstraintKind::Parallel {
                element_a: a.into(),
                element_b: b.into(),
            },
        )
    }

    pub fn perpendicular(
        id: impl Into<String>,
        a: impl Into<String>,
        b: impl Into<String>,
    ) -> Self {
        Self::new(
            id,
            ConstraintKind::Perpendicular {
                element_a: a.into(),
                element_b: b.into(),
            },
        )
    }

    pub fn angle(
        id: impl Into<String>,
        a: impl Into<String>,
        b: impl Into<String>,
        degrees: f64,
    ) -> Self {
        Self::new(
            id,
            ConstraintKind::Angle {
                element_a: a.into(),
                element_b: b.into(),
                value: degrees,
            },
        )
    }

    pub fn tangent(id: impl Into<String>, a: impl Into<String>, b: impl Into<String>) -> Self {
        Self::new(
            id,
            ConstraintKind::Tangent {
                element_a: a.into(),
                element_b: b.into(),
            },
        )
    }

    pub fn symmetric(
        id: impl Into<String>,
        a: impl Into<String>,
        b: impl Into<String>,
        plane: SymmetryPlane,
    ) -> Self {
        Self::new(
            id,
            ConstraintKind::Symmetric {
                element_a: a.into(),
                element_b: b.into(),
                plane,
            },
        )
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = Some(tolerance);
        self
    }

    pub fn kind_name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn element_a(&self) -> &str {
        self.kind.element_a()
    }

    pub fn element_b(&self) -> Option<&str> {
        self.kind.element_b()
    }

    /// Numeric target for kinds that carry one (Distance, Angle).
    pub fn target(&self) -> Option<f64> {
        match &self.kind {
            ConstraintKind::Distance { value, .. } | ConstraintKind::Angle { value, .. } => {
                Some(*value)
            }
            _ => None,
        }
    }

    /// All referenced component ids, `element_a` first.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.element_a()).chain(self.element_b())
    }
}

impl ConstraintKind {
    pub fn name(&self) -> &'static str {
        match self {
            ConstraintKind::Coincident { .. } => "coincident",
            ConstraintKind::Distance { .. } => "distance",
            ConstraintKind::Fixed { .. } => "fixed",
            ConstraintKind::Parallel { .. } => "parallel",
            ConstraintKind::Perpendicular { .. } => "perpendicular",
            ConstraintKind::Angle { .. } => "angle",
            ConstraintKind::Tangent { .. } => "tangent",
            ConstraintKind::Symmetric { .. } => "symmetric",
        }
    }

    pub fn element_a(&self) -> &str {
        match self {
            ConstraintKind::Coincident { element_a, .. }
            | ConstraintKind::Distance { element_a, .. }
            | ConstraintKind::Fixed { element_a }
            | ConstraintKind::Parallel { element_a, .. }
            | ConstraintKind::Perpendicular { element_a, .. }
            | ConstraintKind::Angle { element_a, .. }
            | ConstraintKind::Tangent { element_a, .. }
            | ConstraintKind::Symmetric { element_a, .. } => element_a,
        }
    }

    pub fn element_b(&self) -> Option<&str> {
        match self {
            ConstraintKind::Fixed { .. } => None,
            ConstraintKind::Coincident { element_b, .. }
            | ConstraintKind::Distance { element_b, .. }
            | ConstraintKind::Parallel { element_b, .. }
            | ConstraintKind::Perpendicular { element_b, .. }
            | ConstraintKind::Angle { element_b, .. }
            | ConstraintKind::Tangent { element_b, .. }
            | ConstraintKind::Symmetric { element_b, .. } => Some(element_b),
        }
    }

    /// True for kinds that only depend on component orientation.
    pub fn is_directional(&self) -> bool {
        matches!(
            self,
            ConstraintKind::Parallel { .. }
                | ConstraintKind::Perpendicular { .. }
                | ConstraintKind::Angle { .. }
        )
    }

    /// Number of scalar degrees of freedom this kind removes, over position
    /// variables and (when solved) orientation variables.
    pub fn dof_removed(&self, orientations_free: bool) -> i64 {
        match self {
            ConstraintKind::Fixed { .. } => {
                if orientations_free {
                    6
                } else {
                    3
                }
            }
            ConstraintKind::Coincident { .. } | ConstraintKind::Symmetric { .. } => 3,
            ConstraintKind::Distance { .. } | ConstraintKind::Tangent { .. } => 1,
            ConstraintKind::Parallel { .. } => {
                if orientations_free {
                    2
                } else {
                    0
                }
            }
            ConstraintKind::Perpendicular { .. } | ConstraintKind::Angle { .. } => {
                if orientations_free {
                    1
                } else {
                    0
                }
            }
        }
    }
}
