//! Input data model: rigid components, constraints and the assembly that
//! owns them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::constraint::Constraint;
use crate::geometry::{EulerAngles, Point3};

/// Component identifiers are caller-chosen strings ("left_side", "shelf_2").
pub type ComponentId = String;

/// Solved or initial positions keyed by component id.
pub type PositionMap = BTreeMap<ComponentId, Point3>;

/// Orientations keyed by component id.
pub type OrientationMap = BTreeMap<ComponentId, EulerAngles>;

/// Property key read by tangency constraints.
pub const RADIUS_PROPERTY: &str = "radius";

/// One rigid furniture part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub id: ComponentId,
    pub position: Point3,
    #[serde(default)]
    pub orientation: EulerAngles,
    /// Free-form scalar properties (e.g. `radius`).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, f64>,
}

impl Component {
    pub fn new(id: impl Into<String>, position: Point3) -> Self {
        Self {
            id: id.into(),
            position,
            orientation: EulerAngles::IDENTITY,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_orientation(mut self, orientation: EulerAngles) -> Self {
        self.orientation = orientation;
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: f64) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn with_radius(self, radius: f64) -> Self {
        self.with_property(RADIUS_PROPERTY, radius)
    }

    pub fn property(&self, key: &str) -> Option<f64> {
        self.properties.get(key).copied()
    }

    /// Radius used by tangency; a component without one counts as a point.
    pub fn radius(&self) -> f64 {
        self.property(RADIUS_PROPERTY).unwrap_or(0.0)
    }
}

/// Identifying metadata carried with an assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssemblyMetadata {
    pub id: Uuid,
    pub name: String,
    /// Bumped every time the assembly is edited through [`Assembly`] methods.
    pub version: u32,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl AssemblyMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            version: 1,
            created: now,
            modified: now,
        }
    }
}

/// Components plus the constraints between them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assembly {
    pub metadata: AssemblyMetadata,
    #[serde(default)]
    pub components: Vec<Component>,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
}

impl Assembly {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            metadata: AssemblyMetadata::new(name),
            components: Vec::new(),
            constraints: Vec::new(),
        }
    }

    /// Add a component, returning its index.
    pub fn add_component(&mut self, component: Component) -> usize {
        let idx = self.components.len();
        self.components.push(component);
        self.touch();
        idx
    }

    /// Add a component at `position` with identity orientation.
    pub fn add_panel(&mut self, id: impl Into<String>, position: Point3) -> usize {
        self.add_component(Component::new(id, position))
    }

    pub fn add_constraint(&mut self, constraint: Constraint) {
        self.constraints.push(constraint);
        self.touch();
    }

    pub fn component(&self, id: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty() && self.constraints.is_empty()
    }

    /// The positions stored on the components themselves.
    pub fn positions(&self) -> PositionMap {
        self.components
            .iter()
            .map(|c| (c.id.clone(), c.position))
            .collect()
    }

    /// Write solved positions back into the components. Ids not present in
    /// the assembly are ignored.
    pub fn apply_positions(&mut self, positions: &PositionMap) {
        for component in &mut self.components {
            if let Some(p) = positions.get(&component.id) {
                component.position = *p;
            }
        }
        self.touch();
    }

    pub fn apply_orientations(&mut self, orientations: &OrientationMap) {
        for component in &mut self.components {
            if let Some(o) = orientations.get(&component.id) {
                component.orientation = *o;
            }
        }
        self.touch();
    }

    fn touch(&mut self) {
        self.metadata.version += 1;
        self.metadata.modified = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_radius_defaults_to_zero() {
        let plain = Component::new("shelf", Point3::ORIGIN);
        assert_eq!(plain.radius(), 0.0);
        let knob = Component::new("knob", Point3::ORIGIN).with_radius(12.5);
        assert_eq!(knob.radius(), 12.5);
    }

    #[test]
    fn test_add_and_lookup() {
        let mut asm = Assembly::new("wardrobe");
        assert!(asm.is_empty());
        let idx = asm.add_panel("left", Point3::new(0.0, 0.0, 0.0));
        asm.add_panel("right", Point3::new(800.0, 0.0, 0.0));
        assert_eq!(idx, 0);
        assert_eq!(asm.component("right").unwrap().position.x, 800.0);
        assert!(asm.component("top").is_none());
    }

    #[test]
    fn test_edits_bump_version() {
        let mut asm = Assembly::new("desk");
        let v0 = asm.metadata.version;
        asm.add_panel("top", Point3::ORIGIN);
        asm.add_constraint(Constraint::fixed("f", "top"));
        assert_eq!(asm.metadata.version, v0 + 2);
        assert!(asm.metadata.modified >= asm.metadata.created);
    }

    #[test]
    fn test_apply_positions_ignores_unknown_ids() {
        let mut asm = Assembly::new("shelf unit");
        asm.add_panel("a", Point3::ORIGIN);
        let mut solved = PositionMap::new();
        solved.insert("a".into(), Point3::new(1.0, 2.0, 3.0));
        solved.insert("ghost".into(), Point3::new(9.0, 9.0, 9.0));
        asm.apply_positions(&solved);
        assert_eq!(asm.components.len(), 1);
        assert_eq!(asm.positions()["a"], Point3::new(1.0, 2.0, 3.0));
    }
}
