use serde::{Deserialize, Serialize};
use std::fmt;

/// A magnitude paired with the unit it is expressed in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    pub value: f64,
    pub unit: String,
}

impl Quantity {
    pub fn new(value: f64, unit: impl Into<String>) -> Self {
        Self {
            value,
            unit: unit.into(),
        }
    }

    /// Returns a quantity with the same unit but a different magnitude.
    pub fn with_value(&self, value: f64) -> Self {
        Self {
            value,
            unit: self.unit.clone(),
        }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyId(String);

impl PropertyId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PropertyId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for PropertyId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub smiles: String,
    #[serde(rename = "mole-fraction")]
    pub mole_fraction: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThermodynamicState {
    pub temperature: Quantity,
    #[serde(default)]
    pub pressure: Option<Quantity>,
}

/// One unit of estimation work: a measured physical property to be reproduced
/// by simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalProperty {
    pub id: PropertyId,
    #[serde(rename = "type")]
    pub property_type: String,
    pub value: Quantity,
    #[serde(default)]
    pub uncertainty: Option<Quantity>,
    #[serde(default)]
    pub substance: Vec<Component>,
    #[serde(default, rename = "thermodynamic-state")]
    pub thermodynamic_state: Option<ThermodynamicState>,
    #[serde(default)]
    pub source: Option<String>,
}

impl PhysicalProperty {
    pub fn new(id: impl Into<PropertyId>, property_type: impl Into<String>, value: Quantity) -> Self {
        Self {
            id: id.into(),
            property_type: property_type.into(),
            value,
            uncertainty: None,
            substance: Vec::new(),
            thermodynamic_state: None,
            source: None,
        }
    }
}

/// Rule used to overwrite property uncertainties before dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum UncertaintyPolicy {
    /// Leave the loaded uncertainty untouched.
    Keep,
    /// A constant magnitude expressed in the unit of the property value.
    FixedMagnitude(f64),
    /// A fraction of the absolute property value.
    FractionOfValue(f64),
}

impl Default for UncertaintyPolicy {
    fn default() -> Self {
        Self::FixedMagnitude(0.001)
    }
}

impl UncertaintyPolicy {
    pub fn apply(&self, property: &mut PhysicalProperty) {
        let magnitude = match *self {
            Self::Keep => return,
            Self::FixedMagnitude(magnitude) => magnitude,
            Self::FractionOfValue(fraction) => fraction * property.value.value.abs(),
        };
        property.uncertainty = Some(property.value.with_value(magnitude));
    }
}
