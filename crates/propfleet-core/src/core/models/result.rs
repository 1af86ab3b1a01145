use super::property::{PhysicalProperty, PropertyId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A failure raised while estimating a property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimationException {
    pub property_id: PropertyId,
    pub message: String,
}

/// Outcome of one estimation request. Every submitted property lands in exactly
/// one of the three buckets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EstimationResult {
    pub estimated: Vec<PhysicalProperty>,
    pub unsuccessful: Vec<PhysicalProperty>,
    pub exceptions: Vec<EstimationException>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutcomeStatus {
    Estimated,
    Unsuccessful,
    Exception,
}

/// The keyed form of a single outcome, as written to per-worker result files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub status: OutcomeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<PhysicalProperty>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub type KeyedOutcomes = BTreeMap<PropertyId, OutcomeRecord>;

impl EstimationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total(&self) -> usize {
        self.estimated.len() + self.unsuccessful.len() + self.exceptions.len()
    }

    pub fn is_complete_success(&self) -> bool {
        self.unsuccessful.is_empty() && self.exceptions.is_empty()
    }

    /// Appends every bucket of `other` onto `self`.
    pub fn extend(&mut self, other: EstimationResult) {
        self.estimated.extend(other.estimated);
        self.unsuccessful.extend(other.unsuccessful);
        self.exceptions.extend(other.exceptions);
    }

    /// Identifiers of properties that were not estimated, with the reason.
    pub fn failures(&self) -> BTreeMap<PropertyId, String> {
        let mut failures = BTreeMap::new();
        for property in &self.unsuccessful {
            failures.insert(
                property.id.clone(),
                "estimation was unsuccessful".to_string(),
            );
        }
        for exception in &self.exceptions {
            failures.insert(exception.property_id.clone(), exception.message.clone());
        }
        failures
    }

    pub fn to_keyed(&self) -> KeyedOutcomes {
        let mut keyed = KeyedOutcomes::new();
        for property in &self.estimated {
            keyed.insert(
                property.id.clone(),
                OutcomeRecord {
                    status: OutcomeStatus::Estimated,
                    property: Some(property.clone()),
                    message: None,
                },
            );
        }
        for property in &self.unsuccessful {
            keyed.insert(
                property.id.clone(),
                OutcomeRecord {
                    status: OutcomeStatus::Unsuccessful,
                    property: Some(property.clone()),
                    message: None,
                },
            );
        }
        for exception in &self.exceptions {
            keyed.insert(
                exception.property_id.clone(),
                OutcomeRecord {
                    status: OutcomeStatus::Exception,
                    property: None,
                    message: Some(exception.message.clone()),
                },
            );
        }
        keyed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::property::Quantity;

    fn property(id: &str) -> PhysicalProperty {
        PhysicalProperty::new(id, "Density", Quantity::new(1.0, "g / ml"))
    }

    fn mixed_result() -> EstimationResult {
        EstimationResult {
            estimated: vec![property("a"), property("b")],
            unsuccessful: vec![property("c")],
            exceptions: vec![EstimationException {
                property_id: PropertyId::from("d"),
                message: "simulation diverged".to_string(),
            }],
        }
    }

    #[test]
    fn keyed_form_has_one_record_per_property() {
        let keyed = mixed_result().to_keyed();
        assert_eq!(keyed.len(), 4);
        assert_eq!(keyed[&PropertyId::from("a")].status, OutcomeStatus::Estimated);
        assert_eq!(keyed[&PropertyId::from("c")].status, OutcomeStatus::Unsuccessful);
        let d = &keyed[&PropertyId::from("d")];
        assert_eq!(d.status, OutcomeStatus::Exception);
        assert_eq!(d.message.as_deref(), Some("simulation diverged"));
    }

    #[test]
    fn failures_cover_unsuccessful_and_exceptions() {
        let failures = mixed_result().failures();
        let ids: Vec<_> = failures.keys().map(PropertyId::as_str).collect();
        assert_eq!(ids, vec!["c", "d"]);
        assert_eq!(failures[&PropertyId::from("d")], "simulation diverged");
    }

    #[test]
    fn extend_concatenates_buckets() {
        let mut result = mixed_result();
        result.extend(mixed_result());
        assert_eq!(result.total(), 8);
        assert!(!result.is_complete_success());
    }
}
