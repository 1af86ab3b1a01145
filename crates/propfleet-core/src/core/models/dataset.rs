use super::property::{PhysicalProperty, PropertyId, UncertaintyPolicy};
use crate::core::partition::Partition;
use crate::engine::error::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

/// An ordered collection of physical properties.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhysicalPropertyDataSet {
    pub properties: Vec<PhysicalProperty>,
}

impl PhysicalPropertyDataSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a data set, rejecting duplicate identifiers.
    pub fn from_properties(properties: Vec<PhysicalProperty>) -> Result<Self, EngineError> {
        let mut seen = HashSet::with_capacity(properties.len());
        for property in &properties {
            if !seen.insert(&property.id) {
                return Err(EngineError::Configuration(format!(
                    "duplicate property identifier '{}' in data set",
                    property.id
                )));
            }
        }
        Ok(Self { properties })
    }

    pub fn from_json_str(content: &str) -> Result<Self, EngineError> {
        let raw: Self = serde_json::from_str(content)
            .map_err(|e| EngineError::serialization("property data set", e))?;
        Self::from_properties(raw.properties)
    }

    pub fn from_json(path: &Path) -> Result<Self, EngineError> {
        debug!("Loading property data set from {:?}", path);
        let content = std::fs::read_to_string(path).map_err(|e| EngineError::io(path, e))?;
        Self::from_json_str(&content)
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &PropertyId> {
        self.properties.iter().map(|p| &p.id)
    }

    /// Returns a new data set holding only the properties covered by `partition`.
    pub fn subset(&self, partition: &Partition) -> Self {
        Self {
            properties: self.properties[partition.range()].to_vec(),
        }
    }

    pub fn apply_uncertainty_policy(&mut self, policy: UncertaintyPolicy) {
        for property in &mut self.properties {
            policy.apply(property);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::property::Quantity;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn make(n: usize) -> PhysicalPropertyDataSet {
        PhysicalPropertyDataSet::from_properties(
            (0..n)
                .map(|i| PhysicalProperty::new(format!("p{i}"), "Density", Quantity::new(i as f64, "g / ml")))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn duplicate_identifiers_are_rejected() {
        let property = PhysicalProperty::new("dup", "Density", Quantity::new(1.0, "g / ml"));
        let result = PhysicalPropertyDataSet::from_properties(vec![property.clone(), property]);
        assert!(matches!(result, Err(EngineError::Configuration(_))));
    }

    #[test]
    fn subset_follows_partition_range() {
        let data_set = make(10);
        let partition = Partition::for_worker(data_set.len(), 3, 2).unwrap();
        let subset = data_set.subset(&partition);
        let ids: Vec<_> = subset.ids().map(PropertyId::as_str).collect();
        assert_eq!(ids, vec!["p8", "p9"]);
    }

    #[test]
    fn loads_from_json_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"properties": [
                {{"id": "a", "type": "Density", "value": {{"value": 0.99, "unit": "g / ml"}},
                  "thermodynamic-state": {{"temperature": {{"value": 298.15, "unit": "K"}}}}}},
                {{"id": "b", "type": "EnthalpyOfMixing", "value": {{"value": -0.1, "unit": "kJ / mol"}},
                  "uncertainty": {{"value": 0.05, "unit": "kJ / mol"}}}}
            ]}}"#
        )
        .unwrap();

        let data_set = PhysicalPropertyDataSet::from_json(file.path()).unwrap();
        assert_eq!(data_set.len(), 2);
        assert_eq!(
            data_set.properties[0]
                .thermodynamic_state
                .as_ref()
                .map(|s| s.temperature.value),
            Some(298.15)
        );
        assert_eq!(
            data_set.properties[1].uncertainty,
            Some(Quantity::new(0.05, "kJ / mol"))
        );
    }

    #[test]
    fn missing_file_reports_io_error_with_path() {
        let result = PhysicalPropertyDataSet::from_json(Path::new("/definitely/not/here.json"));
        assert!(matches!(result, Err(EngineError::Io { .. })));
    }

    #[test]
    fn uncertainty_policy_applies_to_every_property() {
        let mut data_set = make(3);
        data_set.apply_uncertainty_policy(UncertaintyPolicy::FixedMagnitude(0.001));
        assert!(data_set
            .properties
            .iter()
            .all(|p| p.uncertainty == Some(Quantity::new(0.001, "g / ml"))));
    }
}
