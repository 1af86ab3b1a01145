use super::property::PhysicalProperty;
use crate::core::forcefield::ForceFieldSource;
use crate::core::options::RequestOptions;
use serde::{Deserialize, Serialize};

/// Payload a client submits to an estimation server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimationRequest {
    pub properties: Vec<PhysicalProperty>,
    pub force_field: ForceFieldSource,
    #[serde(default)]
    pub options: RequestOptions,
}

/// A slice of a request handed to a calculation backend as one unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimationTask {
    pub task_id: String,
    pub properties: Vec<PhysicalProperty>,
    pub force_field: ForceFieldSource,
    #[serde(default)]
    pub options: RequestOptions,
}
