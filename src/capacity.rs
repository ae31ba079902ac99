use crate::analysis::{
    AnalysisInput, CapacityResult, CategoryAnalyzer, DetailAnalysisResult, DetailCategory,
    ServiceContext,
};
use crate::errors::{AppError, InferenceError, ResultExt};
use crate::inference::InferenceClient;
use crate::matcher::find_service_by_name;
use crate::models::{CapacityOptions, ServiceCapacity, Unit, UnitOptions};
use crate::prompts::capacity_prompt;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// One capacity entry as the model reports it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferredCapacity {
    pub service_name: String,
    pub available: f64,
    #[serde(default)]
    pub maximum: Option<f64>,
    #[serde(default)]
    pub description: Option<String>,
    pub unit_name: String,
    pub unit_description: String,
    #[serde(default)]
    pub unit_scheme: Option<String>,
    #[serde(default)]
    pub unit_identifier: Option<String>,
    #[serde(default)]
    pub unit_uri: Option<String>,
}

pub fn parse_capacities(
    fields: &Map<String, Value>,
) -> Result<Vec<InferredCapacity>, InferenceError> {
    let raw = fields
        .get("capacities")
        .cloned()
        .ok_or_else(|| InferenceError::SchemaValidation {
            field: "capacities".to_string(),
            reason: "required field is missing".to_string(),
        })?;
    serde_json::from_value(raw).map_err(|e| InferenceError::MalformedJson(e.to_string()))
}

/// Resolve every entry to a service and build the records to persist.
///
/// A single entry naming an unknown service fails the whole batch. Units are shared
/// between entries of this batch with the same name; existing unit rows are not consulted.
pub fn build_capacity_result(
    entries: &[InferredCapacity],
    services: &ServiceContext,
) -> Result<CapacityResult, AppError> {
    let mut result = CapacityResult::default();
    let mut unit_by_name: HashMap<String, usize> = HashMap::new();

    for entry in entries {
        let service = find_service_by_name(&entry.service_name, services.all_services())
            .ok_or_else(|| {
                AppError::EntityResolution(format!(
                    "capacity references unknown service '{}'",
                    entry.service_name
                ))
            })?;

        let key = entry.unit_name.trim().to_lowercase();
        let unit_index = match unit_by_name.get(&key) {
            Some(&i) => i,
            None => {
                let unit = Unit::new(
                    &entry.unit_name,
                    UnitOptions {
                        scheme: entry.unit_scheme.clone(),
                        identifier: entry.unit_identifier.clone(),
                        uri: entry.unit_uri.clone(),
                    },
                )?;
                result.units.push(unit);
                unit_by_name.insert(key, result.units.len() - 1);
                result.units.len() - 1
            }
        };

        let description = entry
            .description
            .clone()
            .filter(|d| !d.trim().is_empty())
            .or_else(|| Some(entry.unit_description.clone()));

        let capacity = ServiceCapacity::new(
            &service.id,
            &result.units[unit_index].id,
            entry.available,
            CapacityOptions {
                maximum: entry.maximum,
                description,
            },
        )?;
        result.capacities.push(capacity);
    }

    Ok(result)
}

fn log_capacity_metrics(result: &CapacityResult) {
    let services: HashSet<&str> = result.capacities.iter().map(|c| c.service_id.as_str()).collect();
    let total_available: f64 = result.capacities.iter().map(|c| c.available).sum();
    let with_maximum = result.capacities.iter().filter(|c| c.maximum.is_some()).count();

    tracing::debug!(
        capacity_count = result.capacities.len(),
        unit_count = result.units.len(),
        services_with_capacity = services.len(),
        total_available,
        capacities_with_maximum = with_maximum,
        "Capacity analysis metrics"
    );
}

pub struct CapacityAnalyzer {
    client: Arc<dyn InferenceClient>,
}

impl CapacityAnalyzer {
    pub fn new(client: Arc<dyn InferenceClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CategoryAnalyzer for CapacityAnalyzer {
    fn category(&self) -> DetailCategory {
        DetailCategory::Capacity
    }

    async fn analyze(&self, input: &AnalysisInput) -> Result<DetailAnalysisResult, AppError> {
        let (prompt, schema) = capacity_prompt(&input.transcript, &input.services);
        let fields = self
            .client
            .run_inference(&prompt, &schema)
            .await
            .context("capacity inference")?;

        let entries = parse_capacities(&fields)?;
        let result = build_capacity_result(&entries, &input.services)?;
        log_capacity_metrics(&result);

        Ok(DetailAnalysisResult::Capacity(result))
    }
}
