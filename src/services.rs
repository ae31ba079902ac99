//! First pass of every run: extract the services a transcript talks about and reconcile
//! them against the organization's catalog.

use crate::analysis::ServiceContext;
use crate::db_storage::HsdsStorage;
use crate::errors::{AppError, InferenceError, ResultExt};
use crate::inference::InferenceClient;
use crate::matcher::find_service_by_name;
use crate::models::{FieldPatch, FieldValue, Service, ServiceField, ServiceOptions, ServiceStatus};
use crate::prompts::services_prompt;
use serde::Deserialize;
use serde_json::{Map, Value};

/// A service as the model extracted it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExtractedService {
    pub name: String,
    pub status: String,
    pub description: String,
    #[serde(default)]
    pub application_process: Option<String>,
    #[serde(default)]
    pub fees_description: Option<String>,
    #[serde(default)]
    pub eligibility_description: Option<String>,
    #[serde(default)]
    pub wait_time: Option<String>,
}

impl ExtractedService {
    fn status(&self) -> ServiceStatus {
        ServiceStatus::parse(&self.status).unwrap_or_else(|| {
            tracing::warn!(
                "Unknown status '{}' for service '{}', assuming active",
                self.status,
                self.name
            );
            ServiceStatus::Active
        })
    }

    /// Patchable values this extraction carries, skipping blanks.
    fn values(&self) -> Vec<(ServiceField, FieldValue)> {
        let text = |field: ServiceField, value: Option<&String>| {
            value
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(|v| (field, FieldValue::Text(v.to_string())))
        };

        [
            text(ServiceField::Description, Some(&self.description)),
            Some((ServiceField::Status, FieldValue::Status(self.status()))),
            text(ServiceField::ApplicationProcess, self.application_process.as_ref()),
            text(ServiceField::FeesDescription, self.fees_description.as_ref()),
            text(
                ServiceField::EligibilityDescription,
                self.eligibility_description.as_ref(),
            ),
            text(ServiceField::WaitTime, self.wait_time.as_ref()),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// A matched service and the fields that differ from what is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceUpdate {
    pub existing: Service,
    pub patches: Vec<FieldPatch>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceReconciliation {
    /// Existing services (with pending updates applied) and the new ones.
    pub context: ServiceContext,
    pub updates: Vec<ServiceUpdate>,
}

pub fn parse_extracted_services(
    fields: &Map<String, Value>,
) -> Result<Vec<ExtractedService>, InferenceError> {
    let raw = fields
        .get("new_services")
        .cloned()
        .ok_or_else(|| InferenceError::SchemaValidation {
            field: "new_services".to_string(),
            reason: "required field is missing".to_string(),
        })?;
    serde_json::from_value(raw).map_err(|e| InferenceError::MalformedJson(e.to_string()))
}

/// Patches for every extracted value that differs from `existing`. The name is never
/// patched since it is what the match was made on.
pub fn detect_changes(existing: &Service, extracted: &ExtractedService) -> Vec<FieldPatch> {
    extracted
        .values()
        .into_iter()
        .filter(|(field, value)| existing.field_value(*field).as_ref() != Some(value))
        .map(|(field, value)| FieldPatch { field, value })
        .collect()
}

fn build_new_service(
    organization_id: &str,
    extracted: &ExtractedService,
) -> Result<Service, AppError> {
    let keep = |v: &Option<String>| v.clone().filter(|s| !s.trim().is_empty());
    Service::new(
        organization_id,
        &extracted.name,
        extracted.status(),
        ServiceOptions {
            description: Some(extracted.description.clone()).filter(|s| !s.trim().is_empty()),
            application_process: keep(&extracted.application_process),
            fees_description: keep(&extracted.fees_description),
            eligibility_description: keep(&extracted.eligibility_description),
            wait_time: keep(&extracted.wait_time),
            ..Default::default()
        },
    )
}

/// Classify each extracted service as new, changed, or unchanged.
///
/// Unchanged matches are dropped. Two extractions matching the same stored service merge
/// into one update, later values winning. Extractions that match a service already queued
/// as new in this pass are treated as repeats and skipped.
pub fn reconcile_services(
    organization_id: &str,
    extracted: &[ExtractedService],
    existing: Vec<Service>,
) -> Result<ServiceReconciliation, AppError> {
    let mut new_services: Vec<Service> = Vec::new();
    let mut updates: Vec<ServiceUpdate> = Vec::new();

    for candidate in extracted {
        if let Some(matched) = find_service_by_name(&candidate.name, &existing) {
            let patches = detect_changes(matched, candidate);
            if patches.is_empty() {
                tracing::debug!("Service '{}' unchanged, skipping", matched.name);
                continue;
            }
            match updates.iter_mut().find(|u| u.existing.id == matched.id) {
                Some(update) => {
                    for patch in patches {
                        update.patches.retain(|p| p.field != patch.field);
                        update.patches.push(patch);
                    }
                }
                None => updates.push(ServiceUpdate {
                    existing: matched.clone(),
                    patches,
                }),
            }
        } else if find_service_by_name(&candidate.name, &new_services).is_some() {
            tracing::debug!("Service '{}' extracted twice, keeping the first", candidate.name);
        } else {
            new_services.push(build_new_service(organization_id, candidate)?);
        }
    }

    let mut existing_services = existing;
    for update in &updates {
        if let Some(service) = existing_services.iter_mut().find(|s| s.id == update.existing.id) {
            for patch in &update.patches {
                service.apply_patch(patch)?;
            }
        }
    }

    tracing::info!(
        "Service reconciliation: {} extracted, {} new, {} updated",
        extracted.len(),
        new_services.len(),
        updates.len()
    );

    Ok(ServiceReconciliation {
        context: ServiceContext {
            existing_services,
            new_services,
        },
        updates,
    })
}

/// Extract services from `transcript` and reconcile them against the stored catalog.
/// Nothing is written; see [`apply_service_reconciliation`].
pub async fn extract_and_reconcile_services(
    client: &dyn InferenceClient,
    storage: &HsdsStorage,
    organization_id: &str,
    transcript: &str,
) -> Result<ServiceReconciliation, AppError> {
    let organization_name = storage.organization_name(organization_id).await?;
    let existing = storage.organization_services(organization_id).await?;

    let (prompt, schema) = services_prompt(&organization_name, &existing, transcript);
    let fields = client
        .run_inference(&prompt, &schema)
        .await
        .context("service extraction inference")?;
    let extracted = parse_extracted_services(&fields)?;

    reconcile_services(organization_id, &extracted, existing)
}

/// Persist new services and pending updates, each with its audit rows.
pub async fn apply_service_reconciliation(
    storage: &HsdsStorage,
    reconciliation: &ServiceReconciliation,
    call_id: &str,
) -> Result<(), AppError> {
    storage
        .store_new_services(&reconciliation.context.new_services, call_id)
        .await?;
    for update in &reconciliation.updates {
        storage.apply_service_update(update, call_id).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(name: &str, description: &str) -> Service {
        Service::new(
            "org-1",
            name,
            ServiceStatus::Active,
            ServiceOptions {
                description: Some(description.to_string()),
                ..Default::default()
            },
        )
        .unwrap()
    }

    fn extracted(name: &str, description: &str) -> ExtractedService {
        ExtractedService {
            name: name.to_string(),
            status: "active".to_string(),
            description: description.to_string(),
            application_process: None,
            fees_description: None,
            eligibility_description: None,
            wait_time: None,
        }
    }

    #[test]
    fn test_unchanged_match_is_dropped() {
        let existing = vec![stored("Food Pantry", "Weekly groceries")];
        let result = reconcile_services(
            "org-1",
            &[extracted("food pantry", "Weekly groceries")],
            existing,
        )
        .unwrap();
        assert!(result.updates.is_empty());
        assert!(result.context.new_services.is_empty());
        assert_eq!(result.context.existing_services.len(), 1);
    }

    #[test]
    fn test_changed_match_queues_diff_only() {
        let existing = vec![stored("Food Pantry", "Weekly groceries")];
        let mut candidate = extracted("Food Pantry", "Weekly groceries");
        candidate.wait_time = Some("same day".to_string());

        let result = reconcile_services("org-1", &[candidate], existing).unwrap();
        assert_eq!(result.updates.len(), 1);
        assert_eq!(
            result.updates[0].patches,
            vec![FieldPatch {
                field: ServiceField::WaitTime,
                value: FieldValue::Text("same day".to_string()),
            }]
        );
        // Context sees the patched value, the update keeps the stored one.
        assert_eq!(
            result.context.existing_services[0].wait_time.as_deref(),
            Some("same day")
        );
        assert_eq!(result.updates[0].existing.wait_time, None);
    }

    #[test]
    fn test_unmatched_becomes_new_service() {
        let existing = vec![stored("Food Pantry", "Weekly groceries")];
        let result = reconcile_services(
            "org-1",
            &[
                extracted("Legal Clinic", "Free legal advice"),
                extracted("Legal Clinic ", "Duplicate mention"),
            ],
            existing,
        )
        .unwrap();
        assert_eq!(result.context.new_services.len(), 1);
        let service = &result.context.new_services[0];
        assert_eq!(service.name, "Legal Clinic");
        assert_eq!(service.organization_id, "org-1");
        assert_eq!(service.description.as_deref(), Some("Free legal advice"));
    }

    #[test]
    fn test_classification_is_deterministic() {
        let existing = vec![stored("Men's Shelter", "Beds"), stored("Food Pantry", "Food")];
        let batch = vec![
            extracted("Mens Shelter", "Beds for men"),
            extracted("Food Pantry", "Food"),
            extracted("Showers", "Hot showers"),
        ];

        let first = reconcile_services("org-1", &batch, existing.clone()).unwrap();
        let second = reconcile_services("org-1", &batch, existing).unwrap();
        let shape = |r: &ServiceReconciliation| {
            (
                r.updates.iter().map(|u| u.existing.id.clone()).collect::<Vec<_>>(),
                r.context.new_services.iter().map(|s| s.name.clone()).collect::<Vec<_>>(),
            )
        };
        assert_eq!(shape(&first), shape(&second));
        assert_eq!(first.updates.len(), 1);
        assert_eq!(first.context.new_services.len(), 1);
    }

    #[test]
    fn test_parse_requires_new_services() {
        let fields = serde_json::json!({"services": []});
        assert!(parse_extracted_services(fields.as_object().unwrap()).is_err());
    }
}
