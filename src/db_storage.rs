use crate::errors::{AppError, ResultExt};
use crate::models::{
    Contact, MetadataInput, Phone, ResourceType, Service, ServiceCapacity, Unit,
};
use crate::services::ServiceUpdate;
use crate::store::{Filter, Store, Table};
use chrono::Utc;
use moka::future::Cache;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Typed persistence for HSDS records on top of a [`Store`].
///
/// Every mutation goes through here together with its audit rows, so callers never
/// write a record without the matching `metadata` entries.
#[derive(Clone)]
pub struct HsdsStorage {
    store: Arc<dyn Store>,
    organization_names: Cache<String, String>,
    audit_actor: String,
}

fn decode_rows<T: DeserializeOwned>(table: Table, rows: Vec<Value>) -> Result<Vec<T>, AppError> {
    rows.into_iter()
        .map(|row| {
            serde_json::from_value(row).map_err(|e| {
                AppError::InternalError(format!("Malformed {} row: {}", table.name(), e))
            })
        })
        .collect()
}

fn to_record<T: Serialize>(value: &T) -> Result<Value, AppError> {
    Ok(serde_json::to_value(value)?)
}

impl HsdsStorage {
    pub fn new(store: Arc<dyn Store>, audit_actor: impl Into<String>) -> Self {
        // Organization names change rarely and are read once per run
        let organization_names = Cache::builder()
            .time_to_live(Duration::from_secs(600))
            .max_capacity(1_000)
            .build();

        Self {
            store,
            organization_names,
            audit_actor: audit_actor.into(),
        }
    }

    pub fn audit_actor(&self) -> &str {
        &self.audit_actor
    }

    // ============ Reads ============

    pub async fn organization_name(&self, organization_id: &str) -> Result<String, AppError> {
        if let Some(name) = self.organization_names.get(organization_id).await {
            return Ok(name);
        }

        let rows = self
            .store
            .select(Table::Organization, &[Filter::eq("id", organization_id)])
            .await
            .context("fetching organization")?;

        let name = rows
            .first()
            .and_then(|row| row.get("name"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| AppError::NotFound(format!("organization {}", organization_id)))?;

        self.organization_names
            .insert(organization_id.to_string(), name.clone())
            .await;
        Ok(name)
    }

    pub async fn organization_services(
        &self,
        organization_id: &str,
    ) -> Result<Vec<Service>, AppError> {
        let rows = self
            .store
            .select(
                Table::Service,
                &[Filter::eq("organization_id", organization_id)],
            )
            .await
            .context("fetching organization services")?;
        decode_rows(Table::Service, rows)
    }

    pub async fn organization_contacts(
        &self,
        organization_id: &str,
    ) -> Result<Vec<Contact>, AppError> {
        let rows = self
            .store
            .select(
                Table::Contact,
                &[Filter::eq("organization_id", organization_id)],
            )
            .await
            .context("fetching organization contacts")?;
        decode_rows(Table::Contact, rows)
    }

    /// Phones owned by the organization, by any of the contacts, or by any of the services.
    pub async fn relevant_phones(
        &self,
        organization_id: &str,
        contact_ids: &[String],
        service_ids: &[String],
    ) -> Result<Vec<Phone>, AppError> {
        let mut lookups = vec![Filter::eq("organization_id", organization_id)];
        if !contact_ids.is_empty() {
            lookups.push(Filter::any_of("contact_id", contact_ids.iter().cloned()));
        }
        if !service_ids.is_empty() {
            lookups.push(Filter::any_of("service_id", service_ids.iter().cloned()));
        }

        let mut seen = HashSet::new();
        let mut phones = Vec::new();
        for filter in lookups {
            let rows = self
                .store
                .select(Table::Phone, std::slice::from_ref(&filter))
                .await
                .with_context(|| format!("fetching phones by {}", filter.column()))?;
            for phone in decode_rows::<Phone>(Table::Phone, rows)? {
                if seen.insert(phone.id.clone()) {
                    phones.push(phone);
                }
            }
        }
        Ok(phones)
    }

    // ============ Writes ============

    /// Persist the transcript and the call linking it to the organization. Returns the call id.
    pub async fn store_call_data(
        &self,
        organization_id: &str,
        room_url: &str,
        transcript: &str,
    ) -> Result<String, AppError> {
        let transcript_id = self
            .store
            .insert(Table::Transcripts, json!({ "full_transcript": transcript }))
            .await
            .context("storing transcript")?;

        let call_id = self
            .store
            .insert(
                Table::Calls,
                json!({
                    "fk_organization": organization_id,
                    "room_url": room_url,
                    "fk_transcript": transcript_id,
                }),
            )
            .await
            .context("storing call")?;

        tracing::info!(
            "✓ Stored call {} (transcript {}) for organization {}",
            call_id,
            transcript_id,
            organization_id
        );
        Ok(call_id)
    }

    pub async fn store_metadata(
        &self,
        call_id: &str,
        inputs: Vec<MetadataInput>,
    ) -> Result<usize, AppError> {
        let count = inputs.len();
        for input in inputs {
            let row = input.into_metadata(call_id, &self.audit_actor);
            self.store
                .insert(Table::Metadata, to_record(&row)?)
                .await
                .with_context(|| {
                    format!(
                        "storing metadata for {} {}",
                        row.resource_type.as_str(),
                        row.resource_id
                    )
                })?;
        }
        Ok(count)
    }

    async fn insert_with_creation_audit<T: Serialize>(
        &self,
        table: Table,
        resource_type: ResourceType,
        id: &str,
        record: &T,
        call_id: &str,
    ) -> Result<(), AppError> {
        self.store
            .insert(table, to_record(record)?)
            .await
            .with_context(|| format!("storing {} {}", table.name(), id))?;
        self.store_metadata(call_id, vec![MetadataInput::record_created(resource_type, id)])
            .await?;
        Ok(())
    }

    pub async fn store_new_services(
        &self,
        services: &[Service],
        call_id: &str,
    ) -> Result<(), AppError> {
        for service in services {
            self.insert_with_creation_audit(
                Table::Service,
                ResourceType::Service,
                &service.id,
                service,
                call_id,
            )
            .await?;
            tracing::info!("✓ Created service '{}' ({})", service.name, service.id);
        }
        Ok(())
    }

    /// Write the changed columns plus `last_modified`, then one UPDATE audit row per field.
    pub async fn apply_service_update(
        &self,
        update: &ServiceUpdate,
        call_id: &str,
    ) -> Result<(), AppError> {
        if update.patches.is_empty() {
            return Ok(());
        }

        let mut fields = Map::new();
        let mut audit = Vec::with_capacity(update.patches.len());
        for patch in &update.patches {
            fields.insert(patch.field.column().to_string(), patch.value.to_json());
            let previous = update
                .existing
                .field_value(patch.field)
                .map(|v| v.to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "new data".to_string());
            audit.push(MetadataInput::field_updated(
                ResourceType::Service,
                &update.existing.id,
                patch.field.column(),
                Some(previous),
                patch.value.to_string(),
            ));
        }
        fields.insert("last_modified".to_string(), json!(Utc::now()));

        self.store
            .update(Table::Service, &update.existing.id, fields)
            .await
            .with_context(|| format!("updating service {}", update.existing.id))?;
        self.store_metadata(call_id, audit).await?;

        tracing::info!(
            "✓ Updated service '{}' ({} field(s))",
            update.existing.name,
            update.patches.len()
        );
        Ok(())
    }

    pub async fn store_units(&self, units: &[Unit], call_id: &str) -> Result<(), AppError> {
        for unit in units {
            self.insert_with_creation_audit(
                Table::Unit,
                ResourceType::Unit,
                &unit.id,
                unit,
                call_id,
            )
            .await?;
        }
        Ok(())
    }

    pub async fn store_capacities(
        &self,
        capacities: &[ServiceCapacity],
        call_id: &str,
    ) -> Result<(), AppError> {
        for capacity in capacities {
            self.insert_with_creation_audit(
                Table::ServiceCapacity,
                ResourceType::ServiceCapacity,
                &capacity.id,
                capacity,
                call_id,
            )
            .await?;
        }
        Ok(())
    }

    /// Insert a contact or phone; the caller supplies its per-field audit rows.
    pub async fn insert_contact(&self, contact: &Contact) -> Result<(), AppError> {
        self.store
            .insert(Table::Contact, to_record(contact)?)
            .await
            .with_context(|| format!("storing contact {}", contact.id))?;
        Ok(())
    }

    pub async fn insert_phone(&self, phone: &Phone) -> Result<(), AppError> {
        self.store
            .insert(Table::Phone, to_record(phone)?)
            .await
            .with_context(|| format!("storing phone {}", phone.id))?;
        Ok(())
    }

    pub async fn update_contact(
        &self,
        contact_id: &str,
        fields: Map<String, Value>,
    ) -> Result<(), AppError> {
        self.store
            .update(Table::Contact, contact_id, fields)
            .await
            .with_context(|| format!("updating contact {}", contact_id))
    }

    pub async fn update_phone(
        &self,
        phone_id: &str,
        fields: Map<String, Value>,
    ) -> Result<(), AppError> {
        self.store
            .update(Table::Phone, phone_id, fields)
            .await
            .with_context(|| format!("updating phone {}", phone_id))
    }
}
