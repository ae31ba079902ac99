use crate::analysis::{
    AnalysisInput, CategoryAnalyzer, ContactResult, DetailAnalysisResult, DetailCategory,
    ServiceContext,
};
use crate::db_storage::HsdsStorage;
use crate::errors::{AppError, InferenceError, ResultExt};
use crate::inference::InferenceClient;
use crate::matcher::{
    find_contact_matches, find_service_by_name, format_phone_e164, ContactMatch, InferredContact,
};
use crate::models::{Contact, ContactOptions, MetadataInput, Phone, PhoneOptions, ResourceType};
use crate::prompts::contact_prompt;
use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::{Arc, LazyLock};

static EMAIL_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)+$",
    )
    .ok()
});

/// Validate email format
///
/// Checks for basic structure and the RFC 5322 local/domain character sets. Anything
/// that fails is dropped from an inferred contact rather than stored.
pub fn is_valid_email(email: &str) -> bool {
    if email.len() < 5 || !email.contains('@') || !email.contains('.') {
        return false;
    }

    EMAIL_RE.as_ref().is_some_and(|re| re.is_match(email))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawContact {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    department: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    phone_description: Option<String>,
    #[serde(default)]
    phone_extension: Option<i64>,
    #[serde(default)]
    responsible_services: Vec<String>,
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Convert the validated `contacts` array, dropping bad emails and entries left with no
/// way to identify the contact.
pub fn parse_contacts(fields: &Map<String, Value>) -> Result<Vec<InferredContact>, InferenceError> {
    let raw = fields
        .get("contacts")
        .cloned()
        .ok_or_else(|| InferenceError::SchemaValidation {
            field: "contacts".to_string(),
            reason: "required field is missing".to_string(),
        })?;
    let raw: Vec<RawContact> =
        serde_json::from_value(raw).map_err(|e| InferenceError::MalformedJson(e.to_string()))?;

    let mut contacts = Vec::with_capacity(raw.len());
    for entry in raw {
        let email = clean(entry.email).filter(|e| {
            let ok = is_valid_email(e);
            if !ok {
                tracing::warn!("❌ Dropping invalid email from inferred contact: {}", e);
            }
            ok
        });
        let contact = InferredContact {
            name: clean(entry.name),
            title: clean(entry.title),
            department: clean(entry.department),
            email,
            phone: clean(entry.phone),
            phone_description: clean(entry.phone_description),
            phone_extension: entry.phone_extension,
            responsible_services: entry.responsible_services,
        };
        if contact.name.is_none() && contact.email.is_none() && contact.phone.is_none() {
            tracing::warn!("Skipping inferred contact with no name, email, or phone");
            continue;
        }
        contacts.push(contact);
    }
    Ok(contacts)
}

/// Service id for a contact responsible for exactly one resolvable service.
fn single_responsible_service(
    inferred: &InferredContact,
    services: &ServiceContext,
) -> Option<String> {
    match inferred.responsible_services.as_slice() {
        [only] => find_service_by_name(only, services.all_services()).map(|s| s.id.clone()),
        _ => None,
    }
}

/// Field-level differences between an inferred contact and its stored match.
///
/// Only fields the inference actually supplied are compared; a missing inferred value
/// never clears a stored one.
pub fn contact_changes(
    inferred: &InferredContact,
    existing: &Contact,
) -> Vec<(&'static str, Option<String>, String)> {
    let pairs = [
        ("name", &inferred.name, &existing.name),
        ("title", &inferred.title, &existing.title),
        ("department", &inferred.department, &existing.department),
        ("email", &inferred.email, &existing.email),
    ];

    pairs
        .into_iter()
        .filter_map(|(field, new, old)| match new {
            Some(value) if old.as_deref() != Some(value.as_str()) => {
                Some((field, old.clone(), value.clone()))
            }
            _ => None,
        })
        .collect()
}

pub struct ContactAnalyzer {
    client: Arc<dyn InferenceClient>,
    storage: HsdsStorage,
}

impl ContactAnalyzer {
    pub fn new(client: Arc<dyn InferenceClient>, storage: HsdsStorage) -> Self {
        Self { client, storage }
    }

    async fn create_phone(
        &self,
        inferred: &InferredContact,
        number: &str,
        organization_id: &str,
        contact_id: &str,
        call_id: &str,
        result: &mut ContactResult,
    ) -> Result<(), AppError> {
        let stored_number = format_phone_e164(number).unwrap_or_else(|| number.to_string());
        let phone = Phone::new(
            &stored_number,
            PhoneOptions {
                organization_id: Some(organization_id.to_string()),
                contact_id: Some(contact_id.to_string()),
                extension: inferred.phone_extension.map(|e| e as f64),
                description: inferred.phone_description.clone(),
                ..Default::default()
            },
        )?;
        self.storage.insert_phone(&phone).await?;

        let mut audit = vec![MetadataInput::field_created(
            ResourceType::Phone,
            &phone.id,
            "number",
            phone.number.clone(),
        )];
        if let Some(ext) = inferred.phone_extension {
            audit.push(MetadataInput::field_created(
                ResourceType::Phone,
                &phone.id,
                "extension",
                ext.to_string(),
            ));
        }
        if let Some(description) = &phone.description {
            audit.push(MetadataInput::field_created(
                ResourceType::Phone,
                &phone.id,
                "description",
                description.clone(),
            ));
        }
        result.metadata_rows += self.storage.store_metadata(call_id, audit).await?;
        result.created_phones.push(phone);
        Ok(())
    }

    async fn create_contact(
        &self,
        inferred: &InferredContact,
        input: &AnalysisInput,
        result: &mut ContactResult,
    ) -> Result<(), AppError> {
        let contact = Contact::new(ContactOptions {
            organization_id: Some(input.organization_id.clone()),
            service_id: single_responsible_service(inferred, &input.services),
            name: inferred.name.clone(),
            title: inferred.title.clone(),
            department: inferred.department.clone(),
            email: inferred.email.clone(),
            ..Default::default()
        })?;
        self.storage.insert_contact(&contact).await?;

        let mut audit: Vec<MetadataInput> = [
            ("name", &contact.name),
            ("title", &contact.title),
            ("department", &contact.department),
            ("email", &contact.email),
        ]
        .into_iter()
        .filter_map(|(field, value)| {
            value.as_ref().map(|v| {
                MetadataInput::field_created(ResourceType::Contact, &contact.id, field, v.clone())
            })
        })
        .collect();
        // Phone-only contacts still get a creation row
        if audit.is_empty() {
            audit.push(MetadataInput::record_created(ResourceType::Contact, &contact.id));
        }
        result.metadata_rows += self.storage.store_metadata(&input.call_id, audit).await?;

        if let Some(number) = inferred.phone.as_deref() {
            self.create_phone(
                inferred,
                number,
                &input.organization_id,
                &contact.id,
                &input.call_id,
                result,
            )
            .await?;
        }

        tracing::info!(
            "✓ Created contact {} ({:?})",
            contact.id,
            contact.name.as_deref().or(contact.email.as_deref())
        );
        result.created_contacts.push(contact);
        Ok(())
    }

    async fn update_contact(
        &self,
        matched: &ContactMatch,
        input: &AnalysisInput,
        result: &mut ContactResult,
    ) -> Result<(), AppError> {
        let existing = &matched.existing;
        let changes = contact_changes(&matched.inferred, existing);

        if changes.is_empty() {
            tracing::debug!("No updates needed for contact {}", existing.id);
        } else {
            let mut fields = Map::new();
            let mut audit = Vec::with_capacity(changes.len());
            for (field, previous, value) in changes {
                fields.insert(field.to_string(), json!(value));
                audit.push(MetadataInput::field_updated(
                    ResourceType::Contact,
                    &existing.id,
                    field,
                    previous,
                    value,
                ));
            }
            fields.insert("updated_at".to_string(), json!(Utc::now()));

            self.storage.update_contact(&existing.id, fields).await?;
            result.metadata_rows += self.storage.store_metadata(&input.call_id, audit).await?;
            result.updated_contact_ids.push(existing.id.clone());
            tracing::info!(
                "✓ Updated contact {} (matched by {:?}, confidence {:.2})",
                existing.id,
                matched.method,
                matched.confidence
            );
        }

        let Some(number) = matched.inferred.phone.as_deref() else {
            return Ok(());
        };

        match &matched.existing_phone {
            Some(phone) if phone.contact_id.as_deref() == Some(existing.id.as_str()) => {
                self.update_phone(matched, phone, &input.call_id, result).await
            }
            Some(phone) => {
                tracing::debug!(
                    "Phone {} belongs to another owner, leaving it untouched",
                    phone.id
                );
                Ok(())
            }
            None => {
                self.create_phone(
                    &matched.inferred,
                    number,
                    &input.organization_id,
                    &existing.id,
                    &input.call_id,
                    result,
                )
                .await
            }
        }
    }

    async fn update_phone(
        &self,
        matched: &ContactMatch,
        phone: &Phone,
        call_id: &str,
        result: &mut ContactResult,
    ) -> Result<(), AppError> {
        let mut fields = Map::new();
        let mut audit = Vec::new();

        if let Some(ext) = matched.inferred.phone_extension {
            if phone.extension != Some(ext as f64) {
                fields.insert("extension".to_string(), json!(ext));
                audit.push(MetadataInput::field_updated(
                    ResourceType::Phone,
                    &phone.id,
                    "extension",
                    phone.extension.map(|e| e.to_string()),
                    ext.to_string(),
                ));
            }
        }
        if let Some(description) = &matched.inferred.phone_description {
            if phone.description.as_ref() != Some(description) {
                fields.insert("description".to_string(), json!(description));
                audit.push(MetadataInput::field_updated(
                    ResourceType::Phone,
                    &phone.id,
                    "description",
                    phone.description.clone(),
                    description.clone(),
                ));
            }
        }

        if fields.is_empty() {
            return Ok(());
        }
        self.storage.update_phone(&phone.id, fields).await?;
        result.metadata_rows += self.storage.store_metadata(call_id, audit).await?;
        result.updated_phone_ids.push(phone.id.clone());
        Ok(())
    }
}

#[async_trait]
impl CategoryAnalyzer for ContactAnalyzer {
    fn category(&self) -> DetailCategory {
        DetailCategory::Contact
    }

    async fn analyze(&self, input: &AnalysisInput) -> Result<DetailAnalysisResult, AppError> {
        let (prompt, schema) = contact_prompt(&input.transcript, &input.services);
        let fields = self
            .client
            .run_inference(&prompt, &schema)
            .await
            .context("contact inference")?;
        let inferred = parse_contacts(&fields)?;

        let existing = self
            .storage
            .organization_contacts(&input.organization_id)
            .await?;
        let contact_ids: Vec<String> = existing.iter().map(|c| c.id.clone()).collect();
        let phones = self
            .storage
            .relevant_phones(
                &input.organization_id,
                &contact_ids,
                &input.services.service_ids(),
            )
            .await?;

        let matches = find_contact_matches(&inferred, &existing, &phones);
        tracing::info!(
            "Contact reconciliation: {} inferred, {} matched, {} new",
            inferred.len(),
            matches.matched.len(),
            matches.unmatched.len()
        );

        let mut result = ContactResult::default();
        for matched in &matches.matched {
            self.update_contact(matched, input, &mut result).await?;
        }
        for candidate in &matches.unmatched {
            self.create_contact(candidate, input, &mut result).await?;
        }

        Ok(DetailAnalysisResult::Contact(result))
    }
}
