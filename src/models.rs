//! HSDS record types, their optional-field constructors, and the audit row shape.

use crate::errors::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use uuid::Uuid;

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Parse a timestamp coming back from the store.
///
/// `to_jsonb` renders `timestamptz` as RFC3339 but plain `timestamp` columns without an
/// offset, so both shapes (and the space-separated variant) are accepted.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f %z")
                .map(|dt| dt.with_timezone(&Utc))
        })
        .ok()
        .or_else(|| {
            ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
                .iter()
                .find_map(|fmt| chrono::NaiveDateTime::parse_from_str(raw, fmt).ok())
                .map(|ndt| DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc))
        })
}

fn flexible_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(s) => parse_timestamp(&s)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{}'", s))),
    }
}

fn required_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    flexible_timestamp(deserializer)?
        .ok_or_else(|| serde::de::Error::custom("missing timestamp"))
}

// ============ Service ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceStatus {
    #[serde(rename = "active")]
    Active,
    #[serde(rename = "inactive")]
    Inactive,
    #[serde(rename = "defunct")]
    Defunct,
    #[serde(rename = "temporarily closed")]
    TemporarilyClosed,
}

impl ServiceStatus {
    pub const ALL: [ServiceStatus; 4] = [
        ServiceStatus::Active,
        ServiceStatus::Inactive,
        ServiceStatus::Defunct,
        ServiceStatus::TemporarilyClosed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Active => "active",
            ServiceStatus::Inactive => "inactive",
            ServiceStatus::Defunct => "defunct",
            ServiceStatus::TemporarilyClosed => "temporarily closed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_lowercase().replace(['_', '-'], " ");
        Self::ALL.into_iter().find(|s| s.as_str() == normalized)
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub organization_id: String,
    #[serde(default)]
    pub program_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub alternate_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    pub status: ServiceStatus,
    #[serde(default)]
    pub interpretation_services: Option<String>,
    #[serde(default)]
    pub application_process: Option<String>,
    #[serde(default)]
    pub fees_description: Option<String>,
    #[serde(default)]
    pub wait_time: Option<String>,
    #[serde(default)]
    pub fees: Option<String>,
    #[serde(default)]
    pub accreditations: Option<String>,
    #[serde(default)]
    pub eligibility_description: Option<String>,
    #[serde(default)]
    pub minimum_age: Option<f64>,
    #[serde(default)]
    pub maximum_age: Option<f64>,
    #[serde(default)]
    pub assured_date: Option<String>,
    #[serde(default)]
    pub assurer_email: Option<String>,
    #[serde(default)]
    pub licenses: Option<String>,
    #[serde(default)]
    pub alert: Option<String>,
    #[serde(default, deserialize_with = "flexible_timestamp")]
    pub last_modified: Option<DateTime<Utc>>,
}

/// Optional service attributes; everything not listed in [`Service::new`].
#[derive(Debug, Clone, Default)]
pub struct ServiceOptions {
    pub program_id: Option<String>,
    pub alternate_name: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub email: Option<String>,
    pub interpretation_services: Option<String>,
    pub application_process: Option<String>,
    pub fees_description: Option<String>,
    pub wait_time: Option<String>,
    pub fees: Option<String>,
    pub accreditations: Option<String>,
    pub eligibility_description: Option<String>,
    pub minimum_age: Option<f64>,
    pub maximum_age: Option<f64>,
    pub assured_date: Option<String>,
    pub assurer_email: Option<String>,
    pub licenses: Option<String>,
    pub alert: Option<String>,
}

impl Service {
    pub fn new(
        organization_id: &str,
        name: &str,
        status: ServiceStatus,
        opts: ServiceOptions,
    ) -> Result<Self, AppError> {
        if organization_id.trim().is_empty() {
            return Err(AppError::BadRequest(
                "service requires an organization id".to_string(),
            ));
        }
        if name.trim().is_empty() {
            return Err(AppError::BadRequest("service requires a name".to_string()));
        }

        Ok(Self {
            id: new_id(),
            organization_id: organization_id.to_string(),
            program_id: opts.program_id,
            name: name.trim().to_string(),
            alternate_name: opts.alternate_name,
            description: opts.description,
            url: opts.url,
            email: opts.email,
            status,
            interpretation_services: opts.interpretation_services,
            application_process: opts.application_process,
            fees_description: opts.fees_description,
            wait_time: opts.wait_time,
            fees: opts.fees,
            accreditations: opts.accreditations,
            eligibility_description: opts.eligibility_description,
            minimum_age: opts.minimum_age,
            maximum_age: opts.maximum_age,
            assured_date: opts.assured_date,
            assurer_email: opts.assurer_email,
            licenses: opts.licenses,
            alert: opts.alert,
            last_modified: Some(Utc::now()),
        })
    }

    /// Current value of a patchable field, `None` when unset.
    pub fn field_value(&self, field: ServiceField) -> Option<FieldValue> {
        let text = |v: &Option<String>| v.clone().map(FieldValue::Text);
        match field {
            ServiceField::Name => Some(FieldValue::Text(self.name.clone())),
            ServiceField::AlternateName => text(&self.alternate_name),
            ServiceField::Description => text(&self.description),
            ServiceField::Url => text(&self.url),
            ServiceField::Email => text(&self.email),
            ServiceField::Status => Some(FieldValue::Status(self.status)),
            ServiceField::InterpretationServices => text(&self.interpretation_services),
            ServiceField::ApplicationProcess => text(&self.application_process),
            ServiceField::FeesDescription => text(&self.fees_description),
            ServiceField::WaitTime => text(&self.wait_time),
            ServiceField::Fees => text(&self.fees),
            ServiceField::Accreditations => text(&self.accreditations),
            ServiceField::EligibilityDescription => text(&self.eligibility_description),
            ServiceField::MinimumAge => self.minimum_age.map(FieldValue::Number),
            ServiceField::MaximumAge => self.maximum_age.map(FieldValue::Number),
            ServiceField::Alert => text(&self.alert),
        }
    }

    /// Apply one patch in place. A value of the wrong kind for the field is rejected.
    pub fn apply_patch(&mut self, patch: &FieldPatch) -> Result<(), AppError> {
        let mismatch = || {
            AppError::BadRequest(format!(
                "value {} does not fit service field {}",
                patch.value,
                patch.field.column()
            ))
        };

        match (patch.field, &patch.value) {
            (ServiceField::Name, FieldValue::Text(v)) => self.name = v.clone(),
            (ServiceField::AlternateName, FieldValue::Text(v)) => {
                self.alternate_name = Some(v.clone())
            }
            (ServiceField::Description, FieldValue::Text(v)) => self.description = Some(v.clone()),
            (ServiceField::Url, FieldValue::Text(v)) => self.url = Some(v.clone()),
            (ServiceField::Email, FieldValue::Text(v)) => self.email = Some(v.clone()),
            (ServiceField::Status, FieldValue::Status(s)) => self.status = *s,
            (ServiceField::Status, FieldValue::Text(v)) => {
                self.status = ServiceStatus::parse(v).ok_or_else(mismatch)?
            }
            (ServiceField::InterpretationServices, FieldValue::Text(v)) => {
                self.interpretation_services = Some(v.clone())
            }
            (ServiceField::ApplicationProcess, FieldValue::Text(v)) => {
                self.application_process = Some(v.clone())
            }
            (ServiceField::FeesDescription, FieldValue::Text(v)) => {
                self.fees_description = Some(v.clone())
            }
            (ServiceField::WaitTime, FieldValue::Text(v)) => self.wait_time = Some(v.clone()),
            (ServiceField::Fees, FieldValue::Text(v)) => self.fees = Some(v.clone()),
            (ServiceField::Accreditations, FieldValue::Text(v)) => {
                self.accreditations = Some(v.clone())
            }
            (ServiceField::EligibilityDescription, FieldValue::Text(v)) => {
                self.eligibility_description = Some(v.clone())
            }
            (ServiceField::MinimumAge, FieldValue::Number(n)) => self.minimum_age = Some(*n),
            (ServiceField::MaximumAge, FieldValue::Number(n)) => self.maximum_age = Some(*n),
            (ServiceField::Alert, FieldValue::Text(v)) => self.alert = Some(v.clone()),
            _ => return Err(mismatch()),
        }
        Ok(())
    }
}

/// Service columns that reconciliation may rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceField {
    Name,
    AlternateName,
    Description,
    Url,
    Email,
    Status,
    InterpretationServices,
    ApplicationProcess,
    FeesDescription,
    WaitTime,
    Fees,
    Accreditations,
    EligibilityDescription,
    MinimumAge,
    MaximumAge,
    Alert,
}

impl ServiceField {
    pub fn column(&self) -> &'static str {
        match self {
            ServiceField::Name => "name",
            ServiceField::AlternateName => "alternate_name",
            ServiceField::Description => "description",
            ServiceField::Url => "url",
            ServiceField::Email => "email",
            ServiceField::Status => "status",
            ServiceField::InterpretationServices => "interpretation_services",
            ServiceField::ApplicationProcess => "application_process",
            ServiceField::FeesDescription => "fees_description",
            ServiceField::WaitTime => "wait_time",
            ServiceField::Fees => "fees",
            ServiceField::Accreditations => "accreditations",
            ServiceField::EligibilityDescription => "eligibility_description",
            ServiceField::MinimumAge => "minimum_age",
            ServiceField::MaximumAge => "maximum_age",
            ServiceField::Alert => "alert",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Status(ServiceStatus),
}

impl FieldValue {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FieldValue::Text(s) => serde_json::Value::String(s.clone()),
            FieldValue::Number(n) => serde_json::json!(n),
            FieldValue::Status(s) => serde_json::Value::String(s.as_str().to_string()),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Number(n) => write!(f, "{}", n),
            FieldValue::Status(s) => f.write_str(s.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldPatch {
    pub field: ServiceField,
    pub value: FieldValue,
}

// ============ Unit / Capacity ============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub scheme: Option<String>,
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default)]
    pub uri: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UnitOptions {
    pub scheme: Option<String>,
    pub identifier: Option<String>,
    pub uri: Option<String>,
}

impl Unit {
    pub fn new(name: &str, opts: UnitOptions) -> Result<Self, AppError> {
        if name.trim().is_empty() {
            return Err(AppError::BadRequest("unit requires a name".to_string()));
        }
        Ok(Self {
            id: new_id(),
            name: name.trim().to_string(),
            scheme: opts.scheme,
            identifier: opts.identifier,
            uri: opts.uri,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceCapacity {
    pub id: String,
    pub service_id: String,
    pub unit_id: String,
    pub available: f64,
    #[serde(default)]
    pub maximum: Option<f64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(deserialize_with = "required_timestamp")]
    pub updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct CapacityOptions {
    pub maximum: Option<f64>,
    pub description: Option<String>,
}

impl ServiceCapacity {
    pub fn new(
        service_id: &str,
        unit_id: &str,
        available: f64,
        opts: CapacityOptions,
    ) -> Result<Self, AppError> {
        if service_id.is_empty() || unit_id.is_empty() {
            return Err(AppError::BadRequest(
                "capacity requires both a service and a unit".to_string(),
            ));
        }
        if !available.is_finite() || available < 0.0 {
            return Err(AppError::BadRequest(format!(
                "capacity available must be a non-negative number, got {}",
                available
            )));
        }
        Ok(Self {
            id: new_id(),
            service_id: service_id.to_string(),
            unit_id: unit_id.to_string(),
            available,
            maximum: opts.maximum,
            description: opts.description,
            updated: Utc::now(),
        })
    }
}

// ============ Contact / Phone ============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub service_id: Option<String>,
    #[serde(default)]
    pub service_at_location_id: Option<String>,
    #[serde(default)]
    pub location_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "flexible_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "flexible_timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct ContactOptions {
    pub organization_id: Option<String>,
    pub service_id: Option<String>,
    pub service_at_location_id: Option<String>,
    pub location_id: Option<String>,
    pub name: Option<String>,
    pub title: Option<String>,
    pub department: Option<String>,
    pub email: Option<String>,
}

impl Contact {
    pub fn new(opts: ContactOptions) -> Result<Self, AppError> {
        if opts.organization_id.is_none() && opts.service_id.is_none() {
            return Err(AppError::BadRequest(
                "contact must belong to an organization or a service".to_string(),
            ));
        }
        let now = Utc::now();
        Ok(Self {
            id: new_id(),
            organization_id: opts.organization_id,
            service_id: opts.service_id,
            service_at_location_id: opts.service_at_location_id,
            location_id: opts.location_id,
            name: opts.name,
            title: opts.title,
            department: opts.department,
            email: opts.email,
            created_at: Some(now),
            updated_at: Some(now),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phone {
    pub id: String,
    #[serde(default)]
    pub location_id: Option<String>,
    #[serde(default)]
    pub service_id: Option<String>,
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub contact_id: Option<String>,
    #[serde(default)]
    pub service_at_location_id: Option<String>,
    pub number: String,
    #[serde(default)]
    pub extension: Option<f64>,
    #[serde(default, rename = "type")]
    pub phone_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PhoneOptions {
    pub location_id: Option<String>,
    pub service_id: Option<String>,
    pub organization_id: Option<String>,
    pub contact_id: Option<String>,
    pub service_at_location_id: Option<String>,
    pub extension: Option<f64>,
    pub phone_type: Option<String>,
    pub description: Option<String>,
}

impl Phone {
    pub fn new(number: &str, opts: PhoneOptions) -> Result<Self, AppError> {
        if number.trim().is_empty() {
            return Err(AppError::BadRequest("phone requires a number".to_string()));
        }
        Ok(Self {
            id: new_id(),
            location_id: opts.location_id,
            service_id: opts.service_id,
            organization_id: opts.organization_id,
            contact_id: opts.contact_id,
            service_at_location_id: opts.service_at_location_id,
            number: number.trim().to_string(),
            extension: opts.extension,
            phone_type: opts.phone_type,
            description: opts.description,
        })
    }
}

// ============ Audit log ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActionType {
    Create,
    Update,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Service,
    Unit,
    ServiceCapacity,
    Contact,
    Phone,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Service => "service",
            ResourceType::Unit => "unit",
            ResourceType::ServiceCapacity => "service_capacity",
            ResourceType::Contact => "contact",
            ResourceType::Phone => "phone",
        }
    }
}

/// Append-only audit row. One per created record or changed field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub id: String,
    pub resource_id: String,
    pub resource_type: ResourceType,
    #[serde(deserialize_with = "required_timestamp")]
    pub last_action_date: DateTime<Utc>,
    pub last_action_type: ActionType,
    pub field_name: String,
    pub previous_value: String,
    pub replacement_value: String,
    pub updated_by: String,
    pub call_id: String,
}

/// What a caller knows about a mutation; defaults are filled in by [`MetadataInput::into_metadata`].
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataInput {
    pub resource_id: String,
    pub resource_type: ResourceType,
    pub action: Option<ActionType>,
    pub field_name: Option<String>,
    pub previous_value: Option<String>,
    pub replacement_value: String,
}

impl MetadataInput {
    /// A whole record was created (`field_name` "new", replacement "new entry").
    pub fn record_created(resource_type: ResourceType, resource_id: &str) -> Self {
        Self {
            resource_id: resource_id.to_string(),
            resource_type,
            action: Some(ActionType::Create),
            field_name: None,
            previous_value: None,
            replacement_value: "new entry".to_string(),
        }
    }

    /// A field was populated on a freshly created record.
    pub fn field_created(
        resource_type: ResourceType,
        resource_id: &str,
        field: &str,
        value: impl Into<String>,
    ) -> Self {
        Self {
            resource_id: resource_id.to_string(),
            resource_type,
            action: Some(ActionType::Create),
            field_name: Some(field.to_string()),
            previous_value: None,
            replacement_value: value.into(),
        }
    }

    pub fn field_updated(
        resource_type: ResourceType,
        resource_id: &str,
        field: &str,
        previous: Option<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            resource_id: resource_id.to_string(),
            resource_type,
            action: Some(ActionType::Update),
            field_name: Some(field.to_string()),
            previous_value: previous,
            replacement_value: value.into(),
        }
    }

    pub fn into_metadata(self, call_id: &str, updated_by: &str) -> Metadata {
        let non_empty = |v: Option<String>| v.filter(|s| !s.is_empty());
        Metadata {
            id: new_id(),
            resource_id: self.resource_id,
            resource_type: self.resource_type,
            last_action_date: Utc::now(),
            last_action_type: self.action.unwrap_or(ActionType::Update),
            field_name: non_empty(self.field_name).unwrap_or_else(|| "new".to_string()),
            previous_value: non_empty(self.previous_value).unwrap_or_else(|| "none".to_string()),
            replacement_value: self.replacement_value,
            updated_by: updated_by.to_string(),
            call_id: call_id.to_string(),
        }
    }
}

// ============ Inbound request ============

/// Body of `POST /transcript`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptRequest {
    pub organization_id: String,
    pub room_url: String,
    pub transcript: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptAccepted {
    pub status: String,
    pub message: String,
    pub request_id: String,
}
