//! Shared vocabulary of the detail-analysis phase: categories, per-category results, the
//! service snapshot analyzers resolve names against, and the analyzer seam itself.

use crate::errors::AppError;
use crate::models::{Contact, Phone, Service, ServiceCapacity, Unit};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DetailCategory {
    Capacity,
    Scheduling,
    Program,
    ReqDocs,
    Contact,
}

impl DetailCategory {
    pub const ALL: [DetailCategory; 5] = [
        DetailCategory::Capacity,
        DetailCategory::Scheduling,
        DetailCategory::Program,
        DetailCategory::ReqDocs,
        DetailCategory::Contact,
    ];

    /// Categories that have a working analyzer. Triage may only report these.
    pub const IMPLEMENTED: [DetailCategory; 2] =
        [DetailCategory::Capacity, DetailCategory::Contact];

    pub fn as_str(&self) -> &'static str {
        match self {
            DetailCategory::Capacity => "CAPACITY",
            DetailCategory::Scheduling => "SCHEDULING",
            DetailCategory::Program => "PROGRAM",
            DetailCategory::ReqDocs => "REQDOCS",
            DetailCategory::Contact => "CONTACT",
        }
    }

    /// HSDS tables whose data belongs to this category.
    pub fn tables(&self) -> &'static [&'static str] {
        match self {
            DetailCategory::Capacity => &["service_capacity", "unit"],
            DetailCategory::Scheduling => &["schedule"],
            DetailCategory::Program => &["program"],
            DetailCategory::ReqDocs => &["required_document"],
            DetailCategory::Contact => &["contact", "phone"],
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            DetailCategory::Capacity => "Information about service capacity limits (e.g., number of beds) and their associated units of measurement",
            DetailCategory::Scheduling => "Information about when services are offered: opening hours, days of the week, and recurring schedules",
            DetailCategory::Program => "Information about larger programs that group several of the organization's services",
            DetailCategory::ReqDocs => "Documents a client must bring or provide in order to access a service",
            DetailCategory::Contact => "Names, titles, departments, emails and phone numbers of people or lines to contact about services",
        }
    }
}

impl fmt::Display for DetailCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetailCategory {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_uppercase();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == wanted)
            .ok_or_else(|| AppError::BadRequest(format!("unknown detail category '{}'", s)))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapacityResult {
    pub capacities: Vec<ServiceCapacity>,
    pub units: Vec<Unit>,
}

/// Contact changes are persisted by the analyzer itself; this is the record of what it did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContactResult {
    pub created_contacts: Vec<Contact>,
    pub updated_contact_ids: Vec<String>,
    pub created_phones: Vec<Phone>,
    pub updated_phone_ids: Vec<String>,
    pub metadata_rows: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DetailAnalysisResult {
    Capacity(CapacityResult),
    Contact(ContactResult),
}

impl DetailAnalysisResult {
    pub fn category(&self) -> DetailCategory {
        match self {
            DetailAnalysisResult::Capacity(_) => DetailCategory::Capacity,
            DetailAnalysisResult::Contact(_) => DetailCategory::Contact,
        }
    }
}

/// An organization's catalog as known at the start of the detail phase.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceContext {
    pub existing_services: Vec<Service>,
    pub new_services: Vec<Service>,
}

impl ServiceContext {
    pub fn all_services(&self) -> impl Iterator<Item = &Service> {
        self.existing_services.iter().chain(self.new_services.iter())
    }

    pub fn service_ids(&self) -> Vec<String> {
        self.all_services().map(|s| s.id.clone()).collect()
    }

    /// Prompt rendering: one block per service under "Existing" and "New" headings.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (heading, services) in [
            ("Existing Services", &self.existing_services),
            ("New Services", &self.new_services),
        ] {
            out.push_str(heading);
            out.push_str(":\n");
            if services.is_empty() {
                out.push_str("(none)\n");
            }
            for service in services {
                out.push_str(&format!(
                    "- ID: {}\n  Name: {}\n  Description: {}\n  Status: {}\n",
                    service.id,
                    service.name,
                    service.description.as_deref().unwrap_or("N/A"),
                    service.status
                ));
            }
            out.push('\n');
        }
        out
    }
}

/// Read-only input shared by every analyzer in one fan-out.
#[derive(Debug, Clone)]
pub struct AnalysisInput {
    pub organization_id: String,
    pub call_id: String,
    pub transcript: String,
    pub services: ServiceContext,
}

#[async_trait]
pub trait CategoryAnalyzer: Send + Sync {
    fn category(&self) -> DetailCategory;

    async fn analyze(&self, input: &AnalysisInput) -> Result<DetailAnalysisResult, AppError>;
}
