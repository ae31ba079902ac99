//! Prompt text and output schema for every inference call the pipeline makes.

use crate::analysis::{DetailCategory, ServiceContext};
use crate::models::{Service, ServiceStatus};
use crate::schema::{Property, ToolSchema};
use std::collections::BTreeMap;

fn props<const N: usize>(entries: [(&str, Property); N]) -> BTreeMap<String, Property> {
    entries
        .into_iter()
        .map(|(name, prop)| (name.to_string(), prop))
        .collect()
}

// ============ Triage ============

pub fn triage_schema() -> ToolSchema {
    let categories: Vec<&str> = DetailCategory::IMPLEMENTED.iter().map(|c| c.as_str()).collect();
    ToolSchema::object(
        props([
            (
                "detected_categories",
                Property::array(
                    Property::string("").with_enum(&categories),
                    "Categories with concrete evidence in the transcript",
                ),
            ),
            (
                "reasoning",
                Property::array(
                    Property::string(""),
                    "One short justification per detected category",
                ),
            ),
        ]),
        &["detected_categories", "reasoning"],
    )
}

pub fn triage_prompt(transcript: &str) -> (String, ToolSchema) {
    let mut categories = String::new();
    for category in DetailCategory::IMPLEMENTED {
        categories.push_str(&format!(
            "- {} (tables: {}): {}\n",
            category.as_str(),
            category.tables().join(", "),
            category.description()
        ));
    }

    let prompt = format!(
        r#"You are analyzing a call transcript between an outreach agent and a representative of a community organization that provides human services.
Identify which of the following categories of service details the transcript contains concrete information about.

Categories:
{categories}
Guidelines:
- Only report a category when the transcript contains specific, usable information for it.
- Do not report a category based on vague or hypothetical mentions.
- For CAPACITY category, look for both the quantity AND its unit of measurement.
- For CONTACT category, consider both contact names and associated phone numbers.
- Give one reasoning entry for each detected category.

Transcript:
{transcript}
"#
    );

    (prompt, triage_schema())
}

// ============ Services ============

pub fn services_schema() -> ToolSchema {
    let statuses: Vec<&str> = [
        ServiceStatus::Active,
        ServiceStatus::Inactive,
        ServiceStatus::Defunct,
    ]
    .iter()
    .map(|s| s.as_str())
    .collect();

    let service = Property::object(
        props([
            ("name", Property::string("The name of the service")),
            (
                "status",
                Property::string("The current status of the service").with_enum(&statuses),
            ),
            (
                "description",
                Property::string("A description of the service"),
            ),
            (
                "application_process",
                Property::string("The steps needed to access the service"),
            ),
            (
                "fees_description",
                Property::string("Details of any charges for using the service"),
            ),
            (
                "eligibility_description",
                Property::string("Who is eligible to receive the service"),
            ),
            (
                "wait_time",
                Property::string("Time a client may expect to wait before receiving the service"),
            ),
        ]),
        &["name", "status", "description"],
    );

    ToolSchema::object(
        props([(
            "new_services",
            Property::array(service, "Services mentioned in the transcript"),
        )]),
        &["new_services"],
    )
}

fn render_active_services(services: &[Service]) -> String {
    let active: Vec<&Service> = services
        .iter()
        .filter(|s| s.status == ServiceStatus::Active)
        .collect();
    if active.is_empty() {
        return "(no services on record)\n".to_string();
    }

    let mut out = String::new();
    for (i, service) in active.iter().enumerate() {
        match service.alternate_name.as_deref() {
            Some(alt) if !alt.is_empty() => {
                out.push_str(&format!("{}. {} AKA {}\n", i + 1, service.name, alt))
            }
            _ => out.push_str(&format!("{}. {}\n", i + 1, service.name)),
        }
        if let Some(description) = service.description.as_deref() {
            out.push_str(&format!("   Description: {}\n", description));
        }
    }
    out
}

pub fn services_prompt(
    organization_name: &str,
    existing: &[Service],
    transcript: &str,
) -> (String, ToolSchema) {
    let existing_block = render_active_services(existing);
    let prompt = format!(
        r#"You are a service data extraction specialist documenting human services available to the underprivileged in your community.
The transcript below is a conversation with a representative of {organization_name}.

Services already on record for {organization_name}:
{existing_block}
Extraction rules:
- Report every service the representative describes, using the name already on record when the service is one of the above.
- Break composite offerings into separate services (e.g. "food and clothing assistance" becomes two services).
- Only fill in fields the transcript actually supports; leave the rest out.
- Use status "inactive" or "defunct" only when the representative says so explicitly.
- Do not invent services that are not discussed.

Transcript:
{transcript}
"#
    );

    (prompt, services_schema())
}

// ============ Capacity ============

pub fn capacity_schema() -> ToolSchema {
    let capacity = Property::object(
        props([
            (
                "serviceName",
                Property::string("Name of the service this capacity belongs to, as listed"),
            ),
            (
                "available",
                Property::number("How many units are currently available"),
            ),
            (
                "maximum",
                Property::number("Maximum number of units the service can hold"),
            ),
            (
                "description",
                Property::string("Any qualification of the capacity figure"),
            ),
            (
                "unitName",
                Property::string("Unit of measurement, e.g. beds, appointments, meals"),
            ),
            (
                "unitDescription",
                Property::string("What one unit represents"),
            ),
            ("unitScheme", Property::string("Measurement scheme, if any")),
            ("unitIdentifier", Property::string("Identifier within the scheme")),
            ("unitUri", Property::string("URI describing the unit")),
        ]),
        &["serviceName", "available", "unitName", "unitDescription"],
    );

    ToolSchema::object(
        props([(
            "capacities",
            Property::array(capacity, "One entry per service and unit"),
        )]),
        &["capacities"],
    )
}

pub fn capacity_prompt(transcript: &str, services: &ServiceContext) -> (String, ToolSchema) {
    let catalog = services.render();
    let prompt = format!(
        r#"You are a service data extraction specialist that documents details about human services available to the underprivileged in your community.
Your task is to identify and structure information about the capacity that certain services have.

Known services:
{catalog}
Rules:
- Every capacity must name one of the known services above in serviceName.
- Report a capacity only when both a quantity and its unit are stated.
- When a maximum is mentioned alongside what is available, report both.

Transcript:
{transcript}
"#
    );

    (prompt, capacity_schema())
}

// ============ Contacts ============

pub fn contact_schema() -> ToolSchema {
    let contact = Property::object(
        props([
            ("name", Property::string("Full name of the contact person")),
            ("title", Property::string("Job title")),
            ("department", Property::string("Department or team")),
            ("email", Property::string("Email address")),
            (
                "phone",
                Property::string("Phone number including country code, e.g. +15551234567"),
            ),
            (
                "phoneDescription",
                Property::string("What the line is for, e.g. front desk, direct line, intake"),
            ),
            (
                "phoneExtension",
                Property::integer("Extension digits only"),
            ),
            (
                "responsibleServices",
                Property::array(
                    Property::string(""),
                    "Names of the services this contact handles",
                ),
            ),
        ]),
        &[],
    )
    .any_of(&["name", "email", "phone"]);

    ToolSchema::object(
        props([(
            "contacts",
            Property::array(contact, "People or lines to contact"),
        )]),
        &["contacts"],
    )
}

pub fn contact_prompt(transcript: &str, services: &ServiceContext) -> (String, ToolSchema) {
    let catalog = services.render();
    let prompt = format!(
        r#"You are a service data extraction specialist that documents how to reach the people and lines behind human services in your community.
Identify every contact mentioned in the transcript.

{catalog}
Phone formatting rules:
- Always include the country code; assume +1 when none is given.
- Put extensions in phoneExtension as an integer, never inside phone.
- Use phoneDescription to say what the line is for, especially for shared or front desk numbers.
- Each contact needs at least a name, an email, or a phone number.

Transcript:
{transcript}
"#
    );

    (prompt, contact_schema())
}
