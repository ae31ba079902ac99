//! Reconciliation of freshly inferred entities against persisted ones.
//!
//! Everything here is pure: inputs are borrowed slices, outputs are new values, and no
//! storage is touched.

use crate::models::{Contact, Phone, Service};
use phonenumber::country::Id as CountryId;
use phonenumber::Mode;
use std::collections::HashMap;

/// Contacts need a name score strictly above this to match.
pub const CONTACT_NAME_THRESHOLD: f64 = 0.8;
/// Services match when the edit distance is at most this share of the longer name.
pub const SERVICE_DISTANCE_RATIO: f64 = 0.2;

/// `1 - levenshtein / max(len)` over lowercased input, `0.0` when both are empty.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 0.0;
    }
    1.0 - strsim::levenshtein(&a, &b) as f64 / max_len as f64
}

/// Service-name comparison: exact after lowercase/trim, otherwise within
/// [`SERVICE_DISTANCE_RATIO`] of the longer name. Returns the similarity when accepted.
pub fn service_name_score(candidate: &str, known: &str) -> Option<f64> {
    let a = candidate.trim().to_lowercase();
    let b = known.trim().to_lowercase();
    if a.is_empty() || b.is_empty() {
        return None;
    }
    if a == b {
        return Some(1.0);
    }
    let max_len = a.chars().count().max(b.chars().count());
    let distance = strsim::levenshtein(&a, &b);
    if distance as f64 <= SERVICE_DISTANCE_RATIO * max_len as f64 {
        Some(1.0 - distance as f64 / max_len as f64)
    } else {
        None
    }
}

/// Best service for `name` among `services`, also considering alternate names.
///
/// The scan keeps a running best and only replaces it on a strictly higher score, so
/// the result is the true maximum and ties go to the earliest candidate.
pub fn find_service_by_name<'a, I>(name: &str, services: I) -> Option<&'a Service>
where
    I: IntoIterator<Item = &'a Service>,
{
    let mut best: Option<(&'a Service, f64)> = None;
    for service in services {
        let score = std::iter::once(service.name.as_str())
            .chain(service.alternate_name.as_deref())
            .filter_map(|known| service_name_score(name, known))
            .fold(None, |acc: Option<f64>, s| Some(acc.map_or(s, |a| a.max(s))));

        if let Some(score) = score {
            if best.map_or(true, |(_, b)| score > b) {
                best = Some((service, score));
            }
        }
    }
    best.map(|(service, _)| service)
}

/// Canonical digits-only form used as the phone lookup key.
///
/// Ten-digit numbers are assumed to be North American and get the `1` country code,
/// so `+1 (234) 567-8900` and `2345678900` share a key.
pub fn normalize_phone(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() == 10 {
        format!("1{}", digits)
    } else {
        digits
    }
}

/// E.164 rendering for storage, defaulting to the US region. `None` when the number does
/// not parse as a valid phone number.
pub fn format_phone_e164(raw: &str) -> Option<String> {
    if raw.trim().is_empty() {
        return None;
    }
    match phonenumber::parse(Some(CountryId::US), raw) {
        Ok(number) if phonenumber::is_valid(&number) => {
            let formatted = number.format().mode(Mode::E164).to_string();
            tracing::debug!("✓ Valid phone: {} → {}", raw, formatted);
            Some(formatted)
        }
        Ok(_) => {
            tracing::warn!("❌ Invalid phone number: {}", raw);
            None
        }
        Err(e) => {
            tracing::warn!("❌ Failed to parse phone '{}': {:?}", raw, e);
            None
        }
    }
}

/// A contact as extracted from a transcript, before reconciliation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InferredContact {
    pub name: Option<String>,
    pub title: Option<String>,
    pub department: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub phone_description: Option<String>,
    pub phone_extension: Option<i64>,
    pub responsible_services: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMethod {
    Phone,
    Email,
    Name,
}

impl MatchMethod {
    pub fn confidence(&self) -> f64 {
        match self {
            MatchMethod::Phone => 1.0,
            MatchMethod::Email => 0.9,
            MatchMethod::Name => CONTACT_NAME_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContactMatch {
    pub inferred: InferredContact,
    pub existing: Contact,
    pub method: MatchMethod,
    pub confidence: f64,
    /// Stored phone record carrying the inferred number, if any.
    pub existing_phone: Option<Phone>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContactMatches {
    pub matched: Vec<ContactMatch>,
    pub unmatched: Vec<InferredContact>,
}

struct ContactIndex<'a> {
    contact_by_phone: HashMap<String, &'a Contact>,
    contact_by_email: HashMap<String, &'a Contact>,
    phone_by_number: HashMap<String, &'a Phone>,
}

impl<'a> ContactIndex<'a> {
    fn build(existing: &'a [Contact], phones: &'a [Phone]) -> Self {
        let by_id: HashMap<&str, &Contact> = existing.iter().map(|c| (c.id.as_str(), c)).collect();

        let mut contact_by_phone = HashMap::new();
        let mut phone_by_number = HashMap::new();
        for phone in phones {
            let key = normalize_phone(&phone.number);
            if key.is_empty() {
                continue;
            }
            phone_by_number.entry(key.clone()).or_insert(phone);
            if let Some(contact) = phone.contact_id.as_deref().and_then(|id| by_id.get(id)) {
                contact_by_phone.entry(key).or_insert(*contact);
            }
        }

        let contact_by_email = existing
            .iter()
            .filter_map(|c| {
                c.email
                    .as_deref()
                    .map(|e| e.trim().to_lowercase())
                    .filter(|e| !e.is_empty())
                    .map(|e| (e, c))
            })
            .collect();

        Self {
            contact_by_phone,
            contact_by_email,
            phone_by_number,
        }
    }
}

fn best_name_match<'a>(name: &str, existing: &'a [Contact]) -> Option<(&'a Contact, f64)> {
    let mut best: Option<(&'a Contact, f64)> = None;
    for contact in existing {
        let Some(known) = contact.name.as_deref() else {
            continue;
        };
        let score = similarity(name.trim(), known.trim());
        if score > CONTACT_NAME_THRESHOLD && best.map_or(true, |(_, b)| score > b) {
            best = Some((contact, score));
        }
    }
    best
}

/// Partition inferred contacts into matches against `existing` and leftovers.
///
/// Each inferred contact tries, in order: a stored phone linked to a contact, a
/// case-insensitive email, then the best fuzzy name above [`CONTACT_NAME_THRESHOLD`].
/// The first step that hits decides the match.
pub fn find_contact_matches(
    inferred: &[InferredContact],
    existing: &[Contact],
    phones: &[Phone],
) -> ContactMatches {
    let index = ContactIndex::build(existing, phones);
    let mut result = ContactMatches::default();

    for candidate in inferred {
        let phone_key = candidate
            .phone
            .as_deref()
            .map(normalize_phone)
            .filter(|k| !k.is_empty());

        let by_phone = phone_key
            .as_ref()
            .and_then(|k| index.contact_by_phone.get(k))
            .map(|c| (*c, MatchMethod::Phone.confidence(), MatchMethod::Phone));

        let by_email = || {
            candidate
                .email
                .as_deref()
                .map(|e| e.trim().to_lowercase())
                .and_then(|e| index.contact_by_email.get(&e).copied())
                .map(|c| (c, MatchMethod::Email.confidence(), MatchMethod::Email))
        };

        let by_name = || {
            candidate
                .name
                .as_deref()
                .filter(|n| !n.trim().is_empty())
                .and_then(|n| best_name_match(n, existing))
                .map(|(c, score)| (c, score, MatchMethod::Name))
        };

        match by_phone.or_else(by_email).or_else(by_name) {
            Some((contact, confidence, method)) => {
                tracing::debug!(
                    "Matched inferred contact {:?} to {} via {:?} ({:.2})",
                    candidate.name,
                    contact.id,
                    method,
                    confidence
                );
                result.matched.push(ContactMatch {
                    inferred: candidate.clone(),
                    existing: contact.clone(),
                    method,
                    confidence,
                    existing_phone: phone_key
                        .as_ref()
                        .and_then(|k| index.phone_by_number.get(k))
                        .map(|p| (*p).clone()),
                });
            }
            None => result.unmatched.push(candidate.clone()),
        }
    }

    result
}
