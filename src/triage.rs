use crate::analysis::DetailCategory;
use crate::errors::{AppError, InferenceError, ResultExt};
use crate::inference::InferenceClient;
use crate::prompts::triage_prompt;
use serde_json::{Map, Value};

/// Categories the transcript has evidence for, in the order the model listed them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriageResult {
    pub detected_categories: Vec<DetailCategory>,
    pub reasoning: Vec<String>,
}

fn string_array(fields: &Map<String, Value>, key: &str) -> Result<Vec<String>, InferenceError> {
    let malformed = |reason: &str| InferenceError::SchemaValidation {
        field: key.to_string(),
        reason: reason.to_string(),
    };
    fields
        .get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| malformed("expected an array"))?
        .iter()
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| malformed("expected an array of strings"))
        })
        .collect()
}

/// Turn a validated triage response into categories, dropping duplicates.
pub fn parse_triage(fields: &Map<String, Value>) -> Result<TriageResult, AppError> {
    let raw = string_array(fields, "detected_categories")?;
    let reasoning = string_array(fields, "reasoning").unwrap_or_default();

    let mut detected_categories = Vec::with_capacity(raw.len());
    for name in raw {
        let category: DetailCategory = name.parse().map_err(|_| {
            AppError::Inference(InferenceError::SchemaValidation {
                field: "detected_categories".to_string(),
                reason: format!("unknown category '{}'", name),
            })
        })?;
        if !detected_categories.contains(&category) {
            detected_categories.push(category);
        }
    }

    Ok(TriageResult {
        detected_categories,
        reasoning,
    })
}

/// Classify which detail categories `transcript` contains. One inference call, no retries
/// beyond the client's own.
pub async fn triage(
    client: &dyn InferenceClient,
    transcript: &str,
) -> Result<TriageResult, AppError> {
    let (prompt, schema) = triage_prompt(transcript);
    let fields = client
        .run_inference(&prompt, &schema)
        .await
        .context("triage inference")?;

    let result = parse_triage(&fields)?;
    tracing::info!(
        "Triage detected {} categor(ies): {:?}",
        result.detected_categories.len(),
        result.detected_categories
    );
    for reason in &result.reasoning {
        tracing::debug!("Triage reasoning: {}", reason);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_parse_keeps_order_and_dedupes() {
        let result = parse_triage(&fields(json!({
            "detected_categories": ["CONTACT", "CAPACITY", "CONTACT"],
            "reasoning": ["names a coordinator", "mentions beds"]
        })))
        .unwrap();
        assert_eq!(
            result.detected_categories,
            vec![DetailCategory::Contact, DetailCategory::Capacity]
        );
        assert_eq!(result.reasoning.len(), 2);
    }

    #[test]
    fn test_missing_categories_is_fatal() {
        let err = parse_triage(&fields(json!({"reasoning": []}))).unwrap_err();
        assert!(err.to_string().contains("detected_categories"));
    }

    #[test]
    fn test_non_string_category_is_fatal() {
        let bad = fields(json!({"detected_categories": [3], "reasoning": []}));
        assert!(parse_triage(&bad).is_err());
    }
}
