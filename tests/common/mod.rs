#![allow(dead_code)]

use async_trait::async_trait;
use rust_hsds_analysis::db_storage::HsdsStorage;
use rust_hsds_analysis::errors::{AppError, InferenceError};
use rust_hsds_analysis::inference::InferenceClient;
use rust_hsds_analysis::models::{Service, ServiceOptions, ServiceStatus};
use rust_hsds_analysis::schema::ToolSchema;
use rust_hsds_analysis::store::{Filter, Store, Table};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Store backed by per-table row vectors.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<Table, Vec<Value>>>,
    failing: Mutex<Option<Table>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every insert into `table` fail from now on.
    pub fn fail_inserts_into(&self, table: Table) {
        *self.failing.lock().unwrap() = Some(table);
    }

    pub fn rows(&self, table: Table) -> Vec<Value> {
        self.tables
            .lock()
            .unwrap()
            .get(&table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn seed(&self, table: Table, row: Value) {
        self.tables
            .lock()
            .unwrap()
            .entry(table)
            .or_default()
            .push(row);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert(&self, table: Table, record: Value) -> Result<String, AppError> {
        if *self.failing.lock().unwrap() == Some(table) {
            return Err(AppError::StoreUnavailable(format!(
                "insert into {} refused",
                table.name()
            )));
        }

        let mut record = record;
        let id = match record.get("id").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                record["id"] = json!(id);
                id
            }
        };
        self.seed(table, record);
        Ok(id)
    }

    async fn select(&self, table: Table, filters: &[Filter]) -> Result<Vec<Value>, AppError> {
        Ok(self
            .rows(table)
            .into_iter()
            .filter(|row| filters.iter().all(|f| f.matches(row)))
            .collect())
    }

    async fn update(
        &self,
        table: Table,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<(), AppError> {
        let mut tables = self.tables.lock().unwrap();
        let row = tables
            .get_mut(&table)
            .and_then(|rows| rows.iter_mut().find(|r| r["id"] == json!(id)))
            .ok_or_else(|| AppError::NotFound(format!("{} {}", table.name(), id)))?;
        for (key, value) in fields {
            row[key.as_str()] = value;
        }
        Ok(())
    }
}

/// Inference fake answering by which output the schema asks for.
///
/// Responses are validated against the schema like the real client does.
#[derive(Default)]
pub struct ScriptedInference {
    responses: Mutex<HashMap<String, Result<Value, InferenceError>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedInference {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Answer schemas that declare `property` with `response`.
    pub fn respond(&self, property: &str, response: Value) {
        self.responses
            .lock()
            .unwrap()
            .insert(property.to_string(), Ok(response));
    }

    pub fn fail(&self, property: &str, error: InferenceError) {
        self.responses
            .lock()
            .unwrap()
            .insert(property.to_string(), Err(error));
    }

    /// Top-level properties of every schema seen, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl InferenceClient for ScriptedInference {
    async fn run_inference(
        &self,
        _prompt: &str,
        schema: &ToolSchema,
    ) -> Result<Map<String, Value>, InferenceError> {
        let key = schema
            .properties
            .keys()
            .find(|k| self.responses.lock().unwrap().contains_key(k.as_str()))
            .cloned()
            .ok_or(InferenceError::NoStructuredOutput)?;
        self.calls.lock().unwrap().push(key.clone());

        let response = self.responses.lock().unwrap().get(&key).cloned().unwrap();
        let fields = response?
            .as_object()
            .cloned()
            .ok_or_else(|| InferenceError::MalformedJson("not an object".to_string()))?;
        schema.validate(&fields)?;
        Ok(fields)
    }
}

pub const ORG_ID: &str = "0b7c9d0e-1111-4222-8333-944455556666";

/// Storage over `store` with one organization seeded.
pub fn storage_with_org(store: Arc<MemoryStore>) -> HsdsStorage {
    store.seed(
        Table::Organization,
        json!({"id": ORG_ID, "name": "Hope Community Center"}),
    );
    HsdsStorage::new(store, "BearHug")
}

/// Insert an existing active service for the seeded organization.
pub fn seed_service(store: &MemoryStore, name: &str, description: &str) -> Service {
    let service = Service::new(
        ORG_ID,
        name,
        ServiceStatus::Active,
        ServiceOptions {
            description: Some(description.to_string()),
            ..Default::default()
        },
    )
    .unwrap();
    store.seed(Table::Service, serde_json::to_value(&service).unwrap());
    service
}
