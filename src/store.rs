//! The narrow CRUD surface the pipeline persists through.
//!
//! Records travel as JSON objects whose keys are column names. The Postgres
//! implementation maps them onto rows with `jsonb_populate_record` / `to_jsonb`, so no
//! per-entity SQL exists anywhere in the crate.

use crate::circuit_breaker::{create_store_circuit_breaker, BreakerSettings};
use crate::errors::{AppError, ResultExt};
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::PgPool;
use std::future::Future;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Organization,
    Service,
    Unit,
    ServiceCapacity,
    Contact,
    Phone,
    Metadata,
    Transcripts,
    Calls,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Table::Organization => "organization",
            Table::Service => "service",
            Table::Unit => "unit",
            Table::ServiceCapacity => "service_capacity",
            Table::Contact => "contact",
            Table::Phone => "phone",
            Table::Metadata => "metadata",
            Table::Transcripts => "transcripts",
            Table::Calls => "calls",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    In(String, Vec<Value>),
}

impl Filter {
    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Filter::Eq(column.to_string(), value.into())
    }

    pub fn any_of<I, V>(column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Filter::In(column.to_string(), values.into_iter().map(Into::into).collect())
    }

    pub fn column(&self) -> &str {
        match self {
            Filter::Eq(c, _) | Filter::In(c, _) => c,
        }
    }

    /// Whether a stored row satisfies this filter.
    pub fn matches(&self, row: &Value) -> bool {
        let actual = row.get(self.column()).unwrap_or(&Value::Null);
        match self {
            Filter::Eq(_, expected) => actual == expected,
            Filter::In(_, options) => options.iter().any(|o| o == actual),
        }
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Insert one record and return its generated id.
    async fn insert(&self, table: Table, record: Value) -> Result<String, AppError>;

    /// Rows matching every filter, as JSON objects.
    async fn select(&self, table: Table, filters: &[Filter]) -> Result<Vec<Value>, AppError>;

    /// Overwrite the given columns of the row with `id`.
    async fn update(
        &self,
        table: Table,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<(), AppError>;
}

fn checked_column(name: &str) -> Result<&str, AppError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(name)
    } else {
        Err(AppError::BadRequest(format!("invalid column name '{}'", name)))
    }
}

fn columns_of(record: &Map<String, Value>) -> Result<Vec<&str>, AppError> {
    record.keys().map(|k| checked_column(k)).collect()
}

/// Postgres-backed [`Store`] guarded by a circuit breaker.
pub struct PgStore<B> {
    pool: PgPool,
    breaker: B,
}

/// Connects a pool and wraps it with a store circuit breaker.
pub async fn connect_store(
    database_url: &str,
    breaker: BreakerSettings,
) -> anyhow::Result<PgStore<impl failsafe::CircuitBreaker + Send + Sync + 'static>> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    // Fail fast on a bad connection; schema is managed outside this service
    sqlx::query("SELECT 1").execute(&pool).await?;

    Ok(PgStore::new(pool, create_store_circuit_breaker(breaker)))
}

impl<B> PgStore<B>
where
    B: failsafe::CircuitBreaker + Send + Sync,
{
    pub fn new(pool: PgPool, breaker: B) -> Self {
        Self { pool, breaker }
    }

    /// Run one query through the breaker. Open breaker means no query is issued at all.
    async fn guarded<T, F>(&self, op: String, query: F) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        if !self.breaker.is_call_permitted() {
            tracing::warn!("Store circuit open, rejecting {}", op);
            return Err(AppError::StoreUnavailable(op));
        }

        let outcome = query.await;
        match self.breaker.call(move || outcome) {
            Ok(value) => Ok(value),
            Err(failsafe::Error::Inner(e)) => Err::<T, sqlx::Error>(e).context(op),
            Err(failsafe::Error::Rejected) => Err(AppError::StoreUnavailable(op)),
        }
    }
}

#[async_trait]
impl<B> Store for PgStore<B>
where
    B: failsafe::CircuitBreaker + Send + Sync,
{
    async fn insert(&self, table: Table, record: Value) -> Result<String, AppError> {
        let Value::Object(map) = &record else {
            return Err(AppError::BadRequest(format!(
                "record for {} must be a JSON object",
                table.name()
            )));
        };
        let columns = columns_of(map)?.join(", ");
        let sql = format!(
            "INSERT INTO {t} ({cols}) SELECT {cols} FROM jsonb_populate_record(NULL::{t}, $1) RETURNING id::text",
            t = table.name(),
            cols = columns
        );

        let id = self
            .guarded(
                format!("insert into {}", table.name()),
                sqlx::query_scalar::<_, String>(&sql)
                    .bind(Json(&record))
                    .fetch_one(&self.pool),
            )
            .await?;

        tracing::debug!("Inserted {} row {}", table.name(), id);
        Ok(id)
    }

    async fn select(&self, table: Table, filters: &[Filter]) -> Result<Vec<Value>, AppError> {
        let mut clauses = Vec::with_capacity(filters.len());
        for (i, filter) in filters.iter().enumerate() {
            let column = checked_column(filter.column())?;
            let clause = match filter {
                Filter::Eq(..) => format!("(to_jsonb(t) -> '{}') = ${}", column, i + 1),
                Filter::In(..) => format!(
                    "${}::jsonb @> jsonb_build_array(to_jsonb(t) -> '{}')",
                    i + 1,
                    column
                ),
            };
            clauses.push(clause);
        }

        let mut sql = format!("SELECT to_jsonb(t) FROM {} t", table.name());
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }

        let mut query = sqlx::query_scalar::<_, Json<Value>>(&sql);
        for filter in filters {
            query = match filter {
                Filter::Eq(_, value) => query.bind(Json(value.clone())),
                Filter::In(_, values) => query.bind(Json(Value::Array(values.clone()))),
            };
        }

        let rows = self
            .guarded(format!("select from {}", table.name()), query.fetch_all(&self.pool))
            .await?;

        Ok(rows.into_iter().map(|Json(v)| v).collect())
    }

    async fn update(
        &self,
        table: Table,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<(), AppError> {
        if fields.is_empty() {
            return Ok(());
        }
        let assignments = columns_of(&fields)?
            .into_iter()
            .map(|c| format!("{c} = r.{c}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {t} SET {assignments} FROM jsonb_populate_record(NULL::{t}, $1) AS r WHERE {t}.id::text = $2",
            t = table.name(),
            assignments = assignments
        );

        let result = self
            .guarded(
                format!("update {} {}", table.name(), id),
                sqlx::query(&sql)
                    .bind(Json(Value::Object(fields)))
                    .bind(id)
                    .execute(&self.pool),
            )
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("{} {}", table.name(), id)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_column_names_are_checked() {
        assert!(checked_column("organization_id").is_ok());
        assert!(checked_column("_private").is_ok());
        assert!(checked_column("name; DROP TABLE service").is_err());
        assert!(checked_column("Name").is_err());
        assert!(checked_column("").is_err());
    }

    #[test]
    fn test_filter_matches_rows() {
        let row = json!({"organization_id": "org-1", "contact_id": "c-2"});
        assert!(Filter::eq("organization_id", "org-1").matches(&row));
        assert!(!Filter::eq("organization_id", "org-2").matches(&row));
        assert!(Filter::any_of("contact_id", ["c-1", "c-2"]).matches(&row));
        assert!(!Filter::any_of("contact_id", Vec::<String>::new()).matches(&row));
        assert!(Filter::eq("service_id", Value::Null).matches(&row));
    }
}
