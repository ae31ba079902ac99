//! Fan-out of the detail-analysis phase: one task per detected category, all joined,
//! all-or-nothing.

use crate::analysis::{AnalysisInput, CategoryAnalyzer, DetailAnalysisResult, DetailCategory};
use crate::capacity::CapacityAnalyzer;
use crate::contacts::ContactAnalyzer;
use crate::db_storage::HsdsStorage;
use crate::errors::{AppError, CategoryFailure};
use crate::inference::InferenceClient;
use crate::triage::TriageResult;
use futures::future::join_all;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::task::{JoinError, JoinHandle};

/// Analyzers by category. Categories without an entry are skipped during fan-out.
#[derive(Clone, Default)]
pub struct AnalyzerRegistry {
    analyzers: HashMap<DetailCategory, Arc<dyn CategoryAnalyzer>>,
}

impl AnalyzerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capacity and contact analyzers backed by `client` and `storage`.
    pub fn with_defaults(client: Arc<dyn InferenceClient>, storage: HsdsStorage) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(CapacityAnalyzer::new(client.clone())));
        registry.register(Arc::new(ContactAnalyzer::new(client, storage)));
        registry
    }

    /// Adds or replaces the analyzer for its category.
    pub fn register(&mut self, analyzer: Arc<dyn CategoryAnalyzer>) {
        self.analyzers.insert(analyzer.category(), analyzer);
    }

    pub fn get(&self, category: DetailCategory) -> Option<Arc<dyn CategoryAnalyzer>> {
        self.analyzers.get(&category).cloned()
    }
}

/// Aborts the spawned task when dropped, so cancelling the fan-out cancels its units.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl<T> Future for AbortOnDrop<T> {
    type Output = Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx)
    }
}

type UnitOutcome = (Result<DetailAnalysisResult, AppError>, Duration);

/// Run one analyzer per detected category concurrently and wait for all of them.
///
/// Results come back in triage order. If any unit fails (including a panic), the whole
/// call fails with [`AppError::Aggregate`] listing every failed category, and none of the
/// successful results are returned.
pub async fn handle_triaged_analysis(
    registry: &AnalyzerRegistry,
    input: Arc<AnalysisInput>,
    triage: &TriageResult,
) -> Result<Vec<DetailAnalysisResult>, AppError> {
    tracing::info!(
        "Starting triaged analysis: {} categor(ies), {} existing / {} new services",
        triage.detected_categories.len(),
        input.services.existing_services.len(),
        input.services.new_services.len()
    );

    let mut units = Vec::with_capacity(triage.detected_categories.len());
    for (index, &category) in triage.detected_categories.iter().enumerate() {
        let Some(analyzer) = registry.get(category) else {
            tracing::error!(
                "No analyzer available for category {} (index {}), skipping",
                category,
                index
            );
            continue;
        };

        let input = Arc::clone(&input);
        let handle = tokio::spawn(async move {
            tracing::debug!("Beginning category analysis: {}", category);
            let started = Instant::now();
            let outcome = analyzer.analyze(&input).await;
            (outcome, started.elapsed())
        });
        units.push((category, AbortOnDrop(handle)));
    }

    let outcomes: Vec<(DetailCategory, Result<UnitOutcome, JoinError>)> = join_all(
        units
            .into_iter()
            .map(|(category, unit)| async move { (category, unit.await) }),
    )
    .await;

    let mut results = Vec::with_capacity(outcomes.len());
    let mut failures = Vec::new();
    let mut total = Duration::ZERO;

    for (category, joined) in outcomes {
        match joined {
            Ok((Ok(result), elapsed)) => {
                total += elapsed;
                tracing::debug!("Category {} analysis completed in {:?}", category, elapsed);
                results.push(result);
            }
            Ok((Err(e), elapsed)) => {
                total += elapsed;
                tracing::error!("Category {} analysis failed after {:?}: {}", category, elapsed, e);
                failures.push(CategoryFailure {
                    category: category.to_string(),
                    message: e.to_string(),
                });
            }
            Err(join_error) => {
                tracing::error!("Category {} analysis task died: {}", category, join_error);
                failures.push(CategoryFailure {
                    category: category.to_string(),
                    message: format!("analysis task did not complete: {}", join_error),
                });
            }
        }
    }

    if !failures.is_empty() {
        return Err(AppError::Aggregate(failures));
    }

    tracing::info!(
        "Triaged analysis completed: {} result(s), {:?} total analyzer time",
        results.len(),
        total
    );
    Ok(results)
}
