//! Top-level transcript pipeline.
//!
//! `StoreCall → ServiceExtraction → ServiceReconciliationApply → Triage → DetailFanOut → Storage`
//!
//! Each stage commits its own writes. A failure stops the run at that stage and nothing
//! already written is rolled back.

use crate::analysis::{AnalysisInput, DetailAnalysisResult, DetailCategory};
use crate::db_storage::HsdsStorage;
use crate::errors::AppError;
use crate::inference::InferenceClient;
use crate::models::TranscriptRequest;
use crate::orchestrator::{handle_triaged_analysis, AnalyzerRegistry};
use crate::services::{apply_service_reconciliation, extract_and_reconcile_services};
use crate::triage::triage;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    StoreCall,
    ServiceExtraction,
    ServiceReconciliationApply,
    Triage,
    DetailFanOut,
    Storage,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::StoreCall => "store_call",
            PipelineStage::ServiceExtraction => "service_extraction",
            PipelineStage::ServiceReconciliationApply => "service_reconciliation_apply",
            PipelineStage::Triage => "triage",
            PipelineStage::DetailFanOut => "detail_fan_out",
            PipelineStage::Storage => "storage",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The stage a run failed in and why.
#[derive(Debug)]
pub struct PipelineError {
    pub stage: PipelineStage,
    pub source: AppError,
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pipeline failed at {}: {}", self.stage, self.source)
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

fn at(stage: PipelineStage) -> impl FnOnce(AppError) -> PipelineError {
    move |source| PipelineError { stage, source }
}

/// Summary of a completed run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineReport {
    pub call_id: String,
    pub new_services: usize,
    pub updated_services: usize,
    pub detected_categories: Vec<DetailCategory>,
    pub results: Vec<DetailAnalysisResult>,
}

pub struct TranscriptProcessor {
    client: Arc<dyn InferenceClient>,
    storage: HsdsStorage,
    registry: AnalyzerRegistry,
}

impl TranscriptProcessor {
    pub fn new(
        client: Arc<dyn InferenceClient>,
        storage: HsdsStorage,
        registry: AnalyzerRegistry,
    ) -> Self {
        Self {
            client,
            storage,
            registry,
        }
    }

    /// Run the whole pipeline for one transcript.
    pub async fn run(&self, request: &TranscriptRequest) -> Result<PipelineReport, PipelineError> {
        let started = Instant::now();
        let organization_id = request.organization_id.as_str();

        let call_id = self
            .storage
            .store_call_data(organization_id, &request.room_url, &request.transcript)
            .await
            .map_err(at(PipelineStage::StoreCall))?;

        let reconciliation = extract_and_reconcile_services(
            self.client.as_ref(),
            &self.storage,
            organization_id,
            &request.transcript,
        )
        .await
        .map_err(at(PipelineStage::ServiceExtraction))?;

        apply_service_reconciliation(&self.storage, &reconciliation, &call_id)
            .await
            .map_err(at(PipelineStage::ServiceReconciliationApply))?;

        let mut report = PipelineReport {
            call_id: call_id.clone(),
            new_services: reconciliation.context.new_services.len(),
            updated_services: reconciliation.updates.len(),
            ..Default::default()
        };

        let triage_result = triage(self.client.as_ref(), &request.transcript)
            .await
            .map_err(at(PipelineStage::Triage))?;
        report.detected_categories = triage_result.detected_categories.clone();

        if triage_result.detected_categories.is_empty() {
            tracing::info!(call_id = %call_id, "No detail categories detected, skipping analysis");
        } else {
            let input = Arc::new(AnalysisInput {
                organization_id: organization_id.to_string(),
                call_id: call_id.clone(),
                transcript: request.transcript.clone(),
                services: reconciliation.context,
            });

            report.results = handle_triaged_analysis(&self.registry, input, &triage_result)
                .await
                .map_err(at(PipelineStage::DetailFanOut))?;

            self.store_results(&report.results, &call_id)
                .await
                .map_err(at(PipelineStage::Storage))?;
        }

        tracing::info!(
            call_id = %call_id,
            organization_id = %organization_id,
            "✓ Pipeline completed in {:?}: {} new service(s), {} updated, {} detail result(s)",
            started.elapsed(),
            report.new_services,
            report.updated_services,
            report.results.len()
        );
        Ok(report)
    }

    /// Persist what the analyzers produced but did not write themselves.
    async fn store_results(
        &self,
        results: &[DetailAnalysisResult],
        call_id: &str,
    ) -> Result<(), AppError> {
        for result in results {
            match result {
                DetailAnalysisResult::Capacity(capacity) => {
                    self.storage.store_units(&capacity.units, call_id).await?;
                    self.storage
                        .store_capacities(&capacity.capacities, call_id)
                        .await?;
                    tracing::info!(
                        "✓ Stored {} unit(s) and {} capacit(ies)",
                        capacity.units.len(),
                        capacity.capacities.len()
                    );
                }
                DetailAnalysisResult::Contact(contact) => {
                    // Written during analysis
                    tracing::debug!(
                        "Contact analysis wrote {} new contact(s), {} update(s), {} audit row(s)",
                        contact.created_contacts.len(),
                        contact.updated_contact_ids.len(),
                        contact.metadata_rows
                    );
                }
            }
        }
        Ok(())
    }
}

/// Bounded pool of background pipeline runs.
///
/// [`PipelineRunner::submit`] returns the task handle so the caller decides whether to
/// await it, abort it, or drop it.
#[derive(Clone)]
pub struct PipelineRunner {
    processor: Arc<TranscriptProcessor>,
    permits: Arc<Semaphore>,
}

impl PipelineRunner {
    pub fn new(processor: TranscriptProcessor, workers: usize) -> Self {
        Self {
            processor: Arc::new(processor),
            permits: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    pub fn submit(
        &self,
        request_id: String,
        request: TranscriptRequest,
    ) -> JoinHandle<Result<PipelineReport, PipelineError>> {
        let processor = Arc::clone(&self.processor);
        let permits = Arc::clone(&self.permits);

        tokio::spawn(async move {
            let _permit = permits.acquire_owned().await.map_err(|_| PipelineError {
                stage: PipelineStage::StoreCall,
                source: AppError::InternalError("pipeline worker pool closed".to_string()),
            })?;

            tracing::info!(
                request_id = %request_id,
                organization_id = %request.organization_id,
                "Starting transcript pipeline"
            );

            let outcome = processor.run(&request).await;
            match &outcome {
                Ok(report) => tracing::info!(
                    request_id = %request_id,
                    call_id = %report.call_id,
                    "Transcript pipeline finished"
                ),
                Err(e) => tracing::error!(
                    request_id = %request_id,
                    stage = %e.stage,
                    "Transcript pipeline failed: {}",
                    e.source
                ),
            }
            outcome
        })
    }
}
