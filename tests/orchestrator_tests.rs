use async_trait::async_trait;
use rust_hsds_analysis::analysis::{
    AnalysisInput, CapacityResult, CategoryAnalyzer, ContactResult, DetailAnalysisResult,
    DetailCategory, ServiceContext,
};
use rust_hsds_analysis::errors::AppError;
use rust_hsds_analysis::orchestrator::{handle_triaged_analysis, AnalyzerRegistry};
use rust_hsds_analysis::triage::TriageResult;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;

enum Behavior {
    Succeed,
    Fail(&'static str),
    Panic,
    WaitFor(Arc<Barrier>),
}

struct FakeAnalyzer {
    category: DetailCategory,
    behavior: Behavior,
}

#[async_trait]
impl CategoryAnalyzer for FakeAnalyzer {
    fn category(&self) -> DetailCategory {
        self.category
    }

    async fn analyze(&self, _input: &AnalysisInput) -> Result<DetailAnalysisResult, AppError> {
        match &self.behavior {
            Behavior::Succeed => {}
            Behavior::Fail(msg) => return Err(AppError::EntityResolution(msg.to_string())),
            Behavior::Panic => panic!("analyzer blew up"),
            Behavior::WaitFor(barrier) => {
                barrier.wait().await;
            }
        }
        Ok(match self.category {
            DetailCategory::Contact => DetailAnalysisResult::Contact(ContactResult::default()),
            _ => DetailAnalysisResult::Capacity(CapacityResult::default()),
        })
    }
}

fn registry(analyzers: Vec<(DetailCategory, Behavior)>) -> AnalyzerRegistry {
    let mut registry = AnalyzerRegistry::new();
    for (category, behavior) in analyzers {
        registry.register(Arc::new(FakeAnalyzer { category, behavior }));
    }
    registry
}

fn input() -> Arc<AnalysisInput> {
    Arc::new(AnalysisInput {
        organization_id: "org-1".to_string(),
        call_id: "call-1".to_string(),
        transcript: "We have 5 beds and you can call Jane.".to_string(),
        services: ServiceContext::default(),
    })
}

fn triaged(categories: &[DetailCategory]) -> TriageResult {
    TriageResult {
        detected_categories: categories.to_vec(),
        reasoning: vec![],
    }
}

const THREE: [DetailCategory; 3] = [
    DetailCategory::Capacity,
    DetailCategory::Contact,
    DetailCategory::Scheduling,
];

#[tokio::test]
async fn test_all_units_succeed_in_triage_order() {
    let registry = registry(vec![
        (DetailCategory::Capacity, Behavior::Succeed),
        (DetailCategory::Contact, Behavior::Succeed),
    ]);

    let results = handle_triaged_analysis(
        &registry,
        input(),
        &triaged(&[DetailCategory::Contact, DetailCategory::Capacity]),
    )
    .await
    .unwrap();

    let categories: Vec<_> = results.iter().map(|r| r.category()).collect();
    assert_eq!(
        categories,
        vec![DetailCategory::Contact, DetailCategory::Capacity]
    );
}

#[tokio::test]
async fn test_one_failure_discards_all_results() {
    let registry = registry(vec![
        (DetailCategory::Capacity, Behavior::Succeed),
        (DetailCategory::Contact, Behavior::Fail("unknown service 'Dental'")),
        (DetailCategory::Scheduling, Behavior::Succeed),
    ]);

    let err = handle_triaged_analysis(&registry, input(), &triaged(&THREE))
        .await
        .unwrap_err();

    let failures = err.category_failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].category, "CONTACT");
    assert!(failures[0].message.contains("unknown service 'Dental'"));
    assert!(err.to_string().starts_with("multiple errors occurred:"));
}

#[tokio::test]
async fn test_every_failure_is_reported() {
    let registry = registry(vec![
        (DetailCategory::Capacity, Behavior::Fail("first")),
        (DetailCategory::Contact, Behavior::Succeed),
        (DetailCategory::Scheduling, Behavior::Fail("third")),
    ]);

    let err = handle_triaged_analysis(&registry, input(), &triaged(&THREE))
        .await
        .unwrap_err();

    let categories: Vec<_> = err
        .category_failures()
        .iter()
        .map(|f| f.category.as_str())
        .collect();
    assert_eq!(categories, vec!["CAPACITY", "SCHEDULING"]);
    let rendered = err.to_string();
    assert!(rendered.contains("error analyzing category CAPACITY"));
    assert!(rendered.contains("error analyzing category SCHEDULING"));
}

#[tokio::test]
async fn test_panicking_unit_counts_as_failure() {
    let registry = registry(vec![
        (DetailCategory::Capacity, Behavior::Panic),
        (DetailCategory::Contact, Behavior::Succeed),
    ]);

    let err = handle_triaged_analysis(
        &registry,
        input(),
        &triaged(&[DetailCategory::Capacity, DetailCategory::Contact]),
    )
    .await
    .unwrap_err();

    assert_eq!(err.category_failures()[0].category, "CAPACITY");
}

#[tokio::test]
async fn test_category_without_analyzer_is_skipped() {
    let registry = registry(vec![(DetailCategory::Capacity, Behavior::Succeed)]);

    let results = handle_triaged_analysis(
        &registry,
        input(),
        &triaged(&[DetailCategory::Program, DetailCategory::Capacity]),
    )
    .await
    .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].category(), DetailCategory::Capacity);
}

#[tokio::test]
async fn test_units_run_concurrently() {
    // Each unit waits for all three; a sequential fan-out would never get past the first.
    let barrier = Arc::new(Barrier::new(3));
    let registry = registry(vec![
        (DetailCategory::Capacity, Behavior::WaitFor(barrier.clone())),
        (DetailCategory::Contact, Behavior::WaitFor(barrier.clone())),
        (DetailCategory::Scheduling, Behavior::WaitFor(barrier)),
    ]);

    let results = tokio::time::timeout(
        Duration::from_secs(5),
        handle_triaged_analysis(&registry, input(), &triaged(&THREE)),
    )
    .await
    .expect("fan-out did not run units concurrently")
    .unwrap();

    assert_eq!(results.len(), 3);
}
