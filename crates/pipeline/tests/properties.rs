//! Run-level guarantees: restartability, fail-fast dependencies, the
//! failure policy and document-stage variants.

mod common;

use common::{FakeCompiler, Reply, ScriptedProvider, plan, scheduler};
use paperchain_config::{ModelCatalog, PipelineSettings};
use paperchain_core::{ArtifactKey, ContextStore, Error, ProviderKind, RunRange, Stage};
use paperchain_pipeline::{GenerationClient, Scheduler, StageState};
use paperchain_providers::ProviderRouter;
use paperchain_store::{FileStore, InMemoryStore};
use paperchain_telemetry::CostLedger;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn paper_plan() -> paperchain_core::Plan {
    plan(vec![
        Stage::new("intro", "Write the introduction.", "sonnet"),
        Stage::new("body", "Write the body.", "o1"),
        Stage::new("conclusion", "Write the conclusion.", "sonnet"),
    ])
}

fn paper_provider() -> Arc<ScriptedProvider> {
    ScriptedProvider::new()
        .on("Write the introduction.", Reply::text("INTRO"))
        .on("Write the body.", Reply::text("BODY"))
        .on("Write the conclusion.", Reply::text("CONCLUSION"))
}

fn snapshot(dir: &Path) -> BTreeMap<String, String> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| {
            let path = entry.unwrap().path();
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            (name, std::fs::read_to_string(&path).unwrap())
        })
        .collect()
}

async fn run_on(dir: &Path, range: RunRange) -> Vec<paperchain_pipeline::StageOutcome> {
    let refs = TempDir::new().unwrap();
    let store = Arc::new(FileStore::new(dir, refs.path()));
    let (scheduler, _) = scheduler(
        store,
        paper_provider(),
        FakeCompiler::new(dir),
        PipelineSettings::default(),
    );
    scheduler.run(&paper_plan(), &range).await.unwrap()
}

#[tokio::test]
async fn split_runs_produce_the_same_artifacts_as_one_run() {
    let whole = TempDir::new().unwrap();
    let split = TempDir::new().unwrap();

    run_on(whole.path(), RunRange::between(1, 3)).await;
    run_on(split.path(), RunRange::between(1, 2)).await;
    let resumed = run_on(split.path(), RunRange::between(3, 3)).await;

    assert_eq!(resumed.len(), 1);
    assert!(resumed[0].succeeded());
    assert_eq!(snapshot(whole.path()), snapshot(split.path()));
}

#[tokio::test]
async fn missing_dependency_fails_before_any_generation() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(InMemoryStore::new());
    let provider = paper_provider();
    let (scheduler, ledger) = scheduler(
        store.clone(),
        provider.clone(),
        FakeCompiler::new(dir.path()),
        PipelineSettings::default(),
    );

    let outcomes = scheduler
        .run(&paper_plan(), &RunRange::between(2, 2))
        .await
        .unwrap();

    assert_eq!(outcomes[0].state(), StageState::Failed);
    assert!(outcomes[0].error.as_deref().unwrap().contains("intro (response)"));
    assert_eq!(provider.call_count(), 0);
    assert!(ledger.entries().is_empty());
    let diagnostic = store.get(&ArtifactKey::diagnostic("body")).await.unwrap().unwrap();
    assert!(diagnostic.contains("intro"));
    assert!(store.get(&ArtifactKey::prompt("body")).await.unwrap().is_none());
}

#[tokio::test]
async fn generation_failure_aborts_remaining_stages_by_default() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(InMemoryStore::new());
    let provider = ScriptedProvider::new()
        .on("Write the introduction.", Reply::text("INTRO"))
        .on("Write the body.", Reply::Fail("connection reset".into()));
    let (scheduler, ledger) = scheduler(
        store.clone(),
        provider.clone(),
        FakeCompiler::new(dir.path()),
        PipelineSettings::default(),
    );

    let outcomes = scheduler.run(&paper_plan(), &RunRange::all()).await.unwrap();

    let states: Vec<StageState> = outcomes.iter().map(|o| o.state()).collect();
    assert_eq!(states, vec![StageState::Done, StageState::Failed, StageState::Skipped]);
    assert_eq!(provider.call_count(), 2);
    assert_eq!(ledger.entries().len(), 1);

    let diagnostic = store.get(&ArtifactKey::diagnostic("body")).await.unwrap().unwrap();
    assert!(diagnostic.contains("connection reset"));
    // The payload that was attempted stays on record.
    let prompt = store.get(&ArtifactKey::prompt("body")).await.unwrap().unwrap();
    assert!(prompt.contains("INTRO"));
    assert!(store.get(&ArtifactKey::response("body")).await.unwrap().is_none());
}

#[tokio::test]
async fn continue_on_failure_skips_only_dependents() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(InMemoryStore::new());
    let provider = ScriptedProvider::new()
        .on("Write the body.", Reply::Fail("overloaded".into()));
    let settings = PipelineSettings {
        continue_on_failure: true,
        ..PipelineSettings::default()
    };
    let (scheduler, _) = scheduler(store, provider, FakeCompiler::new(dir.path()), settings);

    let plan = plan(vec![
        Stage::new("intro", "Write the introduction.", "sonnet"),
        Stage::new("body", "Write the body.", "sonnet").depends_on(&["intro"]),
        Stage::new("abstract", "Write the abstract.", "sonnet").depends_on(&["intro"]),
        Stage::new("conclusion", "Write the conclusion.", "sonnet"),
    ]);
    let outcomes = scheduler.run(&plan, &RunRange::all()).await.unwrap();

    let states: Vec<StageState> = outcomes.iter().map(|o| o.state()).collect();
    assert_eq!(
        states,
        vec![StageState::Done, StageState::Failed, StageState::Done, StageState::Skipped]
    );
    assert!(outcomes[3].error.as_deref().unwrap().contains("body"));
}

#[tokio::test]
async fn stage_override_wins_over_run_policy() {
    let dir = TempDir::new().unwrap();
    let provider = ScriptedProvider::new().on("Write the body.", Reply::Fail("overloaded".into()));
    let (scheduler, _) = scheduler(
        Arc::new(InMemoryStore::new()),
        provider,
        FakeCompiler::new(dir.path()),
        PipelineSettings::default(),
    );

    let mut body = Stage::new("body", "Write the body.", "sonnet");
    body.continue_on_failure = Some(true);
    let plan = plan(vec![
        body,
        Stage::new("notes", "Write notes.", "sonnet").depends_on(&[]),
    ]);
    let outcomes = scheduler.run(&plan, &RunRange::all()).await.unwrap();

    assert_eq!(outcomes[0].state(), StageState::Failed);
    assert!(outcomes[1].succeeded());
}

#[tokio::test]
async fn missing_provider_is_a_config_error_before_side_effects() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(InMemoryStore::new());
    let provider = paper_provider();
    let mut router = ProviderRouter::new();
    router.register(ProviderKind::Anthropic, provider.clone());
    let client = GenerationClient::new(
        router,
        ModelCatalog::with_defaults(),
        Arc::new(CostLedger::in_memory()),
    );
    let scheduler = Scheduler::new(
        store.clone(),
        Arc::new(client),
        FakeCompiler::new(dir.path()),
        PipelineSettings::default(),
    );

    let err = scheduler.run(&paper_plan(), &RunRange::all()).await.unwrap_err();

    assert!(matches!(err, Error::Config { .. }));
    assert!(err.to_string().contains("o1"));
    assert_eq!(provider.call_count(), 0);
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn invalid_range_is_rejected() {
    let dir = TempDir::new().unwrap();
    let (scheduler, _) = scheduler(
        Arc::new(InMemoryStore::new()),
        paper_provider(),
        FakeCompiler::new(dir.path()),
        PipelineSettings::default(),
    );

    let err = scheduler
        .run(&paper_plan(), &RunRange::between(3, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Plan(_)));
}

#[tokio::test]
async fn system_instructions_follow_the_stage_flag() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(InMemoryStore::new());
    let provider = paper_provider();
    let settings = PipelineSettings {
        system_prompt: "You are an economist.".into(),
        ..PipelineSettings::default()
    };
    let (scheduler, _) = scheduler(store.clone(), provider.clone(), FakeCompiler::new(dir.path()), settings);

    let mut body = Stage::new("body", "Write the body.", "sonnet");
    body.use_system_instructions = false;
    let plan = plan(vec![Stage::new("intro", "Write the introduction.", "sonnet"), body]);
    scheduler.run(&plan, &RunRange::all()).await.unwrap();

    let requests = provider.requests();
    assert_eq!(requests[0].system_text(), Some("You are an economist."));
    assert_eq!(requests[1].system_text(), None);
    assert_eq!(
        store.get(&ArtifactKey::system_prompt("body")).await.unwrap().as_deref(),
        Some("")
    );
}

#[tokio::test]
async fn document_context_feeds_converted_text() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(InMemoryStore::new());
    let provider = ScriptedProvider::new()
        .on("Write the introduction.", Reply::text("INTRO"))
        .on("BEGIN CONTEXT: text", Reply::Echo("\\section{Intro} ".into()));
    let (scheduler, _) = scheduler(
        store.clone(),
        provider.clone(),
        FakeCompiler::new(dir.path()),
        PipelineSettings::default(),
    );

    let mut paper = Stage::new("paper", "Assemble the paper.", "sonnet").depends_on(&[]);
    paper.document_context = vec!["intro".into()];
    let plan = plan(vec![
        Stage::new("intro", "Write the introduction.", "sonnet").converted(),
        paper,
    ]);
    let outcomes = scheduler.run(&plan, &RunRange::all()).await.unwrap();
    assert!(outcomes.iter().all(|o| o.succeeded()));

    let requests = provider.requests();
    let last = requests.last().unwrap();
    assert_eq!(
        common::context_block(common::user_payload(last), "intro-texinput"),
        Some("\\section{Intro} INTRO")
    );
}

// ── Full-document stages ───────────────────────────────────────────────

#[tokio::test]
async fn full_document_is_extracted_and_compiled_as_is() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(InMemoryStore::new());
    let provider = ScriptedProvider::new().then(Reply::text(
        "Here is the paper:\n\\documentclass{article}\n\\begin{document}\n\\input{../latex-input/intro-texinput}\n\\end{document}\nDone.",
    ));
    let compiler = FakeCompiler::new(dir.path());
    let (scheduler, ledger) = scheduler(
        store.clone(),
        provider.clone(),
        compiler.clone(),
        PipelineSettings::default(),
    );

    let mut stage = Stage::new("full_paper", "Write the full paper.", "sonnet").converted();
    stage.full_document = true;
    let outcomes = scheduler.run(&plan(vec![stage]), &RunRange::all()).await.unwrap();

    let document = outcomes[0].document.as_ref().unwrap();
    assert!(document.compiled);
    assert_eq!(document.attempts, 1);

    let expected = "\\documentclass{article}\n\\begin{document}\n\\input{./intro-texinput}\n\\end{document}";
    assert_eq!(compiler.sources(), vec![("full_paper".to_string(), expected.to_string())]);
    assert_eq!(
        store.get(&ArtifactKey::document("full_paper")).await.unwrap().as_deref(),
        Some(expected)
    );
    // No conversion calls.
    assert_eq!(provider.call_count(), 1);
    assert_eq!(ledger.entries().len(), 1);
}

#[tokio::test]
async fn full_document_without_markup_is_a_conversion_failure() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(InMemoryStore::new());
    let compiler = FakeCompiler::new(dir.path());
    let (scheduler, _) = scheduler(
        store.clone(),
        ScriptedProvider::new(),
        compiler.clone(),
        PipelineSettings::default(),
    );

    let mut stage = Stage::new("full_paper", "Write the full paper.", "sonnet").converted();
    stage.full_document = true;
    let plan = plan(vec![stage, Stage::new("after", "Keep going.", "sonnet")]);
    let outcomes = scheduler.run(&plan, &RunRange::all()).await.unwrap();

    assert!(outcomes[0].transitions.contains(&StageState::ConversionFailed));
    assert_eq!(outcomes[0].state(), StageState::Done);
    assert!(!outcomes[0].document.as_ref().unwrap().compiled);
    assert!(compiler.sources().is_empty());
    assert!(store.get(&ArtifactKey::diagnostic("full_paper")).await.unwrap().is_some());
    assert!(outcomes[1].succeeded());
}

// ── Conversion retry ───────────────────────────────────────────────────

#[tokio::test]
async fn convert_stage_reuses_the_stored_response() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(InMemoryStore::new());
    store
        .put(&ArtifactKey::response("results"), "Returns rise with risk.")
        .await
        .unwrap();
    let provider = ScriptedProvider::new().on("BEGIN CONTEXT: text", Reply::Echo(String::new()));
    let compiler = FakeCompiler::new(dir.path());
    let (scheduler, _) = scheduler(
        store.clone(),
        provider.clone(),
        compiler.clone(),
        PipelineSettings::default(),
    );
    let plan = plan(vec![Stage::new("results", "Describe the results.", "sonnet").converted()]);

    let outcome = scheduler
        .convert_stage(&plan, "results", Some("sonnet"))
        .await
        .unwrap();

    let document = outcome.document.unwrap();
    assert!(document.compiled);
    assert_eq!(document.model, "sonnet");
    assert_eq!(provider.call_count(), 1);
    assert_eq!(provider.requests()[0].model, "claude-3-7-sonnet-20250219");
    assert_eq!(
        store.get(&ArtifactKey::document("results")).await.unwrap().as_deref(),
        Some("Returns rise with risk.")
    );
}

#[tokio::test]
async fn convert_stage_requires_a_response() {
    let dir = TempDir::new().unwrap();
    let (scheduler, _) = scheduler(
        Arc::new(InMemoryStore::new()),
        ScriptedProvider::new(),
        FakeCompiler::new(dir.path()),
        PipelineSettings::default(),
    );
    let plan = plan(vec![Stage::new("results", "Describe the results.", "sonnet")]);

    let err = scheduler.convert_stage(&plan, "results", None).await.unwrap_err();
    assert!(matches!(err, Error::MissingDependency { .. }));

    let err = scheduler.convert_stage(&plan, "nope", None).await.unwrap_err();
    assert!(matches!(err, Error::Plan(_)));
}

#[tokio::test]
async fn bibliography_is_used_only_for_stages_with_references() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(InMemoryStore::new());
    store.add_reference("bibtex-all.bib", "@article{fama1970, title={Efficient}}").await;
    let provider = ScriptedProvider::new()
        .on("Write the review.", Reply::text("Markets are efficient."))
        .on("Write the model.", Reply::text("A model."))
        .on("BEGIN CONTEXT: text", Reply::Echo(String::new()));
    let (scheduler, _) = scheduler(
        store,
        provider.clone(),
        FakeCompiler::new(dir.path()),
        PipelineSettings::default(),
    );

    let plan = plan(vec![
        Stage::new("review", "Write the review.", "sonnet")
            .with_references(&["bibtex-all.bib"])
            .converted(),
        Stage::new("model", "Write the model.", "sonnet").depends_on(&[]).converted(),
    ]);
    scheduler.run(&plan, &RunRange::all()).await.unwrap();

    let conversions: Vec<String> = provider
        .requests()
        .iter()
        .map(|r| common::user_payload(r).to_string())
        .filter(|p| p.contains("BEGIN CONTEXT: text"))
        .collect();
    assert_eq!(conversions.len(), 2);
    assert!(conversions[0].contains("BEGIN CONTEXT: bibliography"));
    assert!(!conversions[1].contains("BEGIN CONTEXT: bibliography"));
}
