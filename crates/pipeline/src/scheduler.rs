//! Stage scheduler: runs a plan range stage by stage.
//!
//! Per stage:
//!
//! ```text
//! Pending → ContextResolved → Generating → Generated
//!     → [Converting → Converted → Compiling → Compiled | CompileFailed] → Done
//! ```
//!
//! A failed compile gets exactly one more conversion with the fallback
//! model. A second failure ends the document attempt for that stage only;
//! the raw response stays stored and the run continues.
//!
//! Dependencies are satisfied by whatever artifacts are in the store, so a
//! range can start after stages that ran in an earlier invocation.

use paperchain_config::PipelineSettings;
use paperchain_core::{ArtifactKey, ContextStore, Error, Plan, RunRange, Stage};
use paperchain_telemetry::CallPurpose;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::assembler::{assemble, resolve_context};
use crate::client::{GenerationClient, GenerationRequest};
use crate::compiler::{DocumentCompiler, DocumentSource, extract_document};
use crate::converter::{ConversionRequest, DocumentConverter};

/// Lifecycle of a stage within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Pending,
    ContextResolved,
    Generating,
    Generated,
    Converting,
    /// The conversion calls themselves failed; counts as a failed attempt
    ConversionFailed,
    Converted,
    Compiling,
    Compiled,
    CompileFailed,
    Done,
    /// Generation or context resolution failed
    Failed,
    /// Not run because an earlier stage failed
    Skipped,
}

impl std::fmt::Display for StageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::ContextResolved => "context_resolved",
            Self::Generating => "generating",
            Self::Generated => "generated",
            Self::Converting => "converting",
            Self::ConversionFailed => "conversion_failed",
            Self::Converted => "converted",
            Self::Compiling => "compiling",
            Self::Compiled => "compiled",
            Self::CompileFailed => "compile_failed",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// How a stage's document attempt ended.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentOutcome {
    pub compiled: bool,
    /// Conversion attempts made (at most two)
    pub attempts: u32,
    /// Model used for the last attempt
    pub model: String,
    pub artifact_path: Option<PathBuf>,
}

/// What happened to one stage.
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutcome {
    pub stage: String,
    /// Every state the stage passed through, ending in `Done`, `Failed`
    /// or `Skipped`
    pub transitions: Vec<StageState>,
    pub document: Option<DocumentOutcome>,
    pub error: Option<String>,
}

impl StageOutcome {
    fn new(stage: &str) -> Self {
        Self {
            stage: stage.to_string(),
            transitions: vec![StageState::Pending],
            document: None,
            error: None,
        }
    }

    fn enter(&mut self, state: StageState) {
        self.transitions.push(state);
    }

    /// The terminal state.
    pub fn state(&self) -> StageState {
        self.transitions.last().copied().unwrap_or(StageState::Pending)
    }

    /// The raw response was generated and stored.
    pub fn succeeded(&self) -> bool {
        self.state() == StageState::Done
    }
}

/// Runs plan ranges against a store, a generation client and a compiler.
pub struct Scheduler {
    store: Arc<dyn ContextStore>,
    client: Arc<GenerationClient>,
    converter: DocumentConverter,
    compiler: Arc<dyn DocumentCompiler>,
    settings: PipelineSettings,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn ContextStore>,
        client: Arc<GenerationClient>,
        compiler: Arc<dyn DocumentCompiler>,
        settings: PipelineSettings,
    ) -> Self {
        let converter =
            DocumentConverter::new(client.clone()).with_concurrency(settings.conversion.concurrency);
        Self {
            store,
            client,
            converter,
            compiler,
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Run the range configured in the plan's settings.
    pub async fn run_configured(&self, plan: &Plan) -> Result<Vec<StageOutcome>, Error> {
        let range = self.settings.run_range.clone();
        self.run(plan, &range).await
    }

    /// Run the stages of `range`, in plan order.
    ///
    /// `Err` is returned only for problems found before any stage runs
    /// (bad range, unknown model, missing credentials). Stage failures are
    /// reported in the outcomes.
    pub async fn run(&self, plan: &Plan, range: &RunRange) -> Result<Vec<StageOutcome>, Error> {
        let range = plan.resolve_range(range)?;
        let selected = &plan.stages()[range.clone()];
        self.preflight(selected)?;

        info!(
            first = %selected.first().map(|s| s.name.as_str()).unwrap_or(""),
            last = %selected.last().map(|s| s.name.as_str()).unwrap_or(""),
            stages = selected.len(),
            "Running plan range"
        );

        let mut outcomes = Vec::with_capacity(selected.len());
        let mut blocked: HashSet<String> = HashSet::new();
        let mut aborted = false;

        for index in range {
            let stage = &plan.stages()[index];
            let mut outcome = StageOutcome::new(&stage.name);

            if aborted {
                outcome.enter(StageState::Skipped);
                outcome.error = Some("run aborted after an earlier stage failed".into());
                outcomes.push(outcome);
                continue;
            }

            let failed_dependency = plan
                .context_dependencies(index)
                .into_iter()
                .chain(stage.document_context.iter().map(String::as_str))
                .find(|dep| blocked.contains(*dep))
                .map(str::to_string);
            if let Some(dependency) = failed_dependency {
                warn!(stage = %stage.name, dependency = %dependency, "Skipping stage, dependency failed in this run");
                outcome.enter(StageState::Skipped);
                outcome.error = Some(format!("dependency '{dependency}' failed in this run"));
                blocked.insert(stage.name.clone());
                outcomes.push(outcome);
                continue;
            }

            info!(stage = %stage.name, number = index + 1, of = plan.len(), model = %stage.model, "Stage started");
            self.run_stage(plan, index, &mut outcome).await;

            if outcome.state() == StageState::Failed {
                blocked.insert(stage.name.clone());
                let continue_on_failure = stage
                    .continue_on_failure
                    .unwrap_or(self.settings.continue_on_failure);
                if !continue_on_failure {
                    error!(stage = %stage.name, "Stage failed, aborting remaining stages");
                    aborted = true;
                }
            }
            outcomes.push(outcome);
        }

        Ok(outcomes)
    }

    /// Re-run conversion and compilation for an already generated stage.
    pub async fn convert_stage(
        &self,
        plan: &Plan,
        name: &str,
        model_override: Option<&str>,
    ) -> Result<StageOutcome, Error> {
        let stage = plan
            .get(name)
            .ok_or_else(|| paperchain_core::PlanError::UnknownStage(name.to_string()))?;
        let raw = self
            .store
            .get(&ArtifactKey::response(name))
            .await?
            .ok_or_else(|| Error::MissingDependency {
                stage: name.to_string(),
                artifact: ArtifactKey::response(name).to_string(),
            })?;

        let models = match model_override {
            Some(model) => vec![model],
            None => self.conversion_models(),
        };
        self.client.preflight(models.iter().copied())?;

        let mut outcome = StageOutcome::new(name);
        outcome.enter(StageState::Generated);
        self.produce_document(stage, &raw, model_override, &mut outcome).await;
        outcome.enter(StageState::Done);
        Ok(outcome)
    }

    fn conversion_models(&self) -> Vec<&str> {
        std::iter::once(self.settings.conversion.model.as_str())
            .chain(self.settings.conversion.fallback_model.as_deref())
            .collect()
    }

    fn preflight(&self, stages: &[Stage]) -> Result<(), Error> {
        let mut models: Vec<&str> = stages.iter().map(|s| s.model.as_str()).collect();
        if stages.iter().any(|s| s.convert && !s.full_document) {
            models.extend(self.conversion_models());
        }
        models.sort_unstable();
        models.dedup();
        self.client.preflight(models)
    }

    async fn run_stage(&self, plan: &Plan, index: usize, outcome: &mut StageOutcome) {
        let stage = &plan.stages()[index];

        let items = match resolve_context(self.store.as_ref(), plan, index).await {
            Ok(items) => items,
            Err(e) => return self.fail(stage, outcome, e).await,
        };
        outcome.enter(StageState::ContextResolved);

        let system = if stage.use_system_instructions {
            self.settings.system_prompt.as_str()
        } else {
            ""
        };
        let payload = assemble(&stage.instructions, &items);

        // Audit trail first, so a failed call still leaves what was sent.
        for (key, text) in [
            (ArtifactKey::system_prompt(&stage.name), system),
            (ArtifactKey::prompt(&stage.name), payload.as_str()),
        ] {
            if let Err(e) = self.store.put(&key, text).await {
                return self.fail(stage, outcome, e.into()).await;
            }
        }

        outcome.enter(StageState::Generating);
        let request = GenerationRequest {
            payload,
            model: stage.model.clone(),
            max_output_tokens: stage.max_output_tokens,
            thinking_budget: stage.thinking_budget,
            temperature: stage.temperature,
            system_instructions: (!system.is_empty()).then(|| system.to_string()),
        };
        let result = match self
            .client
            .generate(&stage.name, CallPurpose::Generation, &request)
            .await
        {
            Ok(result) => result,
            Err(e) => return self.fail(stage, outcome, e).await,
        };

        if let Err(e) = self
            .store
            .put(&ArtifactKey::response(&stage.name), &result.text)
            .await
        {
            return self.fail(stage, outcome, e.into()).await;
        }
        outcome.enter(StageState::Generated);

        if stage.convert {
            self.produce_document(stage, &result.text, None, outcome).await;
        }

        outcome.enter(StageState::Done);
        info!(stage = %stage.name, cost_usd = result.cost, "Stage done");
    }

    /// Convert and compile a response; never fails the stage.
    async fn produce_document(
        &self,
        stage: &Stage,
        raw: &str,
        model_override: Option<&str>,
        outcome: &mut StageOutcome,
    ) {
        if stage.full_document {
            return self.produce_full_document(stage, raw, outcome).await;
        }

        let bibliography = self.bibliography_for(stage).await;
        let attempts: Vec<&str> = match model_override {
            Some(model) => vec![model],
            None => self.conversion_models(),
        };

        let mut last_failure = String::new();
        let mut attempted = 0;
        for (attempt, model) in attempts.iter().enumerate() {
            attempted = attempt as u32 + 1;
            if attempt > 0 {
                warn!(stage = %stage.name, model = %model, "Document failed to compile, retrying conversion with fallback model");
            }

            outcome.enter(StageState::Converting);
            let request = ConversionRequest {
                stage: &stage.name,
                raw_text: raw,
                model,
                chunk_size_hint: self.settings.conversion.paragraphs_per_chunk,
                bibliography: bibliography.as_deref(),
                max_output_tokens: self.settings.conversion.max_tokens,
                temperature: self.settings.conversion.temperature,
            };
            let converted = match self.converter.convert(&request).await {
                Ok(document) => document.text(),
                Err(e) => {
                    warn!(stage = %stage.name, model = %model, error = %e, "Conversion failed");
                    outcome.enter(StageState::ConversionFailed);
                    last_failure = format!("conversion with {model} failed: {e}");
                    continue;
                }
            };
            outcome.enter(StageState::Converted);

            if let Err(e) = self
                .store
                .put(&ArtifactKey::document(&stage.name), &converted)
                .await
            {
                warn!(stage = %stage.name, error = %e, "Failed to store converted document");
            }

            outcome.enter(StageState::Compiling);
            match self
                .compiler
                .compile(&stage.name, DocumentSource::Body(&converted))
                .await
            {
                Ok(compiled) if compiled.success => {
                    outcome.enter(StageState::Compiled);
                    outcome.document = Some(DocumentOutcome {
                        compiled: true,
                        attempts: attempted,
                        model: model.to_string(),
                        artifact_path: compiled.artifact_path,
                    });
                    return;
                }
                Ok(compiled) => {
                    outcome.enter(StageState::CompileFailed);
                    last_failure = compile_failure(model, &compiled);
                }
                Err(e) => {
                    outcome.enter(StageState::CompileFailed);
                    last_failure = format!("compiler failed for the {model} conversion: {e}");
                }
            }
        }

        let model = attempts.last().copied().unwrap_or_default().to_string();
        error!(stage = %stage.name, attempts = attempted, "No compilable document for stage");
        self.write_diagnostic(stage, &last_failure).await;
        outcome.document = Some(DocumentOutcome {
            compiled: false,
            attempts: attempted,
            model,
            artifact_path: None,
        });
    }

    async fn produce_full_document(&self, stage: &Stage, raw: &str, outcome: &mut StageOutcome) {
        outcome.enter(StageState::Converting);
        let mut document = DocumentOutcome {
            compiled: false,
            attempts: 1,
            model: stage.model.clone(),
            artifact_path: None,
        };

        let Some(source) = extract_document(raw) else {
            outcome.enter(StageState::ConversionFailed);
            self.write_diagnostic(
                stage,
                "response does not contain a complete document (\\documentclass ... \\end{document})",
            )
            .await;
            outcome.document = Some(document);
            return;
        };
        outcome.enter(StageState::Converted);

        if let Err(e) = self
            .store
            .put(&ArtifactKey::document(&stage.name), &source)
            .await
        {
            warn!(stage = %stage.name, error = %e, "Failed to store extracted document");
        }

        outcome.enter(StageState::Compiling);
        match self
            .compiler
            .compile(&stage.name, DocumentSource::Complete(&source))
            .await
        {
            Ok(compiled) if compiled.success => {
                outcome.enter(StageState::Compiled);
                document.compiled = true;
                document.artifact_path = compiled.artifact_path;
            }
            Ok(compiled) => {
                outcome.enter(StageState::CompileFailed);
                self.write_diagnostic(stage, &compile_failure(&stage.model, &compiled))
                    .await;
            }
            Err(e) => {
                outcome.enter(StageState::CompileFailed);
                self.write_diagnostic(stage, &format!("compiler failed: {e}")).await;
            }
        }
        outcome.document = Some(document);
    }

    /// Bibliography entries for a stage that draws on reference material.
    async fn bibliography_for(&self, stage: &Stage) -> Option<String> {
        if !stage.include_reference_material {
            return None;
        }
        let name = self.settings.conversion.bibliography.as_deref()?;
        match self.store.get(&ArtifactKey::reference(name)).await {
            Ok(Some(text)) => Some(text),
            Ok(None) => {
                warn!(stage = %stage.name, bibliography = %name, "Bibliography not found, converting without it");
                None
            }
            Err(e) => {
                warn!(stage = %stage.name, bibliography = %name, error = %e, "Failed to read bibliography");
                None
            }
        }
    }

    async fn fail(&self, stage: &Stage, outcome: &mut StageOutcome, err: Error) {
        error!(stage = %stage.name, error = %err, "Stage failed");
        self.write_diagnostic(stage, &err.to_string()).await;
        outcome.error = Some(err.to_string());
        outcome.enter(StageState::Failed);
    }

    async fn write_diagnostic(&self, stage: &Stage, message: &str) {
        if let Err(e) = self
            .store
            .put(&ArtifactKey::diagnostic(&stage.name), message)
            .await
        {
            warn!(stage = %stage.name, error = %e, "Failed to write diagnostic");
        }
    }
}

fn compile_failure(model: &str, compiled: &crate::compiler::CompileOutcome) -> String {
    let mut message = format!("document converted with {model} did not compile");
    if let Some(path) = &compiled.log_path {
        message.push_str(&format!("; full log: {}", path.display()));
    }
    if let Some(log) = &compiled.diagnostic_log {
        message.push_str("\n\n");
        message.push_str(log);
    }
    message
}
