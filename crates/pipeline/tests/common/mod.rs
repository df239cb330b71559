//! Shared test doubles: a scripted provider and a fake compiler.
#![allow(dead_code)]

use async_trait::async_trait;
use paperchain_config::{ModelCatalog, PipelineSettings};
use paperchain_core::{
    ContextStore, Error, Message, Plan, Provider, ProviderError, ProviderKind, ProviderRequest,
    ProviderResponse, Role, Usage,
};
use paperchain_pipeline::compiler::{CompileOutcome, DocumentCompiler, DocumentSource};
use paperchain_pipeline::{GenerationClient, Scheduler};
use paperchain_providers::ProviderRouter;
use paperchain_telemetry::CostLedger;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Scripted provider ──────────────────────────────────────────────────

/// What the provider does for one call.
#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    /// Answer after sleeping
    Delayed(Duration, String),
    /// Echo the `text` context block of a conversion payload, prefixed
    Echo(String),
    Fail(String),
}

impl Reply {
    pub fn text(text: &str) -> Self {
        Self::Text(text.into())
    }
}

/// Selects calls by model id and payload content.
#[derive(Debug, Clone, Default)]
pub struct Matcher {
    pub model: Option<String>,
    pub contains: Option<String>,
}

impl Matcher {
    fn matches(&self, request: &ProviderRequest) -> bool {
        let payload = user_payload(request);
        self.model.as_deref().is_none_or(|m| request.model.contains(m))
            && self.contains.as_deref().is_none_or(|c| payload.contains(c))
    }
}

/// Answers from persistent rules first, then a sequential queue, then a
/// default text naming the model.
pub struct ScriptedProvider {
    rules: Mutex<Vec<(Matcher, Reply)>>,
    queue: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            rules: Mutex::new(Vec::new()),
            queue: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Answer calls whose payload contains `needle`.
    pub fn on(self: &Arc<Self>, needle: &str, reply: Reply) -> Arc<Self> {
        self.rule(
            Matcher {
                model: None,
                contains: Some(needle.into()),
            },
            reply,
        )
    }

    /// Answer calls to `model` whose payload contains `needle`.
    pub fn on_model(self: &Arc<Self>, model: &str, needle: &str, reply: Reply) -> Arc<Self> {
        self.rule(
            Matcher {
                model: Some(model.into()),
                contains: Some(needle.into()),
            },
            reply,
        )
    }

    pub fn rule(self: &Arc<Self>, matcher: Matcher, reply: Reply) -> Arc<Self> {
        self.rules.lock().unwrap().push((matcher, reply));
        self.clone()
    }

    /// Queue replies for calls no rule matches.
    pub fn then(self: &Arc<Self>, reply: Reply) -> Arc<Self> {
        self.queue.lock().unwrap().push_back(reply);
        self.clone()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn next_reply(&self, request: &ProviderRequest) -> Reply {
        let rule = self
            .rules
            .lock()
            .unwrap()
            .iter()
            .find(|(matcher, _)| matcher.matches(request))
            .map(|(_, reply)| reply.clone());
        rule.or_else(|| self.queue.lock().unwrap().pop_front())
            .unwrap_or_else(|| Reply::Text(format!("Generated by {}.", request.model)))
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let reply = self.next_reply(&request);
        let model = request.model.clone();
        let context_text = context_block(user_payload(&request), "text").map(str::to_string);
        self.requests.lock().unwrap().push(request);

        let text = match reply {
            Reply::Text(text) => text,
            Reply::Delayed(delay, text) => {
                tokio::time::sleep(delay).await;
                text
            }
            Reply::Echo(prefix) => format!("{prefix}{}", context_text.unwrap_or_default()),
            Reply::Fail(message) => return Err(ProviderError::Network(message)),
        };

        Ok(ProviderResponse {
            message: Message::assistant(text),
            usage: Some(Usage::new(1_000, 500)),
            model,
            metadata: serde_json::Map::new(),
        })
    }
}

/// The user message of a request.
pub fn user_payload(request: &ProviderRequest) -> &str {
    request
        .messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .unwrap_or("")
}

/// Body of the `name` delimiter block in an assembled payload.
pub fn context_block<'a>(payload: &'a str, name: &str) -> Option<&'a str> {
    let begin = format!("--- BEGIN CONTEXT: {name} ---\n");
    let end = format!("\n--- END CONTEXT: {name} ---");
    let start = payload.find(&begin)? + begin.len();
    let len = payload[start..].find(&end)?;
    Some(&payload[start..start + len])
}

// ── Fake compiler ──────────────────────────────────────────────────────

/// Fails any document containing one of `reject` and writes a log either way.
pub struct FakeCompiler {
    dir: PathBuf,
    reject: Vec<String>,
    sources: Mutex<Vec<(String, String)>>,
}

impl FakeCompiler {
    pub fn new(dir: impl Into<PathBuf>) -> Arc<Self> {
        Self::rejecting(dir, &[])
    }

    pub fn rejecting(dir: impl Into<PathBuf>, reject: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            dir: dir.into(),
            reject: reject.iter().map(|s| s.to_string()).collect(),
            sources: Mutex::new(Vec::new()),
        })
    }

    /// `(stage, source)` of every compile, in call order.
    pub fn sources(&self) -> Vec<(String, String)> {
        self.sources.lock().unwrap().clone()
    }

    pub fn log_path(&self, stage: &str) -> PathBuf {
        self.dir.join(format!("{stage}-latex-compile.log"))
    }
}

#[async_trait]
impl DocumentCompiler for FakeCompiler {
    fn name(&self) -> &str {
        "fake"
    }

    async fn compile(&self, stage: &str, source: DocumentSource<'_>) -> Result<CompileOutcome, Error> {
        let text = match source {
            DocumentSource::Body(text) | DocumentSource::Complete(text) => text.to_string(),
        };
        self.sources.lock().unwrap().push((stage.to_string(), text.clone()));

        let rejected = self.reject.iter().find(|needle| text.contains(needle.as_str()));
        let log = match rejected {
            Some(needle) => format!("LaTeX Warning: Citation `{needle}' undefined.\n! Emergency stop."),
            None => "Output written.".to_string(),
        };
        let log_path = self.log_path(stage);
        tokio::fs::write(&log_path, &log)
            .await
            .map_err(|e| Error::Compile(e.to_string()))?;

        if rejected.is_some() {
            return Ok(CompileOutcome {
                success: false,
                artifact_path: None,
                diagnostic_log: Some(log),
                log_path: Some(log_path),
            });
        }

        let pdf = self.dir.join(format!("{stage}-latex.pdf"));
        tokio::fs::write(&pdf, b"%PDF-1.5")
            .await
            .map_err(|e| Error::Compile(e.to_string()))?;
        Ok(CompileOutcome {
            success: true,
            artifact_path: Some(pdf),
            diagnostic_log: None,
            log_path: Some(log_path),
        })
    }
}

// ── Wiring ─────────────────────────────────────────────────────────────

/// A client whose Anthropic and OpenAI models all go to `provider`.
pub fn client(provider: Arc<ScriptedProvider>) -> (Arc<GenerationClient>, Arc<CostLedger>) {
    let mut router = ProviderRouter::new();
    router.register(ProviderKind::Anthropic, provider.clone());
    router.register(ProviderKind::OpenAi, provider);
    let ledger = Arc::new(CostLedger::in_memory());
    let client = GenerationClient::new(router, ModelCatalog::with_defaults(), ledger.clone());
    (Arc::new(client), ledger)
}

pub fn scheduler(
    store: Arc<dyn ContextStore>,
    provider: Arc<ScriptedProvider>,
    compiler: Arc<dyn DocumentCompiler>,
    settings: PipelineSettings,
) -> (Scheduler, Arc<CostLedger>) {
    let (client, ledger) = client(provider);
    (Scheduler::new(store, client, compiler, settings), ledger)
}

pub fn plan(stages: Vec<paperchain_core::Stage>) -> Plan {
    Plan::new(stages).unwrap()
}
