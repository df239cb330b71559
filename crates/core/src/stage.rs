//! The generation plan: an ordered list of stages.
//!
//! Stage order is the only ordering in the pipeline. A stage may take
//! context from any stage that precedes it and from none that follows it,
//! which [`Plan::new`] enforces so the dependency graph can never contain
//! a cycle.

use std::collections::HashMap;
use std::ops::RangeInclusive;
use serde::{Deserialize, Serialize};
use crate::error::PlanError;

/// Which prior-stage responses a stage receives as context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ContextScope {
    /// Every earlier stage, in plan order.
    #[default]
    AllPrior,
    /// Only the named earlier stages, in plan order.
    Only(Vec<String>),
}

/// One step of the generation plan. Immutable once the plan is built.
#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    /// Unique, stable identifier; also the storage key of its artifacts
    pub name: String,

    /// Task text sent to the generation service
    pub instructions: String,

    /// Model alias or identifier, resolved through the model catalog
    pub model: String,

    pub max_output_tokens: u32,
    pub thinking_budget: u32,
    pub temperature: f32,

    /// Append reference material to the context
    pub include_reference_material: bool,

    /// Reference documents to include; empty means all available ones
    pub references: Vec<String>,

    /// Prepend the shared system-level instructions
    pub use_system_instructions: bool,

    /// Prior responses fed in as context
    pub context: ContextScope,

    /// Prior stages whose converted documents are fed in as context
    pub document_context: Vec<String>,

    /// Convert the response into a compiled document
    pub convert: bool,

    /// The response is itself a complete document; extract and compile it
    pub full_document: bool,

    /// Per-stage override of the run's continue-on-failure policy
    pub continue_on_failure: Option<bool>,
}

impl Stage {
    /// A stage with pipeline-neutral defaults.
    pub fn new(name: impl Into<String>, instructions: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
            model: model.into(),
            max_output_tokens: 8192,
            thinking_budget: 0,
            temperature: 0.0,
            include_reference_material: false,
            references: Vec::new(),
            use_system_instructions: true,
            context: ContextScope::AllPrior,
            document_context: Vec::new(),
            convert: false,
            full_document: false,
            continue_on_failure: None,
        }
    }

    pub fn depends_on(mut self, names: &[&str]) -> Self {
        self.context = ContextScope::Only(names.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn with_references(mut self, names: &[&str]) -> Self {
        self.include_reference_material = true;
        self.references = names.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_budget(mut self, max_output_tokens: u32, thinking_budget: u32) -> Self {
        self.max_output_tokens = max_output_tokens;
        self.thinking_budget = thinking_budget;
        self
    }

    pub fn converted(mut self) -> Self {
        self.convert = true;
        self
    }
}

/// An ordered, validated list of stages.
#[derive(Debug, Clone)]
pub struct Plan {
    stages: Vec<Stage>,
    index: HashMap<String, usize>,
}

impl Plan {
    /// Build a plan, rejecting duplicate names and references to stages
    /// that do not strictly precede the referencing stage.
    pub fn new(stages: Vec<Stage>) -> Result<Self, PlanError> {
        if stages.is_empty() {
            return Err(PlanError::Empty);
        }

        let mut index = HashMap::with_capacity(stages.len());
        for (i, stage) in stages.iter().enumerate() {
            if stage.name.trim().is_empty()
                || stage.name.contains(['/', '\\'])
                || stage.name.starts_with('.')
            {
                return Err(PlanError::InvalidName(stage.name.clone()));
            }
            if index.insert(stage.name.clone(), i).is_some() {
                return Err(PlanError::DuplicateStage(stage.name.clone()));
            }
        }

        for (i, stage) in stages.iter().enumerate() {
            let explicit = match &stage.context {
                ContextScope::AllPrior => &[][..],
                ContextScope::Only(names) => names.as_slice(),
            };
            for dependency in explicit.iter().chain(stage.document_context.iter()) {
                match index.get(dependency) {
                    Some(&j) if j < i => {}
                    Some(_) => {
                        return Err(PlanError::ForwardReference {
                            stage: stage.name.clone(),
                            dependency: dependency.clone(),
                        });
                    }
                    None => {
                        return Err(PlanError::UnknownDependency {
                            stage: stage.name.clone(),
                            dependency: dependency.clone(),
                        });
                    }
                }
            }
        }

        Ok(Self { stages, index })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Stage> {
        self.index.get(name).map(|&i| &self.stages[i])
    }

    /// Zero-based position of a stage.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Names of the prior stages whose responses feed stage `index`,
    /// in plan order.
    pub fn context_dependencies(&self, index: usize) -> Vec<&str> {
        let Some(stage) = self.stages.get(index) else {
            return Vec::new();
        };
        match &stage.context {
            ContextScope::AllPrior => self.stages[..index].iter().map(|s| s.name.as_str()).collect(),
            ContextScope::Only(names) => {
                // Re-sort into plan order regardless of declaration order.
                let mut deps: Vec<(usize, &str)> = names
                    .iter()
                    .filter_map(|n| self.index.get(n).map(|&j| (j, n.as_str())))
                    .collect();
                deps.sort_by_key(|(j, _)| *j);
                deps.dedup();
                deps.into_iter().map(|(_, n)| n).collect()
            }
        }
    }

    /// Resolve a run range into zero-based inclusive indices.
    ///
    /// Numeric bounds are 1-based; an end past the last stage is clamped.
    pub fn resolve_range(&self, range: &RunRange) -> Result<RangeInclusive<usize>, PlanError> {
        let start = match &range.start {
            None => 0,
            Some(r) => self.resolve_ref(r, false)?,
        };
        let end = match &range.end {
            None => self.stages.len() - 1,
            Some(r) => self.resolve_ref(r, true)?,
        };
        if start > end {
            return Err(PlanError::InvalidRange(format!(
                "start ({}) is after end ({})",
                start + 1,
                end + 1
            )));
        }
        Ok(start..=end)
    }

    fn resolve_ref(&self, r: &StageRef, clamp: bool) -> Result<usize, PlanError> {
        match r {
            StageRef::Index(0) => Err(PlanError::InvalidRange("stage numbers start at 1".into())),
            StageRef::Index(n) if *n > self.stages.len() => {
                if clamp {
                    Ok(self.stages.len() - 1)
                } else {
                    Err(PlanError::InvalidRange(format!(
                        "start {n} is past the last stage ({})",
                        self.stages.len()
                    )))
                }
            }
            StageRef::Index(n) => Ok(n - 1),
            StageRef::Name(name) => self
                .position(name)
                .ok_or_else(|| PlanError::UnknownStage(name.clone())),
        }
    }
}

/// A stage identifier in a run range: a 1-based number or a stage name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StageRef {
    Index(usize),
    Name(String),
}

impl std::str::FromStr for StageRef {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().parse::<usize>() {
            Ok(n) => Self::Index(n),
            Err(_) => Self::Name(s.trim().to_string()),
        })
    }
}

impl std::fmt::Display for StageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Index(n) => write!(f, "{n}"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

/// Inclusive selection of stages to execute. Open bounds mean "from the
/// first" and "through the last".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<StageRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<StageRef>,
}

impl RunRange {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn between(start: usize, end: usize) -> Self {
        Self {
            start: Some(StageRef::Index(start)),
            end: Some(StageRef::Index(end)),
        }
    }
}
