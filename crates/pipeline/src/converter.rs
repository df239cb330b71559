//! Document conversion: free-form response text to compilable markup.
//!
//! The raw text is split into chunks at `#`, `##` and `###` headings (or,
//! without headings, into groups of paragraphs). Each chunk is converted by
//! its own generation call, and the converted chunks are joined in their
//! original order whatever order the calls finish in.
//!
//! Chunks never see each other, so a citation whose supporting claim spans
//! two chunks may be resolved differently in each.

use futures::{StreamExt, TryStreamExt};
use paperchain_core::Error;
use paperchain_telemetry::CallPurpose;
use regex_lite::Regex;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info};

use crate::assembler::{ContextItem, assemble};
use crate::client::{GenerationClient, GenerationRequest};

static HEADING_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(#{1,6})[ \t]+(?:\d{1,2}(?:\.\d{1,2})*\.?|[IVXLC]+\.)[ \t]+")
        .expect("valid heading number pattern")
});

static CHUNK_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^#{1,3}[ \t]+\S").expect("valid heading pattern"));

static PARAGRAPH_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*\n").expect("valid paragraph pattern"));

const CONVERSION_SYSTEM: &str = "You convert academic drafts to LaTeX. Output only LaTeX code.";

const CONVERSION_INSTRUCTIONS: &str = "\
Convert the text in the context block to LaTeX.
Output only the LaTeX body: no preamble, no \\documentclass, no \\begin{document} or \\end{document}.
Preserve all original text. Do not summarize, shorten, or add content.
Use \\section, \\subsection and \\subsubsection for headings, without numbers.
Typeset mathematics with LaTeX math environments.";

const CITATION_INSTRUCTIONS: &str = "
Cite only with \\cite{key}, using keys that appear in the bibliography block.
Only cite where the original text already cites a work. Never add a citation that is not in the original text.
If a citation in the text has no matching bibliography entry, leave it as plain text.";

/// Symbols that break compilation, with their safe replacements.
const SANITIZE: &[(char, &str)] = &[
    ('\u{2014}', "---"),
    ('\u{2013}', "--"),
    ('\u{2212}', "-"),
    ('\u{2018}', "`"),
    ('\u{2019}', "'"),
    ('\u{201C}', "``"),
    ('\u{201D}', "''"),
    ('\u{2026}', "\\ldots{}"),
    ('\u{00A0}', "~"),
    ('\u{200B}', ""),
    ('\u{2264}', "\\ensuremath{\\leq}"),
    ('\u{2265}', "\\ensuremath{\\geq}"),
    ('\u{2260}', "\\ensuremath{\\neq}"),
    ('\u{2248}', "\\ensuremath{\\approx}"),
    ('\u{00B1}', "\\ensuremath{\\pm}"),
    ('\u{00D7}', "\\ensuremath{\\times}"),
    ('\u{00B7}', "\\ensuremath{\\cdot}"),
    ('\u{2192}', "\\ensuremath{\\rightarrow}"),
    ('\u{2190}', "\\ensuremath{\\leftarrow}"),
    ('\u{221E}', "\\ensuremath{\\infty}"),
    ('\u{2202}', "\\ensuremath{\\partial}"),
    ('\u{2211}', "\\ensuremath{\\sum}"),
    ('\u{2208}', "\\ensuremath{\\in}"),
    ('\u{03B1}', "\\ensuremath{\\alpha}"),
    ('\u{03B2}', "\\ensuremath{\\beta}"),
    ('\u{03B3}', "\\ensuremath{\\gamma}"),
    ('\u{03B4}', "\\ensuremath{\\delta}"),
    ('\u{03B5}', "\\ensuremath{\\epsilon}"),
    ('\u{03B8}', "\\ensuremath{\\theta}"),
    ('\u{03BB}', "\\ensuremath{\\lambda}"),
    ('\u{03BC}', "\\ensuremath{\\mu}"),
    ('\u{03C0}', "\\ensuremath{\\pi}"),
    ('\u{03C1}', "\\ensuremath{\\rho}"),
    ('\u{03C3}', "\\ensuremath{\\sigma}"),
    ('\u{03C4}', "\\ensuremath{\\tau}"),
    ('\u{03C6}', "\\ensuremath{\\phi}"),
    ('\u{03C9}', "\\ensuremath{\\omega}"),
    ('\u{0394}', "\\ensuremath{\\Delta}"),
    ('\u{03A3}', "\\ensuremath{\\Sigma}"),
];

/// One conversion job.
#[derive(Debug, Clone)]
pub struct ConversionRequest<'a> {
    /// Stage the conversion is charged to
    pub stage: &'a str,
    pub raw_text: &'a str,
    pub model: &'a str,
    /// Paragraphs per chunk when the text has no headings
    pub chunk_size_hint: usize,
    /// Bibliography entries citations may resolve against
    pub bibliography: Option<&'a str>,
    pub max_output_tokens: u32,
    pub temperature: f32,
}

/// A converted document, chunk by chunk, in original order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertedDocument {
    pub chunks: Vec<String>,
}

impl ConvertedDocument {
    /// The document body: converted chunks joined in order.
    pub fn text(&self) -> String {
        self.chunks.join("\n\n")
    }
}

/// Converts responses through the generation client.
pub struct DocumentConverter {
    client: Arc<GenerationClient>,
    concurrency: usize,
}

impl DocumentConverter {
    pub fn new(client: Arc<GenerationClient>) -> Self {
        Self {
            client,
            concurrency: 1,
        }
    }

    /// Allow up to `concurrency` chunk conversions in flight.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Convert a response into document markup.
    pub async fn convert(&self, request: &ConversionRequest<'_>) -> Result<ConvertedDocument, Error> {
        let normalized = strip_heading_numbers(request.raw_text);
        let chunks = split_chunks(&normalized, request.chunk_size_hint);
        if chunks.is_empty() {
            return Err(Error::Conversion {
                stage: request.stage.to_string(),
                reason: "response has no text to convert".into(),
            });
        }

        info!(
            stage = %request.stage,
            model = %request.model,
            chunks = chunks.len(),
            concurrency = self.concurrency,
            "Converting response to document markup"
        );

        let instructions = match request.bibliography {
            Some(_) => format!("{CONVERSION_INSTRUCTIONS}{CITATION_INSTRUCTIONS}"),
            None => CONVERSION_INSTRUCTIONS.to_string(),
        };

        // `buffered` yields results in input order regardless of completion order.
        let converted: Vec<String> = futures::stream::iter(chunks.iter().enumerate())
            .map(|(index, chunk)| self.convert_chunk(request, &instructions, index, chunk))
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        Ok(ConvertedDocument { chunks: converted })
    }

    async fn convert_chunk(
        &self,
        request: &ConversionRequest<'_>,
        instructions: &str,
        index: usize,
        chunk: &str,
    ) -> Result<String, Error> {
        let mut items = vec![ContextItem::new("text", chunk)];
        if let Some(bibliography) = request.bibliography {
            items.push(ContextItem::new("bibliography", bibliography));
        }

        let generation = GenerationRequest {
            payload: assemble(instructions, &items),
            model: request.model.to_string(),
            max_output_tokens: request.max_output_tokens,
            thinking_budget: 0,
            temperature: request.temperature,
            system_instructions: Some(CONVERSION_SYSTEM.to_string()),
        };

        let result = self
            .client
            .generate(request.stage, CallPurpose::Conversion, &generation)
            .await?;
        debug!(stage = %request.stage, chunk = index, chars = result.text.len(), "Chunk converted");

        Ok(sanitize(&strip_code_fences(&result.text)))
    }
}

/// Remove section numbers from Markdown headings (`## 2.1 Model` → `## Model`).
pub fn strip_heading_numbers(text: &str) -> String {
    HEADING_NUMBER.replace_all(text, "$1 ").into_owned()
}

/// Split text into conversion chunks.
///
/// Headings of up to three levels start a new chunk; text before the first
/// heading is its own chunk. Without headings, paragraphs are grouped
/// `min(chunk_size_hint, paragraph count)` at a time.
pub fn split_chunks(text: &str, chunk_size_hint: usize) -> Vec<String> {
    let starts: Vec<usize> = CHUNK_HEADING.find_iter(text).map(|m| m.start()).collect();

    if starts.is_empty() {
        let paragraphs: Vec<&str> = PARAGRAPH_BREAK
            .split(text)
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        if paragraphs.is_empty() {
            return Vec::new();
        }
        let group = chunk_size_hint.clamp(1, paragraphs.len());
        return paragraphs.chunks(group).map(|g| g.join("\n\n")).collect();
    }

    let mut bounds = Vec::with_capacity(starts.len() + 1);
    if starts[0] > 0 {
        bounds.push(0);
    }
    bounds.extend(starts.iter().copied());
    bounds.push(text.len());

    bounds
        .windows(2)
        .map(|w| text[w[0]..w[1]].trim())
        .filter(|chunk| !chunk.is_empty())
        .map(str::to_string)
        .collect()
}

/// Drop Markdown code-fence lines the model wrapped its markup in.
pub fn strip_code_fences(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Replace symbols the compiler cannot handle with safe equivalents.
pub fn sanitize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match SANITIZE.iter().find(|(symbol, _)| *symbol == c) {
            Some((_, replacement)) => out.push_str(replacement),
            None => out.push(c),
        }
    }
    out
}
