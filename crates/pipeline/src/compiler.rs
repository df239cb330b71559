//! Compilation driver: runs the external typesetting toolchain.
//!
//! A document body is wrapped into a template at the
//! `% [input-goes-here]` placeholder and compiled with a fixed pass
//! sequence: engine, bibliography tool, engine, engine. Exit codes are not
//! trusted; the compile succeeded if and only if the PDF exists afterwards.

use async_trait::async_trait;
use paperchain_config::LatexConfig;
use paperchain_core::Error;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Where a template receives the document body.
pub const TEMPLATE_PLACEHOLDER: &str = "% [input-goes-here]";

/// Auxiliary files cleared before every attempt.
const AUX_EXTENSIONS: &[&str] = &["aux", "bbl", "blg", "out", "bcf", "run.xml", "toc", "log"];

/// What to compile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentSource<'a> {
    /// A body to be placed into the template
    Body(&'a str),
    /// A complete document, compiled as-is
    Complete(&'a str),
}

/// Result of one compile attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileOutcome {
    pub success: bool,
    /// The rendered artifact, present only on success
    pub artifact_path: Option<PathBuf>,
    /// Toolchain output, present on failure
    pub diagnostic_log: Option<String>,
    /// Where the full toolchain log was written
    pub log_path: Option<PathBuf>,
}

/// The external document compiler.
#[async_trait]
pub trait DocumentCompiler: Send + Sync {
    /// Toolchain name (e.g., "pdflatex").
    fn name(&self) -> &str;

    /// Compile the document for a stage.
    ///
    /// `Err` means the driver itself failed (e.g., the source could not be
    /// written); a document that does not compile is `Ok` with
    /// `success == false`.
    async fn compile(&self, stage: &str, source: DocumentSource<'_>) -> Result<CompileOutcome, Error>;
}

/// Drives pdflatex-style engines and a bibliography processor.
pub struct LatexCompiler {
    output_dir: PathBuf,
    engine: String,
    bibliography_tool: String,
    template: String,
    pass_timeout: Duration,
}

impl LatexCompiler {
    /// A compiler writing into `output_dir` with the built-in template.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            engine: "pdflatex".into(),
            bibliography_tool: "biber".into(),
            template: default_template(None),
            pass_timeout: Duration::from_secs(120),
        }
    }

    /// Build from `[latex]` settings. A configured template must exist and
    /// contain the placeholder.
    ///
    /// The engines run inside the output directory, so the bibliography is
    /// resolved to an absolute path before it goes into the template.
    pub fn from_config(
        config: &LatexConfig,
        output_dir: impl Into<PathBuf>,
        bibliography: Option<&Path>,
    ) -> Result<Self, Error> {
        let bibliography = bibliography
            .map(|path| {
                std::fs::canonicalize(path).map_err(|e| Error::Config {
                    message: format!("cannot resolve bibliography {}: {e}", path.display()),
                })
            })
            .transpose()?;
        let template = match &config.template {
            Some(path) => {
                let template = std::fs::read_to_string(path).map_err(|e| Error::Config {
                    message: format!("cannot read LaTeX template {}: {e}", path.display()),
                })?;
                if !template.contains(TEMPLATE_PLACEHOLDER) {
                    return Err(Error::Config {
                        message: format!(
                            "LaTeX template {} has no '{TEMPLATE_PLACEHOLDER}' placeholder",
                            path.display()
                        ),
                    });
                }
                template
            }
            None => default_template(bibliography.as_deref()),
        };

        Ok(Self {
            output_dir: output_dir.into(),
            engine: config.engine.clone(),
            bibliography_tool: config.bibliography_tool.clone(),
            template,
            pass_timeout: Duration::from_secs(config.pass_timeout_secs),
        })
    }

    /// Place a body into the template.
    pub fn wrap(&self, body: &str) -> String {
        self.template.replacen(TEMPLATE_PLACEHOLDER, body, 1)
    }

    fn job_name(stage: &str) -> String {
        format!("{stage}-latex")
    }

    /// Remove auxiliary files and any stale artifact of a previous attempt.
    async fn clear_aux_files(&self, job: &str) {
        for ext in AUX_EXTENSIONS.iter().chain(std::iter::once(&"pdf")) {
            let path = self.output_dir.join(format!("{job}.{ext}"));
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!(path = %path.display(), "Removed stale compile file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove stale compile file"),
            }
        }
    }

    /// Run one toolchain pass, appending its output to `log`.
    async fn run_pass(&self, label: &str, program: &str, args: &[String], log: &mut String) {
        log.push_str(&format!("=== {label}: {program} {} ===\n", args.join(" ")));

        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(&self.output_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        match tokio::time::timeout(self.pass_timeout, command.output()).await {
            Ok(Ok(output)) => {
                log.push_str(&String::from_utf8_lossy(&output.stdout));
                log.push_str(&String::from_utf8_lossy(&output.stderr));
                if !output.status.success() {
                    let code = output.status.code().unwrap_or(-1);
                    debug!(program = %program, pass = %label, exit_code = code, "Compile pass exited non-zero");
                    log.push_str(&format!("[exit code: {code}]\n"));
                }
            }
            Ok(Err(e)) => {
                warn!(program = %program, error = %e, "Failed to start compile pass");
                log.push_str(&format!("[failed to start: {e}]\n"));
            }
            Err(_) => {
                warn!(program = %program, timeout_secs = self.pass_timeout.as_secs(), "Compile pass timed out");
                log.push_str(&format!(
                    "[timed out after {}s]\n",
                    self.pass_timeout.as_secs()
                ));
            }
        }
        log.push('\n');
    }
}

#[async_trait]
impl DocumentCompiler for LatexCompiler {
    fn name(&self) -> &str {
        &self.engine
    }

    async fn compile(&self, stage: &str, source: DocumentSource<'_>) -> Result<CompileOutcome, Error> {
        let job = Self::job_name(stage);
        let tex_path = self.output_dir.join(format!("{job}.tex"));
        let pdf_path = self.output_dir.join(format!("{job}.pdf"));
        let log_path = self.output_dir.join(format!("{stage}-latex-compile.log"));

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| Error::Compile(format!("cannot create {}: {e}", self.output_dir.display())))?;

        self.clear_aux_files(&job).await;

        let document = match source {
            DocumentSource::Body(body) => self.wrap(body),
            DocumentSource::Complete(document) => document.to_string(),
        };
        tokio::fs::write(&tex_path, document)
            .await
            .map_err(|e| Error::Compile(format!("cannot write {}: {e}", tex_path.display())))?;

        info!(stage = %stage, engine = %self.engine, source = %tex_path.display(), "Compiling document");

        let engine_args = vec![
            "-interaction=nonstopmode".to_string(),
            "-halt-on-error".to_string(),
            format!("{job}.tex"),
        ];
        let mut log = String::new();
        self.run_pass("pass 1", &self.engine, &engine_args, &mut log).await;
        self.run_pass("bibliography", &self.bibliography_tool, &[job.clone()], &mut log)
            .await;
        self.run_pass("pass 2", &self.engine, &engine_args, &mut log).await;
        self.run_pass("pass 3", &self.engine, &engine_args, &mut log).await;

        if let Err(e) = tokio::fs::write(&log_path, &log).await {
            warn!(path = %log_path.display(), error = %e, "Failed to write compile log");
        }

        let success = tokio::fs::try_exists(&pdf_path).await.unwrap_or(false);
        if success {
            info!(stage = %stage, artifact = %pdf_path.display(), "Document compiled");
        } else {
            warn!(stage = %stage, log = %log_path.display(), "Document failed to compile");
        }

        Ok(CompileOutcome {
            success,
            artifact_path: success.then_some(pdf_path),
            diagnostic_log: (!success).then_some(log),
            log_path: Some(log_path),
        })
    }
}

/// Built-in article template.
fn default_template(bibliography: Option<&Path>) -> String {
    let bib = match bibliography {
        Some(path) => format!(
            "\\usepackage[backend=biber,style=authoryear]{{biblatex}}\n\\addbibresource{{{}}}\n",
            path.display()
        ),
        None => String::new(),
    };
    let print_bib = if bibliography.is_some() {
        "\\printbibliography\n"
    } else {
        ""
    };
    format!(
        "\\documentclass[12pt]{{article}}\n\
         \\usepackage[utf8]{{inputenc}}\n\
         \\usepackage[T1]{{fontenc}}\n\
         \\usepackage{{amsmath,amssymb,amsthm}}\n\
         \\usepackage{{graphicx}}\n\
         \\usepackage{{booktabs}}\n\
         \\usepackage{{hyperref}}\n\
         {bib}\
         \\begin{{document}}\n\
         {TEMPLATE_PLACEHOLDER}\n\
         {print_bib}\
         \\end{{document}}\n"
    )
}

/// Extract a complete document from a response: everything from
/// `\documentclass` through `\end{document}`, with `../latex-input/`
/// include paths rewritten to the output directory.
pub fn extract_document(text: &str) -> Option<String> {
    const END: &str = "\\end{document}";
    let start = text.find("\\documentclass")?;
    let end = text[start..].find(END)? + start + END.len();
    Some(text[start..end].replace("../latex-input/", "./"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn wrap_places_body_at_placeholder() {
        let compiler = LatexCompiler::new("/tmp/out");
        let doc = compiler.wrap("\\section{Intro}");
        assert!(doc.starts_with("\\documentclass"));
        assert!(doc.contains("\\begin{document}\n\\section{Intro}\n"));
        assert!(!doc.contains(TEMPLATE_PLACEHOLDER));
        assert!(!doc.contains("biblatex"));
    }

    #[test]
    fn bibliography_template_loads_biblatex() {
        let template = default_template(Some(Path::new("/refs/bibtex-all.bib")));
        assert!(template.contains("\\addbibresource{/refs/bibtex-all.bib}"));
        assert!(template.contains("\\printbibliography"));
    }

    #[test]
    fn relative_bibliography_resolves_from_the_output_dir() {
        let refs = tempfile::tempdir_in(".").unwrap();
        std::fs::write(refs.path().join("bibtex-all.bib"), "@book{a, title={A}}").unwrap();
        let relative = Path::new(".")
            .join(refs.path().file_name().unwrap())
            .join("bibtex-all.bib");
        let out = TempDir::new().unwrap();

        let compiler =
            LatexCompiler::from_config(&LatexConfig::default(), out.path(), Some(&relative)).unwrap();

        let line = compiler
            .template
            .lines()
            .find(|l| l.starts_with("\\addbibresource"))
            .unwrap();
        let resource = line
            .trim_start_matches("\\addbibresource{")
            .trim_end_matches('}');
        let resource = Path::new(resource);
        assert!(resource.is_absolute());
        assert!(out.path().join(resource).exists());
    }

    #[test]
    fn missing_bibliography_is_a_config_error() {
        let out = TempDir::new().unwrap();
        let missing = out.path().join("nope.bib");
        assert!(matches!(
            LatexCompiler::from_config(&LatexConfig::default(), out.path(), Some(&missing)),
            Err(Error::Config { .. })
        ));
    }

    #[test]
    fn configured_template_must_have_placeholder() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("template.tex");
        std::fs::write(&path, "\\documentclass{article}\\begin{document}\\end{document}").unwrap();
        let config = LatexConfig {
            template: Some(path),
            ..LatexConfig::default()
        };
        assert!(matches!(
            LatexCompiler::from_config(&config, tmp.path(), None),
            Err(Error::Config { .. })
        ));
    }

    #[test]
    fn extract_complete_document() {
        let response = "Here is the paper:\n```latex\n\\documentclass{article}\n\\input{../latex-input/macros.tex}\n\\begin{document}\nHi\n\\end{document}\n```\nDone.";
        let doc = extract_document(response).unwrap();
        assert!(doc.starts_with("\\documentclass{article}"));
        assert!(doc.ends_with("\\end{document}"));
        assert!(doc.contains("\\input{./macros.tex}"));
        assert!(extract_document("no document here").is_none());
    }

    #[tokio::test]
    async fn missing_engine_fails_with_log_on_disk() {
        let tmp = TempDir::new().unwrap();
        let config = LatexConfig {
            engine: "paperchain-no-such-engine".into(),
            bibliography_tool: "paperchain-no-such-biber".into(),
            ..LatexConfig::default()
        };
        let compiler = LatexCompiler::from_config(&config, tmp.path(), None).unwrap();

        std::fs::write(tmp.path().join("intro-latex.pdf"), "stale").unwrap();
        std::fs::write(tmp.path().join("intro-latex.aux"), "stale").unwrap();

        let outcome = compiler
            .compile("intro", DocumentSource::Body("\\section{Intro}"))
            .await
            .unwrap();

        assert!(!outcome.success);
        assert!(outcome.artifact_path.is_none());
        assert!(outcome.diagnostic_log.unwrap().contains("failed to start"));
        assert!(outcome.log_path.unwrap().exists());
        assert!(!tmp.path().join("intro-latex.pdf").exists());
        assert!(!tmp.path().join("intro-latex.aux").exists());
        assert!(tmp.path().join("intro-latex.tex").exists());
    }
}
