//! Prompt-listing appendix: the plan rendered as a LaTeX section.

use paperchain_config::ModelCatalog;
use paperchain_core::Plan;

/// Escape LaTeX special characters in plain text.
pub fn escape_latex(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\textbackslash{}"),
            '~' => out.push_str("\\textasciitilde{}"),
            '^' => out.push_str("\\textasciicircum{}"),
            '&' | '%' | '$' | '#' | '_' | '{' | '}' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

/// Escaped text with paragraphs kept and line breaks forced.
fn escape_block(text: &str) -> String {
    text.trim()
        .split("\n\n")
        .map(|paragraph| {
            paragraph
                .lines()
                .map(|line| escape_latex(line.trim_end()))
                .collect::<Vec<_>>()
                .join(" \\newline\n")
        })
        .filter(|p| !p.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn model_label(catalog: &ModelCatalog, model: &str) -> String {
    let id = catalog.resolve(model).map(|spec| spec.id.as_str()).unwrap_or(model);
    escape_latex(id)
}

fn entry(out: &mut String, heading: &str, text: &str) {
    out.push_str(&format!("\\subsection*{{{heading}}}\n"));
    out.push_str("\\begin{quote}\\small\n");
    out.push_str(&escape_block(text));
    out.push_str("\n\\end{quote}\n\n");
}

/// Render the system instructions and every stage's instructions, in plan
/// order, as an appendix section.
pub fn render_prompt_listing(plan: &Plan, system_prompt: &str, catalog: &ModelCatalog) -> String {
    let mut out = String::from("\\section{Prompts Used to Generate This Paper}\n\n");
    out.push_str(
        "Each prompt consists of context and instructions. The context consists of the \
         responses to the previous prompts and may include reference material. \
         The system prompt and the instructions are listed below.\n\n",
    );

    if !system_prompt.trim().is_empty() {
        entry(&mut out, "System Prompt", system_prompt);
    }

    for stage in plan.stages() {
        let heading = format!(
            "Instruction: {} (model: {})",
            escape_latex(&stage.name),
            model_label(catalog, &stage.model)
        );
        entry(&mut out, &heading, &stage.instructions);
    }

    out
}
