//! `paperchain appendix`: Render the prompts of a plan as a LaTeX appendix.

use paperchain_config::{AppConfig, load_plan};
use paperchain_pipeline::appendix::render_prompt_listing;
use std::path::Path;

const APPENDIX_FILE: &str = "appendix-promptlisting.tex";

pub fn run(config: &AppConfig, plan_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let catalog = config.catalog();
    let loaded = load_plan(plan_path, &catalog)?;
    let listing = render_prompt_listing(&loaded.plan, &loaded.settings.system_prompt, &catalog);

    std::fs::create_dir_all(&config.output_dir)?;
    let path = config.output_dir.join(APPENDIX_FILE);
    std::fs::write(&path, listing)?;
    println!("✅ Wrote {} ({} stages)", path.display(), loaded.plan.len());
    Ok(())
}
