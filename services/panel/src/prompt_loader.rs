use anyhow::{Context, Result};
use panel_core::prompts::PromptSet;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Reads every `*.md` file in `dir_path`, keyed by file stem. A missing
/// directory means no overrides.
pub fn load_prompts(dir_path: &Path) -> Result<HashMap<String, String>> {
    let mut prompts = HashMap::new();
    if !dir_path.exists() {
        tracing::debug!("No prompt directory at {}; using built-in prompts", dir_path.display());
        return Ok(prompts);
    }

    for entry in fs::read_dir(dir_path)
        .with_context(|| format!("Failed to read prompts directory: {}", dir_path.display()))?
    {
        let entry = entry?;
        let path = entry.path();

        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("md") {
            let prompt_key = path
                .file_stem()
                .and_then(|s| s.to_str())
                .context("Could not get file stem for prompt file")?
                .to_string();

            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read prompt file: {}", path.display()))?;

            prompts.insert(prompt_key, content);
        }
    }

    Ok(prompts)
}

/// Built-in prompts with any overrides from `dir_path` applied.
pub fn load_prompt_set(dir_path: &Path) -> Result<PromptSet> {
    let overrides = load_prompts(dir_path)?;
    tracing::info!("Loaded {} prompt overrides.", overrides.len());
    Ok(PromptSet::with_overrides(overrides))
}
