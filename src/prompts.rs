//! Agent instruction source: loads `<phase>.md` files from a configured
//! directory at startup into an in-memory map. The engine treats the
//! content as opaque text — prompt wording is an external collaborator's
//! concern, not this crate's.

use crate::types::PhaseName;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct PromptLibrary {
    prompts: HashMap<&'static str, String>,
}

const FALLBACK: &str = "You are an assistant in the Cardigan editing pipeline. \
    Complete your phase and return the requested output.";

impl PromptLibrary {
    pub fn load(dir: &Path) -> Result<Self> {
        let mut prompts = HashMap::new();
        for phase in PhaseName::PIPELINE_ORDER {
            let path = dir.join(format!("{}.md", phase.as_str()));
            let text = if path.exists() {
                std::fs::read_to_string(&path)
                    .with_context(|| format!("reading prompt file {}", path.display()))?
            } else {
                FALLBACK.to_string()
            };
            prompts.insert(phase.as_str(), text);
        }
        Ok(PromptLibrary { prompts })
    }

    pub fn system_prompt(&self, phase: PhaseName) -> &str {
        self.prompts.get(phase.as_str()).map(|s| s.as_str()).unwrap_or(FALLBACK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_directory_falls_back_to_default_prompts() {
        let lib = PromptLibrary::load(Path::new("/nonexistent/prompts")).unwrap();
        assert_eq!(lib.system_prompt(PhaseName::Analyst), FALLBACK);
    }

    #[test]
    fn present_file_overrides_fallback() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("analyst.md"), "custom analyst prompt").unwrap();
        let lib = PromptLibrary::load(dir.path()).unwrap();
        assert_eq!(lib.system_prompt(PhaseName::Analyst), "custom analyst prompt");
        assert_eq!(lib.system_prompt(PhaseName::Formatter), FALLBACK);
    }
}
