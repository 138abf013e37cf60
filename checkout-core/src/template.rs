// src/template.rs
//
// A template is a base checkout document plus a list of stored regex edits.
// Rendering loads the base and replays every edit against it.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::ConfigurationFile;
use crate::find_replace::RegexFindReplace;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateSpec {
    /// Base document; relative paths resolve against the template's directory.
    pub filename: PathBuf,
    #[serde(default)]
    pub edits: Vec<RegexFindReplace>,
}

#[derive(Debug, Clone)]
pub struct TemplateOutcome {
    pub file: ConfigurationFile,
    pub applied: usize,
    pub failed: usize,
}

impl TemplateSpec {
    /// Load a template description (JSON or YAML, by extension).
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading template {}", path.display()))?;
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let mut template: TemplateSpec = if is_json {
            serde_json::from_str(&text)
                .with_context(|| format!("parsing template {}", path.display()))?
        } else {
            let value: serde_json::Value = serde_yaml::from_str(&text)
                .with_context(|| format!("parsing template {}", path.display()))?;
            serde_json::from_value(value)
                .with_context(|| format!("parsing template {}", path.display()))?
        };
        if template.filename.is_relative() {
            if let Some(dir) = path.parent() {
                template.filename = dir.join(&template.filename);
            }
        }
        Ok(template)
    }

    pub fn render(&self) -> Result<TemplateOutcome> {
        let file = ConfigurationFile::from_filename(&self.filename)?;
        Ok(self.apply_to(file))
    }

    /// Replay every edit against `file`. Edits that no longer fit the
    /// document are counted as failed and skipped.
    pub fn apply_to(&self, mut file: ConfigurationFile) -> TemplateOutcome {
        let mut applied = 0;
        let mut failed = 0;
        for edit in &self.edits {
            let ok = match edit.to_action_for(&file) {
                Ok(action) => action.apply(&mut file),
                Err(e) => {
                    warn!(path = %edit.path, error = %e, "template edit skipped");
                    false
                }
            };
            if ok {
                applied += 1;
            } else {
                failed += 1;
            }
        }
        info!(
            template = %self.filename.display(),
            applied,
            failed,
            "template rendered"
        );
        TemplateOutcome {
            file,
            applied,
            failed,
        }
    }
}
