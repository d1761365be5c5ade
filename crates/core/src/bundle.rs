//! Sequence definitions paired with their templates.
//!
//! The service runs with the built-in bundle unless a JSON catalog file is
//! supplied. A file looks like:
//!
//! ```json
//! {
//!   "sequences": [
//!     { "id": "welcome", "totalSteps": 2, "schedule": { "1": 0, "2": 24 } }
//!   ],
//!   "templates": {
//!     "welcome": {
//!       "1": { "subject": "Hi {name}", "html": "<p>Welcome</p>" },
//!       "2": { "subject": "Day two", "html": "<p>More</p>" }
//!     }
//!   }
//! }
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::error::CoreError;
use crate::sequences::{SequenceCatalog, SequenceDefinition};
use crate::templates::TemplateLibrary;

#[derive(Debug, Deserialize)]
struct BundleFile {
    sequences: Vec<SequenceDefinition>,
    templates: TemplateLibrary,
}

/// A validated catalog and the templates that render it.
#[derive(Debug, Clone)]
pub struct SequenceBundle {
    pub catalog: SequenceCatalog,
    pub templates: TemplateLibrary,
}

impl SequenceBundle {
    pub fn builtin() -> Self {
        Self {
            catalog: SequenceCatalog::builtin(),
            templates: TemplateLibrary::builtin(),
        }
    }

    /// Parse and validate a bundle from JSON text.
    pub fn from_json(text: &str) -> Result<Self, CoreError> {
        let file: BundleFile = serde_json::from_str(text)
            .map_err(|e| CoreError::Validation(format!("Invalid sequence catalog: {e}")))?;
        let bundle = Self {
            catalog: SequenceCatalog::new(file.sequences)?,
            templates: file.templates,
        };
        bundle.validate()?;
        Ok(bundle)
    }

    /// Read a bundle from a JSON file on disk.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            CoreError::Validation(format!(
                "Failed to read sequence catalog {}: {e}",
                path.display()
            ))
        })?;
        Self::from_json(&text)
    }

    /// Every step of every sequence must have a template, no template may sit
    /// outside a sequence's steps, and templates may only use known
    /// placeholders.
    pub fn validate(&self) -> Result<(), CoreError> {
        for def in self.catalog.iter() {
            if let Some(extra) = self
                .templates
                .steps(&def.id)
                .find(|step| !(1..=def.total_steps).contains(step))
            {
                return Err(CoreError::Validation(format!(
                    "Sequence '{}' has {} steps but a template for step {extra}",
                    def.id, def.total_steps
                )));
            }
            for step in 1..=def.total_steps {
                if self.templates.get(&def.id, step).is_none() {
                    return Err(CoreError::Validation(format!(
                        "Sequence '{}' has no template for step {step}",
                        def.id
                    )));
                }
            }
        }

        let unknown = self.templates.unknown_placeholders();
        if !unknown.is_empty() {
            return Err(CoreError::Validation(format!(
                "Templates use unknown placeholders: {}",
                unknown.join(", ")
            )));
        }
        Ok(())
    }
}
