//! Step templates and rendering.
//!
//! Every step of every sequence has a subject line and an HTML body. Both may
//! contain `{placeholder}` tokens that are filled in per recipient. Rendering
//! sits behind the [`StepRenderer`] trait so the sequencer does not care where
//! content comes from.

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::email::local_part;
use crate::sequences::{ACADEMY_ONBOARDING, STACKSHACK_WELCOME};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Placeholder names that may appear in a template.
pub const KNOWN_PLACEHOLDERS: &[&str] = &["email", "name", "step", "total_steps", "sequence_id"];

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([a-z_]+)\}").expect("valid regex"));

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Raw content for one step, before placeholder substitution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepTemplate {
    pub subject: String,
    pub html: String,
}

/// Content ready to hand to a delivery channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
}

/// Why a step could not be rendered.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("No templates registered for sequence '{0}'")]
    UnknownSequence(String),

    #[error("Sequence '{sequence_id}' has no template for step {step}")]
    UnknownStep { sequence_id: String, step: i32 },

    #[error("Template uses unknown placeholder {{{0}}}")]
    UnknownPlaceholder(String),
}

/// Produces the content for step `step` of `sequence_id` addressed to `email`.
pub trait StepRenderer: Send + Sync {
    fn render(&self, sequence_id: &str, step: i32, email: &str)
        -> Result<RenderedEmail, RenderError>;
}

// ---------------------------------------------------------------------------
// TemplateLibrary
// ---------------------------------------------------------------------------

/// Templates keyed by sequence id then step number.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateLibrary {
    templates: BTreeMap<String, BTreeMap<i32, StepTemplate>>,
}

impl TemplateLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the template for one step.
    pub fn insert(&mut self, sequence_id: impl Into<String>, step: i32, template: StepTemplate) {
        self.templates
            .entry(sequence_id.into())
            .or_default()
            .insert(step, template);
    }

    pub fn get(&self, sequence_id: &str, step: i32) -> Option<&StepTemplate> {
        self.templates.get(sequence_id)?.get(&step)
    }

    /// Step numbers that have a template for `sequence_id`, ascending.
    pub fn steps(&self, sequence_id: &str) -> impl Iterator<Item = i32> + '_ {
        self.templates
            .get(sequence_id)
            .into_iter()
            .flat_map(|steps| steps.keys().copied())
    }

    /// Whether any template exists for `sequence_id`.
    pub fn has_sequence(&self, sequence_id: &str) -> bool {
        self.templates.contains_key(sequence_id)
    }

    /// Every placeholder name used across all templates that is not in
    /// [`KNOWN_PLACEHOLDERS`].
    pub fn unknown_placeholders(&self) -> Vec<String> {
        let mut unknown: Vec<String> = self
            .templates
            .values()
            .flat_map(|steps| steps.values())
            .flat_map(|t| placeholders(&t.subject).chain(placeholders(&t.html)))
            .filter(|name| !KNOWN_PLACEHOLDERS.contains(&name.as_str()))
            .collect();
        unknown.sort();
        unknown.dedup();
        unknown
    }

    /// Content for the built-in campaigns.
    pub fn builtin() -> Self {
        let mut library = Self::new();
        for (step, subject, body) in ACADEMY_STEPS {
            library.insert(ACADEMY_ONBOARDING, *step, wrap(subject, body));
        }
        for (step, subject, body) in STACKSHACK_STEPS {
            library.insert(STACKSHACK_WELCOME, *step, wrap(subject, body));
        }
        library
    }
}

impl StepRenderer for TemplateLibrary {
    fn render(
        &self,
        sequence_id: &str,
        step: i32,
        email: &str,
    ) -> Result<RenderedEmail, RenderError> {
        let steps = self
            .templates
            .get(sequence_id)
            .ok_or_else(|| RenderError::UnknownSequence(sequence_id.to_string()))?;
        let template = steps.get(&step).ok_or_else(|| RenderError::UnknownStep {
            sequence_id: sequence_id.to_string(),
            step,
        })?;

        let total_steps = steps.keys().max().copied().unwrap_or(step);
        let mut values = HashMap::new();
        values.insert("email", email.to_string());
        values.insert("name", local_part(email).to_string());
        values.insert("step", step.to_string());
        values.insert("total_steps", total_steps.to_string());
        values.insert("sequence_id", sequence_id.to_string());

        Ok(RenderedEmail {
            subject: substitute(&template.subject, &values, false)?,
            html: substitute(&template.html, &values, true)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Substitution
// ---------------------------------------------------------------------------

fn placeholders(text: &str) -> impl Iterator<Item = String> + '_ {
    PLACEHOLDER_RE
        .captures_iter(text)
        .map(|caps| caps[1].to_string())
}

/// Replace every `{name}` in `text`. Values are HTML-escaped when `html` is set.
fn substitute(
    text: &str,
    values: &HashMap<&str, String>,
    html: bool,
) -> Result<String, RenderError> {
    if let Some(missing) = placeholders(text).find(|name| !values.contains_key(name.as_str())) {
        return Err(RenderError::UnknownPlaceholder(missing));
    }

    let rendered = PLACEHOLDER_RE.replace_all(text, |caps: &Captures| {
        let value = values.get(&caps[1]).map(String::as_str).unwrap_or_default();
        if html {
            escape_html(value)
        } else {
            value.to_string()
        }
    });
    Ok(rendered.into_owned())
}

fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Built-in content
// ---------------------------------------------------------------------------

fn wrap(subject: &str, body: &str) -> StepTemplate {
    StepTemplate {
        subject: subject.to_string(),
        html: format!(
            "<!doctype html><html><body style=\"font-family:sans-serif\">{body}\
             <p style=\"color:#888;font-size:12px\">You are receiving email {{step}} of \
             {{total_steps}} because {{email}} signed up at ID8Labs.</p></body></html>"
        ),
    }
}

const ACADEMY_STEPS: &[(i32, &str, &str)] = &[
    (
        1,
        "Welcome to the ID8Labs Academy",
        "<h1>Welcome, {name}!</h1><p>Your first lesson is ready. Start with the fundamentals \
         and work at your own pace.</p>",
    ),
    (
        2,
        "Lesson 2: building your first workflow",
        "<h1>Ready for lesson two, {name}?</h1><p>Today we turn the fundamentals into a \
         working workflow you can reuse.</p>",
    ),
    (
        3,
        "Lesson 3: prompts that hold up",
        "<h1>Prompts that hold up</h1><p>Patterns for prompts that keep working as your \
         project grows.</p>",
    ),
    (
        4,
        "Lesson 4: sharing with your team",
        "<h1>Share what you built</h1><p>Package your workflow so teammates can pick it up \
         in minutes.</p>",
    ),
    (
        5,
        "You finished the Academy onboarding",
        "<h1>Nice work, {name}</h1><p>That wraps up onboarding. The full course library is \
         waiting for you.</p>",
    ),
];

const STACKSHACK_STEPS: &[(i32, &str, &str)] = &[
    (
        1,
        "Welcome to StackShack",
        "<h1>Welcome, {name}!</h1><p>Browse skills, agents, commands and settings shared by \
         the community.</p>",
    ),
    (
        2,
        "Build your first stack",
        "<h1>Build a stack</h1><p>Combine the pieces you like into a stack and install it \
         with one command.</p>",
    ),
    (
        3,
        "Share your stack with the community",
        "<h1>Share it</h1><p>Publish your stack so others can discover and remix it.</p>",
    ),
];

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
