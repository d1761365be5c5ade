//! Drip sequence definitions and the in-memory catalog.
//!
//! A [`SequenceDefinition`] is static configuration: an ordered list of steps
//! (1-based) with a delay per step measured in hours from the moment the
//! subject enrolled. Delays are absolute offsets from `started_at`, never
//! relative to the previous send, so a late tick only delays the step it was
//! late for.

use std::collections::BTreeMap;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum length of a sequence identifier.
pub const MAX_SEQUENCE_ID_LENGTH: usize = 100;

/// Upper bound on steps per sequence. Keeps a bad catalog file from
/// producing absurd schedules.
pub const MAX_STEPS: i32 = 100;

/// Identifier of the built-in academy onboarding campaign.
pub const ACADEMY_ONBOARDING: &str = "academy-onboarding";

/// Identifier of the built-in StackShack welcome campaign.
pub const STACKSHACK_WELCOME: &str = "stackshack-welcome";

// ---------------------------------------------------------------------------
// SequenceDefinition
// ---------------------------------------------------------------------------

/// A named campaign: how many steps it has and when each one is due.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceDefinition {
    pub id: String,
    pub total_steps: i32,
    /// Step number (1..=total_steps) to delay in hours from enrollment start.
    pub schedule: BTreeMap<i32, u32>,
}

impl SequenceDefinition {
    /// Build a definition from a list of per-step delays (step 1 first).
    pub fn from_delays(id: impl Into<String>, delays_hours: &[u32]) -> Self {
        let schedule = delays_hours
            .iter()
            .enumerate()
            .map(|(i, hours)| (i as i32 + 1, *hours))
            .collect();
        Self {
            id: id.into(),
            total_steps: delays_hours.len() as i32,
            schedule,
        }
    }

    /// Check the structural invariants of a definition.
    ///
    /// - the id is a non-empty slug (`[a-z0-9-_]`)
    /// - `total_steps` is in `1..=MAX_STEPS`
    /// - `schedule` has exactly one entry for every step `1..=total_steps`
    /// - delays never decrease from one step to the next
    pub fn validate(&self) -> Result<(), CoreError> {
        validate_sequence_id(&self.id)?;

        if self.total_steps < 1 || self.total_steps > MAX_STEPS {
            return Err(CoreError::Validation(format!(
                "Sequence '{}' must have between 1 and {MAX_STEPS} steps (got {})",
                self.id, self.total_steps
            )));
        }

        let expected: Vec<i32> = (1..=self.total_steps).collect();
        let actual: Vec<i32> = self.schedule.keys().copied().collect();
        if expected != actual {
            return Err(CoreError::Validation(format!(
                "Sequence '{}' schedule must cover steps 1..={} exactly",
                self.id, self.total_steps
            )));
        }

        let mut previous = 0u32;
        for (step, hours) in &self.schedule {
            if *hours < previous {
                return Err(CoreError::Validation(format!(
                    "Sequence '{}' step {step} is scheduled before the step preceding it",
                    self.id
                )));
            }
            previous = *hours;
        }

        Ok(())
    }

    /// Delay in hours for `step`, or `None` if the step is out of range.
    pub fn delay_hours(&self, step: i32) -> Option<u32> {
        self.schedule.get(&step).copied()
    }

    /// Absolute send time of `step` for an enrollment that started at
    /// `started_at`.
    pub fn send_at(&self, started_at: Timestamp, step: i32) -> Option<Timestamp> {
        self.delay_hours(step)
            .map(|hours| started_at + Duration::hours(i64::from(hours)))
    }

    /// Whether `step` is the final step of the sequence.
    pub fn is_last_step(&self, step: i32) -> bool {
        step >= self.total_steps
    }
}

/// Validate a sequence identifier: non-empty, bounded, lowercase slug.
pub fn validate_sequence_id(id: &str) -> Result<(), CoreError> {
    if id.is_empty() {
        return Err(CoreError::Validation(
            "Sequence id must not be empty".to_string(),
        ));
    }
    if id.len() > MAX_SEQUENCE_ID_LENGTH {
        return Err(CoreError::Validation(format!(
            "Sequence id exceeds maximum length of {MAX_SEQUENCE_ID_LENGTH} characters"
        )));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
    {
        return Err(CoreError::Validation(format!(
            "Sequence id '{id}' may only contain lowercase letters, digits, '-' and '_'"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// SequenceCatalog
// ---------------------------------------------------------------------------

/// Lookup table of every campaign the service knows about.
#[derive(Debug, Clone, Default)]
pub struct SequenceCatalog {
    definitions: BTreeMap<String, SequenceDefinition>,
}

impl SequenceCatalog {
    /// Build a catalog, validating every definition and rejecting duplicates.
    pub fn new(definitions: Vec<SequenceDefinition>) -> Result<Self, CoreError> {
        let mut catalog = Self::default();
        for definition in definitions {
            definition.validate()?;
            if catalog.definitions.contains_key(&definition.id) {
                return Err(CoreError::Validation(format!(
                    "Duplicate sequence id '{}'",
                    definition.id
                )));
            }
            catalog.definitions.insert(definition.id.clone(), definition);
        }
        Ok(catalog)
    }

    /// The campaigns shipped with the service.
    pub fn builtin() -> Self {
        let definitions = [
            SequenceDefinition::from_delays(ACADEMY_ONBOARDING, &[0, 24, 72, 120, 168]),
            SequenceDefinition::from_delays(STACKSHACK_WELCOME, &[0, 48, 120]),
        ];
        Self {
            definitions: definitions
                .into_iter()
                .map(|d| (d.id.clone(), d))
                .collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&SequenceDefinition> {
        self.definitions.get(id)
    }

    /// Like [`get`](Self::get) but maps a miss to [`CoreError::UnknownSequence`].
    pub fn require(&self, id: &str) -> Result<&SequenceDefinition, CoreError> {
        self.get(id)
            .ok_or_else(|| CoreError::UnknownSequence(id.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &SequenceDefinition> {
        self.definitions.values()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
