//! Layer 5: Duplicate detection and coexistence arbitration
//!
//! Classifies a candidate definition against an already-stored active one:
//! hash pre-filter first, canonical string equality on hash match, and the
//! pluggable coexistence validator for everything that is not identical.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::definition::{DefinitionHash, MitigationDefinition};
use crate::identity::MitigationName;
use crate::template::MitigationTemplate;

/// Borrowed view of one side of a comparison.
#[derive(Clone, Copy, Debug)]
pub struct DefinitionRef<'a> {
    pub template: MitigationTemplate,
    pub name: &'a MitigationName,
    pub definition: &'a MitigationDefinition,
    pub hash: DefinitionHash,
}

/// Structured refusal naming both sides so the caller can self-diagnose.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error(
    "definition of `{candidate_name}` ({candidate_template}) cannot coexist with active \
     `{existing_name}` ({existing_template}): {reason}"
)]
pub struct CoexistenceConflict {
    pub existing_name: MitigationName,
    pub existing_template: MitigationTemplate,
    pub candidate_name: MitigationName,
    pub candidate_template: MitigationTemplate,
    pub reason: String,
}

/// Per-template-pair arbitration of whether two differing definitions may be
/// simultaneously active on one device. Supplied by the template layer; this
/// crate only ships a conservative default.
pub trait CoexistenceValidator {
    fn validate_coexistence(
        &self,
        existing: DefinitionRef<'_>,
        candidate: DefinitionRef<'_>,
    ) -> Result<(), CoexistenceConflict>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DuplicateClassification {
    /// Canonical bytes are equal. For Edit/Delete this is "found the
    /// mitigation being modified"; Create policy decides what to do with it.
    Identical,
    Conflicting(CoexistenceConflictBox),
    Independent,
}

/// Boxed to keep the classification enum small on the common paths.
pub type CoexistenceConflictBox = Box<CoexistenceConflict>;

pub struct DuplicateDetector<'v> {
    validator: &'v dyn CoexistenceValidator,
}

impl<'v> DuplicateDetector<'v> {
    pub fn new(validator: &'v dyn CoexistenceValidator) -> Self {
        Self { validator }
    }

    pub fn classify(
        &self,
        existing: DefinitionRef<'_>,
        candidate: DefinitionRef<'_>,
    ) -> DuplicateClassification {
        if existing.hash == candidate.hash
            && existing.definition.as_str() == candidate.definition.as_str()
        {
            return DuplicateClassification::Identical;
        }
        // Differing bytes, including the hash-collision case: the template
        // pair arbitrates.
        match self.validator.validate_coexistence(existing, candidate) {
            Ok(()) => DuplicateClassification::Independent,
            Err(conflict) => DuplicateClassification::Conflicting(Box::new(conflict)),
        }
    }
}

/// Default arbitration: an allow-list of unordered template pairs that may
/// coexist. Same-name overlaps and unlisted pairs conflict.
#[derive(Clone, Debug, Default)]
pub struct DefaultCoexistence {
    allowed_pairs: BTreeSet<(MitigationTemplate, MitigationTemplate)>,
}

impl DefaultCoexistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard production table: count-action observes without acting,
    /// so it coexists with everything; rate-limit and blackhole target
    /// disjoint router features.
    pub fn standard() -> Self {
        let mut table = Self::new();
        for template in [
            MitigationTemplate::RouterRateLimit,
            MitigationTemplate::RouterBlackhole,
            MitigationTemplate::BlackwatchBorder,
            MitigationTemplate::BlackwatchPop,
        ] {
            table.allow(MitigationTemplate::RouterCountAction, template);
        }
        table.allow(
            MitigationTemplate::RouterRateLimit,
            MitigationTemplate::RouterBlackhole,
        );
        table
    }

    pub fn allow(&mut self, a: MitigationTemplate, b: MitigationTemplate) {
        self.allowed_pairs.insert(ordered_pair(a, b));
    }

    fn pair_allowed(&self, a: MitigationTemplate, b: MitigationTemplate) -> bool {
        self.allowed_pairs.contains(&ordered_pair(a, b))
    }
}

fn ordered_pair(
    a: MitigationTemplate,
    b: MitigationTemplate,
) -> (MitigationTemplate, MitigationTemplate) {
    if a <= b { (a, b) } else { (b, a) }
}

impl CoexistenceValidator for DefaultCoexistence {
    fn validate_coexistence(
        &self,
        existing: DefinitionRef<'_>,
        candidate: DefinitionRef<'_>,
    ) -> Result<(), CoexistenceConflict> {
        let conflict = |reason: &str| CoexistenceConflict {
            existing_name: existing.name.clone(),
            existing_template: existing.template,
            candidate_name: candidate.name.clone(),
            candidate_template: candidate.template,
            reason: reason.to_string(),
        };

        if existing.name == candidate.name {
            // Same name, differing definition: only ever legal as an Edit,
            // which the handler recognises before consulting us.
            return Err(conflict("same name already active with a different definition"));
        }
        if existing.template == candidate.template {
            return Err(conflict("template does not allow two instances on one device"));
        }
        if !self.pair_allowed(existing.template, candidate.template) {
            return Err(conflict("template pair is not coexistence-listed"));
        }
        Ok(())
    }
}
