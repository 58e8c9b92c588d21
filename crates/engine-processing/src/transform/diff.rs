use crate::transform::{
    attributes::AttributeBlock,
    provenance::{Provenance, ProvenanceRules},
    text::normalize_text,
};
use engine_config::settings::sections::{DiffSettings, FieldKind, TrackedField};
use model::catalog::record::{CandidateRecord, CurrentRecord, FieldSource, UpdatePayload};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Unchanged,
    /// Candidate is blank where the current value is populated.
    EmptyCandidate,
    DisallowedHost,
    /// Both self-hosted, but in different deployment environments.
    CrossEnvironment,
    /// Current value lives in our storage and the candidate does not.
    WouldLeaveStorage,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkipReason::Unchanged => "unchanged",
            SkipReason::EmptyCandidate => "empty candidate",
            SkipReason::DisallowedHost => "disallowed host",
            SkipReason::CrossEnvironment => "cross-environment reference",
            SkipReason::WouldLeaveStorage => "would leave own storage",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedField {
    pub key: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffOutcome {
    pub payload: UpdatePayload,
    pub changed_fields: Vec<String>,
    pub skipped_fields: Vec<SkippedField>,
}

impl DiffOutcome {
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Skips other than plain equality, worth surfacing in status notes.
    pub fn protected_fields(&self) -> impl Iterator<Item = &SkippedField> {
        self.skipped_fields
            .iter()
            .filter(|s| s.reason != SkipReason::Unchanged)
    }
}

#[derive(Debug, Clone)]
pub struct DiffRules {
    tracked: Vec<TrackedField>,
    provenance: ProvenanceRules,
    environment: Option<String>,
}

impl DiffRules {
    pub fn new(
        tracked: Vec<TrackedField>,
        provenance: ProvenanceRules,
        environment: Option<String>,
    ) -> Self {
        DiffRules {
            tracked,
            provenance,
            environment,
        }
    }

    pub fn from_settings(settings: &DiffSettings) -> Self {
        Self::new(
            settings.tracked_fields.clone(),
            ProvenanceRules::from_settings(settings),
            settings.environment.clone(),
        )
    }
}

type FieldDecision = Result<String, SkipReason>;

/// Computes minimal patches. Pure: no I/O and no state beyond its rules.
#[derive(Debug, Clone)]
pub struct DiffEngine {
    rules: DiffRules,
}

impl DiffEngine {
    pub fn new(rules: DiffRules) -> Self {
        DiffEngine { rules }
    }

    pub fn diff(&self, current: &CurrentRecord, candidate: &CandidateRecord) -> DiffOutcome {
        let mut payload = UpdatePayload::new(current.id, current.identifier.clone());
        let mut changed_fields = Vec::new();
        let mut skipped_fields = Vec::new();

        for field in &self.rules.tracked {
            let cur = current.field(&field.key).unwrap_or_default();
            let cand = candidate.field(&field.key).unwrap_or_default();

            let decision = match field.kind {
                FieldKind::Text => self.text(cur, cand),
                FieldKind::ImageRef => self.image(cur, cand),
                FieldKind::DocumentRef => self.document(cur, cand),
                FieldKind::AttributeBlock => self.attribute_block(cur, cand),
            };

            match decision {
                Ok(value) => {
                    payload.set(&field.key, value);
                    changed_fields.push(field.key.clone());
                }
                Err(reason) => skipped_fields.push(SkippedField {
                    key: field.key.clone(),
                    reason,
                }),
            }
        }

        DiffOutcome {
            payload,
            changed_fields,
            skipped_fields,
        }
    }

    fn blank_candidate(cur: &str) -> SkipReason {
        if cur.trim().is_empty() {
            SkipReason::Unchanged
        } else {
            SkipReason::EmptyCandidate
        }
    }

    fn text(&self, cur: &str, cand: &str) -> FieldDecision {
        let cand_norm = normalize_text(cand);
        if cand_norm.is_empty() {
            return Err(Self::blank_candidate(&normalize_text(cur)));
        }
        if cand_norm == normalize_text(cur) {
            return Err(SkipReason::Unchanged);
        }
        Ok(cand.trim().to_string())
    }

    fn environment_of(&self, provenance: &Provenance) -> Option<String> {
        match provenance {
            Provenance::SelfHosted { environment } => {
                environment.clone().or_else(|| self.rules.environment.clone())
            }
            _ => None,
        }
    }

    fn image(&self, cur: &str, cand: &str) -> FieldDecision {
        let cand_kind = self.rules.provenance.classify(cand);
        match cand_kind {
            Provenance::Empty => return Err(Self::blank_candidate(cur)),
            Provenance::Disallowed => return Err(SkipReason::DisallowedHost),
            _ => {}
        }

        let cur_kind = self.rules.provenance.classify(cur);
        if cur_kind.is_self_hosted() {
            if !cand_kind.is_self_hosted() {
                return Err(SkipReason::WouldLeaveStorage);
            }
            if self.environment_of(&cur_kind) != self.environment_of(&cand_kind) {
                return Err(SkipReason::CrossEnvironment);
            }
        }

        if cur.trim() == cand.trim() {
            return Err(SkipReason::Unchanged);
        }
        Ok(cand.trim().to_string())
    }

    fn document(&self, cur: &str, cand: &str) -> FieldDecision {
        let cand_kind = self.rules.provenance.classify(cand);
        match cand_kind {
            Provenance::Empty => return Err(Self::blank_candidate(cur)),
            Provenance::Disallowed => return Err(SkipReason::DisallowedHost),
            _ => {}
        }

        if self.rules.provenance.classify(cur).is_self_hosted() && !cand_kind.is_self_hosted() {
            return Err(SkipReason::WouldLeaveStorage);
        }
        if cur.trim() == cand.trim() {
            return Err(SkipReason::Unchanged);
        }
        Ok(cand.trim().to_string())
    }

    fn attribute_block(&self, cur: &str, cand: &str) -> FieldDecision {
        let current = AttributeBlock::parse(cur);
        let candidate = AttributeBlock::parse(cand);
        if candidate.is_empty() {
            return Err(Self::blank_candidate(cur));
        }

        let merged = current.merged_with(&candidate);
        if merged.same_content(&current) {
            return Err(SkipReason::Unchanged);
        }
        Ok(merged.render())
    }
}
