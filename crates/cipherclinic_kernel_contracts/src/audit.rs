#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::common::validate_required_text;
use crate::envelope::Envelope;
use crate::{ContractViolation, UnixTimeMs, Validate};

pub type MetricTags = BTreeMap<String, String>;

pub fn metric_tags(pairs: &[(&str, &str)]) -> MetricTags {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantId {
    Patient,
    SpecialistAi,
    LabAi,
    BillingAi,
    HumanDoctor,
    Oracle,
}

impl ParticipantId {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Patient => "PATIENT",
            Self::SpecialistAi => "SPECIALIST_AI",
            Self::LabAi => "LAB_AI",
            Self::BillingAi => "BILLING_AI",
            Self::HumanDoctor => "HUMAN_DOCTOR",
            Self::Oracle => "ORACLE",
        }
    }

    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Patient => "Patient",
            Self::SpecialistAi => "Specialist AI",
            Self::LabAi => "Lab AI",
            Self::BillingAi => "Billing AI",
            Self::HumanDoctor => "Human Doctor",
            Self::Oracle => "Verification Oracle",
        }
    }
}

/// What a single stage hands back: the new envelope plus everything needed to
/// explain how it was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub target: Envelope,
    pub narrative: String,
    pub formula: String,
    pub steps: Vec<String>,
    pub metrics: MetricTags,
}

impl AuditRecord {
    pub fn new(
        target: Envelope,
        narrative: String,
        formula: String,
        steps: Vec<String>,
        metrics: MetricTags,
    ) -> Self {
        Self {
            target,
            narrative,
            formula,
            steps,
            metrics,
        }
    }
}

impl Validate for AuditRecord {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.target.validate()?;
        validate_required_text("audit_record.narrative", &self.narrative, 4_096)?;
        validate_required_text("audit_record.formula", &self.formula, 1_024)?;
        if self.steps.is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "audit_record.steps",
                reason: "must contain at least one step",
            });
        }
        for step in &self.steps {
            validate_required_text("audit_record.steps[]", step, 1_024)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    pub timestamp: UnixTimeMs,
    pub source: ParticipantId,
    pub action: String,
    pub details: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricTags>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub integrity_hash: Option<String>,
}

impl Validate for LogEntry {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_required_text("log_entry.id", &self.id, 128)?;
        validate_required_text("log_entry.action", &self.action, 256)?;
        validate_required_text("log_entry.details", &self.details, 8_192)?;
        if self.timestamp.0 == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "log_entry.timestamp",
                reason: "must be > 0",
            });
        }
        Ok(())
    }
}
