#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::common::{validate_finite, validate_required_text};
use crate::{ContractViolation, Validate};

pub const INITIAL_HISTORY_LABEL: &str = "Encrypted by Patient";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EnvelopeId(String);

impl EnvelopeId {
    pub fn new(id: impl Into<String>) -> Result<Self, ContractViolation> {
        let id = Self(id.into());
        id.validate()?;
        Ok(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for EnvelopeId {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_required_text("envelope_id", &self.0, 128)
    }
}

impl std::fmt::Display for EnvelopeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VitalsRecord {
    pub heart_rate: f64,
    pub systolic: f64,
    pub diastolic: f64,
    pub temperature: f64,
    pub oxygen_sat: f64,
    pub symptom_severity: f64,
}

impl VitalsRecord {
    pub fn v1(
        heart_rate: f64,
        systolic: f64,
        diastolic: f64,
        temperature: f64,
        oxygen_sat: f64,
        symptom_severity: f64,
    ) -> Result<Self, ContractViolation> {
        let record = Self {
            heart_rate,
            systolic,
            diastolic,
            temperature,
            oxygen_sat,
            symptom_severity,
        };
        record.validate()?;
        Ok(record)
    }
}

impl Validate for VitalsRecord {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_finite("vitals_record.heart_rate", self.heart_rate)?;
        validate_finite("vitals_record.systolic", self.systolic)?;
        validate_finite("vitals_record.diastolic", self.diastolic)?;
        validate_finite("vitals_record.temperature", self.temperature)?;
        validate_finite("vitals_record.oxygen_sat", self.oxygen_sat)?;
        validate_finite("vitals_record.symptom_severity", self.symptom_severity)?;
        Ok(())
    }
}

/// Free-form numeric record. Declared for completeness; no participant defines a
/// scoring rule for it, so transforms carry it through unchanged.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub fields: BTreeMap<String, f64>,
}

impl ProfileRecord {
    pub fn new(fields: BTreeMap<String, f64>) -> Result<Self, ContractViolation> {
        let record = Self { fields };
        record.validate()?;
        Ok(record)
    }

    pub fn numeric_sum(&self) -> f64 {
        self.fields.values().sum()
    }
}

impl Validate for ProfileRecord {
    fn validate(&self) -> Result<(), ContractViolation> {
        for (name, value) in &self.fields {
            validate_required_text("profile_record.field_name", name, 64)?;
            validate_finite("profile_record.field_value", *value)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawPayload {
    Scalar(f64),
    Vitals(VitalsRecord),
    Profile(ProfileRecord),
}

impl RawPayload {
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Self::Scalar(v) => Some(*v),
            Self::Vitals(_) | Self::Profile(_) => None,
        }
    }

    pub fn shape_label(&self) -> &'static str {
        match self {
            Self::Scalar(_) => "scalar",
            Self::Vitals(_) => "vitals",
            Self::Profile(_) => "profile",
        }
    }
}

impl Validate for RawPayload {
    fn validate(&self) -> Result<(), ContractViolation> {
        match self {
            Self::Scalar(v) => validate_finite("raw_payload.scalar", *v),
            Self::Vitals(vitals) => vitals.validate(),
            Self::Profile(profile) => profile.validate(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnvelopeState {
    Plaintext,
    Encrypted,
    Processed,
    Decrypted,
}

impl EnvelopeState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plaintext => "PLAINTEXT",
            Self::Encrypted => "ENCRYPTED",
            Self::Processed => "PROCESSED",
            Self::Decrypted => "DECRYPTED",
        }
    }

    /// States only move forward; staying put is allowed.
    pub fn can_advance_to(self, next: Self) -> bool {
        next >= self
    }
}

/// Append-only event labels. Appending yields a new history and leaves the
/// receiver untouched, so every earlier envelope keeps its own view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventHistory(Vec<String>);

impl EventHistory {
    pub fn seeded(label: impl Into<String>) -> Self {
        Self(vec![label.into()])
    }

    pub fn appended(&self, label: impl Into<String>) -> Self {
        let mut labels = Vec::with_capacity(self.0.len() + 1);
        labels.extend(self.0.iter().cloned());
        labels.push(label.into());
        Self(labels)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn labels(&self) -> &[String] {
        &self.0
    }

    pub fn last(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: EnvelopeId,
    pub raw_value: RawPayload,
    pub encrypted_blob: String,
    pub state: EnvelopeState,
    pub history: EventHistory,
}

impl Envelope {
    /// Fresh envelope as produced by client-side encryption.
    pub fn sealed(id: EnvelopeId, raw_value: RawPayload, encrypted_blob: String) -> Self {
        Self {
            id,
            raw_value,
            encrypted_blob,
            state: EnvelopeState::Encrypted,
            history: EventHistory::seeded(INITIAL_HISTORY_LABEL),
        }
    }

    pub fn advanced(
        &self,
        raw_value: RawPayload,
        encrypted_blob: String,
        state: EnvelopeState,
        label: impl Into<String>,
    ) -> Self {
        Self {
            id: self.id.clone(),
            raw_value,
            encrypted_blob,
            state,
            history: self.history.appended(label),
        }
    }

    pub fn annotated(&self, label: impl Into<String>) -> Self {
        Self {
            history: self.history.appended(label),
            ..self.clone()
        }
    }

    pub fn with_state(&self, state: EnvelopeState, label: impl Into<String>) -> Self {
        Self {
            state,
            history: self.history.appended(label),
            ..self.clone()
        }
    }
}

impl Validate for Envelope {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.id.validate()?;
        self.raw_value.validate()?;
        validate_required_text("envelope.encrypted_blob", &self.encrypted_blob, 256)?;
        if self.history.is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "envelope.history",
                reason: "must contain the seed label",
            });
        }
        Ok(())
    }
}
