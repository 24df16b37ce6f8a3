#![forbid(unsafe_code)]

use cipherclinic_engines::ciphertext::{format_number, CiphertextCodec, CiphertextConfig};
use cipherclinic_engines::envelope_factory::EnvelopeFactory;
use cipherclinic_engines::oracle::ProtocolOracle;
use cipherclinic_engines::participants::{ParticipantRuntime, ParticipantTransform};
use cipherclinic_engines::sources::ProtocolSources;
use cipherclinic_kernel_contracts::audit::{metric_tags, AuditRecord, LogEntry, ParticipantId};
use cipherclinic_kernel_contracts::envelope::{Envelope, EnvelopeState, RawPayload};
use cipherclinic_kernel_contracts::oracle::ProtocolAnalysis;
use cipherclinic_kernel_contracts::{ContractViolation, Validate};
use serde::Serialize;
use tracing::info;

use crate::audit_trail::AuditTrail;
use crate::oracle_wiring::{OracleWiring, OracleWiringConfig, OracleWiringOutcome};

pub const DECRYPT_HISTORY_LABEL: &str = "Decrypted by Patient";
pub const ENCRYPT_ACTION: &str = "Client-Side Encryption";
pub const DECRYPT_ACTION: &str = "Patient Decryption";

#[derive(Debug, Clone, PartialEq)]
pub enum VisitError {
    InvalidPayload(ContractViolation),
    InvalidTransition {
        from: EnvelopeState,
        to: EnvelopeState,
    },
}

impl std::fmt::Display for VisitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPayload(violation) => write!(f, "invalid payload: {violation}"),
            Self::InvalidTransition { from, to } => write!(
                f,
                "invalid envelope transition: {} -> {}",
                from.as_str(),
                to.as_str()
            ),
        }
    }
}

impl std::error::Error for VisitError {}

impl From<ContractViolation> for VisitError {
    fn from(value: ContractViolation) -> Self {
        Self::InvalidPayload(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitPlan {
    pub stages: Vec<ParticipantTransform>,
    pub decrypt_at_end: bool,
}

impl VisitPlan {
    pub fn new(stages: Vec<ParticipantTransform>, decrypt_at_end: bool) -> Self {
        Self {
            stages,
            decrypt_at_end,
        }
    }

    pub fn full_visit() -> Self {
        Self::new(
            vec![
                ParticipantTransform::Diagnosis,
                ParticipantTransform::LabAnalysis,
                ParticipantTransform::Billing,
                ParticipantTransform::HumanReview,
            ],
            true,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisitTranscript {
    pub envelope: Envelope,
    pub records: Vec<AuditRecord>,
    pub log: Vec<LogEntry>,
    pub oracle_reviews: Vec<ProtocolAnalysis>,
}

/// Sequences one patient's chain: encrypt, run each participant in order, then
/// optionally hand the result back to the patient for decryption.
#[derive(Debug)]
pub struct PatientVisitRunner<E>
where
    E: ProtocolOracle,
{
    sources: ProtocolSources,
    factory: EnvelopeFactory,
    participants: ParticipantRuntime,
    oracle: OracleWiring<E>,
}

impl<E> PatientVisitRunner<E>
where
    E: ProtocolOracle,
{
    pub fn new(
        sources: ProtocolSources,
        ciphertext_config: CiphertextConfig,
        oracle_config: OracleWiringConfig,
        oracle_engine: E,
    ) -> Self {
        let codec = CiphertextCodec::new(
            ciphertext_config,
            sources.random.clone(),
            sources.clock.clone(),
        );
        Self {
            factory: EnvelopeFactory::new(codec.clone(), sources.identity.clone()),
            participants: ParticipantRuntime::new(codec),
            oracle: OracleWiring::new(oracle_config, oracle_engine),
            sources,
        }
    }

    pub fn run(&self, raw: RawPayload, plan: &VisitPlan) -> Result<VisitTranscript, VisitError> {
        raw.validate()?;

        let mut trail = AuditTrail::new(
            self.sources.clock.clone(),
            self.sources.identity.clone(),
        );
        let mut records = Vec::with_capacity(plan.stages.len() + 2);
        let mut oracle_reviews = Vec::new();

        let sealed = self.factory.encrypt_value(raw);
        info!(
            envelope_id = %sealed.target.id,
            shape = sealed.target.raw_value.shape_label(),
            "visit started"
        );
        trail.record(ParticipantId::Patient, ENCRYPT_ACTION, &sealed);
        self.consult_oracle(&mut trail, &mut oracle_reviews, ParticipantId::Patient, &sealed);
        let mut envelope = sealed.target.clone();
        records.push(sealed);

        for stage in &plan.stages {
            let out = self.participants.apply(*stage, &envelope);
            info!(
                envelope_id = %out.target.id,
                stage = stage.action(),
                state = out.target.state.as_str(),
                "visit stage complete"
            );
            trail.record(stage.participant(), stage.action(), &out);
            self.consult_oracle(&mut trail, &mut oracle_reviews, stage.participant(), &out);
            envelope = out.target.clone();
            records.push(out);
        }

        if plan.decrypt_at_end {
            let out = decrypt_for_patient(&envelope)?;
            trail.record(ParticipantId::Patient, DECRYPT_ACTION, &out);
            envelope = out.target.clone();
            records.push(out);
        }

        Ok(VisitTranscript {
            envelope,
            records,
            log: trail.into_entries(),
            oracle_reviews,
        })
    }

    fn consult_oracle(
        &self,
        trail: &mut AuditTrail,
        reviews: &mut Vec<ProtocolAnalysis>,
        speaker: ParticipantId,
        record: &AuditRecord,
    ) {
        if let Some(message) = self
            .oracle
            .agent_message(speaker.display_name(), &record.narrative)
        {
            trail.record_note(speaker, "Agent Message", message);
        }
        let outcome = self.oracle.review_step(trail.recent(5));
        if let OracleWiringOutcome::Forwarded(analysis) = outcome {
            trail.record_note(
                ParticipantId::Oracle,
                "Protocol Analysis",
                format!(
                    "{} (security score {}/100)",
                    analysis.analysis, analysis.security_score
                ),
            );
            reviews.push(analysis);
        }
    }
}

/// The patient's local decryption. Lives outside the engines: the core never
/// produces a decrypted envelope itself.
pub fn decrypt_for_patient(envelope: &Envelope) -> Result<AuditRecord, VisitError> {
    let from = envelope.state;
    let holds_ciphertext = matches!(from, EnvelopeState::Encrypted | EnvelopeState::Processed);
    if !holds_ciphertext || !from.can_advance_to(EnvelopeState::Decrypted) {
        return Err(VisitError::InvalidTransition {
            from,
            to: EnvelopeState::Decrypted,
        });
    }
    let shown = describe_payload(&envelope.raw_value);
    let target = envelope.with_state(EnvelopeState::Decrypted, DECRYPT_HISTORY_LABEL);
    Ok(AuditRecord::new(
        target,
        format!("Patient decrypted the final result locally with their secret key: {shown}."),
        "m = ⌊(b − ⟨a, s⟩) / Δ⌉".to_string(),
        vec![
            format!("Recompute ⟨a, s⟩ for ciphertext {}", envelope.encrypted_blob),
            "Subtract from b to expose Δ·m + e".to_string(),
            "Divide by Δ and round away the small error e".to_string(),
            format!("Recovered plaintext: {shown}"),
        ],
        metric_tags(&[("Key Holder", "Patient"), ("Decryptions", "1")]),
    ))
}

fn describe_payload(payload: &RawPayload) -> String {
    match payload {
        RawPayload::Scalar(v) => format_number(*v),
        RawPayload::Vitals(v) => format!(
            "HR {} / BP {}/{} / T {} / SpO₂ {} / severity {}",
            format_number(v.heart_rate),
            format_number(v.systolic),
            format_number(v.diastolic),
            format_number(v.temperature),
            format_number(v.oxygen_sat),
            format_number(v.symptom_severity)
        ),
        RawPayload::Profile(p) => format!("profile with {} fields", p.fields.len()),
    }
}
