#![forbid(unsafe_code)]

use cipherclinic_kernel_contracts::audit::{metric_tags, AuditRecord, MetricTags, ParticipantId};
use cipherclinic_kernel_contracts::envelope::{Envelope, EnvelopeState, RawPayload, VitalsRecord};
use tracing::debug;

use crate::ciphertext::{format_number, CiphertextCodec};
use crate::sources::uniform_int;

pub const DIAGNOSIS_HISTORY_LABEL: &str = "Specialist Diagnosis (NN)";
pub const LAB_HISTORY_LABEL: &str = "Lab Analysis (Stats)";
pub const BILLING_HISTORY_LABEL: &str = "Billing Generated";
pub const REVIEW_HISTORY_LABEL: &str = "Human Doctor Approved";

pub const DIAGNOSIS_CAP: f64 = 99.0;
pub const LAB_CAP: f64 = 100.0;
pub const BILLING_FLAT_FEE: f64 = 50.0;
pub const BILLING_BASE_FEE: u32 = 150;
pub const BILLING_COMPLEXITY_MAX: u32 = 49;

/// One named stage of the clinical workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParticipantTransform {
    Diagnosis,
    LabAnalysis,
    Billing,
    HumanReview,
}

impl ParticipantTransform {
    pub const fn participant(self) -> ParticipantId {
        match self {
            Self::Diagnosis => ParticipantId::SpecialistAi,
            Self::LabAnalysis => ParticipantId::LabAi,
            Self::Billing => ParticipantId::BillingAi,
            Self::HumanReview => ParticipantId::HumanDoctor,
        }
    }

    pub const fn action(self) -> &'static str {
        match self {
            Self::Diagnosis => "Homomorphic Diagnosis",
            Self::LabAnalysis => "Homomorphic Lab Analysis",
            Self::Billing => "Homomorphic Billing",
            Self::HumanReview => "Human Review",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "diagnosis" => Some(Self::Diagnosis),
            "lab" | "lab_analysis" => Some(Self::LabAnalysis),
            "billing" => Some(Self::Billing),
            "review" | "human_review" => Some(Self::HumanReview),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParticipantRuntime {
    codec: CiphertextCodec,
}

impl ParticipantRuntime {
    pub fn new(codec: CiphertextCodec) -> Self {
        Self { codec }
    }

    pub fn apply(&self, transform: ParticipantTransform, envelope: &Envelope) -> AuditRecord {
        match transform {
            ParticipantTransform::Diagnosis => self.homomorphic_diagnosis(envelope),
            ParticipantTransform::LabAnalysis => self.homomorphic_lab_analysis(envelope),
            ParticipantTransform::Billing => self.homomorphic_billing(envelope),
            ParticipantTransform::HumanReview => self.human_doctor_review(envelope),
        }
    }

    pub fn homomorphic_diagnosis(&self, envelope: &Envelope) -> AuditRecord {
        match &envelope.raw_value {
            RawPayload::Vitals(vitals) => {
                let score = capped_floor(diagnosis_risk_score(vitals), DIAGNOSIS_CAP);
                let shown = format_number(score);
                self.processed(
                    envelope,
                    RawPayload::Scalar(score),
                    DIAGNOSIS_HISTORY_LABEL,
                    format!(
                        "Specialist AI scored the encrypted vitals without decrypting them. Encrypted risk score: {shown}/99."
                    ),
                    "score = min(99, ⌊20·[HR>100 ∨ HR<50] + 20·[SYS>140] + 25·[T>37.5] + 30·[SpO₂<95] + 0.3·severity⌋)",
                    vec![
                        "Load encrypted feature vector Enc(x) with 6 slots".to_string(),
                        "Evaluate threshold indicators with a polynomial sign approximation".to_string(),
                        "Multiply by plaintext weights w = [20, 20, 25, 30, 0.3]".to_string(),
                        "Sum slots with rotate-and-add: Σ wᵢ·xᵢ".to_string(),
                        format!("Apply min(99, ·) approximation → Enc({shown})"),
                    ],
                    metric_tags(&[
                        ("Technique", "CKKS polynomial approximation"),
                        ("Multiplicative Depth", "4"),
                        ("Noise Budget Left", "41 bits"),
                    ]),
                )
            }
            RawPayload::Scalar(value) => {
                let score = capped_floor(value * 1.5, DIAGNOSIS_CAP);
                let shown = format_number(score);
                self.processed(
                    envelope,
                    RawPayload::Scalar(score),
                    DIAGNOSIS_HISTORY_LABEL,
                    format!(
                        "Specialist AI amplified the encrypted score by a plaintext weight. Encrypted risk score: {shown}/99."
                    ),
                    "score = min(99, ⌊1.5·x⌋)",
                    scalar_weight_steps("1.5", &shown),
                    scalar_weight_metrics(),
                )
            }
            RawPayload::Profile(_) => {
                self.passthrough(envelope, DIAGNOSIS_HISTORY_LABEL, "Specialist AI")
            }
        }
    }

    pub fn homomorphic_lab_analysis(&self, envelope: &Envelope) -> AuditRecord {
        match &envelope.raw_value {
            RawPayload::Vitals(vitals) => {
                let result = capped_floor(lab_deviation_squared(vitals).sqrt(), LAB_CAP);
                let shown = format_number(result);
                self.processed(
                    envelope,
                    RawPayload::Scalar(result),
                    LAB_HISTORY_LABEL,
                    format!(
                        "Lab AI measured the encrypted distance from healthy reference vitals. Deviation index: {shown}/100."
                    ),
                    "d = (HR−70)² + (SYS−120)² + 5·(SpO₂−98)²;  result = min(100, ⌊√d⌋)",
                    vec![
                        "Subtract reference vector [70, 120, 98] homomorphically".to_string(),
                        "Square each difference (ciphertext × ciphertext, then relinearize)".to_string(),
                        "Weight the oxygen term by 5 and sum slots".to_string(),
                        "Approximate √d with three Newton iterations".to_string(),
                        format!("Clamp with min(100, ·) → Enc({shown})"),
                    ],
                    metric_tags(&[
                        ("Technique", "Encrypted Euclidean distance"),
                        ("Multiplicative Depth", "5"),
                        ("Relinearizations", "3"),
                    ]),
                )
            }
            RawPayload::Scalar(value) => {
                let result = capped_floor(value * 1.2, LAB_CAP);
                let shown = format_number(result);
                self.processed(
                    envelope,
                    RawPayload::Scalar(result),
                    LAB_HISTORY_LABEL,
                    format!(
                        "Lab AI normalised the encrypted score against the lab scale. Deviation index: {shown}/100."
                    ),
                    "result = min(100, ⌊1.2·x⌋)",
                    scalar_weight_steps("1.2", &shown),
                    scalar_weight_metrics(),
                )
            }
            RawPayload::Profile(_) => self.passthrough(envelope, LAB_HISTORY_LABEL, "Lab AI"),
        }
    }

    pub fn homomorphic_billing(&self, envelope: &Envelope) -> AuditRecord {
        let (amount, formula, metrics) = match &envelope.raw_value {
            RawPayload::Vitals(_) | RawPayload::Profile(_) => {
                let complexity = uniform_int(self.codec.random(), 0, BILLING_COMPLEXITY_MAX);
                (
                    f64::from(BILLING_BASE_FEE + complexity),
                    "bill = 150 + complexity_fee,  complexity_fee ∈ [0, 49]",
                    metric_tags(&[
                        ("Technique", "Encrypted tariff lookup"),
                        ("Currency", "USD"),
                        ("Tariff Rows", "50"),
                    ]),
                )
            }
            RawPayload::Scalar(_) => (
                BILLING_FLAT_FEE,
                "bill = 50 (flat consultation fee)",
                metric_tags(&[
                    ("Technique", "Constant encryption"),
                    ("Currency", "USD"),
                    ("Tariff Rows", "1"),
                ]),
            ),
        };
        let shown = format_number(amount);
        self.processed(
            envelope,
            RawPayload::Scalar(amount),
            BILLING_HISTORY_LABEL,
            format!("Billing AI priced the visit without seeing the diagnosis. Total: ${shown}."),
            formula,
            vec![
                "Match encrypted procedure codes against the tariff table".to_string(),
                "Select the fee row with an oblivious lookup".to_string(),
                "Add the base consultation fee under encryption".to_string(),
                format!("Total charge: ${shown}.00"),
            ],
            metrics,
        )
    }

    pub fn human_doctor_review(&self, envelope: &Envelope) -> AuditRecord {
        let target = envelope.annotated(REVIEW_HISTORY_LABEL);
        debug!(
            envelope_id = %target.id,
            history_len = target.history.len(),
            "human review appended"
        );
        AuditRecord::new(
            target,
            "Human doctor reviewed the audit trail and approved the encrypted result without altering it."
                .to_string(),
            "approve(ct) = ct".to_string(),
            vec![
                format!("Inspect {} prior audit events", envelope.history.len()),
                "Confirm every automated stage operated on ciphertext only".to_string(),
                "Sign off on the encrypted result".to_string(),
            ],
            metric_tags(&[("Review", "Manual"), ("Ciphertext Modified", "No")]),
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn processed(
        &self,
        envelope: &Envelope,
        raw_value: RawPayload,
        label: &str,
        narrative: String,
        formula: &str,
        steps: Vec<String>,
        metrics: MetricTags,
    ) -> AuditRecord {
        let blob = self.codec.render_ciphertext_label(&raw_value);
        let target = envelope.advanced(raw_value, blob, EnvelopeState::Processed, label);
        debug!(
            envelope_id = %target.id,
            stage = label,
            history_len = target.history.len(),
            "participant transform applied"
        );
        AuditRecord::new(target, narrative, formula.to_string(), steps, metrics)
    }

    fn passthrough(&self, envelope: &Envelope, label: &str, who: &str) -> AuditRecord {
        self.processed(
            envelope,
            envelope.raw_value.clone(),
            label,
            format!(
                "{who} has no scoring rule for profile records; the payload was forwarded unchanged."
            ),
            "out = in",
            vec!["Forward ciphertext without evaluation".to_string()],
            metric_tags(&[("Technique", "Identity"), ("Multiplicative Depth", "0")]),
        )
    }
}

pub fn diagnosis_risk_score(v: &VitalsRecord) -> f64 {
    let mut score = 0.0;
    if v.heart_rate > 100.0 || v.heart_rate < 50.0 {
        score += 20.0;
    }
    if v.systolic > 140.0 {
        score += 20.0;
    }
    if v.temperature > 37.5 {
        score += 25.0;
    }
    if v.oxygen_sat < 95.0 {
        score += 30.0;
    }
    score + 0.3 * v.symptom_severity
}

pub fn lab_deviation_squared(v: &VitalsRecord) -> f64 {
    (v.heart_rate - 70.0).powi(2)
        + (v.systolic - 120.0).powi(2)
        + 5.0 * (v.oxygen_sat - 98.0).powi(2)
}

/// `min(cap, floor(raw))`, also floored at zero. Never yields `-0.0`.
pub fn capped_floor(raw: f64, cap: f64) -> f64 {
    raw.floor().min(cap).max(0.0) + 0.0
}

fn scalar_weight_steps(weight: &str, shown: &str) -> Vec<String> {
    vec![
        "Load encrypted score Enc(x)".to_string(),
        format!("Multiply by plaintext constant {weight} (ciphertext × plaintext)"),
        "Rescale to drop the extra scaling factor".to_string(),
        format!("Floor and clamp → Enc({shown})"),
    ]
}

fn scalar_weight_metrics() -> MetricTags {
    metric_tags(&[
        ("Technique", "Plaintext-ciphertext multiply"),
        ("Multiplicative Depth", "1"),
        ("Noise Budget Left", "58 bits"),
    ])
}
