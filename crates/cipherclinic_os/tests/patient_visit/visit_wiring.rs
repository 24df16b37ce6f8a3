#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicUsize, Ordering};

use cipherclinic_engines::ciphertext::CiphertextConfig;
use cipherclinic_engines::oracle::{
    GeminiOracle, OfflineOracle, OracleConfig, OracleProviderConfig, ProtocolOracle,
};
use cipherclinic_engines::participants::{
    ParticipantTransform, BILLING_HISTORY_LABEL, DIAGNOSIS_HISTORY_LABEL, LAB_HISTORY_LABEL,
    REVIEW_HISTORY_LABEL,
};
use cipherclinic_engines::sources::ProtocolSources;
use cipherclinic_kernel_contracts::audit::{LogEntry, ParticipantId};
use cipherclinic_kernel_contracts::envelope::{
    EnvelopeState, RawPayload, VitalsRecord, INITIAL_HISTORY_LABEL,
};
use cipherclinic_kernel_contracts::oracle::{ProtocolAnalysis, AGENT_FALLBACK_MESSAGE};
use cipherclinic_os::audit_trail::verify_entries;
use cipherclinic_os::oracle_wiring::OracleWiringConfig;
use cipherclinic_os::patient_visit::{
    PatientVisitRunner, VisitPlan, DECRYPT_HISTORY_LABEL, ENCRYPT_ACTION,
};

fn vitals() -> RawPayload {
    RawPayload::Vitals(VitalsRecord::v1(110.0, 150.0, 95.0, 38.0, 90.0, 40.0).unwrap())
}

fn runner<E: ProtocolOracle>(oracle_enabled: bool, engine: E) -> PatientVisitRunner<E> {
    PatientVisitRunner::new(
        ProtocolSources::system(),
        CiphertextConfig::mvp_v1(),
        OracleWiringConfig::mvp_v1(oracle_enabled),
        engine,
    )
}

#[derive(Debug, Default)]
struct CountingOracle {
    analyses: AtomicUsize,
    messages: AtomicUsize,
}

impl ProtocolOracle for CountingOracle {
    fn analyze_protocol_step(&self, recent_logs: &[LogEntry]) -> ProtocolAnalysis {
        self.analyses.fetch_add(1, Ordering::Relaxed);
        assert!(recent_logs.len() <= 5);
        ProtocolAnalysis {
            analysis: format!("looked at {} events", recent_logs.len()),
            security_score: 97,
        }
    }

    fn generate_agent_message(&self, role: &str, _context: &str) -> String {
        self.messages.fetch_add(1, Ordering::Relaxed);
        format!("{role} reporting in")
    }
}

#[test]
fn at_visit_db_01_full_vitals_visit_threads_every_stage() {
    let out = runner(false, OfflineOracle)
        .run(vitals(), &VisitPlan::full_visit())
        .unwrap();

    let labels: Vec<&str> = out
        .envelope
        .history
        .labels()
        .iter()
        .map(String::as_str)
        .collect();
    assert_eq!(
        labels,
        vec![
            INITIAL_HISTORY_LABEL,
            DIAGNOSIS_HISTORY_LABEL,
            LAB_HISTORY_LABEL,
            BILLING_HISTORY_LABEL,
            REVIEW_HISTORY_LABEL,
            DECRYPT_HISTORY_LABEL,
        ]
    );
    // diagnosis 99 -> lab floor(118.8) capped at 100 -> billing flat 50
    assert_eq!(out.records[1].target.raw_value, RawPayload::Scalar(99.0));
    assert_eq!(out.records[2].target.raw_value, RawPayload::Scalar(100.0));
    assert_eq!(out.records[3].target.raw_value, RawPayload::Scalar(50.0));
    assert_eq!(out.envelope.state, EnvelopeState::Decrypted);
    assert_eq!(out.log[0].action, ENCRYPT_ACTION);
    assert_eq!(out.log[0].source, ParticipantId::Patient);
    assert!(verify_entries(&out.log).is_ok());
}

#[test]
fn at_visit_db_02_history_is_n_plus_one_for_any_plan() {
    let rt = runner(false, OfflineOracle);
    let plans = [
        vec![],
        vec![ParticipantTransform::Billing],
        vec![
            ParticipantTransform::HumanReview,
            ParticipantTransform::HumanReview,
            ParticipantTransform::LabAnalysis,
        ],
    ];
    for stages in plans {
        let n = stages.len();
        let out = rt
            .run(RawPayload::Scalar(12.0), &VisitPlan::new(stages, false))
            .unwrap();
        assert_eq!(out.envelope.history.len(), n + 1);
        for (i, record) in out.records.iter().enumerate() {
            assert_eq!(record.target.history.len(), i + 1);
        }
    }
}

#[test]
fn at_visit_db_03_structured_billing_direct_is_in_range() {
    let rt = runner(false, OfflineOracle);
    for _ in 0..50 {
        let out = rt
            .run(
                vitals(),
                &VisitPlan::new(vec![ParticipantTransform::Billing], false),
            )
            .unwrap();
        let amount = out.envelope.raw_value.as_scalar().unwrap();
        assert!((150.0..=199.0).contains(&amount));
        assert_eq!(out.envelope.state, EnvelopeState::Processed);
    }
}

#[test]
fn at_visit_db_04_oracle_is_consulted_after_every_stage() {
    let engine = CountingOracle::default();
    let rt = runner(true, engine);
    let out = rt.run(RawPayload::Scalar(40.0), &VisitPlan::full_visit()).unwrap();

    // encrypt + four participant stages; decryption is not reviewed
    assert_eq!(out.oracle_reviews.len(), 5);
    assert!(out.oracle_reviews.iter().all(|r| r.security_score == 97));
    let notes = out
        .log
        .iter()
        .filter(|e| e.source == ParticipantId::Oracle)
        .count();
    assert_eq!(notes, 5);
    assert!(out
        .log
        .iter()
        .any(|e| e.action == "Agent Message" && e.details == "Specialist AI reporting in"));
    assert!(verify_entries(&out.log).is_ok());
}

#[test]
fn at_visit_db_05_unreachable_oracle_never_blocks_the_chain() {
    let unreachable = GeminiOracle::new_with_provider_config(
        OracleConfig::mvp_v1(),
        OracleProviderConfig {
            api_key: None,
            endpoint_base_url: "https://oracle.invalid/v1beta".to_string(),
            model: "none".to_string(),
            user_agent: "cipherclinic-test/1.0".to_string(),
            analysis_fixture_json: None,
            message_fixture_json: None,
        },
    );
    let out = runner(true, unreachable)
        .run(RawPayload::Scalar(40.0), &VisitPlan::full_visit())
        .unwrap();
    assert_eq!(out.envelope.state, EnvelopeState::Decrypted);
    assert!(out
        .oracle_reviews
        .iter()
        .all(|r| *r == ProtocolAnalysis::fallback()));
    assert!(out
        .log
        .iter()
        .any(|e| e.action == "Agent Message" && e.details == AGENT_FALLBACK_MESSAGE));
}

#[test]
fn at_visit_db_06_transcript_serializes_to_json() {
    let out = runner(false, OfflineOracle)
        .run(RawPayload::Scalar(40.0), &VisitPlan::full_visit())
        .unwrap();
    let json = serde_json::to_value(&out).unwrap();
    assert_eq!(json["envelope"]["state"], "DECRYPTED");
    assert_eq!(json["log"].as_array().map(Vec::len), Some(6));
    assert!(json["log"][1]["integrity_hash"].is_string());
}
