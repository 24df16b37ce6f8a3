#![forbid(unsafe_code)]

use std::sync::Arc;

use cipherclinic_kernel_contracts::audit::{metric_tags, AuditRecord};
use cipherclinic_kernel_contracts::envelope::{Envelope, EnvelopeId, RawPayload};
use tracing::debug;

use crate::ciphertext::{format_number, CiphertextCodec, ToyLweExample};
use crate::sources::IdentitySource;

const STRUCTURED_FORMULA: &str = "ct = (pk0·u + e1 + Δ·m, pk1·u + e2) mod q";
const SCALAR_FORMULA: &str = "b = ⟨a, s⟩ + Δ·m + e (mod q)";

const STRUCTURED_STEPS: [&str; 5] = [
    "Pack record fields into a batched plaintext vector (one slot per field)",
    "Encode the vector as a polynomial m(X) in R_q = Z_q[X]/(X^n + 1)",
    "Sample ephemeral key u and noise e1, e2 from a discrete Gaussian (σ = 3.2)",
    "Compute c0 = pk0·u + e1 + Δ·m and c1 = pk1·u + e2",
    "Emit ciphertext pair (c0, c1) under the patient's public key",
];

pub struct EnvelopeFactory {
    codec: CiphertextCodec,
    identity: Arc<dyn IdentitySource>,
}

impl std::fmt::Debug for EnvelopeFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeFactory")
            .field("codec", &self.codec)
            .finish_non_exhaustive()
    }
}

impl EnvelopeFactory {
    pub fn new(codec: CiphertextCodec, identity: Arc<dyn IdentitySource>) -> Self {
        Self { codec, identity }
    }

    /// Client-side "encryption": seals the payload into a fresh envelope.
    pub fn encrypt_value(&self, raw: RawPayload) -> AuditRecord {
        let blob = self.codec.render_ciphertext_label(&raw);
        let id = self.fresh_id();

        let (narrative, formula, steps, metrics) = match &raw {
            RawPayload::Scalar(message) => {
                let example = self
                    .codec
                    .build_toy_lwe_example(*message, self.codec.config().lwe_scale);
                (
                    format!(
                        "Patient encrypted the value {} with a toy LWE construction before sharing it.",
                        format_number(*message)
                    ),
                    SCALAR_FORMULA.to_string(),
                    scalar_steps(*message, self.codec.config().lwe_scale, &example, &blob),
                    metric_tags(&[
                        ("Security Level", "Toy (illustrative only)"),
                        ("Dimension", "n = 4"),
                        ("Noise Variance", "e ∈ [1, 5]"),
                    ]),
                )
            }
            RawPayload::Vitals(_) | RawPayload::Profile(_) => (
                format!(
                    "Patient packed the {} record into a vector and encrypted it client-side before sharing it.",
                    raw.shape_label()
                ),
                STRUCTURED_FORMULA.to_string(),
                STRUCTURED_STEPS.iter().map(|s| (*s).to_string()).collect(),
                metric_tags(&[
                    ("Security Level", "128-bit"),
                    ("Dimension", "n = 8192"),
                    ("Noise Variance", "σ² = 10.24"),
                ]),
            ),
        };

        let target = Envelope::sealed(id, raw, blob);
        debug!(
            envelope_id = %target.id,
            shape = target.raw_value.shape_label(),
            "envelope sealed"
        );
        AuditRecord::new(target, narrative, formula, steps, metrics)
    }

    fn fresh_id(&self) -> EnvelopeId {
        // A broken identity source is fatal to the operation. Ids must be
        // non-empty and at most 128 chars (`EnvelopeId::new`).
        EnvelopeId::new(self.identity.next_id())
            .expect("identity source must yield a valid envelope id")
    }
}

fn scalar_steps(message: f64, scale: f64, ex: &ToyLweExample, blob: &str) -> Vec<String> {
    let s = ex.secret;
    let a = ex.mask;
    vec![
        format!("Secret key s = [{}, {}, {}, {}]", s[0], s[1], s[2], s[3]),
        format!(
            "Scale message: Δ·m = {} × {} = {}",
            format_number(scale),
            format_number(message),
            format_number(ex.scaled_message)
        ),
        format!(
            "Sample public mask a = [{}, {}, {}, {}]",
            a[0], a[1], a[2], a[3]
        ),
        format!(
            "Inner product ⟨a, s⟩ = {}·{} + {}·{} + {}·{} + {}·{} = {}",
            a[0], s[0], a[1], s[1], a[2], s[2], a[3], s[3], ex.dot_product
        ),
        format!("Sample small error e = {}", ex.error),
        format!(
            "Body b = ⟨a, s⟩ + Δ·m + e = {} + {} + {} = {}",
            ex.dot_product,
            format_number(ex.scaled_message),
            ex.error,
            format_number(ex.body)
        ),
        format!(
            "Ciphertext (a, b) = ([{}, {}, {}, {}], {}) → {}",
            a[0],
            a[1],
            a[2],
            a[3],
            format_number(ex.body),
            blob
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ciphertext::CiphertextConfig;
    use crate::sources::{FixedClockSource, ScriptedRandomSource, SequentialIdentitySource};
    use cipherclinic_kernel_contracts::envelope::{
        EnvelopeState, VitalsRecord, INITIAL_HISTORY_LABEL,
    };
    use cipherclinic_kernel_contracts::Validate;

    fn factory(units: Vec<f64>) -> EnvelopeFactory {
        let codec = CiphertextCodec::new(
            CiphertextConfig::mvp_v1(),
            Arc::new(ScriptedRandomSource::new(units)),
            Arc::new(FixedClockSource(1_000)),
        );
        EnvelopeFactory::new(codec, Arc::new(SequentialIdentitySource::new("env")))
    }

    #[test]
    fn at_factory_01_scalar_steps_carry_live_arithmetic() {
        let f = factory(vec![0.1, 0.2, 0.3, 0.4, 0.1, 0.2, 0.3, 0.4, 0.5]);
        let out = f.encrypt_value(RawPayload::Scalar(40.0));

        assert_eq!(out.target.encrypted_blob, "ct_0x00d4d0...37ae");
        assert_eq!(out.steps.len(), 7);
        assert_eq!(out.steps[0], "Secret key s = [1, 0, 1, 0]");
        assert_eq!(out.steps[1], "Scale message: Δ·m = 100 × 40 = 4000");
        assert_eq!(out.steps[2], "Sample public mask a = [100, 200, 300, 400]");
        assert_eq!(
            out.steps[3],
            "Inner product ⟨a, s⟩ = 100·1 + 200·0 + 300·1 + 400·0 = 400"
        );
        assert_eq!(out.steps[4], "Sample small error e = 3");
        assert_eq!(
            out.steps[5],
            "Body b = ⟨a, s⟩ + Δ·m + e = 400 + 4000 + 3 = 4403"
        );
        assert!(out.steps[6].ends_with("ct_0x00d4d0...37ae"));
        assert!(out.validate().is_ok());
    }

    #[test]
    fn at_factory_02_envelope_is_encrypted_with_seed_history() {
        let f = factory(vec![0.25]);
        let out = f.encrypt_value(RawPayload::Scalar(7.0));
        assert_eq!(out.target.state, EnvelopeState::Encrypted);
        assert_eq!(out.target.id.as_str(), "env-1");
        assert_eq!(
            out.target.history.labels(),
            &[INITIAL_HISTORY_LABEL.to_string()]
        );
    }

    #[test]
    fn at_factory_03_structured_payload_gets_fixed_five_step_narrative() {
        let f = factory(vec![0.7]);
        let vitals = VitalsRecord::v1(110.0, 150.0, 95.0, 38.0, 90.0, 40.0).unwrap();
        let a = f.encrypt_value(RawPayload::Vitals(vitals));
        let b = f.encrypt_value(RawPayload::Vitals(
            VitalsRecord::v1(60.0, 110.0, 70.0, 36.6, 99.0, 0.0).unwrap(),
        ));
        assert_eq!(a.steps.len(), 5);
        assert_eq!(a.steps, b.steps);
        assert_eq!(a.formula, STRUCTURED_FORMULA);
        assert_eq!(a.target.raw_value, RawPayload::Vitals(vitals));
        assert_ne!(a.target.id, b.target.id);
    }

    #[test]
    fn at_factory_04_metrics_depend_on_shape_not_value() {
        let f = factory(vec![0.3, 0.9, 0.6]);
        let small = f.encrypt_value(RawPayload::Scalar(1.0));
        let large = f.encrypt_value(RawPayload::Scalar(99.0));
        assert_eq!(small.metrics, large.metrics);
        let vitals = f.encrypt_value(RawPayload::Vitals(
            VitalsRecord::v1(72.0, 120.0, 80.0, 36.8, 98.0, 5.0).unwrap(),
        ));
        assert_ne!(small.metrics, vitals.metrics);
        for key in ["Security Level", "Dimension", "Noise Variance"] {
            assert!(small.metrics.contains_key(key));
            assert!(vitals.metrics.contains_key(key));
        }
    }

    struct OversizedIdentity;

    impl IdentitySource for OversizedIdentity {
        fn next_id(&self) -> String {
            "x".repeat(129)
        }
    }

    #[test]
    #[should_panic(expected = "identity source must yield a valid envelope id")]
    fn at_factory_05_ids_past_128_chars_are_fatal() {
        let codec = CiphertextCodec::new(
            CiphertextConfig::mvp_v1(),
            Arc::new(ScriptedRandomSource::new(vec![0.5])),
            Arc::new(FixedClockSource(1_000)),
        );
        let factory = EnvelopeFactory::new(codec, Arc::new(OversizedIdentity));
        let _ = factory.encrypt_value(RawPayload::Scalar(1.0));
    }
}
