#![forbid(unsafe_code)]

use std::sync::Arc;

use cipherclinic_kernel_contracts::envelope::RawPayload;
use serde::Serialize;

use crate::sources::{uniform_int, ClockSource, RandomSource};

const SUFFIX_ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const LABEL_HEX_MASK: i64 = 0xFF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CiphertextConfig {
    pub seed_multiplier: f64,
    pub suffix_len: usize,
    pub lwe_scale: f64,
    pub lwe_secret: [u32; 4],
    pub mask_upper_exclusive: u32,
    pub error_min: u32,
    pub error_max: u32,
}

impl CiphertextConfig {
    pub fn mvp_v1() -> Self {
        Self {
            seed_multiplier: 1337.0,
            suffix_len: 4,
            lwe_scale: 100.0,
            lwe_secret: [1, 0, 1, 0],
            mask_upper_exclusive: 1000,
            error_min: 1,
            error_max: 5,
        }
    }
}

/// Worked arithmetic for the toy LWE illustration. Every field is returned so a
/// caller can print the exact computation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToyLweExample {
    pub secret: [u32; 4],
    pub mask: [u32; 4],
    pub error: u32,
    pub dot_product: u64,
    pub scaled_message: f64,
    pub body: f64,
}

#[derive(Clone)]
pub struct CiphertextCodec {
    config: CiphertextConfig,
    random: Arc<dyn RandomSource>,
    clock: Arc<dyn ClockSource>,
}

impl std::fmt::Debug for CiphertextCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CiphertextCodec")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CiphertextCodec {
    pub fn new(
        config: CiphertextConfig,
        random: Arc<dyn RandomSource>,
        clock: Arc<dyn ClockSource>,
    ) -> Self {
        Self {
            config,
            random,
            clock,
        }
    }

    pub fn config(&self) -> &CiphertextConfig {
        &self.config
    }

    pub fn random(&self) -> &dyn RandomSource {
        self.random.as_ref()
    }

    /// Cosmetic `ct_0x<6 hex>...<suffix>` label. Recomputed on every call.
    pub fn render_ciphertext_label(&self, value: &RawPayload) -> String {
        let seed = ciphertext_seed(value);
        let now_ms = self.clock.now_unix_ms() as i64;
        let mixed = ((seed * self.config.seed_multiplier).floor() as i64).wrapping_add(now_ms);
        let hex = mixed & LABEL_HEX_MASK;
        format!("ct_0x{hex:06x}...{}", self.random_suffix())
    }

    pub fn build_toy_lwe_example(&self, message: f64, scale: f64) -> ToyLweExample {
        let secret = self.config.lwe_secret;
        let mut mask = [0u32; 4];
        for slot in mask.iter_mut() {
            *slot = uniform_int(
                self.random.as_ref(),
                0,
                self.config.mask_upper_exclusive.saturating_sub(1),
            );
        }
        let error = uniform_int(
            self.random.as_ref(),
            self.config.error_min,
            self.config.error_max,
        );
        let dot_product: u64 = mask
            .iter()
            .zip(secret.iter())
            .map(|(a, s)| u64::from(*a) * u64::from(*s))
            .sum();
        let scaled_message = message * scale;
        let body = dot_product as f64 + scaled_message + f64::from(error);
        ToyLweExample {
            secret,
            mask,
            error,
            dot_product,
            scaled_message,
            body,
        }
    }

    fn random_suffix(&self) -> String {
        let len = self.config.suffix_len.max(1);
        (0..len)
            .map(|_| {
                let idx = uniform_int(self.random.as_ref(), 0, 35) as usize;
                SUFFIX_ALPHABET[idx] as char
            })
            .collect()
    }
}

pub fn ciphertext_seed(value: &RawPayload) -> f64 {
    match value {
        RawPayload::Scalar(v) => *v,
        RawPayload::Vitals(vitals) => vitals.heart_rate + vitals.systolic + vitals.temperature,
        RawPayload::Profile(profile) => profile.numeric_sum(),
    }
}

/// Integral values print without a trailing `.0`.
pub fn format_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{
        FixedClockSource, ScriptedRandomSource, SystemClockSource, ThreadRngSource,
    };
    use cipherclinic_kernel_contracts::envelope::{ProfileRecord, VitalsRecord};
    use std::collections::BTreeMap;

    fn codec(units: Vec<f64>, now_ms: u64) -> CiphertextCodec {
        CiphertextCodec::new(
            CiphertextConfig::mvp_v1(),
            Arc::new(ScriptedRandomSource::new(units)),
            Arc::new(FixedClockSource(now_ms)),
        )
    }

    fn looks_like_label(label: &str) -> bool {
        let Some(rest) = label.strip_prefix("ct_0x") else {
            return false;
        };
        if rest.len() < 6 || !rest.is_char_boundary(6) {
            return false;
        }
        let (hex, tail) = rest.split_at(6);
        let Some(suffix) = tail.strip_prefix("...") else {
            return false;
        };
        hex.chars().all(|c| c.is_ascii_hexdigit()) && !suffix.is_empty()
    }

    #[test]
    fn at_ct_01_label_matches_pattern_for_every_payload_shape() {
        let live = CiphertextCodec::new(
            CiphertextConfig::mvp_v1(),
            Arc::new(ThreadRngSource),
            Arc::new(SystemClockSource),
        );
        let mut fields = BTreeMap::new();
        fields.insert("age".to_string(), 44.0);
        fields.insert("weight".to_string(), 81.5);
        let payloads = [
            RawPayload::Scalar(40.0),
            RawPayload::Scalar(-12.5),
            RawPayload::Vitals(VitalsRecord::v1(72.0, 118.0, 76.0, 36.8, 98.0, 5.0).unwrap()),
            RawPayload::Profile(ProfileRecord::new(fields).unwrap()),
        ];
        for payload in &payloads {
            for _ in 0..20 {
                let label = live.render_ciphertext_label(payload);
                assert!(looks_like_label(&label), "bad label {label}");
            }
        }
    }

    #[test]
    fn at_ct_02_label_mixes_seed_and_clock_into_low_24_bits() {
        // 40 * 1337 + 1000 = 54480 = 0x00d4d0
        let c = codec(vec![0.0], 1_000);
        let label = c.render_ciphertext_label(&RawPayload::Scalar(40.0));
        assert_eq!(label, "ct_0x00d4d0...0000");
    }

    #[test]
    fn at_ct_03_vitals_seed_uses_heart_rate_systolic_and_temperature() {
        let vitals = VitalsRecord::v1(110.0, 150.0, 95.0, 38.0, 90.0, 40.0).unwrap();
        assert_eq!(ciphertext_seed(&RawPayload::Vitals(vitals)), 298.0);
    }

    #[test]
    fn at_ct_04_label_changes_with_value() {
        let c = codec(vec![0.5], 42);
        let a = c.render_ciphertext_label(&RawPayload::Scalar(1.0));
        let b = c.render_ciphertext_label(&RawPayload::Scalar(2.0));
        assert_ne!(a, b);
    }

    #[test]
    fn at_ct_05_toy_lwe_body_is_exact_sum_of_components() {
        let live = CiphertextCodec::new(
            CiphertextConfig::mvp_v1(),
            Arc::new(ThreadRngSource),
            Arc::new(SystemClockSource),
        );
        for message in [0.0, 1.0, 40.0, 99.0, 12.5] {
            let ex = live.build_toy_lwe_example(message, 100.0);
            assert_eq!(ex.secret, [1, 0, 1, 0]);
            assert!(ex.mask.iter().all(|m| *m < 1000));
            assert!((1..=5).contains(&ex.error));
            assert_eq!(u64::from(ex.mask[0]) + u64::from(ex.mask[2]), ex.dot_product);
            assert_eq!(ex.scaled_message, message * 100.0);
            assert_eq!(
                ex.body,
                ex.dot_product as f64 + message * 100.0 + f64::from(ex.error)
            );
        }
    }

    #[test]
    fn at_ct_06_toy_lwe_uses_scripted_draws_in_order() {
        // mask draws: 0.1 -> 100, 0.2 -> 200, 0.3 -> 300, 0.4 -> 400; error: 0.5 -> 3
        let c = codec(vec![0.1, 0.2, 0.3, 0.4, 0.5], 1);
        let ex = c.build_toy_lwe_example(40.0, 100.0);
        assert_eq!(ex.mask, [100, 200, 300, 400]);
        assert_eq!(ex.error, 3);
        assert_eq!(ex.dot_product, 400);
        assert_eq!(ex.body, 4403.0);
    }

    #[test]
    fn at_ct_07_format_number_drops_integral_fraction() {
        assert_eq!(format_number(60.0), "60");
        assert_eq!(format_number(36.8), "36.8");
        assert_eq!(format_number(-3.0), "-3");
    }
}
