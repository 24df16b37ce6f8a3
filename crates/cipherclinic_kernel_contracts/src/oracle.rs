#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::common::validate_required_text;
use crate::{ContractViolation, Validate};

pub const ORACLE_FALLBACK_ANALYSIS: &str =
    "Unable to contact verification oracle. Protocol continuing in trustless mode.";
pub const ORACLE_FALLBACK_SECURITY_SCORE: u8 = 50;
pub const AGENT_FALLBACK_MESSAGE: &str = "Processing encrypted stream...";

pub const SECURITY_SCORE_MAX: u8 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolAnalysis {
    pub analysis: String,
    pub security_score: u8,
}

impl ProtocolAnalysis {
    pub fn v1(analysis: String, security_score: u8) -> Result<Self, ContractViolation> {
        let out = Self {
            analysis,
            security_score,
        };
        out.validate()?;
        Ok(out)
    }

    pub fn fallback() -> Self {
        Self {
            analysis: ORACLE_FALLBACK_ANALYSIS.to_string(),
            security_score: ORACLE_FALLBACK_SECURITY_SCORE,
        }
    }
}

impl Validate for ProtocolAnalysis {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_required_text("protocol_analysis.analysis", &self.analysis, 4_096)?;
        if self.security_score > SECURITY_SCORE_MAX {
            return Err(ContractViolation::InvalidRange {
                field: "protocol_analysis.security_score",
                min: 0.0,
                max: f64::from(SECURITY_SCORE_MAX),
                got: f64::from(self.security_score),
            });
        }
        Ok(())
    }
}
