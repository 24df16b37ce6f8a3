#![forbid(unsafe_code)]

use cipherclinic_engines::oracle::ProtocolOracle;
use cipherclinic_kernel_contracts::audit::LogEntry;
use cipherclinic_kernel_contracts::oracle::{
    ProtocolAnalysis, AGENT_FALLBACK_MESSAGE, SECURITY_SCORE_MAX,
};
use cipherclinic_kernel_contracts::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OracleWiringConfig {
    pub oracle_enabled: bool,
    pub agent_messages_enabled: bool,
}

impl OracleWiringConfig {
    pub fn mvp_v1(oracle_enabled: bool) -> Self {
        Self {
            oracle_enabled,
            agent_messages_enabled: oracle_enabled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OracleWiringOutcome {
    NotInvokedDisabled,
    Forwarded(ProtocolAnalysis),
}

/// Keeps the commentary collaborator at arm's length: whatever it returns is
/// normalized into a valid payload and nothing it does reaches the envelope chain.
#[derive(Debug, Clone)]
pub struct OracleWiring<E>
where
    E: ProtocolOracle,
{
    config: OracleWiringConfig,
    engine: E,
}

impl<E> OracleWiring<E>
where
    E: ProtocolOracle,
{
    pub fn new(config: OracleWiringConfig, engine: E) -> Self {
        Self { config, engine }
    }

    pub fn config(&self) -> OracleWiringConfig {
        self.config
    }

    pub fn review_step(&self, recent_logs: &[LogEntry]) -> OracleWiringOutcome {
        if !self.config.oracle_enabled {
            return OracleWiringOutcome::NotInvokedDisabled;
        }
        let out = self.engine.analyze_protocol_step(recent_logs);
        OracleWiringOutcome::Forwarded(normalize_analysis(out))
    }

    pub fn agent_message(&self, role: &str, context: &str) -> Option<String> {
        if !self.config.agent_messages_enabled {
            return None;
        }
        let message = self.engine.generate_agent_message(role, context);
        if message.trim().is_empty() {
            return Some(AGENT_FALLBACK_MESSAGE.to_string());
        }
        Some(message)
    }
}

fn normalize_analysis(out: ProtocolAnalysis) -> ProtocolAnalysis {
    if out.validate().is_ok() {
        return out;
    }
    if out.analysis.trim().is_empty() {
        return ProtocolAnalysis::fallback();
    }
    ProtocolAnalysis {
        analysis: out.analysis,
        security_score: out.security_score.min(SECURITY_SCORE_MAX),
    }
}
