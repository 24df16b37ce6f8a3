#![forbid(unsafe_code)]

use std::env;
use std::time::Duration;

use cipherclinic_kernel_contracts::audit::LogEntry;
use cipherclinic_kernel_contracts::oracle::{
    ProtocolAnalysis, AGENT_FALLBACK_MESSAGE, SECURITY_SCORE_MAX,
};
use cipherclinic_kernel_contracts::provider_secrets::ProviderSecretId;
use serde_json::Value;
use tracing::{debug, warn};

/// Optional commentary collaborator. Implementations never fail: every error path
/// resolves to a fixed fallback payload.
pub trait ProtocolOracle {
    fn analyze_protocol_step(&self, recent_logs: &[LogEntry]) -> ProtocolAnalysis;
    fn generate_agent_message(&self, role: &str, context: &str) -> String;
}

/// Oracle that is never reachable; always answers with the fallbacks.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineOracle;

impl ProtocolOracle for OfflineOracle {
    fn analyze_protocol_step(&self, _recent_logs: &[LogEntry]) -> ProtocolAnalysis {
        ProtocolAnalysis::fallback()
    }

    fn generate_agent_message(&self, _role: &str, _context: &str) -> String {
        AGENT_FALLBACK_MESSAGE.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ProviderCallError {
    provider: &'static str,
    http_status: Option<u16>,
    error_kind: &'static str,
}

impl ProviderCallError {
    fn new(provider: &'static str, error_kind: &'static str, http_status: Option<u16>) -> Self {
        Self {
            provider,
            http_status,
            error_kind,
        }
    }

    fn safe_detail(&self) -> String {
        match self.http_status {
            Some(status) => format!(
                "provider={} error={} status={}",
                self.provider, self.error_kind, status
            ),
            None => format!("provider={} error={}", self.provider, self.error_kind),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OracleConfig {
    pub max_timeout_ms: u32,
    pub max_recent_logs: usize,
    pub max_output_tokens: u32,
    pub max_message_chars: usize,
}

impl OracleConfig {
    pub fn mvp_v1() -> Self {
        Self {
            max_timeout_ms: 8_000,
            max_recent_logs: 5,
            max_output_tokens: 256,
            max_message_chars: 280,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleProviderConfig {
    pub api_key: Option<String>,
    pub endpoint_base_url: String,
    pub model: String,
    pub user_agent: String,
    pub analysis_fixture_json: Option<String>,
    pub message_fixture_json: Option<String>,
}

impl OracleProviderConfig {
    pub fn from_env() -> Self {
        Self {
            api_key: resolve_secret_from_env(ProviderSecretId::GoogleApiKey),
            endpoint_base_url: env::var("CIPHERCLINIC_ORACLE_URL").unwrap_or_else(|_| {
                "https://generativelanguage.googleapis.com/v1beta".to_string()
            }),
            model: env::var("CIPHERCLINIC_ORACLE_MODEL")
                .unwrap_or_else(|_| "gemini-2.5-flash".to_string()),
            user_agent: env::var("CIPHERCLINIC_USER_AGENT")
                .unwrap_or_else(|_| "cipherclinic-oracle/1.0".to_string()),
            analysis_fixture_json: None,
            message_fixture_json: None,
        }
    }

    fn generate_url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.endpoint_base_url.trim_end_matches('/'),
            self.model
        )
    }
}

#[derive(Debug, Clone)]
pub struct GeminiOracle {
    config: OracleConfig,
    provider_config: OracleProviderConfig,
}

impl GeminiOracle {
    pub fn new(config: OracleConfig) -> Self {
        Self::new_with_provider_config(config, OracleProviderConfig::from_env())
    }

    pub fn new_with_provider_config(
        config: OracleConfig,
        provider_config: OracleProviderConfig,
    ) -> Self {
        Self {
            config,
            provider_config,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.provider_config.api_key.is_some()
            || self.provider_config.analysis_fixture_json.is_some()
            || self.provider_config.message_fixture_json.is_some()
    }

    fn try_analyze(&self, recent_logs: &[LogEntry]) -> Result<ProtocolAnalysis, ProviderCallError> {
        let start = recent_logs
            .len()
            .saturating_sub(self.config.max_recent_logs);
        let transcript = recent_logs[start..]
            .iter()
            .map(|entry| {
                format!(
                    "[{}] {}: {}",
                    entry.source.as_str(),
                    entry.action,
                    entry.details
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "You audit a simulated homomorphic-encryption clinical workflow. Review these recent protocol events and return JSON with keys 'analysis' (one or two sentences on whether patient data stayed encrypted) and 'securityScore' (integer 0-100).\n{transcript}"
        );
        let root = self.generate(
            &prompt,
            true,
            self.provider_config.analysis_fixture_json.as_deref(),
        )?;
        let text = extract_candidate_text(&root)
            .ok_or_else(|| ProviderCallError::new("gemini", "empty_results", None))?;
        parse_protocol_analysis(&text)
            .ok_or_else(|| ProviderCallError::new("gemini", "json_parse", None))
    }

    fn try_message(&self, role: &str, context: &str) -> Result<String, ProviderCallError> {
        let prompt = format!(
            "You are the {role} in a simulated encrypted clinical workflow. Reply with one short, in-character status line (no quotes) about this step: {context}"
        );
        let root = self.generate(
            &prompt,
            false,
            self.provider_config.message_fixture_json.as_deref(),
        )?;
        let text = extract_candidate_text(&root)
            .map(|t| collapse_ws(&t))
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ProviderCallError::new("gemini", "empty_results", None))?;
        Ok(truncate_chars(&text, self.config.max_message_chars))
    }

    fn generate(
        &self,
        prompt: &str,
        json_mode: bool,
        fixture_json: Option<&str>,
    ) -> Result<Value, ProviderCallError> {
        if let Some(raw) = fixture_json {
            return serde_json::from_str(raw)
                .map_err(|_| ProviderCallError::new("gemini", "json_parse", None));
        }
        let api_key = self
            .provider_config
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderCallError::new("gemini", "missing_config", None))?;

        let mut generation_config = serde_json::json!({
            "temperature": 0.4,
            "maxOutputTokens": self.config.max_output_tokens,
        });
        if json_mode {
            if let Some(obj) = generation_config.as_object_mut() {
                obj.insert(
                    "responseMimeType".to_string(),
                    Value::String("application/json".to_string()),
                );
            }
        }
        let payload = serde_json::json!({
            "contents": [{"role": "user", "parts": [{"text": prompt}]}],
            "generationConfig": generation_config,
        });

        let agent = build_http_agent(self.config.max_timeout_ms, &self.provider_config.user_agent)
            .map_err(|_| ProviderCallError::new("gemini", "config_invalid", None))?;
        let response = agent
            .post(&self.provider_config.generate_url())
            .set("Content-Type", "application/json")
            .set("Accept", "application/json")
            .set("x-goog-api-key", api_key)
            .send_json(payload)
            .map_err(provider_error_from_ureq)?;
        serde_json::from_reader(response.into_reader())
            .map_err(|_| ProviderCallError::new("gemini", "json_parse", None))
    }
}

impl ProtocolOracle for GeminiOracle {
    fn analyze_protocol_step(&self, recent_logs: &[LogEntry]) -> ProtocolAnalysis {
        match self.try_analyze(recent_logs) {
            Ok(analysis) => {
                debug!(score = analysis.security_score, "oracle analysis received");
                analysis
            }
            Err(err) => {
                warn!(detail = %err.safe_detail(), "oracle analysis fell back");
                ProtocolAnalysis::fallback()
            }
        }
    }

    fn generate_agent_message(&self, role: &str, context: &str) -> String {
        match self.try_message(role, context) {
            Ok(message) => message,
            Err(err) => {
                warn!(detail = %err.safe_detail(), role, "agent message fell back");
                AGENT_FALLBACK_MESSAGE.to_string()
            }
        }
    }
}

fn resolve_secret_from_env(secret_id: ProviderSecretId) -> Option<String> {
    secret_id
        .env_var_names()
        .iter()
        .find_map(|name| env::var(name).ok().and_then(trim_non_empty))
}

fn build_http_agent(timeout_ms: u32, user_agent: &str) -> Result<ureq::Agent, String> {
    if timeout_ms == 0 {
        return Err("timeout must be > 0".to_string());
    }
    let timeout = Duration::from_millis(u64::from(timeout_ms).max(100));
    Ok(ureq::AgentBuilder::new()
        .timeout_connect(timeout)
        .timeout_read(timeout)
        .timeout_write(timeout)
        .user_agent(user_agent)
        .build())
}

fn provider_error_from_ureq(err: ureq::Error) -> ProviderCallError {
    match err {
        ureq::Error::Status(status, _) => {
            ProviderCallError::new("gemini", "http_non_200", Some(status))
        }
        ureq::Error::Transport(transport) => {
            let combined = format!("{:?} {}", transport.kind(), transport);
            ProviderCallError::new("gemini", classify_transport_error_kind(&combined), None)
        }
    }
}

fn classify_transport_error_kind(raw: &str) -> &'static str {
    let lower = raw.to_ascii_lowercase();
    if lower.contains("timeout") || lower.contains("timed out") {
        "timeout"
    } else if lower.contains("tls") || lower.contains("ssl") {
        "tls"
    } else if lower.contains("dns") {
        "dns"
    } else if lower.contains("connect") {
        "connect"
    } else {
        "transport"
    }
}

fn extract_candidate_text(root: &Value) -> Option<String> {
    let parts = root
        .get("candidates")?
        .as_array()?
        .first()?
        .get("content")?
        .get("parts")?
        .as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();
    trim_non_empty(text)
}

fn parse_protocol_analysis(text: &str) -> Option<ProtocolAnalysis> {
    let body = strip_code_fence(text);
    let value: Value = serde_json::from_str(body).ok()?;
    let analysis = value
        .get("analysis")
        .and_then(Value::as_str)
        .map(collapse_ws)
        .filter(|a| !a.is_empty())?;
    let raw_score = value.get("securityScore")?.as_f64()?;
    if !raw_score.is_finite() {
        return None;
    }
    let score = raw_score.round().clamp(0.0, f64::from(SECURITY_SCORE_MAX)) as u8;
    ProtocolAnalysis::v1(analysis, score).ok()
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn collapse_ws(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_chars(input: &str, max_chars: usize) -> String {
    input.chars().take(max_chars).collect()
}

fn trim_non_empty(raw: String) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
