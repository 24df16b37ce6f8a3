#![forbid(unsafe_code)]

use std::env;
use std::io::{self, IsTerminal};

use cipherclinic_engines::ciphertext::CiphertextConfig;
use cipherclinic_engines::oracle::{GeminiOracle, OracleConfig, OracleProviderConfig};
use cipherclinic_engines::sources::ProtocolSources;
use cipherclinic_kernel_contracts::provider_secrets::ProviderSecretId;
use cipherclinic_os::oracle_wiring::OracleWiringConfig;
use cipherclinic_os::patient_visit::PatientVisitRunner;
use cipherclinic_tools::visit_cli::{
    parse_visit_args, render_transcript_json, render_transcript_text, should_prompt_for_key, USAGE,
};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

fn main() {
    init_logging();
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(2);
    }
}

fn init_logging() {
    let filter = env::var("CIPHERCLINIC_LOG")
        .ok()
        .and_then(|raw| EnvFilter::try_new(raw).ok())
        .unwrap_or_else(|| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(io::stderr),
        )
        .init();
}

fn run() -> Result<(), String> {
    let args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() || args[0] != "visit" {
        return Err(USAGE.to_string());
    }
    let cmd = parse_visit_args(&args[1..])?;

    let provider_config = OracleProviderConfig::from_env();
    let mut oracle =
        GeminiOracle::new_with_provider_config(OracleConfig::mvp_v1(), provider_config.clone());
    if should_prompt_for_key(&cmd, oracle.is_configured(), io::stdin().is_terminal()) {
        if let Some(api_key) = prompt_api_key()? {
            oracle = GeminiOracle::new_with_provider_config(
                OracleConfig::mvp_v1(),
                OracleProviderConfig {
                    api_key: Some(api_key),
                    ..provider_config
                },
            );
        }
    }
    info!(
        shape = cmd.payload.shape_label(),
        stages = cmd.plan.stages.len(),
        decrypt = cmd.plan.decrypt_at_end,
        oracle = cmd.oracle,
        "starting visit"
    );
    let runner = PatientVisitRunner::new(
        ProtocolSources::system(),
        CiphertextConfig::mvp_v1(),
        OracleWiringConfig::mvp_v1(cmd.oracle),
        oracle,
    );
    let transcript = runner
        .run(cmd.payload, &cmd.plan)
        .map_err(|e| e.to_string())?;

    let output = if cmd.json {
        render_transcript_json(&transcript)?
    } else {
        render_transcript_text(&transcript)
    };
    print!("{output}");
    if cmd.json {
        println!();
    }
    Ok(())
}

/// An empty answer keeps the oracle on its fallbacks.
fn prompt_api_key() -> Result<Option<String>, String> {
    let prompt = format!(
        "Enter value for {} (leave empty to run offline):",
        ProviderSecretId::GoogleApiKey.as_str()
    );
    let value = rpassword::prompt_password(prompt).map_err(|e| e.to_string())?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    Ok(Some(trimmed.to_string()))
}
