#![forbid(unsafe_code)]

use cipherclinic_engines::ciphertext::format_number;
use cipherclinic_engines::participants::ParticipantTransform;
use cipherclinic_kernel_contracts::envelope::{RawPayload, VitalsRecord};
use cipherclinic_os::patient_visit::{VisitPlan, VisitTranscript};
use tracing::warn;

pub const USAGE: &str = "usage: cipherclinic visit (--score <n> | --vitals <hr,sys,dia,temp,o2,severity>) [--stages <diagnosis,lab,billing,review>] [--no-decrypt] [--json] [--oracle]";

#[derive(Debug, Clone, PartialEq)]
pub struct VisitCommand {
    pub payload: RawPayload,
    pub plan: VisitPlan,
    pub json: bool,
    pub oracle: bool,
}

pub fn parse_visit_args(args: &[String]) -> Result<VisitCommand, String> {
    let mut payload = None;
    let mut stages = None;
    let mut decrypt = true;
    let mut json = false;
    let mut oracle = false;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--score" => {
                let raw = iter.next().ok_or_else(|| "--score needs a value".to_string())?;
                set_payload(&mut payload, RawPayload::Scalar(parse_number("score", raw)?))?;
            }
            "--vitals" => {
                let raw = iter.next().ok_or_else(|| "--vitals needs a value".to_string())?;
                set_payload(&mut payload, RawPayload::Vitals(parse_vitals(raw)?))?;
            }
            "--stages" => {
                let raw = iter.next().ok_or_else(|| "--stages needs a value".to_string())?;
                stages = Some(parse_stages(raw)?);
            }
            "--no-decrypt" => decrypt = false,
            "--json" => json = true,
            "--oracle" => oracle = true,
            other => return Err(format!("unknown argument: {other}\n{USAGE}")),
        }
    }

    let payload = payload.ok_or_else(|| USAGE.to_string())?;
    let plan = match stages {
        Some(stages) => VisitPlan::new(stages, decrypt),
        None => VisitPlan::new(VisitPlan::full_visit().stages, decrypt),
    };
    Ok(VisitCommand {
        payload,
        plan,
        json,
        oracle,
    })
}

fn set_payload(slot: &mut Option<RawPayload>, payload: RawPayload) -> Result<(), String> {
    if slot.is_some() {
        return Err("pass exactly one of --score or --vitals".to_string());
    }
    *slot = Some(payload);
    Ok(())
}

fn parse_number(field: &str, raw: &str) -> Result<f64, String> {
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|_| format!("{field} must be a number, got '{raw}'"))?;
    if !value.is_finite() {
        return Err(format!("{field} must be finite"));
    }
    Ok(value)
}

fn parse_vitals(raw: &str) -> Result<VitalsRecord, String> {
    let parts: Vec<&str> = raw.split(',').collect();
    if parts.len() != 6 {
        return Err(format!(
            "--vitals expects 6 comma-separated numbers (hr,sys,dia,temp,o2,severity), got {}",
            parts.len()
        ));
    }
    let names = ["heart_rate", "systolic", "diastolic", "temperature", "oxygen_sat", "severity"];
    let mut values = [0.0; 6];
    for (slot, (name, part)) in values.iter_mut().zip(names.iter().zip(parts.iter())) {
        *slot = parse_number(name, part)?;
    }
    VitalsRecord::v1(values[0], values[1], values[2], values[3], values[4], values[5])
        .map_err(|e| e.to_string())
}

fn parse_stages(raw: &str) -> Result<Vec<ParticipantTransform>, String> {
    raw.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|s| {
            ParticipantTransform::parse(s).ok_or_else(|| {
                format!("unknown stage '{s}'. expected one of: diagnosis, lab, billing, review")
            })
        })
        .collect()
}

pub fn render_transcript_text(transcript: &VisitTranscript) -> String {
    let mut out = String::new();
    for (n, entry) in transcript.log.iter().enumerate() {
        out.push_str(&format!(
            "#{} [{}] {}\n    {}\n",
            n + 1,
            entry.source.as_str(),
            entry.action,
            entry.details
        ));
        if let Some(formula) = &entry.formula {
            out.push_str(&format!("    formula: {formula}\n"));
        }
        if let Some(steps) = &entry.steps {
            for (i, step) in steps.iter().enumerate() {
                out.push_str(&format!("    {}. {step}\n", i + 1));
            }
        }
        if let Some(metrics) = &entry.metrics {
            let tags: Vec<String> = metrics.iter().map(|(k, v)| format!("{k}: {v}")).collect();
            out.push_str(&format!("    metrics: {}\n", tags.join(" | ")));
        }
    }
    let env = &transcript.envelope;
    let value = match &env.raw_value {
        RawPayload::Scalar(v) => format_number(*v),
        other => other.shape_label().to_string(),
    };
    out.push_str(&format!(
        "envelope {} state={} value={} blob={} history={}\n",
        env.id,
        env.state.as_str(),
        value,
        env.encrypted_blob,
        env.history.labels().join(" > ")
    ));
    out
}

/// Whether to ask for the oracle key on the terminal before the visit runs.
pub fn should_prompt_for_key(
    cmd: &VisitCommand,
    oracle_configured: bool,
    interactive: bool,
) -> bool {
    if !cmd.oracle || oracle_configured {
        return false;
    }
    if !interactive {
        warn!("oracle requested without a key and stdin is not a terminal; using fallbacks");
        return false;
    }
    true
}

pub fn render_transcript_json(transcript: &VisitTranscript) -> Result<String, String> {
    serde_json::to_string_pretty(transcript).map_err(|e| format!("failed to render json: {e}"))
}
