#![forbid(unsafe_code)]

use std::sync::Arc;

use cipherclinic_engines::sources::{ClockSource, IdentitySource};
use cipherclinic_kernel_contracts::audit::{AuditRecord, LogEntry, MetricTags, ParticipantId};
use cipherclinic_kernel_contracts::UnixTimeMs;
use sha2::{Digest, Sha256};

const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";
const FIELD_SEP: char = '\u{1f}';

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditChainError {
    pub index: usize,
    pub entry_id: String,
}

impl std::fmt::Display for AuditChainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "audit chain broken at index {} (entry {})",
            self.index, self.entry_id
        )
    }
}

impl std::error::Error for AuditChainError {}

/// Display-side log. Assigns identity, timestamp and a chained SHA-256 integrity
/// hash to each entry.
pub struct AuditTrail {
    clock: Arc<dyn ClockSource>,
    identity: Arc<dyn IdentitySource>,
    entries: Vec<LogEntry>,
}

impl std::fmt::Debug for AuditTrail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditTrail")
            .field("entries", &self.entries.len())
            .finish_non_exhaustive()
    }
}

impl AuditTrail {
    pub fn new(clock: Arc<dyn ClockSource>, identity: Arc<dyn IdentitySource>) -> Self {
        Self {
            clock,
            identity,
            entries: Vec::new(),
        }
    }

    pub fn record(
        &mut self,
        source: ParticipantId,
        action: &str,
        record: &AuditRecord,
    ) -> &LogEntry {
        self.push(
            source,
            action,
            record.narrative.clone(),
            Some(record.formula.clone()),
            Some(record.steps.clone()),
            Some(record.metrics.clone()),
        )
    }

    pub fn record_note(
        &mut self,
        source: ParticipantId,
        action: &str,
        details: String,
    ) -> &LogEntry {
        self.push(source, action, details, None, None, None)
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn recent(&self, n: usize) -> &[LogEntry] {
        let start = self.entries.len().saturating_sub(n);
        &self.entries[start..]
    }

    pub fn into_entries(self) -> Vec<LogEntry> {
        self.entries
    }

    pub fn verify_chain(&self) -> Result<(), AuditChainError> {
        verify_entries(&self.entries)
    }

    fn push(
        &mut self,
        source: ParticipantId,
        action: &str,
        details: String,
        formula: Option<String>,
        steps: Option<Vec<String>>,
        metrics: Option<MetricTags>,
    ) -> &LogEntry {
        let mut entry = LogEntry {
            id: self.identity.next_id(),
            timestamp: UnixTimeMs(self.clock.now_unix_ms()),
            source,
            action: action.to_string(),
            details,
            formula,
            steps,
            metrics,
            integrity_hash: None,
        };
        let prev = self
            .entries
            .last()
            .and_then(|e| e.integrity_hash.as_deref())
            .unwrap_or(GENESIS_HASH);
        entry.integrity_hash = Some(entry_hash(prev, &entry));
        self.entries.push(entry);
        &self.entries[self.entries.len() - 1]
    }
}

pub fn verify_entries(entries: &[LogEntry]) -> Result<(), AuditChainError> {
    let mut prev = GENESIS_HASH.to_string();
    for (index, entry) in entries.iter().enumerate() {
        let expected = entry_hash(&prev, entry);
        if entry.integrity_hash.as_deref() != Some(expected.as_str()) {
            return Err(AuditChainError {
                index,
                entry_id: entry.id.clone(),
            });
        }
        prev = expected;
    }
    Ok(())
}

fn entry_hash(prev: &str, entry: &LogEntry) -> String {
    let mut canonical = String::new();
    let mut field = |value: &str| {
        canonical.push_str(value);
        canonical.push(FIELD_SEP);
    };
    field(prev);
    field(&entry.id);
    field(&entry.timestamp.0.to_string());
    field(entry.source.as_str());
    field(&entry.action);
    field(&entry.details);
    field(entry.formula.as_deref().unwrap_or(""));
    if let Some(steps) = &entry.steps {
        for step in steps {
            field(step);
        }
    }
    if let Some(metrics) = &entry.metrics {
        for (k, v) in metrics {
            field(&format!("{k}={v}"));
        }
    }

    let digest = Sha256::digest(canonical.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cipherclinic_engines::sources::{FixedClockSource, SequentialIdentitySource};
    use cipherclinic_kernel_contracts::audit::metric_tags;
    use cipherclinic_kernel_contracts::envelope::{Envelope, EnvelopeId, RawPayload};

    fn trail() -> AuditTrail {
        AuditTrail::new(
            Arc::new(FixedClockSource(1_700_000_000_000)),
            Arc::new(SequentialIdentitySource::new("log")),
        )
    }

    fn record(narrative: &str) -> AuditRecord {
        AuditRecord::new(
            Envelope::sealed(
                EnvelopeId::new("env-1").unwrap(),
                RawPayload::Scalar(40.0),
                "ct_0x00d4d0...37ae".to_string(),
            ),
            narrative.to_string(),
            "b = ⟨a, s⟩ + Δ·m + e".to_string(),
            vec!["step one".to_string(), "step two".to_string()],
            metric_tags(&[("Dimension", "n = 4")]),
        )
    }

    #[test]
    fn at_trail_01_entries_get_id_timestamp_and_hash() {
        let mut t = trail();
        let entry = t
            .record(ParticipantId::Patient, "Client-Side Encryption", &record("sealed"))
            .clone();
        assert_eq!(entry.id, "log-1");
        assert_eq!(entry.timestamp, UnixTimeMs(1_700_000_000_000));
        assert_eq!(entry.steps.as_ref().map(Vec::len), Some(2));
        let hash = entry.integrity_hash.unwrap();
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn at_trail_02_chain_verifies_and_detects_tampering() {
        let mut t = trail();
        t.record(ParticipantId::Patient, "Client-Side Encryption", &record("sealed"));
        t.record_note(ParticipantId::Oracle, "Protocol Analysis", "fine".to_string());
        t.record(ParticipantId::SpecialistAi, "Homomorphic Diagnosis", &record("scored"));
        assert!(t.verify_chain().is_ok());

        let mut entries = t.into_entries();
        entries[1].details = "tampered".to_string();
        let err = verify_entries(&entries).unwrap_err();
        assert_eq!(err.index, 1);
        assert_eq!(err.entry_id, "log-2");
    }

    #[test]
    fn at_trail_03_hash_depends_on_previous_entry() {
        let mut a = trail();
        a.record_note(ParticipantId::Oracle, "Note", "first".to_string());
        let second_a = a
            .record_note(ParticipantId::Oracle, "Note", "same".to_string())
            .clone();

        let mut b = trail();
        b.record_note(ParticipantId::Oracle, "Note", "different first".to_string());
        let second_b = b
            .record_note(ParticipantId::Oracle, "Note", "same".to_string())
            .clone();
        assert_eq!(second_a.id, second_b.id);
        assert_ne!(second_a.integrity_hash, second_b.integrity_hash);
    }

    #[test]
    fn at_trail_04_recent_returns_tail() {
        let mut t = trail();
        for n in 0..6 {
            t.record_note(ParticipantId::Oracle, "Note", format!("n{n}"));
        }
        let tail = t.recent(3);
        assert_eq!(tail.len(), 3);
        assert_eq!(tail[0].details, "n3");
        assert_eq!(t.recent(50).len(), 6);
    }
}
