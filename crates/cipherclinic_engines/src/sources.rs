#![forbid(unsafe_code)]

//! Ambient inputs the protocol draws on. Everything that would otherwise reach for
//! a global RNG, the wall clock or an id generator goes through these traits.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;

pub trait RandomSource: Send + Sync {
    /// Uniform draw in `[0, 1)`.
    fn next_unit(&self) -> f64;
}

pub trait ClockSource: Send + Sync {
    fn now_unix_ms(&self) -> u64;
}

pub trait IdentitySource: Send + Sync {
    fn next_id(&self) -> String;
}

/// Inclusive uniform integer in `[low, high]`.
pub fn uniform_int(random: &dyn RandomSource, low: u32, high: u32) -> u32 {
    if high <= low {
        return low;
    }
    let span = f64::from(high - low) + 1.0;
    let unit = random.next_unit().clamp(0.0, 1.0);
    let offset = (unit * span).floor().min(span - 1.0);
    low + offset as u32
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRngSource;

impl RandomSource for ThreadRngSource {
    fn next_unit(&self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClockSource;

impl ClockSource for SystemClockSource {
    fn now_unix_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(1)
            .max(1)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UuidIdentitySource;

impl IdentitySource for UuidIdentitySource {
    fn next_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Replays a fixed list of unit draws, wrapping around at the end.
#[derive(Debug)]
pub struct ScriptedRandomSource {
    units: Vec<f64>,
    cursor: AtomicUsize,
}

impl ScriptedRandomSource {
    pub fn new(units: Vec<f64>) -> Self {
        let units = if units.is_empty() { vec![0.0] } else { units };
        Self {
            units,
            cursor: AtomicUsize::new(0),
        }
    }
}

impl RandomSource for ScriptedRandomSource {
    fn next_unit(&self) -> f64 {
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % self.units.len();
        self.units[idx]
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClockSource(pub u64);

impl ClockSource for FixedClockSource {
    fn now_unix_ms(&self) -> u64 {
        self.0
    }
}

#[derive(Debug)]
pub struct SequentialIdentitySource {
    prefix: String,
    next: AtomicU64,
}

impl SequentialIdentitySource {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }
}

impl IdentitySource for SequentialIdentitySource {
    fn next_id(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{}-{n}", self.prefix)
    }
}

/// The three sources bundled for handing to runtimes.
#[derive(Clone)]
pub struct ProtocolSources {
    pub random: Arc<dyn RandomSource>,
    pub clock: Arc<dyn ClockSource>,
    pub identity: Arc<dyn IdentitySource>,
}

impl ProtocolSources {
    pub fn new(
        random: Arc<dyn RandomSource>,
        clock: Arc<dyn ClockSource>,
        identity: Arc<dyn IdentitySource>,
    ) -> Self {
        Self {
            random,
            clock,
            identity,
        }
    }

    pub fn system() -> Self {
        Self::new(
            Arc::new(ThreadRngSource),
            Arc::new(SystemClockSource),
            Arc::new(UuidIdentitySource),
        )
    }

    pub fn scripted(units: Vec<f64>, now_unix_ms: u64, id_prefix: &str) -> Self {
        Self::new(
            Arc::new(ScriptedRandomSource::new(units)),
            Arc::new(FixedClockSource(now_unix_ms)),
            Arc::new(SequentialIdentitySource::new(id_prefix)),
        )
    }
}

impl std::fmt::Debug for ProtocolSources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolSources").finish_non_exhaustive()
    }
}
