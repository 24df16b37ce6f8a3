#![forbid(unsafe_code)]

pub mod audit;
pub mod common;
pub mod envelope;
pub mod oracle;
pub mod provider_secrets;

pub use common::{ContractViolation, UnixTimeMs, Validate};
