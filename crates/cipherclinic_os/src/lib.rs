#![forbid(unsafe_code)]

pub mod audit_trail;
pub mod oracle_wiring;
pub mod patient_visit;
