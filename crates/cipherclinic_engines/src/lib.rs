#![forbid(unsafe_code)]

pub mod ciphertext;
pub mod envelope_factory;
pub mod oracle;
pub mod participants;
pub mod sources;
