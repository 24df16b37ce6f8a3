#![forbid(unsafe_code)]

pub mod visit_cli;
