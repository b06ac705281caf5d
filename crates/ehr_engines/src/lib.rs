#![forbid(unsafe_code)]

pub mod record_engine;
