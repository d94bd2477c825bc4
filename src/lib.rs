//! perfledger - benchmark history ledger with regression gating
//!
//! CI jobs hand in raw benchmark samples; this library reduces them to a
//! percentile per bench, validates the result against the suite's history,
//! upserts it into an append-only store and compares it with a baseline,
//! honouring each tool's notion of "better".

pub mod aggregate;
pub mod cli;
pub mod compare;
pub mod config;
pub mod ingest;
pub mod model;
pub mod report;
pub mod store;
pub mod validate;
