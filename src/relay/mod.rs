//! Relay: generation server side of the pipeline.
//!
//! Components:
//! - `publish`: the single notification record and its ready flag
//! - `artifact`: durable, id-keyed WAV files with checksums and retention
//! - `generator`: validate → synthesize → store → publish
//! - `api`: axum HTTP server for generation, state, and artifact download
//! - `history`: generation event log and daily report

pub mod api;
pub mod artifact;
pub mod generator;
pub mod history;
pub mod publish;
