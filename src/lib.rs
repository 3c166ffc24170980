// src/lib.rs

//! Harvester Library
//!
//! Incrementally harvests civic issue reports into month-sharded JSONL files
//! and keeps their statuses current.

pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;
