//! Core data models for the batch optimizer.
//!
//! `object` describes what the store enumerates and which entries qualify as
//! candidates; `report` describes the terminal outcome of a batch run.

pub mod object;
pub mod report;
