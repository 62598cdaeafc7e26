//! Shared domain types for the fieldmon alerting core.
//!
//! Readings, alert rules and alert records are defined here so that the
//! rule engine, the storage boundary and the notification fan-out agree
//! on a single vocabulary.

pub mod id;
pub mod types;
