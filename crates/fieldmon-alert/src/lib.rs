//! Rule evaluation core for device telemetry.
//!
//! Incoming readings are matched against the [`index::RuleIndex`], gated by
//! the per-(rule, device) [`cooldown::CooldownTracker`] and checked by the
//! evaluator for the rule's [`CheckKind`](fieldmon_common::types::CheckKind).
//! Offline detection has no triggering reading and runs from the periodic
//! sweep through the same gate. [`engine::AlertEngine`] ties the pieces
//! together and hands accepted firings back to the caller for persistence
//! and notification.

pub mod cooldown;
pub mod engine;
pub mod error;
pub mod index;
pub mod rules;
pub mod window;
