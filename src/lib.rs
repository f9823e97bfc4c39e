//! statusd: alert status engine.
//!
//! Classifies monitored entities as OFF, ONGOING, STEALTHY, FLAPPING or
//! CANCELED from their stream of check events, keeps the live event record
//! per routing key and an append-only log of severity changes.

pub mod config;
pub mod db;
pub mod engine;
pub mod event;
pub mod scheduler;
pub mod status;
pub mod web;
