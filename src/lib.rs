// Event model, property specs and validation
pub mod event;

// Property resolution and lookalike generation
pub mod generator;

// Backfill configuration, date policy and expansion
pub mod backfill;

// Job status tracking
pub mod jobs;

// Form state for composing events and backfills
pub mod composer;

// HTTP clients (composer service and Usage API)
pub mod client;

// File and environment configuration
pub mod config;

// Backfill execution backends
pub mod dispatch;

// Chunked backfill runs against the Usage API
pub mod runner;

// HTTP APIs
pub mod api;
