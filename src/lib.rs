// Core pipeline
pub mod line_classifier;
pub mod model;
pub mod time_normalizer;

// Per-window passes
pub mod chat;
pub mod gameplay_filter;
pub mod session_tracker;

// Consumption modes
pub mod live_tail;
pub mod log_source;
pub mod query;

// Service plumbing
pub mod config;
pub mod server;
