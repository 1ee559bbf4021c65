//! Shadow Evolution Backend Library
//!
//! Trains candidate scoring models, runs them as shadows of the production
//! incumbent, and promotes a winner once it beats the incumbent on delayed
//! ground truth.

pub mod config;
pub mod evolution;
pub mod metrics;
pub mod ml;
pub mod models;
pub mod providers;

pub use config::EvolutionConfig;
pub use evolution::ShadowEvolutionEngine;
