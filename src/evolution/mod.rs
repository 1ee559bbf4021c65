//! Shadow Model Evolutionary Promotion Engine
//!
//! Candidates are trained on a schedule, shadow the incumbent on live traffic
//! for a fixed window, and are promoted only when they beat it by a margin on
//! the same joined sample.
//!
//! ```text
//! CandidateTrainer ──► ShadowRegistry (VALIDATING) ◄── ShadowRecorder (live events)
//!                              │
//!                          Evaluator ── GroundTruthProvider
//!                              │
//!                      PromotionExecutor ──► ArtifactStore (canonical pair + backup)
//!                              │
//!                      IncumbentReloader hooks
//! ```

pub mod artifacts;
pub mod engine;
pub mod evaluator;
pub mod incumbent;
pub mod janitor;
pub mod promotion;
pub mod recorder;
pub mod registry;
pub mod scheduler;
pub mod trainer;

pub use artifacts::{ArtifactError, ArtifactStore};
pub use engine::{EngineStatus, ShadowEvolutionEngine};
pub use evaluator::Evaluator;
pub use incumbent::IncumbentHandle;
pub use janitor::RetentionJanitor;
pub use promotion::{PromotionError, PromotionExecutor, PromotionOutcome};
pub use recorder::{ShadowModelCache, ShadowRecorder, ShadowRecorderHandle};
pub use registry::{RegistryError, ShadowRegistry};
pub use scheduler::Scheduler;
pub use trainer::CandidateTrainer;

#[cfg(test)]
mod registry_tests;
#[cfg(test)]
mod test_support;
