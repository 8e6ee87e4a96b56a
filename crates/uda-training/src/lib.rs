//! Models, domain aligners and the training loop for imbalanced
//! unsupervised domain adaptation.
//!
//! This crate provides:
//! - The shared 1-D CNN encoder, classifier head and domain discriminator
//! - Five alignment strategies (CORAL, DANN, CDAN, ACDANN, DDTLN)
//! - Gradient reversal and loss weight schedules
//! - The training orchestrator, evaluator and checkpoint store

pub mod aligner;
pub mod checkpoint;
pub mod evaluator;
pub mod grl;
pub mod model;
pub mod schedule;
pub mod session;
pub mod trainer;

pub use aligner::{AlignmentInputs, AlignmentLoss, DomainAligner};
pub use checkpoint::{
    CheckpointMetadata, CheckpointStore, FileCheckpointStore, RetryPolicy, BEST_TAG, LATEST_TAG,
};
pub use evaluator::Evaluator;
pub use grl::reverse_gradient;
pub use model::{ClassifierHead, DomainDiscriminator, FeatureEncoder, FeatureEncoderConfig, UdaModel};
pub use schedule::{LearningRateScheduler, LossScheduler, LossWeights};
pub use session::ComputeSession;
pub use trainer::{
    run_training, CompletionReason, StopSignal, TerminalState, TrainingContext, TrainingData,
    TrainingOrchestrator, TrainingOutcome, TrainingPhase,
};

/// Re-export commonly used types
pub mod prelude {
    pub use super::aligner::{AlignmentInputs, AlignmentLoss, DomainAligner};
    pub use super::checkpoint::{CheckpointStore, FileCheckpointStore};
    pub use super::evaluator::Evaluator;
    pub use super::model::UdaModel;
    pub use super::trainer::{run_training, StopSignal, TerminalState, TrainingData, TrainingOutcome};
}
