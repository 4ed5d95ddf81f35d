pub mod aggregate;
pub mod analyzer;
pub mod annotate;
pub mod config;
pub mod conversation;
pub mod encoder;
pub mod error;
pub mod exercises;
pub mod geometry;
pub mod image_ops;
pub mod mock;
pub mod model;
pub mod orchestrator;
pub mod pipeline;
pub mod pose;
pub mod risk;
pub mod tools;
pub mod video;

pub use aggregate::{AnalysisCache, AnalysisSummary};
pub use analyzer::VideoAnalyzer;
pub use config::CrickLensConfig;
pub use error::{AnalysisError, AnalysisResult};
pub use orchestrator::{StopReason, ToolOrchestrator, TurnOutcome};
pub use risk::{Joint, JointRisks, RiskAssessor, RiskLevel};
pub use tokio_util::sync::CancellationToken;
