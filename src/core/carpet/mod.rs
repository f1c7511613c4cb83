pub mod analyzer;
pub mod color_profile;
pub mod confidence;
pub mod error;
pub mod frame;
pub mod likelihood;
pub mod reference;
pub mod scorer;
pub mod state_machine;
pub mod texture;

pub use analyzer::{AnalysisStats, AnalyzerConfig, CarpetAnalyzer, DiagnosticSnapshot, LocationHint};
pub use color_profile::{ColorConfig, ColorProfile, ColorProfileExtractor, ColorSignature, DominantColor};
pub use confidence::{ConfidenceConfig, FeatureWeights, SimilarityLevel, WeightSignals};
pub use error::CarpetError;
pub use frame::{Frame, RawFrame};
pub use likelihood::{CarpetLikelihoodGate, GateConfig, GateDecision, LikelihoodReport};
pub use reference::{PatternDescriptor, ReferenceEntry, ReferenceSet};
pub use scorer::{DetectedFeatures, MatchRanker, MatchResult, SimilarityScorer};
pub use state_machine::AnalysisState;
pub use texture::{PatternFamily, TextureConfig, TextureFeatureExtractor, TextureFeatures};
