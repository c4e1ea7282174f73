//! Pipeline core: stage wiring and the multi-identity orchestrator.

pub mod embedding;
pub mod enrichment;
pub mod pipeline;
pub mod stages;

pub use embedding::{Embedder, VectorUploader};
pub use enrichment::{ChatEnricher, Enricher};
pub use pipeline::{OrchestratorOptions, PipelineOrchestrator};
pub use stages::{HarvestStages, StageRunner};
