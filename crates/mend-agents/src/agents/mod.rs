//! The five remediation agents, one per pipeline position.

pub mod detective;
pub mod publisher;
pub mod reasoner;
pub mod sanitizer;
pub mod verifier;

use std::sync::Arc;

use lifecycle::{PipelineConfig, Stage};

pub use detective::DetectiveAgent;
pub use publisher::PublisherAgent;
pub use reasoner::ReasonerAgent;
pub use sanitizer::SanitizerAgent;
pub use verifier::VerifierAgent;

/// Assemble the full stage set for an orchestrator.
pub fn default_stages(config: &PipelineConfig) -> Vec<Arc<dyn Stage>> {
    vec![
        Arc::new(SanitizerAgent::new(config.sanitizer_max_secrets)),
        Arc::new(DetectiveAgent::new()),
        Arc::new(ReasonerAgent::new()),
        Arc::new(VerifierAgent::new()),
        Arc::new(PublisherAgent::new()),
    ]
}
