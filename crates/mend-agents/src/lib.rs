//! Remediation agents and HTTP surface for the mend pipeline.
//!
//! The five agents here implement the [`lifecycle::Stage`] contract with
//! deterministic heuristics: secret redaction, log analysis, patch
//! proposal, patch verification, and PR publication. The heavyweight
//! collaborators the production deployments plug in (LLM backends,
//! sandboxed test runners, forge APIs) sit behind the same trait.
//!
//! [`api`] exposes the lifecycle over HTTP for polling clients.

pub mod agents;
pub mod api;

pub use agents::default_stages;
