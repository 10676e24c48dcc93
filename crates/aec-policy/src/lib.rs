//! # aec-policy
//!
//! The deployment gate: a pure, stateless decision over a diagnosis's impact,
//! its affected features, the wall clock, and the validation result.
//!
//! Rules are evaluated in order and the first match wins:
//!
//! 1. critical impact → manual review
//! 2. affected feature matches a sensitive-domain keyword → manual review
//! 3. high impact → manual review
//! 4. tests failed or safety warnings present → manual review
//! 5. inside the peak-hours window → deferred to the next off-peak time
//! 6. otherwise → autonomous
//!
//! The gate is never cached. Callers evaluate it at the moment they intend
//! to deploy.

pub mod config;
pub mod gate;

pub use config::GateConfig;
pub use gate::{DeploymentGate, GateDecision, GateInput, GateStep, GateTrace, ValidationResult};
