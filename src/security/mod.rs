//! Connection hardening
//!
//! Connection-string validation and assembly, plus the credential sanitizer
//! applied to every error that could carry a raw DSN.

pub mod dsn;
pub mod sanitize;

pub use dsn::{build_dsn, DsnBuilder, ThreatCategory};
pub use sanitize::sanitize;
