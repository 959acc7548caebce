//! Delegated face verification.
//!
//! The matching engine is an external service. This module only speaks its protocol
//! and turns its verdicts into typed values; trust decisions stay in [`crate::auth`].

pub mod adapter;
pub mod encoding;
pub mod verifier;

pub use adapter::{BiometricTrustAdapter, DEFAULT_VERIFIER_TIMEOUT};
pub use encoding::{BiometricError, FaceEncoding};
pub use verifier::{
    Assertion, Enrollment, FaceVerifier, HttpFaceVerifier, ScriptedVerifier, VerifierError,
};
