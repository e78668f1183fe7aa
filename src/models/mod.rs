//! Core data models for the upload tracking service.
//!
//! These entities represent upload progress snapshots and the wire shapes
//! of the ingress paths that produce them. They serialize naturally as
//! JSON via `serde`.

pub mod hook;
pub mod upload;
