//! HTTP handlers, grouped by concern: health probes, tus webhook hooks,
//! and the remaining upload ingress and query endpoints.

pub mod health_handlers;
pub mod hook_handlers;
pub mod upload_handlers;
