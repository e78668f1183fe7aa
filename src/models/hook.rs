//! Wire shapes of the tus webhook hook envelope.
//!
//! Field names follow the tusd hook payload (Go-style capitalization), so
//! the handler can consume tusd's JSON unchanged.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Hook types this service reacts to. Unknown types are acknowledged
/// without effect so a newer tusd does not see failed hooks.
pub const PRE_CREATE: &str = "pre-create";
pub const POST_CREATE: &str = "post-create";
pub const POST_RECEIVE: &str = "post-receive";
pub const POST_FINISH: &str = "post-finish";
pub const POST_TERMINATE: &str = "post-terminate";

/// Top-level hook envelope: `{"Type": "...", "Event": {...}}`.
#[derive(Deserialize, Debug)]
pub struct HookRequest {
    #[serde(rename = "Type")]
    pub hook_type: String,

    #[serde(rename = "Event")]
    pub event: HookEvent,
}

#[derive(Deserialize, Debug)]
pub struct HookEvent {
    #[serde(rename = "Upload")]
    pub upload: HookUpload,
}

/// Upload state as reported by the tus server.
#[derive(Deserialize, Debug)]
pub struct HookUpload {
    #[serde(rename = "ID", default)]
    pub id: String,

    /// Null while the client defers declaring a length; treated as the
    /// 0 "unknown size" sentinel.
    #[serde(rename = "Size", default)]
    pub size: Option<i64>,

    #[serde(rename = "Offset", default)]
    pub offset: i64,

    #[serde(rename = "MetaData", default)]
    pub metadata: HashMap<String, String>,
}

/// Body returned to the tus server. An empty object is a plain ack;
/// `reject_reason` is only ever set on `pre-create`.
#[derive(Serialize, Debug, Default)]
pub struct HookResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reject_reason: Option<String>,
}
