use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Single programme from an XMLTV guide.
///
/// `start`/`stop` keep the XMLTV timestamp text as-is
/// (`20240101120000 +0000`); they are compared as strings, never parsed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Programme {
    pub channel_id: String,
    pub title: String,
    #[serde(rename = "desc")]
    pub description: String,
    pub category: String,
    pub start: String,
    pub stop: String,
}

/// Programmes grouped by channel id, each list ordered by `start`
pub type Guide = HashMap<String, Vec<Programme>>;
