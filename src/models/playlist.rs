use serde::{Deserialize, Serialize};

/// Title used when an EXTINF line carries no display name
pub const UNKNOWN_TITLE: &str = "Unknown Channel";

/// Group used when an entry has no `group-title`, `group` or `#EXTGRP`
pub const UNCATEGORIZED_GROUP: &str = "Uncategorized";

/// Single playable channel from the M3U playlist
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub title: String,
    /// Join key against the program guide
    pub tvg_id: String,
    pub tvg_name: String,
    /// Logo URL, empty when the playlist has none
    pub logo: String,
    pub group: String,
    pub url: String,
    /// Raw EXTINF duration, copied verbatim
    pub duration: String,
}
