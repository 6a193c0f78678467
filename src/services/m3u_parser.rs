use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;

use crate::models::{Channel, UNCATEGORIZED_GROUP, UNKNOWN_TITLE};
use crate::services::metrics::PLAYLIST_ENTRIES_SKIPPED;

lazy_static! {
    /// `#EXTINF:<duration> <attributes>,<title>`
    /// Commas inside quoted attribute values do not end the attribute block.
    static ref EXTINF_REGEX: Regex = Regex::new(
        r#"^#EXTINF:\s*(-?\d+(?:\.\d+)?)((?:[^,"']|"[^"]*"|'[^']*')*),(.*)$"#
    )
    .unwrap();

    /// Regex to parse EXTINF attributes (tvg-id="...", tvg_logo='...', etc)
    static ref ATTR_REGEX: Regex =
        Regex::new(r#"([A-Za-z0-9_-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap();
}

const EXTINF_PREFIX: &str = "#EXTINF";
const EXTGRP_PREFIX: &str = "#EXTGRP:";

/// Parsed EXTINF line data
#[derive(Debug, Default)]
struct ExtinfData {
    duration: String,
    attributes: HashMap<String, String>,
    title: String,
}

impl ExtinfData {
    /// Attribute lookup, hyphenated spelling first. Empty values count as absent.
    fn attr(&self, hyphenated: &str, alias: &str) -> Option<&str> {
        [hyphenated, alias]
            .iter()
            .filter_map(|key| self.attributes.get(*key))
            .map(|v| v.trim())
            .find(|v| !v.is_empty())
    }
}

/// Parse an EXTINF line
/// Format: #EXTINF:duration tvg-id="..." tvg-name="..." tvg-logo="..." group-title="...",Title
fn parse_extinf(line: &str) -> Option<ExtinfData> {
    let caps = EXTINF_REGEX.captures(line)?;

    let duration = caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default();
    let header = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
    let title = caps.get(3).map(|m| m.as_str().trim().to_string()).unwrap_or_default();

    let mut attributes = HashMap::new();
    for caps in ATTR_REGEX.captures_iter(header) {
        let key = caps[1].to_ascii_lowercase();
        let value = caps
            .get(2)
            .or_else(|| caps.get(3))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        attributes.insert(key, value);
    }

    Some(ExtinfData {
        duration,
        attributes,
        title,
    })
}

/// Where the playback URL for an EXTINF line was found
struct UrlLine<'a> {
    url: &'a str,
    index: usize,
    extgrp: Option<&'a str>,
}

/// Find the URL belonging to the EXTINF at `extinf_index`.
///
/// Directives (`#EXTVLCOPT`, `#EXTGRP`, ...) are stepped over. An empty line,
/// another `#EXTINF` or the end of input means the entry has no URL.
fn find_url_line<'a>(lines: &[&'a str], extinf_index: usize) -> Option<UrlLine<'a>> {
    let mut extgrp = None;

    for (index, raw) in lines.iter().enumerate().skip(extinf_index + 1) {
        let line = raw.trim();
        if line.is_empty() || line.starts_with(EXTINF_PREFIX) {
            return None;
        }
        if let Some(group) = line.strip_prefix(EXTGRP_PREFIX) {
            extgrp = Some(group.trim()).filter(|g| !g.is_empty());
            continue;
        }
        if line.starts_with('#') {
            continue;
        }
        return Some(UrlLine {
            url: line,
            index,
            extgrp,
        });
    }

    None
}

fn build_channel(extinf: ExtinfData, url: &UrlLine<'_>) -> Channel {
    let title = if extinf.title.is_empty() {
        UNKNOWN_TITLE.to_string()
    } else {
        extinf.title.clone()
    };

    let tvg_id = extinf.attr("tvg-id", "tvg_id").unwrap_or(&title).to_string();
    let tvg_name = extinf.attr("tvg-name", "tvg_name").unwrap_or(&title).to_string();
    let logo = extinf.attr("tvg-logo", "tvg_logo").unwrap_or_default().to_string();
    let group = extinf
        .attr("group-title", "group")
        .or(url.extgrp)
        .unwrap_or(UNCATEGORIZED_GROUP)
        .to_string();

    Channel {
        title,
        tvg_id,
        tvg_name,
        logo,
        group,
        url: url.url.to_string(),
        duration: extinf.duration,
    }
}

/// Counters collected while parsing one playlist
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ParseReport {
    pub channels: usize,
    pub malformed: usize,
    pub missing_url: usize,
}

impl ParseReport {
    pub fn skipped(&self) -> usize {
        self.malformed + self.missing_url
    }
}

/// M3U playlist parser.
///
/// Parsing is total: a bad entry is logged and skipped, never fatal.
pub struct M3UParser;

impl M3UParser {
    /// Parse playlist text into channels sorted by (group, title), case-insensitive
    pub fn parse(text: &str) -> Vec<Channel> {
        Self::parse_with_report(text).0
    }

    pub fn parse_with_report(text: &str) -> (Vec<Channel>, ParseReport) {
        let lines: Vec<&str> = text.lines().collect();
        let mut channels = Vec::new();
        let mut report = ParseReport::default();

        if !lines.first().map(|l| l.trim_start_matches('\u{feff}').trim().starts_with("#EXTM3U")).unwrap_or(false) {
            tracing::warn!("Playlist has no #EXTM3U header, parsing anyway");
        }

        let mut i = 0;
        while i < lines.len() {
            let line = lines[i].trim();

            if !line.starts_with(EXTINF_PREFIX) {
                i += 1;
                continue;
            }

            let Some(extinf) = parse_extinf(line) else {
                tracing::debug!(line = i + 1, "Skipping malformed EXTINF line");
                report.malformed += 1;
                i += 1;
                continue;
            };

            match find_url_line(&lines, i) {
                Some(url) => {
                    i = url.index + 1;
                    channels.push(build_channel(extinf, &url));
                }
                None => {
                    tracing::debug!(line = i + 1, title = %extinf.title, "Skipping EXTINF entry without URL");
                    report.missing_url += 1;
                    i += 1;
                }
            }
        }

        // Stable: exact ties keep playlist order
        channels.sort_by_key(|c| (c.group.to_lowercase(), c.title.to_lowercase()));
        report.channels = channels.len();
        PLAYLIST_ENTRIES_SKIPPED.inc_by(report.skipped() as u64);

        tracing::info!(
            channels = report.channels,
            malformed = report.malformed,
            missing_url = report.missing_url,
            "Playlist parsed"
        );

        (channels, report)
    }
}
