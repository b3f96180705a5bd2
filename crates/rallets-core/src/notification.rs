//! Advisory notification metadata carried on every heartbeat.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Operator-facing notice and latest-release info from the service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemNotification {
    /// Whether `message` should be shown to the operator.
    pub show: bool,
    pub link: String,
    pub download_link: String,
    /// Latest client version known to the service.
    pub version: String,
    pub message: String,
}

impl SystemNotification {
    /// Whether the service advertises a version newer than `current`.
    pub fn offers_upgrade(&self, current: &str) -> bool {
        is_newer_version(&self.version, current)
    }

    /// The link to print under the message, if it looks like a web URL.
    pub fn display_link(&self) -> Option<&str> {
        self.link.starts_with("http").then_some(self.link.as_str())
    }
}

/// Compare two version strings.
///
/// Returns `true` if `reported` is strictly greater than `current`. Both are
/// parsed as semver (a leading `v` is tolerated); if either fails to parse
/// the comparison falls back to plain string ordering. An empty `reported`
/// is never newer.
pub fn is_newer_version(reported: &str, current: &str) -> bool {
    let reported = reported.trim();
    if reported.is_empty() {
        return false;
    }
    let current = current.trim();
    match (parse_version(reported), parse_version(current)) {
        (Some(r), Some(c)) => r > c,
        _ => reported.cmp(current) == Ordering::Greater,
    }
}

fn parse_version(raw: &str) -> Option<semver::Version> {
    semver::Version::parse(raw.strip_prefix('v').unwrap_or(raw)).ok()
}
