use url::Url;

use crate::config::JiraConfig;
use crate::error::{Result, StoryMapError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocatorKind {
    Wiki,
    Base,
}

/// A table addressed by a user-facing Lark URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLocation {
    pub kind: LocatorKind,
    /// Locator token, resolved to a container id before record calls
    pub token: String,
    pub table_id: String,
}

impl TableLocation {
    /// Parses `https://<tenant>.larksuite.com/wiki/{token}?table={id}` or the
    /// equivalent `/base/{token}` form.
    ///
    /// # Errors
    ///
    /// Returns `StoryMapError::InvalidUrl` if the URL cannot be parsed, has no
    /// `wiki` or `base` segment followed by a token, or lacks a `table` query
    /// parameter.
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = |reason: &str| StoryMapError::InvalidUrl {
            url: raw.to_string(),
            reason: reason.to_string(),
        };

        let url = Url::parse(raw.trim()).map_err(|e| invalid(&e.to_string()))?;

        let segments: Vec<&str> = url
            .path_segments()
            .map(|segments| segments.filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();

        let (kind, token) = segments
            .windows(2)
            .find_map(|pair| match pair[0] {
                "wiki" => Some((LocatorKind::Wiki, pair[1])),
                "base" => Some((LocatorKind::Base, pair[1])),
                _ => None,
            })
            .ok_or_else(|| invalid("expected a /wiki/{token} or /base/{token} path"))?;

        let table_id = url
            .query_pairs()
            .find(|(key, _)| key == "table")
            .map(|(_, value)| value.into_owned())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| invalid("missing 'table' query parameter"))?;

        Ok(Self {
            kind,
            token: token.to_string(),
            table_id,
        })
    }
}

/// Builds the browse URL of an external ticket from the configured template.
///
/// Returns `None` when ticket links are disabled.
pub fn ticket_url(config: &JiraConfig, ticket: &str) -> Option<String> {
    if !config.enabled {
        return None;
    }
    let base_url = config.base_url.trim_end_matches('/');
    Some(
        config
            .issue_url_template
            .replace("{base_url}", base_url)
            .replace("{ticket}", ticket.trim()),
    )
}

/// Middle segment of a story number (`Story-ARD-00001` → `ARD`), used as the
/// map title.
pub fn story_group(story_no: &str) -> &str {
    let mut parts = story_no.split('-');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(middle), Some(_)) => middle,
        _ => story_no,
    }
}
