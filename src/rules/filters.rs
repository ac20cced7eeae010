use std::collections::HashSet;

use regex::Regex;
use tracing::warn;

use crate::db::MappingFilter;
use crate::telegram::{ChatEvent, IncomingMediaKind};

/// Message class used by filters and transform scopes.
/// First-match priority: voice > video > photo > text (has body) > other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Voice,
    Video,
    Photo,
    Text,
    Other,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Voice => "voice",
            MediaKind::Video => "video",
            MediaKind::Photo => "photo",
            MediaKind::Text => "text",
            MediaKind::Other => "other",
        }
    }
}

pub fn classify_media(event: &ChatEvent) -> MediaKind {
    match event.media.as_ref().map(|media| media.kind) {
        Some(IncomingMediaKind::Voice) => MediaKind::Voice,
        Some(IncomingMediaKind::Video) => MediaKind::Video,
        Some(IncomingMediaKind::Photo) => MediaKind::Photo,
        _ if !event.text.is_empty() => MediaKind::Text,
        _ => MediaKind::Other,
    }
}

pub(crate) fn parse_media_type_set(raw: &str) -> HashSet<String> {
    raw.split(',')
        .map(|part| part.trim().to_lowercase())
        .filter(|part| !part.is_empty())
        .collect()
}

/// Logical AND across all filters; each filter's own fields are ANDed too.
/// An empty filter list passes everything.
pub fn passes_filters(text: &str, media: MediaKind, filters: &[MappingFilter]) -> bool {
    for filter in filters {
        if let Some(media_types) = filter.media_types.as_deref() {
            let allowed = parse_media_type_set(media_types);
            if !allowed.is_empty() && !allowed.contains(media.as_str()) {
                return false;
            }
        }
        if let Some(include) = filter.include_text.as_deref()
            && !include.is_empty()
            && !text.contains(include)
        {
            return false;
        }
        if let Some(exclude) = filter.exclude_text.as_deref()
            && !exclude.is_empty()
            && text.contains(exclude)
        {
            return false;
        }
        if let Some(pattern) = filter.regex_pattern.as_deref()
            && !pattern.is_empty()
        {
            match Regex::new(pattern) {
                Ok(regex) => {
                    if !regex.is_match(text) {
                        return false;
                    }
                }
                Err(e) => {
                    // A filter is an explicit restriction: a broken pattern
                    // rejects the message rather than waving it through.
                    warn!(pattern, "invalid filter regex rejects message: {e}");
                    return false;
                }
            }
        }
    }
    true
}
