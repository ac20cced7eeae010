use std::collections::HashMap;
use std::path::PathBuf;

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use tracing::warn;

use super::filters::{MediaKind, classify_media, parse_media_type_set};
use crate::db::{TransformAction, TransformRule};
use crate::telegram::ChatEvent;

static TEMPLATE_TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([a-zA-Z_][a-zA-Z0-9_]*)\s*\}\}").expect("valid template token regex")
});

/// Values available to `{{identifier}}` template tokens. The running `text`
/// value is injected at render time so templates can chain after earlier
/// transforms.
#[derive(Debug, Clone, Default)]
pub struct TransformContext {
    values: HashMap<String, String>,
}

impl TransformContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_string(), value.into());
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

fn render_template(template: &str, context: &TransformContext, current_text: &str) -> String {
    TEMPLATE_TOKEN_RE
        .replace_all(template, |captures: &regex::Captures<'_>| {
            let key = &captures[1];
            if key == "text" {
                current_text.to_string()
            } else {
                // Missing keys render as empty, never as an error.
                context.get(key).unwrap_or_default().to_string()
            }
        })
        .into_owned()
}

fn rule_applies_to(scope: Option<&str>, media: MediaKind) -> bool {
    let Some(scope) = scope else {
        return true;
    };
    let allowed = parse_media_type_set(scope);
    if allowed.is_empty() {
        return true;
    }
    allowed.contains(media.as_str())
        || allowed.contains("any")
        || allowed.contains("all")
        || allowed.contains("*")
}

fn build_regex(pattern: &str, flags: Option<&str>) -> Result<Regex, regex::Error> {
    let flags = flags.unwrap_or_default().to_lowercase();
    RegexBuilder::new(pattern)
        .case_insensitive(flags.contains('i'))
        .multi_line(flags.contains('m'))
        .dot_matches_new_line(flags.contains('s'))
        .build()
}

/// Ordered by priority ascending, id ascending; the caller's snapshot order
/// does not matter.
fn ordered<'a>(transforms: &'a [TransformRule]) -> Vec<&'a TransformRule> {
    let mut rules: Vec<&TransformRule> = transforms.iter().collect();
    rules.sort_by_key(|rule| (rule.priority, rule.id));
    rules
}

/// Run the text-producing transforms over `text`. Media-kind rules are
/// handled separately by [`pick_media_replacement`]. A malformed regex skips
/// that single rule; it never aborts the pipeline.
pub fn apply_transforms(
    text: &str,
    transforms: &[TransformRule],
    context: &TransformContext,
    media: MediaKind,
) -> String {
    let mut output = text.to_string();
    for rule in ordered(transforms) {
        if !rule.enabled {
            continue;
        }
        if !rule_applies_to(rule.apply_to_media_types.as_deref(), media) {
            continue;
        }
        match &rule.action {
            TransformAction::Text { find, replace } | TransformAction::Emoji { find, replace } => {
                if let Some(find) = find.as_deref()
                    && !find.is_empty()
                {
                    output = output.replace(find, replace);
                }
            }
            TransformAction::Regex {
                pattern,
                flags,
                replace,
            } => match build_regex(pattern, flags.as_deref()) {
                Ok(regex) => {
                    output = regex.replace_all(&output, replace.as_str()).into_owned();
                }
                Err(e) => {
                    warn!(
                        rule_id = rule.id,
                        pattern, "invalid regex transform skipped: {e}"
                    );
                }
            },
            TransformAction::Template { template } => {
                output = render_template(template, context, &output);
            }
            TransformAction::Media { .. } => {}
        }
    }
    output
}

/// First enabled media-kind rule (in priority order) whose scope matches the
/// incoming media class. Only messages that themselves carry displayable
/// media are eligible; link previews keep their original rendering.
pub fn pick_media_replacement(event: &ChatEvent, transforms: &[TransformRule]) -> Option<PathBuf> {
    let has_displayable_media = event
        .media
        .as_ref()
        .is_some_and(|media| media.is_displayable());
    if !has_displayable_media {
        return None;
    }

    let media = classify_media(event);
    for rule in ordered(transforms) {
        if !rule.enabled {
            continue;
        }
        if let TransformAction::Media { asset_path } = &rule.action
            && rule_applies_to(rule.apply_to_media_types.as_deref(), media)
            && !asset_path.is_empty()
        {
            return Some(PathBuf::from(asset_path));
        }
    }
    None
}
