use std::borrow::Cow;

use super::market_name::{
    NormalizedAttributes, RARE_MARKER, SPECIAL_MARKER, SPECIAL_MARKER_DECORATED,
};

/// Separator between item key components.
///
/// Market names already use `" | "` between weapon and finish, so a separator is
/// only ever a `|` with a non-space on at least one side. Components are
/// sanitized so they never contain such a bare `|`.
pub const KEY_SEPARATOR: char = '|';

const STAR_PREFIX: &str = "★ ";
const PHASE_DASH: &str = " – ";

/// Build the technical identity key for a catalog variant.
///
/// Components are `[base, special, rare, wear, phase]` in that order; empty ones
/// are dropped before joining.
pub fn build_item_key(attrs: &NormalizedAttributes) -> String {
    let components: [Cow<'_, str>; 5] = [
        sanitize_component(&attrs.base_name),
        Cow::Borrowed(if attrs.is_special_variant { SPECIAL_MARKER } else { "" }),
        Cow::Borrowed(if attrs.is_rare_variant { RARE_MARKER } else { "" }),
        Cow::Borrowed(attrs.wear_condition.map(|w| w.label()).unwrap_or("")),
        sanitize_component(attrs.phase.as_deref().unwrap_or("")),
    ];

    let mut key = String::new();
    for part in components.iter().filter(|p| !p.is_empty()) {
        if !key.is_empty() {
            key.push(KEY_SEPARATOR);
        }
        key.push_str(part);
    }
    key
}

/// Reconstruct a human readable market name from canonical attributes.
///
/// Special and rare markers are mutually exclusive in display form: the rare
/// prefix is only applied when the special marker is absent.
pub fn build_display_name(attrs: &NormalizedAttributes) -> String {
    let mut name = attrs.base_name.clone();
    if attrs.is_special_variant {
        name = match name.strip_prefix(STAR_PREFIX) {
            Some(rest) => format!("{STAR_PREFIX}{SPECIAL_MARKER_DECORATED} {rest}"),
            None => format!("{SPECIAL_MARKER_DECORATED} {name}"),
        };
    } else if attrs.is_rare_variant {
        name = format!("{RARE_MARKER} {name}");
    }
    if let Some(wear) = attrs.wear_condition {
        name = format!("{name} ({wear})");
    }
    if let Some(phase) = attrs.phase.as_deref() {
        name = format!("{name}{PHASE_DASH}{phase}");
    }
    name
}

/// Trim a component and replace any `|` that is not written as `" | "`.
fn sanitize_component(raw: &str) -> Cow<'_, str> {
    let trimmed = raw.trim();
    if !trimmed.contains(KEY_SEPARATOR) {
        return Cow::Borrowed(trimmed);
    }
    let chars: Vec<char> = trimmed.chars().collect();
    let mut out = String::with_capacity(trimmed.len());
    for (i, &c) in chars.iter().enumerate() {
        let spaced = i > 0
            && chars[i - 1] == ' '
            && chars.get(i + 1).copied() == Some(' ');
        if c == KEY_SEPARATOR && !spaced {
            out.push('/');
        } else {
            out.push(c);
        }
    }
    Cow::Owned(out)
}
