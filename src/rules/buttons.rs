//! Rendering of the global button rule.

use crate::storage::ButtonRule;
use crate::telegram::{InlineKeyboard, UrlButton};

/// Renders `rule` as a single row of URL buttons.
///
/// Slots beyond the mode's capacity and slots with a blank label or URL are
/// left out. Returns `None` if nothing remains.
#[must_use]
pub fn render(rule: &ButtonRule) -> Option<InlineKeyboard> {
    let buttons: Vec<UrlButton> = rule
        .buttons
        .iter()
        .take(rule.mode.capacity())
        .filter_map(|spec| {
            let (text, url) = (spec.text.trim(), spec.url.trim());
            (!text.is_empty() && !url.is_empty()).then(|| UrlButton::new(text, url))
        })
        .collect();

    (!buttons.is_empty()).then(|| InlineKeyboard::single_row(buttons))
}

/// Markup for a cloned post: the configured rule wins, otherwise the
/// donor's own buttons are kept.
#[must_use]
pub fn resolve_markup(
    rule: Option<&ButtonRule>,
    original: Option<&InlineKeyboard>,
) -> Option<InlineKeyboard> {
    rule.and_then(render)
        .or_else(|| original.filter(|kb| !kb.is_empty()).cloned())
}
