//! Link/keyword replacement.
//!
//! Rules run in id order and compose: the output of one rule is the input
//! of the next. A rule whose regex does not compile is skipped.

use std::sync::LazyLock;

use regex::{NoExpand, Regex, RegexBuilder};
use tracing::warn;

use crate::storage::LinkRule;

/// Markdown-style `[text](url)` span.
static MARKDOWN_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[([^\]]+)\]\(([^)\s]+)\)").unwrap_or_else(|_| unreachable!())
});

/// Placeholder left in the text for a rendered link replacement.
static LINK_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("\u{E000}(\\d+)\u{E001}").unwrap_or_else(|_| unreachable!()));

/// Result of applying the rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenText {
    pub text: String,
    /// `text` is HTML and the donor's entities must not be reused.
    pub rich: bool,
}

/// Applies `rules` to `text`. Never fails.
#[must_use]
pub fn rewrite(text: &str, rules: &[LinkRule]) -> RewrittenText {
    let mut out = text.to_owned();
    let mut rendered: Vec<String> = Vec::new();

    for rule in rules.iter().filter(|r| r.enabled) {
        let Some(matcher) = compile(rule) else {
            continue;
        };
        if !matches(rule, &matcher, &out) {
            continue;
        }

        out = if has_markdown_link(&rule.replacement) {
            let token = format!("\u{E000}{}\u{E001}", rendered.len());
            rendered.push(render_links(&rule.replacement));
            matcher.replace_all(&out, NoExpand(&token)).into_owned()
        } else if rule.regex_body().is_some() {
            matcher.replace_all(&out, rule.replacement.as_str()).into_owned()
        } else {
            matcher
                .replace_all(&out, NoExpand(&rule.replacement))
                .into_owned()
        };
    }

    if rendered.is_empty() {
        return RewrittenText {
            text: out,
            rich: false,
        };
    }

    let escaped = escape_html(&out);
    let text = LINK_TOKEN
        .replace_all(&escaped, |caps: &regex::Captures<'_>| {
            caps[1]
                .parse::<usize>()
                .ok()
                .and_then(|i| rendered.get(i))
                .cloned()
                .unwrap_or_default()
        })
        .into_owned();

    RewrittenText { text, rich: true }
}

fn compile(rule: &LinkRule) -> Option<Regex> {
    let source = match rule.regex_body() {
        Some(body) => body.to_owned(),
        None if rule.pattern.is_empty() => return None,
        None => regex::escape(&rule.pattern),
    };

    match RegexBuilder::new(&source).case_insensitive(true).build() {
        Ok(regex) => Some(regex),
        Err(e) => {
            warn!("Skipping link rule {} with invalid pattern: {}", rule.id, e);
            None
        }
    }
}

fn matches(rule: &LinkRule, matcher: &Regex, text: &str) -> bool {
    if rule.regex_body().is_some() {
        matcher.is_match(text)
    } else {
        text.to_lowercase().contains(&rule.pattern.to_lowercase())
    }
}

fn has_markdown_link(text: &str) -> bool {
    MARKDOWN_LINK.is_match(text)
}

/// Renders a replacement containing markdown links as HTML.
fn render_links(replacement: &str) -> String {
    let mut html = String::with_capacity(replacement.len() + 32);
    let mut last = 0;

    for caps in MARKDOWN_LINK.captures_iter(replacement) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        html.push_str(&escape_html(&replacement[last..whole.start()]));
        html.push_str(&format!(
            "<a href=\"{}\">{}</a>",
            escape_html(&caps[2]),
            escape_html(&caps[1])
        ));
        last = whole.end();
    }
    html.push_str(&escape_html(&replacement[last..]));
    html
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}
