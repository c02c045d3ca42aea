//! Link classification: raw references → channel locators.
//!
//! Pure parsing, no network access. Every input either yields a [`Locator`]
//! or `None`; nothing here panics on malformed text.

use url::Url;

use crate::types::{ChannelId, Locator};

const SHORT_LINK_HOST: &str = "t.me";
const CANONICAL_HOST: &str = "telegram.me";
const SHORT_LINK_PREFIX: &str = "t.me/";

/// Web-preview path prefix (`t.me/s/<name>`)
const PREVIEW_SEGMENT: &str = "s";
/// Legacy private invite path (`t.me/joinchat/<hash>`)
const INVITE_SEGMENT: &str = "joinchat";

/// A reference as found in content, before classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawReference {
    /// Already-numeric channel id (forward origin)
    ChannelId(ChannelId),
    /// Mention text, absolute URL, or bare `t.me/...` path
    Text(String),
}

/// Classify a raw reference.
pub fn classify(reference: &RawReference) -> Option<Locator> {
    match reference {
        RawReference::ChannelId(id) => Some(Locator::Id(*id)),
        RawReference::Text(text) => classify_text(text),
    }
}

/// Classify a free-form text span.
///
/// Priority: `@username`, then absolute `t.me`/`telegram.me` URL, then bare
/// `t.me/` path.
pub fn classify_text(text: &str) -> Option<Locator> {
    let text = text.trim();

    if let Some(name) = text.strip_prefix('@') {
        return username_locator(name);
    }

    if starts_with_ignore_case(text, "http://") || starts_with_ignore_case(text, "https://") {
        return classify_url(text);
    }

    if starts_with_ignore_case(text, SHORT_LINK_PREFIX) {
        return classify_url(&format!("https://{}", text));
    }

    None
}

/// Parse a user-supplied channel reference (config, CLI, API).
///
/// Accepts everything [`classify_text`] does plus plain numeric ids and
/// bare usernames.
pub fn parse_locator(input: &str) -> Option<Locator> {
    let input = input.trim();
    if let Ok(id) = input.parse::<i64>() {
        return Some(Locator::Id(ChannelId(id)));
    }
    classify_text(input).or_else(|| username_locator(input))
}

fn classify_url(raw: &str) -> Option<Locator> {
    let url = Url::parse(raw).ok()?;

    let host = url.host_str()?.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    if host != SHORT_LINK_HOST && host != CANONICAL_HOST {
        return None;
    }

    let mut segments = url.path_segments()?.filter(|s| !s.is_empty());
    let first = segments.next()?;
    let name = if first == PREVIEW_SEGMENT {
        segments.next()?
    } else {
        first
    };

    if name.eq_ignore_ascii_case(INVITE_SEGMENT) {
        return None;
    }

    username_locator(name)
}

fn username_locator(name: &str) -> Option<Locator> {
    let valid = !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    valid.then(|| Locator::Username(name.to_string()))
}

fn starts_with_ignore_case(text: &str, prefix: &str) -> bool {
    text.len() >= prefix.len()
        && text.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}
