use std::collections::{HashMap, HashSet};

use ammonia::{Builder, UrlRelative};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use super::SanitizedHtml;

const ALLOWED_TAGS: &[&str] = &[
    "a", "blockquote", "br", "button", "code", "del", "div", "em", "h1", "h2", "h3", "h4", "h5",
    "h6", "hr", "img", "li", "ol", "p", "pre", "s", "span", "strong", "sub", "sup", "table",
    "tbody", "td", "th", "thead", "tr", "ul",
];

/// Elements removed together with their content.
const CLEAN_CONTENT_TAGS: &[&str] = &[
    "script", "style", "iframe", "object", "embed", "noscript", "textarea", "select",
];

const EXTERNAL_LINK_ATTRS: &str = " rel=\"noopener noreferrer\" target=\"_blank\"";

static SANITIZER: Lazy<Builder<'static>> = Lazy::new(|| {
    // `rel` and `target` are not allowed through; the link policy sets them.
    let tag_attributes = HashMap::from([
        ("a", HashSet::from(["href", "title"])),
        ("button", HashSet::from(["type", "data-code", "aria-label"])),
        ("img", HashSet::from(["src", "alt", "title"])),
        ("ol", HashSet::from(["start"])),
    ]);

    let mut builder = Builder::empty();
    builder
        .tags(ALLOWED_TAGS.iter().copied().collect())
        .clean_content_tags(CLEAN_CONTENT_TAGS.iter().copied().collect())
        .generic_attributes(HashSet::from(["class"]))
        .tag_attributes(tag_attributes)
        .url_schemes(HashSet::from(["http", "https", "mailto"]))
        .url_relative(UrlRelative::PassThrough)
        .link_rel(None)
        .strip_comments(true);
    builder
});

// Serialized attribute values never contain a raw `"`, `<`, or `>`.
static ANCHOR_OPEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<a(\s[^>]*)?>").expect("anchor pattern"));
static HREF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\shref="([^"]*)""#).expect("href pattern"));

/// Cleans an HTML fragment against a fixed allow-list.
///
/// Scripts, styles, frames, forms, inputs, and every `on*` handler are
/// removed; links keep only `http`, `https`, `mailto`, or relative targets.
/// Every anchor then gets the link policy: absolute `http(s)` links open in
/// a new browsing context with `rel="noopener noreferrer"`, all others
/// carry neither attribute. Applying it to its own output changes nothing.
pub fn sanitize(html: &str) -> SanitizedHtml {
    let clean = SANITIZER.clean(html).to_string();
    SanitizedHtml(apply_link_policy(clean))
}

fn apply_link_policy(html: String) -> String {
    if !html.contains("<a") {
        return html;
    }
    ANCHOR_OPEN
        .replace_all(&html, |caps: &Captures<'_>| {
            let attrs = caps.get(1).map_or("", |m| m.as_str());
            let external = HREF
                .captures(attrs)
                .and_then(|href| href.get(1))
                .is_some_and(|href| is_external(href.as_str()));
            if external {
                format!("<a{attrs}{EXTERNAL_LINK_ATTRS}>")
            } else {
                format!("<a{attrs}>")
            }
        })
        .into_owned()
}

/// Absolute `http(s)` URL, or a scheme-relative one that leaves the page.
fn is_external(url: &str) -> bool {
    let lower = url.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("//")
}
