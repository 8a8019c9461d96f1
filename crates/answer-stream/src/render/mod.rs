//! Markdown to sanitized HTML for the primary answer region.
//!
//! The pipeline is: optional live repair, `pulldown-cmark` parsing with code
//! block substitution and sources-section isolation, then allow-list
//! sanitization, which also applies the link policy. Rendering never fails;
//! degenerate input yields whatever the parser makes of it.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use pulldown_cmark::{CodeBlockKind, CowStr, Event, Options, Parser, Tag, TagEnd};
use pulldown_cmark_escape::{escape_html, escape_html_body_text};
use regex::Regex;

mod highlight;
mod sanitizer;

pub use highlight::{
    Highlighter, LazyHighlighter, NoopHighlighter, SyntectHighlighter, ThemeMode,
    global_highlighter, warm_up_highlighter,
};
pub use sanitizer::sanitize;

const SOURCES_OPEN: &str = "<div class=\"sources-section\">\n";
const SOURCES_CLOSE: &str = "</div>\n";

static SOURCES_TITLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?:sources|references)\s*:?\s*$").expect("sources title pattern")
});

static DEFAULT_RENDERER: Lazy<Renderer> = Lazy::new(Renderer::default);

/// HTML that has passed the allow-list sanitizer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct SanitizedHtml(String);

impl SanitizedHtml {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<str> for SanitizedHtml {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SanitizedHtml {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Renders answer Markdown with an injected code highlighter.
#[derive(Clone)]
pub struct Renderer {
    highlighter: Arc<dyn Highlighter>,
}

impl Default for Renderer {
    /// Uses the process-wide lazily loaded highlighter.
    fn default() -> Self {
        Self::new(global_highlighter())
    }
}

impl Renderer {
    pub fn new(highlighter: Arc<dyn Highlighter>) -> Self {
        Self { highlighter }
    }

    /// Renderer that never highlights code.
    pub fn plain() -> Self {
        Self::new(Arc::new(NoopHighlighter))
    }

    /// Renders `source` to sanitized HTML.
    ///
    /// With `is_live` set, an unterminated code fence is closed first so a
    /// partial answer does not turn the rest of the document into code.
    pub fn render(&self, source: &str, is_live: bool) -> SanitizedHtml {
        if source.trim().is_empty() {
            return SanitizedHtml::default();
        }
        let source = if is_live {
            repair_unclosed_fence(source)
        } else {
            Cow::Borrowed(source)
        };
        sanitize(&self.markdown_to_html(&source))
    }

    fn markdown_to_html(&self, source: &str) -> String {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_STRIKETHROUGH);

        let mut events: Vec<Event<'_>> = Vec::new();
        let mut code_block: Option<(Option<String>, String)> = None;

        for event in Parser::new_ext(source, options) {
            if let Some((_, body)) = code_block.as_mut() {
                match event {
                    Event::Text(text) => body.push_str(&text),
                    Event::End(TagEnd::CodeBlock) => {
                        if let Some((lang, body)) = code_block.take() {
                            events.push(Event::Html(CowStr::from(
                                self.code_block_html(lang.as_deref(), &body),
                            )));
                        }
                    }
                    _ => {}
                }
                continue;
            }
            match event {
                Event::Start(Tag::CodeBlock(kind)) => {
                    let lang = match kind {
                        CodeBlockKind::Fenced(info) => {
                            info.split_whitespace().next().map(clean_language)
                        }
                        CodeBlockKind::Indented => None,
                    };
                    code_block = Some((lang.filter(|l| !l.is_empty()), String::new()));
                }
                other => events.push(other),
            }
        }

        if let Some(start) = sources_section_start(&events) {
            events.insert(start, Event::Html(CowStr::Borrowed(SOURCES_OPEN)));
            events.push(Event::Html(CowStr::Borrowed(SOURCES_CLOSE)));
        }

        let mut html = String::with_capacity(source.len() * 3 / 2);
        pulldown_cmark::html::push_html(&mut html, events.into_iter());
        html
    }

    fn code_block_html(&self, lang: Option<&str>, code: &str) -> String {
        let body = lang
            .and_then(|lang| self.highlighter.highlight(lang, code))
            .unwrap_or_else(|| escape_text(code));
        let label = lang.unwrap_or("text");
        let code_class = lang
            .map(|lang| format!(" class=\"language-{lang}\""))
            .unwrap_or_default();
        format!(
            "<div class=\"code-block\"><div class=\"code-block-header\">\
             <span class=\"code-block-lang\">{label}</span>\
             <button type=\"button\" class=\"code-copy\" aria-label=\"Copy code\" data-code=\"{data}\">Copy</button>\
             </div><pre><code{code_class}>{body}</code></pre></div>\n",
            data = escape_attribute(code),
        )
    }
}

/// Renders with the process-wide renderer. Code is highlighted once
/// [`warm_up_highlighter`] has finished; before that it is shown plain.
pub fn render(source: &str, is_live: bool) -> SanitizedHtml {
    DEFAULT_RENDERER.render(source, is_live)
}

/// Closes a backtick code fence left open at the end of `source`.
///
/// Fences are tracked the way CommonMark opens and closes them: a run of
/// three or more backticks indented at most three spaces, closed by a run at
/// least as long. The appended fence matches the opener's length. Fences
/// nested in block quotes or list items are not tracked, and unbalanced
/// emphasis or links are left to the parser.
pub fn repair_unclosed_fence(source: &str) -> Cow<'_, str> {
    let mut open: Option<usize> = None;
    for line in source.lines() {
        let Some((run, rest)) = backtick_fence(line) else {
            continue;
        };
        match open {
            None if !rest.contains('`') => open = Some(run),
            Some(len) if run >= len && rest.trim().is_empty() => open = None,
            _ => {}
        }
    }
    let Some(len) = open else {
        return Cow::Borrowed(source);
    };
    let mut repaired = String::with_capacity(source.len() + len + 2);
    repaired.push_str(source);
    if !source.ends_with('\n') {
        repaired.push('\n');
    }
    repaired.extend(std::iter::repeat_n('`', len));
    repaired.push('\n');
    Cow::Owned(repaired)
}

/// Backtick run length and the text after it, for a line that can open or
/// close a fence.
fn backtick_fence(line: &str) -> Option<(usize, &str)> {
    let body = line.trim_start_matches(' ');
    if line.len() - body.len() > 3 {
        return None;
    }
    let rest = body.trim_start_matches('`');
    let run = body.len() - rest.len();
    (run >= 3).then_some((run, rest))
}

/// Index of the last heading event when it is a top-level "Sources" or
/// "References" heading. A heading inside a quote or list never starts the
/// section, so the wrapper always nests cleanly.
fn sources_section_start(events: &[Event<'_>]) -> Option<usize> {
    let mut depth = 0_usize;
    let mut in_heading = false;
    let mut last: Option<(usize, bool, String)> = None;
    for (index, event) in events.iter().enumerate() {
        match event {
            Event::Start(tag) => {
                if matches!(tag, Tag::Heading { .. }) {
                    in_heading = true;
                    last = Some((index, depth == 0, String::new()));
                }
                depth += 1;
            }
            Event::End(tag) => {
                depth = depth.saturating_sub(1);
                if matches!(tag, TagEnd::Heading(_)) {
                    in_heading = false;
                }
            }
            Event::Text(text) | Event::Code(text) if in_heading => {
                if let Some((_, _, title)) = last.as_mut() {
                    title.push_str(text);
                }
            }
            _ => {}
        }
    }
    let (index, top_level, title) = last?;
    (top_level && SOURCES_TITLE.is_match(&title)).then_some(index)
}

fn clean_language(label: &str) -> String {
    label
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '#' | '.' | '_'))
        .collect::<String>()
        .to_ascii_lowercase()
}

fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    // Writing into a String cannot fail.
    let _ = escape_html_body_text(&mut out, text);
    out
}

fn escape_attribute(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let _ = escape_html(&mut out, text);
    out
}
