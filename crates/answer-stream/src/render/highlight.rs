use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use syntect::highlighting::ThemeSet;
use syntect::html::{ClassStyle, ClassedHTMLGenerator, css_for_theme_with_class_style};
use syntect::parsing::SyntaxSet;
use syntect::util::LinesWithEndings;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

/// CSS class prefix for highlighted tokens.
const CLASS_STYLE: ClassStyle = ClassStyle::SpacedPrefixed { prefix: "hl-" };

const LIGHT_THEME: &str = "InspiredGitHub";
const DARK_THEME: &str = "base16-ocean.dark";

/// Fence labels highlighted out of the box, mapped to syntax tokens.
const DEFAULT_LANGUAGES: &[(&str, &str)] = &[
    ("javascript", "js"),
    ("js", "js"),
    ("jsx", "js"),
    ("typescript", "js"),
    ("ts", "js"),
    ("tsx", "js"),
    ("python", "py"),
    ("py", "py"),
    ("rust", "rs"),
    ("rs", "rs"),
    ("bash", "sh"),
    ("sh", "sh"),
    ("shell", "sh"),
    ("zsh", "sh"),
    ("json", "json"),
    ("yaml", "yaml"),
    ("yml", "yaml"),
    ("html", "html"),
    ("xml", "xml"),
    ("css", "css"),
    ("sql", "sql"),
    ("go", "go"),
    ("java", "java"),
    ("c", "c"),
    ("cpp", "cpp"),
    ("c++", "cpp"),
    ("markdown", "md"),
    ("md", "md"),
    ("diff", "diff"),
];

/// Turns a code block into highlighted HTML.
pub trait Highlighter: Send + Sync {
    /// Returns highlighted markup for `code`, or `None` when `lang` is not
    /// supported (or the highlighter is not ready). Must not block.
    fn highlight(&self, lang: &str, code: &str) -> Option<String>;
}

/// Highlighter that never highlights.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopHighlighter;

impl Highlighter for NoopHighlighter {
    fn highlight(&self, _lang: &str, _code: &str) -> Option<String> {
        None
    }
}

/// Theme variant for highlight CSS.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThemeMode {
    Light,
    Dark,
}

/// `syntect`-backed highlighter over a fixed, extensible language list.
///
/// Emits class-based markup (`hl-` prefixed), so the page pairs it with
/// [`theme_css`](Self::theme_css).
pub struct SyntectHighlighter {
    syntaxes: SyntaxSet,
    themes: ThemeSet,
    languages: HashMap<String, String>,
}

impl SyntectHighlighter {
    /// Loads the bundled syntaxes and themes. Takes tens of milliseconds;
    /// run it off the async executor.
    pub fn load() -> Self {
        let languages = DEFAULT_LANGUAGES
            .iter()
            .map(|(label, token)| (label.to_string(), token.to_string()))
            .collect();
        Self {
            syntaxes: SyntaxSet::load_defaults_newlines(),
            themes: ThemeSet::load_defaults(),
            languages,
        }
    }

    /// Maps a fence label to a bundled syntax token (extension or name).
    pub fn add_language(&mut self, label: impl Into<String>, token: impl Into<String>) {
        self.languages
            .insert(label.into().to_ascii_lowercase(), token.into());
    }

    /// Whether `lang` is on the language list and resolves to a syntax.
    pub fn supports(&self, lang: &str) -> bool {
        self.languages
            .get(&lang.to_ascii_lowercase())
            .and_then(|token| self.syntaxes.find_syntax_by_token(token))
            .is_some()
    }

    /// Stylesheet for the highlight classes in the given theme.
    pub fn theme_css(&self, mode: ThemeMode) -> Option<String> {
        let name = match mode {
            ThemeMode::Light => LIGHT_THEME,
            ThemeMode::Dark => DARK_THEME,
        };
        let theme = self.themes.themes.get(name)?;
        match css_for_theme_with_class_style(theme, CLASS_STYLE) {
            Ok(css) => Some(css),
            Err(err) => {
                warn!(theme = name, error = %err, "failed to build highlight css");
                None
            }
        }
    }
}

impl Highlighter for SyntectHighlighter {
    fn highlight(&self, lang: &str, code: &str) -> Option<String> {
        let token = self.languages.get(&lang.to_ascii_lowercase())?;
        let syntax = self.syntaxes.find_syntax_by_token(token)?;
        let mut generator =
            ClassedHTMLGenerator::new_with_class_style(syntax, &self.syntaxes, CLASS_STYLE);
        for line in LinesWithEndings::from(code) {
            if let Err(err) = generator.parse_html_for_line_which_includes_newline(line) {
                debug!(lang, error = %err, "highlighting failed; using plain code");
                return None;
            }
        }
        Some(generator.finalize())
    }
}

/// Highlighter loaded once, asynchronously, on first [`warm_up`](Self::warm_up).
///
/// Until loading finishes every call returns `None`, so rendering falls back
/// to plain escaped code instead of waiting.
#[derive(Default)]
pub struct LazyHighlighter {
    inner: OnceCell<Arc<SyntectHighlighter>>,
}

impl LazyHighlighter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the highlighter on the blocking pool. Concurrent and repeated
    /// calls share one load.
    pub async fn warm_up(&self) {
        let loaded = self
            .inner
            .get_or_try_init(|| async {
                tokio::task::spawn_blocking(SyntectHighlighter::load)
                    .await
                    .map(Arc::new)
            })
            .await;
        match loaded {
            Ok(_) => debug!("syntax highlighter ready"),
            Err(err) => warn!(error = %err, "syntax highlighter failed to load"),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.inner.initialized()
    }

    /// Highlight stylesheet, once loaded.
    pub fn theme_css(&self, mode: ThemeMode) -> Option<String> {
        self.inner.get()?.theme_css(mode)
    }
}

impl Highlighter for LazyHighlighter {
    fn highlight(&self, lang: &str, code: &str) -> Option<String> {
        self.inner.get()?.highlight(lang, code)
    }
}

static GLOBAL: Lazy<Arc<LazyHighlighter>> = Lazy::new(|| Arc::new(LazyHighlighter::new()));

/// Process-wide highlighter used by [`render`](super::render).
pub fn global_highlighter() -> Arc<LazyHighlighter> {
    GLOBAL.clone()
}

/// Starts loading the process-wide highlighter and waits for it.
pub async fn warm_up_highlighter() {
    GLOBAL.warm_up().await;
}
