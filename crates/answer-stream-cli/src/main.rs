//! Follow one live answer stream: Stage-1 progress goes to stderr as it
//! arrives, the finished answer is printed to stdout as sanitized HTML.

use std::time::Duration;

use anyhow::{Context as _, bail};
use answer_stream::observability::init_observability;
use answer_stream::render::{ThemeMode, global_highlighter, warm_up_highlighter};
use answer_stream::{SessionSnapshot, SessionState, StreamConfig, StreamSessionManager, render};
use clap::{Parser, ValueEnum};
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "answer-stream", version, about)]
struct Args {
    /// Stream URL returned by the chat API for a message.
    url: String,

    /// Error out when nothing but heartbeats arrives for this many seconds (0 disables).
    #[arg(long)]
    idle_timeout_secs: Option<u64>,

    /// Connect timeout in seconds.
    #[arg(long)]
    connect_timeout_secs: Option<u64>,

    /// Print the answer as received Markdown instead of HTML.
    #[arg(long)]
    markdown: bool,

    /// Do not echo Stage-1 progress lines.
    #[arg(long, short)]
    quiet: bool,

    /// Print the highlight stylesheet for this theme before the answer.
    #[arg(long, value_enum)]
    css: Option<Theme>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Theme {
    Light,
    Dark,
}

impl From<Theme> for ThemeMode {
    fn from(theme: Theme) -> Self {
        match theme {
            Theme::Light => ThemeMode::Light,
            Theme::Dark => ThemeMode::Dark,
        }
    }
}

fn load_env() {
    let _ = dotenvy::from_path(format!("{}/.env", env!("CARGO_MANIFEST_DIR")));
    dotenvy::dotenv().ok();
}

fn build_config(args: &Args) -> anyhow::Result<StreamConfig> {
    let mut config = StreamConfig::from_env().context("invalid ANSWER_STREAM_* setting")?;
    if let Some(secs) = args.idle_timeout_secs {
        config = config.idle_timeout((secs > 0).then(|| Duration::from_secs(secs)));
    }
    if let Some(secs) = args.connect_timeout_secs {
        if secs == 0 {
            bail!("--connect-timeout-secs must be greater than 0");
        }
        config = config.connect_timeout(Duration::from_secs(secs));
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_env();
    let args = Args::parse();
    init_observability();

    let warm_up = tokio::spawn(warm_up_highlighter());
    let config = build_config(&args)?;
    debug!(?config, "stream config");

    let manager = StreamSessionManager::builder()
        .config(config)
        .build()
        .context("failed to set up the stream transport")?;
    let mut updates = manager.subscribe();
    manager.connect(&args.url);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut echoed = 0;
    loop {
        {
            let session = updates.borrow_and_update();
            let snapshot = session.snapshot();
            if !args.quiet {
                echoed = echo_stage1(snapshot, echoed);
            }
            if snapshot.state().is_terminal() {
                break;
            }
        }
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = &mut ctrl_c => {
                manager.cancel();
                eprintln!("cancelled");
                break;
            }
        }
    }

    if let Err(err) = warm_up.await {
        debug!(error = %err, "highlighter warm-up task failed");
    }

    let snapshot = manager.snapshot();
    if let Some(theme) = args.css
        && !args.markdown
        && let Some(css) = global_highlighter().theme_css(theme.into())
    {
        println!("<style>\n{css}</style>");
    }
    match snapshot.state() {
        SessionState::Completed | SessionState::Cancelled => {
            print_answer(&snapshot, args.markdown);
            print_summary(&snapshot);
            Ok(())
        }
        SessionState::Errored => {
            let message = snapshot.error().unwrap_or("answer stream failed");
            bail!("{message}")
        }
        SessionState::Idle | SessionState::Connecting | SessionState::Streaming => {
            bail!("answer stream ended unexpectedly")
        }
    }
}

/// Prints Stage-1 lines not yet shown and returns how many have been
/// appended so far.
fn echo_stage1(snapshot: &SessionSnapshot, echoed: usize) -> usize {
    for line in snapshot.stage1_since(echoed) {
        eprintln!("  {line}");
    }
    snapshot.stage1_appended()
}

fn print_answer(snapshot: &SessionSnapshot, markdown: bool) {
    if markdown {
        println!("{}", snapshot.content());
    } else {
        println!("{}", render(snapshot.content(), false));
    }
}

fn print_summary(snapshot: &SessionSnapshot) {
    let Some(metadata) = snapshot.metadata() else {
        return;
    };
    let mut parts = Vec::new();
    if let Some(tokens) = metadata.total_tokens() {
        parts.push(format!("{tokens} tokens"));
    }
    if let Some(ms) = metadata.duration_ms {
        parts.push(format!("{:.1}s", ms as f64 / 1000.0));
    }
    if let Some(cost) = metadata.cost_usd {
        parts.push(format!("${cost:.4}"));
    }
    if !metadata.citations.is_empty() {
        parts.push(format!("{} sources", metadata.citations.len()));
    }
    if !parts.is_empty() {
        eprintln!("[{}]", parts.join(", "));
    }
}
