//! Tracing setup shared by both binaries.

use std::env;

use is_terminal::IsTerminal;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

// ---

/// Initialize the global tracing subscriber.
///
/// - Log level: `RUST_LOG` if set, else `ACCUPORT_LOG_LEVEL` (default `info`),
///   with sqlx statement logging held at `warn`
/// - Color: `FORCE_COLOR=1|true|yes` on, `0|false|no` off, otherwise TTY detection
/// - Span events from `ACCUPORT_SPAN_EVENTS`:
///   - `"full"`       : ENTER, EXIT and CLOSE with timing
///   - `"enter_exit"` : ENTER and EXIT only
///   - unset or other values: CLOSE only
///
/// Call once at startup, before any logging.
pub fn init_tracing() {
    // ---
    let span_events = match env::var("ACCUPORT_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stderr().is_terminal(),
    };

    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(format!("{},sqlx::query=warn", log_level(env::var("ACCUPORT_LOG_LEVEL").ok().as_deref())))
    };

    // stdout carries the run summary, logs go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}

fn log_level(requested: Option<&str>) -> &'static str {
    match requested {
        Some("trace") => "trace",
        Some("debug") => "debug",
        Some("warn") => "warn",
        Some("error") => "error",
        _ => "info",
    }
}
