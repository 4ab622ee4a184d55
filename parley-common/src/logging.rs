//! Logging for the parley crates
//!
//! Every event is tagged with the direction it concerns, as an enclosing span
//! named after the category:
//!
//! | Macro | Span | Used for |
//! |---|---|---|
//! | [`incoming!`](crate::incoming) | `incoming` | units received from trading partners |
//! | [`outgoing!`](crate::outgoing) | `outgoing` | units handed to partners or the business application |
//! | [`internal!`](crate::internal) | `internal` | engine lifecycle and bookkeeping |
//!
//! All three default to `TRACE`; pass `level = INFO` (or any other
//! [`tracing::Level`] constant) first to raise it. Hot paths that want
//! structured fields use the plain `tracing` macros instead.

use std::str::FromStr;

use tracing::metadata::{LevelFilter, Metadata};
use tracing_subscriber::{
    Layer, filter::FilterFn, prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt,
};

/// Environment variable holding the level filter
pub const LEVEL_ENV: &str = "LOG_LEVEL";

#[doc(hidden)]
#[macro_export]
macro_rules! categorised {
    ($category:literal, $level:ident, $($msg:expr),*) => {{
        let span = $crate::tracing::span!($crate::tracing::Level::$level, $category);
        let _guard = span.enter();
        $crate::tracing::event!($crate::tracing::Level::$level, $($msg),*)
    }};
}

#[macro_export]
macro_rules! incoming {
    (level = $level:ident, $($msg:expr),*) => {
        $crate::categorised!("incoming", $level, $($msg),*)
    };
    ($($msg:expr),*) => {
        $crate::categorised!("incoming", TRACE, $($msg),*)
    };
}

#[macro_export]
macro_rules! outgoing {
    (level = $level:ident, $($msg:expr),*) => {
        $crate::categorised!("outgoing", $level, $($msg),*)
    };
    ($($msg:expr),*) => {
        $crate::categorised!("outgoing", TRACE, $($msg),*)
    };
}

#[macro_export]
macro_rules! internal {
    (level = $level:ident, $($msg:expr),*) => {
        $crate::categorised!("internal", $level, $($msg),*)
    };
    ($($msg:expr),*) => {
        $crate::categorised!("internal", TRACE, $($msg),*)
    };
}

/// Level filter from a [`LEVEL_ENV`] style value, `default` when absent or
/// unparsable
pub fn level_from(value: Option<&str>, default: LevelFilter) -> LevelFilter {
    let Some(value) = value else {
        return default;
    };

    LevelFilter::from_str(value).unwrap_or_else(|_| {
        eprintln!("Ignoring {LEVEL_ENV}={value}, using {default}");
        default
    })
}

fn is_parley_target(metadata: &Metadata<'_>) -> bool {
    metadata.target().starts_with("parley")
}

/// Install the global subscriber
///
/// Only `parley*` targets are shown. Calling this again keeps the subscriber
/// installed first.
pub fn init() {
    let fallback = if cfg!(debug_assertions) {
        LevelFilter::TRACE
    } else {
        LevelFilter::INFO
    };
    let level = level_from(std::env::var(LEVEL_ENV).ok().as_deref(), fallback);

    let layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_ansi(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
        .with_filter(level)
        .with_filter(FilterFn::new(is_parley_target));

    let _ = tracing_subscriber::Registry::default().with(layer).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_from() {
        assert_eq!(level_from(None, LevelFilter::INFO), LevelFilter::INFO);
        assert_eq!(level_from(Some("debug"), LevelFilter::INFO), LevelFilter::DEBUG);
        assert_eq!(level_from(Some("WARN"), LevelFilter::INFO), LevelFilter::WARN);
        assert_eq!(
            level_from(Some("chatty"), LevelFilter::ERROR),
            LevelFilter::ERROR
        );
    }

    #[test]
    fn test_macros_expand_without_subscriber() {
        let id = "u-1@partner";
        incoming!("Received {id}");
        outgoing!(level = DEBUG, "Delivered {}", id);
        internal!(level = INFO, "Engine ready");
    }
}
