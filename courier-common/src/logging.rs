use std::str::FromStr;

use tracing::metadata::LevelFilter;
use tracing_subscriber::{
    Layer, filter::FilterFn, prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt,
};

use crate::LogBuffer;

#[macro_export]
macro_rules! log {
    ($level:expr, $span:expr, $($msg:tt)*) => {{
        let span = $crate::tracing::span!($level, $span);
        let _enter = span.enter();

        $crate::tracing::event!($level, $($msg)*)
    }};
}

/// Lifecycle events of the relay itself.
#[macro_export]
macro_rules! internal {
    (level = $level:ident, $($msg:tt)*) => {
        $crate::log!($crate::tracing::Level::$level, "internal", $($msg)*)
    };

    ($($msg:tt)*) => {
        $crate::internal!(level = TRACE, $($msg)*)
    };
}

/// Events tied to a single email moving through delivery.
#[macro_export]
macro_rules! delivery {
    (level = $level:ident, $($msg:tt)*) => {
        $crate::log!($crate::tracing::Level::$level, "delivery", $($msg)*)
    };

    ($($msg:tt)*) => {
        $crate::delivery!(level = TRACE, $($msg)*)
    };
}

fn level_from_env() -> LevelFilter {
    let default = if cfg!(debug_assertions) {
        LevelFilter::TRACE
    } else {
        LevelFilter::INFO
    };

    std::env::var("LOG_LEVEL").map_or(default, |level| {
        LevelFilter::from_str(level.as_str()).unwrap_or_else(|_| {
            eprintln!("Invalid log level specified {level}, defaulting to {default}");
            default
        })
    })
}

fn is_courier_target(target: &str) -> bool {
    target.starts_with("courier")
}

/// Install the global subscriber: compact terminal output plus a copy of every
/// event into `buffer` for the log viewer.
pub fn init(buffer: &LogBuffer) {
    let level = level_from_env();

    let result = tracing_subscriber::Registry::default()
        .with(
            tracing_subscriber::fmt::layer()
                .with_file(false)
                .with_line_number(false)
                .compact()
                .with_ansi(true)
                .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
                .with_filter(level)
                .with_filter(FilterFn::new(|metadata| {
                    is_courier_target(metadata.target())
                })),
        )
        .with(
            buffer
                .layer()
                .with_filter(level)
                .with_filter(FilterFn::new(|metadata| {
                    is_courier_target(metadata.target())
                })),
        )
        .try_init();

    if let Err(e) = result {
        eprintln!("Logging already initialised: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_filter() {
        assert!(is_courier_target("courier_delivery::engine"));
        assert!(is_courier_target("courier"));
        assert!(!is_courier_target("hyper::proto"));
        assert!(!is_courier_target("lettre"));
    }
}
