use std::{io::IsTerminal, str::FromStr, sync::Once};

use logforth::{append::Stderr, filter::EnvFilter, layout::JsonLayout};

use crate::args::Args;

static INIT: Once = Once::new();

/// Initializes the process-wide logger once. Safe to call multiple times.
pub fn init(args: &Args) {
    let filter = args
        .log_level
        .map(|level| level.env_filter().to_owned())
        .unwrap_or_else(|| "info".to_owned());

    INIT.call_once(move || apply_logger(filter));
}

fn apply_logger(filter: String) {
    logforth::builder()
        .dispatch(move |d| {
            let env_filter =
                EnvFilter::from_str(&filter).unwrap_or_else(|_| EnvFilter::from_str("info").expect("valid filter"));

            if std::io::stderr().is_terminal() {
                d.filter(env_filter).append(Stderr::default())
            } else {
                d.filter(env_filter).append(Stderr::default().with_layout(JsonLayout::default()))
            }
        })
        .apply();
}
