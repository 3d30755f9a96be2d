use std::time::Duration;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(about, long_about = None, version)]
pub(crate) struct Args {
    /// URL of the event stream to connect to.
    pub(crate) url: String,
    /// Initial delay before the first reconnect attempt, in milliseconds.
    #[arg(long, default_value_t = 500)]
    pub(crate) initial_retry_delay_ms: u64,
    /// Upper bound on the reconnect delay, in milliseconds.
    #[arg(long, default_value_t = 30_000)]
    pub(crate) max_retry_delay_ms: u64,
    /// Abandons the connection if no bytes arrive for this many seconds.
    #[arg(long)]
    pub(crate) read_timeout_secs: Option<u64>,
    /// Resumes from this `Last-Event-ID` instead of starting fresh.
    #[arg(long)]
    pub(crate) last_event_id: Option<String>,
    /// Enables human-friendly logging.
    #[arg(short, long, default_value_t)]
    pub(crate) debug: bool,
}

impl Args {
    pub(crate) fn initial_retry_delay(&self) -> Duration {
        Duration::from_millis(self.initial_retry_delay_ms)
    }

    pub(crate) fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }

    pub(crate) fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_secs.map(Duration::from_secs)
    }
}
