mod args;
mod util;

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use sse_client::event_source::{Event, MessageData};
use sse_client::{Config, EventSource};
use tokio::{select, signal};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};

use crate::args::Args;
use crate::util::truncate_for_log;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    if args.debug {
        tracing_subscriber::fmt()
            .with_max_level(Level::TRACE)
            .init();
    } else {
        tracing_subscriber::fmt().json().init();
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(error) = signal::ctrl_c().await {
                warn!(%error, "something strange with ctrl-c handling!");
            }
            cancel.cancel();
        });
    }

    match run(args, cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(%error, "encountered runtime error");
            ExitCode::FAILURE
        },
    }
}

async fn run(args: Args, cancel: CancellationToken) -> Result<()> {
    // The library default (`AlwaysThrow`) stops at the first error; a tail
    // command is more useful if it keeps reconnecting until the user hits
    // ctrl-c, so pick `AlwaysContinue` here instead.
    let mut builder = Config::builder(args.url.clone())
        .initial_retry_delay(args.initial_retry_delay())
        .max_retry_delay(args.max_retry_delay())
        .error_strategy(sse_client::error_strategy::AlwaysContinue);

    // Leave the library's own default (5 minutes) in place unless the
    // caller asked for something else.
    if let Some(timeout) = args.read_timeout() {
        builder = builder.read_timeout(Some(timeout));
    }

    if let Some(id) = &args.last_event_id {
        builder = builder.last_event_id(id.clone());
    }

    let config = builder.build().context("building event source config")?;
    let mut source = EventSource::with_cancellation(config, cancel.clone());

    info!(url = %args.url, "connecting");

    loop {
        let event = select! {
            event = source.read_any_event() => event,
            _ = cancel.cancelled() => return Ok(()),
        };

        match event {
            Ok(Event::Started) => {
                info!("connected");
            },
            Ok(Event::Message(msg)) => {
                let name = msg.name.clone();
                match msg.data {
                    MessageData::Buffered(data) => {
                        println!("[{name}] {}", truncate_for_log(&data, 2000));
                    },
                    MessageData::Streaming(reader) => {
                        let data = reader
                            .read_to_string()
                            .await
                            .context("reading streamed message body")?;
                        println!("[{name}] {}", truncate_for_log(&data, 2000));
                    },
                }
            },
            Ok(Event::Comment(comment)) => {
                info!(text = %comment.text, "comment");
            },
            Ok(Event::SetRetryDelay(ev)) => {
                info!(delay_ms = ev.delay_ms, "server requested a new retry delay");
            },
            Ok(Event::Faulted(error)) => {
                warn!(%error, "connection faulted, reconnecting");
            },
            Ok(Event::Closed) => {
                info!("connection closed, will retry");
            },
            Err(error) => return Err(error.into()),
        }
    }
}
