//! A push-style facade that drives an [`EventSource`] on its own task and
//! dispatches events to caller-supplied handlers.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::error::Error;
use crate::event_source::{Event, EventSource, MessageEvent};

/// Handlers invoked by [`Background`] as events arrive. Each is wrapped in
/// `catch_unwind`: a panicking handler is logged and does not bring down
/// the reader task.
pub struct Handlers {
    pub on_open: Option<Box<dyn FnMut() + Send>>,
    pub on_message: Option<Box<dyn for<'a> FnMut(MessageEvent<'a>) + Send>>,
    pub on_comment: Option<Box<dyn FnMut(&str) + Send>>,
    pub on_error: Option<Box<dyn FnMut(&Error) + Send>>,
    pub on_close: Option<Box<dyn FnMut() + Send>>,
}

impl Default for Handlers {
    fn default() -> Self {
        Self {
            on_open: None,
            on_message: None,
            on_comment: None,
            on_error: None,
            on_close: None,
        }
    }
}

/// Runs an [`EventSource`] read loop on a dedicated `tokio` task, calling
/// back into [`Handlers`] as events arrive. Dropping or calling
/// [`Background::shutdown`] stops the task via the shared cancellation
/// token.
pub struct Background {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Background {
    /// Spawns the read loop. `handlers` is shared with the task for the
    /// lifetime of the loop; callers typically build it once up front.
    pub fn spawn(mut source: EventSource, handlers: Arc<Mutex<Handlers>>) -> Self {
        let cancel = source.cancellation_token();
        let task = tokio::spawn(async move {
            loop {
                match source.read_any_event().await {
                    Ok(Event::Started) => {
                        let mut handlers = handlers.lock().await;
                        if let Some(handler) = handlers.on_open.as_mut() {
                            let result = std::panic::catch_unwind(AssertUnwindSafe(|| handler()));
                            if result.is_err() {
                                error!("on_open handler panicked");
                            }
                        }
                    },
                    Ok(Event::Message(msg)) => {
                        let mut handlers = handlers.lock().await;
                        if let Some(handler) = handlers.on_message.as_mut() {
                            let result =
                                std::panic::catch_unwind(AssertUnwindSafe(|| handler(msg)));
                            if result.is_err() {
                                error!("on_message handler panicked");
                            }
                        }
                    },
                    Ok(Event::Comment(comment)) => {
                        let mut handlers = handlers.lock().await;
                        if let Some(handler) = handlers.on_comment.as_mut() {
                            let text = comment.text.clone();
                            let result =
                                std::panic::catch_unwind(AssertUnwindSafe(|| handler(&text)));
                            if result.is_err() {
                                error!("on_comment handler panicked");
                            }
                        }
                    },
                    Ok(Event::SetRetryDelay(_)) => {},
                    Ok(Event::Faulted(error)) => {
                        let mut handlers = handlers.lock().await;
                        if let Some(handler) = handlers.on_error.as_mut() {
                            let result =
                                std::panic::catch_unwind(AssertUnwindSafe(|| handler(&error)));
                            if result.is_err() {
                                error!("on_error handler panicked");
                            }
                        }
                    },
                    Ok(Event::Closed) => {
                        let mut handlers = handlers.lock().await;
                        if let Some(handler) = handlers.on_close.as_mut() {
                            let result = std::panic::catch_unwind(AssertUnwindSafe(|| handler()));
                            if result.is_err() {
                                error!("on_close handler panicked");
                            }
                        }
                    },
                    Err(error @ Error::StreamClosedByCaller) => {
                        warn!(%error, "background read loop stopping");
                        return;
                    },
                    Err(error) => {
                        let mut handlers = handlers.lock().await;
                        if let Some(handler) = handlers.on_error.as_mut() {
                            let result =
                                std::panic::catch_unwind(AssertUnwindSafe(|| handler(&error)));
                            if result.is_err() {
                                error!("on_error handler panicked");
                            }
                        }
                        // A terminal error here means the `EventSource`
                        // itself gave up (error strategy threw, or a fatal
                        // protocol error). Nothing left to read.
                        return;
                    },
                }
            }
        });

        Self {
            cancel,
            task: Some(task),
        }
    }

    /// Requests the read loop stop and waits for the task to finish.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for Background {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
