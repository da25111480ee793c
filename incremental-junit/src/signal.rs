// Copyright (c) The incremental-junit Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Flushing the report when the process is interrupted.
//!
//! On Unix, the standard handler watches for SIGINT and SIGTERM on a dedicated thread. When one
//! arrives, the registered callback runs (this is where the terminal merge happens), then the
//! signal is re-delivered with its default disposition so the process exits the way its parent
//! expects.

use crate::errors::SignalHandlerSetupError;

/// The kind of signal handling to set up for a session.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum SignalHandlerKind {
    /// The standard signal handler. Merge on interrupt and termination signals, where supported
    /// by the platform.
    Standard,

    /// A no-op signal handler. Useful for tests, and for hosts that manage signals themselves.
    Noop,
}

impl SignalHandlerKind {
    pub(crate) fn install<F>(self, on_signal: F) -> Result<SignalHandler, SignalHandlerSetupError>
    where
        F: Fn(ShutdownSignal) + Send + 'static,
    {
        match self {
            Self::Standard => SignalHandler::new(on_signal, Redeliver::Yes),
            Self::Noop => Ok(SignalHandler::noop()),
        }
    }
}

/// A signal asking the process to shut down.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ShutdownSignal {
    /// SIGINT, e.g. Ctrl-C.
    Interrupt,

    /// SIGTERM.
    Term,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Redeliver {
    Yes,
    #[cfg_attr(not(all(test, unix)), allow(dead_code))]
    No,
}

/// A running signal watcher. The watcher stops when this is dropped.
#[derive(Debug)]
pub(crate) struct SignalHandler {
    watcher: Option<imp::Watcher>,
}

impl SignalHandler {
    fn new<F>(on_signal: F, redeliver: Redeliver) -> Result<Self, SignalHandlerSetupError>
    where
        F: Fn(ShutdownSignal) + Send + 'static,
    {
        let watcher = imp::Watcher::new(on_signal, redeliver)?;
        Ok(Self { watcher })
    }

    pub(crate) fn noop() -> Self {
        Self { watcher: None }
    }

    #[cfg(test)]
    pub(crate) fn is_active(&self) -> bool {
        self.watcher.is_some()
    }
}

#[cfg(unix)]
mod imp {
    use super::*;
    use signal_hook::{
        consts::{SIGINT, SIGTERM},
        iterator::{Handle, Signals},
        low_level,
    };
    use std::thread::JoinHandle;
    use tracing::{debug, warn};

    #[derive(Debug)]
    pub(super) struct Watcher {
        handle: Handle,
        thread: Option<JoinHandle<()>>,
    }

    impl Watcher {
        pub(super) fn new<F>(
            on_signal: F,
            redeliver: Redeliver,
        ) -> Result<Option<Self>, SignalHandlerSetupError>
        where
            F: Fn(ShutdownSignal) + Send + 'static,
        {
            let mut signals = Signals::new([SIGINT, SIGTERM])?;
            let handle = signals.handle();

            let thread = std::thread::Builder::new()
                .name("incremental-junit-signals".to_owned())
                .spawn(move || {
                    for signal in signals.forever() {
                        let shutdown = match signal {
                            SIGINT => ShutdownSignal::Interrupt,
                            _ => ShutdownSignal::Term,
                        };
                        debug!(?shutdown, "received shutdown signal");
                        on_signal(shutdown);

                        if redeliver == Redeliver::Yes
                            && let Err(error) = low_level::emulate_default_handler(signal)
                        {
                            warn!(signal, %error, "failed to re-deliver signal");
                        }
                    }
                })?;

            Ok(Some(Self {
                handle,
                thread: Some(thread),
            }))
        }
    }

    impl Drop for Watcher {
        fn drop(&mut self) {
            self.handle.close();
            if let Some(thread) = self.thread.take() {
                // Don't join from the watcher itself, e.g. if the callback dropped the session.
                if thread.thread().id() != std::thread::current().id() {
                    let _ = thread.join();
                }
            }
        }
    }
}

#[cfg(not(unix))]
mod imp {
    use super::*;

    #[derive(Debug)]
    pub(super) struct Watcher {}

    impl Watcher {
        pub(super) fn new<F>(
            _on_signal: F,
            _redeliver: Redeliver,
        ) -> Result<Option<Self>, SignalHandlerSetupError>
        where
            F: Fn(ShutdownSignal) + Send + 'static,
        {
            tracing::debug!("signal-triggered merges are not supported on this platform");
            Ok(None)
        }
    }
}
