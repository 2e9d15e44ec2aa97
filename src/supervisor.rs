//! Connection supervisor: logs in until it succeeds, then feeds the dispatcher.
//!
//! State moves `Disconnected -> Connecting -> Connected`, falling back to
//! `Disconnected` after each failed attempt. There is no attempt limit.
//! Authentication and network failures are retried alike. Only the supervisor
//! holds the state sender; everyone else gets a read-only receiver.

use crate::config::RetryConfig;
use crate::dispatch::Dispatcher;
use crate::messaging::traits::{InboundStream, Messaging};

use futures::StreamExt as _;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Platform session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// Delay schedule between login attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Warn once every this many failed attempts; the rest log at debug.
    pub warn_every: u64,
}

impl RetryPolicy {
    /// Same delay before every retry.
    pub fn fixed(delay: Duration, warn_every: u64) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            backoff_factor: 1.0,
            warn_every: warn_every.max(1),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            initial_delay: Duration::from_secs(config.delay_secs),
            max_delay: Duration::from_secs(config.max_delay_secs),
            backoff_factor: config.backoff_factor,
            warn_every: config.warn_every.max(1),
        }
    }

    /// Delay after the `failures`-th consecutive failure (1-based).
    pub fn delay_for(&self, failures: u64) -> Duration {
        let exponent = failures.saturating_sub(1).min(i32::MAX as u64) as i32;
        let scaled = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        if !scaled.is_finite() || scaled >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(scaled)
        }
    }

    pub fn should_warn(&self, failures: u64) -> bool {
        failures % self.warn_every == 0
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(5), 120)
    }
}

/// Owns the platform session for the lifetime of the process.
pub struct Supervisor<M: Messaging> {
    adapter: Arc<M>,
    policy: RetryPolicy,
    state_tx: watch::Sender<ConnectionState>,
}

impl<M: Messaging> Supervisor<M> {
    pub fn new(adapter: Arc<M>, policy: RetryPolicy) -> Self {
        let (state_tx, _state_rx) = watch::channel(ConnectionState::Disconnected);
        Self {
            adapter,
            policy,
            state_tx,
        }
    }

    /// Read-only view of the connection state.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn current_state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn transition(&self, next: ConnectionState) {
        let previous = self.state_tx.send_replace(next);
        if previous != next {
            tracing::debug!(from = %previous, to = %next, "connection state changed");
        }
    }

    /// Log in, retrying forever, and return the inbound stream.
    pub async fn connect(&self) -> InboundStream {
        let mut failures: u64 = 0;

        loop {
            self.transition(ConnectionState::Connecting);

            match Messaging::start(self.adapter.as_ref()).await {
                Ok(stream) => {
                    self.transition(ConnectionState::Connected);
                    tracing::info!(
                        adapter = Messaging::name(self.adapter.as_ref()),
                        attempts = failures + 1,
                        "connected"
                    );
                    return stream;
                }
                Err(error) => {
                    failures += 1;
                    self.transition(ConnectionState::Disconnected);

                    let delay = self.policy.delay_for(failures);
                    if self.policy.should_warn(failures) {
                        tracing::warn!(
                            attempt = failures,
                            %error,
                            retry_in_secs = delay.as_secs_f64(),
                            "still unable to connect"
                        );
                    } else {
                        tracing::debug!(
                            attempt = failures,
                            %error,
                            retry_in_secs = delay.as_secs_f64(),
                            "connection attempt failed"
                        );
                    }
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Connect once, load the upload cache, then hand every inbound message
    /// to the dispatcher on its own task. Returns when the stream ends.
    pub async fn run(self, dispatcher: Arc<Dispatcher>) {
        let mut stream = self.connect().await;
        dispatcher.warm_up().await;

        while let Some(message) = stream.next().await {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher.handle(&message).await;
            });
        }

        self.transition(ConnectionState::Disconnected);
        tracing::warn!("inbound message stream closed");
    }
}
