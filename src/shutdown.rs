//! Shutdown signalling for in-flight actuator sequences.
//!
//! A [`ShutdownHandle`] is held by whoever listens for process signals; every
//! timed step of an actuator sequence holds a [`Shutdown`] and gives up as
//! soon as shutdown is requested.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time;
use tracing::debug;

use crate::{Error, Result};

/// Requests shutdown
#[derive(Debug)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        debug!("Shutdown requested");
        self.tx.send_replace(true);
    }

    /// Another listener for this handle
    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }
}

/// Observes a shutdown request
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Creates a connected handle/listener pair
    pub fn channel() -> (ShutdownHandle, Shutdown) {
        let (tx, rx) = watch::channel(false);
        (ShutdownHandle { tx }, Shutdown { rx })
    }

    /// A listener that is never triggered
    pub fn never() -> Shutdown {
        let (_, shutdown) = Self::channel();
        shutdown
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown has been requested.
    ///
    /// If every handle is dropped without triggering, this never resolves.
    pub async fn triggered(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|stop| *stop).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Sleeps for `duration` unless shutdown is requested first
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        self.guard(time::sleep(duration)).await
    }

    /// Runs `future` to completion unless shutdown is requested first
    pub async fn guard<F: Future>(&self, future: F) -> Result<F::Output> {
        if self.is_triggered() {
            return Err(Error::Interrupted);
        }
        tokio::select! {
            biased;
            _ = self.triggered() => Err(Error::Interrupted),
            output = future => Ok(output),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn sleep_completes_without_trigger() {
        let (_handle, shutdown) = Shutdown::channel();
        assert!(shutdown.sleep(Duration::from_secs(5)).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_interrupts_sleep() {
        let (handle, shutdown) = Shutdown::channel();
        let sleeper = tokio::spawn(async move { shutdown.sleep(Duration::from_secs(60)).await });

        time::sleep(Duration::from_secs(1)).await;
        handle.trigger();

        let result = sleeper.await.unwrap();
        assert!(matches!(result, Err(Error::Interrupted)));
    }

    #[tokio::test(start_paused = true)]
    async fn triggered_before_sleep_fails_fast() {
        let (handle, shutdown) = Shutdown::channel();
        handle.trigger();
        let start = time::Instant::now();
        assert!(shutdown.sleep(Duration::from_secs(60)).await.is_err());
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_handle_never_triggers() {
        let (handle, shutdown) = Shutdown::channel();
        drop(handle);
        assert!(shutdown.sleep(Duration::from_secs(5)).await.is_ok());
    }
}
