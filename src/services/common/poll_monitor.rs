use std::{
    io,
    sync::mpsc::{self, RecvTimeoutError},
    thread::{self, JoinHandle},
    time::Duration,
};

use tracing::{debug, warn};

/// Dedicated thread that runs `tick` every `interval` until dropped.
///
/// Dropping the monitor wakes the thread immediately and joins it, so no tick
/// runs after `drop` returns.
#[derive(Debug)]
pub struct PollMonitor {
    stop_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl PollMonitor {
    /// Spawns the polling thread.
    ///
    /// # Errors
    /// Returns error if the OS refuses to create the thread
    pub fn spawn<F>(name: &str, interval: Duration, mut tick: F) -> io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let thread_name = name.to_string();

        let handle = thread::Builder::new().name(name.to_string()).spawn(move || {
            debug!(thread = %thread_name, ?interval, "Poll monitor started");

            loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => tick(),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }

            debug!(thread = %thread_name, "Poll monitor stopped");
        })?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    fn is_monitor_thread(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| handle.thread().id() == thread::current().id())
    }
}

impl Drop for PollMonitor {
    fn drop(&mut self) {
        drop(self.stop_tx.take());

        if self.is_monitor_thread() {
            warn!("Poll monitor dropped from its own thread, detaching");
            return;
        }

        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Poll monitor thread panicked");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    #[test]
    fn ticks_until_dropped() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);

        let monitor = PollMonitor::spawn("test-poll", Duration::from_millis(5), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        thread::sleep(Duration::from_millis(60));
        drop(monitor);

        let after_drop = ticks.load(Ordering::SeqCst);
        assert!(after_drop > 0);

        thread::sleep(Duration::from_millis(30));
        assert_eq!(ticks.load(Ordering::SeqCst), after_drop);
    }

    #[test]
    fn drop_does_not_wait_for_interval() {
        let monitor = PollMonitor::spawn("test-idle", Duration::from_secs(3600), || {}).unwrap();
        let started = std::time::Instant::now();

        drop(monitor);

        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
