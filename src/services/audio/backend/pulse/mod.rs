/// Mainloop thread owning the server connection
mod connection;
/// Source and sink to device conversion
mod conversion;
/// Full enumeration and default resolution
mod discovery;
/// Subscription events
mod events;
/// Type definitions and aliases
mod types;

use std::{sync::Arc, thread};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, instrument, warn};

use crate::{
    config::AudioConfig,
    services::{
        DeviceError,
        audio::{AudioDeviceManager, AudioDeviceState},
        common::Lifecycle,
    },
};
use types::{CommandSender, PulseCommand};

pub(super) const BACKEND: &str = "PulseAudio";

/// Audio devices of a PulseAudio (or PipeWire) server.
///
/// A dedicated thread owns the connection. Queries are forwarded to it as
/// commands; subscription events update [`AudioDeviceState`] on that thread.
pub struct PulseAudioDeviceManager {
    state: Arc<AudioDeviceState>,
    lifecycle: Lifecycle,
    command_tx: CommandSender,
    thread: Option<thread::JoinHandle<()>>,
}

impl PulseAudioDeviceManager {
    /// Connects to the server and subscribes to source, sink and server
    /// events.
    ///
    /// # Errors
    /// Returns error if no server is reachable or the subscription is refused
    #[instrument(skip(config), fields(application = %config.pulse_application_name))]
    pub fn new(config: &AudioConfig) -> Result<Self, DeviceError> {
        let state = Arc::new(AudioDeviceState::new());
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let handle = connection::spawn(
            config.pulse_application_name.clone(),
            Arc::clone(&state),
            command_rx,
        )?;

        Ok(Self {
            state,
            lifecycle: Lifecycle::new(),
            command_tx,
            thread: Some(handle),
        })
    }

    fn on_backend_thread(&self) -> bool {
        thread::current().name() == Some(connection::THREAD_NAME)
    }

    fn request_enumeration(&self) -> Result<(), DeviceError> {
        let (reply, reply_rx) = oneshot::channel();

        self.command_tx
            .send(PulseCommand::Enumerate { reply })
            .map_err(|_| DeviceError::ThreadCommunication { backend: BACKEND })?;

        futures::executor::block_on(reply_rx)
            .map_err(|_| DeviceError::ThreadCommunication { backend: BACKEND })?
    }
}

impl AudioDeviceManager for PulseAudioDeviceManager {
    fn state(&self) -> &AudioDeviceState {
        &self.state
    }

    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    fn ensure_enumerated(&self) -> Result<(), DeviceError> {
        // Listeners run on the backend thread; waiting for it there would
        // deadlock, so they read whatever is cached.
        if self.on_backend_thread() {
            return Ok(());
        }

        if self.command_tx.is_closed() {
            return Err(DeviceError::ThreadCommunication { backend: BACKEND });
        }

        self.lifecycle.ensure_ready(|| self.request_enumeration())
    }
}

impl Drop for PulseAudioDeviceManager {
    fn drop(&mut self) {
        if !self.lifecycle.begin_dispose() {
            return;
        }

        let _ = self.command_tx.send(PulseCommand::Shutdown);

        if let Some(handle) = self.thread.take() {
            if self.on_backend_thread() {
                warn!("PulseAudio manager dropped on its own thread, not joining");
            } else if handle.join().is_err() {
                warn!("PulseAudio thread panicked");
            }
        }

        self.lifecycle.mark_stopped();
        debug!("PulseAudio manager stopped");
    }
}
