use std::{cell::RefCell, collections::VecDeque, rc::Rc, sync::Arc, thread, time::Duration};

use libpulse_binding::{
    context::{Context, FlagSet as ContextFlags, State as ContextState},
    def::Retval,
    error::PAErr,
    mainloop::standard::{IterateResult, Mainloop},
    time::MicroSeconds,
};
use tokio::sync::{mpsc::error::TryRecvError, oneshot};
use tracing::{debug, error, info, instrument};

use super::{
    BACKEND, discovery,
    events::{process_change_notification, setup_event_subscription},
    types::{ChangeNotification, ChangeQueue, CommandReceiver, DeviceIndexMap, PulseCommand, SharedDefaultNames},
};
use crate::services::{DeviceError, audio::AudioDeviceState};

/// Upper bound on one mainloop poll, so commands are picked up promptly
const ITERATE_TIMEOUT: Duration = Duration::from_millis(50);

/// Name of the thread owning the PulseAudio connection
pub(super) const THREAD_NAME: &str = "avdev-pulse";

/// Context and mainloop owned by the PulseAudio thread.
///
/// Field order matters: the context must be dropped before the mainloop
/// whose API it references.
struct PulseConnection {
    context: Context,
    mainloop: Mainloop,
    changes: ChangeQueue,
}

impl PulseConnection {
    #[instrument(level = "debug")]
    fn open(application_name: &str) -> Result<Self, DeviceError> {
        let mut mainloop = Mainloop::new()
            .ok_or_else(|| DeviceError::initialization(BACKEND, "failed to create mainloop"))?;
        let mut context = Context::new(&mainloop, application_name)
            .ok_or_else(|| DeviceError::initialization(BACKEND, "failed to create context"))?;

        context
            .connect(None, ContextFlags::NOFLAGS, None)
            .map_err(|e| DeviceError::initialization(BACKEND, format!("connection failed: {e}")))?;

        loop {
            iterate_blocking(&mut mainloop)?;
            match context.get_state() {
                ContextState::Ready => break,
                ContextState::Failed | ContextState::Terminated => {
                    return Err(DeviceError::initialization(
                        BACKEND,
                        "context failed to become ready",
                    ));
                }
                _ => {}
            }
        }

        let changes: ChangeQueue = Rc::new(RefCell::new(VecDeque::new()));
        let acknowledged = setup_event_subscription(&mut context, Rc::clone(&changes));

        let subscribed = loop {
            if let Some(success) = acknowledged.get() {
                break success;
            }
            iterate_blocking(&mut mainloop)?;
        };

        if !subscribed {
            context.disconnect();
            return Err(DeviceError::initialization(
                BACKEND,
                "server rejected event subscription",
            ));
        }

        info!("Connected to PulseAudio");

        Ok(Self {
            context,
            mainloop,
            changes,
        })
    }

    fn iterate_timeout(&mut self) -> Result<(), PAErr> {
        let timeout = MicroSeconds(ITERATE_TIMEOUT.as_micros() as u64);
        self.mainloop.prepare(Some(timeout))?;
        self.mainloop.poll()?;
        self.mainloop.dispatch()?;
        Ok(())
    }

    fn drain_changes(&self) -> Vec<ChangeNotification> {
        self.changes.borrow_mut().drain(..).collect()
    }

    fn run(mut self, state: Arc<AudioDeviceState>, mut command_rx: CommandReceiver) {
        let index: DeviceIndexMap = Rc::default();
        let defaults: SharedDefaultNames = Rc::default();

        loop {
            loop {
                match command_rx.try_recv() {
                    Ok(PulseCommand::Enumerate { reply }) => {
                        discovery::enumerate(&self.context, &state, &index, &defaults, reply);
                    }
                    Ok(PulseCommand::Shutdown) | Err(TryRecvError::Disconnected) => {
                        debug!("PulseAudio thread shutting down");
                        self.close();
                        return;
                    }
                    Err(TryRecvError::Empty) => break,
                }
            }

            for notification in self.drain_changes() {
                process_change_notification(&self.context, notification, &state, &index, &defaults);
            }

            if let Err(e) = self.iterate_timeout() {
                error!(error = %e, "PulseAudio mainloop failed");
                self.close();
                return;
            }

            if matches!(
                self.context.get_state(),
                ContextState::Failed | ContextState::Terminated
            ) {
                error!("PulseAudio connection lost");
                self.close();
                return;
            }
        }
    }

    fn close(mut self) {
        self.context.set_subscribe_callback(None);
        self.context.disconnect();
        self.mainloop.quit(Retval(0));
    }
}

fn iterate_blocking(mainloop: &mut Mainloop) -> Result<(), DeviceError> {
    match mainloop.iterate(true) {
        IterateResult::Success(_) => Ok(()),
        IterateResult::Quit(_) => Err(DeviceError::initialization(BACKEND, "mainloop quit")),
        IterateResult::Err(e) => Err(DeviceError::initialization(BACKEND, e)),
    }
}

/// Starts the thread owning the PulseAudio connection and waits until it is
/// connected and subscribed.
///
/// # Errors
/// Returns error if the thread cannot be spawned or the connection fails
pub(super) fn spawn(
    application_name: String,
    state: Arc<AudioDeviceState>,
    command_rx: CommandReceiver,
) -> Result<thread::JoinHandle<()>, DeviceError> {
    let (ready_tx, ready_rx) = oneshot::channel::<Result<(), DeviceError>>();

    let handle = thread::Builder::new()
        .name(String::from(THREAD_NAME))
        .spawn(move || {
            let connection = match PulseConnection::open(&application_name) {
                Ok(connection) => connection,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            let _ = ready_tx.send(Ok(()));
            connection.run(state, command_rx);
        })
        .map_err(|e| DeviceError::initialization(BACKEND, e))?;

    match futures::executor::block_on(ready_rx) {
        Ok(Ok(())) => Ok(handle),
        Ok(Err(e)) => {
            let _ = handle.join();
            Err(e)
        }
        Err(_) => {
            let _ = handle.join();
            Err(DeviceError::initialization(
                BACKEND,
                "thread exited during startup",
            ))
        }
    }
}
