use std::{cell::RefCell, collections::HashMap, collections::VecDeque, rc::Rc};

use libpulse_binding::context::{introspect::ServerInfo, subscribe::Operation};
use tokio::sync::{mpsc, oneshot};

use crate::services::{DeviceError, audio::AudioDevicePtr, common::DirectionType};

/// Reply channel for a full enumeration
pub(super) type EnumerateReply = oneshot::Sender<Result<(), DeviceError>>;

/// Channel sender for backend commands
pub(super) type CommandSender = mpsc::UnboundedSender<PulseCommand>;

pub(super) type CommandReceiver = mpsc::UnboundedReceiver<PulseCommand>;

/// Subscription events waiting for the mainloop to come back from dispatch
pub(super) type ChangeQueue = Rc<RefCell<VecDeque<ChangeNotification>>>;

/// PulseAudio object index to device, per direction. Sink and source
/// indices overlap, so the direction is part of the key.
pub(super) type DeviceIndexMap = Rc<RefCell<HashMap<(DirectionType, u32), AudioDevicePtr>>>;

/// Default device names last reported by the server
pub(super) type SharedDefaultNames = Rc<RefCell<DefaultNames>>;

/// Commands handled on the PulseAudio thread
#[derive(Debug)]
pub(super) enum PulseCommand {
    /// Enumerate sources, sinks and server defaults
    Enumerate {
        /// Completion of the enumeration
        reply: EnumerateReply,
    },
    /// Disconnect and leave the thread
    Shutdown,
}

/// Change notifications from PulseAudio subscription
#[derive(Debug, Clone)]
pub(super) enum ChangeNotification {
    /// Source or sink change
    Device {
        /// Capture for sources, render for sinks
        direction: DirectionType,
        /// Operation performed on the device
        operation: Operation,
        /// Device index
        index: u32,
    },
    /// Server change, typically a new default sink or source
    Server,
}

/// Default device names as reported by `get_server_info`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(super) struct DefaultNames {
    pub source: Option<String>,
    pub sink: Option<String>,
}

impl DefaultNames {
    pub fn from_server_info(info: &ServerInfo) -> Self {
        Self {
            source: info.default_source_name.as_ref().map(|name| name.to_string()),
            sink: info.default_sink_name.as_ref().map(|name| name.to_string()),
        }
    }

    pub fn for_direction(&self, direction: DirectionType) -> Option<&str> {
        match direction {
            DirectionType::Capture => self.source.as_deref(),
            DirectionType::Render => self.sink.as_deref(),
            DirectionType::Unknown => None,
        }
    }
}
