use std::{cell::Cell, rc::Rc, sync::Arc};

use libpulse_binding::{
    callbacks::ListResult,
    context::{
        Context,
        subscribe::{Facility, InterestMaskSet, Operation},
    },
};
use tracing::{debug, trace, warn};

use super::{
    conversion::{audio_device_from_sink, audio_device_from_source},
    discovery::query_server_info,
    types::{ChangeNotification, ChangeQueue, DeviceIndexMap, SharedDefaultNames},
};
use crate::services::{
    audio::{AudioDevice, AudioDeviceState},
    common::DirectionType,
};

type SubscriptionCallback = Option<Box<dyn FnMut(Option<Facility>, Option<Operation>, u32)>>;

/// Subscription acknowledgement, `None` until the server answered
pub(super) type SubscriptionAck = Rc<Cell<Option<bool>>>;

/// Setup PulseAudio event subscription
///
/// Events are queued into `changes`; the mainloop thread drains the queue
/// outside of dispatch so handlers may issue new introspection requests.
pub(super) fn setup_event_subscription(context: &mut Context, changes: ChangeQueue) -> SubscriptionAck {
    let interest_mask = InterestMaskSet::SINK | InterestMaskSet::SOURCE | InterestMaskSet::SERVER;

    let subscription_callback: SubscriptionCallback =
        Some(Box::new(move |facility, operation, index| {
            let notification = match (facility, operation) {
                (Some(Facility::Source), Some(operation)) => Some(ChangeNotification::Device {
                    direction: DirectionType::Capture,
                    operation,
                    index,
                }),
                (Some(Facility::Sink), Some(operation)) => Some(ChangeNotification::Device {
                    direction: DirectionType::Render,
                    operation,
                    index,
                }),
                (Some(Facility::Server), Some(_)) => Some(ChangeNotification::Server),
                _ => None,
            };

            if let Some(notification) = notification {
                changes.borrow_mut().push_back(notification);
            }
        }));

    context.set_subscribe_callback(subscription_callback);

    let acknowledged: SubscriptionAck = Rc::new(Cell::new(None));
    let ack = Rc::clone(&acknowledged);
    context.subscribe(interest_mask, move |success: bool| ack.set(Some(success)));

    acknowledged
}

/// Process change notifications from PulseAudio
pub(super) fn process_change_notification(
    context: &Context,
    notification: ChangeNotification,
    state: &Arc<AudioDeviceState>,
    index: &DeviceIndexMap,
    defaults: &SharedDefaultNames,
) {
    match notification {
        ChangeNotification::Device {
            direction,
            operation: Operation::New,
            index: object_index,
        } => request_new_device(context, direction, object_index, state, index, defaults),
        ChangeNotification::Device {
            direction,
            operation: Operation::Removed,
            index: object_index,
        } => handle_device_removed(direction, object_index, state, index),
        ChangeNotification::Device {
            operation: Operation::Changed,
            index: object_index,
            ..
        } => trace!(index = object_index, "Ignoring PulseAudio device property change"),
        ChangeNotification::Server => query_server_info(context, state, defaults),
    }
}

fn handle_device_removed(
    direction: DirectionType,
    object_index: u32,
    state: &AudioDeviceState,
    index: &DeviceIndexMap,
) {
    let tracked = index.borrow_mut().remove(&(direction, object_index));

    match tracked {
        Some(device) => {
            state.disconnect_device(direction, |listed| listed == &device);
        }
        None => debug!(
            index = object_index,
            %direction,
            "Removal of untracked PulseAudio object"
        ),
    }
}

fn track_new_device(
    state: &AudioDeviceState,
    index: &DeviceIndexMap,
    defaults: &SharedDefaultNames,
    key: (DirectionType, u32),
    device: AudioDevice,
) {
    let (direction, _) = key;
    let device = Arc::new(device);
    index.borrow_mut().insert(key, Arc::clone(&device));
    state.connect_device(Arc::clone(&device));

    let is_default = defaults.borrow().for_direction(direction) == Some(device.descriptor());
    if is_default {
        state.set_default_device(direction, Some(device));
    }
}

fn request_new_device(
    context: &Context,
    direction: DirectionType,
    object_index: u32,
    state: &Arc<AudioDeviceState>,
    index: &DeviceIndexMap,
    defaults: &SharedDefaultNames,
) {
    let state = Arc::clone(state);
    let index = Rc::clone(index);
    let defaults = Rc::clone(defaults);
    let introspect = context.introspect();
    let key = (direction, object_index);

    match direction {
        DirectionType::Capture => {
            introspect.get_source_info_by_index(object_index, move |result| match result {
                ListResult::Item(source_info) => match audio_device_from_source(source_info) {
                    Some(device) => track_new_device(&state, &index, &defaults, key, device),
                    None => debug!(index = object_index, "Skipping monitor source"),
                },
                ListResult::End => {}
                ListResult::Error => warn!(
                    index = object_index,
                    "Could not describe new PulseAudio source, dropping event"
                ),
            });
        }
        DirectionType::Render => {
            introspect.get_sink_info_by_index(object_index, move |result| match result {
                ListResult::Item(sink_info) => {
                    if let Some(device) = audio_device_from_sink(sink_info) {
                        track_new_device(&state, &index, &defaults, key, device);
                    }
                }
                ListResult::End => {}
                ListResult::Error => warn!(
                    index = object_index,
                    "Could not describe new PulseAudio sink, dropping event"
                ),
            });
        }
        DirectionType::Unknown => {}
    }
}
