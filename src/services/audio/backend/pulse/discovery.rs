use std::{cell::RefCell, rc::Rc, sync::Arc};

use libpulse_binding::{
    callbacks::ListResult,
    context::{Context, introspect::ServerInfo},
};
use tracing::debug;

use super::{
    BACKEND,
    conversion::{audio_device_from_sink, audio_device_from_source},
    types::{DefaultNames, DeviceIndexMap, EnumerateReply, SharedDefaultNames},
};
use crate::services::{
    DeviceError,
    audio::{AudioDevice, AudioDeviceState},
    common::DirectionType,
};

/// Sources, sinks and server info each complete one step
const ENUMERATION_STEPS: u8 = 3;

/// Devices found so far are held back until every step succeeded, so a
/// failed enumeration leaves the cache as it was.
struct PendingEnumeration {
    remaining: u8,
    error: Option<DeviceError>,
    staged: Vec<((DirectionType, u32), AudioDevice)>,
    reply: Option<EnumerateReply>,
}

type SharedPending = Rc<RefCell<PendingEnumeration>>;

/// Re-points both defaults at the listed devices named by the server.
pub(super) fn resolve_defaults(state: &AudioDeviceState, names: &DefaultNames) {
    for direction in [DirectionType::Capture, DirectionType::Render] {
        match names.for_direction(direction) {
            Some(name) => {
                state.resolve_default_device(direction, |device| device.descriptor() == name);
            }
            None => {
                state.set_default_device(direction, None);
            }
        }
    }
}

fn complete_step(
    pending: &SharedPending,
    outcome: Result<(), DeviceError>,
    state: &AudioDeviceState,
    index: &DeviceIndexMap,
    defaults: &SharedDefaultNames,
) {
    let finished = {
        let mut pending = pending.borrow_mut();
        if let Err(e) = outcome {
            pending.error.get_or_insert(e);
        }
        pending.remaining = pending.remaining.saturating_sub(1);
        if pending.remaining > 0 {
            return;
        }
        let error = pending.error.take();
        let staged = std::mem::take(&mut pending.staged);
        pending.reply.take().map(|reply| (reply, error, staged))
    };

    let Some((reply, error, staged)) = finished else {
        return;
    };

    let result = match error {
        None => {
            for (key, device) in staged {
                track_enumerated(state, index, key, device);
            }
            let names = defaults.borrow().clone();
            resolve_defaults(state, &names);
            debug!(
                capture = state.capture_devices().len(),
                playback = state.playback_devices().len(),
                "PulseAudio enumeration complete"
            );
            Ok(())
        }
        Some(e) => {
            debug!(dropped = staged.len(), "Discarding partial PulseAudio enumeration");
            Err(e)
        }
    };

    let _ = reply.send(result);
}

fn track_enumerated(
    state: &AudioDeviceState,
    index: &DeviceIndexMap,
    key: (DirectionType, u32),
    device: AudioDevice,
) {
    let device = Arc::new(device);
    index.borrow_mut().insert(key, Arc::clone(&device));
    state.insert_device(device);
}

/// Enumerates sources, sinks and the server defaults into `state`, then
/// answers `reply`.
pub(super) fn enumerate(
    context: &Context,
    state: &Arc<AudioDeviceState>,
    index: &DeviceIndexMap,
    defaults: &SharedDefaultNames,
    reply: EnumerateReply,
) {
    let pending: SharedPending = Rc::new(RefCell::new(PendingEnumeration {
        remaining: ENUMERATION_STEPS,
        error: None,
        staged: Vec::new(),
        reply: Some(reply),
    }));
    let introspect = context.introspect();

    {
        let pending = Rc::clone(&pending);
        let state = Arc::clone(state);
        let index = Rc::clone(index);
        let defaults = Rc::clone(defaults);
        introspect.get_server_info(move |server_info: &ServerInfo| {
            *defaults.borrow_mut() = DefaultNames::from_server_info(server_info);
            complete_step(&pending, Ok(()), &state, &index, &defaults);
        });
    }

    {
        let pending = Rc::clone(&pending);
        let state = Arc::clone(state);
        let index = Rc::clone(index);
        let defaults = Rc::clone(defaults);
        introspect.get_source_info_list(move |result| match result {
            ListResult::Item(source_info) => {
                if let Some(device) = audio_device_from_source(source_info) {
                    let key = (DirectionType::Capture, source_info.index);
                    pending.borrow_mut().staged.push((key, device));
                }
            }
            ListResult::End => complete_step(&pending, Ok(()), &state, &index, &defaults),
            ListResult::Error => complete_step(
                &pending,
                Err(DeviceError::query(BACKEND, "source enumeration failed")),
                &state,
                &index,
                &defaults,
            ),
        });
    }

    {
        let pending = Rc::clone(&pending);
        let state = Arc::clone(state);
        let index = Rc::clone(index);
        let defaults = Rc::clone(defaults);
        introspect.get_sink_info_list(move |result| match result {
            ListResult::Item(sink_info) => {
                if let Some(device) = audio_device_from_sink(sink_info) {
                    let key = (DirectionType::Render, sink_info.index);
                    pending.borrow_mut().staged.push((key, device));
                }
            }
            ListResult::End => complete_step(&pending, Ok(()), &state, &index, &defaults),
            ListResult::Error => complete_step(
                &pending,
                Err(DeviceError::query(BACKEND, "sink enumeration failed")),
                &state,
                &index,
                &defaults,
            ),
        });
    }
}

/// Query server information for default device detection
pub(super) fn query_server_info(
    context: &Context,
    state: &Arc<AudioDeviceState>,
    defaults: &SharedDefaultNames,
) {
    let state = Arc::clone(state);
    let defaults = Rc::clone(defaults);

    context
        .introspect()
        .get_server_info(move |server_info: &ServerInfo| {
            let names = DefaultNames::from_server_info(server_info);
            let changed = *defaults.borrow() != names;

            if changed {
                debug!(source = ?names.source, sink = ?names.sink, "PulseAudio defaults changed");
                *defaults.borrow_mut() = names.clone();
            }
            resolve_defaults(&state, &names);
        });
}
