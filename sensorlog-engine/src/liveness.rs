//! Online/offline transitions.
//!
//! Arrival of any reading, accepted or filtered out, brings a device
//! online. Only the periodic sweep takes it offline again. Every function
//! here returns an event only when the state actually changed, so the
//! sink never sees two identical events in a row for one device.

use sensorlog_types::LivenessEvent;

use crate::registry::Device;

/// Mark a device online because a reading just arrived.
pub fn observe_arrival(name: &str, device: &mut Device, now_ms: u64) -> Option<LivenessEvent> {
    if device.online {
        return None;
    }
    device.online = true;
    Some(LivenessEvent::online(name, now_ms))
}

/// Whether the device's timeout has elapsed at `now_ms`.
///
/// A device that has never been seen counts as expired.
pub fn is_expired(device: &Device, now_ms: u64) -> bool {
    match device.last_seen_ms {
        Some(seen) => {
            let timeout_ms = u64::try_from(device.timeout.as_millis()).unwrap_or(u64::MAX);
            now_ms.saturating_sub(seen) >= timeout_ms
        }
        None => true,
    }
}

/// Take a device offline if it is online and its timeout has elapsed.
pub fn check_timeout(name: &str, device: &mut Device, now_ms: u64) -> Option<LivenessEvent> {
    if !device.online || !is_expired(device, now_ms) {
        return None;
    }
    device.online = false;
    Some(LivenessEvent::offline(name, now_ms))
}

/// Take a device offline regardless of its timeout (used at shutdown).
pub fn force_offline(name: &str, device: &mut Device, now_ms: u64) -> Option<LivenessEvent> {
    if !device.online {
        return None;
    }
    device.online = false;
    Some(LivenessEvent::offline(name, now_ms))
}
