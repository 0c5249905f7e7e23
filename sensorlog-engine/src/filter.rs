//! Dead-band noise filter.
//!
//! The baseline is the last *accepted* value, not the last received one,
//! so a run of small fluctuations cannot walk the baseline away.

use sensorlog_types::FilterType;

use crate::registry::MeasurementState;

/// Decide whether a reading should be forwarded.
///
/// With [`FilterType::Absolute`] a value is rejected only when it lies
/// strictly inside `(last - threshold, last + threshold)`. Until the device
/// is online and a baseline exists every value is accepted.
pub fn accept(value: f64, state: &MeasurementState, device_online: bool) -> bool {
    match state.config.filter_type {
        FilterType::None => true,
        FilterType::Absolute => {
            let last = match state.last_accepted {
                Some(last) if device_online => last,
                _ => return true,
            };
            let threshold = state.config.filter;
            value <= last - threshold || value >= last + threshold
        }
    }
}
