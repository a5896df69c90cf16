//! Cached device-control access with clamp-on-set semantics.
//!
//! Ranges are fetched from the hardware once per control and kept for the
//! life of the cache. The current value is re-queried on every read except
//! for the paired pan/tilt controls, whose hardware "current" cannot be
//! read back on many devices; those memoize the last successfully-set
//! value. That memo can desynchronize from true device state after an
//! out-of-band reset; callers that care should `reset()` the cache.

use std::collections::HashMap;

use tracing::debug;

use crate::device::{ControlId, DeviceControl};
use crate::error::ControlError;

/// Per-control cached {min, max, default, current}.
#[derive(Debug, Clone, Copy)]
pub struct ControlRange {
    pub min: i32,
    pub max: i32,
    pub default: i32,
    /// Locally memoized value, kept only for pan/tilt-style controls.
    pub current: Option<i32>,
}

impl ControlRange {
    pub fn clamp(&self, value: i32) -> i32 {
        value.clamp(self.min, self.max)
    }
}

pub struct DeviceControlCache<C: DeviceControl> {
    device: C,
    ranges: HashMap<ControlId, ControlRange>,
}

impl<C: DeviceControl> DeviceControlCache<C> {
    pub fn new(device: C) -> Self {
        Self {
            device,
            ranges: HashMap::new(),
        }
    }

    fn range_entry(&mut self, id: ControlId) -> Result<ControlRange, ControlError> {
        if let Some(range) = self.ranges.get(&id) {
            return Ok(*range);
        }
        let (min, max, default) = self.device.range(id)?;
        debug!(?id, min, max, default, "fetched control range");
        let range = ControlRange {
            min,
            max,
            default,
            current: None,
        };
        self.ranges.insert(id, range);
        Ok(range)
    }

    /// The cached (or freshly fetched) range for a control.
    pub fn range(&mut self, id: ControlId) -> Result<ControlRange, ControlError> {
        self.range_entry(id)
    }

    /// Clamp `value` into the control's range and push it to the device.
    /// Returns the value actually set.
    pub fn set(&mut self, id: ControlId, value: i32) -> Result<i32, ControlError> {
        let range = self.range_entry(id)?;
        let clamped = range.clamp(value);
        self.device.set(id, clamped)?;
        if id.is_pan_tilt() {
            if let Some(range) = self.ranges.get_mut(&id) {
                range.current = Some(clamped);
            }
        }
        Ok(clamped)
    }

    /// Current value: hardware query for ordinary controls, memoized value
    /// (falling back to the default) for pan/tilt.
    pub fn get(&mut self, id: ControlId) -> Result<i32, ControlError> {
        let range = self.range_entry(id)?;
        if id.is_pan_tilt() {
            return Ok(range.current.unwrap_or(range.default));
        }
        self.device.get(id)
    }

    /// Restore a control to its hardware default.
    pub fn reset_control(&mut self, id: ControlId) -> Result<i32, ControlError> {
        let range = self.range_entry(id)?;
        self.device.set(id, range.default)?;
        if let Some(range) = self.ranges.get_mut(&id) {
            range.current = None;
        }
        Ok(range.default)
    }

    /// Drop everything cached, forcing re-fetch on next access. Use after
    /// an out-of-band device reset.
    pub fn reset(&mut self) {
        self.ranges.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FakeControls {
        range_queries: Arc<AtomicUsize>,
        last_set: Option<(ControlId, i32)>,
        hardware_value: i32,
    }

    impl DeviceControl for FakeControls {
        fn range(&mut self, id: ControlId) -> Result<(i32, i32, i32), ControlError> {
            self.range_queries.fetch_add(1, Ordering::SeqCst);
            match id {
                ControlId::Brightness => Ok((-64, 64, 0)),
                ControlId::PanAbsolute | ControlId::TiltAbsolute => Ok((-3600, 3600, 0)),
                _ => Ok((0, 100, 50)),
            }
        }

        fn get(&mut self, id: ControlId) -> Result<i32, ControlError> {
            if id.is_pan_tilt() {
                return Err(ControlError::Unsupported(id));
            }
            Ok(self.hardware_value)
        }

        fn set(&mut self, id: ControlId, value: i32) -> Result<(), ControlError> {
            self.last_set = Some((id, value));
            self.hardware_value = value;
            Ok(())
        }
    }

    fn cache() -> (DeviceControlCache<FakeControls>, Arc<AtomicUsize>) {
        let queries = Arc::new(AtomicUsize::new(0));
        let fake = FakeControls {
            range_queries: queries.clone(),
            last_set: None,
            hardware_value: 10,
        };
        (DeviceControlCache::new(fake), queries)
    }

    #[test]
    fn range_is_fetched_exactly_once() {
        let (mut cache, queries) = cache();
        cache.set(ControlId::Brightness, 5).unwrap();
        cache.set(ControlId::Brightness, 12).unwrap();
        cache.get(ControlId::Brightness).unwrap();
        assert_eq!(queries.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn set_clamps_to_range() {
        let (mut cache, _) = cache();
        assert_eq!(cache.set(ControlId::Brightness, 500).unwrap(), 64);
        assert_eq!(cache.set(ControlId::Brightness, -500).unwrap(), -64);
        assert_eq!(cache.set(ControlId::Brightness, 3).unwrap(), 3);
    }

    #[test]
    fn ordinary_controls_requery_hardware() {
        let (mut cache, _) = cache();
        cache.set(ControlId::Gain, 30).unwrap();
        assert_eq!(cache.get(ControlId::Gain).unwrap(), 30);
    }

    #[test]
    fn pan_tilt_current_is_memoized_locally() {
        let (mut cache, _) = cache();
        // unset: falls back to the default
        assert_eq!(cache.get(ControlId::PanAbsolute).unwrap(), 0);
        cache.set(ControlId::PanAbsolute, 900).unwrap();
        assert_eq!(cache.get(ControlId::PanAbsolute).unwrap(), 900);
        // tilt is independent of pan
        assert_eq!(cache.get(ControlId::TiltAbsolute).unwrap(), 0);
    }

    #[test]
    fn reset_forces_range_refetch() {
        let (mut cache, queries) = cache();
        cache.get(ControlId::Contrast).unwrap();
        cache.reset();
        cache.get(ControlId::Contrast).unwrap();
        assert_eq!(queries.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn reset_control_restores_default() {
        let (mut cache, _) = cache();
        cache.set(ControlId::TiltAbsolute, 1200).unwrap();
        assert_eq!(cache.reset_control(ControlId::TiltAbsolute).unwrap(), 0);
        assert_eq!(cache.get(ControlId::TiltAbsolute).unwrap(), 0);
    }
}
