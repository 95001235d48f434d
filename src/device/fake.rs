// Scripted in-memory bus for tests
//
// Models the field surface the runtime touches: state requests move
// current_state to the requested value for a configurable number of
// polls before the axis falls back to Idle, error masks can be injected
// when a state request lands, and reboots can swallow reads for a
// while. Every write is recorded in order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::bus::{BusError, DeviceBus, Result};

const IDLE: &str = "1";

#[derive(Default)]
struct Inner {
    fields: HashMap<String, String>,
    writes: Vec<(String, String)>,
    // Remaining current_state polls per axis before it reports Idle
    busy_polls: HashMap<String, u32>,
    polls_until_idle: u32,
    // (axis prefix, error field, mask) applied when a request lands
    inject_on_request: Vec<(String, String, String)>,
    unreachable_reads: u32,
    drop_after_reboot: u32,
    reboots: u32,
    saves: u32,
}

/// Clonable handle so tests can keep inspecting the bus after moving a
/// `DeviceHandle` into the orchestrator.
#[derive(Clone, Default)]
pub struct FakeBus {
    inner: Arc<Mutex<Inner>>,
}

impl FakeBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// A device that needs `polls` samples of current_state before a
    /// requested step reports completion. Zero means the very first
    /// poll already sees Idle.
    pub fn with_polls_until_idle(polls: u32) -> Self {
        let bus = Self::new();
        bus.inner.lock().unwrap().polls_until_idle = polls;
        bus
    }

    /// A device stuck in whatever state was last requested.
    pub fn stuck() -> Self {
        Self::with_polls_until_idle(u32::MAX)
    }

    pub fn set_field(&self, path: &str, value: &str) {
        self.inner
            .lock()
            .unwrap()
            .fields
            .insert(path.to_string(), value.to_string());
    }

    /// When a state request lands on `axis`, raise `mask` on
    /// `error_field` so the next error snapshot sees it.
    pub fn fail_on_request(&self, axis: &str, error_field: &str, mask: &str) {
        self.inner.lock().unwrap().inject_on_request.push((
            axis.to_string(),
            error_field.to_string(),
            mask.to_string(),
        ));
    }

    /// After a reboot command, fail the next `reads` reads with
    /// `Unreachable` before answering again.
    pub fn drop_reads_after_reboot(&self, reads: u32) {
        self.inner.lock().unwrap().drop_after_reboot = reads;
    }

    /// Fail every read from now on, as if the device dropped off the bus.
    pub fn go_silent(&self) {
        self.inner.lock().unwrap().unreachable_reads = u32::MAX;
    }

    /// All writes in issue order as (path, value)
    pub fn writes(&self) -> Vec<(String, String)> {
        self.inner.lock().unwrap().writes.clone()
    }

    /// Values written to `requested_state` fields, in order, tagged
    /// with their axis prefix.
    pub fn state_requests(&self) -> Vec<(String, String)> {
        self.writes()
            .into_iter()
            .filter(|(path, _)| path.ends_with(".requested_state"))
            .map(|(path, value)| {
                let axis = path.split('.').next().unwrap_or_default().to_string();
                (axis, value)
            })
            .collect()
    }

    pub fn reboots(&self) -> u32 {
        self.inner.lock().unwrap().reboots
    }

    pub fn saves(&self) -> u32 {
        self.inner.lock().unwrap().saves
    }
}

impl DeviceBus for FakeBus {
    async fn read(&self, path: &str) -> Result<String> {
        let mut inner = self.inner.lock().unwrap();
        if inner.unreachable_reads > 0 {
            inner.unreachable_reads -= 1;
            return Err(BusError::Unreachable(format!("{path}: no response")));
        }

        if let Some(axis) = path.strip_suffix(".current_state") {
            let busy = match inner.busy_polls.get_mut(axis) {
                Some(remaining) if *remaining > 0 => {
                    // u32::MAX marks a stuck device that never finishes
                    if *remaining != u32::MAX {
                        *remaining -= 1;
                    }
                    true
                }
                _ => false,
            };
            if busy {
                return Ok(inner
                    .fields
                    .get(path)
                    .cloned()
                    .unwrap_or_else(|| IDLE.to_string()));
            }
            return Ok(IDLE.to_string());
        }

        Ok(inner.fields.get(path).cloned().unwrap_or_else(|| "0".to_string()))
    }

    async fn write(&self, path: &str, value: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.writes.push((path.to_string(), value.to_string()));
        inner.fields.insert(path.to_string(), value.to_string());

        if let Some(axis) = path.strip_suffix(".requested_state") {
            let axis = axis.to_string();
            if value != IDLE {
                let polls = inner.polls_until_idle;
                inner.busy_polls.insert(axis.clone(), polls);
                inner
                    .fields
                    .insert(format!("{axis}.current_state"), value.to_string());
                let injections: Vec<(String, String)> = inner
                    .inject_on_request
                    .iter()
                    .filter(|(a, _, _)| *a == axis)
                    .map(|(_, field, mask)| (field.clone(), mask.clone()))
                    .collect();
                for (field, mask) in injections {
                    inner.fields.insert(field, mask);
                }
            } else {
                inner.busy_polls.remove(&axis);
            }
        }
        Ok(())
    }

    async fn reboot(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.reboots += 1;
        inner.unreachable_reads = inner.drop_after_reboot;
        Ok(())
    }

    async fn save_configuration(&self) -> Result<()> {
        self.inner.lock().unwrap().saves += 1;
        Ok(())
    }
}
