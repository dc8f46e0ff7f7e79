//! Accelerator memory manager.
//!
//! The target hardware fits exactly one heavy model in device memory,
//! so this is a single-active-slot cache with unconditional eviction on
//! every switch. Slots are created lazily on first activation and live
//! for the rest of the process; switching away moves a model to host
//! memory without destroying it.
//!
//! Only the worker activates models, so the internal lock is never
//! contended in practice. If a future job step needs two models
//! resident at once this policy has to grow named reservations; the
//! current pipelines never do.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{debug, info};

use crate::error::Result;

/// Where a model currently resides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelLocation {
    FastMemory,
    Offloaded,
}

/// Opaque handle to a loaded heavy model. Implementations perform the
/// real (slow) device transfers.
pub trait AcceleratorModel: Send + Sync {
    fn name(&self) -> &str;

    /// Move the model into device memory.
    fn load_to_device(&self) -> Result<()>;

    /// Move the model out of device memory, keeping it loaded on host.
    fn offload(&self) -> Result<()>;
}

struct Slot {
    handle: Arc<dyn AcceleratorModel>,
    location: ModelLocation,
}

#[derive(Default)]
pub struct VramManager {
    slots: Mutex<HashMap<String, Slot>>,
}

impl VramManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `name` the active model, constructing it through `loader`
    /// on first use. Every other device-resident slot is offloaded
    /// first; re-activating the current model is a no-op.
    ///
    /// Loader and transfer errors propagate to the caller, which fails
    /// the job; no retries happen here.
    pub fn activate<F>(&self, name: &str, loader: F) -> Result<Arc<dyn AcceleratorModel>>
    where
        F: FnOnce() -> Result<Arc<dyn AcceleratorModel>>,
    {
        let mut slots = self.slots.lock().expect("slot registry lock poisoned");

        if !slots.contains_key(name) {
            info!(model = name, "loading model (first use)");
            let handle = loader()?;
            slots.insert(
                name.to_string(),
                Slot {
                    handle,
                    location: ModelLocation::Offloaded,
                },
            );
        }

        if slots[name].location == ModelLocation::FastMemory {
            debug!(model = name, "model already active");
            return Ok(slots[name].handle.clone());
        }

        for (other, slot) in slots.iter_mut() {
            if other != name && slot.location == ModelLocation::FastMemory {
                info!(model = %other, "offloading to host memory");
                slot.handle.offload()?;
                slot.location = ModelLocation::Offloaded;
            }
        }

        let slot = slots.get_mut(name).expect("slot inserted above");
        info!(model = name, "moving model to device memory");
        slot.handle.load_to_device()?;
        slot.location = ModelLocation::FastMemory;
        Ok(slot.handle.clone())
    }

    /// Name of the model currently in fast memory, if any.
    pub fn active_model(&self) -> Option<String> {
        let slots = self.slots.lock().expect("slot registry lock poisoned");
        slots
            .iter()
            .find(|(_, slot)| slot.location == ModelLocation::FastMemory)
            .map(|(name, _)| name.clone())
    }

    /// Snapshot of every known slot and its location.
    pub fn slot_locations(&self) -> Vec<(String, ModelLocation)> {
        let slots = self.slots.lock().expect("slot registry lock poisoned");
        let mut out: Vec<_> = slots
            .iter()
            .map(|(name, slot)| (name.clone(), slot.location))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}
