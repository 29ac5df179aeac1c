//! Host memory-pressure signals.
//!
//! The host owns a [`MemoryPressureMonitor`] and calls
//! [`MemoryPressureMonitor::notify`] when the process should shed cached
//! memory. Listeners stay registered for as long as their
//! [`PressureRegistration`] lives.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Severity of a memory-pressure signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryPressureLevel {
    /// Release what is cheap to rebuild.
    Moderate,
    /// Release everything possible.
    Critical,
}

type Listener = Arc<dyn Fn(MemoryPressureLevel) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: Vec<(u64, Listener)>,
}

/// Cloneable source of memory-pressure signals.
#[derive(Clone, Default)]
pub struct MemoryPressureMonitor {
    registry: Arc<Mutex<Registry>>,
}

impl fmt::Debug for MemoryPressureMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryPressureMonitor")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl MemoryPressureMonitor {
    /// Monitor with no listeners.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener`; it is removed when the returned handle drops.
    #[must_use = "the listener is removed as soon as the registration drops"]
    pub fn add_listener(
        &self,
        listener: impl Fn(MemoryPressureLevel) + Send + Sync + 'static,
    ) -> PressureRegistration {
        let mut registry = self.registry.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.listeners.push((id, Arc::new(listener)));
        PressureRegistration {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Deliver `level` to every listener. Returns how many were called.
    ///
    /// Listeners run on the calling thread, outside the registry lock, so a
    /// listener may register or drop registrations itself.
    pub fn notify(&self, level: MemoryPressureLevel) -> usize {
        let listeners: Vec<Listener> = self
            .registry
            .lock()
            .listeners
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        debug!(?level, listeners = listeners.len(), "memory pressure signalled");
        for listener in &listeners {
            listener(level);
        }
        listeners.len()
    }

    /// Number of live registrations.
    pub fn listener_count(&self) -> usize {
        self.registry.lock().listeners.len()
    }
}

/// Keeps a listener registered; unregisters on drop.
#[derive(Debug)]
pub struct PressureRegistration {
    id: u64,
    registry: Weak<Mutex<Registry>>,
}

impl Drop for PressureRegistration {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.lock().listeners.retain(|(id, _)| *id != self.id);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
