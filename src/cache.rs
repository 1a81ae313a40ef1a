// ABOUTME: Process-wide registry mapping opaque frame identifiers to frame bytes
// ABOUTME: so identifiers, not bulky byte arrays, can travel between components

use crate::error::CacheMiss;
use crate::packet::Frame;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// An opaque, globally-unique tag minted when a frame enters the system.
///
/// Carries provenance (which client, or bus-ingest, produced a frame)
/// without copying its bytes, and doubles as the echo-suppression key.
pub type FrameId = Uuid;

/// Thread-safe `FrameId -> Frame` registry. No TTL: callers delete
/// explicitly once every known consumer has observed the frame.
#[derive(Clone, Default)]
pub struct PacketCache {
    inner: Arc<Mutex<HashMap<FrameId, Frame>>>,
}

impl PacketCache {
    pub fn new() -> Self {
        PacketCache {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Registers `frame` under a freshly-minted identifier and returns it.
    pub fn insert(&self, frame: Frame) -> FrameId {
        let id = Uuid::new_v4();
        self.inner
            .lock()
            .expect("packet cache mutex poisoned")
            .insert(id, frame);
        id
    }

    /// Looks up a frame by id. Fails with [`CacheMiss`] once the entry has
    /// been deleted (or never existed).
    pub fn get(&self, id: FrameId) -> Result<Frame, CacheMiss> {
        self.inner
            .lock()
            .expect("packet cache mutex poisoned")
            .get(&id)
            .cloned()
            .ok_or(CacheMiss(id))
    }

    /// Removes and returns a frame by id, e.g. once fan-out has completed.
    pub fn remove(&self, id: FrameId) -> Result<Frame, CacheMiss> {
        self.inner
            .lock()
            .expect("packet cache mutex poisoned")
            .remove(&id)
            .ok_or(CacheMiss(id))
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("packet cache mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Frame as WireFrame;

    fn sample_frame() -> WireFrame {
        WireFrame::build(0xFB, 0x00, &[0x01])
    }

    #[test]
    fn insert_then_get_returns_same_frame() {
        let cache = PacketCache::new();
        let id = cache.insert(sample_frame());
        let got = cache.get(id).expect("frame should be present");
        assert_eq!(got.as_bytes(), sample_frame().as_bytes());
    }

    #[test]
    fn get_after_remove_is_a_cache_miss() {
        let cache = PacketCache::new();
        let id = cache.insert(sample_frame());
        cache.remove(id).expect("remove should find the entry");
        assert!(cache.get(id).is_err());
    }

    #[test]
    fn unknown_id_is_a_cache_miss() {
        let cache = PacketCache::new();
        assert!(cache.get(Uuid::new_v4()).is_err());
    }
}
