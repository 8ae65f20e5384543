//! The schema registry: class name → construction + layout knowledge.
//!
//! Explicitly constructed and passed by reference — never a process global.
//! A session (one file, or a set of files sharing schemas) builds one
//! `Registry`, seeds factories for the types it compiled in, and accumulates
//! `StreamerInfo`s discovered while decoding. All maps use insert-if-absent
//! under a lock so concurrent first-time registrations of the same
//! `(class, version)` race safely to the same result.

use crate::desc::{StreamerInfo, STREAMER_INFO_CLASS};
use crate::obj::Factory;
use crate::wrap::PString;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Process- or session-wide schema knowledge. Append-only during a
/// read/write session.
#[derive(Debug, Default)]
pub struct Registry {
    infos: RwLock<FxHashMap<(String, i16), Arc<StreamerInfo>>>,
    latest: RwLock<FxHashMap<String, i16>>,
    factories: RwLock<FxHashMap<String, Factory>>,
}

impl Registry {
    /// A registry seeded with the built-in wrapper classes
    /// (`PString`, `PStreamerInfo`).
    pub fn new() -> Self {
        let reg = Self::default();
        reg.register_factory(PString::CLASS, || Box::<PString>::default());
        reg.register_factory(STREAMER_INFO_CLASS, || Box::<StreamerInfo>::default());
        reg
    }

    /// Register a streamer info. First registration of a `(class, version)`
    /// wins; later duplicates return the canonical entry untouched.
    pub fn register_info(&self, info: StreamerInfo) -> Arc<StreamerInfo> {
        let key = (info.class.clone(), info.class_version);
        let entry = {
            let mut infos = self.infos.write();
            Arc::clone(
                infos
                    .entry(key)
                    .or_insert_with(|| Arc::new(info)),
            )
        };
        let mut latest = self.latest.write();
        let cur = latest.entry(entry.class.clone()).or_insert(entry.class_version);
        if entry.class_version > *cur {
            *cur = entry.class_version;
        }
        tracing::trace!(
            class = %entry.class,
            version = entry.class_version,
            elements = entry.elements.len(),
            "streamer info registered"
        );
        entry
    }

    /// Look up the layout for one class version.
    pub fn info(&self, class: &str, version: i16) -> Option<Arc<StreamerInfo>> {
        self.infos
            .read()
            .get(&(class.to_string(), version))
            .cloned()
    }

    /// Newest version registered for a class, if any.
    pub fn latest_version(&self, class: &str) -> Option<i16> {
        self.latest.read().get(class).copied()
    }

    /// Register a constructor for a compiled-in class. First wins.
    pub fn register_factory(&self, class: &str, ctor: Factory) {
        self.factories
            .write()
            .entry(class.to_string())
            .or_insert(ctor);
    }

    /// Constructor for a class, if one was registered.
    pub fn factory(&self, class: &str) -> Option<Factory> {
        self.factories.read().get(class).copied()
    }

    /// Whether anything (factory or info) is known about a class.
    pub fn knows(&self, class: &str) -> bool {
        self.factories.read().contains_key(class) || self.latest.read().contains_key(class)
    }

    /// All registered infos, sorted by `(class, version)` so persistence is
    /// deterministic.
    pub fn infos(&self) -> Vec<Arc<StreamerInfo>> {
        let mut out: Vec<_> = self.infos.read().values().cloned().collect();
        out.sort_by(|a, b| {
            (a.class.as_str(), a.class_version).cmp(&(b.class.as_str(), b.class_version))
        });
        out
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desc::{BasicType, ElementShape, StreamerElement};

    fn info(class: &str, version: i16) -> StreamerInfo {
        StreamerInfo::new(
            class,
            version,
            vec![StreamerElement::new(
                "x",
                ElementShape::Basic(BasicType::I32),
            )],
        )
    }

    #[test]
    fn seeds_builtin_factories() {
        let reg = Registry::new();
        assert!(reg.factory("PString").is_some());
        assert!(reg.factory(STREAMER_INFO_CLASS).is_some());
        assert!(reg.factory("NoSuch").is_none());
    }

    #[test]
    fn latest_version_tracks_maximum() {
        let reg = Registry::new();
        reg.register_info(info("Event", 2));
        reg.register_info(info("Event", 1));
        assert_eq!(reg.latest_version("Event"), Some(2));
        assert!(reg.info("Event", 1).is_some());
        assert!(reg.info("Event", 3).is_none());
    }

    #[test]
    fn first_registration_wins() {
        let reg = Registry::new();
        let a = reg.register_info(info("Event", 1));
        let mut dup = info("Event", 1);
        dup.elements.push(StreamerElement::new(
            "extra",
            ElementShape::Basic(BasicType::F64),
        ));
        let b = reg.register_info(dup);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.elements.len(), 1);
    }

    #[test]
    fn concurrent_registration_converges() {
        let reg = Arc::new(Registry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reg = Arc::clone(&reg);
                std::thread::spawn(move || reg.register_info(info("Race", 1)))
            })
            .collect();
        let entries: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for e in &entries[1..] {
            assert!(Arc::ptr_eq(&entries[0], e));
        }
    }

    #[test]
    fn infos_are_sorted_for_persistence() {
        let reg = Registry::new();
        reg.register_info(info("Zed", 1));
        reg.register_info(info("Alpha", 2));
        reg.register_info(info("Alpha", 1));
        let names: Vec<_> = reg
            .infos()
            .iter()
            .map(|i| (i.class.clone(), i.class_version))
            .collect();
        assert_eq!(
            names,
            vec![
                ("Alpha".to_string(), 1),
                ("Alpha".to_string(), 2),
                ("Zed".to_string(), 1)
            ]
        );
    }
}
