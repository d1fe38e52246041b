//! # Object Registry
//!
//! Name service for every live kernel object.

use super::{Name, ObjectHandle, ObjectKind};
use crate::{KernelError, KernelResult};
use alloc::collections::BTreeMap;

/// Registry of named objects
///
/// Anonymous objects (empty name) are never registered.
#[derive(Debug, Default)]
pub struct Registry {
    objects: BTreeMap<Name, ObjectHandle>,
}

impl Registry {
    /// Create an empty registry
    pub const fn new() -> Self {
        Self {
            objects: BTreeMap::new(),
        }
    }

    /// Register `handle` under `name`
    pub fn register(&mut self, name: &Name, handle: ObjectHandle) -> KernelResult<()> {
        if name.is_empty() {
            return Ok(());
        }
        if self.objects.contains_key(name) {
            log::warn!("[kestrel] object name {:?} already in use", name.as_str());
            return Err(KernelError::Busy);
        }
        self.objects.insert(name.clone(), handle);
        Ok(())
    }

    /// Drop the entry for `name` if it still refers to `handle`
    pub fn unregister(&mut self, name: &Name, handle: ObjectHandle) {
        if self.objects.get(name) == Some(&handle) {
            self.objects.remove(name);
        }
    }

    /// Look up an object by name, truncated the way it was at creation
    pub fn find(&self, name: &str) -> Option<ObjectHandle> {
        if name.is_empty() {
            return None;
        }
        self.objects.get(&super::make_name(name)).copied()
    }

    /// Number of registered objects
    pub fn count(&self) -> usize {
        self.objects.len()
    }

    /// Number of registered objects of one kind
    pub fn count_by_kind(&self, kind: ObjectKind) -> usize {
        self.objects.values().filter(|h| h.kind() == kind).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::make_name;
    use crate::object::slab::Slab;
    use crate::ThreadId;

    fn some_thread_ids() -> (ThreadId, ThreadId) {
        let mut slab: Slab<ThreadId, ()> = Slab::new();
        (slab.insert(()).unwrap(), slab.insert(()).unwrap())
    }

    #[test]
    fn test_register_find_unregister() {
        let (a, b) = some_thread_ids();
        let mut registry = Registry::new();
        let name = make_name("worker");
        registry.register(&name, ObjectHandle::Thread(a)).unwrap();
        assert_eq!(registry.find("worker"), Some(ObjectHandle::Thread(a)));
        assert_eq!(registry.count_by_kind(ObjectKind::Thread), 1);

        // stale unregister leaves the live entry alone
        registry.unregister(&name, ObjectHandle::Thread(b));
        assert_eq!(registry.count(), 1);
        registry.unregister(&name, ObjectHandle::Thread(a));
        assert_eq!(registry.find("worker"), None);
    }

    #[test]
    fn test_long_name_found_by_its_full_spelling() {
        let (a, _) = some_thread_ids();
        let mut registry = Registry::new();
        registry
            .register(&make_name("sensor_reader"), ObjectHandle::Thread(a))
            .unwrap();
        assert_eq!(registry.find("sensor_reader"), Some(ObjectHandle::Thread(a)));
        assert_eq!(registry.find("sensor_r"), Some(ObjectHandle::Thread(a)));
        assert_eq!(registry.find("sensor"), None);
    }

    #[test]
    fn test_duplicate_name_is_busy() {
        let (a, b) = some_thread_ids();
        let mut registry = Registry::new();
        let name = make_name("dup");
        registry.register(&name, ObjectHandle::Thread(a)).unwrap();
        assert_eq!(
            registry.register(&name, ObjectHandle::Thread(b)),
            Err(KernelError::Busy)
        );
    }

    #[test]
    fn test_anonymous_objects_are_not_registered() {
        let (a, b) = some_thread_ids();
        let mut registry = Registry::new();
        registry.register(&make_name(""), ObjectHandle::Thread(a)).unwrap();
        registry.register(&make_name(""), ObjectHandle::Thread(b)).unwrap();
        assert_eq!(registry.count(), 0);
        assert_eq!(registry.find(""), None);
    }
}
