//! # Object Storage
//!
//! Generational slab backing threads, timers and IPC objects.
//!
//! A key is an index plus the generation of the slot at insertion time, so a
//! handle kept past its object's deletion never aliases a newer object. Use
//! of such a stale handle is a contract violation.

use crate::{contract_violation, KernelError, KernelResult};
use alloc::vec::Vec;
use core::marker::PhantomData;
use core::ops::{Index, IndexMut};

/// Raw slab key
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key {
    index: u32,
    generation: u32,
}

impl Key {
    /// Slot index
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Slot generation
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

/// Typed handle convertible to and from a [`Key`]
pub trait SlabKey: Copy {
    /// Wrap a raw key
    fn from_key(key: Key) -> Self;
    /// Unwrap the raw key
    fn key(self) -> Key;
}

#[derive(Debug)]
enum Entry<T> {
    Occupied { generation: u32, value: T },
    Vacant { generation: u32, next_free: Option<u32> },
}

/// Generational slab
#[derive(Debug)]
pub struct Slab<K, T> {
    entries: Vec<Entry<T>>,
    free_head: Option<u32>,
    len: usize,
    _key: PhantomData<fn() -> K>,
}

impl<K: SlabKey, T> Slab<K, T> {
    /// Create an empty slab
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            free_head: None,
            len: 0,
            _key: PhantomData,
        }
    }

    /// Number of live objects
    pub fn len(&self) -> usize {
        self.len
    }

    /// Is the slab empty?
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Key the next [`Slab::insert`] will return
    pub fn next_key(&self) -> K {
        let key = match self.free_head {
            Some(index) => match self.entries[index as usize] {
                Entry::Vacant { generation, .. } => Key { index, generation },
                Entry::Occupied { .. } => contract_violation("slab free list corrupted"),
            },
            None => Key {
                index: self.entries.len() as u32,
                generation: 0,
            },
        };
        K::from_key(key)
    }

    /// Store `value`, returning its key
    pub fn insert(&mut self, value: T) -> KernelResult<K> {
        if let Some(index) = self.free_head {
            let slot = &mut self.entries[index as usize];
            let generation = match *slot {
                Entry::Vacant { generation, next_free } => {
                    self.free_head = next_free;
                    generation
                }
                Entry::Occupied { .. } => contract_violation("slab free list corrupted"),
            };
            *slot = Entry::Occupied { generation, value };
            self.len += 1;
            return Ok(K::from_key(Key { index, generation }));
        }

        let index = u32::try_from(self.entries.len()).map_err(|_| KernelError::NoMemory)?;
        self.entries
            .try_reserve(1)
            .map_err(|_| KernelError::NoMemory)?;
        self.entries.push(Entry::Occupied {
            generation: 0,
            value,
        });
        self.len += 1;
        Ok(K::from_key(Key {
            index,
            generation: 0,
        }))
    }

    /// Remove and return the object at `key`
    pub fn remove(&mut self, key: K) -> Option<T> {
        let key = key.key();
        let slot = self.entries.get_mut(key.index as usize)?;
        match slot {
            Entry::Occupied { generation, .. } if *generation == key.generation => {}
            _ => return None,
        }
        let vacant = Entry::Vacant {
            generation: key.generation.wrapping_add(1),
            next_free: self.free_head,
        };
        let Entry::Occupied { value, .. } = core::mem::replace(slot, vacant) else {
            return None;
        };
        self.free_head = Some(key.index);
        self.len -= 1;
        Some(value)
    }

    /// Is `key` live?
    pub fn contains(&self, key: K) -> bool {
        self.get(key).is_some()
    }

    /// Shared access to the object at `key`
    pub fn get(&self, key: K) -> Option<&T> {
        let key = key.key();
        match self.entries.get(key.index as usize)? {
            Entry::Occupied { generation, value } if *generation == key.generation => Some(value),
            _ => None,
        }
    }

    /// Exclusive access to the object at `key`
    pub fn get_mut(&mut self, key: K) -> Option<&mut T> {
        let key = key.key();
        match self.entries.get_mut(key.index as usize)? {
            Entry::Occupied { generation, value } if *generation == key.generation => Some(value),
            _ => None,
        }
    }

    /// Iterate over live objects
    pub fn iter(&self) -> impl Iterator<Item = (K, &T)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| match entry {
                Entry::Occupied { generation, value } => Some((
                    K::from_key(Key {
                        index: index as u32,
                        generation: *generation,
                    }),
                    value,
                )),
                Entry::Vacant { .. } => None,
            })
    }
}

impl<K: SlabKey, T> Default for Slab<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: SlabKey, T> Index<K> for Slab<K, T> {
    type Output = T;

    #[track_caller]
    fn index(&self, key: K) -> &T {
        match self.get(key) {
            Some(value) => value,
            None => contract_violation("stale or foreign object handle"),
        }
    }
}

impl<K: SlabKey, T> IndexMut<K> for Slab<K, T> {
    #[track_caller]
    fn index_mut(&mut self, key: K) -> &mut T {
        match self.get_mut(key) {
            Some(value) => value,
            None => contract_violation("stale or foreign object handle"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct TestId(Key);

    impl SlabKey for TestId {
        fn from_key(key: Key) -> Self {
            Self(key)
        }

        fn key(self) -> Key {
            self.0
        }
    }

    #[test]
    fn test_insert_get_remove() {
        let mut slab: Slab<TestId, &str> = Slab::new();
        let a = slab.insert("a").unwrap();
        let b = slab.insert("b").unwrap();
        assert_eq!(slab.len(), 2);
        assert_eq!(slab[a], "a");
        assert_eq!(slab.remove(a), Some("a"));
        assert_eq!(slab.remove(a), None);
        assert!(slab.contains(b));
        assert_eq!(slab.iter().count(), 1);
    }

    #[test]
    fn test_next_key_predicts_insert() {
        let mut slab: Slab<TestId, u32> = Slab::new();
        let predicted = slab.next_key();
        assert_eq!(slab.insert(1).unwrap(), predicted);
        let a = slab.insert(2).unwrap();
        slab.remove(a);
        let predicted = slab.next_key();
        assert_eq!(slab.insert(3).unwrap(), predicted);
    }

    #[test]
    fn test_reused_slot_gets_new_generation() {
        let mut slab: Slab<TestId, u32> = Slab::new();
        let old = slab.insert(1).unwrap();
        slab.remove(old);
        let new = slab.insert(2).unwrap();
        assert_eq!(old.0.index(), new.0.index());
        assert_ne!(old, new);
        assert!(slab.get(old).is_none());
        assert_eq!(slab[new], 2);
    }

    #[test]
    #[should_panic(expected = "contract violation")]
    fn test_stale_handle_is_fatal() {
        let mut slab: Slab<TestId, u32> = Slab::new();
        let id = slab.insert(1).unwrap();
        slab.remove(id);
        let _ = slab[id];
    }
}
