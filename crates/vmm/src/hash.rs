//! Chained hash table used to index pages.
//!
//! Elements live in an arena of slots and are threaded onto per-bucket doubly linked chains by
//! slot index, so unlinking is O(1) once an element is found. The bucket array is always a
//! power of two with at least [`MIN_BUCKETS`] entries and is resized after every insert or
//! delete to keep about [`BEST_ELEMS_PER_BUCKET`] elements per bucket.
//!
//! Keys, hashing and ordering are supplied by a [`Keying`] value owned by the map, which plays
//! the role of auxiliary data for the comparison functions.

use alloc::vec::Vec;
use core::mem;

/// Smallest bucket array the table will use.
const MIN_BUCKETS: usize = 4;

/// Ideal average chain length.
const BEST_ELEMS_PER_BUCKET: usize = 2;

/// Describes how elements of type `T` are keyed, hashed and compared.
///
/// Two keys are equal when neither is less than the other.
pub trait Keying<T> {
    type Key: Copy;

    /// Extracts the key of an element.
    fn key(&self, item: &T) -> Self::Key;

    /// Hashes a key.
    fn hash(&self, key: Self::Key) -> u64;

    /// Orders two keys.
    fn less(&self, a: Self::Key, b: Self::Key) -> bool;
}

/// Returned by [`IndexedMap::insert`] when an element with the same key is already present.
///
/// The rejected element is handed back untouched.
#[derive(Debug)]
pub struct Occupied<'a, T> {
    pub existing: &'a T,
    pub rejected: T,
}

struct Slot<T> {
    item: T,
    bucket: usize,
    prev: Option<usize>,
    next: Option<usize>,
}

/// A hash table of `T` keyed by `K`.
pub struct IndexedMap<T, K: Keying<T>> {
    keying: K,
    slots: Vec<Option<Slot<T>>>,
    free: Vec<usize>,
    buckets: Vec<Option<usize>>,
    len: usize,
}

impl<T, K: Keying<T>> IndexedMap<T, K> {
    /// Creates an empty table.
    pub fn new(keying: K) -> Self {
        Self {
            keying,
            slots: Vec::new(),
            free: Vec::new(),
            buckets: alloc::vec![None; MIN_BUCKETS],
            len: 0,
        }
    }

    /// Returns the number of elements.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the table holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the current size of the bucket array.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Inserts `item` unless an element with an equal key exists.
    ///
    /// On collision the table is unchanged and both the existing element and the rejected one
    /// are returned.
    pub fn insert(&mut self, item: T) -> Result<(), Occupied<'_, T>> {
        let key = self.keying.key(&item);
        if let Some(index) = self.find_slot(key) {
            return Err(Occupied {
                existing: &self.slot(index).item,
                rejected: item,
            });
        }

        self.link(item, key);
        self.rehash();
        Ok(())
    }

    /// Stores `item`, returning the element with an equal key it displaced, if any.
    pub fn replace(&mut self, item: T) -> Option<T> {
        let key = self.keying.key(&item);
        match self.find_slot(key) {
            Some(index) => Some(mem::replace(&mut self.slot_mut(index).item, item)),
            None => {
                self.link(item, key);
                self.rehash();
                None
            }
        }
    }

    /// Finds the element with key `key`.
    pub fn find(&self, key: K::Key) -> Option<&T> {
        self.find_slot(key).map(|index| &self.slot(index).item)
    }

    /// Removes and returns the element with key `key`.
    pub fn delete(&mut self, key: K::Key) -> Option<T> {
        let index = self.find_slot(key)?;
        let item = self.unlink(index);
        self.rehash();
        Some(item)
    }

    /// Calls `action` on every element in arbitrary order.
    ///
    /// `action` must not change any element's key.
    pub fn apply(&mut self, mut action: impl FnMut(&mut T)) {
        for slot in self.slots.iter_mut().flatten() {
            action(&mut slot.item);
        }
    }

    /// Removes every element.
    pub fn clear(&mut self) {
        self.clear_with(drop);
    }

    /// Removes every element, passing each one to `destructor`.
    ///
    /// The bucket array shrinks back to its minimum size.
    pub fn clear_with(&mut self, mut destructor: impl FnMut(T)) {
        let slots = mem::take(&mut self.slots);
        self.free.clear();
        self.buckets.clear();
        self.buckets.resize(MIN_BUCKETS, None);
        self.len = 0;

        for slot in slots.into_iter().flatten() {
            destructor(slot.item);
        }
    }

    /// Consumes the table, passing each element to `destructor`.
    pub fn destroy(mut self, destructor: impl FnMut(T)) {
        self.clear_with(destructor);
    }

    /// Iterates over every element, bucket by bucket.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        let mut cursor = self.cursor();
        let mut started = false;
        core::iter::from_fn(move || {
            if started {
                cursor.next()
            } else {
                started = true;
                cursor.first()
            }
        })
    }

    /// Returns a restartable cursor positioned before the first element.
    pub fn cursor(&self) -> Cursor<'_, T, K> {
        Cursor {
            map: self,
            bucket: 0,
            current: None,
        }
    }

    fn slot(&self, index: usize) -> &Slot<T> {
        self.slots[index]
            .as_ref()
            .unwrap_or_else(|| panic!("hash chain refers to free slot {index}"))
    }

    fn slot_mut(&mut self, index: usize) -> &mut Slot<T> {
        self.slots[index]
            .as_mut()
            .unwrap_or_else(|| panic!("hash chain refers to free slot {index}"))
    }

    fn bucket_of(&self, key: K::Key) -> usize {
        (self.keying.hash(key) as usize) & (self.buckets.len() - 1)
    }

    fn find_slot(&self, key: K::Key) -> Option<usize> {
        let mut cursor = self.buckets[self.bucket_of(key)];
        while let Some(index) = cursor {
            let slot = self.slot(index);
            let other = self.keying.key(&slot.item);
            if !self.keying.less(key, other) && !self.keying.less(other, key) {
                return Some(index);
            }
            cursor = slot.next;
        }
        None
    }

    /// Stores `item` in a slot and pushes it onto the front of its chain.
    fn link(&mut self, item: T, key: K::Key) {
        let bucket = self.bucket_of(key);
        let head = self.buckets[bucket];
        let slot = Slot {
            item,
            bucket,
            prev: None,
            next: head,
        };

        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some(slot);
                index
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };

        if let Some(head) = head {
            self.slot_mut(head).prev = Some(index);
        }
        self.buckets[bucket] = Some(index);
        self.len += 1;
    }

    /// Removes the element in slot `index` from its chain and frees the slot.
    fn unlink(&mut self, index: usize) -> T {
        let slot = self.slots[index]
            .take()
            .unwrap_or_else(|| panic!("unlinking free slot {index}"));

        match slot.prev {
            Some(prev) => self.slot_mut(prev).next = slot.next,
            None => self.buckets[slot.bucket] = slot.next,
        }
        if let Some(next) = slot.next {
            self.slot_mut(next).prev = slot.prev;
        }

        self.free.push(index);
        self.len -= 1;
        slot.item
    }

    /// Resizes the bucket array to suit the element count.
    ///
    /// If the new array cannot be allocated the table keeps its current buckets.
    fn rehash(&mut self) {
        let wanted = prev_power_of_two(self.len / BEST_ELEMS_PER_BUCKET).max(MIN_BUCKETS);
        if wanted == self.buckets.len() {
            return;
        }

        let mut buckets = Vec::new();
        if buckets.try_reserve_exact(wanted).is_err() {
            return;
        }
        buckets.resize(wanted, None);
        self.buckets = buckets;

        for index in 0..self.slots.len() {
            let Some(slot) = &self.slots[index] else {
                continue;
            };
            let bucket = self.bucket_of(self.keying.key(&slot.item));
            let head = self.buckets[bucket];

            let slot = self.slot_mut(index);
            slot.bucket = bucket;
            slot.prev = None;
            slot.next = head;

            if let Some(head) = head {
                self.slot_mut(head).prev = Some(index);
            }
            self.buckets[bucket] = Some(index);
        }
    }
}

/// A position within an [`IndexedMap`].
///
/// Walks the table bucket by bucket. Holding a cursor borrows the table, so it cannot be
/// modified while a walk is in progress.
pub struct Cursor<'a, T, K: Keying<T>> {
    map: &'a IndexedMap<T, K>,
    bucket: usize,
    current: Option<usize>,
}

impl<'a, T, K: Keying<T>> Cursor<'a, T, K> {
    /// Moves to the first element, returning it, or None if the table is empty.
    pub fn first(&mut self) -> Option<&'a T> {
        self.bucket = 0;
        self.current = None;
        self.advance_from_bucket(0)
    }

    /// Moves to the next element, returning it, or None at the end of the table.
    ///
    /// A cursor that has never been positioned behaves like [`Cursor::first`].
    pub fn next(&mut self) -> Option<&'a T> {
        match self.current {
            Some(index) => match self.map.slot(index).next {
                Some(next) => {
                    self.current = Some(next);
                    Some(&self.map.slot(next).item)
                }
                None => self.advance_from_bucket(self.bucket + 1),
            },
            None if self.bucket == 0 => self.advance_from_bucket(0),
            None => None,
        }
    }

    /// Returns the element the cursor is positioned on.
    pub fn current(&self) -> Option<&'a T> {
        self.current.map(|index| &self.map.slot(index).item)
    }

    fn advance_from_bucket(&mut self, start: usize) -> Option<&'a T> {
        for bucket in start..self.map.buckets.len() {
            if let Some(head) = self.map.buckets[bucket] {
                self.bucket = bucket;
                self.current = Some(head);
                return Some(&self.map.slot(head).item);
            }
        }
        self.bucket = self.map.buckets.len();
        self.current = None;
        None
    }
}

/// Returns the largest power of two not above `n`, or 0 for 0.
const fn prev_power_of_two(n: usize) -> usize {
    if n == 0 {
        0
    } else {
        1 << (usize::BITS - 1 - n.leading_zeros())
    }
}

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Fowler-Noll-Vo (FNV-1a) hash of a byte string.
pub fn hash_bytes(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, &byte| {
        (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Hash of a machine word.
pub fn hash_usize(value: usize) -> u64 {
    hash_bytes(&value.to_ne_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Pairs of (key, payload) keyed by the first field.
    struct ByKey;

    impl Keying<(usize, &'static str)> for ByKey {
        type Key = usize;

        fn key(&self, item: &(usize, &'static str)) -> usize {
            item.0
        }

        fn hash(&self, key: usize) -> u64 {
            hash_usize(key)
        }

        fn less(&self, a: usize, b: usize) -> bool {
            a < b
        }
    }

    /// Every key lands in the same bucket.
    struct Colliding;

    impl Keying<usize> for Colliding {
        type Key = usize;

        fn key(&self, item: &usize) -> usize {
            *item
        }

        fn hash(&self, _key: usize) -> u64 {
            7
        }

        fn less(&self, a: usize, b: usize) -> bool {
            a < b
        }
    }

    #[test]
    fn new_table_is_empty() {
        let map = IndexedMap::new(ByKey);
        assert!(map.is_empty());
        assert_eq!(map.bucket_count(), MIN_BUCKETS);
        assert!(map.find(1).is_none());
    }

    #[test]
    fn insert_and_find() {
        let mut map = IndexedMap::new(ByKey);
        map.insert((1, "one")).unwrap();
        map.insert((2, "two")).unwrap();

        assert_eq!(map.len(), 2);
        assert_eq!(map.find(1), Some(&(1, "one")));
        assert_eq!(map.find(2), Some(&(2, "two")));
        assert_eq!(map.find(3), None);
    }

    #[test]
    fn duplicate_insert_keeps_first() {
        let mut map = IndexedMap::new(ByKey);
        map.insert((5, "first")).unwrap();

        let occupied = map.insert((5, "second")).unwrap_err();
        assert_eq!(occupied.existing, &(5, "first"));
        assert_eq!(occupied.rejected, (5, "second"));

        assert_eq!(map.len(), 1);
        assert_eq!(map.find(5), Some(&(5, "first")));
    }

    #[test]
    fn replace_returns_displaced() {
        let mut map = IndexedMap::new(ByKey);
        assert_eq!(map.replace((3, "a")), None);
        assert_eq!(map.replace((3, "b")), Some((3, "a")));
        assert_eq!(map.len(), 1);
        assert_eq!(map.find(3), Some(&(3, "b")));
    }

    #[test]
    fn delete_removes_element() {
        let mut map = IndexedMap::new(ByKey);
        for key in 0..10 {
            map.insert((key, "x")).unwrap();
        }

        assert_eq!(map.delete(4), Some((4, "x")));
        assert_eq!(map.delete(4), None);
        assert_eq!(map.len(), 9);
        assert!(map.find(4).is_none());
        for key in (0..10).filter(|&k| k != 4) {
            assert!(map.find(key).is_some(), "lost key {key}");
        }
    }

    #[test]
    fn chains_survive_unlinking_from_every_position() {
        let mut map = IndexedMap::new(Colliding);
        for key in 0..6 {
            map.insert(key).unwrap();
        }

        // Head, middle and tail of the single chain.
        assert_eq!(map.delete(5), Some(5));
        assert_eq!(map.delete(2), Some(2));
        assert_eq!(map.delete(0), Some(0));

        let mut remaining: Vec<usize> = map.iter().copied().collect();
        remaining.sort();
        assert_eq!(remaining, vec![1, 3, 4]);
    }

    #[test]
    fn load_factor_stays_bounded() {
        let mut map = IndexedMap::new(ByKey);
        for key in 0..1000 {
            map.insert((key, "x")).unwrap();
            let buckets = map.bucket_count();
            assert!(buckets.is_power_of_two());
            if map.len() >= MIN_BUCKETS * BEST_ELEMS_PER_BUCKET {
                assert!(map.len() >= buckets && map.len() < buckets * 4);
            }
        }

        for key in 0..1000 {
            map.delete(key).unwrap();
            let buckets = map.bucket_count();
            assert!(buckets >= MIN_BUCKETS);
            if map.len() >= MIN_BUCKETS * BEST_ELEMS_PER_BUCKET {
                assert!(map.len() >= buckets && map.len() < buckets * 4);
            }
        }
        assert_eq!(map.bucket_count(), MIN_BUCKETS);
    }

    #[test]
    fn cursor_visits_every_element_once() {
        let mut map = IndexedMap::new(ByKey);
        for key in 0..50 {
            map.insert((key, "x")).unwrap();
        }

        let mut cursor = map.cursor();
        assert!(cursor.current().is_none());

        let mut seen = Vec::new();
        let mut item = cursor.first();
        while let Some(&(key, _)) = item {
            assert_eq!(cursor.current().map(|e| e.0), Some(key));
            seen.push(key);
            item = cursor.next();
        }
        assert!(cursor.current().is_none());
        assert!(cursor.next().is_none());

        seen.sort();
        assert_eq!(seen, (0..50).collect::<Vec<_>>());

        // Restart from the beginning.
        assert!(cursor.first().is_some());
    }

    #[test]
    fn cursor_on_empty_table() {
        let map = IndexedMap::new(ByKey);
        let mut cursor = map.cursor();
        assert!(cursor.first().is_none());
        assert!(cursor.next().is_none());
    }

    #[test]
    fn apply_touches_every_element() {
        let mut map = IndexedMap::new(ByKey);
        for key in 0..20 {
            map.insert((key, "old")).unwrap();
        }
        map.apply(|item| item.1 = "new");
        assert!(map.iter().all(|item| item.1 == "new"));
    }

    #[test]
    fn clear_with_runs_destructor() {
        let mut map = IndexedMap::new(ByKey);
        for key in 0..20 {
            map.insert((key, "x")).unwrap();
        }

        let mut destroyed = Vec::new();
        map.clear_with(|item| destroyed.push(item.0));
        destroyed.sort();

        assert_eq!(destroyed, (0..20).collect::<Vec<_>>());
        assert!(map.is_empty());
        assert_eq!(map.bucket_count(), MIN_BUCKETS);

        // Still usable afterwards.
        map.insert((1, "again")).unwrap();
        assert_eq!(map.find(1), Some(&(1, "again")));
    }

    #[test]
    fn destroy_consumes_table() {
        let mut map = IndexedMap::new(ByKey);
        map.insert((1, "x")).unwrap();
        map.insert((2, "y")).unwrap();

        let mut count = 0;
        map.destroy(|_| count += 1);
        assert_eq!(count, 2);
    }

    #[test]
    fn slots_are_reused() {
        let mut map = IndexedMap::new(ByKey);
        for round in 0..100 {
            map.insert((round, "x")).unwrap();
            map.delete(round).unwrap();
        }
        assert!(map.slots.len() <= 1);
    }

    #[test]
    fn fnv_hash_known_values() {
        assert_eq!(hash_bytes(b""), FNV_OFFSET_BASIS);
        assert_eq!(hash_bytes(b"a"), 0xaf63_dc4c_8601_ec8c);
        assert_ne!(hash_usize(1), hash_usize(2));
    }

    #[test]
    fn prev_power_of_two_rounds_down() {
        assert_eq!(prev_power_of_two(0), 0);
        assert_eq!(prev_power_of_two(1), 1);
        assert_eq!(prev_power_of_two(7), 4);
        assert_eq!(prev_power_of_two(8), 8);
    }
}
