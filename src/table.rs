// queue index -> zero-copy socket table shared by the classifier and its loader.
//
// one AtomicU64 per queue. the high word carries the "bound" bit, the low word the
// socket handle, so a binding is published and observed in a single atomic access.
// readers see either the previous or the new binding for a slot, never a mix of both.
// there is no cross-slot consistency: a reader racing a batch of updates may observe
// some slots before and some after.

use {
    crate::error::{Error, Result},
    std::{
        fmt,
        sync::atomic::{AtomicU64, Ordering},
    },
};

/// queue slots in the kernel XSKMAP; the portable table never exceeds it
pub const MAX_CAPACITY: u32 = 64;
pub const DEFAULT_CAPACITY: u32 = MAX_CAPACITY;

const EMPTY: u64 = 0;
const BOUND: u64 = 1 << 32;

/// hardware receive queue index, as reported by the driver
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueueId(pub u32);

/// opaque identifier of a zero-copy receive ring (an AF_XDP socket fd in the kernel)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SocketHandle(pub u32);

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for SocketHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[inline(always)]
const fn pack(handle: SocketHandle) -> u64 {
    BOUND | handle.0 as u64
}

#[inline(always)]
const fn unpack(word: u64) -> Option<SocketHandle> {
    if word & BOUND == 0 {
        None
    } else {
        Some(SocketHandle(word as u32))
    }
}

pub struct RedirectTable {
    slots: Box<[AtomicU64]>,
}

impl RedirectTable {
    /// table with the default 64 queue slots, all unbound
    pub fn new() -> Self {
        Self::alloc(DEFAULT_CAPACITY)
    }

    /// allocate once; capacity is fixed for the table's lifetime
    pub fn with_capacity(capacity: u32) -> Result<Self> {
        if capacity == 0 || capacity > MAX_CAPACITY {
            return Err(Error::InvalidCapacity(capacity));
        }
        Ok(Self::alloc(capacity))
    }

    fn alloc(capacity: u32) -> Self {
        let slots = (0..capacity).map(|_| AtomicU64::new(EMPTY)).collect();
        Self { slots }
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.slots.len() as u32
    }

    /// constant-time, lock-free lookup. out-of-range queues are simply unbound.
    #[inline(always)]
    pub fn lookup(&self, queue: QueueId) -> Option<SocketHandle> {
        let slot = self.slots.get(queue.0 as usize)?;
        unpack(slot.load(Ordering::Acquire))
    }

    /// bind `queue` to `handle`, returning the binding it replaced
    pub fn update(&self, queue: QueueId, handle: SocketHandle) -> Result<Option<SocketHandle>> {
        let slot = self.slot(queue)?;
        Ok(unpack(slot.swap(pack(handle), Ordering::AcqRel)))
    }

    /// unbind `queue`. removing an absent binding is not an error.
    pub fn delete(&self, queue: QueueId) -> Result<Option<SocketHandle>> {
        let slot = self.slot(queue)?;
        Ok(unpack(slot.swap(EMPTY, Ordering::AcqRel)))
    }

    /// unbind `queue` only while it still points at `handle`.
    /// used on socket teardown so a concurrent rebind to a new socket survives.
    pub fn delete_if(&self, queue: QueueId, handle: SocketHandle) -> Result<bool> {
        let slot = self.slot(queue)?;
        Ok(slot
            .compare_exchange(pack(handle), EMPTY, Ordering::AcqRel, Ordering::Acquire)
            .is_ok())
    }

    pub fn clear(&self) {
        for slot in self.slots.iter() {
            slot.store(EMPTY, Ordering::Release);
        }
    }

    /// bound slots right now; racy against concurrent writers
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// current bindings in queue order. each entry is read atomically,
    /// the sequence as a whole is not a snapshot of one instant.
    pub fn iter(&self) -> impl Iterator<Item = (QueueId, SocketHandle)> + '_ {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            unpack(slot.load(Ordering::Acquire)).map(|h| (QueueId(i as u32), h))
        })
    }

    pub fn snapshot(&self) -> Vec<(QueueId, SocketHandle)> {
        self.iter().collect()
    }

    fn slot(&self, queue: QueueId) -> Result<&AtomicU64> {
        self.slots
            .get(queue.0 as usize)
            .ok_or(Error::QueueOutOfRange {
                queue,
                capacity: self.capacity(),
            })
    }
}

impl Default for RedirectTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RedirectTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedirectTable")
            .field("capacity", &self.capacity())
            .field("bindings", &self.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{atomic::AtomicBool, Arc};
    use std::thread;

    #[test]
    fn test_new_table_is_empty() {
        let table = RedirectTable::new();
        assert_eq!(table.capacity(), 64);
        assert!(table.is_empty());
        for q in 0..64 {
            assert_eq!(table.lookup(QueueId(q)), None);
        }
    }

    #[test]
    fn test_capacity_bounds() {
        assert!(matches!(
            RedirectTable::with_capacity(0),
            Err(Error::InvalidCapacity(0))
        ));
        assert!(matches!(
            RedirectTable::with_capacity(65),
            Err(Error::InvalidCapacity(65))
        ));
        assert_eq!(RedirectTable::with_capacity(4).unwrap().capacity(), 4);
    }

    #[test]
    fn test_update_returns_previous() {
        let table = RedirectTable::new();
        assert_eq!(table.update(QueueId(3), SocketHandle(7)).unwrap(), None);
        assert_eq!(
            table.update(QueueId(3), SocketHandle(9)).unwrap(),
            Some(SocketHandle(7))
        );
        assert_eq!(table.lookup(QueueId(3)), Some(SocketHandle(9)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_delete_absent_is_none() {
        let table = RedirectTable::new();
        assert_eq!(table.delete(QueueId(5)).unwrap(), None);
        table.update(QueueId(5), SocketHandle(1)).unwrap();
        assert_eq!(table.delete(QueueId(5)).unwrap(), Some(SocketHandle(1)));
        assert_eq!(table.lookup(QueueId(5)), None);
    }

    #[test]
    fn test_handle_zero_and_max_are_bindable() {
        let table = RedirectTable::new();
        table.update(QueueId(0), SocketHandle(0)).unwrap();
        table.update(QueueId(1), SocketHandle(u32::MAX)).unwrap();
        assert_eq!(table.lookup(QueueId(0)), Some(SocketHandle(0)));
        assert_eq!(table.lookup(QueueId(1)), Some(SocketHandle(u32::MAX)));
    }

    #[test]
    fn test_last_slot_and_out_of_range() {
        let table = RedirectTable::new();
        table.update(QueueId(63), SocketHandle(42)).unwrap();
        assert_eq!(table.lookup(QueueId(63)), Some(SocketHandle(42)));

        assert_eq!(table.lookup(QueueId(64)), None);
        assert_eq!(table.lookup(QueueId(u32::MAX)), None);
        assert!(matches!(
            table.update(QueueId(64), SocketHandle(1)),
            Err(Error::QueueOutOfRange { capacity: 64, .. })
        ));
        assert!(table.delete(QueueId(64)).is_err());
        // neighbours of the rejected write are untouched
        assert_eq!(table.snapshot(), vec![(QueueId(63), SocketHandle(42))]);
    }

    #[test]
    fn test_small_table_rejects_upper_queues() {
        let table = RedirectTable::with_capacity(2).unwrap();
        table.update(QueueId(1), SocketHandle(1)).unwrap();
        assert!(table.update(QueueId(2), SocketHandle(2)).is_err());
        assert_eq!(table.lookup(QueueId(2)), None);
    }

    #[test]
    fn test_delete_if_only_matching() {
        let table = RedirectTable::new();
        table.update(QueueId(2), SocketHandle(10)).unwrap();
        assert!(!table.delete_if(QueueId(2), SocketHandle(11)).unwrap());
        assert_eq!(table.lookup(QueueId(2)), Some(SocketHandle(10)));
        assert!(table.delete_if(QueueId(2), SocketHandle(10)).unwrap());
        assert_eq!(table.lookup(QueueId(2)), None);
    }

    #[test]
    fn test_snapshot_is_key_ordered() {
        let table = RedirectTable::new();
        table.update(QueueId(9), SocketHandle(3)).unwrap();
        table.update(QueueId(1), SocketHandle(2)).unwrap();
        table.update(QueueId(4), SocketHandle(1)).unwrap();
        let keys: Vec<u32> = table.snapshot().iter().map(|(q, _)| q.0).collect();
        assert_eq!(keys, vec![1, 4, 9]);

        table.clear();
        assert!(table.is_empty());
    }

    #[test]
    fn test_concurrent_updates_never_torn() {
        // writer flips between two handles whose words differ in every bit
        const A: SocketHandle = SocketHandle(0x0000_0000);
        const B: SocketHandle = SocketHandle(0xffff_ffff);

        let table = Arc::new(RedirectTable::new());
        let stop = Arc::new(AtomicBool::new(false));

        let writer = {
            let table = Arc::clone(&table);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut i = 0u64;
                while !stop.load(Ordering::Relaxed) {
                    match i % 3 {
                        0 => table.update(QueueId(7), A).unwrap(),
                        1 => table.update(QueueId(7), B).unwrap(),
                        _ => table.delete(QueueId(7)).unwrap(),
                    };
                    i += 1;
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let table = Arc::clone(&table);
                thread::spawn(move || {
                    for _ in 0..200_000 {
                        match table.lookup(QueueId(7)) {
                            None | Some(A) | Some(B) => {}
                            Some(other) => panic!("torn binding observed: {other:?}"),
                        }
                    }
                })
            })
            .collect();

        for r in readers {
            r.join().unwrap();
        }
        stop.store(true, Ordering::Relaxed);
        writer.join().unwrap();
    }
}
