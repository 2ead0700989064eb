//! Host side of the steering hook.
//!
//! [`Dispatcher`] plays the role the XDP core plays for the kernel classifier: it owns the
//! redirect table for the lifetime of the attachment, keeps the set of live sockets, and for
//! every frame runs the classifier and then carries out the decision by moving the payload
//! into the selected ring or releasing it.
//!
//! The per-frame path takes no locks. The socket registry is an immutable map behind an
//! [`ArcSwap`]; register/unregister publish a new map, readers keep whatever map they loaded.
//! A socket torn down between lookup and transfer makes the frame a drop, never a misdelivery.

use {
    crate::{
        classifier::{Classifier, Frame, MissPolicy, RedirectDecision},
        error::{Error, Result},
        ring::{Rejected, RingProducer},
        table::{QueueId, RedirectTable, SocketHandle},
    },
    ahash::AHashMap,
    arc_swap::ArcSwap,
    std::sync::{
        atomic::{fence, AtomicU32, AtomicUsize, Ordering},
        Arc,
    },
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// no socket bound for the frame's queue
    UnmappedQueue,
    /// bound socket's ring is full, closed, or was torn down mid-transfer
    TargetUnavailable,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Disposition<B> {
    Redirected(SocketHandle),
    Dropped(DropReason),
    /// miss under [`MissPolicy::Pass`]: payload goes back to the regular stack
    Passed(B),
}

#[derive(Default)]
pub struct DispatchStats {
    pub frames: AtomicUsize,
    pub redirected: AtomicUsize,
    pub dropped_unmapped: AtomicUsize,
    pub dropped_unavailable: AtomicUsize,
    pub passed: AtomicUsize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames: usize,
    pub redirected: usize,
    pub dropped_unmapped: usize,
    pub dropped_unavailable: usize,
    pub passed: usize,
}

impl StatsSnapshot {
    pub fn dropped(&self) -> usize {
        self.dropped_unmapped + self.dropped_unavailable
    }
}

impl DispatchStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames: self.frames.load(Ordering::Relaxed),
            redirected: self.redirected.load(Ordering::Relaxed),
            dropped_unmapped: self.dropped_unmapped.load(Ordering::Relaxed),
            dropped_unavailable: self.dropped_unavailable.load(Ordering::Relaxed),
            passed: self.passed.load(Ordering::Relaxed),
        }
    }
}

type Registry<B> = AHashMap<SocketHandle, RingProducer<B>>;

pub struct Dispatcher<B> {
    table: Arc<RedirectTable>,
    sockets: ArcSwap<Registry<B>>,
    next_handle: AtomicU32,
    miss: MissPolicy,
    stats: DispatchStats,
}

impl<B> Dispatcher<B> {
    pub fn new(table: Arc<RedirectTable>, miss: MissPolicy) -> Self {
        log::info!(
            "dispatcher up: {} queue slots, miss policy {miss}",
            table.capacity()
        );
        Self {
            table,
            sockets: ArcSwap::from_pointee(Registry::default()),
            next_handle: AtomicU32::new(0),
            miss,
            stats: DispatchStats::default(),
        }
    }

    pub fn table(&self) -> &Arc<RedirectTable> {
        &self.table
    }

    pub fn classifier(&self) -> Classifier<'_> {
        Classifier::with_policy(&self.table, self.miss)
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    /// make a ring addressable; the handle is what gets bound into the table
    pub fn register(&self, ring: RingProducer<B>) -> SocketHandle {
        let mut handle = SocketHandle(0);
        self.sockets.rcu(|current| {
            handle = self.fresh_handle(current);
            let mut next = Registry::clone(current);
            next.insert(handle, ring.clone());
            next
        });
        log::debug!("registered socket {handle}");
        handle
    }

    // the counter wraps; ids still held by live sockets are skipped
    fn fresh_handle(&self, live: &Registry<B>) -> SocketHandle {
        loop {
            let candidate = SocketHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
            if !live.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    /// tear a socket down. queues still bound to it are unbound; frames already
    /// classified against it are dropped as unavailable.
    pub fn unregister(&self, handle: SocketHandle) -> bool {
        let mut removed = false;
        self.sockets.rcu(|current| {
            let mut next = Registry::clone(current);
            removed = next.remove(&handle).is_some();
            next
        });
        if removed {
            // pairs with the fence in publish: either this scan sees a concurrent
            // bind's entry, or that bind sees the socket gone
            fence(Ordering::SeqCst);
            for (queue, bound) in self.table.snapshot() {
                if bound == handle {
                    self.unbind_dead(queue, handle);
                }
            }
            log::debug!("unregistered socket {handle}");
        }
        removed
    }

    pub fn is_registered(&self, handle: SocketHandle) -> bool {
        self.sockets.load().contains_key(&handle)
    }

    pub fn bind(&self, queue: QueueId, handle: SocketHandle) -> Result<Option<SocketHandle>> {
        if !self.is_registered(handle) {
            return Err(Error::UnknownSocket(handle));
        }
        self.publish(queue, handle)
    }

    // write the binding, then re-check the socket: an unregister that ran between
    // the check in bind and the write would otherwise leave a dead binding behind
    fn publish(&self, queue: QueueId, handle: SocketHandle) -> Result<Option<SocketHandle>> {
        let previous = self.table.update(queue, handle)?;
        fence(Ordering::SeqCst);
        if !self.is_registered(handle) {
            self.unbind_dead(queue, handle);
            return Err(Error::UnknownSocket(handle));
        }
        log::info!("queue {queue} -> socket {handle} (was {previous:?})");
        Ok(previous)
    }

    // a rebind to another socket in the meantime wins
    fn unbind_dead(&self, queue: QueueId, handle: SocketHandle) {
        match self.table.delete_if(queue, handle) {
            Ok(true) => log::debug!("queue {queue} unbound from dead socket {handle}"),
            Ok(false) => {}
            Err(e) => log::warn!("unbinding queue {queue} from dead socket {handle}: {e}"),
        }
    }

    pub fn unbind(&self, queue: QueueId) -> Result<Option<SocketHandle>> {
        let previous = self.table.delete(queue)?;
        if let Some(handle) = previous {
            log::info!("queue {queue} unbound from socket {handle}");
        }
        Ok(previous)
    }

    /// classify one frame and carry out the decision
    #[inline]
    pub fn dispatch(&self, frame: Frame<B>) -> Disposition<B> {
        self.stats.frames.fetch_add(1, Ordering::Relaxed);

        match self.classifier().classify(&frame) {
            RedirectDecision::Redirect(handle) => self.transfer(handle, frame.into_payload()),
            RedirectDecision::Drop => {
                self.stats.dropped_unmapped.fetch_add(1, Ordering::Relaxed);
                Disposition::Dropped(DropReason::UnmappedQueue)
            }
            RedirectDecision::Pass => {
                self.stats.passed.fetch_add(1, Ordering::Relaxed);
                Disposition::Passed(frame.into_payload())
            }
        }
    }

    #[inline]
    fn transfer(&self, handle: SocketHandle, payload: B) -> Disposition<B> {
        let sockets = self.sockets.load();
        let delivered = match sockets.get(&handle) {
            Some(ring) => match ring.try_deliver(payload) {
                Ok(()) => true,
                // rejected buffer is released here
                Err(Rejected::Full(_) | Rejected::Closed(_)) => false,
            },
            None => false,
        };

        if delivered {
            self.stats.redirected.fetch_add(1, Ordering::Relaxed);
            Disposition::Redirected(handle)
        } else {
            self.stats.dropped_unavailable.fetch_add(1, Ordering::Relaxed);
            Disposition::Dropped(DropReason::TargetUnavailable)
        }
    }
}
