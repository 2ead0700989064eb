// in-process stand-in for an AF_XDP rx ring.
// a redirect moves the frame's buffer handle into the ring; the consumer side owns it
// from then on. a full or closed ring rejects the handle and gives it back to the caller,
// nothing is ever copied or half delivered.

use {
    crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError},
    std::time::Duration,
};

pub struct XskRing;

impl XskRing {
    /// ring holding at most `depth` frames in flight
    pub fn bounded<B>(depth: usize) -> (RingProducer<B>, RingConsumer<B>) {
        let (tx, rx) = crossbeam_channel::bounded(depth);
        (RingProducer { tx }, RingConsumer { rx })
    }
}

#[derive(Debug)]
pub enum Rejected<B> {
    Full(B),
    Closed(B),
}

pub struct RingProducer<B> {
    tx: Sender<B>,
}

impl<B> Clone for RingProducer<B> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<B> RingProducer<B> {
    /// never blocks
    #[inline]
    pub fn try_deliver(&self, buf: B) -> Result<(), Rejected<B>> {
        self.tx.try_send(buf).map_err(|e| match e {
            TrySendError::Full(b) => Rejected::Full(b),
            TrySendError::Disconnected(b) => Rejected::Closed(b),
        })
    }

    pub fn is_full(&self) -> bool {
        self.tx.is_full()
    }
}

pub struct RingConsumer<B> {
    rx: Receiver<B>,
}

impl<B> RingConsumer<B> {
    pub fn try_recv(&self) -> Option<B> {
        match self.rx.try_recv() {
            Ok(b) => Some(b),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// blocks until a frame arrives; `None` once every producer is gone and the ring is empty
    pub fn recv(&self) -> Option<B> {
        self.rx.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<B> {
        match self.rx.recv_timeout(timeout) {
            Ok(b) => Some(b),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// pull everything currently queued
    pub fn drain(&self) -> Vec<B> {
        self.rx.try_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deliver_and_receive_in_order() {
        let (tx, rx) = XskRing::bounded::<u64>(4);
        tx.try_deliver(1).unwrap();
        tx.try_deliver(2).unwrap();
        assert_eq!(rx.len(), 2);
        assert_eq!(rx.try_recv(), Some(1));
        assert_eq!(rx.recv(), Some(2));
        assert_eq!(rx.try_recv(), None);
    }

    #[test]
    fn test_full_ring_hands_buffer_back() {
        let (tx, rx) = XskRing::bounded::<Vec<u8>>(1);
        tx.try_deliver(vec![1]).unwrap();
        assert!(tx.is_full());
        match tx.try_deliver(vec![2, 2]) {
            Err(Rejected::Full(buf)) => assert_eq!(buf, vec![2, 2]),
            other => panic!("expected full, got {other:?}"),
        }
        assert_eq!(rx.drain(), vec![vec![1]]);
    }

    #[test]
    fn test_closed_ring_rejects() {
        let (tx, rx) = XskRing::bounded::<u8>(2);
        drop(rx);
        assert!(matches!(tx.try_deliver(9), Err(Rejected::Closed(9))));
    }

    #[test]
    fn test_consumer_sees_end_after_producers_drop() {
        let (tx, rx) = XskRing::bounded::<u8>(2);
        tx.try_deliver(1).unwrap();
        drop(tx);
        assert_eq!(rx.recv(), Some(1));
        assert_eq!(rx.recv(), None);
        assert_eq!(rx.recv_timeout(Duration::from_millis(1)), None);
    }
}
