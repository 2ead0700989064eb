//! Per-frame steering decision.
//!
//! Mirrors the kernel classifier in `xdp-ebpf`: read the frame's rx queue, look it up in
//! the [`RedirectTable`], redirect on a hit and apply the miss policy otherwise. The
//! decision is a pure function of the queue index and the table contents at the instant
//! of the lookup.

use {
    crate::table::{QueueId, RedirectTable, SocketHandle},
    std::{fmt, str::FromStr},
};

/// frame as delivered by the driver. `payload` is the unique buffer handle; it is moved
/// through the steering path, never copied.
#[derive(Debug)]
pub struct Frame<B> {
    pub rx_queue_index: u32,
    pub payload: B,
}

impl<B> Frame<B> {
    pub fn new(rx_queue_index: u32, payload: B) -> Self {
        Self {
            rx_queue_index,
            payload,
        }
    }

    #[inline(always)]
    pub fn queue(&self) -> QueueId {
        QueueId(self.rx_queue_index)
    }

    pub fn into_payload(self) -> B {
        self.payload
    }
}

/// what happens to a frame whose queue has no socket bound
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MissPolicy {
    /// fail closed: the frame is released (XDP_DROP)
    #[default]
    Drop,
    /// hand the frame to the regular network stack (XDP_PASS)
    Pass,
}

impl MissPolicy {
    pub fn action(self) -> XdpAction {
        match self {
            MissPolicy::Drop => XdpAction::Drop,
            MissPolicy::Pass => XdpAction::Pass,
        }
    }
}

impl FromStr for MissPolicy {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "drop" => Ok(MissPolicy::Drop),
            "pass" => Ok(MissPolicy::Pass),
            _ => Err(crate::error::Error::InvalidSetting {
                what: "miss policy",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for MissPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MissPolicy::Drop => "drop",
            MissPolicy::Pass => "pass",
        })
    }
}

/// completion codes of the XDP hook (`enum xdp_action`)
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum XdpAction {
    Aborted = 0,
    Drop = 1,
    Pass = 2,
    Tx = 3,
    Redirect = 4,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RedirectDecision {
    Redirect(SocketHandle),
    Drop,
    /// only produced under [`MissPolicy::Pass`]
    Pass,
}

impl RedirectDecision {
    pub fn action(self) -> XdpAction {
        match self {
            RedirectDecision::Redirect(_) => XdpAction::Redirect,
            RedirectDecision::Drop => XdpAction::Drop,
            RedirectDecision::Pass => XdpAction::Pass,
        }
    }

    pub fn target(self) -> Option<SocketHandle> {
        match self {
            RedirectDecision::Redirect(handle) => Some(handle),
            _ => None,
        }
    }
}

/// classify under the default fail-closed policy
#[inline]
pub fn classify<B>(table: &RedirectTable, frame: &Frame<B>) -> RedirectDecision {
    Classifier::new(table).classify(frame)
}

/// non-owning view of a redirect table plus the miss policy.
/// cheap to copy, one per polling core is fine.
#[derive(Clone, Copy)]
pub struct Classifier<'t> {
    table: &'t RedirectTable,
    miss: MissPolicy,
}

impl<'t> Classifier<'t> {
    pub fn new(table: &'t RedirectTable) -> Self {
        Self::with_policy(table, MissPolicy::default())
    }

    pub fn with_policy(table: &'t RedirectTable, miss: MissPolicy) -> Self {
        Self { table, miss }
    }

    #[inline(always)]
    pub fn classify<B>(&self, frame: &Frame<B>) -> RedirectDecision {
        self.classify_queue(frame.queue())
    }

    #[inline(always)]
    pub fn classify_queue(&self, queue: QueueId) -> RedirectDecision {
        match self.table.lookup(queue) {
            Some(handle) => RedirectDecision::Redirect(handle),
            None => match self.miss {
                MissPolicy::Drop => RedirectDecision::Drop,
                MissPolicy::Pass => RedirectDecision::Pass,
            },
        }
    }
}

impl fmt::Debug for Classifier<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Classifier")
            .field("capacity", &self.table.capacity())
            .field("miss", &self.miss)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with(bindings: &[(u32, u32)]) -> RedirectTable {
        let table = RedirectTable::new();
        for &(q, s) in bindings {
            table.update(QueueId(q), SocketHandle(s)).unwrap();
        }
        table
    }

    #[test]
    fn test_hit_redirects_to_bound_socket() {
        let table = table_with(&[(0, 100), (1, 101)]);
        assert_eq!(
            classify(&table, &Frame::new(0, ())),
            RedirectDecision::Redirect(SocketHandle(100))
        );
        assert_eq!(
            classify(&table, &Frame::new(1, ())),
            RedirectDecision::Redirect(SocketHandle(101))
        );
    }

    #[test]
    fn test_miss_drops_by_default() {
        let table = table_with(&[(0, 100)]);
        let decision = classify(&table, &Frame::new(2, ()));
        assert_eq!(decision, RedirectDecision::Drop);
        assert_eq!(decision.action(), XdpAction::Drop);
        assert_eq!(decision.target(), None);
    }

    #[test]
    fn test_miss_pass_policy() {
        let table = table_with(&[(0, 100)]);
        let classifier = Classifier::with_policy(&table, MissPolicy::Pass);
        assert_eq!(classifier.classify_queue(QueueId(5)), RedirectDecision::Pass);
        assert_eq!(
            classifier.classify_queue(QueueId(0)),
            RedirectDecision::Redirect(SocketHandle(100))
        );
    }

    #[test]
    fn test_out_of_range_queue_is_a_miss() {
        let table = table_with(&[(63, 7)]);
        assert_eq!(
            classify(&table, &Frame::new(63, ())),
            RedirectDecision::Redirect(SocketHandle(7))
        );
        assert_eq!(classify(&table, &Frame::new(64, ())), RedirectDecision::Drop);
        assert_eq!(
            classify(&table, &Frame::new(u32::MAX, ())),
            RedirectDecision::Drop
        );
    }

    #[test]
    fn test_every_bound_queue_hits_its_own_socket() {
        let table = RedirectTable::new();
        for q in (0..64).step_by(2) {
            table.update(QueueId(q), SocketHandle(1000 + q)).unwrap();
        }
        let classifier = Classifier::new(&table);
        for q in 0..64 {
            let expected = if q % 2 == 0 {
                RedirectDecision::Redirect(SocketHandle(1000 + q))
            } else {
                RedirectDecision::Drop
            };
            assert_eq!(classifier.classify_queue(QueueId(q)), expected, "queue {q}");
        }
    }

    #[test]
    fn test_repeated_classification_is_stable() {
        let table = table_with(&[(3, 33)]);
        let classifier = Classifier::new(&table);
        let first = classifier.classify_queue(QueueId(3));
        for _ in 0..1000 {
            assert_eq!(classifier.classify_queue(QueueId(3)), first);
        }
    }

    #[test]
    fn test_decision_follows_table_changes() {
        let table = table_with(&[(0, 1), (1, 2)]);
        let classifier = Classifier::new(&table);
        assert_eq!(classifier.classify_queue(QueueId(2)), RedirectDecision::Drop);

        table.update(QueueId(2), SocketHandle(3)).unwrap();
        assert_eq!(
            classifier.classify_queue(QueueId(2)),
            RedirectDecision::Redirect(SocketHandle(3))
        );

        table.delete(QueueId(0)).unwrap();
        assert_eq!(classifier.classify_queue(QueueId(0)), RedirectDecision::Drop);
    }

    #[test]
    fn test_action_codes_match_kernel() {
        assert_eq!(XdpAction::Aborted as u32, 0);
        assert_eq!(XdpAction::Drop as u32, 1);
        assert_eq!(XdpAction::Pass as u32, 2);
        assert_eq!(XdpAction::Tx as u32, 3);
        assert_eq!(XdpAction::Redirect as u32, 4);
        assert_eq!(MissPolicy::Pass.action(), XdpAction::Pass);
    }

    #[test]
    fn test_miss_policy_parse() {
        assert_eq!("drop".parse::<MissPolicy>().unwrap(), MissPolicy::Drop);
        assert_eq!("PASS".parse::<MissPolicy>().unwrap(), MissPolicy::Pass);
        assert!("redirect".parse::<MissPolicy>().is_err());
        assert_eq!(MissPolicy::Pass.to_string(), "pass");
    }
}
