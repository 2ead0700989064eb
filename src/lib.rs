//! Ingress steering of NIC receive queues into zero-copy sockets.
//!
//! The kernel side lives in the `xdp-ebpf` crate: an XDP program that redirects each frame
//! to the AF_XDP socket bound to the frame's rx queue and drops it when none is bound.
//! This crate carries the same decision as portable code ([`table`], [`classifier`]),
//! an in-process host for it ([`dispatch`], [`ring`]), and on Linux the loader that puts
//! the real program on an interface ([`program`]).

pub mod classifier;
pub mod config;
pub mod dispatch;
pub mod error;
#[cfg(target_os = "linux")]
pub mod program;
pub mod ring;
pub mod table;

pub use {
    classifier::{classify, Classifier, Frame, MissPolicy, RedirectDecision, XdpAction},
    config::{AttachMode, SteerConfig},
    dispatch::{Disposition, DispatchStats, Dispatcher, DropReason, StatsSnapshot},
    error::{Error, Result},
    ring::{Rejected, RingConsumer, RingProducer, XskRing},
    table::{QueueId, RedirectTable, SocketHandle, DEFAULT_CAPACITY, MAX_CAPACITY},
};

#[cfg(target_os = "linux")]
pub use program::{ProgramOptions, RedirectProgram};

/// pin the calling thread to the given cpus
#[cfg(target_os = "linux")]
pub fn set_cpu_affinity(cpus: impl IntoIterator<Item = usize>) -> std::io::Result<()> {
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        for cpu in cpus {
            // CPU_SET indexes a fixed bitmap and panics past its end
            if cpu >= libc::CPU_SETSIZE as usize {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("cpu {cpu} outside affinity mask of {} cpus", libc::CPU_SETSIZE),
                ));
            }
            libc::CPU_SET(cpu, &mut set);
        }
        if libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}
