use crate::table::{QueueId, SocketHandle};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("redirect table capacity {0} outside 1..={max}", max = crate::table::MAX_CAPACITY)]
    InvalidCapacity(u32),

    #[error("queue {queue} outside redirect table capacity {capacity}")]
    QueueOutOfRange { queue: QueueId, capacity: u32 },

    #[error("socket {0} is not registered")]
    UnknownSocket(SocketHandle),

    #[error("invalid {what}: {value:?}")]
    InvalidSetting { what: &'static str, value: String },

    #[error("interface {0:?} not found")]
    InterfaceNotFound(String),

    #[error("{0} not found in XDP object")]
    MissingObject(&'static str),

    #[error("redirect map operation failed on queue {queue}: {source}")]
    MapSyscall {
        queue: QueueId,
        #[source]
        source: std::io::Error,
    },

    #[cfg(target_os = "linux")]
    #[error("loading XDP object: {0}")]
    Load(#[from] aya::EbpfError),

    #[cfg(target_os = "linux")]
    #[error("XDP program rejected or failed to attach: {0}")]
    Program(#[from] aya::programs::ProgramError),

    #[cfg(target_os = "linux")]
    #[error("redirect map: {0}")]
    Map(#[from] aya::maps::MapError),

    #[cfg(target_os = "linux")]
    #[error("raising capability {cap:?}: {reason}")]
    Capability {
        cap: caps::Capability,
        reason: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
