// loader for the kernel classifier in xdp-ebpf.
// owns the program, its XSKS_MAP and the XDP link; dropping or detaching tears all three
// down together.

use {
    crate::{
        classifier::MissPolicy,
        config::AttachMode,
        error::{Error, Result},
        table::{QueueId, MAX_CAPACITY},
    },
    aya::{
        maps::{Map, XskMap},
        programs::{
            xdp::{XdpFlags, XdpLinkId},
            Xdp,
        },
        Ebpf, EbpfLoader,
    },
    caps::{CapSet, Capability},
    std::{
        ffi::CString,
        io,
        mem,
        os::fd::{AsFd, AsRawFd, RawFd},
        path::Path,
    },
};

pub const PROGRAM_NAME: &str = "xdp_redirect";
pub const MAP_NAME: &str = "XSKS_MAP";
pub const MISS_ACTION_GLOBAL: &str = "MISS_ACTION";

const BPF_MAP_DELETE_ELEM: libc::c_long = 3;

#[derive(Clone, Copy, Debug, Default)]
pub struct ProgramOptions {
    pub miss_policy: MissPolicy,
    pub attach_mode: AttachMode,
}

pub struct RedirectProgram {
    ebpf: Ebpf,
    link: Option<(u32, XdpLinkId)>,
    options: ProgramOptions,
}

impl RedirectProgram {
    /// load the compiled classifier object. the verifier runs here: a program it
    /// rejects never gets attached.
    pub fn load(object: &[u8], options: &ProgramOptions) -> Result<Self> {
        let miss_action = options.miss_policy.action() as u32;
        let mut ebpf = EbpfLoader::new()
            .set_global(MISS_ACTION_GLOBAL, &miss_action, true)
            .load(object)?;

        if ebpf.map(MAP_NAME).is_none() {
            return Err(Error::MissingObject(MAP_NAME));
        }
        let program: &mut Xdp = ebpf
            .program_mut(PROGRAM_NAME)
            .ok_or(Error::MissingObject(PROGRAM_NAME))?
            .try_into()?;
        program.load()?;

        log::info!(
            "loaded {PROGRAM_NAME}, miss policy {}",
            options.miss_policy
        );
        Ok(Self {
            ebpf,
            link: None,
            options: *options,
        })
    }

    pub fn load_file(path: impl AsRef<Path>, options: &ProgramOptions) -> Result<Self> {
        let object = std::fs::read(path.as_ref())?;
        Self::load(&object, options)
    }

    /// attach to one interface's ingress hook
    pub fn attach(&mut self, if_index: u32) -> Result<()> {
        let mode = self.options.attach_mode;
        let program: &mut Xdp = self
            .ebpf
            .program_mut(PROGRAM_NAME)
            .ok_or(Error::MissingObject(PROGRAM_NAME))?
            .try_into()?;

        let link = match mode {
            AttachMode::Native => program.attach_to_if_index(if_index, XdpFlags::DRV_MODE)?,
            AttachMode::Generic => program.attach_to_if_index(if_index, XdpFlags::SKB_MODE)?,
            AttachMode::Auto => {
                // native first, generic when the driver has no XDP support
                match program.attach_to_if_index(if_index, XdpFlags::DRV_MODE) {
                    Ok(link) => link,
                    Err(e) => {
                        log::warn!(
                            "native attach on if_index {if_index} failed: {e}, trying generic"
                        );
                        program.attach_to_if_index(if_index, XdpFlags::SKB_MODE)?
                    }
                }
            }
        };

        log::info!("{PROGRAM_NAME} attached to if_index {if_index} ({mode})");
        self.link = Some((if_index, link));
        Ok(())
    }

    pub fn capacity(&self) -> u32 {
        MAX_CAPACITY
    }

    /// bind an AF_XDP socket to `queue`
    pub fn update(&mut self, queue: QueueId, socket: impl AsRawFd) -> Result<()> {
        self.check_queue(queue)?;
        let fd = socket.as_raw_fd();
        let map = self
            .ebpf
            .map_mut(MAP_NAME)
            .ok_or(Error::MissingObject(MAP_NAME))?;
        let mut xsks: XskMap<_> = map.try_into()?;
        xsks.set(queue.0, fd, 0)?;

        log::info!("queue {queue} -> socket fd {fd}");
        Ok(())
    }

    /// unbind `queue`. `false` when nothing was bound.
    pub fn delete(&mut self, queue: QueueId) -> Result<bool> {
        self.check_queue(queue)?;
        let map_fd = self.map_fd()?;
        let removed = delete_elem(map_fd, queue)?;
        if removed {
            log::info!("queue {queue} unbound");
        }
        Ok(removed)
    }

    /// detach from the interface and release program and map
    pub fn detach(mut self) -> Result<()> {
        if let Some((if_index, link)) = self.link.take() {
            let program: &mut Xdp = self
                .ebpf
                .program_mut(PROGRAM_NAME)
                .ok_or(Error::MissingObject(PROGRAM_NAME))?
                .try_into()?;
            program.detach(link)?;
            log::info!("{PROGRAM_NAME} detached from if_index {if_index}");
        }
        Ok(())
    }

    fn check_queue(&self, queue: QueueId) -> Result<()> {
        if queue.0 >= self.capacity() {
            return Err(Error::QueueOutOfRange {
                queue,
                capacity: self.capacity(),
            });
        }
        Ok(())
    }

    fn map_fd(&self) -> Result<RawFd> {
        match self.ebpf.map(MAP_NAME) {
            Some(Map::XskMap(data)) => Ok(data.fd().as_fd().as_raw_fd()),
            _ => Err(Error::MissingObject(MAP_NAME)),
        }
    }
}

// aya's XskMap has no removal, so go through bpf(2) directly
#[repr(C)]
struct MapElemAttr {
    map_fd: u32,
    _pad: u32,
    key: u64,
    value: u64,
    flags: u64,
}

fn delete_elem(map_fd: RawFd, queue: QueueId) -> Result<bool> {
    let key = queue.0;
    let attr = MapElemAttr {
        map_fd: map_fd as u32,
        _pad: 0,
        key: &key as *const u32 as u64,
        value: 0,
        flags: 0,
    };
    let rc = unsafe {
        libc::syscall(
            libc::SYS_bpf,
            BPF_MAP_DELETE_ELEM,
            &attr as *const MapElemAttr,
            mem::size_of::<MapElemAttr>() as libc::c_uint,
        )
    };
    if rc == 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ENOENT) {
        return Ok(false);
    }
    Err(Error::MapSyscall { queue, source: err })
}

/// resolve an interface name to its index
pub fn if_index(name: &str) -> Result<u32> {
    let c_name =
        CString::new(name).map_err(|_| Error::InterfaceNotFound(name.to_string()))?;
    let index = unsafe { libc::if_nametoindex(c_name.as_ptr()) };
    if index == 0 {
        return Err(Error::InterfaceNotFound(name.to_string()));
    }
    Ok(index)
}

/// loading and attaching needs BPF and NET_ADMIN in the effective set
pub fn raise_capabilities() -> Result<()> {
    for cap in [Capability::CAP_BPF, Capability::CAP_NET_ADMIN] {
        caps::raise(None, CapSet::Effective, cap).map_err(|e| Error::Capability {
            cap,
            reason: e.to_string(),
        })?;
    }
    Ok(())
}
