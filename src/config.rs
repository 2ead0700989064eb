use {
    crate::{
        classifier::MissPolicy,
        error::{Error, Result},
        table::{DEFAULT_CAPACITY, MAX_CAPACITY},
    },
    std::{fmt, str::FromStr},
};

pub const DEFAULT_RING_DEPTH: usize = 2048;

/// how the classifier hooks into the driver
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AttachMode {
    /// native first, generic if the driver refuses
    #[default]
    Auto,
    /// driver-level XDP (XDP_FLAGS_DRV_MODE)
    Native,
    /// skb-level XDP (XDP_FLAGS_SKB_MODE)
    Generic,
}

impl FromStr for AttachMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(AttachMode::Auto),
            "native" | "drv" => Ok(AttachMode::Native),
            "generic" | "skb" => Ok(AttachMode::Generic),
            _ => Err(Error::InvalidSetting {
                what: "attach mode",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for AttachMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AttachMode::Auto => "auto",
            AttachMode::Native => "native",
            AttachMode::Generic => "generic",
        })
    }
}

/// everything a collaborator needs to bring steering up on one interface.
/// bindings themselves are not configuration; they go through the table at runtime.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SteerConfig {
    pub interface: String,
    pub capacity: u32,
    pub miss_policy: MissPolicy,
    pub attach_mode: AttachMode,
    /// frames in flight per socket ring
    pub ring_depth: usize,
}

impl Default for SteerConfig {
    fn default() -> Self {
        Self {
            interface: "lo".to_string(),
            capacity: DEFAULT_CAPACITY,
            miss_policy: MissPolicy::Drop,
            attach_mode: AttachMode::Auto,
            ring_depth: DEFAULT_RING_DEPTH,
        }
    }
}

impl SteerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interface.is_empty() || self.interface.contains('\0') {
            return Err(Error::InvalidSetting {
                what: "interface",
                value: self.interface.clone(),
            });
        }
        if self.capacity == 0 || self.capacity > MAX_CAPACITY {
            return Err(Error::InvalidCapacity(self.capacity));
        }
        if self.ring_depth == 0 {
            return Err(Error::InvalidSetting {
                what: "ring depth",
                value: self.ring_depth.to_string(),
            });
        }
        Ok(())
    }

    #[cfg(target_os = "linux")]
    pub fn program_options(&self) -> crate::program::ProgramOptions {
        crate::program::ProgramOptions {
            miss_policy: self.miss_policy,
            attach_mode: self.attach_mode,
        }
    }
}
