//! Resource limit values and their resolution from directive tokens.

use std::fmt;

use nix::sys::resource::{Resource, getrlimit};

use crate::error::{CmdlineError, Result};

/// RLIM64_INFINITY
#[allow(clippy::unnecessary_cast)]
pub const RLIM_INFINITY: u64 = libc::RLIM_INFINITY as u64;

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RlimitKind {
    As,
    Core,
    Cpu,
    Fsize,
    Nofile,
    Nproc,
    Stack,
}

impl RlimitKind {
    pub const ALL: [RlimitKind; 7] = [
        Self::As,
        Self::Core,
        Self::Cpu,
        Self::Fsize,
        Self::Nofile,
        Self::Nproc,
        Self::Stack,
    ];

    pub fn resource(self) -> Resource {
        match self {
            Self::As => Resource::RLIMIT_AS,
            Self::Core => Resource::RLIMIT_CORE,
            Self::Cpu => Resource::RLIMIT_CPU,
            Self::Fsize => Resource::RLIMIT_FSIZE,
            Self::Nofile => Resource::RLIMIT_NOFILE,
            Self::Nproc => Resource::RLIMIT_NPROC,
            Self::Stack => Resource::RLIMIT_STACK,
        }
    }

    /// Numeric directive values are given in MiB for byte-sized limits.
    pub fn multiplier(self) -> u64 {
        match self {
            Self::As | Self::Core | Self::Fsize | Self::Stack => MIB,
            Self::Cpu | Self::Nofile | Self::Nproc => 1,
        }
    }
}

impl fmt::Display for RlimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::As => "RLIMIT_AS",
            Self::Core => "RLIMIT_CORE",
            Self::Cpu => "RLIMIT_CPU",
            Self::Fsize => "RLIMIT_FSIZE",
            Self::Nofile => "RLIMIT_NOFILE",
            Self::Nproc => "RLIMIT_NPROC",
            Self::Stack => "RLIMIT_STACK",
        };
        f.write_str(name)
    }
}

/// Current `(soft, hard)` limits of this process.
pub fn current_limits(kind: RlimitKind) -> Result<(u64, u64)> {
    let (soft, hard) =
        getrlimit(kind.resource()).map_err(|source| CmdlineError::HostQuery { kind, source })?;
    Ok((soft, hard))
}

/// Resolves an rlimit directive token.
///
/// `inf` is unlimited, `def`/`soft` and `max`/`hard` are the current soft
/// and hard limits, anything else must be a non-negative integer scaled by
/// [`RlimitKind::multiplier`].
pub fn parse_rlimit(kind: RlimitKind, value: &str) -> Result<u64> {
    if value.eq_ignore_ascii_case("inf") {
        return Ok(RLIM_INFINITY);
    }
    let (soft, hard) = current_limits(kind)?;
    if value.eq_ignore_ascii_case("def") || value.eq_ignore_ascii_case("soft") {
        return Ok(soft);
    }
    if value.eq_ignore_ascii_case("max") || value.eq_ignore_ascii_case("hard") {
        return Ok(hard);
    }

    let invalid = || CmdlineError::InvalidRLimit {
        kind,
        value: value.to_string(),
    };
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    value
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(kind.multiplier()))
        .ok_or_else(invalid)
}

/// One resolved value per limit kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RlimitSet {
    pub as_: u64,
    pub core: u64,
    pub cpu: u64,
    pub fsize: u64,
    pub nofile: u64,
    pub nproc: u64,
    pub stack: u64,
}

impl RlimitSet {
    /// Jail defaults. Process count and stack follow the current soft limits.
    pub fn with_defaults() -> Result<Self> {
        Ok(Self {
            as_: 512 * MIB,
            core: 0,
            cpu: 600,
            fsize: MIB,
            nofile: 32,
            nproc: parse_rlimit(RlimitKind::Nproc, "soft")?,
            stack: parse_rlimit(RlimitKind::Stack, "soft")?,
        })
    }

    pub fn get(&self, kind: RlimitKind) -> u64 {
        match kind {
            RlimitKind::As => self.as_,
            RlimitKind::Core => self.core,
            RlimitKind::Cpu => self.cpu,
            RlimitKind::Fsize => self.fsize,
            RlimitKind::Nofile => self.nofile,
            RlimitKind::Nproc => self.nproc,
            RlimitKind::Stack => self.stack,
        }
    }

    pub fn set(&mut self, kind: RlimitKind, value: u64) {
        let slot = match kind {
            RlimitKind::As => &mut self.as_,
            RlimitKind::Core => &mut self.core,
            RlimitKind::Cpu => &mut self.cpu,
            RlimitKind::Fsize => &mut self.fsize,
            RlimitKind::Nofile => &mut self.nofile,
            RlimitKind::Nproc => &mut self.nproc,
            RlimitKind::Stack => &mut self.stack,
        };
        *slot = value;
    }
}
