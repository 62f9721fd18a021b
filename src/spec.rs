//! The finished jail description and the builder that accumulates it while the
//! command line is scanned.

use std::os::fd::{AsFd, BorrowedFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::LevelFilter;
use nix::sched::CloneFlags;
use nix::sys::personality::Persona;

use crate::error::Result;
use crate::mnt::{MountEntry, MountPlan};
use crate::rlimit::RlimitSet;
use crate::user::{IdMapEntry, IdMaps};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecMode {
    /// Wait for TCP connections, one jail per connection.
    ListenTcp,
    /// Run a single jailed process using clone/execve.
    #[default]
    StandaloneOnce,
    /// Execve into the jail without a supervising process.
    StandaloneExecve,
    /// Like `StandaloneOnce`, forever.
    StandaloneRerun,
}

impl ExecMode {
    /// Selects a mode by the first letter of `value`.
    pub fn from_letter(value: &str) -> Option<Self> {
        match value.chars().next()? {
            'l' => Some(Self::ListenTcp),
            'o' => Some(Self::StandaloneOnce),
            'e' => Some(Self::StandaloneExecve),
            'r' => Some(Self::StandaloneRerun),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::ListenTcp => "LISTEN_TCP",
            Self::StandaloneOnce => "STANDALONE_ONCE",
            Self::StandaloneExecve => "STANDALONE_EXECVE",
            Self::StandaloneRerun => "STANDALONE_RERUN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Net,
    User,
    Mount,
    Pid,
    Ipc,
    Uts,
    Cgroup,
}

/// Which namespaces the jail is cloned into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Namespaces {
    pub net: bool,
    pub user: bool,
    pub mount: bool,
    pub pid: bool,
    pub ipc: bool,
    pub uts: bool,
    pub cgroup: bool,
}

impl Default for Namespaces {
    fn default() -> Self {
        Self {
            net: true,
            user: true,
            mount: true,
            pid: true,
            ipc: true,
            uts: true,
            cgroup: true,
        }
    }
}

impl Namespaces {
    pub fn set(&mut self, ns: Namespace, enabled: bool) {
        let slot = match ns {
            Namespace::Net => &mut self.net,
            Namespace::User => &mut self.user,
            Namespace::Mount => &mut self.mount,
            Namespace::Pid => &mut self.pid,
            Namespace::Ipc => &mut self.ipc,
            Namespace::Uts => &mut self.uts,
            Namespace::Cgroup => &mut self.cgroup,
        };
        *slot = enabled;
    }

    pub fn clone_flags(&self) -> CloneFlags {
        let mut flags = CloneFlags::empty();

        if self.net {
            flags |= CloneFlags::CLONE_NEWNET;
        }
        if self.user {
            flags |= CloneFlags::CLONE_NEWUSER;
        }
        if self.mount {
            flags |= CloneFlags::CLONE_NEWNS;
        }
        if self.pid {
            flags |= CloneFlags::CLONE_NEWPID;
        }
        if self.ipc {
            flags |= CloneFlags::CLONE_NEWIPC;
        }
        if self.uts {
            flags |= CloneFlags::CLONE_NEWUTS;
        }
        if self.cgroup {
            flags |= CloneFlags::CLONE_NEWCGROUP;
        }

        flags
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgroupKind {
    Mem,
    Pids,
    NetCls,
    Cpu,
}

/// Settings of one cgroup v1 controller. A `limit` of 0 disables it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgroupController {
    pub mount: String,
    pub parent: String,
    /// Bytes for memory, pids for pids, classid for net_cls, ms/sec for cpu.
    pub limit: u64,
}

impl CgroupController {
    fn new(mount: &str) -> Self {
        Self {
            mount: mount.to_string(),
            parent: "NSJAIL".to_string(),
            limit: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cgroups {
    pub mem: CgroupController,
    pub pids: CgroupController,
    pub net_cls: CgroupController,
    pub cpu: CgroupController,
}

impl Default for Cgroups {
    fn default() -> Self {
        Self {
            mem: CgroupController::new("/sys/fs/cgroup/memory"),
            pids: CgroupController::new("/sys/fs/cgroup/pids"),
            net_cls: CgroupController::new("/sys/fs/cgroup/net_cls"),
            cpu: CgroupController::new("/sys/fs/cgroup/cpu"),
        }
    }
}

impl Cgroups {
    pub fn get(&self, kind: CgroupKind) -> &CgroupController {
        match kind {
            CgroupKind::Mem => &self.mem,
            CgroupKind::Pids => &self.pids,
            CgroupKind::NetCls => &self.net_cls,
            CgroupKind::Cpu => &self.cpu,
        }
    }

    pub fn get_mut(&mut self, kind: CgroupKind) -> &mut CgroupController {
        match kind {
            CgroupKind::Mem => &mut self.mem,
            CgroupKind::Pids => &mut self.pids,
            CgroupKind::NetCls => &mut self.net_cls,
            CgroupKind::Cpu => &mut self.cpu,
        }
    }
}

/// Listening socket and MACVLAN settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetSettings {
    pub port: u16,
    pub bindhost: String,
    /// 0 is unlimited.
    pub max_conns_per_ip: u32,
    pub iface_no_lo: bool,
    pub macvlan_iface: Option<String>,
    pub macvlan_vs_ip: String,
    pub macvlan_vs_nm: String,
    pub macvlan_vs_gw: String,
}

impl Default for NetSettings {
    fn default() -> Self {
        Self {
            port: 0,
            bindhost: "::".to_string(),
            max_conns_per_ip: 0,
            iface_no_lo: false,
            macvlan_iface: None,
            macvlan_vs_ip: "0.0.0.0".to_string(),
            macvlan_vs_nm: "255.255.255.0".to_string(),
            macvlan_vs_gw: "0.0.0.0".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// Takes precedence over `fd` when set.
    pub file: Option<PathBuf>,
    pub fd: RawFd,
    pub level: LevelFilter,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            file: None,
            fd: libc::STDERR_FILENO,
            level: LevelFilter::Info,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvPolicy {
    /// Pass the whole parent environment through.
    pub keep_env: bool,
    /// Extra `NAME=value` (or bare `NAME`) entries.
    pub vars: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeccompSource {
    pub file: Option<PathBuf>,
    pub string: Option<String>,
}

/// Process-level knobs of the jailed child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSettings {
    pub daemonize: bool,
    /// Seconds, 0 is unlimited.
    pub time_limit: u64,
    /// 0 is unlimited.
    pub max_cpus: u32,
    pub keep_caps: bool,
    /// Capabilities retained when dropping the rest.
    pub caps: Vec<u32>,
    pub silent: bool,
    pub skip_setsid: bool,
    pub disable_no_new_privs: bool,
    /// File descriptors left open across exec.
    pub pass_fds: Vec<RawFd>,
}

impl Default for ProcessSettings {
    fn default() -> Self {
        Self {
            daemonize: false,
            time_limit: 0,
            max_cpus: 0,
            keep_caps: false,
            caps: Vec::new(),
            silent: false,
            skip_setsid: false,
            disable_no_new_privs: false,
            pass_fds: vec![
                libc::STDIN_FILENO,
                libc::STDOUT_FILENO,
                libc::STDERR_FILENO,
            ],
        }
    }
}

/// What gets executed inside the jail.
#[derive(Debug, Clone)]
pub enum ExecTarget {
    Path(String),
    /// Executed with execveat(2) through a descriptor opened before the
    /// mount namespace is set up.
    Fd { path: String, fd: Arc<OwnedFd> },
}

impl ExecTarget {
    pub fn path(&self) -> &str {
        match self {
            Self::Path(path) | Self::Fd { path, .. } => path,
        }
    }

    pub fn fd(&self) -> Option<BorrowedFd<'_>> {
        match self {
            Self::Path(_) => None,
            Self::Fd { fd, .. } => Some(fd.as_fd()),
        }
    }
}

/// Mutable accumulator for a [`JailSpec`].
///
/// Scalars follow "last write wins", lists are append-only.
#[derive(Debug, Clone)]
pub struct SpecBuilder {
    pub mode: ExecMode,
    pub hostname: String,
    pub cwd: String,
    pub chroot: Option<String>,
    pub is_root_rw: bool,
    pub exec_file: Option<String>,
    pub use_execveat: bool,
    pub argv: Vec<String>,
    pub env: EnvPolicy,
    pub rlimits: RlimitSet,
    pub personality: Persona,
    pub namespaces: Namespaces,
    pub cgroups: Cgroups,
    pub net: NetSettings,
    pub mounts: MountPlan,
    pub idmaps: IdMaps,
    pub seccomp: SeccompSource,
    pub log: LogSettings,
    pub process: ProcessSettings,
    pub tmpfs_size: u64,
    pub mount_proc: bool,
    pub proc_path: String,
    pub is_proc_rw: bool,
}

impl SpecBuilder {
    /// Builder populated with the jail defaults.
    ///
    /// Fails if the current resource limits can't be queried.
    pub fn new() -> Result<Self> {
        Ok(Self {
            mode: ExecMode::default(),
            hostname: "NSJAIL".to_string(),
            cwd: "/".to_string(),
            chroot: None,
            is_root_rw: false,
            exec_file: None,
            use_execveat: false,
            argv: Vec::new(),
            env: EnvPolicy::default(),
            rlimits: RlimitSet::with_defaults()?,
            personality: Persona::empty(),
            namespaces: Namespaces::default(),
            cgroups: Cgroups::default(),
            net: NetSettings::default(),
            mounts: MountPlan::default(),
            idmaps: IdMaps::default(),
            seccomp: SeccompSource::default(),
            log: LogSettings::default(),
            process: ProcessSettings::default(),
            tmpfs_size: 4 * 1024 * 1024,
            mount_proc: true,
            proc_path: "/proc".to_string(),
            is_proc_rw: false,
        })
    }

    pub(crate) fn build(self, exec: ExecTarget) -> JailSpec {
        JailSpec {
            mode: self.mode,
            hostname: self.hostname,
            cwd: self.cwd,
            chroot: self.chroot,
            exec,
            argv: self.argv,
            env: self.env,
            rlimits: self.rlimits,
            personality: self.personality,
            namespaces: self.namespaces,
            cgroups: self.cgroups,
            net: self.net,
            mounts: self.mounts.into_vec(),
            uids: self.idmaps.uids,
            gids: self.idmaps.gids,
            seccomp: self.seccomp,
            log: self.log,
            process: self.process,
        }
    }
}

/// A finalized, read-only jail description.
///
/// Mount entries are in execution order with the root first; the id map
/// lists are never empty.
#[derive(Debug, Clone)]
pub struct JailSpec {
    mode: ExecMode,
    hostname: String,
    cwd: String,
    chroot: Option<String>,
    exec: ExecTarget,
    argv: Vec<String>,
    env: EnvPolicy,
    rlimits: RlimitSet,
    personality: Persona,
    namespaces: Namespaces,
    cgroups: Cgroups,
    net: NetSettings,
    mounts: Vec<MountEntry>,
    uids: Vec<IdMapEntry>,
    gids: Vec<IdMapEntry>,
    seccomp: SeccompSource,
    log: LogSettings,
    process: ProcessSettings,
}

impl JailSpec {
    pub fn mode(&self) -> ExecMode {
        self.mode
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn cwd(&self) -> &str {
        &self.cwd
    }

    pub fn chroot(&self) -> Option<&Path> {
        self.chroot.as_deref().map(Path::new)
    }

    pub fn exec(&self) -> &ExecTarget {
        &self.exec
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn env(&self) -> &EnvPolicy {
        &self.env
    }

    pub fn rlimits(&self) -> &RlimitSet {
        &self.rlimits
    }

    pub fn personality(&self) -> Persona {
        self.personality
    }

    pub fn namespaces(&self) -> &Namespaces {
        &self.namespaces
    }

    pub fn cgroups(&self) -> &Cgroups {
        &self.cgroups
    }

    pub fn net(&self) -> &NetSettings {
        &self.net
    }

    pub fn mounts(&self) -> &[MountEntry] {
        &self.mounts
    }

    pub fn uids(&self) -> &[IdMapEntry] {
        &self.uids
    }

    pub fn gids(&self) -> &[IdMapEntry] {
        &self.gids
    }

    pub fn seccomp(&self) -> &SeccompSource {
        &self.seccomp
    }

    pub fn log(&self) -> &LogSettings {
        &self.log
    }

    pub fn process(&self) -> &ProcessSettings {
        &self.process
    }
}
