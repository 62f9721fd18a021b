use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use log::{LevelFilter, debug};
use nix::mount::MsFlags;
use serde::Deserialize;

use crate::caps;
use crate::cmdline::init_log;
use crate::error::{CmdlineError, Result};
use crate::mnt::{DirKind, MountEntry};
use crate::rlimit::{RlimitKind, parse_rlimit};
use crate::sandbox::Collaborators;
use crate::spec::{ExecMode, Namespace, SpecBuilder};
use crate::user::IdKind;

/// A jail configuration file (`--config`), in JSON.
///
/// Every field is optional; present fields are applied on top of whatever
/// the command line set before the `--config` directive.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JailConfig {
    pub mode: Option<String>,
    pub hostname: Option<String>,
    pub cwd: Option<String>,
    pub chroot_dir: Option<String>,
    pub is_root_rw: Option<bool>,
    pub exec_bin: Option<ExecBin>,
    pub execute_fd: Option<bool>,

    pub port: Option<u16>,
    pub bindhost: Option<String>,
    pub max_conns_per_ip: Option<u32>,

    pub log_file: Option<PathBuf>,
    pub log_level: Option<LogLevel>,

    pub time_limit: Option<u64>,
    pub max_cpus: Option<u32>,
    pub daemon: Option<bool>,
    pub keep_env: Option<bool>,
    pub envar: Vec<String>,
    pub keep_caps: Option<bool>,
    pub cap: Vec<String>,
    pub silent: Option<bool>,
    pub skip_setsid: Option<bool>,
    pub pass_fd: Vec<i32>,
    pub disable_no_new_privs: Option<bool>,

    // Resource limits
    pub rlimit_as: Option<RlimitValue>,
    pub rlimit_core: Option<RlimitValue>,
    pub rlimit_cpu: Option<RlimitValue>,
    pub rlimit_fsize: Option<RlimitValue>,
    pub rlimit_nofile: Option<RlimitValue>,
    pub rlimit_nproc: Option<RlimitValue>,
    pub rlimit_stack: Option<RlimitValue>,

    // Namespace configuration
    pub clone_newnet: Option<bool>,
    pub clone_newuser: Option<bool>,
    pub clone_newns: Option<bool>,
    pub clone_newpid: Option<bool>,
    pub clone_newipc: Option<bool>,
    pub clone_newuts: Option<bool>,
    pub clone_newcgroup: Option<bool>,

    pub uidmap: Vec<IdMapConfig>,
    pub gidmap: Vec<IdMapConfig>,

    // Mount points
    pub mount_proc: Option<bool>,
    pub mount: Vec<MountConfig>,

    pub seccomp_policy_file: Option<PathBuf>,
    pub seccomp_string: Option<String>,

    pub cgroup_mem_max: Option<u64>,
    pub cgroup_pids_max: Option<u64>,
    pub cgroup_net_cls_classid: Option<u64>,
    pub cgroup_cpu_ms_per_sec: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecBin {
    pub path: String,
    #[serde(default)]
    pub arg: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Warning => LevelFilter::Warn,
            LogLevel::Error | LogLevel::Fatal => LevelFilter::Error,
        }
    }
}

/// A number (in the same units as the command line) or an rlimit keyword.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RlimitValue {
    Number(u64),
    Keyword(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdMapConfig {
    pub inside_id: String,
    #[serde(default)]
    pub outside_id: Option<String>,
    #[serde(default)]
    pub count: Option<u32>,
    #[serde(default)]
    pub use_newidmap: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MountConfig {
    #[serde(default)]
    pub src: Option<String>,
    #[serde(default)]
    pub dst: Option<String>,
    #[serde(default)]
    pub fstype: Option<String>,
    #[serde(default)]
    pub options: Option<String>,
    #[serde(default)]
    pub is_bind: bool,
    #[serde(default)]
    pub rw: bool,
    #[serde(default)]
    pub is_dir: Option<bool>,
    #[serde(default)]
    pub mandatory: Option<bool>,
    #[serde(default)]
    pub is_symlink: bool,
}

impl MountConfig {
    fn to_entry(&self) -> Result<MountEntry> {
        let src = self.src.as_deref();
        let dst = self.dst.as_deref();
        let entry = if self.is_symlink {
            match (src, dst) {
                (Some(src), Some(dst)) => MountEntry::symlink(src, dst)?,
                _ => {
                    return Err(CmdlineError::InvalidMount(
                        "symlink needs both src and dst".to_string(),
                    ));
                }
            }
        } else if self.is_bind {
            MountEntry::bind(src.unwrap_or_default(), dst, self.rw)?
        } else {
            let flags = if self.rw {
                MsFlags::empty()
            } else {
                MsFlags::MS_RDONLY
            };
            MountEntry::new(src, dst, self.fstype.as_deref().unwrap_or_default(), flags)?
                .options(self.options.clone().unwrap_or_default())
        };

        let is_dir = match self.is_dir {
            Some(true) => DirKind::Yes,
            Some(false) => DirKind::No,
            None => entry.is_dir,
        };
        Ok(entry.dir(is_dir).mandatory(self.mandatory.unwrap_or(true)))
    }
}

impl IdMapConfig {
    fn to_token(&self) -> String {
        format!(
            "{}:{}:{}",
            self.inside_id,
            self.outside_id.as_deref().unwrap_or_default(),
            self.count.map(|c| c.to_string()).unwrap_or_default()
        )
    }
}

/// Reads and parses a configuration file.
pub fn load(path: &Path) -> anyhow::Result<JailConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("couldn't read '{}'", path.display()))?;
    let config: JailConfig = serde_json::from_str(&content).context("malformed JSON")?;
    Ok(config)
}

/// Loads `path` and applies it to the builder.
pub fn apply_file(b: &mut SpecBuilder, path: &Path, collab: &mut dyn Collaborators) -> Result<()> {
    let config = load(path).map_err(|e| CmdlineError::Config {
        path: path.to_path_buf(),
        reason: format!("{e:#}"),
    })?;
    debug!("Applying configuration from '{}'", path.display());
    config.apply(b, collab)
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

impl JailConfig {
    pub fn apply(self, b: &mut SpecBuilder, collab: &mut dyn Collaborators) -> Result<()> {
        if let Some(mode) = &self.mode {
            b.mode = ExecMode::from_letter(mode).ok_or_else(|| CmdlineError::UnknownMode {
                value: mode.clone(),
            })?;
        }
        set(&mut b.hostname, self.hostname);
        set(&mut b.cwd, self.cwd);
        if let Some(chroot) = self.chroot_dir {
            b.chroot = Some(chroot);
        }
        set(&mut b.is_root_rw, self.is_root_rw);
        if let Some(exec_bin) = self.exec_bin {
            if b.argv.is_empty() {
                b.argv.push(exec_bin.path.clone());
                b.argv.extend(exec_bin.arg);
            }
            b.exec_file = Some(exec_bin.path);
        }
        set(&mut b.use_execveat, self.execute_fd);

        if let Some(port) = self.port {
            b.net.port = port;
            b.mode = ExecMode::ListenTcp;
        }
        set(&mut b.net.bindhost, self.bindhost);
        set(&mut b.net.max_conns_per_ip, self.max_conns_per_ip);

        if self.log_file.is_some() || self.log_level.is_some() {
            if let Some(file) = self.log_file {
                b.log.file = Some(file);
            }
            set(&mut b.log.level, self.log_level.map(LevelFilter::from));
            init_log(b, collab)?;
        }

        set(&mut b.process.time_limit, self.time_limit);
        set(&mut b.process.max_cpus, self.max_cpus);
        set(&mut b.process.daemonize, self.daemon);
        set(&mut b.env.keep_env, self.keep_env);
        b.env.vars.extend(self.envar);
        set(&mut b.process.keep_caps, self.keep_caps);
        for name in &self.cap {
            b.process.caps.push(caps::name_to_val(name)?);
        }
        set(&mut b.process.silent, self.silent);
        set(&mut b.process.skip_setsid, self.skip_setsid);
        b.process.pass_fds.extend(self.pass_fd);
        set(&mut b.process.disable_no_new_privs, self.disable_no_new_privs);

        let rlimits = [
            (RlimitKind::As, self.rlimit_as),
            (RlimitKind::Core, self.rlimit_core),
            (RlimitKind::Cpu, self.rlimit_cpu),
            (RlimitKind::Fsize, self.rlimit_fsize),
            (RlimitKind::Nofile, self.rlimit_nofile),
            (RlimitKind::Nproc, self.rlimit_nproc),
            (RlimitKind::Stack, self.rlimit_stack),
        ];
        for (kind, value) in rlimits {
            let limit = match value {
                Some(RlimitValue::Number(n)) => parse_rlimit(kind, &n.to_string())?,
                Some(RlimitValue::Keyword(keyword)) => parse_rlimit(kind, &keyword)?,
                None => continue,
            };
            b.rlimits.set(kind, limit);
        }

        let namespaces = [
            (Namespace::Net, self.clone_newnet),
            (Namespace::User, self.clone_newuser),
            (Namespace::Mount, self.clone_newns),
            (Namespace::Pid, self.clone_newpid),
            (Namespace::Ipc, self.clone_newipc),
            (Namespace::Uts, self.clone_newuts),
            (Namespace::Cgroup, self.clone_newcgroup),
        ];
        for (ns, enabled) in namespaces {
            if let Some(enabled) = enabled {
                b.namespaces.set(ns, enabled);
            }
        }

        for map in &self.uidmap {
            b.idmaps
                .parse_id("uidmap", IdKind::Uid, &map.to_token(), map.use_newidmap)?;
        }
        for map in &self.gidmap {
            b.idmaps
                .parse_id("gidmap", IdKind::Gid, &map.to_token(), map.use_newidmap)?;
        }

        set(&mut b.mount_proc, self.mount_proc);
        for mount in &self.mount {
            b.mounts.add_tail(mount.to_entry()?);
        }

        if let Some(file) = self.seccomp_policy_file {
            b.seccomp.file = Some(file);
        }
        if let Some(policy) = self.seccomp_string {
            b.seccomp.string = Some(policy);
        }

        set(&mut b.cgroups.mem.limit, self.cgroup_mem_max);
        set(&mut b.cgroups.pids.limit, self.cgroup_pids_max);
        set(&mut b.cgroups.net_cls.limit, self.cgroup_net_cls_classid);
        set(&mut b.cgroups.cpu.limit, self.cgroup_cpu_ms_per_sec);

        Ok(())
    }
}
