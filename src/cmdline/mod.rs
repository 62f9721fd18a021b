//! Translation of the jail command line into a [`JailSpec`].
//!
//! argv is scanned by clap using a command built from the option table in
//! [`options`]. Every occurrence is then decoded into a typed [`Directive`]
//! and applied to a [`SpecBuilder`] strictly in command-line order, so
//! "last write wins" and list order follow what the user typed. The first
//! failing directive aborts the whole parse.

mod options;
mod usage;

use std::ffi::OsString;
use std::fs::OpenOptions;
use std::os::fd::OwnedFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::sync::Arc;

use clap::error::{ContextKind, ContextValue, ErrorKind};
use clap::parser::ValueSource;
use clap::{Arg, ArgAction, ArgMatches, Command};
use log::{LevelFilter, debug, error, info, warn};
use nix::mount::MsFlags;
use nix::sys::personality::Persona;

use crate::caps;
use crate::config;
use crate::error::{CmdlineError, Result};
use crate::mnt::{DirKind, MountEntry};
use crate::rlimit::{RlimitKind, parse_rlimit};
use crate::sandbox::{Collaborators, HostCollaborators};
use crate::spec::{CgroupKind, ExecMode, ExecTarget, JailSpec, Namespace, SpecBuilder};
use crate::split::split_colon;
use crate::user::IdKind;

pub use options::{Code, DEPRECATED, OPTIONS, OptionSpec, replacement};
pub use usage::{Usage, usage};

const COMMAND: &str = "command";

/// One decoded command-line directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive<'a> {
    Help,
    Mode(ExecMode),
    Config(&'a str),
    ExecFile(&'a str),
    ExecuteFd,
    Chroot(&'a str),
    RootRw,
    IdMap {
        directive: &'static str,
        kind: IdKind,
        value: &'a str,
        newidmap: bool,
    },
    Hostname(&'a str),
    Cwd(&'a str),
    Port(u16),
    Bindhost(&'a str),
    MaxConnsPerIp(u32),
    LogFile(&'a str),
    LogFd(i32),
    LogLevel(LevelFilter),
    TimeLimit(u64),
    MaxCpus(u32),
    Daemon,
    KeepEnv,
    Env(&'a str),
    KeepCaps,
    Cap(u32),
    Silent,
    SkipSetsid,
    PassFd(i32),
    DisableNoNewPrivs,
    Rlimit(RlimitKind, u64),
    Persona(Persona),
    Clone(Namespace, bool),
    BindMount {
        src: &'a str,
        dst: Option<&'a str>,
        rw: bool,
    },
    TmpfsMount(&'a str),
    TmpfsSize(u64),
    DisableProc,
    ProcPath(&'a str),
    ProcRw,
    SeccompPolicy(&'a str),
    SeccompString(&'a str),
    CgroupLimit(CgroupKind, u64),
    CgroupMount(CgroupKind, &'a str),
    CgroupParent(CgroupKind, &'a str),
    IfaceNoLo,
    MacvlanIface(&'a str),
    MacvlanVsIp(&'a str),
    MacvlanVsNm(&'a str),
    MacvlanVsGw(&'a str),
}

/// Parses a decimal or `0x`-prefixed hexadecimal number.
pub(crate) fn number<T: TryFrom<u64>>(directive: &'static str, value: &str) -> Result<T> {
    let parsed = match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => value.parse::<u64>(),
    };
    parsed
        .ok()
        .and_then(|n| T::try_from(n).ok())
        .ok_or_else(|| CmdlineError::InvalidValue {
            directive,
            value: value.to_string(),
            reason: "not a valid number".to_string(),
        })
}

impl<'a> Directive<'a> {
    /// Decodes one option occurrence. `value` is `None` for flags.
    pub fn decode(opt: &'static OptionSpec, value: Option<&'a str>) -> Result<Self> {
        let name = opt.name;
        let val = || {
            value.ok_or_else(|| CmdlineError::MissingValue {
                directive: format!("--{name}"),
            })
        };

        let directive = match opt.code {
            Code::Help => Self::Help,
            Code::Mode => {
                let value = val()?;
                let mode = ExecMode::from_letter(value).ok_or_else(|| {
                    CmdlineError::UnknownMode {
                        value: value.to_string(),
                    }
                })?;
                Self::Mode(mode)
            }
            Code::Config => Self::Config(val()?),
            Code::ExecFile => Self::ExecFile(val()?),
            Code::ExecuteFd => Self::ExecuteFd,
            Code::Chroot => Self::Chroot(val()?),
            Code::RootRw => Self::RootRw,
            Code::User | Code::Group | Code::UidMapping | Code::GidMapping => Self::IdMap {
                directive: name,
                kind: match opt.code {
                    Code::User | Code::UidMapping => IdKind::Uid,
                    _ => IdKind::Gid,
                },
                value: val()?,
                newidmap: matches!(opt.code, Code::UidMapping | Code::GidMapping),
            },
            Code::Hostname => Self::Hostname(val()?),
            Code::Cwd => Self::Cwd(val()?),
            Code::Port => Self::Port(number(name, val()?)?),
            Code::Bindhost => Self::Bindhost(val()?),
            Code::MaxConnsPerIp => Self::MaxConnsPerIp(number(name, val()?)?),
            Code::Log => Self::LogFile(val()?),
            Code::LogFd => Self::LogFd(number(name, val()?)?),
            Code::Verbose => Self::LogLevel(LevelFilter::Debug),
            Code::Quiet => Self::LogLevel(LevelFilter::Warn),
            Code::ReallyQuiet => Self::LogLevel(LevelFilter::Error),
            Code::TimeLimit => Self::TimeLimit(number(name, val()?)?),
            Code::MaxCpus => Self::MaxCpus(number(name, val()?)?),
            Code::Daemon => Self::Daemon,
            Code::KeepEnv => Self::KeepEnv,
            Code::Env => Self::Env(val()?),
            Code::KeepCaps => Self::KeepCaps,
            Code::Cap => Self::Cap(caps::name_to_val(val()?)?),
            Code::Silent => Self::Silent,
            Code::SkipSetsid => Self::SkipSetsid,
            Code::PassFd => Self::PassFd(number(name, val()?)?),
            Code::DisableNoNewPrivs => Self::DisableNoNewPrivs,
            Code::Rlimit(kind) => Self::Rlimit(kind, parse_rlimit(kind, val()?)?),
            Code::Persona(persona) => Self::Persona(persona),
            Code::DisableClone(ns) => Self::Clone(ns, false),
            Code::EnableCloneNewcgroup => Self::Clone(Namespace::Cgroup, true),
            Code::BindmountRo | Code::Bindmount => {
                let (src, dst) = split_colon(val()?);
                Self::BindMount {
                    src,
                    dst,
                    rw: opt.code == Code::Bindmount,
                }
            }
            Code::Tmpfsmount => Self::TmpfsMount(val()?),
            Code::TmpfsSize => Self::TmpfsSize(number(name, val()?)?),
            Code::DisableProc => Self::DisableProc,
            Code::ProcPath => Self::ProcPath(val()?),
            Code::ProcRw => Self::ProcRw,
            Code::SeccompPolicy => Self::SeccompPolicy(val()?),
            Code::SeccompString => Self::SeccompString(val()?),
            Code::CgroupLimit(kind) => Self::CgroupLimit(kind, number(name, val()?)?),
            Code::CgroupMount(kind) => Self::CgroupMount(kind, val()?),
            Code::CgroupParent(kind) => Self::CgroupParent(kind, val()?),
            Code::IfaceNoLo => Self::IfaceNoLo,
            Code::MacvlanIface => Self::MacvlanIface(val()?),
            Code::MacvlanVsIp => Self::MacvlanVsIp(val()?),
            Code::MacvlanVsNm => Self::MacvlanVsNm(val()?),
            Code::MacvlanVsGw => Self::MacvlanVsGw(val()?),
        };
        Ok(directive)
    }

    /// Applies the directive to `b`. Log directives re-initialize the log
    /// sink before returning.
    pub fn apply(self, b: &mut SpecBuilder, collab: &mut dyn Collaborators) -> Result<()> {
        match self {
            Self::Help => return Err(CmdlineError::HelpRequested),
            Self::Mode(mode) => b.mode = mode,
            Self::Config(path) => config::apply_file(b, Path::new(path), collab)?,
            Self::ExecFile(path) => b.exec_file = Some(path.to_string()),
            Self::ExecuteFd => b.use_execveat = true,
            Self::Chroot(path) => b.chroot = Some(path.to_string()),
            Self::RootRw => b.is_root_rw = true,
            Self::IdMap {
                directive,
                kind,
                value,
                newidmap,
            } => b.idmaps.parse_id(directive, kind, value, newidmap)?,
            Self::Hostname(name) => b.hostname = name.to_string(),
            Self::Cwd(dir) => b.cwd = dir.to_string(),
            Self::Port(port) => {
                b.net.port = port;
                b.mode = ExecMode::ListenTcp;
            }
            Self::Bindhost(host) => b.net.bindhost = host.to_string(),
            Self::MaxConnsPerIp(max) => b.net.max_conns_per_ip = max,
            Self::LogFile(path) => {
                b.log.file = Some(path.into());
                init_log(b, collab)?;
            }
            Self::LogFd(fd) => {
                b.log.fd = fd;
                init_log(b, collab)?;
            }
            Self::LogLevel(level) => {
                b.log.level = level;
                init_log(b, collab)?;
            }
            Self::TimeLimit(secs) => b.process.time_limit = secs,
            Self::MaxCpus(max) => b.process.max_cpus = max,
            Self::Daemon => b.process.daemonize = true,
            Self::KeepEnv => b.env.keep_env = true,
            Self::Env(var) => b.env.vars.push(var.to_string()),
            Self::KeepCaps => b.process.keep_caps = true,
            Self::Cap(cap) => b.process.caps.push(cap),
            Self::Silent => b.process.silent = true,
            Self::SkipSetsid => b.process.skip_setsid = true,
            Self::PassFd(fd) => b.process.pass_fds.push(fd),
            Self::DisableNoNewPrivs => b.process.disable_no_new_privs = true,
            Self::Rlimit(kind, limit) => b.rlimits.set(kind, limit),
            Self::Persona(persona) => b.personality |= persona,
            Self::Clone(ns, enabled) => b.namespaces.set(ns, enabled),
            Self::BindMount { src, dst, rw } => b.mounts.add_tail(MountEntry::bind(src, dst, rw)?),
            Self::TmpfsMount(dst) => b.mounts.add_tail(MountEntry::tmpfs(dst, b.tmpfs_size)?),
            Self::TmpfsSize(size) => b.tmpfs_size = size,
            Self::DisableProc => b.mount_proc = false,
            Self::ProcPath(path) => b.proc_path = path.to_string(),
            Self::ProcRw => b.is_proc_rw = true,
            Self::SeccompPolicy(path) => b.seccomp.file = Some(path.into()),
            Self::SeccompString(policy) => b.seccomp.string = Some(policy.to_string()),
            Self::CgroupLimit(kind, limit) => b.cgroups.get_mut(kind).limit = limit,
            Self::CgroupMount(kind, path) => b.cgroups.get_mut(kind).mount = path.to_string(),
            Self::CgroupParent(kind, name) => b.cgroups.get_mut(kind).parent = name.to_string(),
            Self::IfaceNoLo => b.net.iface_no_lo = true,
            Self::MacvlanIface(iface) => b.net.macvlan_iface = Some(iface.to_string()),
            Self::MacvlanVsIp(ip) => b.net.macvlan_vs_ip = ip.to_string(),
            Self::MacvlanVsNm(nm) => b.net.macvlan_vs_nm = nm.to_string(),
            Self::MacvlanVsGw(gw) => b.net.macvlan_vs_gw = gw.to_string(),
        }
        Ok(())
    }
}

pub(crate) fn init_log(b: &SpecBuilder, collab: &mut dyn Collaborators) -> Result<()> {
    collab.init_log(&b.log).map_err(CmdlineError::LogSink)
}

fn clap_command() -> Command {
    let cmd = Command::new("jailspec")
        .disable_help_flag(true)
        .disable_version_flag(true)
        .args_override_self(true);
    options::all()
        .fold(cmd, |cmd, (opt, _)| cmd.arg(opt.to_arg()))
        .arg(
            Arg::new(COMMAND)
                .num_args(1..)
                .trailing_var_arg(true)
                .action(ArgAction::Append),
        )
}

fn from_clap(err: clap::Error) -> CmdlineError {
    let arg = match err.get(ContextKind::InvalidArg) {
        Some(ContextValue::String(arg)) => Some(arg.clone()),
        _ => None,
    };
    match (err.kind(), arg) {
        (ErrorKind::UnknownArgument, Some(directive)) => CmdlineError::UnknownDirective { directive },
        (ErrorKind::InvalidValue | ErrorKind::NoEquals, Some(arg)) => {
            // Rendered as `--name <VALUE>`.
            let directive = arg.split_whitespace().next().unwrap_or_default().to_string();
            CmdlineError::MissingValue { directive }
        }
        _ => CmdlineError::Usage(err.render().to_string().trim_end().to_string()),
    }
}

/// Option occurrences in command-line order.
fn occurrences(matches: &ArgMatches) -> Vec<(usize, &'static OptionSpec, bool, Option<&str>)> {
    let mut found = Vec::new();
    for (opt, deprecated) in options::all() {
        if matches.value_source(opt.name) != Some(ValueSource::CommandLine) {
            continue;
        }
        if opt.takes_value {
            let indices = matches.indices_of(opt.name).into_iter().flatten();
            let values = matches.get_many::<String>(opt.name).into_iter().flatten();
            for (idx, value) in indices.zip(values) {
                found.push((idx, opt, deprecated, Some(value.as_str())));
            }
        } else if let Some(idx) = matches.index_of(opt.name) {
            found.push((idx, opt, deprecated, None));
        }
    }
    found.sort_by_key(|(idx, ..)| *idx);
    found
}

/// Parses `args` (including the program name) with the host collaborators.
pub fn parse_args<I, T>(args: I) -> Result<JailSpec>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    parse_args_with(args, &mut HostCollaborators)
}

/// Parses `args` (including the program name).
///
/// On usage errors the usage text is printed to stderr; every error except
/// a help request is also logged.
pub fn parse_args_with<I, T>(args: I, collab: &mut dyn Collaborators) -> Result<JailSpec>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
    let program = args
        .first()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|| "jailspec".to_string());

    let result = translate(args, collab);
    if let Err(err) = &result {
        if err.shows_usage() {
            eprint!("{}", usage(&program));
        }
        if !err.is_help() {
            error!("{err}");
        }
    }
    result
}

fn translate(args: Vec<OsString>, collab: &mut dyn Collaborators) -> Result<JailSpec> {
    let mut builder = SpecBuilder::new()?;
    let matches = match clap_command().try_get_matches_from(args.iter()) {
        Ok(matches) => matches,
        Err(err) => {
            // Directives before the rejected argument still take effect, and
            // fail first if they are invalid themselves.
            let err = from_clap(err);
            if let Some(matches) = accepted_prefix(&args) {
                apply_occurrences(&matches, &mut builder, collab)?;
            }
            return Err(err);
        }
    };

    apply_occurrences(&matches, &mut builder, collab)?;
    if let Some(command) = matches.get_many::<String>(COMMAND) {
        builder.argv = command.cloned().collect();
    }

    finalize(builder, collab)
}

/// Matches of the longest leading part of `args` that scans cleanly.
fn accepted_prefix(args: &[OsString]) -> Option<ArgMatches> {
    (1..args.len())
        .rev()
        .find_map(|end| clap_command().try_get_matches_from(args[..end].iter()).ok())
}

fn apply_occurrences(
    matches: &ArgMatches,
    b: &mut SpecBuilder,
    collab: &mut dyn Collaborators,
) -> Result<()> {
    for (_, opt, deprecated, value) in occurrences(matches) {
        if deprecated {
            match replacement(opt.code) {
                Some(canonical) => {
                    warn!("--{} is deprecated, use --{} instead", opt.name, canonical.name)
                }
                None => warn!("--{} is deprecated and has no effect anymore", opt.name),
            }
        }
        Directive::decode(opt, value)?.apply(b, collab)?;
    }
    Ok(())
}

/// Completes the builder and hands the result to policy preparation.
///
/// Appends the proc mount, puts the root mount at the head of the mount
/// list, defaults empty id maps to the caller's own ids, requires a
/// command and resolves the execution target.
pub fn finalize(mut b: SpecBuilder, collab: &mut dyn Collaborators) -> Result<JailSpec> {
    if b.mount_proc {
        b.mounts
            .add_tail(MountEntry::proc_fs(&b.proc_path, b.is_proc_rw)?);
    }

    let root = match b.chroot.as_deref().filter(|c| !c.is_empty()) {
        Some(chroot) => MountEntry::bind(chroot, Some("/"), b.is_root_rw)?,
        None => {
            let flags = if b.is_root_rw {
                MsFlags::empty()
            } else {
                MsFlags::MS_RDONLY
            };
            MountEntry::new(None, Some("/"), "tmpfs", flags)?
        }
    };
    b.mounts.add_head(root.dir(DirKind::Yes));

    b.idmaps.fill_defaults();

    init_log(&b, collab)?;

    if b.argv.is_empty() {
        return Err(CmdlineError::NoCommand);
    }
    let exec = resolve_exec_target(&b)?;

    let spec = b.build(exec);
    collab
        .prepare_policy(&spec)
        .map_err(CmdlineError::Policy)?;
    Ok(spec)
}

fn resolve_exec_target(b: &SpecBuilder) -> Result<ExecTarget> {
    let Some(path) = b.exec_file.as_ref().or(b.argv.first()) else {
        return Err(CmdlineError::NoCommand);
    };
    if !b.use_execveat {
        return Ok(ExecTarget::Path(path.clone()));
    }

    let file = OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_PATH)
        .open(path)
        .map_err(|source| {
            warn!("Couldn't open '{path}' file: {source}");
            CmdlineError::ExecTarget {
                path: path.clone(),
                source,
            }
        })?;
    debug!("Opened '{path}' for execveat()");
    Ok(ExecTarget::Fd {
        path: path.clone(),
        fd: Arc::new(OwnedFd::from(file)),
    })
}

/// Logs the effective jail parameters.
pub fn log_params(spec: &JailSpec) {
    info!("Mode: {}", spec.mode().name());

    let ns = spec.namespaces();
    let process = spec.process();
    info!(
        "Jail parameters: hostname:'{}', chroot:'{}', process:'{}', bind:[{}]:{}, \
         max_conns_per_ip:{}, time_limit:{}, personality:{:#x}, daemonize:{}, \
         clone_newnet:{}, clone_newuser:{}, clone_newns:{}, clone_newpid:{}, \
         clone_newipc:{}, clone_newuts:{}, clone_newcgroup:{}, keep_caps:{}, \
         disable_no_new_privs:{}, max_cpus:{}",
        spec.hostname(),
        spec.chroot().map(|c| c.display().to_string()).unwrap_or_default(),
        spec.exec().path(),
        spec.net().bindhost,
        spec.net().port,
        spec.net().max_conns_per_ip,
        process.time_limit,
        spec.personality().bits(),
        process.daemonize,
        ns.net,
        ns.user,
        ns.mount,
        ns.pid,
        ns.ipc,
        ns.uts,
        ns.cgroup,
        process.keep_caps,
        process.disable_no_new_privs,
        process.max_cpus,
    );

    debug!("Clone flags: {:#x}", ns.clone_flags().bits());

    for mount in spec.mounts() {
        let what = if mount.is_symlink { "Symlink" } else { "Mount point" };
        info!("{what}: {mount}");
    }

    for uid in spec.uids() {
        info!(
            "Uid map: inside_uid:{} outside_uid:{} count:{} newuidmap:{}",
            uid.inside_id, uid.outside_id, uid.count, uid.is_newidmap
        );
        if uid.outside_id == 0 && ns.user {
            warn!(
                "Process will be UID/EUID=0 in the global user namespace, \
                 and will have user root-level access to files"
            );
        }
    }
    for gid in spec.gids() {
        info!(
            "Gid map: inside_gid:{} outside_gid:{} count:{} newgidmap:{}",
            gid.inside_id, gid.outside_id, gid.count, gid.is_newidmap
        );
        if gid.outside_id == 0 && ns.user {
            warn!(
                "Process will be GID/EGID=0 in the global user namespace, \
                 and will have group root-level access to files"
            );
        }
    }

    for cap in &process.caps {
        debug!("Retained capability: {}", caps::val_to_name(*cap).unwrap_or("?"));
    }
}
