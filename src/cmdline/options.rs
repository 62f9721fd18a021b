//! The option table. It drives both argv decoding and the usage text.

use clap::{Arg, ArgAction};
use nix::sys::personality::Persona;

use crate::rlimit::RlimitKind;
use crate::spec::{CgroupKind, Namespace};

/// Internal directive code. Deprecated options share the code of the
/// option replacing them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Code {
    Help,
    Mode,
    Config,
    ExecFile,
    ExecuteFd,
    Chroot,
    RootRw,
    User,
    Group,
    UidMapping,
    GidMapping,
    Hostname,
    Cwd,
    Port,
    Bindhost,
    MaxConnsPerIp,
    Log,
    LogFd,
    TimeLimit,
    MaxCpus,
    Daemon,
    Verbose,
    Quiet,
    ReallyQuiet,
    KeepEnv,
    Env,
    KeepCaps,
    Cap,
    Silent,
    SkipSetsid,
    PassFd,
    DisableNoNewPrivs,
    Rlimit(RlimitKind),
    Persona(Persona),
    DisableClone(Namespace),
    EnableCloneNewcgroup,
    BindmountRo,
    Bindmount,
    Tmpfsmount,
    TmpfsSize,
    DisableProc,
    ProcPath,
    ProcRw,
    SeccompPolicy,
    SeccompString,
    CgroupLimit(CgroupKind),
    CgroupMount(CgroupKind),
    CgroupParent(CgroupKind),
    IfaceNoLo,
    MacvlanIface,
    MacvlanVsIp,
    MacvlanVsNm,
    MacvlanVsGw,
}

#[derive(Debug)]
pub struct OptionSpec {
    pub name: &'static str,
    pub short: Option<char>,
    pub takes_value: bool,
    pub code: Code,
    pub descr: &'static str,
}

const fn flag(name: &'static str, short: Option<char>, code: Code, descr: &'static str) -> OptionSpec {
    OptionSpec {
        name,
        short,
        takes_value: false,
        code,
        descr,
    }
}

const fn value(name: &'static str, short: Option<char>, code: Code, descr: &'static str) -> OptionSpec {
    OptionSpec {
        name,
        short,
        takes_value: true,
        code,
        descr,
    }
}

/// Appended to the description of every rlimit option.
pub const RLIMIT_KEYWORDS: &str =
    "'max' or 'hard' for the current hard limit, 'def' or 'soft' for the current soft limit, 'inf' for RLIM64_INFINITY";

pub static OPTIONS: &[OptionSpec] = &[
    flag("help", Some('h'), Code::Help, "Help plz.."),
    value(
        "mode",
        Some('M'),
        Code::Mode,
        "Execution mode (default: 'o' [MODE_STANDALONE_ONCE]):\n\
         \tl: Wait for connections on a TCP port (specified with --port) [MODE_LISTEN_TCP]\n\
         \to: Launch a single process on the console using clone/execve [MODE_STANDALONE_ONCE]\n\
         \te: Launch a single process on the console using execve [MODE_STANDALONE_EXECVE]\n\
         \tr: Launch a single process on the console with clone/execve, keep doing it forever [MODE_STANDALONE_RERUN]",
    ),
    value("config", Some('C'), Code::Config, "Configuration file in JSON format"),
    value("exec_file", Some('x'), Code::ExecFile, "File to exec (default: argv[0])"),
    flag(
        "execute_fd",
        None,
        Code::ExecuteFd,
        "Use execveat() to execute a file-descriptor instead of executing the binary path. \
         In such case argv[0]/exec_file denotes a file path before mount namespacing",
    ),
    value("chroot", Some('c'), Code::Chroot, "Directory containing / of the jail (default: none)"),
    flag("rw", None, Code::RootRw, "Mount chroot dir (/) R/W (default: R/O)"),
    value(
        "user",
        Some('u'),
        Code::User,
        "Username/uid of processes inside the jail (default: your current uid). \
         You can also use inside_ns_uid:outside_ns_uid:count convention here. Can be specified multiple times",
    ),
    value(
        "group",
        Some('g'),
        Code::Group,
        "Groupname/gid of processes inside the jail (default: your current gid). \
         You can also use inside_ns_gid:global_ns_gid:count convention here. Can be specified multiple times",
    ),
    value("hostname", Some('H'), Code::Hostname, "UTS name (hostname) of the jail (default: 'NSJAIL')"),
    value("cwd", Some('D'), Code::Cwd, "Directory in the namespace the process will run (default: '/')"),
    value("port", Some('p'), Code::Port, "TCP port to bind to (enables MODE_LISTEN_TCP) (default: 0)"),
    value(
        "bindhost",
        None,
        Code::Bindhost,
        "IP address to bind the port to (only in [MODE_LISTEN_TCP]), (default: '::')",
    ),
    value(
        "max_conns_per_ip",
        Some('i'),
        Code::MaxConnsPerIp,
        "Maximum number of connections per one IP (only in [MODE_LISTEN_TCP]), (default: 0 (unlimited))",
    ),
    value("log", Some('l'), Code::Log, "Log file (default: use log_fd)"),
    value("log_fd", Some('L'), Code::LogFd, "Log FD (default: 2)"),
    value(
        "time_limit",
        Some('t'),
        Code::TimeLimit,
        "Maximum time that a jail can exist, in seconds (default: 0 'no limit')",
    ),
    value(
        "max_cpus",
        None,
        Code::MaxCpus,
        "Maximum number of CPUs a single jailed process can use (default: 0 'no limit')",
    ),
    flag("daemon", Some('d'), Code::Daemon, "Daemonize after start"),
    flag("verbose", Some('v'), Code::Verbose, "Verbose output"),
    flag("quiet", Some('q'), Code::Quiet, "Log warning and more important messages only"),
    flag("really_quiet", Some('Q'), Code::ReallyQuiet, "Log fatal messages only"),
    flag(
        "keep_env",
        Some('e'),
        Code::KeepEnv,
        "Pass all environment variables to the child process (default: all envvars are cleared)",
    ),
    value("env", Some('E'), Code::Env, "Additional environment variable (can be used multiple times)"),
    flag("keep_caps", None, Code::KeepCaps, "Don't drop any capabilities"),
    value(
        "cap",
        None,
        Code::Cap,
        "Retain this capability, e.g. CAP_PTRACE (can be specified multiple times)",
    ),
    flag("silent", None, Code::Silent, "Redirect child process' fd:0/1/2 to /dev/null"),
    flag(
        "skip_setsid",
        None,
        Code::SkipSetsid,
        "Don't call setsid(), allows for terminal signal handling in the sandboxed process. Dangerous",
    ),
    value(
        "pass_fd",
        None,
        Code::PassFd,
        "Don't close this FD before executing the child process (can be specified multiple times), \
         by default: 0/1/2 are kept open",
    ),
    flag(
        "disable_no_new_privs",
        None,
        Code::DisableNoNewPrivs,
        "Don't set the prctl(NO_NEW_PRIVS, 1) (DANGEROUS)",
    ),
    value("rlimit_as", None, Code::Rlimit(RlimitKind::As), "RLIMIT_AS in MB (default: 512)"),
    value("rlimit_core", None, Code::Rlimit(RlimitKind::Core), "RLIMIT_CORE in MB (default: 0)"),
    value("rlimit_cpu", None, Code::Rlimit(RlimitKind::Cpu), "RLIMIT_CPU (default: 600)"),
    value("rlimit_fsize", None, Code::Rlimit(RlimitKind::Fsize), "RLIMIT_FSIZE in MB (default: 1)"),
    value("rlimit_nofile", None, Code::Rlimit(RlimitKind::Nofile), "RLIMIT_NOFILE (default: 32)"),
    value("rlimit_nproc", None, Code::Rlimit(RlimitKind::Nproc), "RLIMIT_NPROC (default: 'soft')"),
    value("rlimit_stack", None, Code::Rlimit(RlimitKind::Stack), "RLIMIT_STACK in MB (default: 'soft')"),
    flag(
        "persona_addr_compat_layout",
        None,
        Code::Persona(Persona::ADDR_COMPAT_LAYOUT),
        "personality(ADDR_COMPAT_LAYOUT)",
    ),
    flag(
        "persona_mmap_page_zero",
        None,
        Code::Persona(Persona::MMAP_PAGE_ZERO),
        "personality(MMAP_PAGE_ZERO)",
    ),
    flag(
        "persona_read_implies_exec",
        None,
        Code::Persona(Persona::READ_IMPLIES_EXEC),
        "personality(READ_IMPLIES_EXEC)",
    ),
    flag(
        "persona_addr_limit_3gb",
        None,
        Code::Persona(Persona::ADDR_LIMIT_3GB),
        "personality(ADDR_LIMIT_3GB)",
    ),
    flag(
        "persona_addr_no_randomize",
        None,
        Code::Persona(Persona::ADDR_NO_RANDOMIZE),
        "personality(ADDR_NO_RANDOMIZE)",
    ),
    flag(
        "disable_clone_newnet",
        Some('N'),
        Code::DisableClone(Namespace::Net),
        "Don't use CLONE_NEWNET. Enable global networking inside the jail",
    ),
    flag(
        "disable_clone_newuser",
        None,
        Code::DisableClone(Namespace::User),
        "Don't use CLONE_NEWUSER. Requires euid==0",
    ),
    flag("disable_clone_newns", None, Code::DisableClone(Namespace::Mount), "Don't use CLONE_NEWNS"),
    flag("disable_clone_newpid", None, Code::DisableClone(Namespace::Pid), "Don't use CLONE_NEWPID"),
    flag("disable_clone_newipc", None, Code::DisableClone(Namespace::Ipc), "Don't use CLONE_NEWIPC"),
    flag("disable_clone_newuts", None, Code::DisableClone(Namespace::Uts), "Don't use CLONE_NEWUTS"),
    flag(
        "disable_clone_newcgroup",
        None,
        Code::DisableClone(Namespace::Cgroup),
        "Don't use CLONE_NEWCGROUP. Might be required for kernel versions < 4.6",
    ),
    value(
        "uid_mapping",
        Some('U'),
        Code::UidMapping,
        "Add a custom uid mapping of the form inside_uid:outside_uid:count. \
         Setting this requires newuidmap (set-uid) to be present",
    ),
    value(
        "gid_mapping",
        Some('G'),
        Code::GidMapping,
        "Add a custom gid mapping of the form inside_gid:outside_gid:count. \
         Setting this requires newgidmap (set-uid) to be present",
    ),
    value(
        "bindmount_ro",
        Some('R'),
        Code::BindmountRo,
        "List of mountpoints to be mounted --bind (ro) inside the container. \
         Can be specified multiple times. Supports 'source' syntax, or 'source:dest'",
    ),
    value(
        "bindmount",
        Some('B'),
        Code::Bindmount,
        "List of mountpoints to be mounted --bind (rw) inside the container. \
         Can be specified multiple times. Supports 'source' syntax, or 'source:dest'",
    ),
    value(
        "tmpfsmount",
        Some('T'),
        Code::Tmpfsmount,
        "List of mountpoints to be mounted as tmpfs (R/W) inside the container. \
         Can be specified multiple times. Supports 'dest' syntax",
    ),
    value(
        "tmpfs_size",
        None,
        Code::TmpfsSize,
        "Number of bytes to allocate for tmpfsmounts (default: 4194304)",
    ),
    flag("disable_proc", None, Code::DisableProc, "Disable mounting procfs in the jail"),
    value("proc_path", None, Code::ProcPath, "Path used to mount procfs (default: '/proc')"),
    flag("proc_rw", None, Code::ProcRw, "Is procfs mounted as R/W (default: R/O)"),
    value(
        "seccomp_policy",
        Some('P'),
        Code::SeccompPolicy,
        "Path to file containing seccomp-bpf policy (see kafel/)",
    ),
    value(
        "seccomp_string",
        None,
        Code::SeccompString,
        "String with kafel seccomp-bpf policy (see kafel/)",
    ),
    value(
        "cgroup_mem_max",
        None,
        Code::CgroupLimit(CgroupKind::Mem),
        "Maximum number of bytes to use in the group (default: '0' - disabled)",
    ),
    value(
        "cgroup_mem_mount",
        None,
        Code::CgroupMount(CgroupKind::Mem),
        "Location of memory cgroup FS (default: '/sys/fs/cgroup/memory')",
    ),
    value(
        "cgroup_mem_parent",
        None,
        Code::CgroupParent(CgroupKind::Mem),
        "Which pre-existing memory cgroup to use as a parent (default: 'NSJAIL')",
    ),
    value(
        "cgroup_pids_max",
        None,
        Code::CgroupLimit(CgroupKind::Pids),
        "Maximum number of pids in a cgroup (default: '0' - disabled)",
    ),
    value(
        "cgroup_pids_mount",
        None,
        Code::CgroupMount(CgroupKind::Pids),
        "Location of pids cgroup FS (default: '/sys/fs/cgroup/pids')",
    ),
    value(
        "cgroup_pids_parent",
        None,
        Code::CgroupParent(CgroupKind::Pids),
        "Which pre-existing pids cgroup to use as a parent (default: 'NSJAIL')",
    ),
    value(
        "cgroup_net_cls_classid",
        None,
        Code::CgroupLimit(CgroupKind::NetCls),
        "Class identifier of network packets in the group (default: '0' - disabled)",
    ),
    value(
        "cgroup_net_cls_mount",
        None,
        Code::CgroupMount(CgroupKind::NetCls),
        "Location of net_cls cgroup FS (default: '/sys/fs/cgroup/net_cls')",
    ),
    value(
        "cgroup_net_cls_parent",
        None,
        Code::CgroupParent(CgroupKind::NetCls),
        "Which pre-existing net_cls cgroup to use as a parent (default: 'NSJAIL')",
    ),
    value(
        "cgroup_cpu_ms_per_sec",
        None,
        Code::CgroupLimit(CgroupKind::Cpu),
        "Number of ms that the process group can use per second (default: '0' - disabled)",
    ),
    value(
        "cgroup_cpu_mount",
        None,
        Code::CgroupMount(CgroupKind::Cpu),
        "Location of cpu cgroup FS (default: '/sys/fs/cgroup/cpu')",
    ),
    value(
        "cgroup_cpu_parent",
        None,
        Code::CgroupParent(CgroupKind::Cpu),
        "Which pre-existing cpu cgroup to use as a parent (default: 'NSJAIL')",
    ),
    flag("iface_no_lo", None, Code::IfaceNoLo, "Don't bring the 'lo' interface up"),
    value(
        "macvlan_iface",
        Some('I'),
        Code::MacvlanIface,
        "Interface which will be cloned (MACVLAN) and put inside the subprocess' namespace as 'vs'",
    ),
    value(
        "macvlan_vs_ip",
        None,
        Code::MacvlanVsIp,
        "IP of the 'vs' interface (e.g. \"192.168.0.1\")",
    ),
    value(
        "macvlan_vs_nm",
        None,
        Code::MacvlanVsNm,
        "Netmask of the 'vs' interface (e.g. \"255.255.255.0\")",
    ),
    value(
        "macvlan_vs_gw",
        None,
        Code::MacvlanVsGw,
        "Default GW for the 'vs' interface (e.g. \"192.168.0.1\")",
    ),
];

/// Old spellings, still accepted.
pub static DEPRECATED: &[OptionSpec] = &[
    value(
        "iface",
        None,
        Code::MacvlanIface,
        "Interface which will be cloned (MACVLAN) and put inside the subprocess' namespace as 'vs'",
    ),
    value("iface_vs_ip", None, Code::MacvlanVsIp, "IP of the 'vs' interface (e.g. \"192.168.0.1\")"),
    value(
        "iface_vs_nm",
        None,
        Code::MacvlanVsNm,
        "Netmask of the 'vs' interface (e.g. \"255.255.255.0\")",
    ),
    value(
        "iface_vs_gw",
        None,
        Code::MacvlanVsGw,
        "Default GW for the 'vs' interface (e.g. \"192.168.0.1\")",
    ),
    flag(
        "enable_clone_newcgroup",
        None,
        Code::EnableCloneNewcgroup,
        "Use CLONE_NEWCGROUP (it's enabled by default now)",
    ),
];

/// The canonical option carrying `code`, if any.
pub fn replacement(code: Code) -> Option<&'static OptionSpec> {
    OPTIONS.iter().find(|opt| opt.code == code)
}

/// Every option with a flag telling whether it is deprecated.
pub fn all() -> impl Iterator<Item = (&'static OptionSpec, bool)> {
    OPTIONS
        .iter()
        .map(|opt| (opt, false))
        .chain(DEPRECATED.iter().map(|opt| (opt, true)))
}

impl OptionSpec {
    pub(crate) fn to_arg(&self) -> Arg {
        let mut arg = Arg::new(self.name).long(self.name);
        if let Some(short) = self.short {
            arg = arg.short(short);
        }
        if self.takes_value {
            arg.value_name("VALUE")
                .num_args(1)
                .allow_hyphen_values(true)
                .action(ArgAction::Append)
        } else {
            arg.action(ArgAction::SetTrue)
        }
    }
}
