use std::io::Write;
use std::path::PathBuf;

use anyhow::{Result, bail};
use jailspec::spec::{CgroupKind, LogSettings};
use jailspec::{
    CmdlineError, Collaborators, DirKind, ExecMode, ExecTarget, JailSpec, RlimitKind,
    parse_args_with,
};
use log::LevelFilter;
use nix::mount::MsFlags;
use nix::sched::CloneFlags;
use nix::sys::resource::getrlimit;
use nix::sys::personality::Persona;
use nix::unistd::{getgid, getuid};
use tempfile::NamedTempFile;

#[derive(Default)]
struct Recorder {
    log_inits: Vec<LogSettings>,
    prepared: Vec<Vec<String>>,
    fail_log: bool,
    fail_policy: bool,
}

impl Collaborators for Recorder {
    fn init_log(&mut self, settings: &LogSettings) -> Result<()> {
        if self.fail_log {
            bail!("log sink unavailable");
        }
        self.log_inits.push(settings.clone());
        Ok(())
    }

    fn prepare_policy(&mut self, spec: &JailSpec) -> Result<()> {
        if self.fail_policy {
            bail!("malformed seccomp policy");
        }
        self.prepared.push(spec.argv().to_vec());
        Ok(())
    }
}

fn parse(args: &[&str]) -> Result<JailSpec, CmdlineError> {
    parse_with(args, &mut Recorder::default())
}

fn parse_with(args: &[&str], recorder: &mut Recorder) -> Result<JailSpec, CmdlineError> {
    let argv = std::iter::once("jailspec").chain(args.iter().copied());
    parse_args_with(argv, recorder)
}

fn mount_summary(spec: &JailSpec) -> Vec<(Option<&str>, &str, &str)> {
    spec.mounts()
        .iter()
        .map(|m| (m.src.as_deref(), m.dst.as_str(), m.fs_type.as_str()))
        .collect()
}

#[test]
fn test_root_first_user_mounts_in_order_proc_last() {
    let expected = vec![
        (Some("/root"), "/", ""),
        (Some("/a"), "/a", ""),
        (None, "/b", "tmpfs"),
        (None, "/proc", "proc"),
    ];

    for args in [
        ["-c", "/root", "-B", "/a", "-T", "/b", "--", "/bin/true"],
        ["-B", "/a", "-c", "/root", "-T", "/b", "--", "/bin/true"],
        ["-B", "/a", "-T", "/b", "-c", "/root", "--", "/bin/true"],
    ] {
        let spec = parse(&args).unwrap();
        assert_eq!(mount_summary(&spec), expected);
    }
}

#[test]
fn test_root_mount_flags() {
    let spec = parse(&["-c", "/srv/jail", "--", "/bin/true"]).unwrap();
    let root = &spec.mounts()[0];
    assert_eq!(root.is_dir, DirKind::Yes);
    assert!(root.mandatory);
    assert_eq!(
        root.flags,
        MsFlags::MS_BIND | MsFlags::MS_REC | MsFlags::MS_PRIVATE | MsFlags::MS_RDONLY
    );

    let spec = parse(&["-c", "/srv/jail", "--rw", "--", "/bin/true"]).unwrap();
    assert!(!spec.mounts()[0].flags.contains(MsFlags::MS_RDONLY));

    let spec = parse(&["--", "/bin/true"]).unwrap();
    let root = &spec.mounts()[0];
    assert_eq!(root.src, None);
    assert_eq!(root.fs_type, "tmpfs");
    assert_eq!(root.flags, MsFlags::MS_RDONLY);
}

#[test]
fn test_proc_mount_options() {
    let spec = parse(&["--proc_path", "/p", "--proc_rw", "--", "/bin/true"]).unwrap();
    let proc_mount = spec.mounts().last().unwrap();
    assert_eq!(proc_mount.dst, "/p");
    assert_eq!(proc_mount.flags, MsFlags::empty());

    let spec = parse(&["--disable_proc", "--", "/bin/true"]).unwrap();
    assert_eq!(spec.mounts().len(), 1);
    assert!(spec.mounts().iter().all(|m| m.fs_type != "proc"));
}

#[test]
fn test_bind_mount_source_and_dest() {
    let spec = parse(&["-R", "/src:/dst", "-B", "/lib", "--", "/bin/true"]).unwrap();
    let ro = &spec.mounts()[1];
    assert_eq!(ro.src.as_deref(), Some("/src"));
    assert_eq!(ro.dst, "/dst");
    assert!(ro.flags.contains(MsFlags::MS_RDONLY));

    let rw = &spec.mounts()[2];
    assert_eq!(rw.src.as_deref(), Some("/lib"));
    assert_eq!(rw.dst, "/lib");
    assert!(!rw.flags.contains(MsFlags::MS_RDONLY));
    assert!(rw.flags.contains(MsFlags::MS_BIND | MsFlags::MS_REC | MsFlags::MS_PRIVATE));
}

#[test]
fn test_tmpfs_size_applies_to_later_mounts() {
    let spec = parse(&["-T", "/a", "--tmpfs_size", "1024", "-T", "/b", "--", "/bin/true"]).unwrap();
    assert_eq!(spec.mounts()[1].options, "size=4194304");
    assert_eq!(spec.mounts()[2].options, "size=1024");
}

#[test]
fn test_default_id_maps() {
    let spec = parse(&["--", "/bin/true"]).unwrap();
    assert_eq!(spec.uids().len(), 1);
    assert_eq!(spec.gids().len(), 1);

    let uid = spec.uids()[0];
    assert_eq!((uid.inside_id, uid.outside_id, uid.count), (getuid().as_raw(), getuid().as_raw(), 1));
    assert!(!uid.is_newidmap);
    let gid = spec.gids()[0];
    assert_eq!((gid.inside_id, gid.outside_id, gid.count), (getgid().as_raw(), getgid().as_raw(), 1));
}

#[test]
fn test_id_map_triples() {
    let spec = parse(&["-u", "1:2:3", "-u", "4:5", "-g", "6:7:8", "--", "/bin/true"]).unwrap();
    let uids: Vec<_> = spec.uids().iter().map(|m| (m.inside_id, m.outside_id, m.count)).collect();
    assert_eq!(uids, [(1, 2, 3), (4, 5, 1)]);
    let gids: Vec<_> = spec.gids().iter().map(|m| (m.inside_id, m.outside_id, m.count)).collect();
    assert_eq!(gids, [(6, 7, 8)]);
}

#[test]
fn test_id_map_bare_inside_maps_onto_caller() {
    let spec = parse(&["-u", "0", "-g", "0:", "--", "/bin/true"]).unwrap();
    assert_eq!(spec.uids()[0].inside_id, 0);
    assert_eq!(spec.uids()[0].outside_id, getuid().as_raw());
    assert_eq!(spec.gids()[0].outside_id, getgid().as_raw());
}

#[test]
fn test_id_map_by_name_and_newidmap() {
    let spec = parse(&["-U", "root:100000:65536", "-G", "0:100000:65536", "--", "/bin/true"]).unwrap();
    let uid = spec.uids()[0];
    assert_eq!((uid.inside_id, uid.outside_id, uid.count), (0, 100000, 65536));
    assert!(uid.is_newidmap);
    assert!(spec.gids()[0].is_newidmap);
}

#[test]
fn test_invalid_identity() {
    for bad in ["no-such-user-anywhere", "1:2:x", "1:2:0", "1:nobody-here-either"] {
        let err = parse(&["-u", bad, "--", "/bin/true"]).unwrap_err();
        assert!(
            matches!(err, CmdlineError::InvalidIdentity { directive: "user", .. }),
            "{bad}: {err}"
        );
        assert!(err.to_string().contains(bad));
    }
}

#[test]
fn test_rlimits() {
    let spec = parse(&[
        "--rlimit_as", "10", "--rlimit_cpu", "10", "--rlimit_core", "inf", "--", "/bin/true",
    ])
    .unwrap();
    assert_eq!(spec.rlimits().get(RlimitKind::As), 10 * 1024 * 1024);
    assert_eq!(spec.rlimits().get(RlimitKind::Cpu), 10);
    assert_eq!(spec.rlimits().get(RlimitKind::Core), jailspec::rlimit::RLIM_INFINITY);
    assert_eq!(spec.rlimits().get(RlimitKind::Nofile), 32);
    assert_eq!(spec.rlimits().get(RlimitKind::Fsize), 1024 * 1024);

    let (soft, hard) = getrlimit(RlimitKind::Nofile.resource()).unwrap();
    let spec = parse(&["--rlimit_nofile", "def", "--rlimit_stack", "hard", "--", "/bin/true"]).unwrap();
    assert_eq!(spec.rlimits().get(RlimitKind::Nofile), soft);
    let (_, stack_hard) = getrlimit(RlimitKind::Stack.resource()).unwrap();
    assert_eq!(spec.rlimits().get(RlimitKind::Stack), stack_hard);

    let spec = parse(&["--rlimit_nofile", "MAX", "--", "/bin/true"]).unwrap();
    assert_eq!(spec.rlimits().get(RlimitKind::Nofile), hard);
}

#[test]
fn test_invalid_rlimit() {
    let err = parse(&["--rlimit_as", "lots", "--", "/bin/true"]).unwrap_err();
    assert!(matches!(err, CmdlineError::InvalidRLimit { kind: RlimitKind::As, .. }));
    assert!(err.to_string().contains("lots"));
    assert!(!err.shows_usage());
}

#[test]
fn test_modes() {
    assert_eq!(parse(&["--", "/bin/true"]).unwrap().mode(), ExecMode::StandaloneOnce);
    assert_eq!(parse(&["-Ml", "--", "/bin/true"]).unwrap().mode(), ExecMode::ListenTcp);
    assert_eq!(parse(&["-M", "e", "--", "/bin/true"]).unwrap().mode(), ExecMode::StandaloneExecve);
    assert_eq!(parse(&["--mode", "rerun", "--", "/bin/true"]).unwrap().mode(), ExecMode::StandaloneRerun);

    let spec = parse(&["--port", "31337", "--", "/bin/sh"]).unwrap();
    assert_eq!(spec.mode(), ExecMode::ListenTcp);
    assert_eq!(spec.net().port, 31337);
}

#[test]
fn test_unknown_mode() {
    let err = parse(&["-M", "z", "--", "/bin/true"]).unwrap_err();
    assert!(matches!(err, CmdlineError::UnknownMode { ref value } if value == "z"));
    assert!(err.shows_usage());
    assert!(!err.is_help());
}

#[test]
fn test_unknown_mode_leaves_mode_untouched() {
    use jailspec::cmdline::{Directive, OPTIONS};

    let mode = OPTIONS.iter().find(|o| o.name == "mode").unwrap();
    let mut builder = jailspec::SpecBuilder::new().unwrap();
    builder.mode = ExecMode::StandaloneRerun;

    let result = Directive::decode(mode, Some("z"))
        .and_then(|d| d.apply(&mut builder, &mut Recorder::default()));
    assert!(result.is_err());
    assert_eq!(builder.mode, ExecMode::StandaloneRerun);
}

#[test]
fn test_no_command() {
    let err = parse(&["-H", "box", "-B", "/a", "-u", "1:2", "--rlimit_cpu", "5"]).unwrap_err();
    assert!(matches!(err, CmdlineError::NoCommand));
    assert!(err.shows_usage());

    let err = parse(&["--execute_fd", "-x", "/no/such/bin"]).unwrap_err();
    assert!(matches!(err, CmdlineError::NoCommand), "{err}");

    let err = parse(&[]).unwrap_err();
    assert!(matches!(err, CmdlineError::NoCommand));
}

#[test]
fn test_command_without_separator() {
    let spec = parse(&["-Mo", "/bin/ls", "-l", "/"]).unwrap();
    assert_eq!(spec.argv(), ["/bin/ls", "-l", "/"]);
    assert_eq!(spec.exec().path(), "/bin/ls");

    let spec = parse(&["-x", "/bin/busybox", "--", "ls", "-l"]).unwrap();
    assert_eq!(spec.exec().path(), "/bin/busybox");
    assert_eq!(spec.argv(), ["ls", "-l"]);
}

#[test]
fn test_help() {
    let err = parse(&["-h"]).unwrap_err();
    assert!(err.is_help());
    assert!(err.shows_usage());

    let err = parse(&["-H", "box", "--help", "--", "/bin/true"]).unwrap_err();
    assert!(err.is_help());
}

#[test]
fn test_unknown_directive() {
    let err = parse(&["--no_such_flag", "--", "/bin/true"]).unwrap_err();
    match &err {
        CmdlineError::UnknownDirective { directive } => assert!(directive.contains("no_such_flag")),
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.shows_usage());
    assert!(!err.is_help());
}

#[test]
fn test_missing_value() {
    let err = parse(&["--hostname"]).unwrap_err();
    assert!(
        matches!(err, CmdlineError::MissingValue { ref directive } if directive == "--hostname"),
        "{err:?}"
    );
    assert_eq!(err.to_string(), "option '--hostname' requires a value");
}

#[test]
fn test_directives_before_syntax_error_take_effect() {
    let mut recorder = Recorder::default();
    let err = parse_with(&["-v", "--bogus", "--", "/bin/true"], &mut recorder).unwrap_err();
    assert!(matches!(err, CmdlineError::UnknownDirective { .. }), "{err}");
    let levels: Vec<_> = recorder.log_inits.iter().map(|s| s.level).collect();
    assert_eq!(levels, [LevelFilter::Debug]);

    let mut recorder = Recorder::default();
    let err = parse_with(&["-H", "box", "-Q", "-x"], &mut recorder).unwrap_err();
    assert!(matches!(err, CmdlineError::MissingValue { .. }), "{err}");
    assert_eq!(recorder.log_inits.len(), 1);
    assert_eq!(recorder.log_inits[0].level, LevelFilter::Error);
}

#[test]
fn test_first_failure_wins_over_later_syntax_error() {
    let err = parse(&["-M", "z", "--bogus", "--", "/bin/true"]).unwrap_err();
    assert!(matches!(err, CmdlineError::UnknownMode { .. }), "{err}");

    let mut recorder = Recorder::default();
    let err = parse_with(&["-v", "-u", "nosuchuserzz", "--hostname"], &mut recorder).unwrap_err();
    assert!(matches!(err, CmdlineError::InvalidIdentity { .. }), "{err}");
    assert_eq!(recorder.log_inits.len(), 1);

    let err = parse(&["--bogus", "-M", "z", "--", "/bin/true"]).unwrap_err();
    assert!(matches!(err, CmdlineError::UnknownDirective { .. }), "{err}");
}

#[test]
fn test_invalid_number() {
    let err = parse(&["--port", "http", "--", "/bin/true"]).unwrap_err();
    assert!(matches!(err, CmdlineError::InvalidValue { directive: "port", .. }));

    let err = parse(&["--port", "70000", "--", "/bin/true"]).unwrap_err();
    assert!(matches!(err, CmdlineError::InvalidValue { directive: "port", .. }));

    let spec = parse(&["--cgroup_mem_max", "0x1000", "--", "/bin/true"]).unwrap();
    assert_eq!(spec.cgroups().get(CgroupKind::Mem).limit, 0x1000);
}

#[test]
fn test_deprecated_aliases() {
    let spec = parse(&[
        "--iface", "eth0", "--iface_vs_ip", "10.0.0.2", "--iface_vs_nm", "255.0.0.0",
        "--iface_vs_gw", "10.0.0.1", "--", "/bin/true",
    ])
    .unwrap();
    assert_eq!(spec.net().macvlan_iface.as_deref(), Some("eth0"));
    assert_eq!(spec.net().macvlan_vs_ip, "10.0.0.2");
    assert_eq!(spec.net().macvlan_vs_nm, "255.0.0.0");
    assert_eq!(spec.net().macvlan_vs_gw, "10.0.0.1");

    let spec = parse(&["--disable_clone_newcgroup", "--enable_clone_newcgroup", "--", "/bin/true"]).unwrap();
    assert!(spec.namespaces().cgroup);
    let spec = parse(&["--enable_clone_newcgroup", "--disable_clone_newcgroup", "--", "/bin/true"]).unwrap();
    assert!(!spec.namespaces().cgroup);
}

#[test]
fn test_usage_lists_deprecated_replacements() {
    let text = jailspec::cmdline::usage("nsjail");
    assert!(text.starts_with("Usage: nsjail [options] -- path_to_command [args]"));
    assert!(text.contains(" --bindmount_ro|-R VALUE"));
    assert!(text.contains(" --iface VALUE\n"));
    assert!(text.contains("\tDEPRECATED: Use macvlan_iface instead."));
    assert!(text.contains("\tDEPRECATED: Use macvlan_vs_gw instead."));
    assert!(text.contains("'inf' for RLIM64_INFINITY"));
}

#[test]
fn test_namespaces_and_personality() {
    let spec = parse(&[
        "-N", "--disable_clone_newpid", "--persona_addr_no_randomize", "--persona_mmap_page_zero",
        "--", "/bin/true",
    ])
    .unwrap();
    let ns = spec.namespaces();
    assert!(!ns.net && !ns.pid);
    assert!(ns.user && ns.mount && ns.ipc && ns.uts && ns.cgroup);
    assert_eq!(
        spec.personality(),
        Persona::ADDR_NO_RANDOMIZE | Persona::MMAP_PAGE_ZERO
    );

    let flags = ns.clone_flags();
    assert!(!flags.contains(CloneFlags::CLONE_NEWNET));
    assert!(!flags.contains(CloneFlags::CLONE_NEWPID));
    assert!(flags.contains(
        CloneFlags::CLONE_NEWUSER | CloneFlags::CLONE_NEWNS | CloneFlags::CLONE_NEWCGROUP
    ));

    let spec = parse(&["--", "/bin/true"]).unwrap();
    assert_eq!(spec.namespaces().clone_flags().bits().count_ones(), 7);
}

#[test]
fn test_cgroup_cpu_and_net_cls_mounts_are_independent() {
    let spec = parse(&[
        "--cgroup_cpu_mount", "/cg/cpu", "--cgroup_net_cls_mount", "/cg/net_cls",
        "--cgroup_cpu_ms_per_sec", "500", "--cgroup_pids_parent", "JAILS", "--", "/bin/true",
    ])
    .unwrap();
    let cgroups = spec.cgroups();
    assert_eq!(cgroups.cpu.mount, "/cg/cpu");
    assert_eq!(cgroups.net_cls.mount, "/cg/net_cls");
    assert_eq!(cgroups.cpu.limit, 500);
    assert_eq!(cgroups.pids.parent, "JAILS");
    assert_eq!(cgroups.mem.mount, "/sys/fs/cgroup/memory");
    assert_eq!(cgroups.mem.limit, 0);
}

#[test]
fn test_process_settings() {
    let spec = parse(&[
        "--cap", "CAP_NET_RAW", "--cap", "sys_admin", "-E", "FOO=bar", "-e", "--pass_fd", "5",
        "-t", "30", "--max_cpus", "2", "-d", "--silent", "--", "/bin/true",
    ])
    .unwrap();
    let process = spec.process();
    assert_eq!(process.caps, [13, 21]);
    assert_eq!(process.pass_fds, [0, 1, 2, 5]);
    assert_eq!(process.time_limit, 30);
    assert_eq!(process.max_cpus, 2);
    assert!(process.daemonize && process.silent);
    assert!(spec.env().keep_env);
    assert_eq!(spec.env().vars, ["FOO=bar"]);

    let err = parse(&["--cap", "CAP_WIZARDRY", "--", "/bin/true"]).unwrap_err();
    assert!(matches!(err, CmdlineError::UnknownCapability(ref name) if name == "CAP_WIZARDRY"));
}

#[test]
fn test_scalars_last_write_wins() {
    let spec = parse(&["-H", "one", "-D", "/tmp", "-H", "two", "--", "/bin/true"]).unwrap();
    assert_eq!(spec.hostname(), "two");
    assert_eq!(spec.cwd(), "/tmp");
}

#[test]
fn test_log_sink_initialized_per_directive() {
    let log = NamedTempFile::new().unwrap();
    let path = log.path().to_str().unwrap();
    let mut recorder = Recorder::default();
    parse_with(&["-v", "-l", path, "-q", "--", "/bin/true"], &mut recorder).unwrap();

    let levels: Vec<_> = recorder.log_inits.iter().map(|s| s.level).collect();
    assert_eq!(
        levels,
        [LevelFilter::Debug, LevelFilter::Debug, LevelFilter::Warn, LevelFilter::Warn]
    );
    assert_eq!(recorder.log_inits[0].file, None);
    assert_eq!(recorder.log_inits[1].file, Some(PathBuf::from(path)));
}

#[test]
fn test_log_sink_failure_aborts() {
    let mut recorder = Recorder {
        fail_log: true,
        ..Recorder::default()
    };
    let err = parse_with(&["-Q", "--", "/bin/true"], &mut recorder).unwrap_err();
    assert!(matches!(err, CmdlineError::LogSink(_)));
}

#[test]
fn test_policy_preparation() {
    let mut recorder = Recorder::default();
    parse_with(&["--", "/bin/echo", "hi"], &mut recorder).unwrap();
    assert_eq!(recorder.prepared, [vec!["/bin/echo".to_string(), "hi".to_string()]]);

    let mut recorder = Recorder {
        fail_policy: true,
        ..Recorder::default()
    };
    let err = parse_with(&["--seccomp_string", "garbage", "--", "/bin/true"], &mut recorder)
        .unwrap_err();
    assert!(matches!(err, CmdlineError::Policy(_)));
}

#[test]
fn test_execute_fd() {
    let exe = NamedTempFile::new().unwrap();
    let path = exe.path().to_str().unwrap();
    let spec = parse(&["--execute_fd", "--", path]).unwrap();
    match spec.exec() {
        ExecTarget::Fd { path: p, .. } => assert_eq!(p, path),
        ExecTarget::Path(_) => panic!("expected a descriptor target"),
    }
    assert!(spec.exec().fd().is_some());

    let err = parse(&["--execute_fd", "--", "/definitely/not/here"]).unwrap_err();
    assert!(matches!(err, CmdlineError::ExecTarget { .. }));
    assert!(!err.shows_usage());
    assert!(!err.is_fatal());
}

#[test]
fn test_config_file_directive() {
    let mut config = NamedTempFile::new().unwrap();
    write!(
        config,
        r#"{{
            "hostname": "from-config",
            "chroot_dir": "/srv/root",
            "rlimit_as": "inf",
            "rlimit_cpu": 30,
            "clone_newnet": false,
            "uidmap": [{{ "inside_id": "0", "outside_id": "1000" }}],
            "mount": [
                {{ "src": "/etc/resolv.conf", "is_bind": true }},
                {{ "dst": "/dev/shm", "fstype": "tmpfs", "rw": true, "is_dir": true }},
                {{ "src": "/proc/self/fd", "dst": "/dev/fd", "is_symlink": true }}
            ],
            "exec_bin": {{ "path": "/bin/sh", "arg": ["-c", "true"] }}
        }}"#
    )
    .unwrap();
    let path = config.path().to_str().unwrap();

    let spec = parse(&["-B", "/first", "-C", path, "-H", "from-cmdline", "-B", "/last"]).unwrap();
    assert_eq!(spec.hostname(), "from-cmdline");
    assert_eq!(spec.chroot().unwrap().to_str(), Some("/srv/root"));
    assert_eq!(spec.rlimits().get(RlimitKind::As), jailspec::rlimit::RLIM_INFINITY);
    assert_eq!(spec.rlimits().get(RlimitKind::Cpu), 30);
    assert!(!spec.namespaces().net);
    assert_eq!(spec.uids()[0].outside_id, 1000);
    assert_eq!(spec.argv(), ["/bin/sh", "-c", "true"]);

    let dsts: Vec<_> = spec.mounts().iter().map(|m| m.dst.as_str()).collect();
    assert_eq!(dsts, ["/", "/first", "/etc/resolv.conf", "/dev/shm", "/dev/fd", "/last", "/proc"]);
    assert!(spec.mounts()[4].is_symlink);
    assert_eq!(spec.mounts()[3].is_dir, DirKind::Yes);
}

#[test]
fn test_config_file_errors() {
    let mut config = NamedTempFile::new().unwrap();
    write!(config, r#"{{ "hostname": "x", "no_such_field": 1 }}"#).unwrap();
    let path = config.path().to_str().unwrap();
    let err = parse(&["-C", path, "--", "/bin/true"]).unwrap_err();
    assert!(matches!(err, CmdlineError::Config { .. }));

    let err = parse(&["-C", "/no/such/config.json", "--", "/bin/true"]).unwrap_err();
    assert!(err.to_string().contains("/no/such/config.json"));
}

#[test]
fn test_spec_is_shareable() {
    fn assert_send_sync<T: Send + Sync + Clone>() {}
    assert_send_sync::<JailSpec>();
}
