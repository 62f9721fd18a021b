//! Mount plan: the ordered list of mounts and symlinks to perform inside the
//! new mount namespace.

use std::collections::VecDeque;
use std::fmt;

use nix::mount::MsFlags;

use crate::error::{CmdlineError, Result};

/// Whether the mount target is a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DirKind {
    Yes,
    No,
    /// Decided from the source when the mount is executed.
    #[default]
    Maybe,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    /// `None` for virtual filesystems (tmpfs, proc).
    pub src: Option<String>,
    pub dst: String,
    pub fs_type: String,
    pub options: String,
    pub flags: MsFlags,
    pub is_dir: DirKind,
    /// A failed mandatory mount aborts the jail; others are best-effort.
    pub mandatory: bool,
    /// Create a symlink `dst -> src` instead of mounting.
    pub is_symlink: bool,
}

impl MountEntry {
    /// Starts a mandatory mount entry. The destination defaults to the source.
    pub fn new(src: Option<&str>, dst: Option<&str>, fs_type: &str, flags: MsFlags) -> Result<Self> {
        let dst = match (dst, src) {
            (Some(dst), _) if !dst.is_empty() => dst,
            (_, Some(src)) if !src.is_empty() => src,
            _ => {
                return Err(CmdlineError::InvalidMount(
                    "neither a source nor a destination was given".to_string(),
                ));
            }
        };
        Ok(Self {
            src: src.map(str::to_string),
            dst: dst.to_string(),
            fs_type: fs_type.to_string(),
            options: String::new(),
            flags,
            is_dir: DirKind::Maybe,
            mandatory: true,
            is_symlink: false,
        })
    }

    /// Recursive, private bind mount; read-only unless `rw`.
    pub fn bind(src: &str, dst: Option<&str>, rw: bool) -> Result<Self> {
        if src.is_empty() {
            return Err(CmdlineError::InvalidMount(
                "bind mount needs a source".to_string(),
            ));
        }
        Self::new(Some(src), dst, "", bind_flags(rw))
    }

    pub fn tmpfs(dst: &str, size: u64) -> Result<Self> {
        Ok(Self::new(None, Some(dst), "tmpfs", MsFlags::empty())?
            .options(format!("size={size}"))
            .dir(DirKind::Yes))
    }

    pub fn proc_fs(path: &str, rw: bool) -> Result<Self> {
        Ok(Self::new(None, Some(path), "proc", ro_unless(rw))?.dir(DirKind::Yes))
    }

    pub fn symlink(src: &str, dst: &str) -> Result<Self> {
        let mut entry = Self::new(Some(src), Some(dst), "", MsFlags::empty())?;
        entry.is_symlink = true;
        Ok(entry)
    }

    pub fn options(mut self, options: impl Into<String>) -> Self {
        self.options = options.into();
        self
    }

    pub fn dir(mut self, is_dir: DirKind) -> Self {
        self.is_dir = is_dir;
        self
    }

    pub fn mandatory(mut self, mandatory: bool) -> Self {
        self.mandatory = mandatory;
        self
    }
}

/// `MS_BIND | MS_REC | MS_PRIVATE`, plus `MS_RDONLY` unless `rw`.
pub fn bind_flags(rw: bool) -> MsFlags {
    MsFlags::MS_BIND | MsFlags::MS_REC | MsFlags::MS_PRIVATE | ro_unless(rw)
}

fn ro_unless(rw: bool) -> MsFlags {
    if rw { MsFlags::empty() } else { MsFlags::MS_RDONLY }
}

const FLAG_NAMES: &[(MsFlags, &str)] = &[
    (MsFlags::MS_RDONLY, "MS_RDONLY"),
    (MsFlags::MS_NOSUID, "MS_NOSUID"),
    (MsFlags::MS_NODEV, "MS_NODEV"),
    (MsFlags::MS_NOEXEC, "MS_NOEXEC"),
    (MsFlags::MS_SYNCHRONOUS, "MS_SYNCHRONOUS"),
    (MsFlags::MS_REMOUNT, "MS_REMOUNT"),
    (MsFlags::MS_NOATIME, "MS_NOATIME"),
    (MsFlags::MS_BIND, "MS_BIND"),
    (MsFlags::MS_REC, "MS_REC"),
    (MsFlags::MS_PRIVATE, "MS_PRIVATE"),
    (MsFlags::MS_SLAVE, "MS_SLAVE"),
    (MsFlags::MS_SHARED, "MS_SHARED"),
];

struct FlagList(MsFlags);

impl fmt::Display for FlagList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = FLAG_NAMES
            .iter()
            .filter(|(flag, _)| self.0.contains(*flag))
            .map(|(_, name)| *name);
        match names.next() {
            None => f.write_str("0"),
            Some(first) => {
                f.write_str(first)?;
                names.try_for_each(|name| write!(f, "|{name}"))
            }
        }
    }
}

/// Human-readable description, for diagnostics only.
impl fmt::Display for MountEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let src = self.src.as_deref().unwrap_or("");
        if self.is_symlink {
            return write!(f, "'{}' -> '{}'", self.dst, src);
        }
        write!(
            f,
            "src:'{}' dst:'{}' type:'{}' flags:{} options:'{}' dir:{} mandatory:{}",
            src,
            self.dst,
            self.fs_type,
            FlagList(self.flags),
            self.options,
            match self.is_dir {
                DirKind::Yes => "true",
                DirKind::No => "false",
                DirKind::Maybe => "maybe",
            },
            self.mandatory,
        )
    }
}

/// Mount entries in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountPlan {
    entries: VecDeque<MountEntry>,
}

impl MountPlan {
    pub fn add_tail(&mut self, entry: MountEntry) {
        self.entries.push_back(entry);
    }

    /// Only the namespace root goes here.
    pub fn add_head(&mut self, entry: MountEntry) {
        self.entries.push_front(entry);
    }

    pub fn iter(&self) -> impl Iterator<Item = &MountEntry> {
        self.entries.iter()
    }

    pub fn into_vec(self) -> Vec<MountEntry> {
        self.entries.into()
    }
}
