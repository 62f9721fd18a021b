//! Command-line front end of an nsjail-style sandbox.
//!
//! Turns argv into a complete, ordered [`JailSpec`]: the root mount comes
//! first in the mount list, id maps are never empty, resource limit keywords
//! are resolved against the current process limits.

pub mod caps;
pub mod cmdline;
pub mod config;
pub mod error;
pub mod logs;
pub mod mnt;
pub mod rlimit;
pub mod sandbox;
pub mod spec;
pub mod split;
pub mod user;

pub use cmdline::{log_params, parse_args, parse_args_with};
pub use config::{JailConfig, MountConfig};
pub use error::{CmdlineError, Result};
pub use mnt::{DirKind, MountEntry};
pub use rlimit::{RlimitKind, RlimitSet, parse_rlimit};
pub use sandbox::{Collaborators, HostCollaborators};
pub use spec::{ExecMode, ExecTarget, JailSpec, SpecBuilder};
pub use user::{IdKind, IdMapEntry};
