use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::rlimit::RlimitKind;

/// Everything that can stop the translation of a command line into a
/// [`JailSpec`](crate::JailSpec).
///
/// Parsing stops at the first error; no partially built [`JailSpec`](crate::JailSpec) is
/// ever returned alongside one of these.
#[derive(Debug, Error)]
pub enum CmdlineError {
    #[error("unknown option '{directive}'")]
    UnknownDirective { directive: String },

    #[error("option '{directive}' requires a value")]
    MissingValue { directive: String },

    #[error("{0}")]
    Usage(String),

    #[error("help requested")]
    HelpRequested,

    #[error("unknown mode '{value}', supported modes: l, o, e, r")]
    UnknownMode { value: String },

    #[error("no command provided")]
    NoCommand,

    #[error(
        "{kind} needs a numeric or 'max'/'hard'/'def'/'soft'/'inf' value ('{value}' provided)"
    )]
    InvalidRLimit { kind: RlimitKind, value: String },

    #[error("--{directive}: cannot parse '{value}' as an identity mapping ({reason})")]
    InvalidIdentity {
        directive: &'static str,
        value: String,
        reason: String,
    },

    #[error("--{directive}: invalid value '{value}' ({reason})")]
    InvalidValue {
        directive: &'static str,
        value: String,
        reason: String,
    },

    #[error("unknown capability '{0}'")]
    UnknownCapability(String),

    #[error("invalid mount point: {0}")]
    InvalidMount(String),

    #[error("getrlimit({kind}) failed: {source}")]
    HostQuery {
        kind: RlimitKind,
        #[source]
        source: nix::Error,
    },

    #[error("couldn't open '{path}' for descriptor execution: {source}")]
    ExecTarget {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("couldn't parse configuration from '{}': {reason}", path.display())]
    Config { path: PathBuf, reason: String },

    #[error("couldn't initialize the log sink: {0:#}")]
    LogSink(anyhow::Error),

    #[error("couldn't prepare sandboxing setup: {0:#}")]
    Policy(anyhow::Error),
}

impl CmdlineError {
    /// Errors after which the usage text is displayed.
    pub fn shows_usage(&self) -> bool {
        matches!(
            self,
            Self::UnknownDirective { .. }
                | Self::MissingValue { .. }
                | Self::Usage(_)
                | Self::HelpRequested
                | Self::UnknownMode { .. }
                | Self::NoCommand
        )
    }

    pub fn is_help(&self) -> bool {
        matches!(self, Self::HelpRequested)
    }

    /// Host failures with no safe fallback; the process should abort.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::HostQuery { .. })
    }
}

pub type Result<T> = std::result::Result<T, CmdlineError>;
