//! Hand-off points between the command-line translator and the rest of the
//! jail: log sink setup and seccomp policy preparation.

use std::fs;

use anyhow::{Context, Result, bail};
use log::debug;

use crate::logs;
use crate::spec::{JailSpec, LogSettings};

/// Services the translator calls out to while building a spec.
pub trait Collaborators {
    /// Called synchronously each time a log directive is processed.
    fn init_log(&mut self, settings: &LogSettings) -> Result<()>;

    /// Receives the finished spec; an error rejects it.
    fn prepare_policy(&mut self, spec: &JailSpec) -> Result<()>;
}

/// Collaborators backed by the real process logger and filesystem.
#[derive(Debug, Default)]
pub struct HostCollaborators;

impl Collaborators for HostCollaborators {
    fn init_log(&mut self, settings: &LogSettings) -> Result<()> {
        logs::init(settings)
    }

    fn prepare_policy(&mut self, spec: &JailSpec) -> Result<()> {
        let policy = load_policy(spec)?;
        if let Some(policy) = policy {
            debug!("Seccomp policy loaded ({} bytes)", policy.len());
        }
        Ok(())
    }
}

/// Loads the seccomp policy text, from the file when one is given,
/// otherwise from the inline string.
pub fn load_policy(spec: &JailSpec) -> Result<Option<String>> {
    let seccomp = spec.seccomp();
    let policy = match (&seccomp.file, &seccomp.string) {
        (Some(path), _) => fs::read_to_string(path).with_context(|| {
            format!("seccomp policy file '{}' cannot be read", path.display())
        })?,
        (None, Some(inline)) => inline.clone(),
        (None, None) => return Ok(None),
    };
    if policy.trim().is_empty() {
        bail!("seccomp policy is empty");
    }
    Ok(Some(policy))
}
