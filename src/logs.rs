//! Log sink built on `env_logger`, re-initializable while the command line
//! is being parsed.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::fd::BorrowedFd;
use std::sync::{OnceLock, PoisonError, RwLock};

use anyhow::{Context, Result, bail};
use env_logger::{Builder, Logger, Target};
use log::{Log, Metadata, Record};

use crate::spec::LogSettings;

/// Forwards to whichever `env_logger::Logger` was configured last.
struct SwitchableLogger {
    inner: RwLock<Option<Logger>>,
}

impl Log for SwitchableLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.as_ref().is_some_and(|logger| logger.enabled(metadata))
    }

    fn log(&self, record: &Record<'_>) {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(logger) = inner.as_ref() {
            logger.log(record);
        }
    }

    fn flush(&self) {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(logger) = inner.as_ref() {
            logger.flush();
        }
    }
}

static SINK: OnceLock<SwitchableLogger> = OnceLock::new();

/// Points the process logger at the destination and level in `settings`.
///
/// Safe to call repeatedly; each call replaces the previous configuration.
pub fn init(settings: &LogSettings) -> Result<()> {
    let mut builder = Builder::new();
    builder
        .filter_level(settings.level)
        .target(target(settings)?)
        .format_timestamp_secs();
    let logger = builder.build();

    let sink = SINK.get_or_init(|| SwitchableLogger {
        inner: RwLock::new(None),
    });
    *sink.inner.write().unwrap_or_else(PoisonError::into_inner) = Some(logger);

    // Fails only if some other logger got installed first.
    let _ = log::set_logger(sink);
    log::set_max_level(settings.level);
    Ok(())
}

fn target(settings: &LogSettings) -> Result<Target> {
    if let Some(path) = &settings.file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("couldn't open log file '{}'", path.display()))?;
        return Ok(Target::Pipe(Box::new(file)));
    }

    match settings.fd {
        libc::STDERR_FILENO => Ok(Target::Stderr),
        libc::STDOUT_FILENO => Ok(Target::Stdout),
        fd if fd < 0 => bail!("invalid log fd {fd}"),
        fd => {
            // SAFETY: the descriptor is only duplicated here; a closed fd makes
            // the duplication fail with EBADF.
            let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
            let owned = borrowed
                .try_clone_to_owned()
                .with_context(|| format!("couldn't duplicate log fd {fd}"))?;
            let pipe: Box<dyn Write + Send> = Box::new(File::from(owned));
            Ok(Target::Pipe(pipe))
        }
    }
}
