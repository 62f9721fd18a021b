use std::process::ExitCode;

use anyhow::Result;
use jailspec::spec::LogSettings;
use jailspec::{logs, parse_args};

fn main() -> Result<ExitCode> {
    logs::init(&LogSettings::default())?;

    match parse_args(std::env::args_os()) {
        Ok(spec) => {
            jailspec::log_params(&spec);
            Ok(ExitCode::SUCCESS)
        }
        Err(err) if err.is_help() => Ok(ExitCode::SUCCESS),
        Err(err) if err.is_fatal() => Ok(ExitCode::from(0xff)),
        Err(_) => Ok(ExitCode::FAILURE),
    }
}
