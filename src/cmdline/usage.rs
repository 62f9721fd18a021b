use std::fmt;

use super::options::{Code, DEPRECATED, OPTIONS, OptionSpec, RLIMIT_KEYWORDS, replacement};

/// Usage text rendered from the option table.
pub struct Usage<'a> {
    pub program: &'a str,
}

fn describe(f: &mut fmt::Formatter<'_>, opt: &OptionSpec) -> fmt::Result {
    let arg = if opt.takes_value { "VALUE" } else { "" };
    match opt.short {
        Some(short) => writeln!(f, " --{}|-{} {}", opt.name, short, arg)?,
        None => writeln!(f, " --{} {}", opt.name, arg)?,
    }
    match opt.code {
        Code::Rlimit(_) => writeln!(f, "\t{}, {}", opt.descr, RLIMIT_KEYWORDS),
        _ => writeln!(f, "\t{}", opt.descr),
    }
}

impl fmt::Display for Usage<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Usage: {} [options] -- path_to_command [args]", self.program)?;
        writeln!(f, "Options:")?;
        for opt in OPTIONS {
            describe(f, opt)?;
        }

        writeln!(f, "\nDeprecated options:")?;
        for opt in DEPRECATED {
            describe(f, opt)?;
            match replacement(opt.code) {
                Some(canonical) => writeln!(f, "\tDEPRECATED: Use {} instead.", canonical.name)?,
                None => writeln!(f, "\tDEPRECATED: No replacement, this is the default now.")?,
            }
        }

        let p = self.program;
        writeln!(f, "\n Examples: ")?;
        writeln!(f, " Wait on a port 31337 for connections, and run /bin/sh")?;
        writeln!(f, "  {p} -Ml --port 31337 --chroot / -- /bin/sh -i")?;
        writeln!(f, " Re-run echo command as a sub-process")?;
        writeln!(f, "  {p} -Mr --chroot / -- /bin/echo \"ABC\"")?;
        writeln!(f, " Run echo command once only, as a sub-process")?;
        writeln!(f, "  {p} -Mo --chroot / -- /bin/echo \"ABC\"")?;
        writeln!(f, " Execute echo command directly, without a supervising process")?;
        writeln!(f, "  {p} -Me --chroot / --disable_proc -- /bin/echo \"ABC\"")
    }
}

pub fn usage(program: &str) -> String {
    Usage { program }.to_string()
}
