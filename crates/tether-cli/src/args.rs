//! Separates configuration flags from the command line proper.
//!
//! Configuration flags (`--worker-root`, `--log-filter` and the rest) come
//! before the subcommand and go to the configuration loader; everything from
//! the first other token onwards is parsed by clap.

use std::ffi::{OsStr, OsString};

const PROGRAM: &str = "tether";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ArgumentSplit {
    pub(crate) config: Vec<OsString>,
    pub(crate) command: Vec<OsString>,
}

pub(crate) fn split_arguments(args: impl IntoIterator<Item = OsString>) -> ArgumentSplit {
    let mut tokens = args.into_iter();
    let program = tokens.next().unwrap_or_else(|| OsString::from(PROGRAM));
    let mut config = vec![program.clone()];
    let mut rest = tokens.peekable();

    while let Some(flag) = rest.next_if(|token| is_config_flag(token)) {
        let inline_value = flag.to_string_lossy().contains('=');
        config.push(flag);
        if !inline_value && let Some(value) = rest.next() {
            config.push(value);
        }
    }

    let mut command = vec![program];
    command.extend(rest);
    ArgumentSplit { config, command }
}

fn is_config_flag(token: &OsStr) -> bool {
    let text = token.to_string_lossy();
    text.starts_with("--") && !matches!(text.as_ref(), "--" | "--help" | "--version")
}
