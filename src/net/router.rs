use std::collections::HashMap;

use lazy_static::lazy_static;

pub const HELP_COMMAND: &str = "!help";
pub const DATE_COMMAND: &str = "!date";
pub const STOP_COMMAND: &str = "!stop";

/// Commands answered without spawning a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    ShowHelp,
    ShowDate,
    Disconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action<'a> {
    ShowHelp,
    ShowDate,
    Disconnect,
    RunShell(&'a str),
}

lazy_static! {
    static ref BUILTINS: HashMap<&'static str, Builtin> = HashMap::from([
        (HELP_COMMAND, Builtin::ShowHelp),
        (DATE_COMMAND, Builtin::ShowDate),
        (STOP_COMMAND, Builtin::Disconnect),
    ]);
}

/// Maps an already trimmed, non-empty line to what the session should do.
///
/// Built-ins match on exact text only; everything else goes to the shell.
pub fn dispatch(line: &str) -> Action<'_> {
    match BUILTINS.get(line) {
        Some(Builtin::ShowHelp) => Action::ShowHelp,
        Some(Builtin::ShowDate) => Action::ShowDate,
        Some(Builtin::Disconnect) => Action::Disconnect,
        None => Action::RunShell(line),
    }
}
