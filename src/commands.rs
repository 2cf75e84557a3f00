/// Console commands and lookup

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
  Status,
  Pending,
  Sync,
  Activity,
  Reconnect,
  Hide,
  Show,
  SkipWaiting,
  Submit,
  Help,
  Quit,
}

#[derive(Debug, Clone)]
pub struct Command {
  pub name: &'static str,
  pub aliases: &'static [&'static str],
  pub description: &'static str,
  pub action: Action,
}

/// All available commands
pub const COMMANDS: &[Command] = &[
  Command {
    name: "status",
    aliases: &["st"],
    description: "Connectivity, channel and cache state",
    action: Action::Status,
  },
  Command {
    name: "pending",
    aliases: &["p", "queue"],
    description: "Changes waiting to sync, per entity type",
    action: Action::Pending,
  },
  Command {
    name: "sync",
    aliases: &["s", "drain"],
    description: "Replay queued changes now",
    action: Action::Sync,
  },
  Command {
    name: "activity",
    aliases: &["a", "recent"],
    description: "Recent live updates",
    action: Action::Activity,
  },
  Command {
    name: "reconnect",
    aliases: &["r"],
    description: "Reset and reopen the live update channel",
    action: Action::Reconnect,
  },
  Command {
    name: "hide",
    aliases: &["background"],
    description: "Treat the app as hidden (suspends heartbeat)",
    action: Action::Hide,
  },
  Command {
    name: "show",
    aliases: &["foreground"],
    description: "Treat the app as visible again",
    action: Action::Show,
  },
  Command {
    name: "skip-waiting",
    aliases: &["activate"],
    description: "Switch to the newly installed cache version",
    action: Action::SkipWaiting,
  },
  Command {
    name: "submit",
    aliases: &["post"],
    description: "Write an entity: submit sales {\"total\": 4.5}",
    action: Action::Submit,
  },
  Command {
    name: "help",
    aliases: &["h", "?"],
    description: "List commands",
    action: Action::Help,
  },
  Command {
    name: "quit",
    aliases: &["q", "exit"],
    description: "Exit till",
    action: Action::Quit,
  },
];

/// Resolve a typed word to a command.
///
/// Exact names and aliases win; otherwise the first command whose name or an
/// alias starts with the word.
pub fn find(word: &str) -> Option<&'static Command> {
  let word = word.to_lowercase();
  let named = |cmd: &&Command| cmd.name == word || cmd.aliases.contains(&word.as_str());
  let prefixed =
    |cmd: &&Command| cmd.name.starts_with(&word) || cmd.aliases.iter().any(|a| a.starts_with(&word));

  COMMANDS
    .iter()
    .find(named)
    .or_else(|| COMMANDS.iter().find(prefixed))
}

/// Split a console line into its command and the rest of the line.
///
/// The command is resolved from the first word with `find`. Returns `None`
/// for blank lines and words nothing matches.
pub fn parse(line: &str) -> Option<(&'static Command, &str)> {
  let line = line.trim();
  let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
  if word.is_empty() {
    return None;
  }
  let cmd = find(word)?;
  Some((cmd, rest.trim()))
}
