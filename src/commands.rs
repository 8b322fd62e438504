//! Shell commands, autocomplete and argument parsing
use serde_json::Value;

use crate::cache::Tag;

#[derive(Debug, Clone)]
pub struct Command {
  pub name: &'static str,
  pub aliases: &'static [&'static str],
  pub usage: &'static str,
  pub description: &'static str,
}

/// All available commands
pub const COMMANDS: &[Command] = &[
  Command {
    name: "books",
    aliases: &["bs"],
    usage: "books",
    description: "List books",
  },
  Command {
    name: "book",
    aliases: &["b"],
    usage: "book <id>",
    description: "Show one book",
  },
  Command {
    name: "authors",
    aliases: &["as"],
    usage: "authors",
    description: "List authors",
  },
  Command {
    name: "author",
    aliases: &["a"],
    usage: "author <id>",
    description: "Show one author",
  },
  Command {
    name: "genres",
    aliases: &["gs"],
    usage: "genres",
    description: "List genres",
  },
  Command {
    name: "genre",
    aliases: &["g"],
    usage: "genre <id>",
    description: "Show one genre",
  },
  Command {
    name: "users",
    aliases: &["us"],
    usage: "users",
    description: "List users",
  },
  Command {
    name: "user",
    aliases: &["u"],
    usage: "user <id>",
    description: "Show one user",
  },
  Command {
    name: "create",
    aliases: &["new", "add"],
    usage: "create <resource> <json>",
    description: "Create a record",
  },
  Command {
    name: "update",
    aliases: &["edit"],
    usage: "update <resource> <id> <json>",
    description: "Update a record",
  },
  Command {
    name: "delete",
    aliases: &["rm", "del"],
    usage: "delete <resource> <id>",
    description: "Delete a record",
  },
  Command {
    name: "watch",
    aliases: &["w"],
    usage: "watch <resource> [id]",
    description: "Print live updates for a query",
  },
  Command {
    name: "unwatch",
    aliases: &["uw"],
    usage: "unwatch [n]",
    description: "Stop one watch, or all of them",
  },
  Command {
    name: "invalidate",
    aliases: &["inv"],
    usage: "invalidate <Kind:id|Kind:LIST>...",
    description: "Invalidate cached queries by tag",
  },
  Command {
    name: "cache",
    aliases: &["entries"],
    usage: "cache",
    description: "Dump cache entries",
  },
  Command {
    name: "login",
    aliases: &["signin"],
    usage: "login <email> <password>",
    description: "Log in and keep the session token",
  },
  Command {
    name: "register",
    aliases: &["signup"],
    usage: "register <email> <password> <full name>",
    description: "Create an account",
  },
  Command {
    name: "logout",
    aliases: &["signout"],
    usage: "logout",
    description: "Forget the session token",
  },
  Command {
    name: "help",
    aliases: &["h", "?"],
    usage: "help",
    description: "Show this help",
  },
  Command {
    name: "quit",
    aliases: &["q", "exit"],
    usage: "quit",
    description: "Exit libris",
  },
];

fn ranked(input: &str) -> Vec<(&'static Command, u32)> {
  let input_lower = input.to_lowercase();
  let mut matches: Vec<(&Command, u32)> = Vec::new();

  for cmd in COMMANDS {
    // Exact match on name
    if cmd.name == input_lower {
      matches.push((cmd, 0)); // Highest priority
      continue;
    }

    // Exact match on alias
    if cmd.aliases.contains(&input_lower.as_str()) {
      matches.push((cmd, 1));
      continue;
    }

    // Prefix match on name
    if cmd.name.starts_with(&input_lower) {
      matches.push((cmd, 2));
      continue;
    }

    // Prefix match on alias
    if cmd.aliases.iter().any(|a| a.starts_with(&input_lower)) {
      matches.push((cmd, 3));
      continue;
    }

    // Fuzzy match (contains)
    if cmd.name.contains(&input_lower) {
      matches.push((cmd, 4));
      continue;
    }

    // Fuzzy match on alias
    if cmd.aliases.iter().any(|a| a.contains(&input_lower)) {
      matches.push((cmd, 5));
    }
  }

  matches.sort_by_key(|(_, priority)| *priority);
  matches
}

/// Get autocomplete suggestions for a given input
pub fn get_suggestions(input: &str) -> Vec<&'static Command> {
  if input.is_empty() {
    return COMMANDS.iter().collect();
  }
  ranked(input).into_iter().map(|(cmd, _)| cmd).collect()
}

/// Resolve a typed command word: an exact name or alias, or a prefix shared
/// by exactly one command.
pub fn resolve(word: &str) -> Option<&'static Command> {
  if word.is_empty() {
    return None;
  }
  let matches = ranked(word);
  match matches.first() {
    Some((cmd, 0 | 1)) => Some(*cmd),
    _ => {
      let mut prefixed = matches.iter().filter(|(_, p)| *p <= 3);
      match (prefixed.next(), prefixed.next()) {
        (Some((cmd, _)), None) => Some(*cmd),
        _ => None,
      }
    }
  }
}

/// Which collection a command addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
  Books,
  Authors,
  Genres,
  Users,
}

impl ResourceKind {
  pub fn parse(word: &str) -> Option<Self> {
    match word.to_lowercase().as_str() {
      "book" | "books" | "b" => Some(Self::Books),
      "author" | "authors" | "a" => Some(Self::Authors),
      "genre" | "genres" | "g" => Some(Self::Genres),
      "user" | "users" | "u" => Some(Self::Users),
      _ => None,
    }
  }
}

/// A parsed shell line.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
  List(ResourceKind),
  Show(ResourceKind, u64),
  Create(ResourceKind, Value),
  Update(ResourceKind, u64, Value),
  Delete(ResourceKind, u64),
  Watch(ResourceKind, Option<u64>),
  Unwatch(Option<usize>),
  Invalidate(Vec<Tag>),
  Cache,
  Login { email: String, password: String },
  Register { email: String, password: String, full_name: String },
  Logout,
  Help,
  Quit,
}

/// Parse one input line. `Ok(None)` for a blank line.
pub fn parse(line: &str) -> Result<Option<Action>, String> {
  let line = line.trim();
  let Some(word) = line.split_whitespace().next() else {
    return Ok(None);
  };
  let rest = line[word.len()..].trim_start();

  let cmd = resolve(word).ok_or_else(|| match get_suggestions(word).first() {
    Some(s) => format!("unknown command `{}`, did you mean `{}`?", word, s.name),
    None => format!("unknown command `{}`, try `help`", word),
  })?;
  let usage = || format!("usage: {}", cmd.usage);
  let mut args = rest.split_whitespace();

  let action = match cmd.name {
    "books" => Action::List(ResourceKind::Books),
    "authors" => Action::List(ResourceKind::Authors),
    "genres" => Action::List(ResourceKind::Genres),
    "users" => Action::List(ResourceKind::Users),
    "book" | "author" | "genre" | "user" => {
      let kind = ResourceKind::parse(cmd.name).ok_or_else(usage)?;
      Action::Show(kind, parse_id(args.next()).ok_or_else(usage)?)
    }
    "create" => {
      let (kind, json) = split_word(rest);
      let kind = ResourceKind::parse(kind).ok_or_else(usage)?;
      Action::Create(kind, parse_json(json)?)
    }
    "update" => {
      let (kind, rest) = split_word(rest);
      let (id, json) = split_word(rest);
      let kind = ResourceKind::parse(kind).ok_or_else(usage)?;
      Action::Update(kind, parse_id(Some(id)).ok_or_else(usage)?, parse_json(json)?)
    }
    "delete" => {
      let kind = args.next().and_then(ResourceKind::parse).ok_or_else(usage)?;
      Action::Delete(kind, parse_id(args.next()).ok_or_else(usage)?)
    }
    "watch" => {
      let kind = args.next().and_then(ResourceKind::parse).ok_or_else(usage)?;
      let id = match args.next() {
        Some(id) => Some(parse_id(Some(id)).ok_or_else(usage)?),
        None => None,
      };
      Action::Watch(kind, id)
    }
    "unwatch" => match args.next() {
      Some(n) => Action::Unwatch(Some(n.parse().map_err(|_| usage())?)),
      None => Action::Unwatch(None),
    },
    "invalidate" => {
      let tags = args.map(parse_tag).collect::<Result<Vec<_>, _>>()?;
      if tags.is_empty() {
        return Err(usage());
      }
      Action::Invalidate(tags)
    }
    "cache" => Action::Cache,
    "login" => match (args.next(), args.next()) {
      (Some(email), Some(password)) => Action::Login {
        email: email.to_string(),
        password: password.to_string(),
      },
      _ => return Err(usage()),
    },
    "register" => {
      let (email, rest) = split_word(rest);
      let (password, full_name) = split_word(rest);
      if email.is_empty() || password.is_empty() || full_name.is_empty() {
        return Err(usage());
      }
      Action::Register {
        email: email.to_string(),
        password: password.to_string(),
        full_name: full_name.to_string(),
      }
    }
    "logout" => Action::Logout,
    "help" => Action::Help,
    _ => Action::Quit,
  };

  Ok(Some(action))
}

/// Parse a tag written as `Kind:id` or `Kind:LIST`.
pub fn parse_tag(text: &str) -> Result<Tag, String> {
  match text.split_once(':') {
    Some((kind, "LIST")) if !kind.is_empty() => Ok(Tag::list(kind)),
    Some((kind, id)) if !kind.is_empty() && !id.is_empty() => Ok(Tag::id(kind, id)),
    _ => Err(format!("invalid tag `{}`, expected Kind:id or Kind:LIST", text)),
  }
}

fn split_word(text: &str) -> (&str, &str) {
  let text = text.trim_start();
  match text.split_once(char::is_whitespace) {
    Some((word, rest)) => (word, rest.trim_start()),
    None => (text, ""),
  }
}

fn parse_id(word: Option<&str>) -> Option<u64> {
  word?.parse().ok()
}

fn parse_json(text: &str) -> Result<Value, String> {
  serde_json::from_str(text).map_err(|e| format!("invalid JSON body: {}", e))
}

/// Help text, one line per command
pub fn help() -> String {
  COMMANDS
    .iter()
    .map(|cmd| {
      let aliases = if cmd.aliases.is_empty() {
        String::new()
      } else {
        format!(" ({})", cmd.aliases.join(", "))
      };
      format!("  {:<42} {}{}", cmd.usage, cmd.description, aliases)
    })
    .collect::<Vec<_>>()
    .join("\n")
}
