/// Available commands and autocomplete logic

#[derive(Debug, Clone)]
pub struct Command {
  pub name: &'static str,
  pub aliases: &'static [&'static str],
  pub description: &'static str,
}

/// All available commands
pub const COMMANDS: &[Command] = &[
  Command {
    name: "home",
    aliases: &["h", "dashboard"],
    description: "Overview and system metrics",
  },
  Command {
    name: "instances",
    aliases: &["i", "bots"],
    description: "Manage bot instances",
  },
  Command {
    name: "downloads",
    aliases: &["d", "deploy"],
    description: "Followed download job",
  },
  Command {
    name: "follow",
    aliases: &["f", "watch"],
    description: "Follow a download job: follow <id>",
  },
  Command {
    name: "unfollow",
    aliases: &["u"],
    description: "Stop following the current job",
  },
  Command {
    name: "refresh",
    aliases: &["r", "reload"],
    description: "Refresh data now",
  },
  Command {
    name: "cache",
    aliases: &["c"],
    description: "Cache statistics; cache clear drops all entries",
  },
  Command {
    name: "quit",
    aliases: &["q", "exit"],
    description: "Exit botdeck",
  },
];

/// A parsed command line: the command word and its remaining arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
  pub name: &'static str,
  pub args: Vec<String>,
}

/// Resolve typed input to a command, using the selected suggestion when the
/// first word is not an exact name or alias.
pub fn parse(input: &str, selected_suggestion: usize) -> Option<Invocation> {
  let mut words = input.split_whitespace();
  let first = words.next().unwrap_or("").to_lowercase();
  let args: Vec<String> = words.map(String::from).collect();

  let exact = COMMANDS
    .iter()
    .find(|c| c.name == first || c.aliases.contains(&first.as_str()));
  let command = match exact {
    Some(command) => command,
    None => {
      let suggestions = get_suggestions(&first);
      suggestions
        .get(selected_suggestion)
        .or_else(|| suggestions.first())
        .copied()?
    }
  };

  Some(Invocation {
    name: command.name,
    args,
  })
}

/// Get autocomplete suggestions for a given input
pub fn get_suggestions(input: &str) -> Vec<&'static Command> {
  let input_lower = input
    .split_whitespace()
    .next()
    .unwrap_or("")
    .to_lowercase();

  if input_lower.is_empty() {
    return COMMANDS.iter().collect();
  }

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

  // Sort by priority
  matches.sort_by_key(|(_, priority)| *priority);

  matches.into_iter().map(|(cmd, _)| cmd).collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_input_returns_all() {
    let suggestions = get_suggestions("");
    assert_eq!(suggestions.len(), COMMANDS.len());
  }

  #[test]
  fn test_exact_and_alias_match() {
    assert_eq!(get_suggestions("instances")[0].name, "instances");
    assert_eq!(get_suggestions("i")[0].name, "instances");
    assert_eq!(get_suggestions("bots")[0].name, "instances");
  }

  #[test]
  fn test_prefix_match() {
    assert_eq!(get_suggestions("down")[0].name, "downloads");
  }

  #[test]
  fn test_fuzzy_match() {
    assert_eq!(get_suggestions("follo")[0].name, "follow");
    assert_eq!(get_suggestions("fresh")[0].name, "refresh");
  }

  #[test]
  fn test_suggestions_ignore_arguments() {
    assert_eq!(get_suggestions("follow task-9")[0].name, "follow");
  }

  #[test]
  fn test_parse_with_arguments() {
    assert_eq!(
      parse("follow task-9", 0),
      Some(Invocation {
        name: "follow",
        args: vec!["task-9".to_string()],
      })
    );
    assert_eq!(parse("q", 0).unwrap().name, "quit");
  }

  #[test]
  fn test_parse_uses_selected_suggestion() {
    // "o" matches several commands; the second suggestion is picked
    let suggestions = get_suggestions("o");
    let picked = parse("o", 1).unwrap();
    assert_eq!(picked.name, suggestions[1].name);
    assert_eq!(parse("zzz", 0), None);
  }
}
