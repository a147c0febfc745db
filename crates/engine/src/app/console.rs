use std::collections::HashMap;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandParseError {
    pub reason: String,
    pub usage: String,
}

impl CommandParseError {
    pub fn new(reason: impl Into<String>, usage: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            usage: usage.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsoleRegistryError {
    #[error("command name cannot be empty")]
    EmptyName,
    #[error("duplicate command registration: {name}")]
    Duplicate { name: String },
}

type ParseFn<C> = dyn Fn(&[String]) -> Result<C, CommandParseError> + Send + Sync;

struct CommandSpec<C> {
    name: String,
    help: String,
    arg_schema: String,
    parse: Box<ParseFn<C>>,
}

/// Named console commands parsed into a caller-defined command type `C`.
///
/// Lookup is case-insensitive; `help_lines` lists commands in registration order.
pub struct ConsoleCommandRegistry<C> {
    specs: Vec<CommandSpec<C>>,
    lookup_by_lower_name: HashMap<String, usize>,
}

impl<C> Default for ConsoleCommandRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> ConsoleCommandRegistry<C> {
    pub fn new() -> Self {
        Self {
            specs: Vec::new(),
            lookup_by_lower_name: HashMap::new(),
        }
    }

    pub fn register<F>(
        &mut self,
        name: impl Into<String>,
        help: impl Into<String>,
        arg_schema: impl Into<String>,
        parse: F,
    ) -> Result<(), ConsoleRegistryError>
    where
        F: Fn(&[String]) -> Result<C, CommandParseError> + Send + Sync + 'static,
    {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ConsoleRegistryError::EmptyName);
        }
        let lower = name.to_ascii_lowercase();
        if self.lookup_by_lower_name.contains_key(&lower) {
            return Err(ConsoleRegistryError::Duplicate { name });
        }

        self.specs.push(CommandSpec {
            name,
            help: help.into(),
            arg_schema: arg_schema.into(),
            parse: Box::new(parse),
        });
        self.lookup_by_lower_name
            .insert(lower, self.specs.len() - 1);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn help_lines(&self) -> Vec<String> {
        self.specs
            .iter()
            .map(|spec| {
                if spec.arg_schema.is_empty() {
                    format!("{} - {}", spec.name, spec.help)
                } else {
                    format!("{} {} - {}", spec.name, spec.arg_schema, spec.help)
                }
            })
            .collect()
    }

    /// Parses one raw console line. Blank lines yield `Ok(None)`; every failure is returned as
    /// a ready-to-print `error: ...` line.
    pub fn parse_line(&self, raw_line: &str) -> Result<Option<C>, String> {
        let trimmed = raw_line.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }

        let tokens =
            tokenize_line(trimmed).map_err(|reason| format!("error: {reason}. usage: help"))?;
        let Some((command_name, args)) = tokens.split_first() else {
            return Ok(None);
        };

        let lower = command_name.to_ascii_lowercase();
        let spec = self
            .lookup_by_lower_name
            .get(&lower)
            .and_then(|index| self.specs.get(*index))
            .ok_or_else(|| format!("error: unknown command '{command_name}'. try: help"))?;

        (spec.parse)(args)
            .map(Some)
            .map_err(|error| format!("error: {}. usage: {}", error.reason, error.usage))
    }
}

/// Splits a console line on whitespace; double quotes group a token and may be empty.
pub fn tokenize_line(line: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut seen_token_content = false;

    for ch in line.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                seen_token_content = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if seen_token_content {
                    tokens.push(std::mem::take(&mut current));
                    seen_token_content = false;
                }
            }
            _ => {
                current.push(ch);
                seen_token_content = true;
            }
        }
    }

    if in_quotes {
        return Err("unterminated quoted string".to_string());
    }
    if seen_token_content {
        tokens.push(current);
    }
    Ok(tokens)
}

pub fn require_no_args(args: &[String], usage: &str) -> Result<(), CommandParseError> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(CommandParseError::new("unexpected extra arguments", usage))
    }
}

pub fn require_arg_count(
    args: &[String],
    expected: usize,
    usage: &str,
) -> Result<(), CommandParseError> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(CommandParseError::new(
            format!("expected {expected} argument(s), got {}", args.len()),
            usage,
        ))
    }
}

/// Parses `args[index]` as `T`, naming the argument and expected type on failure.
pub fn parse_arg<T: FromStr>(
    args: &[String],
    index: usize,
    name: &str,
    type_name: &str,
    usage: &str,
) -> Result<T, CommandParseError> {
    let raw = args.get(index).ok_or_else(|| {
        CommandParseError::new(format!("missing required argument <{name}>"), usage)
    })?;
    raw.parse::<T>().map_err(|_| {
        CommandParseError::new(
            format!("invalid {name} '{raw}' (expected {type_name})"),
            usage,
        )
    })
}

/// Line transport that feeds remote console input into the command registry and carries the
/// printed output back.
pub trait RemoteConsoleLinePump {
    fn poll_lines(&mut self, out: &mut Vec<String>);
    fn send_output_lines(&mut self, lines: &[String]);
    fn status_line(&mut self) -> String;
    /// True once after any remote client disconnected since the last call.
    fn take_disconnect_reset_requested(&mut self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum TestCommand {
        Help,
        Echo(String),
        Teleport { x: i32, y: i32 },
    }

    fn registry() -> ConsoleCommandRegistry<TestCommand> {
        let mut registry = ConsoleCommandRegistry::new();
        registry
            .register("help", "List commands", "", |args| {
                require_no_args(args, "help")?;
                Ok(TestCommand::Help)
            })
            .expect("help");
        registry
            .register("echo", "Print text", "<text...>", |args| {
                if args.is_empty() {
                    return Err(CommandParseError::new(
                        "missing required argument <text...>",
                        "echo <text...>",
                    ));
                }
                Ok(TestCommand::Echo(args.join(" ")))
            })
            .expect("echo");
        registry
            .register("teleport", "Move player", "<x:i32> <y:i32>", |args| {
                let usage = "teleport <x> <y>";
                require_arg_count(args, 2, usage)?;
                Ok(TestCommand::Teleport {
                    x: parse_arg(args, 0, "x", "i32", usage)?,
                    y: parse_arg(args, 1, "y", "i32", usage)?,
                })
            })
            .expect("teleport");
        registry
    }

    #[test]
    fn help_lines_follow_registration_order() {
        assert_eq!(
            registry().help_lines(),
            vec![
                "help - List commands",
                "echo <text...> - Print text",
                "teleport <x:i32> <y:i32> - Move player",
            ]
        );
    }

    #[test]
    fn duplicate_and_empty_names_are_rejected() {
        let mut registry = registry();
        assert_eq!(
            registry.register("HELP", "again", "", |_| Ok(TestCommand::Help)),
            Err(ConsoleRegistryError::Duplicate {
                name: "HELP".to_string()
            })
        );
        assert_eq!(
            registry.register("  ", "blank", "", |_| Ok(TestCommand::Help)),
            Err(ConsoleRegistryError::EmptyName)
        );
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn parse_line_dispatches_case_insensitively() {
        let registry = registry();
        assert_eq!(
            registry.parse_line("TELEPORT 3 -4"),
            Ok(Some(TestCommand::Teleport { x: 3, y: -4 }))
        );
        assert_eq!(registry.parse_line("   "), Ok(None));
    }

    #[test]
    fn unknown_command_reports_clear_error() {
        assert_eq!(
            registry().parse_line("nope"),
            Err("error: unknown command 'nope'. try: help".to_string())
        );
    }

    #[test]
    fn bad_args_report_usage_hint() {
        assert_eq!(
            registry().parse_line("teleport 1 east"),
            Err("error: invalid y 'east' (expected i32). usage: teleport <x> <y>".to_string())
        );
        assert_eq!(
            registry().parse_line("help me"),
            Err("error: unexpected extra arguments. usage: help".to_string())
        );
    }

    #[test]
    fn tokenizer_handles_quotes_and_errors() {
        assert_eq!(
            tokenize_line("echo \"two words\" \"\" end").expect("tokens"),
            vec!["echo", "two words", "", "end"]
        );
        assert!(tokenize_line("echo \"oops").is_err());
        assert_eq!(
            registry().parse_line("echo \"oops"),
            Err("error: unterminated quoted string. usage: help".to_string())
        );
    }
}
