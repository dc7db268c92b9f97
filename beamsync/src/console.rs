//! Line commands read from stdin during `beamsync run`.

use anyhow::{Context, bail};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// JSON merge patch applied to the configuration
    Patch(Value),
    Switch(String),
    Reset,
    ResetAll,
    Save,
    Mix(Value),
    Cancel,
    /// Clear the surfaced error
    Dismiss,
    Status,
    Quit,
}

pub const HELP: &str = "\
{...}          apply a JSON merge patch to the configuration
:switch ID     load another scenario
:reset         reset the current scenario
:reset-all     reset every scenario
:save          save now
:mix {...}     start a mixing job with the given parameters
:cancel        cancel the running mixing job
:dismiss       clear the current error
:status        print the session state
:quit          save what is unsaved and exit";

/// Parse one input line. Blank lines yield `None`.
pub fn parse_command(line: &str) -> anyhow::Result<Option<Command>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    if line.starts_with('{') {
        let patch: Value = serde_json::from_str(line).context("Invalid JSON patch")?;
        return Ok(Some(Command::Patch(patch)));
    }

    let Some(command) = line.strip_prefix(':') else {
        bail!("Expected a JSON object or a :command, got '{}'", line);
    };
    let (name, argument) = match command.split_once(char::is_whitespace) {
        Some((name, argument)) => (name, argument.trim()),
        None => (command, ""),
    };

    let parsed = match (name, argument) {
        ("switch", "") => bail!(":switch needs a scenario id"),
        ("switch", id) => Command::Switch(id.to_string()),
        ("reset", _) => Command::Reset,
        ("reset-all", _) => Command::ResetAll,
        ("save", _) => Command::Save,
        ("mix", "") => Command::Mix(Value::Object(Default::default())),
        ("mix", params) => {
            Command::Mix(serde_json::from_str(params).context("Invalid JSON mixing parameters")?)
        }
        ("cancel", _) => Command::Cancel,
        ("dismiss", _) => Command::Dismiss,
        ("status", _) => Command::Status,
        ("quit" | "q" | "exit", _) => Command::Quit,
        (unknown, _) => bail!("Unknown command ':{}'\n{}", unknown, HELP),
    };
    Ok(Some(parsed))
}
