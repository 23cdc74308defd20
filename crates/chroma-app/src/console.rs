//! Line-based command console.

use std::fmt::Write as _;
use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use chroma_core::{Millis, RepeatMode};
use chroma_playback::{AudioEngine, SessionSnapshot};

pub const HELP: &str = "\
commands:
  play | pause | toggle | stop
  next | prev
  seek <secs|m:ss>
  jump <n> | remove <n> | move <from> <to>
  shuffle | repeat [off|all|one]
  status | help | quit";

/// A parsed console line. Queue positions are 1-based as typed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    Play,
    Pause,
    Toggle,
    Stop,
    Next,
    Previous,
    Seek(Millis),
    Jump(usize),
    Remove(usize),
    Move { from: usize, to: usize },
    Shuffle,
    Repeat(Option<RepeatMode>),
    Status,
    Help,
    Quit,
}

impl ConsoleCommand {
    /// Parse one line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(None);
        };
        let args: Vec<&str> = words.collect();

        let command = match (verb.to_ascii_lowercase().as_str(), args.as_slice()) {
            ("play" | "p", []) => Self::Play,
            ("pause", []) => Self::Pause,
            ("toggle" | "t", []) => Self::Toggle,
            ("stop", []) => Self::Stop,
            ("next" | "n", []) => Self::Next,
            ("prev" | "previous", []) => Self::Previous,
            ("seek", [position]) => Self::Seek(parse_position(position)?),
            ("jump", [n]) => Self::Jump(parse_index(n)?),
            ("remove" | "rm", [n]) => Self::Remove(parse_index(n)?),
            ("move" | "mv", [from, to]) => Self::Move {
                from: parse_index(from)?,
                to: parse_index(to)?,
            },
            ("shuffle", []) => Self::Shuffle,
            ("repeat", []) => Self::Repeat(None),
            ("repeat", [mode]) => Self::Repeat(Some(parse_repeat(mode)?)),
            ("status" | "s", []) => Self::Status,
            ("help" | "?", []) => Self::Help,
            ("quit" | "q" | "exit", []) => Self::Quit,
            (other, _) => bail!("Unknown command or arguments: {other} (try `help`)"),
        };
        Ok(Some(command))
    }
}

impl FromStr for ConsoleCommand {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)?.ok_or_else(|| anyhow!("empty command"))
    }
}

/// Parse `90`, `90.5` or `1:30` as a position.
fn parse_position(text: &str) -> Result<Millis> {
    if let Some((minutes, seconds)) = text.split_once(':') {
        let minutes: u64 = minutes.parse().with_context(|| format!("bad minutes in {text}"))?;
        let seconds: f64 = seconds.parse().with_context(|| format!("bad seconds in {text}"))?;
        if !(0.0..60.0).contains(&seconds) {
            bail!("seconds out of range in {text}");
        }
        return Ok(Millis::from_secs(minutes * 60)
            .saturating_add(Millis::from_secs_f64(seconds)));
    }
    let seconds: f64 = text.parse().with_context(|| format!("bad position: {text}"))?;
    if seconds < 0.0 || !seconds.is_finite() {
        bail!("position must be a non-negative number of seconds");
    }
    Ok(Millis::from_secs_f64(seconds))
}

/// Parse a 1-based queue position into a 0-based index.
fn parse_index(text: &str) -> Result<usize> {
    let n: usize = text.parse().with_context(|| format!("bad queue position: {text}"))?;
    n.checked_sub(1).ok_or_else(|| anyhow!("queue positions start at 1"))
}

fn parse_repeat(text: &str) -> Result<RepeatMode> {
    match text.to_ascii_lowercase().as_str() {
        "off" | "none" => Ok(RepeatMode::Off),
        "all" => Ok(RepeatMode::All),
        "one" | "single" => Ok(RepeatMode::One),
        other => bail!("unknown repeat mode: {other}"),
    }
}

/// What the console loop should do after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Forward a command to the engine. Returns text to print, if any.
pub fn execute(engine: &AudioEngine, command: ConsoleCommand) -> Result<(Flow, Option<String>)> {
    let handle = engine.handle();
    match command {
        ConsoleCommand::Play => handle.play()?,
        ConsoleCommand::Pause => handle.pause()?,
        ConsoleCommand::Toggle => handle.toggle()?,
        ConsoleCommand::Stop => handle.stop()?,
        ConsoleCommand::Next => handle.next()?,
        ConsoleCommand::Previous => handle.previous()?,
        ConsoleCommand::Seek(position) => handle.seek(position)?,
        ConsoleCommand::Jump(index) => handle.move_to(index)?,
        ConsoleCommand::Remove(index) => handle.remove_at(index)?,
        ConsoleCommand::Move { from, to } => handle.reorder(from, to)?,
        ConsoleCommand::Shuffle => handle.toggle_shuffle()?,
        ConsoleCommand::Repeat(None) => handle.cycle_repeat()?,
        ConsoleCommand::Repeat(Some(mode)) => handle.set_repeat_mode(mode)?,
        ConsoleCommand::Status => return Ok((Flow::Continue, Some(status(&engine.snapshot())))),
        ConsoleCommand::Help => return Ok((Flow::Continue, Some(HELP.to_string()))),
        ConsoleCommand::Quit => return Ok((Flow::Quit, None)),
    }
    Ok((Flow::Continue, None))
}

/// Multi-line status report.
pub fn status(snapshot: &SessionSnapshot) -> String {
    let mut out = snapshot.to_string();
    let _ = write!(
        out,
        "\n  shuffle: {}  repeat: {:?}  focus: {:?}",
        if snapshot.shuffle { "on" } else { "off" },
        snapshot.repeat_mode,
        snapshot.focus,
    );
    let actions = snapshot.actions();
    let enabled: Vec<&str> = [
        (actions.play, "play"),
        (actions.pause, "pause"),
        (actions.next, "next"),
        (actions.previous, "prev"),
        (actions.seek, "seek"),
    ]
    .into_iter()
    .filter_map(|(on, name)| on.then_some(name))
    .collect();
    let _ = write!(out, "\n  available: {}", enabled.join(" "));
    out
}
