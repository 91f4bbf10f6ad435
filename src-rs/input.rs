use std::io::BufRead;
use std::str::FromStr;
use std::sync::mpsc::Sender;

use anyhow::{bail, Result};
use tracing::{debug, warn};

use crate::controller::Controller;
use crate::geometry::Point;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Advance,
    Reset,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    Click { x: i32, y: i32, button: MouseButton },
    Key(Key),
}

impl FromStr for InputEvent {
    type Err = anyhow::Error;

    /// `n`/`next`, `r`/`reset`, `q`/`quit`/`exit`, or `click X Y [button]`.
    fn from_str(line: &str) -> Result<Self> {
        let lower = line.trim().to_ascii_lowercase();
        let mut parts = lower.split_whitespace();
        let Some(head) = parts.next() else {
            bail!("empty command");
        };
        let event = match head {
            "n" | "next" => InputEvent::Key(Key::Advance),
            "r" | "reset" => InputEvent::Key(Key::Reset),
            "q" | "quit" | "exit" => InputEvent::Key(Key::Exit),
            "click" | "c" => {
                let (Some(x), Some(y)) = (parts.next(), parts.next()) else {
                    bail!("click needs X and Y: {line}");
                };
                let button = match parts.next() {
                    None | Some("left") => MouseButton::Left,
                    Some("right") => MouseButton::Right,
                    Some("middle") => MouseButton::Middle,
                    Some(other) => bail!("unknown button: {other}"),
                };
                InputEvent::Click {
                    x: x.parse()?,
                    y: y.parse()?,
                    button,
                }
            }
            other => bail!("unknown command: {other}"),
        };
        if let Some(extra) = parts.next() {
            bail!("unexpected trailing input: {extra}");
        }
        Ok(event)
    }
}

/// Parses one event per line, skipping blanks and `#` comments, and forwards
/// them until the reader ends or the receiver hangs up.
pub fn pump_events(reader: impl BufRead, tx: Sender<InputEvent>) {
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                warn!("input read failed: {err}");
                break;
            }
        };
        let content = line.split('#').next().unwrap_or_default().trim();
        if content.is_empty() {
            continue;
        }
        match content.parse::<InputEvent>() {
            Ok(event) => {
                if tx.send(event).is_err() {
                    break;
                }
            }
            Err(err) => warn!("skipping input line {content:?}: {err}"),
        }
    }
}

/// Applies one event to the controller.
pub fn route(controller: &mut Controller, event: InputEvent) -> Result<()> {
    match event {
        InputEvent::Click {
            x,
            y,
            button: MouseButton::Left,
        } => controller.click(Point::new(x, y)),
        InputEvent::Click { button, .. } => {
            debug!("ignoring {button:?} click");
            Ok(())
        }
        InputEvent::Key(Key::Advance) => {
            controller.request_advance();
            Ok(())
        }
        InputEvent::Key(Key::Reset) => controller.reset(),
        InputEvent::Key(Key::Exit) => {
            controller.close();
            Ok(())
        }
    }
}
