use goalhunt_logic::{Coordinate, prelude::*};

/// A line typed on stdin
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// Move the current position
    Move(Coordinate),
    Status,
    Quit,
    Nothing,
}

pub fn parse_command(line: &str) -> Result<Command> {
    let line = line.trim();
    match line.to_ascii_lowercase().as_str() {
        "" => return Ok(Command::Nothing),
        "q" | "quit" | "exit" => return Ok(Command::Quit),
        "s" | "status" => return Ok(Command::Status),
        _ => {}
    }

    let mut parts = line
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|p| !p.is_empty());

    let (Some(lat), Some(lng), None) = (parts.next(), parts.next(), parts.next()) else {
        anyhow::bail!("Expected \"<lat>,<lng>\", \"status\" or \"quit\"");
    };

    let lat = lat.parse().context("Latitude isn't a number")?;
    let lng = lng.parse().context("Longitude isn't a number")?;
    let position = Coordinate::new(lat, lng).context("Not a position on Earth")?;
    Ok(Command::Move(position))
}
