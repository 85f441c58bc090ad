//! Chat command recognition.

/// Commands the dispatcher acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// `/sticker` or `/s`: convert attached or quoted media to a sticker.
    Sticker,
    /// `/toimg`: convert a sticker or image to PNG.
    ToImage,
    /// `/stats`: report dispatcher counters.
    Stats,
    /// `/tagall`: mention every member of a group.
    TagAll,
    /// `/help` or `/hi`: list the commands.
    Help,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sticker => "sticker",
            Self::ToImage => "toimg",
            Self::Stats => "stats",
            Self::TagAll => "tagall",
            Self::Help => "help",
        }
    }
}

/// Parse the first word of a message. Anything else is not a command.
pub fn parse_command(text: &str) -> Option<Command> {
    let word = text.split_whitespace().next()?;
    let name = word.strip_prefix('/')?;
    match name.to_ascii_lowercase().as_str() {
        "sticker" | "s" => Some(Command::Sticker),
        "toimg" => Some(Command::ToImage),
        "stats" => Some(Command::Stats),
        "tagall" => Some(Command::TagAll),
        "help" | "hi" => Some(Command::Help),
        _ => None,
    }
}
