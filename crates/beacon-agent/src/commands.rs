//! REPL input parsing.

/// One line of user input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Blank line.
    Empty,
    /// A chat message.
    Message(String),
    /// `/connect`
    Connect,
    /// `/disconnect`
    Disconnect,
    /// `/clear`
    Clear,
    /// `/status`
    Status,
    /// `/model` lists, `/model <name>` switches.
    Model(Option<String>),
    /// `/help`
    Help,
    /// `/quit` or `/exit`
    Quit,
    /// Any other slash command.
    Unknown(String),
}

/// Help text for `/help`.
pub const HELP: &str = "\
Commands:
  /connect          open the result channel
  /disconnect       close it (outstanding searches fail)
  /clear            start a new conversation
  /status           connection, model and pending searches
  /model [name]     list models or switch to one
  /quit             exit
Anything else is sent as a message.";

impl Command {
    /// Parse one input line.
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Empty;
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Self::Message(line.to_string());
        };

        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, Some(arg.trim()).filter(|a| !a.is_empty())),
            None => (rest, None),
        };
        match name.to_ascii_lowercase().as_str() {
            "connect" => Self::Connect,
            "disconnect" => Self::Disconnect,
            "clear" => Self::Clear,
            "status" => Self::Status,
            "model" => Self::Model(arg.map(str::to_string)),
            "help" | "?" => Self::Help,
            "quit" | "exit" => Self::Quit,
            _ => Self::Unknown(name.to_string()),
        }
    }
}
