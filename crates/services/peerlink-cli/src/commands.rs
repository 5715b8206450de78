//! Interactive stdin commands

/// One line typed by the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/call <name>`: call a peer
    Call(String),
    /// `/answer`: prepare a connection and wait for an offer
    Answer,
    /// `/hangup`
    HangUp,
    /// `/register <name>`
    Register(String),
    /// `/to <name>`: recipient for relay chat
    To(String),
    /// `/log`: print the chat log
    Log,
    /// `/quit`
    Quit,
    /// Anything else is chat text
    Say(String),
}

impl Command {
    /// Parse one trimmed input line; blank lines and bad commands give `Err`
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        if line.is_empty() {
            return Err("empty line".to_string());
        }

        let Some(rest) = line.strip_prefix('/') else {
            return Ok(Command::Say(line.to_string()));
        };

        let (verb, arg) = match rest.split_once(char::is_whitespace) {
            Some((verb, arg)) => (verb, arg.trim()),
            None => (rest, ""),
        };

        let required = |usage: &str| {
            if arg.is_empty() {
                Err(format!("usage: {}", usage))
            } else {
                Ok(arg.to_string())
            }
        };

        match verb {
            "call" => required("/call <name>").map(Command::Call),
            "answer" => Ok(Command::Answer),
            "hangup" => Ok(Command::HangUp),
            "register" => required("/register <name>").map(Command::Register),
            "to" => required("/to <name>").map(Command::To),
            "log" => Ok(Command::Log),
            "quit" | "exit" => Ok(Command::Quit),
            other => Err(format!("unknown command /{}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_chat() {
        assert_eq!(
            Command::parse("  hello there "),
            Ok(Command::Say("hello there".to_string()))
        );
    }

    #[test]
    fn test_commands_with_arguments() {
        assert_eq!(Command::parse("/call bob"), Ok(Command::Call("bob".to_string())));
        assert_eq!(Command::parse("/to  carol "), Ok(Command::To("carol".to_string())));
        assert_eq!(
            Command::parse("/register alice"),
            Ok(Command::Register("alice".to_string()))
        );
        assert!(Command::parse("/call").is_err());
    }

    #[test]
    fn test_bare_commands() {
        assert_eq!(Command::parse("/hangup"), Ok(Command::HangUp));
        assert_eq!(Command::parse("/answer"), Ok(Command::Answer));
        assert_eq!(Command::parse("/log"), Ok(Command::Log));
        assert_eq!(Command::parse("/quit"), Ok(Command::Quit));
        assert!(Command::parse("/dance").is_err());
        assert!(Command::parse("   ").is_err());
    }
}
