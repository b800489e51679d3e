//! IRC line codec with IRCv3 message-tag support.
//!
//! Wire form: `[@tags ][:prefix ]COMMAND [params...][ :trailing]`.

use std::collections::HashMap;
use std::fmt;

/// A single parsed IRC line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    /// IRCv3 tags (values unescaped). Valueless tags map to "".
    pub tags: HashMap<String, String>,
    /// Source prefix without the leading ':' (e.g. `nick!user@host`).
    pub prefix: Option<String>,
    pub command: String,
    /// Parameters; the trailing parameter (if any) is the last element.
    pub params: Vec<String>,
}

impl Message {
    /// Parse one line. Trailing CR/LF is ignored. Returns `None` for blank
    /// lines or lines with no command.
    pub fn parse(line: &str) -> Option<Self> {
        let mut rest = line.trim_end_matches(['\r', '\n']);
        if rest.is_empty() {
            return None;
        }

        let mut tags = HashMap::new();
        if let Some(stripped) = rest.strip_prefix('@') {
            let (raw_tags, after) = stripped.split_once(' ')?;
            for tag in raw_tags.split(';').filter(|t| !t.is_empty()) {
                match tag.split_once('=') {
                    Some((k, v)) => tags.insert(k.to_string(), unescape_tag_value(v)),
                    None => tags.insert(tag.to_string(), String::new()),
                };
            }
            rest = after.trim_start_matches(' ');
        }

        let mut prefix = None;
        if let Some(stripped) = rest.strip_prefix(':') {
            let (p, after) = stripped.split_once(' ')?;
            prefix = Some(p.to_string());
            rest = after.trim_start_matches(' ');
        }

        let (head, trailing) = match rest.split_once(" :") {
            Some((h, t)) => (h, Some(t)),
            None => (rest, None),
        };
        let mut words = head.split(' ').filter(|w| !w.is_empty());
        let command = words.next()?.to_ascii_uppercase();
        let mut params: Vec<String> = words.map(str::to_string).collect();
        if let Some(t) = trailing {
            params.push(t.to_string());
        }

        Some(Self { tags, prefix, command, params })
    }

    /// Nick portion of the prefix, if the prefix is a user hostmask.
    pub fn nick(&self) -> Option<&str> {
        self.prefix.as_deref().and_then(|p| p.split('!').next())
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.tags.is_empty() {
            let mut keys: Vec<&String> = self.tags.keys().collect();
            keys.sort();
            f.write_str("@")?;
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    f.write_str(";")?;
                }
                let value = &self.tags[key];
                if value.is_empty() {
                    f.write_str(key)?;
                } else {
                    write!(f, "{key}={}", escape_tag_value(value))?;
                }
            }
            f.write_str(" ")?;
        }
        if let Some(ref prefix) = self.prefix {
            write!(f, ":{prefix} ")?;
        }
        f.write_str(&self.command)?;
        let last = self.params.len().saturating_sub(1);
        for (i, param) in self.params.iter().enumerate() {
            let needs_colon = i == last
                && (param.is_empty() || param.contains(' ') || param.starts_with(':'));
            if needs_colon {
                write!(f, " :{param}")?;
            } else {
                write!(f, " {param}")?;
            }
        }
        Ok(())
    }
}

fn escape_tag_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            ';' => out.push_str("\\:"),
            ' ' => out.push_str("\\s"),
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_tag_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            // A lone trailing backslash is dropped.
            None => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_privmsg_with_tags() {
        let line = concat!(
            "@msgid=01HX;time=2025-01-01T10:00:00.000Z;+draft/reply=01HW ",
            ":alice!a@freeq.at PRIVMSG rollcall :all good here\r\n"
        );
        let msg = Message::parse(line).unwrap();
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.prefix.as_deref(), Some("alice!a@freeq.at"));
        assert_eq!(msg.nick(), Some("alice"));
        assert_eq!(msg.params, vec!["rollcall", "all good here"]);
        assert_eq!(msg.tags["msgid"], "01HX");
        assert_eq!(msg.tags["+draft/reply"], "01HW");
    }

    #[test]
    fn parse_without_prefix_or_trailing() {
        let msg = Message::parse("PING keepalive").unwrap();
        assert_eq!(msg.command, "PING");
        assert!(msg.prefix.is_none());
        assert_eq!(msg.params, vec!["keepalive"]);
    }

    #[test]
    fn parse_numeric_and_empty_trailing() {
        let msg = Message::parse(":irc.freeq.at 001 rollcall :").unwrap();
        assert_eq!(msg.command, "001");
        assert_eq!(msg.params, vec!["rollcall", ""]);
    }

    #[test]
    fn blank_line_is_rejected() {
        assert!(Message::parse("\r\n").is_none());
        assert!(Message::parse(":only-prefix").is_none());
    }

    #[test]
    fn tag_values_are_unescaped() {
        let msg = Message::parse("@+draft/react=\\s👍\\:ok TAGMSG #ops").unwrap();
        assert_eq!(msg.tags["+draft/react"], " 👍;ok");
    }

    #[test]
    fn display_escapes_and_sorts_tags() {
        let mut tags = HashMap::new();
        tags.insert("+draft/reply".to_string(), "abc".to_string());
        tags.insert("+draft/react".to_string(), "a b".to_string());
        let msg = Message {
            tags,
            prefix: None,
            command: "TAGMSG".to_string(),
            params: vec!["bob".to_string()],
        };
        assert_eq!(msg.to_string(), "@+draft/react=a\\sb;+draft/reply=abc TAGMSG bob");
    }

    #[test]
    fn display_adds_colon_for_spaced_trailing() {
        let msg = Message {
            tags: HashMap::new(),
            prefix: None,
            command: "PRIVMSG".to_string(),
            params: vec!["bob".to_string(), "hi there".to_string()],
        };
        assert_eq!(msg.to_string(), "PRIVMSG bob :hi there");
    }
}
