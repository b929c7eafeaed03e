use core::fmt::{self, Display, Formatter};

use ahash::AHashMap;

/// ESMTP parameters trailing a MAIL FROM path (RFC 5321 Section 3.3).
///
/// Keys are upper-cased on insert so lookups are case-insensitive.
#[derive(PartialEq, Eq, Debug, Clone, Default)]
pub struct MailParameters {
    params: AHashMap<String, Option<String>>,
}

impl MailParameters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `KEY=VALUE` and bare `FLAG` tokens.
    ///
    /// # Errors
    ///
    /// Duplicate keys and a missing, zero or non-numeric `SIZE` are rejected.
    pub fn from_params_str(params: &str) -> Result<Self, String> {
        let mut parsed = Self::new();

        for token in params.split_whitespace() {
            let (key, value) = token
                .split_once('=')
                .map_or((token, None), |(key, value)| (key, Some(value)));
            let key = key.to_ascii_uppercase();

            if parsed.params.contains_key(&key) {
                return Err(format!("Duplicate parameter '{key}' not allowed"));
            }

            if key == "SIZE" {
                match value.map(str::parse::<usize>) {
                    Some(Ok(0)) => return Err(String::from("SIZE=0 is not allowed")),
                    Some(Ok(_)) => {}
                    _ => return Err(format!("Invalid SIZE value: {}", value.unwrap_or_default())),
                }
            }

            parsed.params.insert(key, value.map(String::from));
        }

        Ok(parsed)
    }

    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.params
            .insert(key.to_ascii_uppercase(), Some(value.into()));
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(&key.to_ascii_uppercase())?.as_deref()
    }

    /// The declared message size, if the client sent one.
    #[must_use]
    pub fn size(&self) -> Option<usize> {
        self.get("SIZE")?.parse().ok()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

#[derive(PartialEq, Eq, Debug, Clone)]
pub enum HeloVariant {
    Ehlo(String),
    Helo(String),
}

impl Display for HeloVariant {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ehlo(id) => write!(f, "EHLO {id}"),
            Self::Helo(id) => write!(f, "HELO {id}"),
        }
    }
}

/// SASL mechanisms understood by the submission surface (RFC 4954).
#[derive(PartialEq, Eq, Debug, Clone)]
pub enum AuthMechanism {
    Plain,
    Login,
    Unsupported(String),
}

impl From<&str> for AuthMechanism {
    fn from(value: &str) -> Self {
        if value.eq_ignore_ascii_case("PLAIN") {
            Self::Plain
        } else if value.eq_ignore_ascii_case("LOGIN") {
            Self::Login
        } else {
            Self::Unsupported(value.to_ascii_uppercase())
        }
    }
}

#[derive(PartialEq, Eq, Debug, Clone)]
pub enum Command {
    Helo(HeloVariant),
    Auth {
        mechanism: AuthMechanism,
        initial: Option<String>,
    },
    /// An empty address is the null reverse-path `<>`.
    MailFrom(String, MailParameters),
    RcptTo(String),
    Data,
    Rset,
    Noop,
    Help,
    Quit,
    StartTls,
    Invalid(String),
}

impl Display for Command {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Helo(variant) => variant.fmt(fmt),
            // Never echo credentials into the logs.
            Self::Auth { mechanism, .. } => write!(fmt, "AUTH {mechanism:?}"),
            Self::MailFrom(from, _) => write!(fmt, "MAIL FROM:<{from}>"),
            Self::RcptTo(to) => write!(fmt, "RCPT TO:<{to}>"),
            Self::Data => fmt.write_str("DATA"),
            Self::Rset => fmt.write_str("RSET"),
            Self::Noop => fmt.write_str("NOOP"),
            Self::Help => fmt.write_str("HELP"),
            Self::Quit => fmt.write_str("QUIT"),
            Self::StartTls => fmt.write_str("STARTTLS"),
            Self::Invalid(s) => fmt.write_str(s),
        }
    }
}

/// Splits `<path> params` into the bare path and the remainder.
///
/// Angle brackets are optional; whatever sits between them is taken verbatim,
/// so `<nodomain>` yields `nodomain`.
fn split_path(rest: &str) -> (&str, &str) {
    let rest = rest.trim();

    if let Some(stripped) = rest.strip_prefix('<') {
        stripped
            .split_once('>')
            .map_or((stripped, ""), |(path, params)| (path.trim(), params.trim()))
    } else {
        rest.split_once(char::is_whitespace)
            .map_or((rest, ""), |(path, params)| (path, params.trim()))
    }
}

fn strip_verb<'a>(line: &'a str, verb: &str) -> Option<&'a str> {
    line.get(..verb.len())
        .filter(|prefix| prefix.eq_ignore_ascii_case(verb))
        .map(|_| &line[verb.len()..])
}

impl TryFrom<&str> for Command {
    type Error = Self;

    fn try_from(command: &str) -> Result<Self, Self::Error> {
        let trimmed = command.trim();

        if let Some(rest) = strip_verb(trimmed, "MAIL FROM:") {
            let (path, params) = split_path(rest);
            if rest.trim().is_empty() {
                return Err(Self::Invalid(String::from("Expected reverse-path")));
            }

            let params = if params.is_empty() {
                MailParameters::new()
            } else {
                MailParameters::from_params_str(params).map_err(Self::Invalid)?
            };

            return Ok(Self::MailFrom(path.to_string(), params));
        }

        if let Some(rest) = strip_verb(trimmed, "RCPT TO:") {
            let (path, _) = split_path(rest);
            if path.is_empty() {
                return Err(Self::Invalid(String::from("Expected forward-path")));
            }

            return Ok(Self::RcptTo(path.to_string()));
        }

        let (verb, argument) = trimmed
            .split_once(char::is_whitespace)
            .map_or((trimmed, ""), |(verb, arg)| (verb, arg.trim()));

        match verb.to_ascii_uppercase().as_str() {
            "EHLO" | "HELO" if argument.is_empty() => {
                Err(Self::Invalid(format!("Expected hostname in {trimmed}")))
            }
            "EHLO" => Ok(Self::Helo(HeloVariant::Ehlo(argument.to_string()))),
            "HELO" => Ok(Self::Helo(HeloVariant::Helo(argument.to_string()))),
            "AUTH" => {
                let mut parts = argument.split_whitespace();
                let Some(mechanism) = parts.next() else {
                    return Err(Self::Invalid(String::from("Expected SASL mechanism")));
                };

                Ok(Self::Auth {
                    mechanism: AuthMechanism::from(mechanism),
                    initial: parts.next().map(String::from),
                })
            }
            "DATA" if argument.is_empty() => Ok(Self::Data),
            "RSET" if argument.is_empty() => Ok(Self::Rset),
            "QUIT" if argument.is_empty() => Ok(Self::Quit),
            "STARTTLS" if argument.is_empty() => Ok(Self::StartTls),
            "NOOP" => Ok(Self::Noop),
            "HELP" => Ok(Self::Help),
            _ => Err(Self::Invalid(command.trim_end().to_owned())),
        }
    }
}

impl TryFrom<&[u8]> for Command {
    type Error = Self;

    fn try_from(command: &[u8]) -> Result<Self, Self::Error> {
        std::str::from_utf8(command).map_or_else(
            |_| Err(Self::Invalid("Unable to interpret command".to_string())),
            Self::try_from,
        )
    }
}
