use super::error::{ClientError, Result};

/// One physical line of a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseLine {
    pub code: u16,
    /// `false` for `250-` continuation lines.
    pub is_last: bool,
    pub message: String,
}

/// A complete, possibly multi-line, SMTP reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Response {
    #[must_use]
    pub const fn new(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    /// The reply text with lines joined by a single space.
    #[must_use]
    pub fn message(&self) -> String {
        self.lines.join(" ")
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code >= 200 && self.code < 300
    }

    #[must_use]
    pub const fn is_intermediate(&self) -> bool {
        self.code >= 300 && self.code < 400
    }

    /// Whether an EHLO reply advertises `keyword` (case-insensitive).
    ///
    /// The first line is the server's greeting and never counts as a capability.
    #[must_use]
    pub fn has_capability(&self, keyword: &str) -> bool {
        self.lines.iter().skip(1).any(|line| {
            line.split_whitespace()
                .next()
                .is_some_and(|word| word.eq_ignore_ascii_case(keyword))
        })
    }

    /// Parses a single reply line without its line terminator.
    pub fn parse_line(line: &str) -> Result<ResponseLine> {
        let code = line
            .get(..3)
            .filter(|code| code.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|code| code.parse::<u16>().ok())
            .ok_or_else(|| ClientError::Parse(format!("Invalid status code in '{line}'")))?;

        let is_last = match line.as_bytes().get(3) {
            None | Some(b' ') => true,
            Some(b'-') => false,
            Some(other) => {
                return Err(ClientError::Parse(format!(
                    "Invalid separator character: '{}'",
                    char::from(*other)
                )));
            }
        };

        Ok(ResponseLine {
            code,
            is_last,
            message: line.get(4..).unwrap_or_default().to_string(),
        })
    }

    /// Parses the first complete reply in `buffer`.
    ///
    /// Returns `None` while more bytes are needed, otherwise the reply and the
    /// number of bytes it occupied.
    pub fn parse_response(buffer: &[u8]) -> Result<Option<(Self, usize)>> {
        let mut consumed = 0;
        let mut code = None;
        let mut lines = Vec::new();

        while let Some(end) = buffer[consumed..].iter().position(|&b| b == b'\n') {
            let raw = std::str::from_utf8(&buffer[consumed..consumed + end])?;
            consumed += end + 1;

            let raw = raw.strip_suffix('\r').unwrap_or(raw);
            if raw.is_empty() {
                continue;
            }

            let line = Self::parse_line(raw)?;

            match code {
                Some(expected) if expected != line.code => {
                    return Err(ClientError::Parse(format!(
                        "Status code mismatch in multi-line response: expected {expected}, got {}",
                        line.code
                    )));
                }
                Some(_) => {}
                None => code = Some(line.code),
            }

            lines.push(line.message);

            if line.is_last {
                return Ok(code.map(|code| (Self::new(code, lines), consumed)));
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn single_and_continuation_lines() {
        assert_eq!(
            Response::parse_line("220 mx.example.net ESMTP").unwrap(),
            ResponseLine {
                code: 220,
                is_last: true,
                message: String::from("mx.example.net ESMTP"),
            }
        );
        assert!(!Response::parse_line("250-mx.example.net").unwrap().is_last);
        assert!(Response::parse_line("250").unwrap().is_last);
        assert!(Response::parse_line("25").is_err());
        assert!(Response::parse_line("250+x").is_err());
    }

    #[test]
    fn multi_line_reply_and_capabilities() {
        let data = b"250-mx.example.net\r\n250-SIZE 10000000\r\n250 STARTTLS\r\nleftover";
        let (response, consumed) = Response::parse_response(data).unwrap().unwrap();

        assert_eq!(response.code, 250);
        assert_eq!(consumed, data.len() - "leftover".len());
        assert!(response.has_capability("starttls"));
        assert!(response.has_capability("SIZE"));
        assert!(!response.has_capability("mx.example.net"));
        assert_eq!(response.message(), "mx.example.net SIZE 10000000 STARTTLS");
    }

    #[test]
    fn incomplete_and_mismatched_replies() {
        assert!(
            Response::parse_response(b"250-mx.example.net\r\n250-SIZE")
                .unwrap()
                .is_none()
        );
        assert!(Response::parse_response(b"250-one\r\n251 two\r\n").is_err());
    }

    #[test]
    fn classification() {
        assert!(Response::new(250, vec![]).is_success());
        assert!(Response::new(354, vec![]).is_intermediate());
        assert!(!Response::new(451, vec![]).is_success());
        assert!(!Response::new(550, vec![]).is_intermediate());
    }
}
