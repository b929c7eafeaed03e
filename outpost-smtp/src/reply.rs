use core::fmt::{self, Display, Formatter};

use outpost_common::status::Status;

/// A reply sent to the submitting client: one status code, one or more lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: Status,
    lines: Vec<String>,
}

impl Reply {
    /// Builds a reply from free text. Embedded line breaks become continuation lines.
    #[must_use]
    pub fn new(status: Status, text: impl AsRef<str>) -> Self {
        let lines = text
            .as_ref()
            .lines()
            .map(|line| line.trim_end_matches('\r').to_string())
            .collect::<Vec<_>>();

        Self::multiline(status, lines)
    }

    #[must_use]
    pub fn multiline(status: Status, lines: Vec<String>) -> Self {
        let lines = if lines.is_empty() {
            vec![String::new()]
        } else {
            lines
        };

        Self { status, lines }
    }

    #[must_use]
    pub fn ok(text: impl AsRef<str>) -> Self {
        Self::new(Status::Ok, text)
    }

    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    #[must_use]
    pub fn is_positive(&self) -> bool {
        self.status.is_positive()
    }
}

impl Display for Reply {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let last = self.lines.len().saturating_sub(1);

        for (index, line) in self.lines.iter().enumerate() {
            let separator = if index == last { ' ' } else { '-' };
            write!(f, "{}{separator}{line}\r\n", self.status)?;
        }

        Ok(())
    }
}
