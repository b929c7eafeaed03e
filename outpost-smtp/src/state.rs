//! Command sequencing for the submission surface.
//!
//! Only ordering lives here: whether a command may be issued at this point of
//! the conversation, and where it leads when the handler accepts it. Policy
//! (credentials, sender domain) is decided by the transaction handler.

use crate::command::Command;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Greeting sent, waiting for EHLO/HELO.
    #[default]
    Connect,
    /// EHLO/HELO accepted, no mail transaction open.
    Greeted,
    /// MAIL FROM accepted, waiting for the first RCPT TO.
    MailFrom,
    /// At least one RCPT TO accepted.
    RcptTo,
    /// QUIT received or the connection is being torn down.
    Closed,
}

/// Why a command cannot be issued in the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sequence {
    Allowed,
    /// The command is valid SMTP but arrived out of order (503).
    OutOfOrder(&'static str),
}

impl State {
    /// Checks whether `command` may be issued now.
    #[must_use]
    pub const fn permits(self, command: &Command) -> Sequence {
        match (self, command) {
            (Self::Closed, _) => Sequence::OutOfOrder("Connection closing"),
            (
                _,
                Command::Helo(_)
                | Command::Rset
                | Command::Noop
                | Command::Help
                | Command::Quit
                | Command::StartTls
                | Command::Invalid(_),
            ) => Sequence::Allowed,
            (Self::Connect, _) => Sequence::OutOfOrder("Send EHLO/HELO first"),
            (Self::Greeted, Command::Auth { .. } | Command::MailFrom(..)) => Sequence::Allowed,
            (Self::MailFrom | Self::RcptTo, Command::Auth { .. }) => {
                Sequence::OutOfOrder("AUTH not permitted during a mail transaction")
            }
            (Self::MailFrom | Self::RcptTo, Command::MailFrom(..)) => {
                Sequence::OutOfOrder("Sender already specified")
            }
            (Self::MailFrom | Self::RcptTo, Command::RcptTo(_)) | (Self::RcptTo, Command::Data) => {
                Sequence::Allowed
            }
            (Self::Greeted, Command::RcptTo(_)) => Sequence::OutOfOrder("Need MAIL command"),
            (Self::Greeted | Self::MailFrom, Command::Data) => {
                Sequence::OutOfOrder("Need RCPT command")
            }
        }
    }

    /// The state reached once the handler has accepted `command`.
    #[must_use]
    pub const fn after(self, command: &Command) -> Self {
        match command {
            Command::Helo(_) => Self::Greeted,
            Command::Rset | Command::Data => match self {
                Self::Connect => Self::Connect,
                _ => Self::Greeted,
            },
            Command::MailFrom(..) => Self::MailFrom,
            Command::RcptTo(_) => Self::RcptTo,
            Command::Quit => Self::Closed,
            Command::Auth { .. }
            | Command::Noop
            | Command::Help
            | Command::StartTls
            | Command::Invalid(_) => self,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::command::{AuthMechanism, HeloVariant, MailParameters};

    fn mail() -> Command {
        Command::MailFrom(String::from("a@example.com"), MailParameters::new())
    }

    fn rcpt() -> Command {
        Command::RcptTo(String::from("x@foo.com"))
    }

    #[test]
    fn happy_path() {
        let mut state = State::default();

        for command in [
            Command::Helo(HeloVariant::Ehlo(String::from("client"))),
            Command::Auth {
                mechanism: AuthMechanism::Plain,
                initial: None,
            },
            mail(),
            rcpt(),
            rcpt(),
            Command::Data,
            Command::Quit,
        ] {
            assert_eq!(state.permits(&command), Sequence::Allowed, "{command}");
            state = state.after(&command);
        }

        assert_eq!(state, State::Closed);
    }

    #[test]
    fn out_of_order_commands() {
        assert!(matches!(State::Connect.permits(&mail()), Sequence::OutOfOrder(_)));
        assert!(matches!(State::Greeted.permits(&rcpt()), Sequence::OutOfOrder(_)));
        assert!(matches!(
            State::MailFrom.permits(&Command::Data),
            Sequence::OutOfOrder("Need RCPT command")
        ));
        assert!(matches!(State::RcptTo.permits(&mail()), Sequence::OutOfOrder(_)));
        assert!(matches!(
            State::Closed.permits(&Command::Noop),
            Sequence::OutOfOrder(_)
        ));
    }

    #[test]
    fn rset_and_data_close_the_transaction() {
        assert_eq!(State::RcptTo.after(&Command::Rset), State::Greeted);
        assert_eq!(State::RcptTo.after(&Command::Data), State::Greeted);
        assert_eq!(State::Connect.after(&Command::Rset), State::Connect);
    }
}
