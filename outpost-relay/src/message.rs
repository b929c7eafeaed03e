//! Message parsing and per-domain composition.
//!
//! A submission is parsed once into a [`ParsedMessage`]; every domain
//! delivery then composes its own copy from it, with the envelope taken from
//! the session and never from the headers.

use lettre::{
    Address, Message,
    address::Envelope,
    message::{
        Attachment as AttachmentBody, Mailbox, MultiPart, SinglePart,
        header::{ContentType, HeaderName, HeaderValue},
    },
};
use mailparse::{
    DispositionType, MailAddr, MailHeader, MailHeaderMap, MailParseError, ParsedMail, SingleInfo,
};
use rand::Rng;

use crate::{
    dkim::SigningContext,
    error::{DeliveryError, ParseError},
};

/// Headers rebuilt from the parsed form instead of being passed through.
const REDERIVED_HEADERS: [&str; 9] = [
    "from",
    "to",
    "cc",
    "bcc",
    "subject",
    "message-id",
    "content-type",
    "content-transfer-encoding",
    "mime-version",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedAddress {
    pub name: Option<String>,
    pub address: String,
}

impl NamedAddress {
    fn mailbox(&self) -> Option<Mailbox> {
        let address = self.address.parse::<Address>().ok()?;
        Some(Mailbox::new(self.name.clone(), address))
    }
}

impl From<&SingleInfo> for NamedAddress {
    fn from(info: &SingleInfo) -> Self {
        Self {
            name: info.display_name.clone(),
            address: info.addr.clone(),
        }
    }
}

/// The shapes an address header arrives in, resolved once by [`AddressField::into_addresses`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressField {
    Single(NamedAddress),
    List(Vec<NamedAddress>),
    /// Text the address parser could not make sense of.
    Raw(String),
}

impl AddressField {
    fn from_header(header: &MailHeader<'_>) -> Self {
        match mailparse::addrparse_header(header) {
            Ok(list) => {
                let mut addresses: Vec<NamedAddress> = list
                    .iter()
                    .flat_map(|addr| match addr {
                        MailAddr::Single(info) => vec![NamedAddress::from(info)],
                        MailAddr::Group(group) => group.addrs.iter().map(NamedAddress::from).collect(),
                    })
                    .collect();

                if addresses.len() == 1 {
                    Self::Single(addresses.remove(0))
                } else {
                    Self::List(addresses)
                }
            }
            Err(_) => Self::Raw(header.get_value()),
        }
    }

    /// Normalised, ordered addresses. Raw text is split on commas.
    #[must_use]
    pub fn into_addresses(self) -> Vec<NamedAddress> {
        match self {
            Self::Single(address) => vec![address],
            Self::List(addresses) => addresses,
            Self::Raw(text) => text
                .split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(|part| NamedAddress {
                    name: None,
                    address: part.trim_matches(|c| c == '<' || c == '>').to_string(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Attachment,
    Inline,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: Option<String>,
    pub content: Vec<u8>,
    pub content_type: String,
    pub disposition: Disposition,
    pub content_id: Option<String>,
}

impl Attachment {
    fn to_part(&self) -> Result<SinglePart, DeliveryError> {
        let content_type = ContentType::parse(&self.content_type)
            .or_else(|_| ContentType::parse("application/octet-stream"))
            .map_err(|err| DeliveryError::Message(err.to_string()))?;

        let body = match (&self.disposition, &self.content_id) {
            (Disposition::Inline, Some(content_id)) => AttachmentBody::new_inline(content_id.clone()),
            _ => AttachmentBody::new(
                self.filename
                    .clone()
                    .unwrap_or_else(|| String::from("attachment")),
            ),
        };

        Ok(body.body(self.content.clone(), content_type))
    }
}

/// A passed-through header: original name and unfolded value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub key: String,
    pub value: String,
    /// The value as submitted, folding kept, line endings normalised to CRLF.
    pub raw: String,
}

impl Header {
    fn from_mail_header(header: &MailHeader<'_>) -> Self {
        let raw = String::from_utf8_lossy(header.get_value_raw())
            .split('\n')
            .map(|line| line.trim_end_matches('\r'))
            .collect::<Vec<_>>()
            .join("\r\n")
            .trim_end()
            .to_string();

        Self {
            key: header.get_key(),
            value: header.get_value(),
            raw,
        }
    }

    fn write_raw(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.key.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(self.raw.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
}

/// Whether `raw` opens with a header field (or with the blank line of a
/// header-less message) rather than with body text.
fn starts_with_header(raw: &[u8]) -> bool {
    let line = raw.split(|&byte| byte == b'\n').next().unwrap_or(raw);
    let line = line.strip_suffix(b"\r").unwrap_or(line);

    if line.is_empty() {
        return true;
    }

    line.iter()
        .position(|&byte| byte == b':')
        .is_some_and(|colon| colon > 0 && line[..colon].iter().all(u8::is_ascii_graphic))
}

/// Immutable structured form of one submitted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMessage {
    pub from: Vec<NamedAddress>,
    pub to: Vec<NamedAddress>,
    pub cc: Vec<NamedAddress>,
    pub bcc: Vec<NamedAddress>,
    pub subject: Option<String>,
    pub text: Option<String>,
    pub html: Option<String>,
    pub attachments: Vec<Attachment>,
    pub headers: Vec<Header>,
    message_id: String,
}

/// `<millis.random@domain>`
#[must_use]
pub fn generate_message_id(domain: &str) -> String {
    let random: u64 = rand::rng().random();
    format!(
        "<{}.{random:016x}@{domain}>",
        chrono::Utc::now().timestamp_millis()
    )
}

#[derive(Default)]
struct Bodies {
    text: Option<String>,
    html: Option<String>,
    attachments: Vec<Attachment>,
}

fn collect_parts(part: &ParsedMail<'_>, bodies: &mut Bodies) -> Result<(), mailparse::MailParseError> {
    let mimetype = part.ctype.mimetype.to_ascii_lowercase();

    if mimetype.starts_with("multipart/") {
        for sub in &part.subparts {
            collect_parts(sub, bodies)?;
        }
        return Ok(());
    }

    let disposition = part.get_content_disposition();
    let filename = disposition
        .params
        .get("filename")
        .or_else(|| part.ctype.params.get("name"))
        .cloned();
    let explicit_attachment = disposition.disposition == DispositionType::Attachment;

    if !explicit_attachment && filename.is_none() {
        if mimetype == "text/plain" && bodies.text.is_none() {
            bodies.text = Some(part.get_body()?);
            return Ok(());
        }
        if mimetype == "text/html" && bodies.html.is_none() {
            bodies.html = Some(part.get_body()?);
            return Ok(());
        }
    }

    let content_id = part
        .headers
        .get_first_value("Content-ID")
        .map(|id| id.trim().trim_matches(|c| c == '<' || c == '>').to_string())
        .filter(|id| !id.is_empty());

    bodies.attachments.push(Attachment {
        filename,
        content: part.get_body_raw()?,
        content_type: part.ctype.mimetype.clone(),
        disposition: if disposition.disposition == DispositionType::Inline {
            Disposition::Inline
        } else {
            Disposition::Attachment
        },
        content_id,
    });

    Ok(())
}

fn address_header(parsed: &ParsedMail<'_>, key: &str) -> Vec<NamedAddress> {
    parsed
        .headers
        .iter()
        .filter(|header| header.get_key_ref().eq_ignore_ascii_case(key))
        .flat_map(|header| AddressField::from_header(header).into_addresses())
        .collect()
}

impl ParsedMessage {
    /// Decodes `raw`. A missing Message-ID gets one generated under `domain`.
    pub fn parse(raw: &[u8], domain: &str) -> Result<Self, ParseError> {
        if !starts_with_header(raw) {
            return Err(ParseError::ParseFailed(MailParseError::Generic(
                "Message does not start with a header field",
            )));
        }

        let parsed = mailparse::parse_mail(raw)?;

        let mut bodies = Bodies::default();
        collect_parts(&parsed, &mut bodies)?;

        let message_id = parsed
            .headers
            .get_first_value("Message-ID")
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| generate_message_id(domain));

        let headers = parsed
            .headers
            .iter()
            .filter(|header| {
                let key = header.get_key_ref();
                !REDERIVED_HEADERS
                    .iter()
                    .any(|excluded| key.eq_ignore_ascii_case(excluded))
            })
            .map(Header::from_mail_header)
            .collect();

        Ok(Self {
            from: address_header(&parsed, "From"),
            to: address_header(&parsed, "To"),
            cc: address_header(&parsed, "Cc"),
            bcc: address_header(&parsed, "Bcc"),
            subject: parsed.headers.get_first_value("Subject"),
            text: bodies.text,
            html: bodies.html,
            attachments: bodies.attachments,
            headers,
            message_id,
        })
    }

    /// Never empty.
    #[must_use]
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Renders the message for one domain's envelope, DKIM-signed when a context is given.
    ///
    /// Headers that occur more than once (a `Received` chain, say) are written
    /// verbatim above the rebuilt ones, in submission order. The builder keeps a
    /// single value per name, so only headers that occur once go through it.
    pub fn compose(
        &self,
        envelope_from: &str,
        recipients: &[String],
        signer: Option<&SigningContext>,
    ) -> Result<Vec<u8>, DeliveryError> {
        let sender = parse_address(envelope_from)?;
        let forward: Vec<Address> = recipients
            .iter()
            .map(|recipient| parse_address(recipient))
            .collect::<Result<_, _>>()?;
        let envelope = Envelope::new(Some(sender.clone()), forward)
            .map_err(|err| DeliveryError::Message(err.to_string()))?;

        let mut builder = Message::builder()
            .envelope(envelope)
            .message_id(Some(self.message_id.clone()));

        let mut from: Vec<Mailbox> = self.from.iter().filter_map(NamedAddress::mailbox).collect();
        if from.is_empty() {
            from.push(Mailbox::new(None, sender));
        }
        for mailbox in from {
            builder = builder.from(mailbox);
        }
        for mailbox in self.to.iter().filter_map(NamedAddress::mailbox) {
            builder = builder.to(mailbox);
        }
        for mailbox in self.cc.iter().filter_map(NamedAddress::mailbox) {
            builder = builder.cc(mailbox);
        }
        for mailbox in self.bcc.iter().filter_map(NamedAddress::mailbox) {
            builder = builder.bcc(mailbox);
        }
        if let Some(subject) = &self.subject {
            builder = builder.subject(subject.clone());
        }

        let mut repeated = Vec::new();
        for header in &self.headers {
            if self.occurrences(&header.key) > 1 {
                header.write_raw(&mut repeated);
                continue;
            }

            match HeaderName::new_from_ascii(header.key.clone()) {
                Ok(name) => builder = builder.raw_header(HeaderValue::new(name, header.value.clone())),
                Err(_) => tracing::debug!(header = %header.key, "Dropping header with an invalid name"),
            }
        }

        let content = match (&self.text, &self.html) {
            (Some(text), Some(html)) => {
                Content::Multi(MultiPart::alternative_plain_html(text.clone(), html.clone()))
            }
            (None, Some(html)) => Content::Single(SinglePart::html(html.clone())),
            (Some(text), None) => Content::Single(SinglePart::plain(text.clone())),
            (None, None) => Content::Single(SinglePart::plain(String::new())),
        };

        let built = if self.attachments.is_empty() {
            match content {
                Content::Single(part) => builder.singlepart(part),
                Content::Multi(part) => builder.multipart(part),
            }
        } else {
            let mut mixed = match content {
                Content::Single(part) => MultiPart::mixed().singlepart(part),
                Content::Multi(part) => MultiPart::mixed().multipart(part),
            };
            for attachment in &self.attachments {
                mixed = mixed.singlepart(attachment.to_part()?);
            }
            builder.multipart(mixed)
        };

        let mut message = built.map_err(|err| DeliveryError::Message(err.to_string()))?;

        if let Some(signer) = signer {
            message.sign(signer.config());
        }

        repeated.extend(message.formatted());
        Ok(repeated)
    }

    fn occurrences(&self, key: &str) -> usize {
        self.headers
            .iter()
            .filter(|header| header.key.eq_ignore_ascii_case(key))
            .count()
    }
}

enum Content {
    Single(SinglePart),
    Multi(MultiPart),
}

fn parse_address(address: &str) -> Result<Address, DeliveryError> {
    address
        .parse::<Address>()
        .map_err(|err| DeliveryError::Message(format!("invalid address '{address}': {err}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const SIMPLE: &[u8] = b"From: Alice <alice@example.com>\r\n\
To: bob@foo.com, \"Carol\" <carol@bar.com>\r\n\
Cc: team: dave@foo.com, erin@foo.com;\r\n\
Subject: Quarterly numbers\r\n\
X-Campaign: q3\r\n\
Date: Mon, 19 Oct 2026 10:00:00 +0000\r\n\
\r\n\
Hello there\r\n";

    const MULTIPART: &[u8] = b"From: alice@example.com\r\n\
To: bob@foo.com\r\n\
Message-ID: <fixed@example.com>\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"outer\"\r\n\
\r\n\
--outer\r\n\
Content-Type: multipart/alternative; boundary=\"inner\"\r\n\
\r\n\
--inner\r\n\
Content-Type: text/plain\r\n\
\r\n\
plain body\r\n\
--inner\r\n\
Content-Type: text/html\r\n\
\r\n\
<p>html body</p>\r\n\
--inner--\r\n\
--outer\r\n\
Content-Type: application/pdf; name=\"report.pdf\"\r\n\
Content-Disposition: attachment; filename=\"report.pdf\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
JVBERi0=\r\n\
--outer--\r\n";

    #[test]
    fn parses_simple_message() {
        let message = ParsedMessage::parse(SIMPLE, "example.com").unwrap();

        assert_eq!(
            message.from,
            [NamedAddress {
                name: Some(String::from("Alice")),
                address: String::from("alice@example.com"),
            }]
        );
        assert_eq!(
            message
                .to
                .iter()
                .map(|a| a.address.as_str())
                .collect::<Vec<_>>(),
            ["bob@foo.com", "carol@bar.com"]
        );
        assert_eq!(
            message
                .cc
                .iter()
                .map(|a| a.address.as_str())
                .collect::<Vec<_>>(),
            ["dave@foo.com", "erin@foo.com"]
        );
        assert_eq!(message.subject.as_deref(), Some("Quarterly numbers"));
        assert_eq!(message.text.as_deref().map(str::trim), Some("Hello there"));
        assert_eq!(message.html, None);
        assert_eq!(
            message
                .headers
                .iter()
                .map(|h| h.key.as_str())
                .collect::<Vec<_>>(),
            ["X-Campaign", "Date"]
        );
    }

    #[test]
    fn generates_missing_message_id() {
        let message = ParsedMessage::parse(SIMPLE, "example.com").unwrap();
        let id = message.message_id();

        assert!(id.starts_with('<'));
        assert!(id.ends_with("@example.com>"));
        assert!(id.len() > "<.@example.com>".len());
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(generate_message_id("example.com"), generate_message_id("example.com"));
    }

    #[test]
    fn walks_nested_multiparts() {
        let message = ParsedMessage::parse(MULTIPART, "example.com").unwrap();

        assert_eq!(message.message_id(), "<fixed@example.com>");
        assert_eq!(message.text.as_deref().map(str::trim), Some("plain body"));
        assert_eq!(message.html.as_deref().map(str::trim), Some("<p>html body</p>"));
        assert_eq!(message.attachments.len(), 1);

        let attachment = &message.attachments[0];
        assert_eq!(attachment.filename.as_deref(), Some("report.pdf"));
        assert_eq!(attachment.content_type, "application/pdf");
        assert_eq!(attachment.disposition, Disposition::Attachment);
        assert_eq!(attachment.content, b"%PDF-");

        assert!(message.headers.is_empty());
    }

    #[test]
    fn raw_address_text_is_split() {
        let field = AddressField::Raw(String::from("<a@foo.com>, b@bar.com ,"));

        assert_eq!(
            field
                .into_addresses()
                .into_iter()
                .map(|a| a.address)
                .collect::<Vec<_>>(),
            ["a@foo.com", "b@bar.com"]
        );
    }

    #[test]
    fn composes_with_session_envelope() {
        let message = ParsedMessage::parse(MULTIPART, "example.com").unwrap();
        let rendered = message
            .compose("alice@example.com", &[String::from("bob@foo.com")], None)
            .unwrap();
        let text = String::from_utf8(rendered).unwrap();

        assert!(text.contains("Message-ID: <fixed@example.com>"));
        assert!(text.contains("multipart/mixed"));
        assert!(text.contains("multipart/alternative"));
        assert!(text.contains("report.pdf"));
        assert!(!text.contains("DKIM-Signature"));

        let reparsed = ParsedMessage::parse(text.as_bytes(), "example.com").unwrap();
        assert_eq!(reparsed.text.as_deref().map(str::trim), Some("plain body"));
        assert_eq!(reparsed.attachments[0].content, b"%PDF-");
    }

    #[test]
    fn passthrough_headers_survive_composition() {
        let message = ParsedMessage::parse(SIMPLE, "example.com").unwrap();
        let rendered = message
            .compose("alice@example.com", &[String::from("bob@foo.com")], None)
            .unwrap();
        let reparsed = mailparse::parse_mail(&rendered).unwrap();

        assert_eq!(reparsed.headers.get_first_value("X-Campaign").as_deref(), Some("q3"));
        assert_eq!(
            reparsed.headers.get_first_value("Subject").as_deref(),
            Some("Quarterly numbers")
        );
        assert_eq!(reparsed.headers.get_all_values("Message-ID").len(), 1);
    }

    #[test]
    fn repeated_headers_keep_every_value_in_order() {
        const TRACED: &[u8] = b"Received: from a.example.net\r\n\
\tby b.example.net; Mon, 19 Oct 2026 09:59:00 +0000\r\n\
Received: from c.example.net by d.example.net; Mon, 19 Oct 2026 09:58:00 +0000\r\n\
X-Tag: one\r\n\
From: alice@example.com\r\n\
X-Tag: two\r\n\
X-Campaign: q3\r\n\
Subject: Hops\r\n\
\r\n\
Hello\r\n";

        let message = ParsedMessage::parse(TRACED, "example.com").unwrap();
        let rendered = message
            .compose("alice@example.com", &[String::from("bob@foo.com")], None)
            .unwrap();
        let reparsed = mailparse::parse_mail(&rendered).unwrap();

        assert_eq!(
            reparsed.headers.get_all_values("Received"),
            [
                "from a.example.net by b.example.net; Mon, 19 Oct 2026 09:59:00 +0000",
                "from c.example.net by d.example.net; Mon, 19 Oct 2026 09:58:00 +0000",
            ]
        );
        assert_eq!(reparsed.headers.get_all_values("X-Tag"), ["one", "two"]);
        assert_eq!(reparsed.headers.get_all_values("X-Campaign"), ["q3"]);
        assert_eq!(reparsed.headers.get_first_value("Subject").as_deref(), Some("Hops"));
        assert_eq!(reparsed.get_body().unwrap().trim(), "Hello");
    }

    #[test]
    fn body_without_headers_is_rejected() {
        assert!(matches!(
            ParsedMessage::parse(b"Hello\r\n", "example.com"),
            Err(ParseError::ParseFailed(_))
        ));
        assert!(matches!(
            ParsedMessage::parse(b"just some text: with a colon\r\n", "example.com"),
            Err(ParseError::ParseFailed(_))
        ));

        let headerless = ParsedMessage::parse(b"\r\nHello\r\n", "example.com").unwrap();
        assert_eq!(headerless.text.as_deref().map(str::trim), Some("Hello"));
    }

    #[test]
    fn malformed_recipient_fails_composition() {
        let message = ParsedMessage::parse(SIMPLE, "example.com").unwrap();

        assert!(matches!(
            message.compose("alice@example.com", &[String::from("nodomain")], None),
            Err(DeliveryError::Message(_))
        ));
    }
}
