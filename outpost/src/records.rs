//! The SPF, DKIM and DMARC records a sending domain needs, and checking
//! what is actually published.

use std::{fmt, net::IpAddr};

use outpost_common::config::RelayConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Spf,
    Dkim,
    Dmarc,
}

impl RecordKind {
    /// Tag every record of this kind starts with.
    #[must_use]
    pub const fn version_tag(self) -> &'static str {
        match self {
            Self::Spf => "v=spf1",
            Self::Dkim => "v=DKIM1",
            Self::Dmarc => "v=DMARC1",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Spf => "SPF",
            Self::Dkim => "DKIM",
            Self::Dmarc => "DMARC",
        })
    }
}

/// One TXT record to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsRecord {
    pub kind: RecordKind,
    pub name: String,
    pub value: String,
}

impl fmt::Display for DnsRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<6} {} TXT \"{}\"", self.kind, self.name, self.value)
    }
}

/// `v=spf1 ip4:… ip6:… -all`. Entries that are not IP addresses are skipped.
#[must_use]
pub fn spf_record(config: &RelayConfig) -> DnsRecord {
    let mechanisms: String = config
        .ip
        .iter()
        .filter_map(|ip| match ip.trim().parse::<IpAddr>() {
            Ok(IpAddr::V4(v4)) => Some(format!(" ip4:{v4}")),
            Ok(IpAddr::V6(v6)) => Some(format!(" ip6:{v6}")),
            Err(_) => {
                tracing::warn!(ip, "Ignoring configured ip that is not an address");
                None
            }
        })
        .collect();

    DnsRecord {
        kind: RecordKind::Spf,
        name: config.domain.clone(),
        value: format!("v=spf1{mechanisms} -all"),
    }
}

/// `None` until a public key is configured. PEM armour and line breaks are stripped.
#[must_use]
pub fn dkim_record(config: &RelayConfig) -> Option<DnsRecord> {
    let key: String = config
        .dkim
        .public_key
        .lines()
        .filter(|line| !line.starts_with("-----"))
        .flat_map(|line| line.chars().filter(|c| !c.is_whitespace()))
        .collect();

    (!key.is_empty()).then(|| DnsRecord {
        kind: RecordKind::Dkim,
        name: format!("{}._domainkey.{}", config.dkim.selector, config.domain),
        value: format!("v=DKIM1; k=rsa; p={key}"),
    })
}

#[must_use]
pub fn dmarc_record(config: &RelayConfig) -> DnsRecord {
    DnsRecord {
        kind: RecordKind::Dmarc,
        name: format!("_dmarc.{}", config.domain),
        value: String::from("v=DMARC1; p=quarantine; adkim=r; aspf=r"),
    }
}

#[must_use]
pub fn expected_records(config: &RelayConfig) -> Vec<DnsRecord> {
    let mut records = vec![spf_record(config)];
    records.extend(dkim_record(config));
    records.push(dmarc_record(config));
    records
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordStatus {
    Present,
    /// A record of the right kind exists but differs from the expected value.
    Mismatch(String),
    Missing,
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Present => f.write_str("present"),
            Self::Mismatch(found) => write!(f, "differs (found \"{found}\")"),
            Self::Missing => f.write_str("missing"),
        }
    }
}

fn normalise(value: &str) -> String {
    value
        .split(';')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Compares the TXT strings found at the record's name with what should be there.
#[must_use]
pub fn check(expected: &DnsRecord, found: &[String]) -> RecordStatus {
    let tag = expected.kind.version_tag();
    let mut candidates = found
        .iter()
        .filter(|value| value.trim_start().to_ascii_lowercase().starts_with(&tag.to_ascii_lowercase()));

    let wanted = normalise(&expected.value);
    match candidates.clone().find(|value| normalise(value) == wanted) {
        Some(_) => RecordStatus::Present,
        None => candidates
            .next()
            .map_or(RecordStatus::Missing, |value| RecordStatus::Mismatch(value.clone())),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn config() -> RelayConfig {
        RelayConfig::from_ron(
            r#"(
                username: "mailer",
                password: "secret",
                domain: "example.com",
                ip: ["203.0.113.7", "2001:db8::7", "mail.example.com"],
                dkim: (public_key: "-----BEGIN PUBLIC KEY-----\nMIIBIjAN\nBgkqhkiG\n-----END PUBLIC KEY-----\n", selector: "mail"),
            )"#,
        )
        .unwrap()
    }

    #[test]
    fn record_text() {
        let config = config();

        assert_eq!(spf_record(&config).value, "v=spf1 ip4:203.0.113.7 ip6:2001:db8::7 -all");
        assert_eq!(spf_record(&config).name, "example.com");

        let dkim = dkim_record(&config).unwrap();
        assert_eq!(dkim.name, "mail._domainkey.example.com");
        assert_eq!(dkim.value, "v=DKIM1; k=rsa; p=MIIBIjANBgkqhkiG");

        let dmarc = dmarc_record(&config);
        assert_eq!(dmarc.name, "_dmarc.example.com");
        assert!(dmarc.value.starts_with("v=DMARC1; p=quarantine"));
    }

    #[test]
    fn no_public_key_no_dkim_record() {
        let mut config = config();
        config.dkim.public_key.clear();

        assert!(dkim_record(&config).is_none());
        assert_eq!(
            expected_records(&config)
                .iter()
                .map(|record| record.kind)
                .collect::<Vec<_>>(),
            [RecordKind::Spf, RecordKind::Dmarc]
        );
    }

    #[test]
    fn checking_published_values() {
        let spf = spf_record(&config());

        assert_eq!(
            check(
                &spf,
                &[
                    String::from("google-site-verification=abc"),
                    String::from("v=spf1 ip4:203.0.113.7 ip6:2001:db8::7 -all"),
                ]
            ),
            RecordStatus::Present
        );
        assert_eq!(
            check(&spf, &[String::from("v=spf1 include:_spf.example.net ~all")]),
            RecordStatus::Mismatch(String::from("v=spf1 include:_spf.example.net ~all"))
        );
        assert_eq!(check(&spf, &[String::from("unrelated")]), RecordStatus::Missing);

        let dmarc = dmarc_record(&config());
        assert_eq!(
            check(&dmarc, &[String::from("v=DMARC1;p=quarantine;adkim=r;aspf=r;")]),
            RecordStatus::Present
        );
    }
}
