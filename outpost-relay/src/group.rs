use ahash::AHashMap;

use crate::address::grouping_key;

/// Recipients of one message partitioned by lower-cased destination domain.
///
/// Domains keep first-seen order and recipients keep input order. Duplicates
/// are preserved, so a repeated recipient is delivered to twice.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecipientGroups {
    groups: Vec<(String, Vec<String>)>,
}

impl RecipientGroups {
    /// Single pass over `recipients`.
    #[must_use]
    pub fn group<I, S>(recipients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut index: AHashMap<String, usize> = AHashMap::new();
        let mut groups: Vec<(String, Vec<String>)> = Vec::new();

        for recipient in recipients {
            let recipient = recipient.into();
            let domain = grouping_key(&recipient);

            if let Some(&position) = index.get(&domain) {
                groups[position].1.push(recipient);
            } else {
                index.insert(domain.clone(), groups.len());
                groups.push((domain, vec![recipient]));
            }
        }

        Self { groups }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn domains(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(|(domain, _)| domain.as_str())
    }

    #[must_use]
    pub fn get(&self, domain: &str) -> Option<&[String]> {
        self.groups
            .iter()
            .find(|(key, _)| key == domain)
            .map(|(_, recipients)| recipients.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.groups
            .iter()
            .map(|(domain, recipients)| (domain.as_str(), recipients.as_slice()))
    }
}

impl IntoIterator for RecipientGroups {
    type Item = (String, Vec<String>);
    type IntoIter = std::vec::IntoIter<(String, Vec<String>)>;

    fn into_iter(self) -> Self::IntoIter {
        self.groups.into_iter()
    }
}
