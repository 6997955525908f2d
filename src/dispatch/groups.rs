use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Deserialize;

use crate::core::{RefreshError, RefreshResult, WidgetId};

/// Reserved token resolving to every widget registered at dispatch time.
pub const ALL_TOKEN: &str = "all";

/// Static map from a coarse widget-type token to the widget ids that refresh together.
///
/// Built once at startup and never mutated; adding a widget type is a config change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeGroupTable {
    groups: HashMap<String, BTreeSet<WidgetId>>,
}

impl TypeGroupTable {
    pub fn builder() -> TypeGroupTableBuilder {
        TypeGroupTableBuilder::default()
    }

    /// Empty table: every token other than [`ALL_TOKEN`] is treated as a direct widget id.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse `{"groups": {"<token>": ["<widget id>", ...]}}`.
    pub fn from_json(document: &[u8]) -> RefreshResult<Self> {
        let doc: GroupsDocument = sonic_rs::from_slice(document)
            .map_err(|err| RefreshError::InvalidConfig(format!("type groups: {err}")))?;
        doc.groups
            .into_iter()
            .fold(Self::builder(), |builder, (token, members)| {
                builder.group(token, members)
            })
            .build()
    }

    pub fn members(&self, type_token: &str) -> Option<&BTreeSet<WidgetId>> {
        self.groups.get(type_token)
    }

    pub fn contains(&self, type_token: &str) -> bool {
        self.groups.contains_key(type_token)
    }

    pub fn is_all(type_token: &str) -> bool {
        type_token == ALL_TOKEN
    }

    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct GroupsDocument {
    groups: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Default)]
pub struct TypeGroupTableBuilder {
    groups: Vec<(String, Vec<String>)>,
}

impl TypeGroupTableBuilder {
    /// Add members to `type_token`. Repeating a token merges the member lists.
    pub fn group<I, S>(mut self, type_token: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups.push((
            type_token.into(),
            members.into_iter().map(Into::into).collect(),
        ));
        self
    }

    pub fn build(self) -> RefreshResult<TypeGroupTable> {
        let mut groups: HashMap<String, BTreeSet<WidgetId>> = HashMap::new();
        for (token, members) in self.groups {
            let token = token.trim().to_string();
            if token.is_empty() {
                return Err(RefreshError::InvalidConfig(
                    "type group token must not be empty".to_string(),
                ));
            }
            if token == ALL_TOKEN {
                return Err(RefreshError::InvalidConfig(format!(
                    "type group token `{ALL_TOKEN}` is reserved"
                )));
            }
            let entry = groups.entry(token).or_default();
            entry.extend(
                members
                    .into_iter()
                    .filter(|id| !id.is_empty())
                    .map(WidgetId::from),
            );
        }
        Ok(TypeGroupTable { groups })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(set: &BTreeSet<WidgetId>) -> Vec<&str> {
        set.iter().map(|id| id.as_ref()).collect()
    }

    #[test]
    fn builder_merges_repeated_tokens() {
        let table = TypeGroupTable::builder()
            .group("scale", ["weight-trend", "bmi-summary"])
            .group("sleep", ["sleep-stages"])
            .group("scale", ["body-fat", "weight-trend"])
            .build()
            .unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(
            ids(table.members("scale").unwrap()),
            vec!["bmi-summary", "body-fat", "weight-trend"]
        );
        assert!(table.members("activity").is_none());
    }

    #[test]
    fn reserved_and_empty_tokens_are_rejected() {
        let err = TypeGroupTable::builder()
            .group(ALL_TOKEN, ["x"])
            .build()
            .unwrap_err();
        assert!(matches!(err, RefreshError::InvalidConfig(_)));

        let err = TypeGroupTable::builder().group("  ", ["x"]).build().unwrap_err();
        assert!(matches!(err, RefreshError::InvalidConfig(_)));
    }

    #[test]
    fn parses_json_document() {
        let table = TypeGroupTable::from_json(
            br#"{"groups": {"blood_pressure": ["bp-chart", "bp-latest"], "sleep": []}}"#,
        )
        .unwrap();

        assert_eq!(
            ids(table.members("blood_pressure").unwrap()),
            vec!["bp-chart", "bp-latest"]
        );
        assert!(table.members("sleep").unwrap().is_empty());
        assert!(TypeGroupTable::from_json(b"{\"groups\": 3}").is_err());
    }
}
