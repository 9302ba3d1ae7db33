//! Label selectors compiled into matchers.
//!
//! A [`LabelSelector`] is the persisted, declarative form; a [`Selector`] is the
//! compiled form that can be evaluated against any label set and rendered into
//! the query-string syntax the API server accepts for label-filtered lists.

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};

use crate::error::{Error, Result};

pub const OP_IN: &str = "In";
pub const OP_NOT_IN: &str = "NotIn";
pub const OP_EXISTS: &str = "Exists";
pub const OP_DOES_NOT_EXIST: &str = "DoesNotExist";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    Equals(String, String),
    In(String, Vec<String>),
    NotIn(String, Vec<String>),
    Exists(String),
    DoesNotExist(String),
}

impl Requirement {
    pub fn key(&self) -> &str {
        match self {
            Self::Equals(k, _) | Self::In(k, _) | Self::NotIn(k, _) | Self::Exists(k) | Self::DoesNotExist(k) => k,
        }
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Self::Equals(k, v) => labels.get(k) == Some(v),
            Self::In(k, vs) => labels.get(k).map_or(false, |v| vs.contains(v)),
            // NotIn also matches objects without the key at all.
            Self::NotIn(k, vs) => labels.get(k).map_or(true, |v| !vs.contains(v)),
            Self::Exists(k) => labels.contains_key(k),
            Self::DoesNotExist(k) => !labels.contains_key(k),
        }
    }

    fn from_expression(expr: &LabelSelectorRequirement) -> Result<Self> {
        let values = expr.values.clone().unwrap_or_default();
        let key = expr.key.clone();
        if key.is_empty() {
            return Err(Error::invalid_selector("empty requirement key"));
        }
        match expr.operator.as_str() {
            OP_IN | OP_NOT_IN if values.is_empty() => {
                Err(Error::invalid_selector(format!("{}: values must be non-empty for {}", key, expr.operator)))
            }
            OP_EXISTS | OP_DOES_NOT_EXIST if !values.is_empty() => {
                Err(Error::invalid_selector(format!("{}: values must be empty for {}", key, expr.operator)))
            }
            OP_IN => Ok(Self::In(key, sorted(values))),
            OP_NOT_IN => Ok(Self::NotIn(key, sorted(values))),
            OP_EXISTS => Ok(Self::Exists(key)),
            OP_DOES_NOT_EXIST => Ok(Self::DoesNotExist(key)),
            other => Err(Error::invalid_selector(format!("{}: unknown operator {:?}", key, other))),
        }
    }
}

fn sorted(mut v: Vec<String>) -> Vec<String> {
    v.sort();
    v.dedup();
    v
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equals(k, v) => write!(f, "{}={}", k, v),
            Self::In(k, vs) => write!(f, "{} in ({})", k, vs.join(",")),
            Self::NotIn(k, vs) => write!(f, "{} notin ({})", k, vs.join(",")),
            Self::Exists(k) => write!(f, "{}", k),
            Self::DoesNotExist(k) => write!(f, "!{}", k),
        }
    }
}

/// Conjunction of requirements. An empty selector matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    requirements: Vec<Requirement>,
}

impl Selector {
    pub fn everything() -> Self { Self::default() }

    pub fn from_requirements(mut requirements: Vec<Requirement>) -> Self {
        requirements.sort_by(|a, b| a.key().cmp(b.key()));
        Self { requirements }
    }

    pub fn requirements(&self) -> &[Requirement] { &self.requirements }

    pub fn is_everything(&self) -> bool { self.requirements.is_empty() }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, r) in self.requirements.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", r)?;
        }
        Ok(())
    }
}

impl TryFrom<&LabelSelector> for Selector {
    type Error = Error;

    fn try_from(ls: &LabelSelector) -> Result<Self> {
        let mut reqs = Vec::new();
        if let Some(labels) = &ls.match_labels {
            for (k, v) in labels {
                reqs.push(Requirement::Equals(k.clone(), v.clone()));
            }
        }
        for expr in ls.match_expressions.iter().flatten() {
            reqs.push(Requirement::from_expression(expr)?);
        }
        Ok(Self::from_requirements(reqs))
    }
}

/// Selector with a single expression on `key`.
pub(crate) fn key_selector(key: &str, operator: &str) -> LabelSelector {
    LabelSelector {
        match_expressions: Some(vec![LabelSelectorRequirement {
            key: key.to_string(),
            operator: operator.to_string(),
            values: None,
        }]),
        match_labels: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn exists_and_does_not_exist_render_like_the_apiserver() {
        let present = Selector::try_from(&key_selector("operators.coreos.com/foo", OP_EXISTS)).unwrap();
        let absent = Selector::try_from(&key_selector("operators.coreos.com/foo", OP_DOES_NOT_EXIST)).unwrap();
        assert_eq!(present.to_string(), "operators.coreos.com/foo");
        assert_eq!(absent.to_string(), "!operators.coreos.com/foo");
    }

    #[test]
    fn match_labels_and_set_expressions() {
        let ls = LabelSelector {
            match_labels: Some(labels(&[("app", "web")])),
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: "tier".into(),
                operator: OP_NOT_IN.into(),
                values: Some(vec!["db".into(), "cache".into()]),
            }]),
        };
        let sel = Selector::try_from(&ls).unwrap();
        assert_eq!(sel.to_string(), "app=web,tier notin (cache,db)");
        assert!(sel.matches(&labels(&[("app", "web")])));
        assert!(sel.matches(&labels(&[("app", "web"), ("tier", "front")])));
        assert!(!sel.matches(&labels(&[("app", "web"), ("tier", "db")])));
        assert!(!sel.matches(&labels(&[("tier", "front")])));
    }

    #[test]
    fn rejects_malformed_expressions() {
        let bad_op = key_selector("k", "Maybe");
        assert!(Selector::try_from(&bad_op).is_err());

        let mut in_without_values = key_selector("k", OP_IN);
        assert!(Selector::try_from(&in_without_values).is_err());
        in_without_values.match_expressions.as_mut().unwrap()[0].values = Some(vec!["a".into()]);
        assert!(Selector::try_from(&in_without_values).is_ok());
    }

    #[test]
    fn empty_selector_matches_everything() {
        let sel = Selector::try_from(&LabelSelector::default()).unwrap();
        assert!(sel.is_everything());
        assert!(sel.matches(&BTreeMap::new()));
    }
}
