use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MatrixError;
use crate::facts::SopRoleFact;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Role,
    Group,
    Category,
    Practice,
    Region,
    BusinessUnit,
    SopType,
}

impl Dimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Role => "role",
            Dimension::Group => "group",
            Dimension::Category => "category",
            Dimension::Practice => "practice",
            Dimension::Region => "region",
            Dimension::BusinessUnit => "business_unit",
            Dimension::SopType => "sop_type",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dimension {
    type Err = MatrixError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().replace('-', "_").as_str() {
            "role" => Ok(Dimension::Role),
            "group" => Ok(Dimension::Group),
            "category" => Ok(Dimension::Category),
            "practice" => Ok(Dimension::Practice),
            "region" | "region_tags" => Ok(Dimension::Region),
            "business_unit" => Ok(Dimension::BusinessUnit),
            "sop_type" => Ok(Dimension::SopType),
            other => Err(MatrixError::config(format!("unknown filter dimension '{other}'"))),
        }
    }
}

/// Something the filter engine can select on. Blank values must not be
/// returned; an item with no values for a dimension never matches a restriction
/// on it.
pub trait Faceted {
    fn facet_values(&self, dimension: Dimension) -> Vec<Cow<'_, str>>;
}

impl Faceted for SopRoleFact {
    fn facet_values(&self, dimension: Dimension) -> Vec<Cow<'_, str>> {
        let single = |value: &str| {
            if value.trim().is_empty() {
                Vec::new()
            } else {
                vec![Cow::Owned(value.to_string())]
            }
        };
        match dimension {
            Dimension::Role => single(&self.role_name),
            Dimension::Group => single(&self.group_name),
            Dimension::Practice => single(&self.practice),
            Dimension::BusinessUnit => single(&self.business_unit),
            Dimension::SopType => single(&self.sop_type),
            Dimension::Region => self
                .region_tags
                .iter()
                .map(|tag| Cow::Borrowed(tag.as_str()))
                .collect(),
            Dimension::Category => vec![
                Cow::Owned(self.applicability_level.code().to_string()),
                Cow::Borrowed(self.applicability_level.label()),
            ],
        }
    }
}

/// Selected values per dimension. A dimension that is absent or has an empty
/// set is unrestricted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterSpec {
    selections: BTreeMap<Dimension, BTreeSet<String>>,
}

impl FilterSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<I, S>(mut self, dimension: Dimension, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select(dimension, values);
        self
    }

    pub fn select<I, S>(&mut self, dimension: Dimension, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selections
            .entry(dimension)
            .or_default()
            .extend(values.into_iter().map(Into::into));
    }

    pub fn clear(&mut self, dimension: Dimension) {
        self.selections.remove(&dimension);
    }

    pub fn allowed(&self, dimension: Dimension) -> Option<&BTreeSet<String>> {
        self.selections.get(&dimension).filter(|set| !set.is_empty())
    }

    pub fn is_unrestricted(&self) -> bool {
        self.selections.values().all(BTreeSet::is_empty)
    }

    pub fn active_dimensions(&self) -> impl Iterator<Item = (Dimension, &BTreeSet<String>)> {
        self.selections
            .iter()
            .filter(|(_, set)| !set.is_empty())
            .map(|(dim, set)| (*dim, set))
    }

    pub fn matches<T: Faceted>(&self, item: &T) -> bool {
        self.active_dimensions().all(|(dimension, allowed)| {
            let values = item.facet_values(dimension);
            match dimension {
                // category labels are matched without regard to case
                Dimension::Category => values.iter().any(|v| {
                    allowed.iter().any(|a| a.trim().eq_ignore_ascii_case(v))
                }),
                _ => values.iter().any(|v| allowed.contains(v.as_ref())),
            }
        })
    }
}

pub struct FilterEngine;

impl FilterEngine {
    /// AND across dimensions, OR within one. Source order is kept and the input
    /// is never modified.
    pub fn evaluate<T: Faceted + Clone>(items: &[T], spec: &FilterSpec) -> Vec<T> {
        items.iter().filter(|item| spec.matches(*item)).cloned().collect()
    }

    pub fn evaluate_refs<'a, T: Faceted>(items: &'a [T], spec: &FilterSpec) -> Vec<&'a T> {
        items.iter().filter(|item| spec.matches(*item)).collect()
    }

    /// Distinct values of a dimension, sorted case-insensitively.
    pub fn facet_options<T: Faceted>(items: &[T], dimension: Dimension) -> Vec<String> {
        let mut seen = BTreeSet::new();
        for item in items {
            for value in item.facet_values(dimension) {
                seen.insert(value.into_owned());
            }
        }
        let mut options: Vec<String> = seen.into_iter().collect();
        options.sort_by(|a, b| a.to_lowercase().cmp(&b.to_lowercase()).then_with(|| a.cmp(b)));
        options
    }
}
