use std::{
    collections::{btree_map, BTreeMap},
    fmt,
};
use thiserror::Error;

mod sets;

pub use sets::{CMakeOptions, ConfigureOptions, MakeOptions, MesonOptions, RunnerOptions};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MergeError {
    #[error("option '{key}' is set by more than one layer and cannot be merged")]
    UnmergeableOption { key: String },
    #[error("option '{key}' is joined with both '{left}' and '{right}'")]
    SeparatorMismatch {
        key: String,
        left: String,
        right: String,
    },
}

/// Tri-state toggle used by CMake style boolean options.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Switch {
    Off,
    On,
    ForcedOn,
}

impl fmt::Display for Switch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Switch::Off => write!(f, "OFF"),
            Switch::On => write!(f, "ON"),
            Switch::ForcedOn => write!(f, "FORCE_ON"),
        }
    }
}

impl From<bool> for Switch {
    fn from(value: bool) -> Self {
        if value {
            Switch::On
        } else {
            Switch::Off
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OptionValue {
    Plain(String),
    Switch(Switch),
    Joined {
        values: Vec<String>,
        separator: String,
    },
}

impl OptionValue {
    pub fn joined<I, S>(separator: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        OptionValue::Joined {
            values: values.into_iter().map(Into::into).collect(),
            separator: separator.to_string(),
        }
    }

    /// Space separated list, the usual shape of `CFLAGS`-like values.
    pub fn flags<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::joined(" ", values)
    }

    pub fn render(&self) -> String {
        match self {
            OptionValue::Plain(value) => value.clone(),
            OptionValue::Switch(switch) => switch.to_string(),
            OptionValue::Joined { values, separator } => values.join(separator),
        }
    }

    fn merge(self, key: &str, other: OptionValue) -> Result<OptionValue, MergeError> {
        match (self, other) {
            (
                OptionValue::Joined {
                    values: left,
                    separator: left_separator,
                },
                OptionValue::Joined {
                    values: right,
                    separator: right_separator,
                },
            ) => {
                if left_separator != right_separator {
                    return Err(MergeError::SeparatorMismatch {
                        key: key.to_string(),
                        left: left_separator,
                        right: right_separator,
                    });
                }

                Ok(OptionValue::Joined {
                    values: dedupe(left.into_iter().chain(right)),
                    separator: left_separator,
                })
            }
            _ => Err(MergeError::UnmergeableOption {
                key: key.to_string(),
            }),
        }
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        OptionValue::Plain(value.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(value: String) -> Self {
        OptionValue::Plain(value)
    }
}

impl From<Switch> for OptionValue {
    fn from(value: Switch) -> Self {
        OptionValue::Switch(value)
    }
}

/// Key-ordered set of named options.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OptionMap(BTreeMap<String, OptionValue>);

impl OptionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<OptionValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<OptionValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, OptionValue> {
        self.0.iter()
    }

    /// Rendered `(key, value)` pairs in key order.
    pub fn render(&self) -> Vec<(String, String)> {
        self.0
            .iter()
            .map(|(key, value)| (key.clone(), value.render()))
            .collect()
    }
}

impl<K, V, const N: usize> From<[(K, V); N]> for OptionMap
where
    K: Into<String>,
    V: Into<OptionValue>,
{
    fn from(entries: [(K, V); N]) -> Self {
        let mut map = OptionMap::new();
        for (key, value) in entries {
            map.insert(key, value);
        }
        map
    }
}

impl<'a> IntoIterator for &'a OptionMap {
    type Item = (&'a String, &'a OptionValue);
    type IntoIter = btree_map::Iter<'a, String, OptionValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// A value that can be combined with another of the same kind, failing when
/// both sides set something that cannot be reconciled.
pub trait Mergeable: Sized + Default {
    fn merge(self, other: Self) -> Result<Self, MergeError>;
}

/// Folds every layer left to right.
pub fn merge_all<T, I>(layers: I) -> Result<T, MergeError>
where
    T: Mergeable,
    I: IntoIterator<Item = T>,
{
    layers
        .into_iter()
        .try_fold(T::default(), |merged, layer| merged.merge(layer))
}

impl Mergeable for OptionMap {
    fn merge(self, other: Self) -> Result<Self, MergeError> {
        let mut merged = self.0;

        for (key, value) in other.0 {
            let value = match merged.remove(&key) {
                Some(existing) => existing.merge(&key, value)?,
                None => value,
            };
            merged.insert(key, value);
        }

        Ok(OptionMap(merged))
    }
}

impl<K: Ord, V: Mergeable> Mergeable for BTreeMap<K, V> {
    fn merge(self, other: Self) -> Result<Self, MergeError> {
        let mut merged = self;

        for (key, value) in other {
            let value = match merged.remove(&key) {
                Some(existing) => existing.merge(value)?,
                None => value,
            };
            merged.insert(key, value);
        }

        Ok(merged)
    }
}

/// Bare flags merge as an order preserving list without duplicates.
impl Mergeable for Vec<String> {
    fn merge(self, other: Self) -> Result<Self, MergeError> {
        Ok(dedupe(self.into_iter().chain(other)))
    }
}

fn dedupe(values: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = Vec::new();
    for value in values {
        if !seen.contains(&value) {
            seen.push(value);
        }
    }
    seen
}
