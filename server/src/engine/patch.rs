use serde::{Deserialize, Deserializer};

/// A field in a partial update: either left alone or replaced.
///
/// `Patch<Option<T>>` separates "not provided" (`Unset`) from "cleared"
/// (`Set(None)`). Pair with `#[serde(default)]` on the field so an absent
/// key deserializes as `Unset` and an explicit `null` as `Set(None)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Patch<T> {
    #[default]
    Unset,
    Set(T),
}

impl<T> Patch<T> {
    pub fn is_set(&self) -> bool {
        matches!(self, Patch::Set(_))
    }

    pub fn as_ref(&self) -> Patch<&T> {
        match self {
            Patch::Unset => Patch::Unset,
            Patch::Set(v) => Patch::Set(v),
        }
    }

    /// The new value if provided, otherwise `current`.
    pub fn apply(self, current: T) -> T {
        match self {
            Patch::Unset => current,
            Patch::Set(v) => v,
        }
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Patch::Unset => None,
            Patch::Set(v) => Some(v),
        }
    }
}

impl<T> From<T> for Patch<T> {
    fn from(value: T) -> Self {
        Patch::Set(value)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Patch<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        T::deserialize(deserializer).map(Patch::Set)
    }
}
