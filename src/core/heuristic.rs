//! Advisory computations (folder analysis, naming) never fail the caller.
//! They report whether the real computation ran or a fallback was used.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", content = "value", rename_all = "lowercase")]
pub enum Heuristic<T> {
    Computed(T),
    Fallback(T),
}

impl<T> Heuristic<T> {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback(_))
    }

    pub fn value(&self) -> &T {
        match self {
            Self::Computed(v) | Self::Fallback(v) => v,
        }
    }

    pub fn into_inner(self) -> T {
        match self {
            Self::Computed(v) | Self::Fallback(v) => v,
        }
    }
}
