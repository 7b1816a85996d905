//! Reducers: named functions that fold a new observation into an aggregate.
//!
//! Every reducer follows the same contract, `reduce(new, old)`, and answers
//! either with a replacement value or with [`Reduction::Keep`], which leaves
//! the stored aggregate untouched. The first observation routed to an empty
//! cell is stored as-is without consulting the reducer.
//!
//! # Example
//!
//! ```rust
//! use rollup::reducer::{BuiltinReducer, Reduction};
//!
//! assert_eq!(BuiltinReducer::Sum.reduce(2.0, 50.0), Reduction::Replace(52.0));
//! assert_eq!(BuiltinReducer::Diff.reduce(2.0, 50.0), Reduction::Replace(48.0));
//! assert_eq!(BuiltinReducer::First.reduce(2.0, 50.0), Reduction::Keep);
//! assert_eq!(BuiltinReducer::Max.reduce(2.0, 50.0), Reduction::Keep);
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::ConfigError;

/// Outcome of a single reduction step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reduction {
    /// Store this value in place of the old one.
    Replace(f64),
    /// Leave the stored value unchanged.
    Keep,
}

/// Signature of a caller-supplied reducer: `(new, old) -> Reduction`.
pub type ReduceFn = dyn Fn(f64, f64) -> Reduction + Send + Sync;

/// The reducers every catalog starts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinReducer {
    /// Keeps the largest observation.
    Max,
    /// Keeps the smallest observation.
    Min,
    /// Keeps the first observation forever.
    First,
    /// Keeps the latest observation.
    Last,
    /// `old + new`.
    Sum,
    /// `old - new`.
    Diff,
    /// `old * new`.
    Multi,
    /// `old / new`.
    Div,
}

impl BuiltinReducer {
    /// All built-in reducers, in registration order.
    pub const ALL: [BuiltinReducer; 8] = [
        Self::Max,
        Self::Min,
        Self::First,
        Self::Last,
        Self::Sum,
        Self::Diff,
        Self::Multi,
        Self::Div,
    ];

    /// Returns the registry name of this reducer.
    pub fn name(self) -> &'static str {
        match self {
            Self::Max => "max",
            Self::Min => "min",
            Self::First => "first",
            Self::Last => "last",
            Self::Sum => "sum",
            Self::Diff => "diff",
            Self::Multi => "multi",
            Self::Div => "div",
        }
    }

    /// Folds `new` into `old`.
    pub fn reduce(self, new: f64, old: f64) -> Reduction {
        match self {
            Self::Max if new > old => Reduction::Replace(new),
            Self::Min if new < old => Reduction::Replace(new),
            Self::Max | Self::Min | Self::First => Reduction::Keep,
            Self::Last => Reduction::Replace(new),
            Self::Sum => Reduction::Replace(old + new),
            Self::Diff => Reduction::Replace(old - new),
            Self::Multi => Reduction::Replace(old * new),
            Self::Div => Reduction::Replace(old / new),
        }
    }
}

impl fmt::Display for BuiltinReducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A named reducer, either built in or supplied by the caller.
///
/// Cloning is cheap; custom functions are shared behind an `Arc`.
#[derive(Clone)]
pub struct Reducer {
    name: String,
    kind: ReducerKind,
}

#[derive(Clone)]
enum ReducerKind {
    Builtin(BuiltinReducer),
    Custom(Arc<ReduceFn>),
}

impl Reducer {
    /// Wraps a built-in reducer.
    pub fn builtin(reducer: BuiltinReducer) -> Self {
        Self {
            name: reducer.name().to_string(),
            kind: ReducerKind::Builtin(reducer),
        }
    }

    /// Creates a custom reducer from a function honouring the
    /// `(new, old) -> Reduction` contract.
    pub fn custom<F>(name: impl Into<String>, reduce: F) -> Self
    where
        F: Fn(f64, f64) -> Reduction + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            kind: ReducerKind::Custom(Arc::new(reduce)),
        }
    }

    /// Returns the reducer name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the built-in variant, if this is a built-in reducer.
    pub fn as_builtin(&self) -> Option<BuiltinReducer> {
        match self.kind {
            ReducerKind::Builtin(b) => Some(b),
            ReducerKind::Custom(_) => None,
        }
    }

    /// Folds `new` into `old`.
    pub fn reduce(&self, new: f64, old: f64) -> Reduction {
        match &self.kind {
            ReducerKind::Builtin(b) => b.reduce(new, old),
            ReducerKind::Custom(f) => f(new, old),
        }
    }

    /// Computes the value a cell holds after observing `new`.
    ///
    /// An empty cell takes `new` directly; otherwise the reducer decides,
    /// and [`Reduction::Keep`] yields `old` unchanged.
    pub fn fold(&self, new: f64, old: Option<f64>) -> f64 {
        match old {
            None => new,
            Some(old) => match self.reduce(new, old) {
                Reduction::Replace(value) => value,
                Reduction::Keep => old,
            },
        }
    }
}

impl fmt::Debug for Reducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            ReducerKind::Builtin(_) => "builtin",
            ReducerKind::Custom(_) => "custom",
        };
        f.debug_struct("Reducer")
            .field("name", &self.name)
            .field("kind", &kind)
            .finish()
    }
}

/// Name-indexed set of reducers.
#[derive(Debug, Clone)]
pub struct ReducerRegistry {
    reducers: BTreeMap<String, Reducer>,
}

impl ReducerRegistry {
    /// Creates an empty registry.
    pub fn empty() -> Self {
        Self {
            reducers: BTreeMap::new(),
        }
    }

    /// Creates a registry holding every [`BuiltinReducer`].
    pub fn with_builtins() -> Self {
        let reducers = BuiltinReducer::ALL
            .iter()
            .map(|&b| (b.name().to_string(), Reducer::builtin(b)))
            .collect();
        Self { reducers }
    }

    /// Adds a reducer.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Duplicate`] if the name is taken.
    pub fn register(&mut self, reducer: Reducer) -> Result<(), ConfigError> {
        if self.reducers.contains_key(reducer.name()) {
            return Err(ConfigError::Duplicate {
                kind: "reducer",
                name: reducer.name().to_string(),
            });
        }
        self.reducers.insert(reducer.name().to_string(), reducer);
        Ok(())
    }

    /// Looks up a reducer by name.
    pub fn get(&self, name: &str) -> Option<&Reducer> {
        self.reducers.get(name)
    }

    /// Returns true if a reducer with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.reducers.contains_key(name)
    }

    /// Iterates over registered reducer names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.reducers.keys().map(String::as_str)
    }

    /// Returns the number of registered reducers.
    pub fn len(&self) -> usize {
        self.reducers.len()
    }

    /// Returns true if no reducers are registered.
    pub fn is_empty(&self) -> bool {
        self.reducers.is_empty()
    }
}

impl Default for ReducerRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
