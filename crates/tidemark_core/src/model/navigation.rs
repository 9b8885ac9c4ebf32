//! Navigation relationships and eager-loading paths.
//!
//! # Responsibility
//! - Describe principal -> dependent edges between entity types.
//! - Offer typed navigation chains and dotted string paths that collapse
//!   into one `NavigationPath` representation.
//!
//! # Invariants
//! - A path segment is a plain identifier; it is validated once, when the
//!   path is built, and resolved against the model's edge list.

use super::entity::{Entity, EntityType};
use super::{ModelError, ModelResult};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt::{Display, Formatter};
use std::marker::PhantomData;

static SEGMENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid segment regex"));

/// Number of dependents one principal may have through a relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    One,
    Many,
}

/// Directed edge from a principal entity type to a dependent entity type.
#[derive(Debug, Clone, Copy)]
pub struct Relationship {
    /// Navigation name on the principal (e.g. `Students`).
    pub name: &'static str,
    pub principal: &'static EntityType,
    pub dependent: &'static EntityType,
    /// Uuid column on the dependent that stores the principal key.
    pub foreign_key: &'static str,
    pub cardinality: Cardinality,
}

/// Typed navigation from `P` to `D`, declared as an associated constant on
/// the principal entity.
pub struct Navigation<P, D> {
    name: &'static str,
    _marker: PhantomData<fn() -> (P, D)>,
}

impl<P, D> Navigation<P, D> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Extends this navigation with a second hop starting at `D`.
    pub fn then<N>(self, next: Navigation<D, N>) -> NavigationChain<P, N> {
        NavigationChain {
            segments: vec![self.name, next.name],
            _marker: PhantomData,
        }
    }
}

impl<P, D> Clone for Navigation<P, D> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P, D> Copy for Navigation<P, D> {}

/// Typed multi-hop navigation from root `R` ending at `T`.
pub struct NavigationChain<R, T> {
    segments: Vec<&'static str>,
    _marker: PhantomData<fn() -> (R, T)>,
}

impl<R, T> NavigationChain<R, T> {
    pub fn then<N>(mut self, next: Navigation<T, N>) -> NavigationChain<R, N> {
        self.segments.push(next.name);
        NavigationChain {
            segments: self.segments,
            _marker: PhantomData,
        }
    }
}

/// Untyped navigation path: the single internal representation for typed
/// chains and dotted strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationPath {
    segments: Vec<String>,
}

impl NavigationPath {
    /// Parses a dotted path such as `Students.Address`.
    pub fn parse(path: &str) -> ModelResult<Self> {
        let segments: Vec<String> = path.split('.').map(|s| s.trim().to_string()).collect();
        if segments.iter().any(|segment| !SEGMENT_RE.is_match(segment)) {
            return Err(ModelError::InvalidNavigationPath(path.to_string()));
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    fn from_static(segments: &[&'static str]) -> Self {
        Self {
            segments: segments.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Display for NavigationPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}

/// Eager-loading request rooted at entity type `E`.
pub struct Include<E> {
    path: NavigationPath,
    _marker: PhantomData<fn() -> E>,
}

impl<E: Entity> Include<E> {
    /// Builds an include from a dotted string path.
    pub fn path(path: &str) -> ModelResult<Self> {
        Ok(Self {
            path: NavigationPath::parse(path)?,
            _marker: PhantomData,
        })
    }

    pub fn navigation_path(&self) -> &NavigationPath {
        &self.path
    }
}

impl<E> Clone for Include<E> {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            _marker: PhantomData,
        }
    }
}

impl<E, D> From<Navigation<E, D>> for Include<E> {
    fn from(value: Navigation<E, D>) -> Self {
        Self {
            path: NavigationPath::from_static(&[value.name]),
            _marker: PhantomData,
        }
    }
}

impl<E, T> From<NavigationChain<E, T>> for Include<E> {
    fn from(value: NavigationChain<E, T>) -> Self {
        Self {
            path: NavigationPath::from_static(&value.segments),
            _marker: PhantomData,
        }
    }
}
