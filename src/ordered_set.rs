//! Insertion-ordered set over song paths (and anything else `Eq + Hash`).
//!
//! `HashSet` would make query results nondeterministic run to run; every set
//! operator here preserves the left operand's encounter order instead, per
//! the query language's ordering guarantee.

use std::hash::Hash;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderedSet<T: Hash + Eq>(IndexSet<T>);

impl<T: Hash + Eq> Default for OrderedSet<T> {
    fn default() -> Self {
        Self(IndexSet::new())
    }
}

impl<T: Hash + Eq + Clone> OrderedSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, item: &T) -> bool {
        self.0.contains(item)
    }

    pub fn insert(&mut self, item: T) -> bool {
        self.0.insert(item)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.0.iter()
    }

    /// `self ∪ other`, `self`'s elements first in `self`'s order, then any
    /// of `other`'s elements not already present, in `other`'s order.
    pub fn union(&self, other: &Self) -> Self {
        let mut out = self.clone();
        for item in other.iter() {
            out.insert(item.clone());
        }
        out
    }

    /// `self ∩ other`, in `self`'s encounter order.
    pub fn intersection(&self, other: &Self) -> Self {
        self.iter()
            .filter(|item| other.contains(item))
            .cloned()
            .collect()
    }

    /// `self \ other`, in `self`'s encounter order.
    pub fn difference(&self, other: &Self) -> Self {
        self.iter()
            .filter(|item| !other.contains(item))
            .cloned()
            .collect()
    }

    /// `(self \ other) ∪ (other \ self)`, `self`'s exclusive elements
    /// first (in `self`'s order), then `other`'s (in `other`'s order).
    pub fn symmetric_difference(&self, other: &Self) -> Self {
        self.difference(other).union(&other.difference(self))
    }

    pub fn extend_ordered(&mut self, other: impl IntoIterator<Item = T>) {
        for item in other {
            self.insert(item);
        }
    }
}

impl<T: Hash + Eq> IntoIterator for OrderedSet<T> {
    type Item = T;
    type IntoIter = indexmap::set::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a, T: Hash + Eq> IntoIterator for &'a OrderedSet<T> {
    type Item = &'a T;
    type IntoIter = indexmap::set::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl<T: Hash + Eq> FromIterator<T> for OrderedSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self(IndexSet::from_iter(iter))
    }
}

impl<T: Hash + Eq + Clone> std::ops::BitOr for &OrderedSet<T> {
    type Output = OrderedSet<T>;
    fn bitor(self, rhs: Self) -> OrderedSet<T> {
        self.union(rhs)
    }
}

impl<T: Hash + Eq + Clone> std::ops::BitAnd for &OrderedSet<T> {
    type Output = OrderedSet<T>;
    fn bitand(self, rhs: Self) -> OrderedSet<T> {
        self.intersection(rhs)
    }
}

impl<T: Hash + Eq + Clone> std::ops::Sub for &OrderedSet<T> {
    type Output = OrderedSet<T>;
    fn sub(self, rhs: Self) -> OrderedSet<T> {
        self.difference(rhs)
    }
}

impl<T: Hash + Eq + Clone> std::ops::BitXor for &OrderedSet<T> {
    type Output = OrderedSet<T>;
    fn bitxor(self, rhs: Self) -> OrderedSet<T> {
        self.symmetric_difference(rhs)
    }
}
