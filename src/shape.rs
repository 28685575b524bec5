//! The shape a rule declares its paths in: one path, a list, or a record of
//! named paths.  Recipes get their absolute paths back in the same shape.

use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape<T> {
    Scalar(T),
    List(Vec<T>),
    Keyed(BTreeMap<String, T>),
}

impl<T> Default for Shape<T> {
    fn default() -> Self {
        Shape::List(Vec::new())
    }
}

impl<T> Shape<T> {
    /// Map every element, preserving the shape (and record keys).
    pub fn map<U>(&self, mut f: impl FnMut(&T) -> U) -> Shape<U> {
        match self {
            Shape::Scalar(t) => Shape::Scalar(f(t)),
            Shape::List(ts) => Shape::List(ts.iter().map(f).collect()),
            Shape::Keyed(ts) => Shape::Keyed(ts.iter().map(|(k, t)| (k.clone(), f(t))).collect()),
        }
    }

    /// Elements in declaration order (key order for records).
    pub fn iter(&self) -> Box<dyn Iterator<Item = &T> + '_> {
        match self {
            Shape::Scalar(t) => Box::new(std::iter::once(t)),
            Shape::List(ts) => Box::new(ts.iter()),
            Shape::Keyed(ts) => Box::new(ts.values()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Shape::Scalar(_) => 1,
            Shape::List(ts) => ts.len(),
            Shape::Keyed(ts) => ts.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn scalar(&self) -> Option<&T> {
        match self {
            Shape::Scalar(t) => Some(t),
            _ => None,
        }
    }

    pub fn list(&self) -> Option<&[T]> {
        match self {
            Shape::List(ts) => Some(ts),
            _ => None,
        }
    }

    /// Look up a named element of a keyed shape.
    pub fn get(&self, key: &str) -> Option<&T> {
        match self {
            Shape::Keyed(ts) => ts.get(key),
            _ => None,
        }
    }

    /// Convert the element type, e.g. `&str` declarations into paths.
    pub fn convert<U: From<T>>(self) -> Shape<U> {
        match self {
            Shape::Scalar(t) => Shape::Scalar(t.into()),
            Shape::List(ts) => Shape::List(ts.into_iter().map(U::from).collect()),
            Shape::Keyed(ts) => Shape::Keyed(ts.into_iter().map(|(k, t)| (k, t.into())).collect()),
        }
    }

    pub fn into_vec(self) -> Vec<T> {
        match self {
            Shape::Scalar(t) => vec![t],
            Shape::List(ts) => ts,
            Shape::Keyed(ts) => ts.into_values().collect(),
        }
    }
}

/// Conversion of a rule's declared paths into a `Shape`.
///
/// Containers convert element-wise; scalar conversions are implemented
/// per element type (see `path.rs`) so a `Vec` is never taken as a scalar.
pub trait IntoShape<T> {
    fn into_shape(self) -> Shape<T>;
}

impl<T> IntoShape<T> for Shape<T> {
    fn into_shape(self) -> Shape<T> {
        self
    }
}

impl<T, U: Into<T>> IntoShape<T> for Vec<U> {
    fn into_shape(self) -> Shape<T> {
        Shape::List(self.into_iter().map(Into::into).collect())
    }
}

impl<T, U: Into<T>, const N: usize> IntoShape<T> for [U; N] {
    fn into_shape(self) -> Shape<T> {
        Shape::List(self.into_iter().map(Into::into).collect())
    }
}

impl<T, U: Into<T>> IntoShape<T> for BTreeMap<String, U> {
    fn into_shape(self) -> Shape<T> {
        Shape::Keyed(self.into_iter().map(|(k, u)| (k, u.into())).collect())
    }
}

impl<K: Into<String>, T> FromIterator<(K, T)> for Shape<T> {
    fn from_iter<I: IntoIterator<Item = (K, T)>>(iter: I) -> Self {
        Shape::Keyed(iter.into_iter().map(|(k, t)| (k.into(), t)).collect())
    }
}
