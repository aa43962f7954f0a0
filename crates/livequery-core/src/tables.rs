use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Sorted, de-duplicated set of table names.
///
/// Used both for the tables a query watches and for the tables a commit
/// touched. Ordering is stable so two sets built from the same names in a
/// different order compare and hash equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableSet(BTreeSet<String>);

impl TableSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<S: Into<String>>(&mut self, table: S) -> bool {
        self.0.insert(table.into())
    }

    pub fn contains(&self, table: &str) -> bool {
        self.0.contains(table)
    }

    /// True when at least one table is present in both sets.
    pub fn intersects(&self, other: &TableSet) -> bool {
        let (small, large) = if self.0.len() <= other.0.len() {
            (&self.0, &other.0)
        } else {
            (&other.0, &self.0)
        };
        small.iter().any(|t| large.contains(t))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for TableSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl<S: Into<String>, const N: usize> From<[S; N]> for TableSet {
    fn from(tables: [S; N]) -> Self {
        tables.into_iter().collect()
    }
}

impl fmt::Display for TableSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, t) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", t)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_and_duplicates_do_not_matter() {
        let a = TableSet::from(["message", "folder", "message"]);
        let b = TableSet::from(["folder", "message"]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
        assert_eq!(a.to_string(), "{folder, message}");
    }

    #[test]
    fn intersection() {
        let watched = TableSet::from(["message", "folder"]);
        assert!(watched.intersects(&TableSet::from(["account", "folder"])));
        assert!(!watched.intersects(&TableSet::from(["account"])));
        assert!(!watched.intersects(&TableSet::new()));
    }
}
