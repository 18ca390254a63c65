//! Normalized column names.

use serde::{Serialize, Serializer};
use std::{
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
};

/// Characters which may not appear in a column name. Each run of these is
/// replaced by a single underscore.
const DISALLOWED: &[char] = &[' ', '(', ')', '{', '}', ',', ';', '\t', '='];

/// Is `c` a character we need to replace?
pub(crate) fn is_disallowed(c: char) -> bool {
    DISALLOWED.contains(&c)
}

/// A normalized column name.
///
/// This behaves like a string that preserves case, but which ignores it for
/// comparisons, because warehouses like BigQuery don't allow two columns
/// whose names differ only in case.
#[derive(Clone)]
pub struct ColumnName {
    /// The name as we'll send it to the destination.
    name: String,
    /// A lowercase copy, used for comparisons.
    folded: String,
}

impl ColumnName {
    /// Normalize a raw header name.
    ///
    /// Runs of disallowed characters turn into one underscore, except at the
    /// very start or end of the name, where they are dropped. A name with
    /// nothing left becomes `_`.
    pub fn normalize(raw: &str) -> ColumnName {
        let mut name = String::with_capacity(raw.len());
        let mut pending_separator = false;
        for c in raw.chars() {
            if is_disallowed(c) {
                pending_separator = true;
            } else {
                if pending_separator && !name.is_empty() {
                    name.push('_');
                }
                pending_separator = false;
                name.push(c);
            }
        }
        if name.is_empty() {
            name.push('_');
        }
        ColumnName::from_normalized(name)
    }

    /// Wrap a string we already know is normalized.
    pub(crate) fn from_normalized(name: String) -> ColumnName {
        debug_assert!(!name.chars().any(is_disallowed));
        let folded = name.to_lowercase();
        ColumnName { name, folded }
    }

    /// The name, including case information.
    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// A lowercase version. Used for comparison.
    fn as_lowercase(&self) -> &str {
        &self.folded
    }

    /// Quote this for use in Spark SQL.
    pub(crate) fn quoted(&self) -> ColumnNameQuoted<'_> {
        ColumnNameQuoted(self)
    }
}

impl PartialEq for ColumnName {
    fn eq(&self, other: &Self) -> bool {
        // Compare only the lowercase versions.
        self.as_lowercase() == other.as_lowercase()
    }
}

impl Eq for ColumnName {}

impl PartialOrd for ColumnName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ColumnName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_lowercase().cmp(other.as_lowercase())
    }
}

impl Hash for ColumnName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_lowercase().hash(state);
    }
}

impl fmt::Debug for ColumnName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl fmt::Display for ColumnName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_str().fmt(f)
    }
}

impl Serialize for ColumnName {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.as_str().serialize(serializer)
    }
}

/// A wrapper type used to display column names with backtick quoting.
pub(crate) struct ColumnNameQuoted<'a>(&'a ColumnName);

impl fmt::Display for ColumnNameQuoted<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Always quote, just in case the column name is a keyword.
        write!(f, "`{}`", self.0.as_str().replace('`', "``"))
    }
}

#[test]
fn normalizes_examples() {
    let examples = &[
        ("Name", "Name"),
        ("BN_ABN", "BN_ABN"),
        ("Business (Trading) Name", "Business_Trading_Name"),
        ("a b", "a_b"),
        ("a{b}c", "a_b_c"),
        ("x=1;y=2", "x_1_y_2"),
        ("tab\there", "tab_here"),
        ("(leading", "leading"),
        ("trailing)", "trailing"),
        ("  ", "_"),
        ("", "_"),
        ("keep_underscores_", "keep_underscores_"),
    ];
    for &(raw, expected) in examples {
        assert_eq!(ColumnName::normalize(raw).as_str(), expected, "for {:?}", raw);
    }
}

#[test]
fn normalized_names_contain_no_disallowed_characters() {
    let raw = "({ ,;\t=}) weird, name ( ; = ) {x}";
    let name = ColumnName::normalize(raw);
    assert!(!name.as_str().chars().any(is_disallowed));
    assert_eq!(name.as_str(), "weird_name_x");
}


#[test]
fn ignores_case_for_comparison() {
    assert_eq!(ColumnName::normalize("a"), ColumnName::normalize("A"));
    assert!(ColumnName::normalize("a") < ColumnName::normalize("B"));
    assert!(ColumnName::normalize("A") < ColumnName::normalize("b"));
}

#[test]
fn ignores_case_for_hash() {
    use std::collections::hash_map::DefaultHasher;

    let mut hasher_1 = DefaultHasher::new();
    ColumnName::normalize("a").hash(&mut hasher_1);

    let mut hasher_2 = DefaultHasher::new();
    ColumnName::normalize("A").hash(&mut hasher_2);

    assert_eq!(hasher_1.finish(), hasher_2.finish());
}

#[test]
fn format_preserves_case() {
    let name = ColumnName::normalize("Aa");
    assert_eq!(format!("{}", name.quoted()), "`Aa`");
    assert_eq!(format!("{:?}", name), "\"Aa\"");
}
