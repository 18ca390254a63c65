//! Make column names unique by suffixing them.

use std::collections::HashSet;

use super::ColumnName;

/// How many suffixes we'll try before giving up.
const MAX_SUFFIX: usize = 50;

/// Hands out column names, appending `_2`, `_3`, ... to any name which has
/// already been used. Names are compared case-insensitively.
#[derive(Debug, Default)]
pub(crate) struct Uniquifier {
    /// Names that we have already handed out.
    used: HashSet<ColumnName>,
}

impl Uniquifier {
    /// Given a normalized `name`, return a unique name, or `None` if we've run
    /// out of suffixes.
    pub(crate) fn unique_name_for(&mut self, name: &ColumnName) -> Option<ColumnName> {
        if self.used.insert(name.clone()) {
            return Some(name.clone());
        }
        for offset in 2..=MAX_SUFFIX {
            let alt_name =
                ColumnName::from_normalized(format!("{}_{}", name.as_str(), offset));
            if self.used.insert(alt_name.clone()) {
                return Some(alt_name);
            }
        }
        None
    }
}

#[test]
fn uniquifier_generates_unique_names() {
    let examples = &[
        ("a", "a"),
        ("A", "A_2"),
        ("a_2", "a_2_2"), // Sneaky.
        ("B", "B"),
        ("a", "a_3"),
    ];
    let mut uniquifier = Uniquifier::default();
    for &(input, expected) in examples {
        let name = ColumnName::normalize(input);
        assert_eq!(uniquifier.unique_name_for(&name).unwrap().as_str(), expected);
    }
}

#[test]
fn uniquifier_gives_up_eventually() {
    let mut uniquifier = Uniquifier::default();
    let name = ColumnName::normalize("x");
    for _ in 1..=MAX_SUFFIX {
        assert!(uniquifier.unique_name_for(&name).is_some());
    }
    assert!(uniquifier.unique_name_for(&name).is_none());
}
