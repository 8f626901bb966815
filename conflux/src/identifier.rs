//! Event source identifiers.
//!
//! Every event belongs to a [`Stream`], which belongs to a [`Category`], which belongs to
//! the single [`Log`]. An [`Identifier`] names one of these three levels and is the unit
//! subscribers are assigned to consume from.
//!
//! Identifiers have a canonical string form (used for deterministic sorting, e.g. by the
//! subscription coordinator) and a JSON wire form (used in the `subscriptions.event_sources`
//! column and anywhere identifiers cross a process boundary).
//!
//! ```
//! use conflux::Identifier;
//!
//! let stream = Identifier::stream("orders", "o-1");
//! assert_eq!(stream.to_string(), "stream:orders/o-1");
//! ```
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::{self, Display, Formatter};

lazy_static! {
    static ref NAME_RE: Regex = Regex::new("^[a-zA-Z0-9_.-]+$").unwrap();
}

fn is_valid_name(s: &str) -> bool {
    !s.is_empty() && NAME_RE.is_match(s)
}

/// Identifies a target that events can be appended to or scanned from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Identifier {
    /// The entire log: every event in the store.
    Log,
    /// All streams within a named category.
    Category { category: String },
    /// A single stream within a category.
    Stream { category: String, stream: String },
}

impl Identifier {
    /// Builds a [`Identifier::Category`], panicking if `category` is not a valid name.
    pub fn category(category: impl Into<String>) -> Self {
        let category = category.into();
        assert!(is_valid_name(&category), "invalid category name: {category}");
        Identifier::Category { category }
    }

    /// Builds a [`Identifier::Stream`], panicking if either part is not a valid name.
    pub fn stream(category: impl Into<String>, stream: impl Into<String>) -> Self {
        let category = category.into();
        let stream = stream.into();
        assert!(is_valid_name(&category), "invalid category name: {category}");
        assert!(is_valid_name(&stream), "invalid stream name: {stream}");
        Identifier::Stream { category, stream }
    }

    /// The category this identifier belongs to, if any.
    pub fn category_name(&self) -> Option<&str> {
        match self {
            Identifier::Log => None,
            Identifier::Category { category } => Some(category),
            Identifier::Stream { category, .. } => Some(category),
        }
    }

    /// The stream name, if this identifier names a single stream.
    pub fn stream_name(&self) -> Option<&str> {
        match self {
            Identifier::Stream { stream, .. } => Some(stream),
            _ => None,
        }
    }

    /// Returns true if `event` (given its category and stream) would be yielded
    /// when scanning this identifier.
    pub fn matches(&self, category: &str, stream: &str) -> bool {
        match self {
            Identifier::Log => true,
            Identifier::Category { category: c } => c == category,
            Identifier::Stream { category: c, stream: s } => c == category && s == stream,
        }
    }
}

impl Display for Identifier {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Identifier::Log => write!(f, "log"),
            Identifier::Category { category } => write!(f, "category:{category}"),
            Identifier::Stream { category, stream } => {
                write!(f, "stream:{category}/{stream}")
            }
        }
    }
}

impl PartialOrd for Identifier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Identifiers are totally ordered by their canonical string form, which is what the
/// subscription coordinator relies on to deterministically partition sources across
/// subscribers.
impl Ord for Identifier {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_string().cmp(&other.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_has_canonical_form() {
        assert_eq!(Identifier::Log.to_string(), "log");
    }

    #[test]
    fn category_has_canonical_form() {
        assert_eq!(Identifier::category("orders").to_string(), "category:orders");
    }

    #[test]
    fn stream_has_canonical_form() {
        assert_eq!(
            Identifier::stream("orders", "o-1").to_string(),
            "stream:orders/o-1"
        );
    }

    #[test]
    fn ordering_is_by_canonical_string() {
        let mut ids = vec![
            Identifier::category("orders"),
            Identifier::Log,
            Identifier::stream("orders", "o-1"),
        ];
        ids.sort();
        assert_eq!(
            ids,
            vec![
                Identifier::category("orders"),
                Identifier::Log,
                Identifier::stream("orders", "o-1"),
            ]
        );
    }

    #[test]
    fn stream_matches_only_its_own_category_and_stream() {
        let id = Identifier::stream("orders", "o-1");
        assert!(id.matches("orders", "o-1"));
        assert!(!id.matches("orders", "o-2"));
        assert!(!id.matches("invoices", "o-1"));
    }

    #[test]
    fn category_matches_any_stream_in_it() {
        let id = Identifier::category("orders");
        assert!(id.matches("orders", "o-1"));
        assert!(id.matches("orders", "o-2"));
        assert!(!id.matches("invoices", "o-1"));
    }

    #[test]
    fn log_matches_everything() {
        assert!(Identifier::Log.matches("orders", "o-1"));
        assert!(Identifier::Log.matches("invoices", "x"));
    }

    #[test]
    fn json_round_trips() {
        let id = Identifier::stream("orders", "o-1");
        let json = serde_json::to_string(&id).unwrap();
        let back: Identifier = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
