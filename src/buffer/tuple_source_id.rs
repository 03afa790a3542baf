//! Tuple source identity.
//!
//! The external string form is `location:id_value`, or the bare `id_value`
//! when there is no location. Equality and hashing use `id_value` alone: two
//! ids minted at different locations with the same id value are the same
//! tuple source. Callers that mint ids must therefore keep id values unique
//! across locations (the buffer manager does so with a single counter).

use std::hash::{Hash, Hasher};

use eyre::{bail, Result};

use super::BufferError;

#[derive(Debug, Clone)]
pub struct TupleSourceId {
    id_value: String,
    location: Option<String>,
}

impl TupleSourceId {
    pub fn new(id_value: impl Into<String>, location: Option<&str>) -> Self {
        Self {
            id_value: id_value.into(),
            location: location.map(str::to_string),
        }
    }

    /// Parses the external form. The first `:` separates the location.
    pub fn parse(string_id: &str) -> Result<Self> {
        let (location, id_value) = match string_id.split_once(':') {
            Some((location, id_value)) => (Some(location), id_value),
            None => (None, string_id),
        };

        if id_value.is_empty() {
            bail!(BufferError::InvalidTupleSourceId(string_id.to_string()));
        }

        Ok(Self::new(id_value, location.filter(|l| !l.is_empty())))
    }

    pub fn id_value(&self) -> &str {
        &self.id_value
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn string_id(&self) -> String {
        self.to_string()
    }
}

impl PartialEq for TupleSourceId {
    fn eq(&self, other: &Self) -> bool {
        self.id_value == other.id_value
    }
}

impl Eq for TupleSourceId {}

impl Hash for TupleSourceId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id_value.hash(state);
    }
}

impl std::fmt::Display for TupleSourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{}:{}", location, self.id_value),
            None => f.write_str(&self.id_value),
        }
    }
}

impl std::str::FromStr for TupleSourceId {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_splits_on_first_colon() {
        let id = TupleSourceId::parse("a:b").unwrap();
        assert_eq!(id.location(), Some("a"));
        assert_eq!(id.id_value(), "b");
        assert_eq!(id.string_id(), "a:b");

        let id = TupleSourceId::parse("host:9:1").unwrap();
        assert_eq!(id.location(), Some("host"));
        assert_eq!(id.id_value(), "9:1");
    }

    #[test]
    fn bare_id_has_no_location() {
        let id = TupleSourceId::parse("42").unwrap();
        assert_eq!(id.location(), None);
        assert_eq!(id.string_id(), "42");
    }

    #[test]
    fn empty_id_value_is_rejected() {
        let err = TupleSourceId::parse("a:").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BufferError>(),
            Some(BufferError::InvalidTupleSourceId(_))
        ));
        assert!(TupleSourceId::parse("").is_err());
    }

    #[test]
    fn identity_ignores_location() {
        assert_ne!(
            TupleSourceId::new("x", Some("a")),
            TupleSourceId::new("y", Some("a"))
        );
        assert_eq!(
            TupleSourceId::new("x", Some("a")),
            TupleSourceId::new("x", Some("b"))
        );

        let mut set = hashbrown::HashSet::new();
        set.insert(TupleSourceId::new("x", Some("a")));
        assert!(set.contains(&TupleSourceId::new("x", None)));
    }
}
