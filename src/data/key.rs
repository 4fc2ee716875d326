use std::fmt;

use serde::{Serialize, Serializer};

/// Bucket key. Dex keys order numerically and sort before name keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    Dex(u32),
    Name(String),
}

impl Key {
    pub fn name(name: impl Into<String>) -> Self {
        Self::Name(name.into())
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            Self::Name(name) => Some(name),
            Self::Dex(_) => None,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dex(dex) => write!(f, "#{dex}"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

/// Summary files carry dex keys as numbers and names as strings.
impl Serialize for Key {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Dex(dex) => serializer.serialize_u32(*dex),
            Self::Name(name) => serializer.serialize_str(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_puts_dex_first_numerically() {
        let mut keys = vec![
            Key::name("Bulbasaur"),
            Key::Dex(100),
            Key::name("Abra"),
            Key::Dex(29),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![Key::Dex(29), Key::Dex(100), Key::name("Abra"), Key::name("Bulbasaur")]
        );
    }

    #[test]
    fn serializes_untagged() {
        let json = serde_json::to_string(&vec![Key::Dex(25), Key::name("Pikachu")]).unwrap();
        assert_eq!(json, r#"[25,"Pikachu"]"#);
    }
}
