use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Wrapper for customer identity data (ID numbers, e-mail, phone).
///
/// `Debug` and `Display` only reveal the last few characters so that
/// `tracing::debug!("{:?}", booking)` cannot leak a passport number.
/// Serialization is transparent because storage and the payment gateway
/// need the real value.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Masked<T>(pub T);

const VISIBLE_TAIL: usize = 3;

impl<T: AsRef<str>> Masked<T> {
    pub fn expose(&self) -> &str {
        self.0.as_ref()
    }

    pub fn is_blank(&self) -> bool {
        self.0.as_ref().trim().is_empty()
    }

    fn redacted(&self) -> String {
        let raw = self.0.as_ref();
        let count = raw.chars().count();
        if count <= VISIBLE_TAIL * 2 {
            return "********".to_string();
        }
        let tail: String = raw.chars().skip(count - VISIBLE_TAIL).collect();
        format!("*****{tail}")
    }
}

impl<T> Masked<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T: AsRef<str>> fmt::Debug for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

impl<T: AsRef<str>> fmt::Display for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

impl<T: Serialize> Serialize for Masked<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Masked<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        T::deserialize(deserializer).map(Masked)
    }
}

impl From<&str> for Masked<String> {
    fn from(value: &str) -> Self {
        Masked(value.to_string())
    }
}

impl From<String> for Masked<String> {
    fn from(value: String) -> Self {
        Masked(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_hides_all_but_tail() {
        let id = Masked::from("3174012345678901");
        assert_eq!(format!("{id:?}"), "*****901");
        assert_eq!(id.to_string(), "*****901");
    }

    #[test]
    fn short_values_are_fully_hidden() {
        let id = Masked::from("A1B2");
        assert_eq!(format!("{id:?}"), "********");
    }

    #[test]
    fn serializes_transparently() {
        let email = Masked::from("budi@example.com");
        let json = serde_json::to_string(&email).unwrap();
        assert_eq!(json, "\"budi@example.com\"");

        let back: Masked<String> = serde_json::from_str(&json).unwrap();
        assert_eq!(back.expose(), "budi@example.com");
    }

    #[test]
    fn blank_detection_ignores_whitespace() {
        assert!(Masked::from("   ").is_blank());
        assert!(!Masked::from("KTP").is_blank());
    }
}
