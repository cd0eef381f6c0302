// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Wire encoding helpers shared by the durable slots and the export envelope.

use serde::Serialize;

use super::StoreError;

/// Serde adapter for set-valued fields.
///
/// Writes `{"__type":"Set","value":[...]}`. Reads either that tagged form
/// or a plain array.
///
/// ```
/// use std::collections::BTreeSet;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize, PartialEq, Debug)]
/// struct Days {
///     #[serde(with = "schedule_sync::durable::codec::tagged_set")]
///     days: BTreeSet<String>,
/// }
///
/// let days = Days { days: ["mon".to_string()].into_iter().collect() };
/// let json = serde_json::to_string(&days).unwrap();
/// assert_eq!(json, r#"{"days":{"__type":"Set","value":["mon"]}}"#);
///
/// let plain: Days = serde_json::from_str(r#"{"days":["mon"]}"#).unwrap();
/// assert_eq!(plain, days);
/// ```
pub mod tagged_set {
    use std::collections::BTreeSet;

    use serde::de::{self, Deserializer};
    use serde::ser::{SerializeStruct, Serializer};
    use serde::Deserialize;

    pub const TYPE_TAG: &str = "Set";

    pub fn serialize<T, S>(set: &BTreeSet<T>, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: serde::Serialize,
        S: Serializer,
    {
        let mut tagged = serializer.serialize_struct("TaggedSet", 2)?;
        tagged.serialize_field("__type", TYPE_TAG)?;
        tagged.serialize_field("value", set)?;
        tagged.end()
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr<T: Ord> {
        Tagged {
            #[serde(rename = "__type")]
            kind: String,
            value: BTreeSet<T>,
        },
        Plain(BTreeSet<T>),
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<BTreeSet<T>, D::Error>
    where
        T: Deserialize<'de> + Ord,
        D: Deserializer<'de>,
    {
        match Repr::deserialize(deserializer)? {
            Repr::Tagged { kind, value } if kind == TYPE_TAG => Ok(value),
            Repr::Tagged { kind, .. } => Err(de::Error::custom(format!(
                "expected tagged type '{TYPE_TAG}', found '{kind}'"
            ))),
            Repr::Plain(value) => Ok(value),
        }
    }
}

/// Canonical JSON text: object keys sorted, no insignificant whitespace.
///
/// Goes through `serde_json::Value`, whose map is ordered by key.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, StoreError> {
    let value = serde_json::to_value(value).map_err(|e| StoreError::Serialization(e.to_string()))?;
    serde_json::to_string(&value).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Rolling 32-bit hash `h = h * 31 + unit` over UTF-16 code units, rendered
/// as a signed decimal.
///
/// Detects accidental corruption only.
#[must_use]
pub fn checksum(text: &str) -> String {
    let hash = text
        .encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(i32::from(unit)));
    hash.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeSet;

    #[test]
    fn test_checksum_known_values() {
        assert_eq!(checksum(""), "0");
        assert_eq!(checksum("a"), "97");
        assert_eq!(checksum("ab"), (97 * 31 + 98).to_string());
        // Matches Java-style String.hashCode
        assert_eq!(checksum("hello"), "99162322");
    }

    #[test]
    fn test_checksum_wraps_to_negative() {
        let long = "z".repeat(64);
        let value: i64 = checksum(&long).parse().unwrap();
        assert!(value >= i64::from(i32::MIN) && value <= i64::from(i32::MAX));
    }

    #[test]
    fn test_checksum_uses_utf16_units() {
        // U+1F600 is a surrogate pair: two units
        let expected = 0xD83Di32.wrapping_mul(31).wrapping_add(0xDE00);
        assert_eq!(checksum("\u{1F600}"), expected.to_string());
    }

    #[test]
    fn test_canonical_json_sorts_keys() {
        let a = canonical_json(&json!({"b": 1, "a": {"d": 2, "c": 3}})).unwrap();
        assert_eq!(a, r#"{"a":{"c":3,"d":2},"b":1}"#);
    }

    #[derive(serde::Serialize, serde::Deserialize, Debug, PartialEq)]
    struct Holder {
        #[serde(with = "tagged_set")]
        days: BTreeSet<String>,
    }

    #[test]
    fn test_tagged_set_rejects_other_tag() {
        let err = serde_json::from_str::<Holder>(r#"{"days":{"__type":"Map","value":[]}}"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_tagged_set_dedupes_plain_array() {
        let h: Holder = serde_json::from_str(r#"{"days":["mon","mon","tue"]}"#).unwrap();
        assert_eq!(h.days.len(), 2);
    }
}
