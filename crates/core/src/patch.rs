//! Field-level patch values for partial updates.
//!
//! A `Patch<T>` distinguishes "the caller did not mention this field" from
//! "the caller wants this value written". Nullable fields use
//! `Patch<Option<T>>`, so `Patch::Set(None)` clears the field while
//! `Patch::Unchanged` leaves it alone.
//!
//! Serde mapping (use together with `#[serde(default, skip_serializing_if =
//! "Patch::is_unchanged")]` on the field):
//!
//! | document | value |
//! |----------|-------|
//! | key absent | `Patch::Unchanged` |
//! | `"key": null` | `Patch::Set(None)` (for `Patch<Option<T>>`) |
//! | `"key": v` | `Patch::Set(v)` |

use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Patch<T> {
    /// Leave the stored value untouched.
    Unchanged,
    /// Overwrite the stored value.
    Set(T),
}

impl<T> Patch<T> {
    pub fn is_unchanged(&self) -> bool {
        matches!(self, Patch::Unchanged)
    }

    pub fn as_set(&self) -> Option<&T> {
        match self {
            Patch::Set(v) => Some(v),
            Patch::Unchanged => None,
        }
    }

    /// Write the patched value into `target`, if any.
    pub fn apply_to(self, target: &mut T) {
        if let Patch::Set(v) = self {
            *target = v;
        }
    }
}

impl<T> Default for Patch<T> {
    fn default() -> Self {
        Patch::Unchanged
    }
}

impl<T> From<T> for Patch<T> {
    fn from(value: T) -> Self {
        Patch::Set(value)
    }
}

impl<T: Serialize> Serialize for Patch<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Patch::Set(v) => v.serialize(serializer),
            // Only reached when the field is not marked `skip_serializing_if`.
            Patch::Unchanged => serializer.serialize_none(),
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Patch<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        T::deserialize(deserializer).map(Patch::Set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Changes {
        #[serde(default, skip_serializing_if = "Patch::is_unchanged")]
        name: Patch<String>,
        #[serde(default, skip_serializing_if = "Patch::is_unchanged")]
        note: Patch<Option<String>>,
    }

    #[test]
    fn absent_field_is_unchanged() {
        let changes: Changes = serde_json::from_value(json!({})).unwrap();
        assert_eq!(changes, Changes::default());
    }

    #[test]
    fn explicit_null_clears_nullable_field() {
        let changes: Changes = serde_json::from_value(json!({ "note": null })).unwrap();
        assert_eq!(changes.note, Patch::Set(None));
        assert!(changes.name.is_unchanged());
    }

    #[test]
    fn only_set_fields_are_serialized() {
        let changes = Changes {
            name: Patch::Set("renamed".to_string()),
            note: Patch::Unchanged,
        };
        assert_eq!(serde_json::to_value(&changes).unwrap(), json!({ "name": "renamed" }));

        let cleared = Changes {
            name: Patch::Unchanged,
            note: Patch::Set(None),
        };
        assert_eq!(serde_json::to_value(&cleared).unwrap(), json!({ "note": null }));
    }

    #[test]
    fn apply_to_leaves_target_alone_when_unchanged() {
        let mut value = 7;
        Patch::Unchanged.apply_to(&mut value);
        assert_eq!(value, 7);
        Patch::Set(9).apply_to(&mut value);
        assert_eq!(value, 9);
    }

    proptest! {
        /// Property: the serialized key set is exactly the set of `Set` fields.
        #[test]
        fn serialized_keys_match_set_fields(
            name in proptest::option::of("[a-z]{1,12}"),
            note in proptest::option::of(proptest::option::of("[a-z ]{0,20}")),
        ) {
            let changes = Changes {
                name: name.clone().map(Patch::Set).unwrap_or_default(),
                note: note.clone().map(Patch::Set).unwrap_or_default(),
            };
            let value = serde_json::to_value(&changes).unwrap();
            let doc = value.as_object().unwrap();

            prop_assert_eq!(doc.contains_key("name"), name.is_some());
            prop_assert_eq!(doc.contains_key("note"), note.is_some());

            let back: Changes = serde_json::from_value(value).unwrap();
            prop_assert_eq!(back, changes);
        }
    }
}
