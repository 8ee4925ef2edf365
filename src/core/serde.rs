/*!
 * Serde Helper Functions
 * Skip predicates and serializers for `#[serde(...)]` attributes
 */

use serde::ser::SerializeSeq;
use serde::Serializer;

/// Skip serializing if value is false
#[inline]
pub const fn is_false(value: &bool) -> bool {
    !*value
}

/// Skip serializing if Option is None
#[inline]
pub const fn is_none<T>(value: &Option<T>) -> bool {
    value.is_none()
}

/// Skip serializing if Vec is empty
#[inline]
pub fn is_empty_vec<T>(value: &Vec<T>) -> bool {
    value.is_empty()
}

/// Serialize captured bytes as (lossy) UTF-8 text
pub fn lossy_text<S: Serializer>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(bytes) => serializer.serialize_str(&String::from_utf8_lossy(bytes)),
        None => serializer.serialize_none(),
    }
}

/// Serialize one captured buffer per descriptor as (lossy) UTF-8 text
pub fn lossy_text_slots<S: Serializer>(
    value: &[Option<Vec<u8>>],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let mut seq = serializer.serialize_seq(Some(value.len()))?;
    for slot in value {
        seq.serialize_element(&slot.as_deref().map(String::from_utf8_lossy))?;
    }
    seq.end()
}
