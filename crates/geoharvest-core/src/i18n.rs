//! Multilingual metadata fields.
//!
//! Catalog sources publish titles and descriptions in several shapes:
//!
//! ```json
//! "Road network"
//! { "en": "Road network", "de": "Straßennetz" }
//! [ { "@language": "de", "@value": "Straßennetz" } ]
//! ```
//!
//! The first is the common case, the second comes from CKAN instances with
//! multilingual extensions, the third from DCAT JSON-LD. [`LocalizedField`]
//! deserializes all three.

use serde::{Deserialize, Serialize};
use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use std::collections::BTreeMap;
use std::fmt;

/// A field that may be either a plain string or a set of translations.
///
/// # Examples
///
/// ```
/// use geoharvest_core::LocalizedField;
///
/// let plain: LocalizedField = serde_json::from_str(r#""Road network""#).unwrap();
/// assert_eq!(plain.resolve("de"), "Road network");
///
/// let multi: LocalizedField = serde_json::from_str(
///     r#"{"en": "Road network", "de": "Straßennetz"}"#
/// ).unwrap();
/// assert_eq!(multi.resolve("de-CH"), "Straßennetz");
/// assert_eq!(multi.resolve("it"), "Road network"); // falls back to "en"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum LocalizedField {
    Plain(String),
    /// Language code to text. Ordered so the last-resort fallback is stable.
    Multilingual(BTreeMap<String, String>),
}

impl LocalizedField {
    /// Resolves the field to a single string.
    ///
    /// Tries, in order: the preferred language, its primary subtag
    /// (`de-CH` → `de`), `en`, then the first non-empty translation.
    /// Plain strings ignore the language.
    pub fn resolve(&self, preferred_language: &str) -> String {
        match self {
            LocalizedField::Plain(s) => s.clone(),
            LocalizedField::Multilingual(map) => {
                let primary = preferred_language
                    .split(['-', '_'])
                    .next()
                    .unwrap_or(preferred_language);
                [preferred_language, primary, "en"]
                    .iter()
                    .filter_map(|lang| map.get(&lang.to_ascii_lowercase()))
                    .find(|text| !text.trim().is_empty())
                    .or_else(|| map.values().find(|text| !text.trim().is_empty()))
                    .cloned()
                    .unwrap_or_default()
            }
        }
    }

    /// Like [`resolve`](Self::resolve), but `None` for blank results.
    pub fn resolve_non_empty(&self, preferred_language: &str) -> Option<String> {
        let text = self.resolve(preferred_language);
        let trimmed = text.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }
}

impl Default for LocalizedField {
    fn default() -> Self {
        LocalizedField::Plain(String::new())
    }
}

impl From<&str> for LocalizedField {
    fn from(s: &str) -> Self {
        LocalizedField::Plain(s.to_string())
    }
}

#[derive(Deserialize)]
struct TaggedValue {
    #[serde(rename = "@language", default)]
    language: Option<String>,
    #[serde(rename = "@value")]
    value: String,
}

impl<'de> Deserialize<'de> for LocalizedField {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct LocalizedFieldVisitor;

        impl<'de> Visitor<'de> for LocalizedFieldVisitor {
            type Value = LocalizedField;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a string, a map of language codes, or a list of language-tagged values")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<LocalizedField, E> {
                Ok(LocalizedField::Plain(value.to_string()))
            }

            fn visit_string<E: de::Error>(self, value: String) -> Result<LocalizedField, E> {
                Ok(LocalizedField::Plain(value))
            }

            fn visit_unit<E: de::Error>(self) -> Result<LocalizedField, E> {
                Ok(LocalizedField::default())
            }

            fn visit_map<M>(self, map: M) -> Result<LocalizedField, M::Error>
            where
                M: MapAccess<'de>,
            {
                let translations: BTreeMap<String, Option<String>> =
                    Deserialize::deserialize(de::value::MapAccessDeserializer::new(map))?;
                Ok(LocalizedField::Multilingual(
                    translations
                        .into_iter()
                        .filter_map(|(lang, text)| Some((lang.to_ascii_lowercase(), text?)))
                        .collect(),
                ))
            }

            fn visit_seq<S>(self, mut seq: S) -> Result<LocalizedField, S::Error>
            where
                S: SeqAccess<'de>,
            {
                let mut translations = BTreeMap::new();
                while let Some(tagged) = seq.next_element::<TaggedValue>()? {
                    let lang = tagged.language.unwrap_or_default().to_ascii_lowercase();
                    translations.entry(lang).or_insert(tagged.value);
                }
                Ok(LocalizedField::Multilingual(translations))
            }
        }

        deserializer.deserialize_any(LocalizedFieldVisitor)
    }
}
