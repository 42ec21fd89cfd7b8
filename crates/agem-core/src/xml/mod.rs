//! XML persistence of parameter objects.
//!
//! Parameter objects round-trip through three document shapes:
//! `FuzzyInferenceScheme`, `WeightedFuzzyInferenceScheme` (a fuzzy scheme
//! wrapped together with a `Weighting`), and the RothC document handled in
//! the `agem-rothc` crate. Round-trips are lossless modulo formatting;
//! loaders validate structural invariants and report schema errors with the
//! offending element path.

mod fuzzy;
mod weighting;

pub use fuzzy::{read_fuzzy_scheme, write_fuzzy_scheme};
pub use weighting::{
    read_weighted_fuzzy_scheme, read_weighting_scheme, write_weighted_fuzzy_scheme,
    write_weighting_scheme, WeightedFuzzyInferenceScheme,
};

use crate::errors::{AgemError, AgemResult};
use quick_xml::events::BytesStart;
use std::str::FromStr;

/// Namespace URIs emitted on document roots, kept for compatibility with
/// historical parameter files.
pub mod ns {
    pub const FUZZY_INFERENCE_SCHEME: &str =
        "http://tag2e.googlecode.com/files/FuzzyInferenceScheme";
    pub const WEIGHTED_FUZZY_INFERENCE_SCHEME: &str =
        "http://tag2e.googlecode.com/files/WeightedFuzzyInferenceScheme";
    pub const WEIGHTING: &str = "http://tag2e.googlecode.com/files/Weighting";
    pub const ROTHC: &str = "http://tag2e.googlecode.com/files/RothC";
}

/// Build a schema error for an element path.
pub fn schema_error(path: &str, message: impl Into<String>) -> AgemError {
    AgemError::Schema {
        path: path.to_string(),
        message: message.into(),
    }
}

/// Map a quick-xml failure into a schema error.
pub fn xml_error(path: &str, error: quick_xml::Error) -> AgemError {
    schema_error(path, error.to_string())
}

/// Read a required attribute as a string.
pub fn attr_string(element: &BytesStart, name: &str, path: &str) -> AgemResult<String> {
    let attr = element
        .try_get_attribute(name)
        .map_err(|e| schema_error(path, e.to_string()))?
        .ok_or_else(|| schema_error(path, format!("missing attribute '{}'", name)))?;
    let value = attr
        .unescape_value()
        .map_err(|e| xml_error(path, e))?;
    Ok(value.into_owned())
}

/// Read an optional attribute as a string.
pub fn opt_attr_string(
    element: &BytesStart,
    name: &str,
    path: &str,
) -> AgemResult<Option<String>> {
    match element
        .try_get_attribute(name)
        .map_err(|e| schema_error(path, e.to_string()))?
    {
        Some(attr) => Ok(Some(
            attr.unescape_value().map_err(|e| xml_error(path, e))?.into_owned(),
        )),
        None => Ok(None),
    }
}

/// Read a required attribute as a number.
pub fn attr_parse<T: FromStr>(element: &BytesStart, name: &str, path: &str) -> AgemResult<T> {
    let raw = attr_string(element, name, path)?;
    raw.parse().map_err(|_| {
        schema_error(
            path,
            format!("attribute '{}' has malformed value '{}'", name, raw),
        )
    })
}

/// Read an optional numeric attribute, falling back to a default.
pub fn attr_parse_or<T: FromStr>(
    element: &BytesStart,
    name: &str,
    path: &str,
    default: T,
) -> AgemResult<T> {
    match opt_attr_string(element, name, path)? {
        Some(raw) => raw.parse().map_err(|_| {
            schema_error(
                path,
                format!("attribute '{}' has malformed value '{}'", name, raw),
            )
        }),
        None => Ok(default),
    }
}

/// Read a flag attribute: `0`/`1` (also accepts `false`/`true`).
pub fn attr_flag(element: &BytesStart, name: &str, path: &str, default: bool) -> AgemResult<bool> {
    match opt_attr_string(element, name, path)? {
        Some(raw) => match raw.as_str() {
            "0" | "false" => Ok(false),
            "1" | "true" => Ok(true),
            _ => Err(schema_error(
                path,
                format!("attribute '{}' has malformed flag value '{}'", name, raw),
            )),
        },
        None => Ok(default),
    }
}

/// Parse element text as a number.
pub fn parse_text<T: FromStr>(raw: &str, path: &str) -> AgemResult<T> {
    raw.trim().parse().map_err(|_| {
        schema_error(path, format!("malformed numeric value '{}'", raw.trim()))
    })
}

/// Encode a flag as `0`/`1`.
pub fn flag(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}
