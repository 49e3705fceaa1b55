use std::time::Duration;

use http::{HeaderMap, Method};
use serde_json::Value;
use url::form_urlencoded;

use crate::error::Error;

/// The request value threaded through the request pipeline.
///
/// Treated as an immutable value: every stage that changes it produces a
/// new `Request`, so the last successfully built request is always
/// available for error context even if a later stage fails.
///
/// `url` stays an opaque string so relative paths flow through to
/// transports that can resolve them; query parameters are appended
/// textually during the build step.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    /// Validated body exactly as the body schema produced it; the engine
    /// never serializes it
    pub body: Option<Value>,
    /// Per-call timeout forwarded to the transport
    pub timeout: Option<Duration>,
}

/// One validated query value: a scalar or a repeated key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum QueryValue {
    One(String),
    Many(Vec<String>),
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn scalar_text(key: &str, value: &Value) -> Result<String, Error> {
    match value {
        Value::String(text) => Ok(text.clone()),
        Value::Number(number) => Ok(number.to_string()),
        Value::Bool(flag) => Ok(flag.to_string()),
        other => Err(Error::ParamSerialization {
            key: key.to_owned(),
            reason: format!("expected a string-like scalar, got {}", kind_of(other)),
        }),
    }
}

fn query_value(key: &str, value: &Value) -> Result<QueryValue, Error> {
    match value {
        Value::Array(items) => {
            let texts = items
                .iter()
                .map(|item| scalar_text(key, item))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(QueryValue::Many(texts))
        }
        other => scalar_text(key, other).map(QueryValue::One),
    }
}

/// Flatten a validated params value into query pairs.
///
/// The params schema output must be representable as a flat mapping of
/// string or string-array values; anything else fails with
/// [`Error::ParamSerialization`], distinct from a validation error.
/// `Null` (no params supplied against an accept-anything schema) flattens
/// to the empty list.
pub(crate) fn query_pairs(params: &Value) -> Result<Vec<(String, QueryValue)>, Error> {
    match params {
        Value::Null => Ok(Vec::new()),
        Value::Object(map) => map
            .iter()
            .map(|(key, value)| Ok((key.clone(), query_value(key, value)?)))
            .collect(),
        other => Err(Error::ParamSerialization {
            key: String::new(),
            reason: format!("expected an object of query parameters, got {}", kind_of(other)),
        }),
    }
}

/// Append query pairs to a URL string.
///
/// Array values produce one query-parameter occurrence per element, in
/// array order. A URL that already carries a query gets the new pairs
/// appended after `&`.
pub(crate) fn append_query(url: &str, pairs: &[(String, QueryValue)]) -> String {
    if pairs.is_empty() {
        return url.to_owned();
    }
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in pairs {
        match value {
            QueryValue::One(text) => {
                serializer.append_pair(key, text);
            }
            QueryValue::Many(texts) => {
                for text in texts {
                    serializer.append_pair(key, text);
                }
            }
        }
    }
    let query = serializer.finish();
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}{query}")
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn query_pairs_flattens_scalars() {
        let pairs = query_pairs(&json!({"id": "42", "page": 3, "all": true})).unwrap();
        assert_eq!(pairs.len(), 3);
        assert!(pairs.contains(&("id".to_owned(), QueryValue::One("42".to_owned()))));
        assert!(pairs.contains(&("page".to_owned(), QueryValue::One("3".to_owned()))));
        assert!(pairs.contains(&("all".to_owned(), QueryValue::One("true".to_owned()))));
    }

    #[test]
    fn query_pairs_keeps_array_order() {
        let pairs = query_pairs(&json!({"tag": ["a", "b", "c"]})).unwrap();
        assert_eq!(
            pairs,
            vec![(
                "tag".to_owned(),
                QueryValue::Many(vec!["a".to_owned(), "b".to_owned(), "c".to_owned()])
            )]
        );
    }

    #[test]
    fn query_pairs_accepts_null_as_empty() {
        assert!(query_pairs(&Value::Null).unwrap().is_empty());
    }

    #[test]
    fn query_pairs_rejects_non_objects() {
        let err = query_pairs(&json!("flat")).unwrap_err();
        match err {
            Error::ParamSerialization { reason, .. } => {
                assert!(reason.contains("got a string"));
            }
            other => panic!("expected ParamSerialization, got: {other:?}"),
        }
    }

    #[test]
    fn query_pairs_rejects_nested_values() {
        let err = query_pairs(&json!({"filter": {"deep": true}})).unwrap_err();
        match err {
            Error::ParamSerialization { key, .. } => assert_eq!(key, "filter"),
            other => panic!("expected ParamSerialization, got: {other:?}"),
        }

        let err = query_pairs(&json!({"matrix": [[1, 2]]})).unwrap_err();
        assert!(matches!(err, Error::ParamSerialization { .. }));

        let err = query_pairs(&json!({"missing": null})).unwrap_err();
        assert!(matches!(err, Error::ParamSerialization { .. }));
    }

    #[test]
    fn append_query_repeats_array_keys_in_order() {
        let pairs = query_pairs(&json!({"tag": ["x", "y"]})).unwrap();
        assert_eq!(append_query("/list", &pairs), "/list?tag=x&tag=y");
    }

    #[test]
    fn append_query_extends_an_existing_query() {
        let pairs = query_pairs(&json!({"b": "2"})).unwrap();
        assert_eq!(append_query("/list?a=1", &pairs), "/list?a=1&b=2");
    }

    #[test]
    fn append_query_percent_encodes() {
        let pairs = query_pairs(&json!({"q": "a b&c"})).unwrap();
        assert_eq!(append_query("/search", &pairs), "/search?q=a+b%26c");
    }

    #[test]
    fn append_query_leaves_urls_without_params_untouched() {
        assert_eq!(append_query("/plain", &[]), "/plain");
    }
}
