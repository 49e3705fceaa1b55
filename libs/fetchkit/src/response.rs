use bytes::Bytes;
use futures::future::BoxFuture;
use http::{HeaderMap, StatusCode};
use serde_json::Value;

use crate::error::Error;

/// The response value threaded through the response pipeline.
///
/// Like [`Request`](crate::request::Request) this is an immutable value
/// type: response interceptors produce a new `Response` rather than
/// mutating in place. The body is fully collected by the transport, so
/// status errors can always include a text rendering of it.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Response {
    /// Create a response value
    #[must_use]
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Canonical reason phrase for the status code (empty for unknown codes).
    ///
    /// HTTP/2 responses carry no reason phrase on the wire, so this is
    /// derived rather than transported.
    #[must_use]
    pub fn status_text(&self) -> &'static str {
        self.status.canonical_reason().unwrap_or("")
    }

    /// The Content-Type header as a string, if present and valid UTF-8
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
    }

    /// Best-effort text rendering of the body; invalid UTF-8 sequences are
    /// replaced with the Unicode replacement character
    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Custom response materializer configured per instance.
///
/// When set, it fully determines the unwrapped value and the default
/// content-type inspection is skipped.
pub type UnwrapFn = dyn Fn(Response) -> BoxFuture<'static, Result<Value, Error>> + Send + Sync;

/// Convert any response outside the inclusive 200–299 range into a status
/// error carrying code, status text and the body as text. Success
/// responses pass through unmodified.
pub(crate) fn check_status(response: Response) -> Result<Response, Error> {
    if response.status.is_success() {
        return Ok(response);
    }
    Err(Error::Status {
        status: response.status,
        status_text: response.status_text().to_owned(),
        body: response.body_text(),
    })
}

/// Default unwrap behavior: a Content-Type containing `application/json`
/// materializes via JSON parsing, anything else via text decoding.
pub(crate) fn unwrap_body(response: &Response) -> Result<Value, Error> {
    let is_json = response
        .content_type()
        .is_some_and(|ct| ct.contains("application/json"));
    if is_json {
        Ok(serde_json::from_slice(&response.body)?)
    } else {
        Ok(Value::String(response.body_text()))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(status: u16, content_type: Option<&str>, body: &str) -> Response {
        let mut headers = HeaderMap::new();
        if let Some(ct) = content_type {
            headers.insert(http::header::CONTENT_TYPE, ct.parse().unwrap());
        }
        Response::new(
            StatusCode::from_u16(status).unwrap(),
            headers,
            Bytes::from(body.to_owned()),
        )
    }

    #[test]
    fn check_status_passes_the_success_range() {
        assert!(check_status(response(200, None, "")).is_ok());
        assert!(check_status(response(204, None, "")).is_ok());
        assert!(check_status(response(299, None, "")).is_ok());
    }

    #[test]
    fn check_status_rejects_outside_the_range() {
        for status in [199, 300, 301, 404, 500] {
            let err = check_status(response(status, None, "details")).unwrap_err();
            match err {
                Error::Status {
                    status: code, body, ..
                } => {
                    assert_eq!(code.as_u16(), status);
                    assert_eq!(body, "details");
                }
                other => panic!("expected Status, got: {other:?}"),
            }
        }
    }

    #[test]
    fn check_status_carries_the_canonical_reason() {
        let err = check_status(response(404, None, "")).unwrap_err();
        match err {
            Error::Status { status_text, .. } => assert_eq!(status_text, "Not Found"),
            other => panic!("expected Status, got: {other:?}"),
        }
    }

    #[test]
    fn unwrap_parses_json_content_types() {
        let resp = response(200, Some("application/json"), r#"{"ok":true}"#);
        assert_eq!(unwrap_body(&resp).unwrap(), json!({"ok": true}));
    }

    #[test]
    fn unwrap_matches_json_content_types_with_parameters() {
        let resp = response(
            200,
            Some("application/json; charset=utf-8"),
            r#"[1, 2, 3]"#,
        );
        assert_eq!(unwrap_body(&resp).unwrap(), json!([1, 2, 3]));
    }

    #[test]
    fn unwrap_falls_back_to_text() {
        let resp = response(200, Some("text/plain"), "hello");
        assert_eq!(unwrap_body(&resp).unwrap(), json!("hello"));

        let resp = response(200, None, "no content type");
        assert_eq!(unwrap_body(&resp).unwrap(), json!("no content type"));
    }

    #[test]
    fn unwrap_surfaces_json_parse_failures() {
        let resp = response(200, Some("application/json"), "{not json");
        assert!(matches!(unwrap_body(&resp), Err(Error::Json(_))));
    }
}
