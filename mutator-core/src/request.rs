//! Minimal HTTP/1.x request model
//!
//! Holds the pieces the mutation pipeline reads and rewrites: the target
//! service, the request line, ordered headers and a text body. Parameters are
//! derived from the query string, `Cookie` headers, and form or JSON bodies,
//! and are rewritten in place so untouched bytes survive a round trip.

use crate::error::{MutatorError, MutatorResult, ReassemblyError};
use hyper::header::{HeaderName, HeaderValue};
use hyper::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::ops::Range;

/// Where a request is being sent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpService {
    pub host: String,
    pub port: i32,
    pub secure: bool,
}

impl HttpService {
    pub fn new(host: &str, port: i32, secure: bool) -> Self {
        Self {
            host: host.to_string(),
            port,
            secure,
        }
    }

    /// `scheme://host`, with `:port` only for a non-default positive port
    pub fn origin(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        let is_standard = (!self.secure && self.port == 80) || (self.secure && self.port == 443);

        if is_standard || self.port <= 0 {
            format!("{}://{}", scheme, self.host)
        } else {
            format!("{}://{}:{}", scheme, self.host, self.port)
        }
    }
}

/// Location of a parameter in the message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParameterType {
    /// Query string of the request target
    Url,
    /// `application/x-www-form-urlencoded` body
    Body,
    /// `Cookie` header
    Cookie,
    /// Top-level member of a JSON object body
    Json,
}

/// A parsed request parameter.
///
/// URL, body and cookie values are the text as sent, without decoding. JSON
/// values are the member's string contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub value: String,
    pub kind: ParameterType,
}

impl Parameter {
    pub fn new(name: &str, value: &str, kind: ParameterType) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            kind,
        }
    }

    /// Same parameter with a different value
    pub fn with_value(&self, value: &str) -> Self {
        Self {
            name: self.name.clone(),
            value: value.to_string(),
            kind: self.kind,
        }
    }
}

/// An HTTP request as seen by the mutation pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    service: HttpService,
    method: Method,
    path: String,
    version: String,
    headers: Vec<(String, String)>,
    body: String,
}

impl HttpRequest {
    /// Create a request with no headers and an empty body
    pub fn new(service: HttpService, method: Method, path: &str) -> Self {
        Self {
            service,
            method,
            path: path.to_string(),
            version: "HTTP/1.1".to_string(),
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// Parse a raw message.
    ///
    /// Accepts CRLF or bare LF line endings. A message without a blank line
    /// is treated as headers only. Header lines that are not valid headers
    /// are skipped.
    pub fn parse(service: HttpService, raw: &str) -> Result<Self, ReassemblyError> {
        let (head, body) = split_message(raw).unwrap_or((raw.trim_end_matches(['\r', '\n']), ""));
        let mut lines = head_lines(head);

        let request_line = lines
            .next()
            .filter(|line| !line.trim().is_empty())
            .ok_or(ReassemblyError::MissingRequestLine)?;
        let (method, path, version) = parse_request_line(request_line)?;

        let mut request = Self {
            service,
            method,
            path,
            version,
            headers: Vec::new(),
            body: body.to_string(),
        };

        for line in lines {
            if let Some((name, value)) = split_header_line(line) {
                if let Err(e) = request.add_header(name, value) {
                    tracing::debug!("Skipping header line: {}", e);
                }
            }
        }

        Ok(request)
    }

    pub fn service(&self) -> &HttpService {
        &self.service
    }

    pub fn origin(&self) -> String {
        self.service.origin()
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Request target including the query string
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// First header with the given name (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Replace the request line from its textual form
    pub fn set_request_line(&mut self, line: &str) -> Result<(), ReassemblyError> {
        let (method, path, version) = parse_request_line(line)?;
        self.method = method;
        self.path = path;
        self.version = version;
        Ok(())
    }

    /// Append a header after validating its name and value
    pub fn add_header(&mut self, name: &str, value: &str) -> MutatorResult<()> {
        HeaderName::from_bytes(name.as_bytes()).map_err(|e| MutatorError::InvalidHeader {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        HeaderValue::from_str(value).map_err(|e| MutatorError::InvalidHeader {
            name: name.to_string(),
            reason: e.to_string(),
        })?;

        self.headers.push((name.to_string(), value.to_string()));
        Ok(())
    }

    /// Set a header, replacing the first one with the same name
    pub fn set_header(&mut self, name: &str, value: &str) -> MutatorResult<()> {
        match self.headers.iter().position(|(n, _)| n.eq_ignore_ascii_case(name)) {
            Some(index) => {
                HeaderValue::from_str(value).map_err(|e| MutatorError::InvalidHeader {
                    name: name.to_string(),
                    reason: e.to_string(),
                })?;
                self.headers[index].1 = value.to_string();
                Ok(())
            }
            None => self.add_header(name, value),
        }
    }

    pub fn set_body(&mut self, body: &str) {
        self.body = body.to_string();
    }

    /// Whether a `Transfer-Encoding` header declares chunked framing
    pub fn is_chunked(&self) -> bool {
        self.headers.iter().any(|(n, v)| {
            n.eq_ignore_ascii_case("transfer-encoding") && v.to_ascii_lowercase().contains("chunked")
        })
    }

    /// Serialize as `request-line CRLF (header CRLF)* CRLF body`
    pub fn to_raw(&self) -> String {
        let mut raw = format!("{} {} {}\r\n", self.method, self.path, self.version);
        for (name, value) in &self.headers {
            raw.push_str(name);
            raw.push_str(": ");
            raw.push_str(value);
            raw.push_str("\r\n");
        }
        raw.push_str("\r\n");
        raw.push_str(&self.body);
        raw
    }

    /// All parameters in message order: query, cookies, then body
    pub fn parameters(&self) -> Vec<Parameter> {
        let mut params = Vec::new();

        if let Some(query) = self.query() {
            params.extend(pairs_to_params(query, &split_pairs(query, '&', false), ParameterType::Url));
        }

        for (name, value) in &self.headers {
            if name.eq_ignore_ascii_case("cookie") {
                params.extend(pairs_to_params(value, &split_pairs(value, ';', true), ParameterType::Cookie));
            }
        }

        match self.body_kind() {
            Some(ParameterType::Body) => {
                params.extend(pairs_to_params(&self.body, &split_pairs(&self.body, '&', false), ParameterType::Body));
            }
            Some(ParameterType::Json) => params.extend(json_params(&self.body)),
            _ => {}
        }

        params
    }

    /// Copy of this request with parameter values replaced.
    ///
    /// Each given parameter replaces the same occurrence (by type and name)
    /// of the parameter in this request. Bytes around changed values are left
    /// as they were. An existing `Content-Length` follows the body unless the
    /// body is chunked.
    pub fn with_updated_parameters(&self, updates: &[Parameter]) -> HttpRequest {
        let mut cursor = UpdateCursor::new(updates);
        let rewritten: Vec<Parameter> = self
            .parameters()
            .into_iter()
            .map(|param| match cursor.next_value(param.kind, &param.name) {
                Some(value) => param.with_value(value),
                None => param,
            })
            .collect();
        self.with_rewritten_parameters(&rewritten)
    }

    /// Copy of this request with every parameter rewritten by position.
    ///
    /// `rewritten[i]` replaces the name and value of `parameters()[i]`;
    /// parameters past the end of `rewritten` are kept.
    pub fn with_rewritten_parameters(&self, rewritten: &[Parameter]) -> HttpRequest {
        let mut slots = rewritten.iter();
        let mut updated = self.clone();

        if let Some(query) = self.query() {
            let new_query = rewrite_pairs(query, &split_pairs(query, '&', false), &mut slots);
            let base = &self.path[..self.path.len() - query.len() - 1];
            updated.path = format!("{}?{}", base, new_query);
        }

        for (name, value) in updated.headers.iter_mut() {
            if name.eq_ignore_ascii_case("cookie") {
                let spans = split_pairs(value, ';', true);
                *value = rewrite_pairs(value, &spans, &mut slots);
            }
        }

        match self.body_kind() {
            Some(ParameterType::Body) => {
                updated.body = rewrite_pairs(&self.body, &split_pairs(&self.body, '&', false), &mut slots);
            }
            Some(ParameterType::Json) => {
                if let Some(body) = rewrite_json(&self.body, &mut slots) {
                    updated.body = body;
                }
            }
            _ => {}
        }

        if updated.body.len() != self.body.len() {
            updated.sync_content_length();
        }

        updated
    }

    fn sync_content_length(&mut self) {
        if self.is_chunked() {
            return;
        }
        let length = self.body.len().to_string();
        for (name, value) in self.headers.iter_mut() {
            if name.eq_ignore_ascii_case("content-length") {
                *value = length.clone();
            }
        }
    }

    fn query(&self) -> Option<&str> {
        self.path.split_once('?').map(|(_, query)| query)
    }

    fn body_kind(&self) -> Option<ParameterType> {
        let content_type = self.header("content-type")?.to_ascii_lowercase();
        if content_type.contains("application/x-www-form-urlencoded") {
            Some(ParameterType::Body)
        } else if content_type.contains("json") {
            Some(ParameterType::Json)
        } else {
            None
        }
    }
}

/// Split a raw message at the first blank line into head and body
pub fn split_message(raw: &str) -> Option<(&str, &str)> {
    let crlf = raw.find("\r\n\r\n").map(|i| (i, 4));
    let lf = raw.find("\n\n").map(|i| (i, 2));

    let (index, separator) = match (crlf, lf) {
        (Some(a), Some(b)) => {
            if a.0 <= b.0 {
                a
            } else {
                b
            }
        }
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => return None,
    };

    Some((&raw[..index], &raw[index + separator..]))
}

/// Lines of a message head with line terminators removed
pub fn head_lines(head: &str) -> impl Iterator<Item = &str> {
    head.split('\n').map(|line| line.strip_suffix('\r').unwrap_or(line))
}

/// Split `Name: value` at the first colon
pub fn split_header_line(line: &str) -> Option<(&str, &str)> {
    let (name, value) = line.split_once(':')?;
    Some((name.trim(), value.trim()))
}

fn parse_request_line(line: &str) -> Result<(Method, String, String), ReassemblyError> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let [method, path, version] = parts.as_slice() else {
        return Err(ReassemblyError::MalformedRequestLine {
            line: line.to_string(),
        });
    };

    if !version.starts_with("HTTP/") {
        return Err(ReassemblyError::MalformedRequestLine {
            line: line.to_string(),
        });
    }

    let method = Method::from_bytes(method.as_bytes()).map_err(|_| ReassemblyError::InvalidMethod {
        method: method.to_string(),
    })?;

    Ok((method, path.to_string(), version.to_string()))
}

/// Byte ranges of one `name=value` pair
#[derive(Debug, Clone)]
struct PairSpan {
    name: Range<usize>,
    /// `None` when the pair has no `=`
    value: Option<Range<usize>>,
}

fn split_pairs(text: &str, separator: char, trim_start: bool) -> Vec<PairSpan> {
    let mut spans = Vec::new();
    let mut offset = 0;

    for segment in text.split(separator) {
        let segment_start = offset;
        offset += segment.len() + separator.len_utf8();

        let skipped = if trim_start {
            segment.len() - segment.trim_start().len()
        } else {
            0
        };
        let segment = &segment[skipped..];
        if segment.is_empty() {
            continue;
        }

        let start = segment_start + skipped;
        let span = match segment.find('=') {
            Some(eq) => PairSpan {
                name: start..start + eq,
                value: Some(start + eq + 1..start + segment.len()),
            },
            None => PairSpan {
                name: start..start + segment.len(),
                value: None,
            },
        };
        spans.push(span);
    }

    spans
}

fn pairs_to_params(text: &str, spans: &[PairSpan], kind: ParameterType) -> Vec<Parameter> {
    spans
        .iter()
        .map(|span| Parameter {
            name: text[span.name.clone()].to_string(),
            value: span.value.clone().map(|v| text[v].to_string()).unwrap_or_default(),
            kind,
        })
        .collect()
}

fn rewrite_pairs(text: &str, spans: &[PairSpan], slots: &mut std::slice::Iter<'_, Parameter>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut copied = 0;

    for span in spans {
        let Some(param) = slots.next() else {
            break;
        };

        out.push_str(&text[copied..span.name.start]);
        out.push_str(&param.name);
        match &span.value {
            Some(range) => {
                out.push_str(&text[span.name.end..range.start]);
                out.push_str(&param.value);
                copied = range.end;
            }
            None => {
                if !param.value.is_empty() {
                    out.push('=');
                    out.push_str(&param.value);
                }
                copied = span.name.end;
            }
        }
    }

    out.push_str(&text[copied..]);
    out
}

fn json_scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn json_params(body: &str) -> Vec<Parameter> {
    let Ok(Value::Object(members)) = serde_json::from_str::<Value>(body) else {
        return Vec::new();
    };

    members
        .iter()
        .filter_map(|(name, value)| {
            json_scalar(value).map(|value| Parameter {
                name: name.clone(),
                value,
                kind: ParameterType::Json,
            })
        })
        .collect()
}

fn rewrite_json(body: &str, slots: &mut std::slice::Iter<'_, Parameter>) -> Option<String> {
    let Ok(Value::Object(members)) = serde_json::from_str::<Value>(body) else {
        return None;
    };

    let mut rebuilt = serde_json::Map::with_capacity(members.len());
    let mut changed = false;
    for (name, value) in members {
        let Some(current) = json_scalar(&value) else {
            rebuilt.insert(name, value);
            continue;
        };
        match slots.next() {
            Some(param) if param.name != name || param.value != current => {
                changed = true;
                let new_value = if param.value == current {
                    value
                } else {
                    Value::String(param.value.clone())
                };
                rebuilt.insert(param.name.clone(), new_value);
            }
            _ => {
                rebuilt.insert(name, value);
            }
        }
    }

    if !changed {
        return None;
    }
    serde_json::to_string(&Value::Object(rebuilt)).ok()
}

/// Hands out replacement values per (type, name) occurrence
struct UpdateCursor<'a> {
    values: HashMap<(ParameterType, String), Vec<&'a str>>,
    seen: HashMap<(ParameterType, String), usize>,
}

impl<'a> UpdateCursor<'a> {
    fn new(updates: &'a [Parameter]) -> Self {
        let mut values: HashMap<(ParameterType, String), Vec<&'a str>> = HashMap::new();
        for param in updates {
            values
                .entry((param.kind, param.name.clone()))
                .or_default()
                .push(param.value.as_str());
        }
        Self {
            values,
            seen: HashMap::new(),
        }
    }

    fn next_value(&mut self, kind: ParameterType, name: &str) -> Option<&'a str> {
        let key = (kind, name.to_string());
        let index = self.seen.entry(key.clone()).or_insert(0);
        let occurrence = *index;
        *index += 1;
        self.values
            .get(&key)
            .and_then(|values| values.get(occurrence))
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> HttpService {
        HttpService::new("example.com", 443, true)
    }

    const FORM_POST: &str = "POST /login?next=%2Fhome&debug HTTP/1.1\r\n\
Host: example.com\r\n\
Cookie: session=abc; theme=dark\r\n\
Content-Type: application/x-www-form-urlencoded\r\n\
Content-Length: 21\r\n\
\r\n\
user=alice&pass=s3cr3";

    #[test]
    fn test_origin() {
        assert_eq!(HttpService::new("a.com", 80, false).origin(), "http://a.com");
        assert_eq!(HttpService::new("a.com", 443, true).origin(), "https://a.com");
        assert_eq!(HttpService::new("a.com", 443, false).origin(), "http://a.com:443");
        assert_eq!(HttpService::new("a.com", 8443, true).origin(), "https://a.com:8443");
        assert_eq!(HttpService::new("a.com", 0, true).origin(), "https://a.com");
        assert_eq!(HttpService::new("a.com", -1, false).origin(), "http://a.com");
    }

    #[test]
    fn test_parse_and_serialize() {
        let request = HttpRequest::parse(service(), FORM_POST).unwrap();
        assert_eq!(request.method(), &Method::POST);
        assert_eq!(request.path(), "/login?next=%2Fhome&debug");
        assert_eq!(request.header("content-length"), Some("21"));
        assert_eq!(request.body(), "user=alice&pass=s3cr3");
        assert_eq!(request.to_raw(), FORM_POST);
    }

    #[test]
    fn test_parse_accepts_bare_newlines() {
        let request = HttpRequest::parse(service(), "GET /x HTTP/1.1\nHost: a\n\nbody").unwrap();
        assert_eq!(request.header("Host"), Some("a"));
        assert_eq!(request.body(), "body");
    }

    #[test]
    fn test_parse_rejects_bad_request_line() {
        assert!(matches!(
            HttpRequest::parse(service(), "GARBAGE\r\n\r\n"),
            Err(ReassemblyError::MalformedRequestLine { .. })
        ));
        assert!(matches!(
            HttpRequest::parse(service(), "G{T / HTTP/1.1\r\n\r\n"),
            Err(ReassemblyError::InvalidMethod { .. })
        ));
    }

    #[test]
    fn test_parameters_in_message_order() {
        let request = HttpRequest::parse(service(), FORM_POST).unwrap();
        let params = request.parameters();
        let summary: Vec<(&str, &str, ParameterType)> = params
            .iter()
            .map(|p| (p.name.as_str(), p.value.as_str(), p.kind))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("next", "%2Fhome", ParameterType::Url),
                ("debug", "", ParameterType::Url),
                ("session", "abc", ParameterType::Cookie),
                ("theme", "dark", ParameterType::Cookie),
                ("user", "alice", ParameterType::Body),
                ("pass", "s3cr3", ParameterType::Body),
            ]
        );
    }

    #[test]
    fn test_updated_parameters_preserve_untouched_bytes() {
        let request = HttpRequest::parse(service(), FORM_POST).unwrap();
        let updates = vec![
            Parameter::new("next", "%2Fadmin", ParameterType::Url),
            Parameter::new("debug", "1", ParameterType::Url),
            Parameter::new("theme", "light", ParameterType::Cookie),
            Parameter::new("user", "alice'--", ParameterType::Body),
        ];

        let updated = request.with_updated_parameters(&updates);
        assert_eq!(updated.path(), "/login?next=%2Fadmin&debug=1");
        assert_eq!(updated.header("cookie"), Some("session=abc; theme=light"));
        assert_eq!(updated.body(), "user=alice'--&pass=s3cr3");
        assert_eq!(updated.header("content-length"), Some("24"));
    }

    #[test]
    fn test_updated_parameters_by_occurrence() {
        let request = HttpRequest::parse(service(), "GET /?a=1&a=2&b=3 HTTP/1.1\r\n\r\n").unwrap();
        let updated = request.with_updated_parameters(&[
            Parameter::new("a", "1", ParameterType::Url),
            Parameter::new("a", "X", ParameterType::Url),
        ]);
        assert_eq!(updated.path(), "/?a=1&a=X&b=3");
    }

    #[test]
    fn test_rewritten_parameters_can_rename() {
        let request = HttpRequest::parse(service(), "GET /?{$n$}=1&b=2 HTTP/1.1\r\nCookie: c=3\r\n\r\n").unwrap();
        let mut params = request.parameters();
        params[0].name = "id".to_string();
        params[2].value = "4".to_string();

        let updated = request.with_rewritten_parameters(&params);
        assert_eq!(updated.path(), "/?id=1&b=2");
        assert_eq!(updated.header("Cookie"), Some("c=4"));
    }

    #[test]
    fn test_json_parameters() {
        let raw = "POST /api HTTP/1.1\r\nContent-Type: application/json\r\nContent-Length: 32\r\n\r\n{\"name\":\"bob\",\"age\":7,\"tags\":[]}";
        let request = HttpRequest::parse(service(), raw).unwrap();
        let params = request.parameters();
        assert_eq!(params.len(), 2);
        assert_eq!(params[0], Parameter::new("name", "bob", ParameterType::Json));
        assert_eq!(params[1], Parameter::new("age", "7", ParameterType::Json));

        let updated = request.with_updated_parameters(&[Parameter::new("name", "bob\"x", ParameterType::Json)]);
        assert_eq!(updated.body(), r#"{"name":"bob\"x","age":7,"tags":[]}"#);
        assert_eq!(updated.header("Content-Length"), Some("35"));
    }

    #[test]
    fn test_invalid_json_body_has_no_parameters() {
        let raw = "POST /api HTTP/1.1\r\nContent-Type: application/json\r\n\r\n{not json";
        let request = HttpRequest::parse(service(), raw).unwrap();
        assert!(request.parameters().is_empty());
    }

    #[test]
    fn test_content_length_untouched_when_chunked() {
        let raw = "POST /f HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\nTransfer-Encoding: chunked\r\nContent-Length: 3\r\n\r\na=1";
        let request = HttpRequest::parse(service(), raw).unwrap();
        let updated = request.with_updated_parameters(&[Parameter::new("a", "1234", ParameterType::Body)]);
        assert_eq!(updated.body(), "a=1234");
        assert_eq!(updated.header("content-length"), Some("3"));
    }

    #[test]
    fn test_header_validation() {
        let mut request = HttpRequest::new(service(), Method::GET, "/");
        assert!(request.add_header("X-Ok", "fine").is_ok());
        assert!(request.add_header("Bad Name", "v").is_err());
        assert!(request.add_header("X-Bad", "a\r\nb").is_err());
        assert!(request.set_header("x-ok", "updated").is_ok());
        assert_eq!(request.headers().len(), 1);
        assert_eq!(request.header("X-OK"), Some("updated"));
    }

    #[test]
    fn test_split_message() {
        assert_eq!(split_message("a\r\nb\r\n\r\nbody"), Some(("a\r\nb", "body")));
        assert_eq!(split_message("a\n\nbody"), Some(("a", "body")));
        assert_eq!(split_message("a\r\nb"), None);
    }
}
