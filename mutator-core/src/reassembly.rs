//! Reserialize/reparse of rewritten raw messages
//!
//! Placeholder substitution works on the serialized text of a request. This
//! module turns that text back into an [`HttpRequest`], repairing
//! `Content-Length` first. Failure is returned as a [`ReassemblyError`]; the
//! caller decides how to fall back.

use crate::error::ReassemblyError;
use crate::placeholder::{has_placeholders, PlaceholderSubstitutor};
use crate::request::{head_lines, split_header_line, split_message, HttpRequest, Parameter};
use tracing::debug;

/// Byte length of the body of a raw message, if it has a header/body boundary
pub fn body_len(raw: &str) -> Option<usize> {
    split_message(raw).map(|(_, body)| body.len())
}

/// Point an existing `Content-Length` header at the current body length.
///
/// Logic:
/// 1. No header/body boundary, or the body is still `previous_body_len`
///    bytes: unchanged.
/// 2. A `Transfer-Encoding` header naming `chunked`: unchanged.
/// 3. Otherwise every `Content-Length` header (any case) gets the new length.
///    A missing header is not added. Line endings are preserved.
pub fn repair_content_length(raw: &str, previous_body_len: usize) -> String {
    let Some((head, body)) = split_message(raw) else {
        return raw.to_string();
    };
    if body.len() == previous_body_len {
        return raw.to_string();
    }

    let chunked = head_lines(head).skip(1).filter_map(split_header_line).any(|(name, value)| {
        name.eq_ignore_ascii_case("transfer-encoding") && value.to_ascii_lowercase().contains("chunked")
    });
    if chunked {
        debug!("Body length changed on a chunked message; Content-Length left alone");
        return raw.to_string();
    }

    let length = body.len().to_string();
    let mut out = String::with_capacity(raw.len() + 4);

    for (index, segment) in head.split_inclusive('\n').enumerate() {
        let line = segment.trim_end_matches(['\r', '\n']);
        let ending = &segment[line.len()..];

        match line.split_once(':') {
            Some((name, _)) if index > 0 && name.trim().eq_ignore_ascii_case("content-length") => {
                debug!("Content-Length {} -> {}", previous_body_len, length);
                out.push_str(name);
                out.push_str(": ");
                out.push_str(&length);
                out.push_str(ending);
            }
            _ => out.push_str(segment),
        }
    }

    out.push_str(&raw[head.len()..]);
    out
}

/// Rebuilds structured requests from rewritten raw text
pub struct RequestReassembler;

impl RequestReassembler {
    /// Reparse `raw` into a request for the same service as `base`.
    ///
    /// The first line becomes the request line, each header line is applied
    /// on its own (lines that cannot be applied are skipped), and everything
    /// after the blank line becomes the body.
    pub fn reassemble(base: &HttpRequest, raw: &str) -> Result<HttpRequest, ReassemblyError> {
        let (head, body) = split_message(raw).ok_or(ReassemblyError::MissingHeaderTerminator)?;
        let mut lines = head_lines(head);

        let request_line = lines
            .next()
            .filter(|line| !line.trim().is_empty())
            .ok_or(ReassemblyError::MissingRequestLine)?;

        let mut request = HttpRequest::new(base.service().clone(), base.method().clone(), base.path());
        request.set_request_line(request_line)?;

        for line in lines {
            let Some((name, value)) = split_header_line(line) else {
                debug!("Skipping line without a colon: {:?}", line);
                continue;
            };
            if let Err(e) = request.add_header(name, value) {
                debug!("Skipping header: {}", e);
            }
        }

        request.set_body(body);
        Ok(request)
    }

    /// Replace placeholders still present in parsed parameter names and
    /// values, using only values the substitutor already computed.
    /// Returns `None` when nothing changed.
    pub fn resubstitute_parameters(
        request: &HttpRequest,
        substitutor: &PlaceholderSubstitutor<'_>,
    ) -> Option<HttpRequest> {
        let params = request.parameters();
        let mut changed = false;

        let rewritten: Vec<Parameter> = params
            .into_iter()
            .map(|param| {
                if !has_placeholders(&param.name) && !has_placeholders(&param.value) {
                    return param;
                }
                let name = substitutor.replace_cached(&param.name);
                let value = substitutor.replace_cached(&param.value);
                if name.is_none() && value.is_none() {
                    return param;
                }
                changed = true;
                Parameter {
                    name: name.unwrap_or(param.name),
                    value: value.unwrap_or(param.value),
                    kind: param.kind,
                }
            })
            .collect();

        changed.then(|| request.with_rewritten_parameters(&rewritten))
    }
}
