//! XML error document parsing
//!
//! Only the four fields of the error document are read; resource schemas are
//! never decoded here.

use crate::error::ServiceError;
use regex::Regex;

/// Text of the first `<tag>` element, unescaped and trimmed
fn extract_xml_tag(xml: &str, tag: &str) -> Option<String> {
    let pattern = format!(r"(?s)<{tag}>(.*?)</{tag}>");
    let re = Regex::new(&pattern).ok()?;
    re.captures(xml)
        .and_then(|caps| caps.get(1))
        .map(|m| unescape(m.as_str().trim()))
        .filter(|s| !s.is_empty())
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Build a service error from a non-2xx response
///
/// An empty or unparseable body still yields an error, populated from the
/// status line. `header_request_id` is used when the body carries none.
pub fn parse_service_error(
    status: u16,
    reason: &str,
    body: &[u8],
    header_request_id: Option<&str>,
) -> ServiceError {
    let text = String::from_utf8_lossy(body);
    let code = extract_xml_tag(&text, "Code");
    let message = extract_xml_tag(&text, "Message");

    let fallback = if reason.is_empty() {
        format!("HTTP {}", status)
    } else {
        reason.to_string()
    };

    ServiceError {
        status_code: status,
        code: code.unwrap_or_else(|| fallback.clone()),
        message: message.unwrap_or(fallback),
        request_id: extract_xml_tag(&text, "RequestId")
            .or_else(|| header_request_id.map(str::to_string)),
        resource: extract_xml_tag(&text, "Resource"),
    }
}
