//! Minimal HTTP/1.1 framing
//!
//! Only what the daemon needs: parsing a request line, spotting the
//! `Content-Length` header, and writing the fixed-shape `200 OK` reply.

use std::fmt;

use crate::{ProtocolError, Reply, Result};

/// Request method
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Other(String),
}

impl Method {
    fn parse(token: &str) -> Self {
        match token {
            "GET" => Self::Get,
            "POST" => Self::Post,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
            Method::Other(method) => write!(f, "{}", method),
        }
    }
}

/// Parsed `METHOD SP PATH [SP VERSION]` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: Method,
    pub path: String,
    pub version: Option<String>,
}

impl RequestLine {
    /// Parse a request line, with or without its trailing CRLF.
    ///
    /// The method and path are required; the version is optional. Anything
    /// else (a single token, extra tokens, a non-alphabetic method) is
    /// malformed.
    pub fn parse(line: &str) -> Result<Self> {
        let malformed = || ProtocolError::MalformedRequestLine(line.trim_end().to_string());

        let mut tokens = line.split_ascii_whitespace();
        let method = tokens.next().ok_or_else(malformed)?;
        let path = tokens.next().ok_or_else(malformed)?;
        let version = tokens.next().map(str::to_string);

        if tokens.next().is_some() || !method.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Err(malformed());
        }

        Ok(Self {
            method: Method::parse(method),
            path: path.to_string(),
            version,
        })
    }
}

/// Extract the body length from a header line.
///
/// Returns `None` for any other header. The name is matched
/// case-insensitively; an unparsable value counts as `0`.
pub fn content_length(header: &str) -> Option<usize> {
    let (name, value) = header.split_once(':')?;
    if !name.trim().eq_ignore_ascii_case("content-length") {
        return None;
    }
    Some(value.trim().parse().unwrap_or(0))
}

/// Build the complete response bytes for a reply
pub fn build_response(reply: &Reply) -> Vec<u8> {
    let body = reply.to_body();
    format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        body.len(),
        body
    )
    .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StatusPayload;
    use rstest::rstest;

    #[test]
    fn test_parse_full_request_line() {
        let line = RequestLine::parse("POST / HTTP/1.1\r\n").unwrap();
        assert_eq!(line.method, Method::Post);
        assert_eq!(line.path, "/");
        assert_eq!(line.version.as_deref(), Some("HTTP/1.1"));
    }

    #[test]
    fn test_parse_without_version() {
        let line = RequestLine::parse("GET /volume").unwrap();
        assert_eq!(line.method, Method::Get);
        assert_eq!(line.path, "/volume");
        assert_eq!(line.version, None);
    }

    #[test]
    fn test_unknown_method_is_kept() {
        let line = RequestLine::parse("DELETE / HTTP/1.1").unwrap();
        assert_eq!(line.method, Method::Other("DELETE".to_string()));
        assert_eq!(line.method.to_string(), "DELETE");
    }

    #[rstest]
    #[case("")]
    #[case("\r\n")]
    #[case("GET")]
    #[case("GARBAGE\r\n")]
    #[case("GET / HTTP/1.1 extra")]
    #[case("G3T / HTTP/1.1")]
    fn test_malformed_request_lines(#[case] line: &str) {
        assert!(matches!(
            RequestLine::parse(line),
            Err(ProtocolError::MalformedRequestLine(_))
        ));
    }

    #[rstest]
    #[case("Content-Length: 17", Some(17))]
    #[case("content-length:4", Some(4))]
    #[case("CONTENT-LENGTH:   9  ", Some(9))]
    #[case("Content-Length: lots", Some(0))]
    #[case("Content-Type: application/json", None)]
    #[case("no colon here", None)]
    fn test_content_length(#[case] header: &str, #[case] expected: Option<usize>) {
        assert_eq!(content_length(header), expected);
    }

    #[test]
    fn test_response_content_length_counts_newline() {
        let bytes = build_response(&Reply::Status(StatusPayload::new(50, false)));
        let text = String::from_utf8(bytes).unwrap();
        let (head, body) = text.split_once("\r\n\r\n").unwrap();

        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(head.contains("Content-Type: application/json"));
        assert!(head.contains("Connection: close"));
        assert!(head.contains(&format!("Content-Length: {}", body.len())));
        assert!(body.ends_with('\n'));
    }
}
