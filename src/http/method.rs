//! Request methods and protocol versions.

use std::fmt;
use std::str::FromStr;

/// HTTP request method.
///
/// The wire format imposes no closed set, so any token that is not one of
/// the well-known verbs is carried verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Put,
    Post,
    Head,
    Options,
    Delete,
    Trace,
    Connect,
    Patch,
    Other(String),
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Post => "POST",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Delete => "DELETE",
            Method::Trace => "TRACE",
            Method::Connect => "CONNECT",
            Method::Patch => "PATCH",
            Method::Other(verb) => verb,
        }
    }

    /// Responses to this method never carry body bytes.
    pub fn suppresses_response_body(&self) -> bool {
        matches!(self, Method::Head | Method::Connect)
    }

    fn is_token(verb: &str) -> bool {
        !verb.is_empty()
            && verb.bytes().all(|b| {
                b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
            })
    }
}

impl FromStr for Method {
    type Err = InvalidMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "GET" => Method::Get,
            "PUT" => Method::Put,
            "POST" => Method::Post,
            "HEAD" => Method::Head,
            "OPTIONS" => Method::Options,
            "DELETE" => Method::Delete,
            "TRACE" => Method::Trace,
            "CONNECT" => Method::Connect,
            "PATCH" => Method::Patch,
            other if Method::is_token(other) => Method::Other(other.to_string()),
            other => return Err(InvalidMethod(other.to_string())),
        })
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid method token {0:?}")]
pub struct InvalidMethod(pub String);

/// Protocol version of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    pub(crate) fn from_minor(minor: u8) -> Self {
        if minor == 0 {
            Version::Http10
        } else {
            Version::Http11
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical reason phrase, used when a response sets no message.
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        411 => "Length Required",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        415 => "Unsupported Media Type",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        505 => "HTTP Version Not Supported",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_verbs_round_trip() {
        for verb in ["GET", "PUT", "POST", "HEAD", "OPTIONS", "DELETE", "TRACE", "CONNECT", "PATCH"] {
            let method: Method = verb.parse().unwrap();
            assert!(!matches!(method, Method::Other(_)));
            assert_eq!(method.as_str(), verb);
        }
    }

    #[test]
    fn arbitrary_verbs_are_kept_verbatim() {
        let method: Method = "PURGE".parse().unwrap();
        assert_eq!(method, Method::Other("PURGE".into()));
        assert_eq!(method.to_string(), "PURGE");
        assert!("BAD VERB".parse::<Method>().is_err());
        assert!("".parse::<Method>().is_err());
    }

    #[test]
    fn head_and_connect_suppress_bodies() {
        assert!(Method::Head.suppresses_response_body());
        assert!(Method::Connect.suppresses_response_body());
        assert!(!Method::Get.suppresses_response_body());
    }
}
