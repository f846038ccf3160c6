//! Carrying tokens to and from the client.
//!
//! The coordinator only needs to read one named value from the incoming
//! request and queue values on the outgoing response. [`CookieHeaders`] does
//! that over raw `Cookie` / `Set-Cookie` header strings so any HTTP stack can
//! plug in.

use std::fmt;

/// A token queued for the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingToken {
    pub name: String,
    pub value: String,
    pub domain: Option<String>,
    pub path: String,
    /// `Some(0)` tells the client to drop the token. `None` keeps it for the
    /// browser session.
    pub max_age_seconds: Option<i64>,
    pub http_only: bool,
}

impl OutgoingToken {
    /// A session-scoped, HTTP-only token on the root path.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: None,
            path: "/".to_string(),
            max_age_seconds: None,
            http_only: true,
        }
    }

    /// A token that tells the client to discard `name`.
    pub fn removal(name: impl Into<String>) -> Self {
        Self {
            max_age_seconds: Some(0),
            ..Self::new(name, "")
        }
    }

    pub fn with_domain(mut self, domain: Option<impl Into<String>>) -> Self {
        self.domain = domain.map(Into::into);
        self
    }

    pub fn with_max_age_seconds(mut self, seconds: i64) -> Self {
        self.max_age_seconds = Some(seconds);
        self
    }

    /// Whether this token deletes the client's copy.
    pub fn is_removal(&self) -> bool {
        self.max_age_seconds == Some(0)
    }
}

impl fmt::Display for OutgoingToken {
    /// Render as a `Set-Cookie` header value.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}; Path={}", self.name, self.value, self.path)?;
        if let Some(domain) = &self.domain {
            write!(f, "; Domain={}", domain)?;
        }
        if let Some(max_age) = self.max_age_seconds {
            write!(f, "; Max-Age={}", max_age)?;
        }
        if self.http_only {
            write!(f, "; HttpOnly")?;
        }
        Ok(())
    }
}

/// Request/response plumbing the coordinator reads and writes tokens through.
pub trait TokenTransport {
    /// Value of the named token on the incoming request, if present.
    fn read_incoming_token(&self, name: &str) -> Option<String>;

    /// Queue a token on the response.
    fn write_outgoing_token(&mut self, token: OutgoingToken);

    /// Queue an instruction for the client to drop the named token.
    fn remove_outgoing_token(&mut self, name: &str, domain: Option<&str>) {
        self.write_outgoing_token(OutgoingToken::removal(name).with_domain(domain));
    }
}

/// Transport over raw cookie header strings.
#[derive(Debug, Clone, Default)]
pub struct CookieHeaders {
    incoming: Vec<(String, String)>,
    outgoing: Vec<OutgoingToken>,
}

impl CookieHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one `Cookie` request header (`a=1; b=2`).
    pub fn from_cookie_header(header: &str) -> Self {
        Self::from_cookie_headers([header])
    }

    /// Parse several `Cookie` request headers.
    pub fn from_cookie_headers<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut incoming = Vec::new();
        for header in headers {
            for pair in header.as_ref().split(';') {
                let Some((name, value)) = pair.split_once('=') else {
                    continue;
                };
                let name = name.trim();
                if name.is_empty() {
                    continue;
                }
                let value = value.trim();
                let value = value
                    .strip_prefix('"')
                    .and_then(|v| v.strip_suffix('"'))
                    .unwrap_or(value);
                incoming.push((name.to_string(), value.to_string()));
            }
        }

        Self {
            incoming,
            outgoing: Vec::new(),
        }
    }

    /// Parsed incoming cookies in header order.
    pub fn incoming(&self) -> &[(String, String)] {
        &self.incoming
    }

    /// Tokens queued for the response.
    pub fn outgoing(&self) -> &[OutgoingToken] {
        &self.outgoing
    }

    /// The queued token for `name`, if any.
    pub fn outgoing_token(&self, name: &str) -> Option<&OutgoingToken> {
        self.outgoing
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }

    /// Render the queued tokens as `Set-Cookie` header values.
    pub fn set_cookie_headers(&self) -> Vec<String> {
        self.outgoing.iter().map(ToString::to_string).collect()
    }
}

impl TokenTransport for CookieHeaders {
    fn read_incoming_token(&self, name: &str) -> Option<String> {
        self.incoming
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    }

    /// A later write for the same name replaces the earlier one.
    fn write_outgoing_token(&mut self, token: OutgoingToken) {
        self.outgoing
            .retain(|t| !t.name.eq_ignore_ascii_case(&token.name));
        self.outgoing.push(token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cookie_header() {
        let headers = CookieHeaders::from_cookie_header("theme=dark; app.session=abc+/==; empty=");
        assert_eq!(headers.read_incoming_token("theme").as_deref(), Some("dark"));
        assert_eq!(headers.read_incoming_token("app.session").as_deref(), Some("abc+/=="));
        assert_eq!(headers.read_incoming_token("empty").as_deref(), Some(""));
        assert_eq!(headers.read_incoming_token("missing"), None);
    }

    #[test]
    fn test_names_match_case_insensitively() {
        let headers = CookieHeaders::from_cookie_header("App.Session=xyz");
        assert_eq!(headers.read_incoming_token("app.session").as_deref(), Some("xyz"));
    }

    #[test]
    fn test_multiple_headers_and_junk() {
        let headers =
            CookieHeaders::from_cookie_headers(["a=1; junk; =nameless", "b=\"quoted\""]);
        assert_eq!(headers.incoming().len(), 2);
        assert_eq!(headers.read_incoming_token("b").as_deref(), Some("quoted"));
    }

    #[test]
    fn test_write_replaces_previous() {
        let mut headers = CookieHeaders::new();
        headers.write_outgoing_token(OutgoingToken::new("sid", "one"));
        headers.write_outgoing_token(OutgoingToken::new("sid", "two"));

        assert_eq!(headers.outgoing().len(), 1);
        assert_eq!(headers.outgoing_token("sid").unwrap().value, "two");
    }

    #[test]
    fn test_set_cookie_rendering() {
        let token = OutgoingToken::new("sid", "abc").with_domain(Some("example.com"));
        assert_eq!(
            token.to_string(),
            "sid=abc; Path=/; Domain=example.com; HttpOnly"
        );

        let token = OutgoingToken::new("sid", "abc").with_max_age_seconds(3600);
        assert_eq!(token.to_string(), "sid=abc; Path=/; Max-Age=3600; HttpOnly");
    }

    #[test]
    fn test_remove_token() {
        let mut headers = CookieHeaders::new();
        headers.remove_outgoing_token("sid", Some("example.com"));

        let token = headers.outgoing_token("sid").unwrap();
        assert!(token.is_removal());
        assert_eq!(token.value, "");
        assert_eq!(
            headers.set_cookie_headers(),
            vec!["sid=; Path=/; Domain=example.com; Max-Age=0; HttpOnly"]
        );
    }
}
