//! Per-request view of the inbound HTTP request, passed explicitly to every
//! component that needs it.

/// Scheme the browser used to reach this application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn from_secure(secure: bool) -> Self {
        if secure {
            Scheme::Https
        } else {
            Scheme::Http
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub scheme: Scheme,
    /// Host as sent by the browser, port included when non-default.
    pub host: String,
    /// Request path without the query string.
    pub path: String,
    /// Decoded query pairs in request order.
    pub query: Vec<(String, String)>,
    pub referer: Option<String>,
}

impl RequestContext {
    /// `scheme://host`, the prefix every absolute URL of this application starts with.
    pub fn origin(&self) -> String {
        format!("{}://{}", self.scheme.as_str(), self.host)
    }

    /// First value of a query parameter.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

#[cfg(test)]
pub(crate) fn test_context(path: &str, query: &[(&str, &str)]) -> RequestContext {
    RequestContext {
        scheme: Scheme::Https,
        host: "app.example.com".to_string(),
        path: path.to_string(),
        query: query
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        referer: None,
    }
}
