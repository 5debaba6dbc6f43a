use serde::{Deserialize, Serialize};

/// Connection metadata safe to log or show in a confirmation prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactedConnection {
    pub host: Option<String>,
    pub database: Option<String>,
    pub redacted: String,
}

/// Mask the password and sensitive query parameters of a connection URL.
pub fn redact_connection_string(conn: &str) -> RedactedConnection {
    let Some((scheme, rest)) = conn.split_once("://") else {
        return RedactedConnection {
            host: None,
            database: None,
            redacted: conn.to_string(),
        };
    };

    let (location, query) = match rest.split_once('?') {
        Some((location, query)) => (location, Some(query)),
        None => (rest, None),
    };
    let (authority, path) = location.split_once('/').unwrap_or((location, ""));
    let (userinfo, host_port) = match authority.rsplit_once('@') {
        Some((userinfo, host_port)) => (Some(userinfo), host_port),
        None => (None, authority),
    };

    let mut redacted = format!("{scheme}://");
    if let Some(userinfo) = userinfo {
        match userinfo.split_once(':') {
            Some((user, _)) => redacted.push_str(&format!("{user}:***@")),
            None => redacted.push_str(&format!("{userinfo}@")),
        }
    }
    redacted.push_str(host_port);
    if !path.is_empty() {
        redacted.push('/');
        redacted.push_str(path);
    }
    if let Some(query) = query {
        redacted.push('?');
        redacted.push_str(&redact_query(query));
    }

    let host = host_port
        .rsplit_once(':')
        .map(|(host, _)| host)
        .unwrap_or(host_port);

    RedactedConnection {
        host: (!host.is_empty()).then(|| host.to_string()),
        database: (!path.is_empty()).then(|| path.to_string()),
        redacted,
    }
}

fn redact_query(query: &str) -> String {
    query
        .split('&')
        .map(|pair| match pair.split_once('=') {
            Some((key, _)) if is_sensitive_key(key) => format!("{key}=***"),
            _ => pair.to_string(),
        })
        .collect::<Vec<_>>()
        .join("&")
}

fn is_sensitive_key(key: &str) -> bool {
    matches!(
        key.to_lowercase().as_str(),
        "password" | "pass" | "token" | "sslpassword"
    )
}
