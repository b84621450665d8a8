//! Request discriminators carried in the URL host position

use std::fmt;
use std::str::FromStr;

/// The three request kinds the hub understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    /// One-shot publish from a peer
    SendToMain,
    /// One-shot request/response invocation
    InvokeOnMain,
    /// Long-lived subscription to hub-originated events
    StreamFromMain,
}

impl Route {
    pub const ALL: [Route; 3] = [Route::SendToMain, Route::InvokeOnMain, Route::StreamFromMain];

    pub fn as_str(&self) -> &'static str {
        match self {
            Route::SendToMain => "send-to-main",
            Route::InvokeOnMain => "invoke-on-main",
            Route::StreamFromMain => "stream-from-main",
        }
    }

    /// Build the request URL for this route, e.g. `schemebus-ipc://send-to-main`
    pub fn url(&self, scheme: &str) -> String {
        format!("{}://{}", scheme, self.as_str())
    }

    /// Recover the route from a request URL under `scheme`
    pub fn from_url(scheme: &str, url: &str) -> Option<Self> {
        let rest = url.strip_prefix(scheme)?.strip_prefix("://")?;
        let rest = rest.strip_suffix('/').unwrap_or(rest);
        rest.parse().ok()
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Route {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Route::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| format!("unknown route '{}'", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url() {
        assert_eq!(Route::SendToMain.url("ipc"), "ipc://send-to-main");
        assert_eq!(Route::StreamFromMain.url("ipc"), "ipc://stream-from-main");
    }

    #[test]
    fn test_from_url() {
        assert_eq!(Route::from_url("ipc", "ipc://invoke-on-main"), Some(Route::InvokeOnMain));
        assert_eq!(Route::from_url("ipc", "ipc://invoke-on-main/"), Some(Route::InvokeOnMain));
        assert_eq!(Route::from_url("ipc", "other://invoke-on-main"), None);
        assert_eq!(Route::from_url("ipc", "ipc://to-main"), None);
        assert_eq!(Route::from_url("ipc", "ipc:invoke-on-main"), None);
    }

    #[test]
    fn test_parse_round_trip() {
        for route in Route::ALL {
            assert_eq!(route.as_str().parse::<Route>().unwrap(), route);
        }
    }
}
