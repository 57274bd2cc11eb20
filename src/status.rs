//! Retriable status code table.

use std::collections::BTreeMap;

/// Retry policy attached to a single status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusPolicy {
    /// Whether an idempotent request receiving this status is retried.
    pub retriable: bool,
    /// Whether the `Retry-After` header overrides the computed backoff.
    pub honors_retry_after: bool,
}

impl StatusPolicy {
    /// Retriable, backoff is always computed.
    pub const RETRY: Self = Self {
        retriable: true,
        honors_retry_after: false,
    };

    /// Retriable, the server may dictate the wait.
    pub const RETRY_AFTER: Self = Self {
        retriable: true,
        honors_retry_after: true,
    };

    /// Never retried.
    pub const TERMINAL: Self = Self {
        retriable: false,
        honors_retry_after: false,
    };
}

/// Immutable mapping from HTTP status code to [`StatusPolicy`].
///
/// Codes missing from the table are terminal unless they are 2xx/3xx, which
/// the classifier treats as success before consulting the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetriableStatusTable {
    entries: BTreeMap<u16, StatusPolicy>,
}

impl RetriableStatusTable {
    /// The standard table: 104, 408, 429, 500, 502, 503 and 504.
    ///
    /// 429 and 503 honor `Retry-After`.
    pub fn standard() -> Self {
        let entries = [
            (104, StatusPolicy::RETRY),
            (408, StatusPolicy::RETRY),
            (429, StatusPolicy::RETRY_AFTER),
            (500, StatusPolicy::RETRY),
            (502, StatusPolicy::RETRY),
            (503, StatusPolicy::RETRY_AFTER),
            (504, StatusPolicy::RETRY),
        ]
        .into_iter()
        .collect();

        Self { entries }
    }

    /// An empty table: no status is retried.
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Return a new table with `code` mapped to `policy`.
    pub fn with_entry(mut self, code: u16, policy: StatusPolicy) -> Self {
        self.entries.insert(code, policy);
        self
    }

    /// Look up the policy for a status code.
    pub fn get(&self, code: u16) -> StatusPolicy {
        self.entries.get(&code).copied().unwrap_or(StatusPolicy::TERMINAL)
    }

    /// Check if a status code should be retried.
    pub fn is_retriable(&self, code: u16) -> bool {
        self.get(code).retriable
    }

    /// Iterate over the retriable codes in ascending order.
    pub fn retriable_codes(&self) -> impl Iterator<Item = u16> + '_ {
        self.entries
            .iter()
            .filter(|(_, policy)| policy.retriable)
            .map(|(code, _)| *code)
    }
}

impl Default for RetriableStatusTable {
    fn default() -> Self {
        Self::standard()
    }
}

/// Short human description of a retriable status, used in retry logs.
pub(crate) fn describe(code: u16) -> &'static str {
    match code {
        104 => "Connection Reset",
        408 => "Request Timeout",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Unexpected Status",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_table() {
        let table = RetriableStatusTable::standard();
        let codes: Vec<u16> = table.retriable_codes().collect();
        assert_eq!(codes, vec![104, 408, 429, 500, 502, 503, 504]);

        assert!(table.get(429).honors_retry_after);
        assert!(table.get(503).honors_retry_after);
        assert!(!table.get(500).honors_retry_after);
    }

    #[test]
    fn test_unknown_codes_are_terminal() {
        let table = RetriableStatusTable::standard();
        for code in [400, 401, 403, 404, 409, 501, 505] {
            assert_eq!(table.get(code), StatusPolicy::TERMINAL, "code {code}");
        }
    }

    #[test]
    fn test_with_entry_extends_copy() {
        let standard = RetriableStatusTable::standard();
        let extended = standard.clone().with_entry(409, StatusPolicy::RETRY);

        assert!(extended.is_retriable(409));
        assert!(!standard.is_retriable(409));
    }

    #[test]
    fn test_entry_can_be_disabled() {
        let table = RetriableStatusTable::standard().with_entry(500, StatusPolicy::TERMINAL);
        assert!(!table.is_retriable(500));
        assert!(!table.retriable_codes().any(|c| c == 500));
    }
}
