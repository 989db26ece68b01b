/// Substrings (lowercase) of error messages that indicate a transient fault worth retrying.
///
/// "unknown" is intentionally absent: an unknown status is an observation, not a fault.
const RETRYABLE_KEYWORDS: &[&str] = &[
    "timeout",
    "timed out",
    "connection",
    "network",
    "temporary",
    "busy",
    "locked",
    "resource",
    "unavailable",
    "can't contact",
    "in progress",
];

/// Classify an error message as transient (retryable) or not.
pub fn is_retryable(message: &str) -> bool {
    let message = message.to_lowercase();
    RETRYABLE_KEYWORDS.iter().any(|keyword| message.contains(keyword))
}
