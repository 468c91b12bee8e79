pub mod catalog;
pub mod executor;
pub mod mcp;
pub mod retry;

pub use catalog::{browser_actions, ToolCatalog};
pub use executor::ActionExecutor;
pub use mcp::ProtocolClient;
pub use retry::{BlockerHost, RetryOutcome, RetryPolicy};

/// Truncate a string to at most `max_chars` bytes, respecting UTF-8 char boundaries.
pub fn safe_truncate(s: &str, max_chars: usize) -> &str {
    if s.len() <= max_chars {
        return s;
    }
    // Find the last valid char boundary at or before max_chars bytes
    let mut end = max_chars;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
