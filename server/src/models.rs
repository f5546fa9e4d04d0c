use chrono::Utc;

/// A node row of the hierarchical store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub key: String,
    pub value: String,
    pub dir: bool,
    pub modified: u64,
    pub children: Vec<Node>,
}

/// One entry of the append-only event log. Every mutation of `nodes`
/// appends exactly one event.
#[derive(Debug, Clone)]
pub struct Event {
    pub ordinal: u64,
    pub key: String,
    pub value: String,
    pub dir: bool,
    pub timestamp: i64,
}

impl Event {
    pub fn new(key: String, value: String, dir: bool, ordinal: u64) -> Self {
        Self {
            ordinal,
            key,
            value,
            dir,
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

/// Normalizes a path: strips leading and trailing slashes and rejects
/// empty segments.
pub fn normalize_key(key: &str) -> Option<String> {
    let trimmed = key.trim_matches('/');
    if trimmed.split('/').any(|segment| segment.is_empty()) && !trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_string())
}

/// Parent path of a normalized key; the root is `""`.
pub fn parent_key(key: &str) -> &str {
    key.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
}

/// Every proper ancestor of a normalized key, outermost first.
pub fn ancestors(key: &str) -> Vec<&str> {
    key.match_indices('/').map(|(idx, _)| &key[..idx]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_slashes() {
        assert_eq!(normalize_key("/ns/a/").as_deref(), Some("ns/a"));
        assert_eq!(normalize_key("").as_deref(), Some(""));
        assert_eq!(normalize_key("ns//a"), None);
    }

    #[test]
    fn parent_and_ancestors() {
        assert_eq!(parent_key("ns/sub/x"), "ns/sub");
        assert_eq!(parent_key("ns"), "");
        assert_eq!(ancestors("ns/sub/x"), vec!["ns", "ns/sub"]);
        assert!(ancestors("ns").is_empty());
    }
}
