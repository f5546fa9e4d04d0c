//! Nodes of the remote hierarchical log and key path helpers.

/// A node as returned by a read or delivered by a watch.
///
/// A node with children, or with `dir` set, is a directory and its `value`
/// carries no meaning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogNode {
    pub key: String,
    pub value: String,
    pub dir: bool,
    pub children: Vec<LogNode>,
}

impl LogNode {
    /// A value node.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            dir: false,
            children: Vec::new(),
        }
    }

    /// A directory node.
    pub fn directory(key: impl Into<String>, children: Vec<LogNode>) -> Self {
        Self {
            key: key.into(),
            value: String::new(),
            dir: true,
            children,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.dir || !self.children.is_empty()
    }

    /// Collects every value node in this subtree, depth first.
    pub fn leaves(&self) -> Vec<&LogNode> {
        let mut out = Vec::new();
        collect_leaves(self, &mut out);
        out
    }
}

fn collect_leaves<'a>(node: &'a LogNode, out: &mut Vec<&'a LogNode>) {
    for child in &node.children {
        if child.is_dir() {
            collect_leaves(child, out);
        } else {
            out.push(child);
        }
    }
}

/// The final `/` segment of a full key.
///
/// Any hierarchy above the last segment is dropped, so `ns/a/x` and
/// `ns/b/x` both map to `x`.
pub fn local_key(full_key: &str) -> &str {
    full_key.rsplit('/').next().unwrap_or(full_key)
}

/// Joins a keyspace and a local key into a full key.
pub fn join_key(keyspace: &str, key: &str) -> String {
    format!("{}/{}", keyspace, key)
}

/// Compares two paths ignoring leading and trailing slashes.
pub(crate) fn same_path(a: &str, b: &str) -> bool {
    a.trim_matches('/') == b.trim_matches('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_key_takes_last_segment() {
        assert_eq!(local_key("ns/sub/x"), "x");
        assert_eq!(local_key("ns/x"), "x");
        assert_eq!(local_key("/ns/x"), "x");
        assert_eq!(local_key("x"), "x");
    }

    #[test]
    fn join_uses_single_slash() {
        assert_eq!(join_key("ns", "a"), "ns/a");
    }

    #[test]
    fn directories_are_detected() {
        assert!(!LogNode::new("ns/a", "1").is_dir());
        assert!(LogNode::directory("ns", Vec::new()).is_dir());

        let mut implicit = LogNode::new("ns", "");
        implicit.children.push(LogNode::new("ns/a", "1"));
        assert!(implicit.is_dir());
    }

    #[test]
    fn leaves_flatten_nested_directories() {
        let tree = LogNode::directory(
            "ns",
            vec![
                LogNode::new("ns/a", "1"),
                LogNode::directory("ns/sub", vec![LogNode::new("ns/sub/x", "2")]),
                LogNode::directory("ns/empty", Vec::new()),
            ],
        );

        let keys: Vec<&str> = tree.leaves().iter().map(|n| n.key.as_str()).collect();
        assert_eq!(keys, vec!["ns/a", "ns/sub/x"]);
    }

    #[test]
    fn same_path_ignores_slashes() {
        assert!(same_path("/ns/", "ns"));
        assert!(!same_path("ns/a", "ns"));
    }
}
