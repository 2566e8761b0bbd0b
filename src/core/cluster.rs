//! Session → cluster-id mapping produced by k-means.

use serde::{Deserialize, Serialize};

/// One session's cluster membership plus the cluster's derived label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterAssignment {
    /// The session being assigned.
    pub session_id: String,
    /// 0-based cluster id.
    pub cluster_id: usize,
    /// Human-readable label for the cluster (dominant tag, else project).
    pub label: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_assignment_roundtrip() {
        let a = ClusterAssignment {
            session_id: "s1".to_string(),
            cluster_id: 2,
            label: "auth".to_string(),
        };
        let json = serde_json::to_string(&a).unwrap();
        let back: ClusterAssignment = serde_json::from_str(&json).unwrap();
        assert_eq!(a, back);
    }
}
