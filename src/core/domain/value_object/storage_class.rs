/// Mobility class of a storage backend.
///
/// Local volumes pin a guest to its node; shared volumes are reachable
/// from every node and never block a migration on their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageClass {
    Local,
    Shared,
}

impl StorageClass {
    /// Classifies a storage backend name against the configured
    /// local-storage patterns. A pattern matches exactly, or by prefix
    /// when it ends with `*`.
    pub fn classify(backend: &str, local_patterns: &[String]) -> Self {
        for pattern in local_patterns {
            let matched = match pattern.strip_suffix('*') {
                Some(prefix) => backend.starts_with(prefix),
                None => backend == pattern,
            };
            if matched {
                return StorageClass::Local;
            }
        }
        StorageClass::Shared
    }

    pub fn is_local(&self) -> bool {
        matches!(self, StorageClass::Local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterns() -> Vec<String> {
        vec!["local".to_string(), "local-*".to_string()]
    }

    #[test]
    fn test_exact_pattern_matches() {
        assert_eq!(
            StorageClass::classify("local", &patterns()),
            StorageClass::Local
        );
    }

    #[test]
    fn test_wildcard_pattern_matches_by_prefix() {
        assert_eq!(
            StorageClass::classify("local-lvm", &patterns()),
            StorageClass::Local
        );
        assert_eq!(
            StorageClass::classify("local-zfs", &patterns()),
            StorageClass::Local
        );
    }

    #[test]
    fn test_unmatched_backends_are_shared() {
        assert_eq!(
            StorageClass::classify("ceph-pool", &patterns()),
            StorageClass::Shared
        );
        // "localstore" does not equal "local" and "local-*" needs the dash.
        assert_eq!(
            StorageClass::classify("localstore", &patterns()),
            StorageClass::Shared
        );
    }
}
