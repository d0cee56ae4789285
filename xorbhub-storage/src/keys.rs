//! Storage key layout
//!
//! Keys fan out on the first two pairs of hex characters to bound directory
//! size: `cas/blocks/ab/cd/abcd…`.

fn fan_out(prefix: &str, id: &str) -> String {
    if id.len() >= 4 {
        format!("{}/{}/{}/{}", prefix, &id[..2], &id[2..4], id)
    } else {
        format!("{}/{}", prefix, id)
    }
}

/// Standalone block object
pub fn block_key(hash: &str) -> String {
    fan_out("cas/blocks", hash)
}

/// Sealed xorb object
pub fn xorb_key(xorb_id: &str) -> String {
    fan_out("cas/xorbs", xorb_id)
}

/// Serialized shard object
pub fn shard_key(shard_id: &str) -> String {
    fan_out("cas/shards", shard_id)
}

/// The raw, un-chunked object behind a file
pub fn raw_object_key(content_hash: &str) -> String {
    fan_out("lfs", content_hash)
}

/// Reject keys that could escape a filesystem root
pub fn is_safe_key(key: &str) -> bool {
    !key.is_empty()
        && !key.starts_with('/')
        && key
            .split('/')
            .all(|seg| !seg.is_empty() && seg != "." && seg != "..")
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'/' | b'-' | b'_' | b'.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let h = "abcdef0123";
        assert_eq!(block_key(h), "cas/blocks/ab/cd/abcdef0123");
        assert_eq!(xorb_key(h), "cas/xorbs/ab/cd/abcdef0123");
        assert_eq!(shard_key(h), "cas/shards/ab/cd/abcdef0123");
        assert_eq!(raw_object_key(h), "lfs/ab/cd/abcdef0123");
    }

    #[test]
    fn test_safe_keys() {
        assert!(is_safe_key("cas/blocks/ab/cd/abcd"));
        assert!(!is_safe_key("../etc/passwd"));
        assert!(!is_safe_key("/abs"));
        assert!(!is_safe_key("a//b"));
        assert!(!is_safe_key("a/./b"));
        assert!(!is_safe_key("a b"));
        assert!(!is_safe_key(""));
    }
}
