// SPDX-License-Identifier: MIT

//! ID generation and the newtype identifier macro.

/// Returns a string slice truncated to at most `n` characters, UTF-8-safe
/// (truncates on a char boundary at or before `n`).
pub trait ShortId {
    fn short(&self, n: usize) -> &str;
}

impl ShortId for str {
    fn short(&self, n: usize) -> &str {
        if self.len() <= n {
            return self;
        }
        let mut end = n;
        while !self.is_char_boundary(end) {
            end -= 1;
        }
        &self[..end]
    }
}

/// Define a newtype identifier wrapped around `String`.
#[macro_export]
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        pub struct $name:ident;
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn short(&self, n: usize) -> &str {
                use $crate::id::ShortId;
                self.0.short(n)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

crate::define_id! {
    /// Unique identifier for one supervised agent: `<agent_type>-<short-uuid>`.
    pub struct AgentId;
}

/// Generates unique identifiers. Swappable so tests get deterministic IDs.
pub trait IdGen: Send + Sync {
    fn next(&self) -> String;
}

/// UUID v4 based generator, used in production.
#[derive(Clone, Default)]
pub struct UuidIdGen;

impl IdGen for UuidIdGen {
    fn next(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Sequential generator for deterministic tests.
#[derive(Clone)]
pub struct SequentialIdGen {
    prefix: String,
    counter: std::sync::Arc<std::sync::atomic::AtomicU64>,
}

impl SequentialIdGen {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: std::sync::Arc::new(std::sync::atomic::AtomicU64::new(1)),
        }
    }
}

impl IdGen for SequentialIdGen {
    fn next(&self) -> String {
        let n = self
            .counter
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        format!("{}-{n}", self.prefix)
    }
}

/// Build an `agent_id` of the form `<agent_type>-<short-uuid>` (first 8 chars).
pub fn new_agent_id(agent_type: &str, gen: &dyn IdGen) -> AgentId {
    let raw = gen.next();
    AgentId::new(format!("{agent_type}-{}", raw.short(8)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_truncates() {
        assert_eq!("abcdef".short(3), "abc");
        assert_eq!("ab".short(3), "ab");
    }

    #[test]
    fn short_is_char_boundary_safe() {
        let s = "a\u{1F600}bcdef"; // emoji is 4 bytes
        // truncating at byte 2 would split the emoji; should back off
        let _ = s.short(2);
    }

    #[test]
    fn sequential_id_gen_increments() {
        let gen = SequentialIdGen::new("id");
        assert_eq!(gen.next(), "id-1");
        assert_eq!(gen.next(), "id-2");
    }

    #[test]
    fn new_agent_id_has_vendor_prefix() {
        let gen = SequentialIdGen::new("00000000-aaaa-bbbb-cccc-dddddddddddd");
        let id = new_agent_id("claude", &gen);
        assert!(id.as_str().starts_with("claude-"));
    }

    proptest::proptest! {
        /// `short` never panics and never splits a multi-byte char, for any
        /// string and any truncation length.
        #[test]
        fn short_is_always_char_boundary_safe(s in ".{0,40}", n in 0usize..40) {
            let truncated = s.short(n);
            proptest::prop_assert!(s.is_char_boundary(truncated.len()));
            proptest::prop_assert!(truncated.len() <= s.len());
        }
    }
}
