//! Identifier newtypes
//!
//! Every entity the server keys on gets its own wrapper so ids cannot be
//! mixed up at call sites. All of them are plain integers on the wire.

use serde::{Deserialize, Serialize};

/// Timestamp type (Unix milliseconds)
pub type Timestamp = i64;

macro_rules! id_newtype {
    ($(#[$doc:meta])* $name:ident($inner:ty)) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub $inner);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$inner> for $name {
            fn from(v: $inner) -> Self {
                Self(v)
            }
        }
    };
}

id_newtype!(
    /// A sale post, unique within its chat
    PostId(i64)
);

id_newtype!(
    /// A chat participant
    UserId(i64)
);

id_newtype!(
    /// The chat the post lives in
    ChatId(i64)
);

id_newtype!(
    /// A raw chat message
    MessageId(i64)
);

/// One-based slot index within a multi-item post.
///
/// Single posts always address slot 1; callers that omit the number
/// get [`SlotNumber::FIRST`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotNumber(pub u32);

impl SlotNumber {
    pub const FIRST: SlotNumber = SlotNumber(1);

    /// Zero-based index for slice addressing
    pub fn index(&self) -> usize {
        (self.0 as usize).saturating_sub(1)
    }
}

impl std::fmt::Display for SlotNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_number_index_is_zero_based() {
        assert_eq!(SlotNumber::FIRST.index(), 0);
        assert_eq!(SlotNumber(3).index(), 2);
    }

    #[test]
    fn ids_serialize_transparently() {
        let id = PostId(42);
        assert_eq!(serde_json::to_string(&id).unwrap(), "42");
        let back: PostId = serde_json::from_str("42").unwrap();
        assert_eq!(back, id);
    }
}
