//! Shared types for the claims framework
//!
//! Common types used by the claims server and any future client crates:
//! post and claim models, account tracking, inbound events, outbound
//! notifications and the command error taxonomy.

pub mod account;
pub mod claim;
pub mod error;
pub mod event;
pub mod post;
pub mod types;

// Re-exports
pub use serde::{Deserialize, Serialize};

pub use account::{AccountSnapshot, PaymentStatus, ShippingMethod};
pub use claim::{ClaimOrigin, ClaimRecord};
pub use error::{CommandError, ErrorCode};
pub use event::{InboundEvent, Notification};
pub use post::{Post, PostMode};
pub use types::{ChatId, MessageId, PostId, SlotNumber, UserId};
