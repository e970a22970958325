//! Post negotiation state
//!
//! Everything that changes after a post is classified lives here: who
//! holds which slot, who is queued behind them, and what offers are on
//! the table.
//!
//! # Architecture
//!
//! ```text
//! PostRegistry (DashMap<PostId, Arc<Mutex<PostEntry>>>)
//!      │   one mutex per post; every compound operation runs inside it
//!      └─ PostEntry
//!           ├─ Post            (immutable descriptor)
//!           └─ Negotiation
//!                ├─ Single     capacity pool + waitlist + offer book
//!                ├─ Multi      numbered slots, each with its own state
//!                └─ Auction    bid state (driven by the auction engine)
//! ```

pub mod error;
pub mod ledger;
pub mod offers;
pub mod waitlist;

pub use error::NegotiationError;
pub use ledger::{
    ClaimOutcome, CounterOutcome, Negotiation, OfferOutcome, PostEntry, PostRegistry,
    ReleaseOutcome, ResetStats, SaleOutcome, UserReleased,
};
pub use offers::{CounterOffer, Offer, OfferPlaced, SlotOffers};
pub use waitlist::{JoinOutcome, Waitlist};
