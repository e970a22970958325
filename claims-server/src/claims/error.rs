//! Negotiation error taxonomy
//!
//! Everything a claim, offer or bid can be rejected for. Conversion into
//! [`CommandError`] produces the exact reply a buyer sees, so the messages
//! here are chat-facing text, not debug strings.

use rust_decimal::Decimal;
use shared::{CommandError, ErrorCode, SlotNumber};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum NegotiationError {
    #[error("Post not found")]
    PostNotFound,

    #[error("Slot {slot} out of range, post has {total} slots")]
    SlotOutOfRange { slot: SlotNumber, total: u32 },

    #[error("This post has numbered slots, say which one")]
    SlotRequired,

    #[error("Already sold out")]
    SoldOut,

    #[error("You already hold this slot")]
    AlreadyOwner,

    #[error("This is an auction, place a bid instead")]
    AuctionPost,

    #[error("This is not an auction, reply 'claim' to buy")]
    NotAnAuction,

    #[error("Nothing of yours to release here")]
    NothingToRelease,

    #[error("This slot is already settled")]
    SlotSettled,

    #[error("Slot already claimed, join the waitlist instead")]
    SlotTaken,

    #[error("Offer must beat your previous {previous}")]
    OfferTooLow { previous: Decimal },

    #[error("That's the asking price, just claim it")]
    OfferAtListPrice,

    #[error("Counter must beat the highest offer of {highest}")]
    CounterTooLow { highest: Decimal },

    #[error("No offers on this slot yet")]
    NoOffers,

    #[error("No counter-offer waiting for you")]
    NoCounterForUser,

    #[error("No bids were placed")]
    NoBids,

    #[error("Bidding has closed")]
    AuctionInactive,

    #[error("Bid must beat {minimum}")]
    BidTooLow { minimum: Decimal },

    #[error("Auction is still running")]
    AuctionStillActive,

    #[error("Auction already resolved")]
    AuctionAlreadyResolved,

    #[error("That end time is already in the past")]
    EndTimeInPast,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<NegotiationError> for CommandError {
    fn from(err: NegotiationError) -> Self {
        let code = match &err {
            NegotiationError::PostNotFound
            | NegotiationError::NoOffers
            | NegotiationError::NoBids => ErrorCode::NotFound,

            NegotiationError::SoldOut
            | NegotiationError::AlreadyOwner
            | NegotiationError::SlotSettled
            | NegotiationError::SlotTaken
            | NegotiationError::NothingToRelease
            | NegotiationError::NoCounterForUser
            | NegotiationError::AuctionInactive
            | NegotiationError::AuctionStillActive
            | NegotiationError::AuctionAlreadyResolved => ErrorCode::StateConflict,

            NegotiationError::SlotOutOfRange { .. }
            | NegotiationError::SlotRequired
            | NegotiationError::AuctionPost
            | NegotiationError::NotAnAuction
            | NegotiationError::OfferTooLow { .. }
            | NegotiationError::OfferAtListPrice
            | NegotiationError::CounterTooLow { .. }
            | NegotiationError::BidTooLow { .. }
            | NegotiationError::EndTimeInPast => ErrorCode::Validation,

            NegotiationError::Internal(detail) => {
                tracing::error!(error = %detail, "Negotiation internal error");
                ErrorCode::Internal
            }
        };
        CommandError::new(code, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn errors_map_to_stable_codes() {
        let err: CommandError = NegotiationError::SoldOut.into();
        assert_eq!(err.code, ErrorCode::StateConflict);

        let err: CommandError = NegotiationError::BidTooLow { minimum: dec!(15) }.into();
        assert_eq!(err.code, ErrorCode::Validation);
        assert!(err.message.contains("15"));

        let err: CommandError = NegotiationError::PostNotFound.into();
        assert_eq!(err.code, ErrorCode::NotFound);
    }
}
