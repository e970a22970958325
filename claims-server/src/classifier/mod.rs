//! Post classification
//!
//! Free chat text goes in, a typed post descriptor comes out. Detection
//! runs in priority order: auction, then multi, then anything with a
//! recognizable price as a single sale. Text matching none of those is
//! not a sale post and is ignored.
//!
//! Parsing is deliberately isolated here so the negotiation state
//! machine never touches raw text.

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::LazyLock;

use shared::PostMode;
use shared::post::MAX_ITEM_NAME_LEN;

use crate::claims::NegotiationError;
use crate::utils::time::parse_end_expression;

/// Default slot count for a multi post naming no quantity
const DEFAULT_MULTI_SLOTS: u32 = 10;

static CURRENCY_PRICE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\s*(\d+(?:\.\d{1,2})?)").expect("currency regex"));

static KEYWORD_PRICE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:price|cost|each)\s*[:\-]?\s*\$?(\d+(?:\.\d{1,2})?)")
        .expect("keyword price regex")
});

static WORDED_PRICE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d+(?:\.\d{1,2})?)\s*(?:dollars?|sgd|usd)\b").expect("worded price regex")
});

static LEADING_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+(?:\.\d{1,2})?)\b").expect("leading number regex"));

static QUANTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:qty|quantity)\s*[:\-]?\s*(\d+)").expect("quantity regex")
});

static STARTING_BID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:starting\s+bid|sb|bid)\s*[:\-]?\s*\$?(\d+(?:\.\d{1,2})?)")
        .expect("starting bid regex")
});

static AUCTION_KEYWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bauction\b").expect("auction regex"));

static AUCTION_TIME_HINT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:ends?|bid)\b").expect("auction hint regex"));

static MULTI_KEYWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bmulti(?:ple)?\b").expect("multi regex"));

static ANTI_SNIPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\banti[\s\-]?snipe\b(?:\s*[:\-]?\s*(?:applies|yes|true))?")
        .expect("anti-snipe regex")
});

static SALE_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:for\s+sale|selling|claim)\s*[:\-]?\s*").expect("sale prefix regex")
});

static NAME_TRAILER: LazyLock<Regex> = LazyLock::new(|| {
    // Price, reserve, bid and deadline chatter that trails an item name
    Regex::new(
        r"(?i)(\$\s*\d.*|\brp\b.*|\bends?\b.*|\b(?:qty|quantity)\s*[:\-]?\s*\d+.*|\b(?:price|cost|each)\s*[:\-]?\s*\$?\d.*|\b(?:starting\s+bid|sb|bid)\b.*)$",
    )
    .expect("name trailer regex")
});

/// A post descriptor recovered from raw text
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedPost {
    pub item_name: String,
    pub mode: PostMode,
}

/// Classify raw post text.
///
/// `Ok(None)` means the text is not a sale post. The only hard error is
/// an auction deadline already in the past.
pub fn classify(
    text: &str,
    now: DateTime<Utc>,
    default_auction_hours: i64,
) -> Result<Option<ClassifiedPost>, NegotiationError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    if AUCTION_KEYWORD.is_match(trimmed) && AUCTION_TIME_HINT.is_match(trimmed) {
        return classify_auction(trimmed, now, default_auction_hours).map(Some);
    }

    if MULTI_KEYWORD.is_match(trimmed) {
        return Ok(Some(classify_multi(trimmed)));
    }

    if let Some(price) = extract_price(trimmed) {
        return Ok(Some(classify_single(trimmed, price)));
    }

    Ok(None)
}

fn classify_single(text: &str, price: Decimal) -> ClassifiedPost {
    let capacity = extract_quantity(text).unwrap_or(1);
    ClassifiedPost {
        item_name: single_item_name(text),
        mode: PostMode::Single {
            price: Some(price),
            capacity,
        },
    }
}

fn classify_multi(text: &str) -> ClassifiedPost {
    let slots = extract_quantity(text).unwrap_or(DEFAULT_MULTI_SLOTS);
    ClassifiedPost {
        item_name: multi_item_name(text),
        mode: PostMode::Multi {
            price: extract_price(text),
            slots,
        },
    }
}

fn classify_auction(
    text: &str,
    now: DateTime<Utc>,
    default_hours: i64,
) -> Result<ClassifiedPost, NegotiationError> {
    let display_end = match parse_end_expression(text) {
        Some(end) => {
            if end <= now {
                return Err(NegotiationError::EndTimeInPast);
            }
            end
        }
        None => now + Duration::hours(default_hours),
    };

    let starting_bid = STARTING_BID
        .captures(text)
        .and_then(|c| Decimal::from_str(&c[1]).ok())
        .or_else(|| extract_price(text));

    Ok(ClassifiedPost {
        item_name: auction_item_name(text),
        mode: PostMode::Auction {
            starting_bid,
            display_end,
            anti_snipe: ANTI_SNIPE.is_match(text),
        },
    })
}

// ============ Price and quantity ============

fn extract_price(text: &str) -> Option<Decimal> {
    let matched = CURRENCY_PRICE
        .captures(text)
        .or_else(|| KEYWORD_PRICE.captures(text))
        .or_else(|| WORDED_PRICE.captures(text));
    if let Some(caps) = matched {
        return Decimal::from_str(&caps[1]).ok();
    }
    // Lone leading number on the first line
    let first_line = text.lines().next()?;
    LEADING_NUMBER
        .captures(first_line)
        .and_then(|c| Decimal::from_str(&c[1]).ok())
}

fn extract_quantity(text: &str) -> Option<u32> {
    QUANTITY.captures(text).and_then(|c| c[1].parse().ok())
}

// ============ Item names ============

fn truncate_name(name: &str) -> String {
    name.chars().take(MAX_ITEM_NAME_LEN).collect()
}

fn strip_name_noise(line: &str) -> String {
    let without_prefix = SALE_PREFIX.replace(line, "");
    let without_trailer = NAME_TRAILER.replace(&without_prefix, "");
    without_trailer
        .trim()
        .trim_matches(|c: char| matches!(c, '-' | ':' | ',' | '.' | '!'))
        .trim()
        .to_string()
}

fn single_item_name(text: &str) -> String {
    let name = text
        .lines()
        .next()
        .map(|line| {
            // A lone leading number is the price, not the name
            let line = LEADING_NUMBER.replace(line, "");
            strip_name_noise(&line)
        })
        .unwrap_or_default();
    if name.is_empty() {
        "Item".to_string()
    } else {
        truncate_name(&name)
    }
}

fn multi_item_name(text: &str) -> String {
    // Lines 2-4, minus the listing keyword line and anything that is
    // pure price/quantity bookkeeping
    let picked: Vec<String> = text
        .lines()
        .skip(1)
        .take(3)
        .filter(|line| !MULTI_KEYWORD.is_match(line))
        .map(strip_name_noise)
        .filter(|name| !name.is_empty())
        .collect();
    if picked.is_empty() {
        "Multiple Items".to_string()
    } else {
        truncate_name(&picked.join(" "))
    }
}

fn auction_item_name(text: &str) -> String {
    // Text after the "auction" keyword in the first three lines
    for line in text.lines().take(3) {
        if let Some(m) = AUCTION_KEYWORD.find(line) {
            let after = strip_name_noise(&line[m.end()..]);
            if !after.is_empty() {
                return truncate_name(&after);
            }
        }
    }
    // Else the first meaningful later line
    let fallback = text
        .lines()
        .skip(1)
        .map(strip_name_noise)
        .find(|name| !name.is_empty());
    match fallback {
        Some(name) => truncate_name(&name),
        None => "Auction Item".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn classify_ok(text: &str) -> Option<ClassifiedPost> {
        classify(text, Utc::now(), 24).unwrap()
    }

    #[test]
    fn plain_text_is_ignored()  {
        assert_eq!(classify_ok("thanks everyone for the meetup!"), None);
        assert_eq!(classify_ok(""), None);
    }

    #[test]
    fn single_post_with_currency_price() {
        let post = classify_ok("For sale: enamel pin $12.50\nDM for details").unwrap();
        assert_eq!(post.item_name, "enamel pin");
        assert_eq!(
            post.mode,
            PostMode::Single {
                price: Some(dec!(12.50)),
                capacity: 1
            }
        );
    }

    #[test]
    fn single_post_with_keyword_price_and_quantity() {
        let post = classify_ok("Sticker sheet, price: 3 qty: 4").unwrap();
        assert_eq!(
            post.mode,
            PostMode::Single {
                price: Some(dec!(3)),
                capacity: 4
            }
        );
    }

    #[test]
    fn lone_leading_number_counts_as_a_price() {
        let post = classify_ok("15 for the blue mug").unwrap();
        assert!(matches!(
            post.mode,
            PostMode::Single { price: Some(p), .. } if p == dec!(15)
        ));
    }

    #[test]
    fn multi_post_defaults_to_ten_slots() {
        let post = classify_ok("Multiple items up for claims!\nAssorted zines $5 each").unwrap();
        assert_eq!(post.item_name, "Assorted zines");
        assert_eq!(
            post.mode,
            PostMode::Multi {
                price: Some(dec!(5)),
                slots: 10
            }
        );
    }

    #[test]
    fn multi_post_quantity_overrides_default() {
        let post = classify_ok("Multi listing qty: 4\nHand-thrown bowls\n$20 each").unwrap();
        assert_eq!(post.item_name, "Hand-thrown bowls");
        assert!(matches!(post.mode, PostMode::Multi { slots: 4, .. }));
    }

    #[test]
    fn multi_without_usable_lines_gets_default_name() {
        let post = classify_ok("multiple items").unwrap();
        assert_eq!(post.item_name, "Multiple Items");
    }

    #[test]
    fn auction_with_deadline_and_starting_bid() {
        let post = classify_ok(
            "Auction vintage lamp sb: 40\nends 25/12/2099, Friday, 1800h\nanti-snipe applies",
        )
        .unwrap();
        assert_eq!(post.item_name, "vintage lamp");
        let PostMode::Auction {
            starting_bid,
            anti_snipe,
            display_end,
        } = post.mode
        else {
            panic!("expected auction");
        };
        assert_eq!(starting_bid, Some(dec!(40)));
        assert!(anti_snipe);
        assert_eq!(display_end.format("%Y").to_string(), "2099");
    }

    #[test]
    fn auction_without_deadline_defaults_to_24_hours() {
        let now = Utc::now();
        let post = classify("Auction: signed print, bid from $30", now, 24)
            .unwrap()
            .unwrap();
        let PostMode::Auction { display_end, .. } = post.mode else {
            panic!("expected auction");
        };
        assert_eq!(display_end, now + Duration::hours(24));
    }

    #[test]
    fn auction_deadline_in_the_past_is_rejected() {
        let err = classify("Auction mug ends 01/01/2020, 1200h", Utc::now(), 24).unwrap_err();
        assert_eq!(err, NegotiationError::EndTimeInPast);
    }

    #[test]
    fn auction_name_strips_trailing_price_chatter() {
        let post = classify_ok("Auction ceramic vase $50 ends 25/12/2099, 1800h").unwrap();
        assert_eq!(post.item_name, "ceramic vase");
    }

    #[test]
    fn auction_falls_back_to_default_name() {
        let post = classify_ok("auction!\nends soon, place your bid").unwrap();
        assert_eq!(post.item_name, "Auction Item");
    }

    #[test]
    fn item_names_are_truncated() {
        let long = format!("{} $5", "x".repeat(150));
        let post = classify_ok(&long).unwrap();
        assert_eq!(post.item_name.chars().count(), MAX_ITEM_NAME_LEN);
    }
}
