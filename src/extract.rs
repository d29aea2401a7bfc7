// src/extract.rs
//! Signal extraction from free text: ticker-like symbols, USD prices, chain
//! addresses and a keyword-count sentiment.
//!
//! Everything here is a pure function of the input string. Patterns are
//! compiled once; there is no failure path, empty input gives empty signals.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Known tickers kept even when shorter than the generic length threshold.
pub const KNOWN_SYMBOLS: &[&str] = &[
    "BTC", "ETH", "SOL", "ADA", "DOT", "LINK", "UNI", "AAVE", "DOGE", "SHIB",
];

pub const BULLISH_KEYWORDS: &[&str] = &[
    "pump", "moon", "bullish", "buy", "long", "rocket", "up", "rise", "gain", "🚀", "📈",
];

pub const BEARISH_KEYWORDS: &[&str] = &[
    "dump", "bear", "bearish", "sell", "short", "crash", "down", "fall", "loss", "📉",
];

// ASCII-only classes: "éBTC" yields BTC and Arabic-Indic digits are no price.
static RE_SYMBOL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?-u:\b)[A-Z]{2,10}(?-u:\b)").unwrap());
static RE_PRICE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\$?([0-9]+(?:\.[0-9]+)?)\s*(?-u:USD|USDT|USDC|\$)").unwrap()
});
static RE_ETH: Lazy<Regex> = Lazy::new(|| Regex::new(r"0x[a-fA-F0-9]{40}").unwrap());
static RE_SOL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[1-9A-HJ-NP-Za-km-z]{32,44}").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    #[default]
    Neutral,
    Negative,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceMention {
    pub price: f64,
    pub currency: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Addresses {
    pub ethereum: Vec<String>,
    pub solana: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedSignals {
    pub symbols: Vec<String>,
    pub prices: Vec<PriceMention>,
    pub addresses: Addresses,
    pub sentiment: Sentiment,
    pub keywords: Vec<String>,
}

pub fn extract(text: &str) -> ExtractedSignals {
    if text.is_empty() {
        return ExtractedSignals::default();
    }

    let lower = text.to_lowercase();
    let (sentiment, keywords) = sentiment(&lower);

    ExtractedSignals {
        symbols: symbols(text),
        prices: prices(text),
        addresses: Addresses {
            ethereum: distinct(RE_ETH.find_iter(text).map(|m| m.as_str())),
            solana: distinct(
                RE_SOL
                    .find_iter(text)
                    .map(|m| m.as_str())
                    .filter(|a| (32..=44).contains(&a.len())),
            ),
        },
        sentiment,
        keywords,
    }
}

/// Uppercase tokens of 2–10 letters that are either known tickers or at least
/// three letters long. Over-inclusive on purpose: "NEWS" passes too.
pub fn symbols(text: &str) -> Vec<String> {
    distinct(
        RE_SYMBOL
            .find_iter(text)
            .map(|m| m.as_str())
            .filter(|s| KNOWN_SYMBOLS.contains(s) || s.len() >= 3),
    )
}

pub fn prices(text: &str) -> Vec<PriceMention> {
    RE_PRICE
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .filter_map(|m| m.as_str().parse::<f64>().ok())
        .map(|price| PriceMention {
            price,
            currency: "USD".to_string(),
        })
        .collect()
}

/// `lower` must already be lowercased. Keywords are substring hits, so
/// "bearish" also counts as "bear".
fn sentiment(lower: &str) -> (Sentiment, Vec<String>) {
    let hits = |list: &[&str]| -> Vec<String> {
        list.iter()
            .filter(|kw| lower.contains(*kw))
            .map(|kw| kw.to_string())
            .collect()
    };
    let bullish = hits(BULLISH_KEYWORDS);
    let bearish = hits(BEARISH_KEYWORDS);

    let s = match bullish.len().cmp(&bearish.len()) {
        std::cmp::Ordering::Greater => Sentiment::Positive,
        std::cmp::Ordering::Less => Sentiment::Negative,
        std::cmp::Ordering::Equal => Sentiment::Neutral,
    };

    let mut keywords = bullish;
    keywords.extend(bearish);
    (s, keywords)
}

/// First-occurrence order, duplicates removed.
fn distinct<'a>(it: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    it.filter(|s| seen.insert(*s)).map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticker_price_and_address_sample() {
        let out = extract("BTC to the moon, $45000 USD, 0x1234567890123456789012345678901234567890");
        assert!(out.symbols.contains(&"BTC".to_string()));
        assert_eq!(
            out.prices,
            vec![PriceMention {
                price: 45000.0,
                currency: "USD".into()
            }]
        );
        assert_eq!(
            out.addresses.ethereum,
            vec!["0x1234567890123456789012345678901234567890".to_string()]
        );
        assert!(out.addresses.solana.is_empty());
        assert_eq!(out.sentiment, Sentiment::Positive);
        assert_eq!(out.keywords, vec!["moon".to_string()]);
    }

    #[test]
    fn empty_text_is_empty_signals() {
        let out = extract("");
        assert_eq!(out, ExtractedSignals::default());
        assert_eq!(out.sentiment, Sentiment::Neutral);
    }

    #[test]
    fn two_letter_tokens_need_allowlist() {
        assert_eq!(symbols("OK so AB and ETH NEWS"), vec!["ETH", "NEWS"]);
        assert_eq!(symbols("SOL SOL SOL"), vec!["SOL"]);
        // lowercase and over-long tokens never match
        assert!(symbols("btc ABCDEFGHIJK").is_empty());
    }

    #[test]
    fn word_boundaries_ignore_non_ascii_letters() {
        assert_eq!(symbols("éBTC and ETHé"), vec!["BTC", "ETH"]);
        assert_eq!(symbols("naïveSOL"), Vec::<String>::new());
    }

    #[test]
    fn only_ascii_digits_and_markers_make_prices() {
        assert!(prices("\u{664}\u{665} USD").is_empty());
        assert!(prices("5 u\u{17f}d").is_empty());
        let v: Vec<f64> = prices("\u{664}5 USD").iter().map(|p| p.price).collect();
        assert_eq!(v, vec![5.0]);
    }

    #[test]
    fn price_markers_are_case_insensitive() {
        let p = prices("entry 1.25 usdt, exit 3$ and 10 USDC");
        let v: Vec<f64> = p.iter().map(|x| x.price).collect();
        assert_eq!(v, vec![1.25, 3.0, 10.0]);
        assert!(p.iter().all(|x| x.currency == "USD"));
    }

    #[test]
    fn solana_addresses_are_length_filtered() {
        let addr = "So11111111111111111111111111111111111111112";
        let out = extract(&format!("mint {addr} and short abc"));
        assert_eq!(out.addresses.solana, vec![addr.to_string()]);
    }

    #[test]
    fn tie_is_neutral_but_keywords_are_kept() {
        let out = extract("buy the dip or sell the news");
        assert_eq!(out.sentiment, Sentiment::Neutral);
        assert_eq!(out.keywords, vec!["buy".to_string(), "sell".to_string()]);
    }

    #[test]
    fn bearish_wins_on_count() {
        let out = extract("Bearish crash incoming 📉");
        assert_eq!(out.sentiment, Sentiment::Negative);
        assert!(out.keywords.contains(&"bear".to_string()));
        assert!(out.keywords.contains(&"📉".to_string()));
    }
}
