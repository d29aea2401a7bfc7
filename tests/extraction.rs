// tests/extraction.rs
//
// Extraction as seen by consumers of the outbound envelope.

use feed_relay::envelope::{OutboundMessage, RawItem};
use feed_relay::extract::{extract, Sentiment};
use serde_json::json;

#[test]
fn btc_moon_sample_is_positive_with_price_and_address() {
    let text = "BTC to the moon, $45000 USD, 0x1234567890123456789012345678901234567890";
    let out = extract(text);

    assert!(out.symbols.iter().any(|s| s == "BTC"));
    assert_eq!(out.prices.len(), 1);
    assert_eq!(out.prices[0].price, 45000.0);
    assert_eq!(out.prices[0].currency, "USD");
    assert_eq!(
        out.addresses.ethereum,
        vec!["0x1234567890123456789012345678901234567890"]
    );
    assert_eq!(out.sentiment, Sentiment::Positive);
}

#[test]
fn bearish_text_with_emoji() {
    let out = extract("ETH looks like a crash incoming 📉 time to short");
    assert_eq!(out.sentiment, Sentiment::Negative);
    for kw in ["crash", "short", "📉"] {
        assert!(out.keywords.iter().any(|k| k == kw), "missing {kw}");
    }
}

#[test]
fn junk_input_never_panics() {
    let inputs = [
        "$$$$ USD USD 0x 0xZZ",
        "\u{0}\u{1}\u{2}",
        "99999999999999999999999999999999999999999 USD",
        "🚀🚀🚀🚀🚀🚀🚀🚀🚀🚀",
    ];
    for s in inputs {
        let _ = extract(s);
    }
    let long = "A".repeat(100_000);
    assert!(extract(&long).symbols.is_empty());
}

#[test]
fn envelope_carries_signals_under_extracted_data() {
    let item = RawItem::new("1", "SOL pump 🚀 at 150 USDT", 5).with_author("alice");
    let msg = OutboundMessage::from_item(item, "https://x.com/i/lists/1");
    let v = serde_json::to_value(&msg).unwrap();

    let data = &v["data"];
    assert_eq!(data["username"], "alice");
    assert_eq!(data["list_url"], "https://x.com/i/lists/1");
    assert_eq!(data["extracted_data"]["sentiment"], "positive");
    // quote currencies are ticker-shaped too
    assert_eq!(data["extracted_data"]["symbols"], json!(["SOL", "USDT"]));
    assert_eq!(
        data["extracted_data"]["prices"],
        json!([{ "price": 150.0, "currency": "USD" }])
    );
}
