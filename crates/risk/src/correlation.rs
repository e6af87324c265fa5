/// Base assets that tend to move together. Two open positions in the same
/// group and direction count as one concentrated bet.
const CORRELATED_GROUPS: &[&[&str]] = &[
    &["BTC", "ETH", "BNB"],
    &["DOGE", "SHIB"],
    &["SOL", "AVAX"],
    &["XRP", "ADA"],
];

const QUOTE_ASSETS: &[&str] = &["USDT", "USDC", "FDUSD", "BUSD", "USD"];

/// Base asset of a symbol like `BTCUSDT`.
pub fn base_asset(symbol: &str) -> &str {
    QUOTE_ASSETS
        .iter()
        .find_map(|q| symbol.strip_suffix(q).filter(|b| !b.is_empty()))
        .unwrap_or(symbol)
}

/// Whether two symbols share a base asset or a correlation group.
pub fn are_correlated(a: &str, b: &str) -> bool {
    let (a, b) = (base_asset(a), base_asset(b));
    if a.eq_ignore_ascii_case(b) {
        return true;
    }
    CORRELATED_GROUPS.iter().any(|group| {
        group.iter().any(|g| g.eq_ignore_ascii_case(a)) && group.iter().any(|g| g.eq_ignore_ascii_case(b))
    })
}
