use serde_json::Value;

/// Implied win probability for American odds, rounded to 3 places.
///
/// Positive odds use `100 / (odds + 100)`; everything else, `-100` included,
/// uses `|odds| / (|odds| + 100)`. There is no separate zero case.
pub fn confidence(odds: f64) -> Option<f64> {
    if !odds.is_finite() {
        return None;
    }
    let p = if odds > 0.0 {
        100.0 / (odds + 100.0)
    } else {
        let a = odds.abs();
        a / (a + 100.0)
    };
    if !p.is_finite() {
        return None;
    }
    Some(round3(p))
}

/// `confidence` over an untyped price: numbers and numeric strings only.
pub fn confidence_from_value(price: &Value) -> Option<f64> {
    let odds = match price {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    confidence(odds)
}

fn round3(p: f64) -> f64 {
    (p * 1000.0).round() / 1000.0
}
