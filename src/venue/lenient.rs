//! Push and response parsing that survives upstream schema drift.
//!
//! Each parser first tries the typed wire form. When that fails it logs a
//! warning and reads whatever usable fields the raw JSON still carries.

use super::{Balance, Profile};
use crate::config::AccountMode;
use crate::market::{Candle, Direction, Instrument, InstrumentId};
use crate::sensor::Mood;
use crate::state::{CloseReason, Position, PositionStatus};
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::str::FromStr;

fn typed<T: DeserializeOwned>(what: &str, value: &Value) -> Option<T> {
    match serde_json::from_value(value.clone()) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            tracing::warn!(what, error = %e, "Payload failed schema check, using raw fields");
            None
        }
    }
}

fn field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| value.get(*k)).filter(|v| !v.is_null())
}

fn decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => {
            let s = n.to_string();
            Decimal::from_str(&s)
                .or_else(|_| Decimal::from_scientific(&s))
                .ok()
        }
        Value::String(s) => Decimal::from_str(s).ok(),
        _ => None,
    }
}

fn decimal_field(value: &Value, keys: &[&str]) -> Option<Decimal> {
    field(value, keys).and_then(decimal)
}

fn u64_field(value: &Value, keys: &[&str]) -> Option<u64> {
    field(value, keys).and_then(|v| match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    })
}

fn instrument_field(value: &Value, keys: &[&str]) -> Option<InstrumentId> {
    u64_field(value, keys).and_then(|v| InstrumentId::try_from(v).ok())
}

fn str_field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    field(value, keys).and_then(Value::as_str)
}

fn bool_field(value: &Value, keys: &[&str]) -> Option<bool> {
    field(value, keys).and_then(Value::as_bool)
}

/// Epoch seconds, or milliseconds when the value is too large for seconds
fn epoch(value: &Value) -> Option<DateTime<Utc>> {
    let raw = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?,
        Value::String(s) => s.parse().ok()?,
        _ => return None,
    };
    if raw > 100_000_000_000 {
        Utc.timestamp_millis_opt(raw).single()
    } else {
        Utc.timestamp_opt(raw, 0).single()
    }
}

fn time_field(value: &Value, keys: &[&str]) -> Option<DateTime<Utc>> {
    field(value, keys).and_then(epoch)
}

fn direction_field(value: &Value, keys: &[&str]) -> Option<Direction> {
    match str_field(value, keys)?.to_ascii_lowercase().as_str() {
        "call" | "higher" | "up" => Some(Direction::Call),
        "put" | "lower" | "down" => Some(Direction::Put),
        _ => None,
    }
}

#[derive(Deserialize)]
struct WireCandle {
    active_id: InstrumentId,
    size: u32,
    from: i64,
    to: i64,
    open: Decimal,
    close: Decimal,
    min: Decimal,
    max: Decimal,
    #[serde(default)]
    volume: Decimal,
}

/// Candle from a candle push or history row
pub fn lenient_candle(msg: &Value) -> Option<Candle> {
    if let Some(wire) = typed::<WireCandle>("candle", msg) {
        return Some(Candle {
            instrument_id: wire.active_id,
            period_seconds: wire.size,
            period_start: Utc.timestamp_opt(wire.from, 0).single()?,
            period_end: Utc.timestamp_opt(wire.to, 0).single()?,
            open: wire.open,
            close: wire.close,
            low: wire.min,
            high: wire.max,
            volume: wire.volume,
        });
    }

    let period_seconds = u64_field(msg, &["size", "period_seconds", "period"])
        .and_then(|v| u32::try_from(v).ok())?;
    let period_start = time_field(msg, &["from", "period_start", "at"])?;
    let open = decimal_field(msg, &["open"])?;
    let close = decimal_field(msg, &["close", "value"])?;
    Some(Candle {
        instrument_id: instrument_field(msg, &["active_id", "instrument_id", "asset_id"])?,
        period_seconds,
        period_start,
        period_end: time_field(msg, &["to", "period_end"])
            .unwrap_or(period_start + chrono::Duration::seconds(i64::from(period_seconds))),
        open,
        close,
        low: decimal_field(msg, &["min", "low"]).unwrap_or(open.min(close)),
        high: decimal_field(msg, &["max", "high"]).unwrap_or(open.max(close)),
        volume: decimal_field(msg, &["volume"]).unwrap_or_default(),
    })
}

/// Candle history response: an array, or an object holding `candles`
pub fn lenient_candles(msg: &Value) -> Vec<Candle> {
    let rows = msg
        .get("candles")
        .and_then(Value::as_array)
        .or_else(|| msg.as_array());
    rows.map(|rows| rows.iter().filter_map(lenient_candle).collect())
        .unwrap_or_default()
}

/// Traders' mood push
pub fn lenient_mood(msg: &Value, now: DateTime<Utc>) -> Option<Mood> {
    Some(Mood {
        instrument_id: instrument_field(msg, &["asset_id", "active_id", "instrument_id"])?,
        value: decimal_field(msg, &["value", "mood"])?,
        at: time_field(msg, &["at", "time"]).unwrap_or(now),
    })
}

#[derive(Deserialize)]
struct WirePosition {
    id: Value,
    active_id: InstrumentId,
    direction: Direction,
    invest: Decimal,
    open_quote: Decimal,
    open_time: i64,
    expiration_time: i64,
    status: PositionStatus,
    #[serde(default)]
    close_quote: Option<Decimal>,
    #[serde(default)]
    close_reason: Option<CloseReason>,
    #[serde(default)]
    close_time: Option<i64>,
    #[serde(default)]
    pnl: Option<Decimal>,
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn close_reason(raw: &str) -> Option<CloseReason> {
    match raw.to_ascii_lowercase().as_str() {
        "win" => Some(CloseReason::Win),
        "loss" | "loose" | "lose" => Some(CloseReason::Loss),
        "tie" | "equal" => Some(CloseReason::Tie),
        "sold" => Some(CloseReason::Sold),
        _ => None,
    }
}

/// Position from a position push or trade placement reply
pub fn lenient_position(msg: &Value) -> Option<Position> {
    if let Some(wire) = typed::<WirePosition>("position", msg) {
        let mut position = Position::open(
            id_string(&wire.id)?,
            wire.active_id,
            wire.direction,
            wire.invest,
            wire.open_quote,
            Utc.timestamp_opt(wire.open_time, 0).single()?,
            Utc.timestamp_opt(wire.expiration_time, 0).single()?,
        );
        if wire.status == PositionStatus::Closed {
            let close_time = wire
                .close_time
                .and_then(|t| Utc.timestamp_opt(t, 0).single())
                .unwrap_or(position.expiration_time);
            let pnl = wire.pnl.unwrap_or_default();
            let reason = wire.close_reason.unwrap_or(CloseReason::Sold);
            let quote = wire.close_quote.unwrap_or(position.open_quote);
            position = position.closed(quote, reason, close_time, pnl);
        }
        return Some(position);
    }

    let id = field(msg, &["id", "position_id", "external_id"]).and_then(id_string)?;
    let invest = decimal_field(msg, &["invest", "amount", "stake"])?;
    let open_time = time_field(msg, &["open_time", "created"])?;
    let mut position = Position::open(
        id,
        instrument_field(msg, &["active_id", "instrument_id"])?,
        direction_field(msg, &["direction", "instrument_dir"])?,
        invest,
        decimal_field(msg, &["open_quote", "value", "price"]).unwrap_or_default(),
        open_time,
        time_field(msg, &["expiration_time", "expired", "exp"]).unwrap_or(open_time),
    );

    let closed = str_field(msg, &["status"]).is_some_and(|s| s.eq_ignore_ascii_case("closed"))
        || field(msg, &["close_reason", "result"]).is_some();
    if closed {
        let raw_reason = str_field(msg, &["close_reason", "result"]);
        let pnl = decimal_field(msg, &["pnl", "profit"])
            .or_else(|| decimal_field(msg, &["close_profit", "win_amount"]).map(|w| w - invest))
            .unwrap_or_default();
        let reason = raw_reason.and_then(close_reason).unwrap_or(CloseReason::Sold);
        let quote = decimal_field(msg, &["close_quote", "exp_value"]).unwrap_or(position.open_quote);
        let close_time = time_field(msg, &["close_time", "closed"]).unwrap_or(position.expiration_time);
        position = position.closed(quote, reason, close_time, pnl);
    }
    Some(position)
}

#[derive(Deserialize)]
struct WireInstrument {
    id: InstrumentId,
    name: String,
    enabled: bool,
    #[serde(default)]
    suspended: bool,
    profit_percent: Decimal,
    min_stake: Decimal,
    max_stake: Decimal,
    #[serde(default)]
    deadtime_seconds: u32,
    #[serde(default)]
    expiration_seconds: Vec<u32>,
}

fn lenient_instrument(raw: &Value) -> Option<Instrument> {
    if let Ok(wire) = serde_json::from_value::<WireInstrument>(raw.clone()) {
        return Some(Instrument {
            id: wire.id,
            name: wire.name,
            enabled: wire.enabled,
            suspended: wire.suspended,
            profit_percent: wire.profit_percent,
            min_stake: wire.min_stake,
            max_stake: wire.max_stake,
            deadtime_seconds: wire.deadtime_seconds,
            expiration_seconds: wire.expiration_seconds,
        });
    }

    let id = instrument_field(raw, &["id", "active_id", "instrument_id"])?;
    Some(Instrument {
        id,
        name: str_field(raw, &["name", "ticker"])
            .map(str::to_string)
            .unwrap_or_else(|| format!("instrument-{id}")),
        enabled: bool_field(raw, &["enabled", "is_enabled"]).unwrap_or(false),
        suspended: bool_field(raw, &["suspended", "is_suspended"]).unwrap_or(false),
        profit_percent: decimal_field(raw, &["profit_percent", "profit"]).unwrap_or_default(),
        min_stake: decimal_field(raw, &["min_stake", "minimal_bet"]).unwrap_or(Decimal::ONE),
        max_stake: decimal_field(raw, &["max_stake", "maximal_bet"]).unwrap_or(Decimal::MAX),
        deadtime_seconds: u64_field(raw, &["deadtime_seconds", "deadtime"])
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(0),
        expiration_seconds: field(raw, &["expiration_seconds", "expirations"])
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_u64)
                    .filter_map(|v| u32::try_from(v).ok())
                    .collect()
            })
            .unwrap_or_default(),
    })
}

/// Instrument catalog: an array, or an object holding `instruments`.
/// Unusable entries are skipped with a warning.
pub fn lenient_instruments(msg: &Value) -> Vec<Instrument> {
    let rows = msg
        .get("instruments")
        .and_then(Value::as_array)
        .or_else(|| msg.as_array());
    let Some(rows) = rows else {
        tracing::warn!("Instrument catalog is not a list, treating as empty");
        return Vec::new();
    };

    let parsed: Vec<Instrument> = rows.iter().filter_map(lenient_instrument).collect();
    if parsed.len() < rows.len() {
        tracing::warn!(
            skipped = rows.len() - parsed.len(),
            "Skipped unparseable instrument entries"
        );
    }
    parsed
}

fn account_mode(raw: &Value) -> Option<AccountMode> {
    match raw {
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "real" => Some(AccountMode::Real),
            "practice" | "demo" => Some(AccountMode::Practice),
            "tournament" => Some(AccountMode::Tournament),
            _ => None,
        },
        Value::Number(n) => match n.as_u64()? {
            1 => Some(AccountMode::Real),
            2 => Some(AccountMode::Tournament),
            4 => Some(AccountMode::Practice),
            _ => None,
        },
        _ => None,
    }
}

/// Balance list: an array, or an object holding `balances`
pub fn lenient_balances(msg: &Value) -> Vec<Balance> {
    if let Ok(balances) = serde_json::from_value::<Vec<Balance>>(msg.clone()) {
        return balances;
    }
    tracing::warn!("Balances failed schema check, using raw fields");

    let rows = msg
        .get("balances")
        .and_then(Value::as_array)
        .or_else(|| msg.as_array());
    rows.map(|rows| {
        rows.iter()
            .filter_map(|raw| {
                Some(Balance {
                    id: u64_field(raw, &["id", "balance_id"])?,
                    mode: field(raw, &["mode", "type"]).and_then(account_mode)?,
                    amount: decimal_field(raw, &["amount", "balance"])?,
                    currency: str_field(raw, &["currency"]).unwrap_or("USD").to_string(),
                })
            })
            .collect()
    })
    .unwrap_or_default()
}

/// Single balance from a balance-changed push
pub fn lenient_balance_update(msg: &Value) -> Option<Balance> {
    let raw = msg.get("current_balance").unwrap_or(msg);
    if let Ok(balance) = serde_json::from_value::<Balance>(raw.clone()) {
        return Some(balance);
    }
    Some(Balance {
        id: u64_field(raw, &["id", "balance_id"])?,
        mode: field(raw, &["mode", "type"])
            .and_then(account_mode)
            .unwrap_or_default(),
        amount: decimal_field(raw, &["amount", "balance"])?,
        currency: str_field(raw, &["currency"]).unwrap_or("USD").to_string(),
    })
}

/// Account profile
pub fn lenient_profile(msg: &Value) -> Option<Profile> {
    if let Some(profile) = typed::<Profile>("profile", msg) {
        return Some(profile);
    }
    Some(Profile {
        user_id: u64_field(msg, &["user_id", "id"])?,
        name: str_field(msg, &["name", "nickname"]).map(str::to_string),
        currency: str_field(msg, &["currency"]).unwrap_or("USD").to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_typed_candle() {
        let candle = lenient_candle(&json!({
            "active_id": 76, "size": 60, "from": 1700000000, "to": 1700000060,
            "open": 1.1, "close": 1.2, "min": 1.05, "max": 1.25, "volume": 10
        }))
        .unwrap();
        assert_eq!(candle.instrument_id, 76);
        assert_eq!(candle.close, dec!(1.2));
        assert_eq!(candle.low, dec!(1.05));
    }

    #[test]
    fn test_drifted_candle_falls_back() {
        let candle = lenient_candle(&json!({
            "instrument_id": "76", "period": 60, "from": 1700000000,
            "open": "1.1", "close": "1.2", "extra": {"new": "field"}
        }))
        .unwrap();
        assert_eq!(candle.instrument_id, 76);
        assert_eq!(candle.period_end.timestamp(), 1_700_000_060);
        assert_eq!(candle.high, dec!(1.2));

        assert!(lenient_candle(&json!({"close": 1})).is_none());
    }

    #[test]
    fn test_closed_position_fallback() {
        let position = lenient_position(&json!({
            "id": 991, "active_id": 1, "instrument_dir": "call", "amount": 20,
            "open_quote": 1.1, "open_time": 1700000000000i64, "expired": 1700000060,
            "result": "win", "close_profit": 37, "status": "closed"
        }))
        .unwrap();
        assert_eq!(position.id, "991");
        assert_eq!(position.open_time.timestamp(), 1_700_000_000);
        assert_eq!(position.close_reason, Some(CloseReason::Win));
        assert_eq!(position.pnl, Some(dec!(17)));
        assert!(!position.is_open());
    }

    #[test]
    fn test_typed_open_position() {
        let position = lenient_position(&json!({
            "id": "p1", "active_id": 3, "direction": "put", "invest": "5",
            "open_quote": "1.5", "open_time": 100, "expiration_time": 160, "status": "open"
        }))
        .unwrap();
        assert!(position.is_open());
        assert_eq!(position.direction, Direction::Put);
    }

    #[test]
    fn test_instruments_skip_garbage() {
        let instruments = lenient_instruments(&json!({"instruments": [
            {"id": 1, "name": "EURUSD", "enabled": true, "profit_percent": 85,
             "min_stake": 1, "max_stake": 1000},
            {"active_id": 2, "is_enabled": true, "minimal_bet": 2},
            "garbage"
        ]}));
        assert_eq!(instruments.len(), 2);
        assert_eq!(instruments[1].name, "instrument-2");
        assert_eq!(instruments[1].min_stake, dec!(2));
        assert!(lenient_instruments(&json!(42)).is_empty());
    }

    #[test]
    fn test_balances_by_numeric_type() {
        let balances = lenient_balances(&json!([
            {"id": 10, "type": 1, "amount": 50, "currency": "USD"},
            {"id": 11, "type": 4, "amount": "10000"}
        ]));
        assert_eq!(balances.len(), 2);
        assert_eq!(balances[1].mode, AccountMode::Practice);
        assert_eq!(balances[1].amount, dec!(10000));
    }
}
