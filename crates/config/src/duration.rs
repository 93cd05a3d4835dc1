use std::time::Duration;

use serde::{Deserialize, Deserializer};

/// Parses a unit-suffixed duration: `500ms`, `10s`, `2m`, `1h`.
pub fn parse(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err(String::from("empty duration"));
    }

    let digits_end = input
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| format!("duration '{input}' is missing a unit (ms, s, m, h)"))?;

    let (number, unit) = input.split_at(digits_end);
    let value: u64 = number
        .parse()
        .map_err(|_| format!("invalid duration value in '{input}'"))?;

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 3600)),
        _ => Err(format!("unknown duration unit '{unit}' in '{input}'")),
    }
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    parse(&text).map_err(serde::de::Error::custom)
}
