//! Human-readable durations for config files.
//!
//! Accepts `"500ms"`, `"30s"`, `"5m"`, `"1h"`, or a bare integer (seconds).

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer};

/// Parse a duration string like "5s", "500ms", "2m", "1h".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim().parse::<u64>().ok()?.checked_mul(60).map(Duration::from_secs)
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.trim().parse::<u64>().ok()?.checked_mul(3600).map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

/// Render a duration back into the shortest config form.
pub fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms % 1000 != 0 {
        format!("{ms}ms")
    } else if d.as_secs() % 3600 == 0 && d.as_secs() > 0 {
        format!("{}h", d.as_secs() / 3600)
    } else if d.as_secs() % 60 == 0 && d.as_secs() > 0 {
        format!("{}m", d.as_secs() / 60)
    } else {
        format!("{}s", d.as_secs())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Secs(u64),
    Text(String),
}

fn from_raw<E: serde::de::Error>(raw: RawDuration) -> Result<Duration, E> {
    match raw {
        RawDuration::Secs(n) => Ok(Duration::from_secs(n)),
        RawDuration::Text(s) => {
            parse_duration(&s).ok_or_else(|| E::custom(format!("invalid duration: {s:?}")))
        }
    }
}

/// `#[serde(with = "warden_core::duration::serde_str")]`
pub mod serde_str {
    use super::*;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        from_raw(RawDuration::deserialize(d)?)
    }
}

/// Same as [`serde_str`] for `Option<Duration>` fields.
pub mod serde_opt {
    use super::*;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&format_duration(*d)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        match Option::<RawDuration>::deserialize(d)? {
            Some(raw) => from_raw(raw).map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_units() {
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("10"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration("soon"), None);
    }

    #[test]
    fn oversized_values_are_rejected() {
        assert_eq!(parse_duration("999999999999999999h"), None);
        assert_eq!(parse_duration("999999999999999999m"), None);
        assert_eq!(
            parse_duration(&format!("{}m", u64::MAX / 60)),
            Some(Duration::from_secs(u64::MAX / 60 * 60))
        );
    }

    #[test]
    fn format_picks_largest_whole_unit() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_secs(45)), "45s");
        assert_eq!(format_duration(Duration::from_secs(300)), "5m");
        assert_eq!(format_duration(Duration::from_secs(7200)), "2h");
        assert_eq!(format_duration(Duration::ZERO), "0s");
    }

    #[test]
    fn serde_accepts_text_and_integers() {
        #[derive(Deserialize)]
        struct Timeouts {
            #[serde(with = "serde_str")]
            a: Duration,
            #[serde(with = "serde_str")]
            b: Duration,
        }

        let p: Timeouts = serde_json::from_str(r#"{"a": "2m", "b": 15}"#).unwrap();
        assert_eq!(p.a, Duration::from_secs(120));
        assert_eq!(p.b, Duration::from_secs(15));
    }
}
