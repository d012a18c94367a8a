//! The 30-day activity record ("tracker") kept per user.
//!
//! A tracker is always exactly [`TRACKER_DAYS`] entries long, indexed by a
//! stable day number starting at 1. Whatever shape arrives from storage or the
//! wire is normalized onto that grid while decoding. The record carries a
//! single `lastUpdated` timestamp; there is no per-day versioning.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Number of days tracked per record
pub const TRACKER_DAYS: usize = 30;

/// Where an obligatory prayer was performed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PrayerState {
    #[default]
    None,
    Home,
    Mosque,
}

impl<'de> Deserialize<'de> for PrayerState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Unknown or malformed values count as "not prayed" rather than
        // failing the whole record.
        let value = Value::deserialize(deserializer)?;
        Ok(match value.as_str() {
            Some("home") => PrayerState::Home,
            Some("mosque") => PrayerState::Mosque,
            _ => PrayerState::None,
        })
    }
}

/// The five daily prayer slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Prayers {
    pub fajr: PrayerState,
    pub dhuhr: PrayerState,
    pub asr: PrayerState,
    pub maghrib: PrayerState,
    pub isha: PrayerState,
}

/// One day of the grid
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DayEntry {
    /// 1-based, assigned at creation and never reordered
    #[serde(deserialize_with = "lenient_count")]
    pub day: u32,
    #[serde(deserialize_with = "or_default")]
    pub prayers: Prayers,
    #[serde(deserialize_with = "or_default")]
    pub fasting: bool,
    #[serde(deserialize_with = "or_default")]
    pub night_prayer: bool,
    #[serde(deserialize_with = "lenient_count")]
    pub recitation_lines: u32,
}

impl DayEntry {
    pub fn blank(day: u32) -> Self {
        Self {
            day,
            ..Default::default()
        }
    }
}

/// A user's activity record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RawTracker")]
pub struct Tracker {
    days: Vec<DayEntry>,
    /// Milliseconds since the Unix epoch of the last local edit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<i64>,
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Tracker {
    /// A blank 30-day record that has never been edited
    pub fn new() -> Self {
        Self {
            days: (1..=TRACKER_DAYS as u32).map(DayEntry::blank).collect(),
            last_updated: None,
        }
    }

    pub fn with_last_updated(mut self, timestamp_ms: i64) -> Self {
        self.last_updated = Some(timestamp_ms);
        self
    }

    pub fn days(&self) -> &[DayEntry] {
        &self.days
    }

    pub fn day(&self, day: u32) -> Option<&DayEntry> {
        self.days.iter().find(|entry| entry.day == day)
    }

    /// Timestamp used for last-write-wins comparison; missing counts as epoch
    pub fn timestamp(&self) -> i64 {
        self.last_updated.unwrap_or(0)
    }

    /// Replace one day's entry and stamp the record. Returns false when the
    /// day index is outside the grid.
    pub fn set_day(&mut self, entry: DayEntry, now_ms: i64) -> bool {
        let Some(slot) = self.days.iter_mut().find(|slot| slot.day == entry.day) else {
            return false;
        };
        *slot = entry;
        self.last_updated = Some(now_ms);
        true
    }
}

/// Untrusted shape accepted while decoding
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTracker {
    #[serde(default, deserialize_with = "or_default")]
    days: Vec<Value>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    last_updated: Option<i64>,
}

impl From<RawTracker> for Tracker {
    fn from(raw: RawTracker) -> Self {
        let mut tracker = Tracker::new();
        tracker.last_updated = raw.last_updated;

        let entries = raw
            .days
            .into_iter()
            .enumerate()
            .filter_map(|(position, value)| {
                let entry = serde_json::from_value::<DayEntry>(value).ok()?;
                Some((position, entry))
            });

        for (position, mut entry) in entries {
            // Entries without an index fall back to their position
            if entry.day == 0 {
                entry.day = position as u32 + 1;
            }
            if (1..=TRACKER_DAYS as u32).contains(&entry.day) {
                let index = entry.day as usize - 1;
                tracker.days[index] = entry;
            }
        }

        tracker
    }
}

/// A number or numeric string, floored. Anything else reads as `None`.
fn loose_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    number.is_finite().then_some(number.floor())
}

/// Non-negative count; malformed or negative values read as 0
fn lenient_count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    let value = Value::deserialize(deserializer)?;
    // `as` saturates, so negatives land on 0
    Ok(loose_number(&value).map_or(0, |n| n as u32))
}

fn lenient_timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(loose_number(&value).map(|n| n as i64))
}

/// Decode `T`, falling back to its default when the value has the wrong shape
fn or_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_tracker_has_thirty_ordered_days() {
        let tracker = Tracker::new();
        assert_eq!(tracker.days().len(), TRACKER_DAYS);
        for (i, entry) in tracker.days().iter().enumerate() {
            assert_eq!(entry.day, i as u32 + 1);
        }
        assert_eq!(tracker.timestamp(), 0);
    }

    #[test]
    fn test_short_record_is_padded() {
        let json = r#"{
            "days": [
                {"day": 3, "prayers": {"fajr": "mosque"}, "fasting": true},
                {"day": 1, "recitationLines": 12}
            ],
            "lastUpdated": 1700000000000
        }"#;

        let tracker: Tracker = serde_json::from_str(json).unwrap();
        assert_eq!(tracker.days().len(), TRACKER_DAYS);
        assert_eq!(tracker.last_updated, Some(1_700_000_000_000));

        let day3 = tracker.day(3).unwrap();
        assert_eq!(day3.prayers.fajr, PrayerState::Mosque);
        assert!(day3.fasting);
        assert_eq!(tracker.day(1).unwrap().recitation_lines, 12);
        assert_eq!(tracker.day(2).unwrap(), &DayEntry::blank(2));
    }

    #[test]
    fn test_out_of_range_days_are_dropped() {
        let json = r#"{"days": [{"day": 31, "fasting": true}, {"day": 30, "nightPrayer": true}]}"#;
        let tracker: Tracker = serde_json::from_str(json).unwrap();

        assert_eq!(tracker.days().len(), TRACKER_DAYS);
        assert!(tracker.day(30).unwrap().night_prayer);
        assert!(tracker.days().iter().all(|d| !d.fasting));
    }

    #[test]
    fn test_malformed_prayer_values_decode_as_none() {
        let json = r#"{"days": [{"day": 1, "prayers": {"fajr": 7, "isha": "home", "asr": null}}]}"#;
        let tracker: Tracker = serde_json::from_str(json).unwrap();
        let prayers = tracker.day(1).unwrap().prayers;

        assert_eq!(prayers.fajr, PrayerState::None);
        assert_eq!(prayers.asr, PrayerState::None);
        assert_eq!(prayers.isha, PrayerState::Home);
    }

    #[test]
    fn test_malformed_numbers_and_flags_are_tolerated() {
        let json = r#"{
            "days": [
                {"day": "2", "recitationLines": "12", "fasting": "yes"},
                {"day": 3, "recitationLines": 2.5, "nightPrayer": 1},
                {"day": 4, "recitationLines": -8, "prayers": null},
                "not a day",
                {"day": 6, "recitationLines": {"lines": 3}}
            ],
            "lastUpdated": "1700000000000"
        }"#;
        let tracker: Tracker = serde_json::from_str(json).unwrap();

        assert_eq!(tracker.days().len(), TRACKER_DAYS);
        assert_eq!(tracker.last_updated, Some(1_700_000_000_000));
        assert_eq!(tracker.day(2).unwrap().recitation_lines, 12);
        assert!(!tracker.day(2).unwrap().fasting);
        assert_eq!(tracker.day(3).unwrap().recitation_lines, 2);
        assert!(!tracker.day(3).unwrap().night_prayer);
        assert_eq!(tracker.day(4).unwrap().recitation_lines, 0);
        assert_eq!(tracker.day(4).unwrap().prayers, Prayers::default());
        assert_eq!(tracker.day(6).unwrap().recitation_lines, 0);
    }

    #[test]
    fn test_unreadable_timestamp_counts_as_missing() {
        let tracker: Tracker =
            serde_json::from_str(r#"{"days": "broken", "lastUpdated": "yesterday"}"#).unwrap();
        assert_eq!(tracker, Tracker::new());
    }

    #[test]
    fn test_set_day_stamps_record() {
        let mut tracker = Tracker::new();
        let mut entry = DayEntry::blank(5);
        entry.recitation_lines = 40;

        assert!(tracker.set_day(entry, 42));
        assert_eq!(tracker.last_updated, Some(42));
        assert_eq!(tracker.day(5).unwrap().recitation_lines, 40);

        assert!(!tracker.set_day(DayEntry::blank(0), 99));
        assert_eq!(tracker.last_updated, Some(42));
    }

    #[test]
    fn test_serialized_shape() {
        let tracker = Tracker::new().with_last_updated(5);
        let value = serde_json::to_value(&tracker).unwrap();

        assert_eq!(value["lastUpdated"], 5);
        assert_eq!(value["days"].as_array().unwrap().len(), TRACKER_DAYS);
        assert_eq!(value["days"][0]["prayers"]["fajr"], "none");
        assert_eq!(value["days"][0]["nightPrayer"], false);
    }
}
