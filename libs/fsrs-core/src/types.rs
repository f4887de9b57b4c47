//! Core value types: [`Rating`], [`State`], [`Card`], [`ReviewLog`].

use std::sync::Mutex;
use std::thread;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};

/// User's self-rated recall at review time.
///
/// Serialized as its numeric code (`1..=4`), not as a string — this is part
/// of the external contract, unlike the snake_case string enums elsewhere in
/// this workspace's ancestry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rating {
    Again = 1,
    Hard = 2,
    Good = 3,
    Easy = 4,
}

impl Rating {
    /// Numeric code in `1..=4`.
    pub fn to_value(self) -> u8 {
        self as u8
    }

    /// Parse from a numeric code in `1..=4`.
    pub fn from_value(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Again),
            2 => Some(Self::Hard),
            3 => Some(Self::Good),
            4 => Some(Self::Easy),
            _ => None,
        }
    }
}

impl Serialize for Rating {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u8(self.to_value())
    }
}

impl<'de> Deserialize<'de> for Rating {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = u8::deserialize(deserializer)?;
        Rating::from_value(value).ok_or_else(|| D::Error::custom(format!("invalid rating code {value}")))
    }
}

/// Where a card sits in the FSRS lifecycle.
///
/// Unlike the reference's `CardStatus`, there is no `New` case: a freshly
/// constructed [`Card`] starts directly in `Learning` at step `0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Learning = 1,
    Review = 2,
    Relearning = 3,
}

impl State {
    pub fn to_value(self) -> u8 {
        self as u8
    }

    pub fn from_value(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Learning),
            2 => Some(Self::Review),
            3 => Some(Self::Relearning),
            _ => None,
        }
    }
}

impl Serialize for State {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u8(self.to_value())
    }
}

impl<'de> Deserialize<'de> for State {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = u8::deserialize(deserializer)?;
        State::from_value(value).ok_or_else(|| D::Error::custom(format!("invalid state code {value}")))
    }
}

/// Serializes `Some(0.0)` as `null`, mirroring the reference's truthiness
/// quirk where a zero stability/difficulty round-trips as `None` (§9 of
/// SPEC_FULL.md — a documented, deliberately preserved bug).
fn serialize_falsy_f64<S>(value: &Option<f64>, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(v) if *v != 0.0 => serializer.serialize_some(v),
        _ => serializer.serialize_none(),
    }
}

fn deserialize_falsy_f64<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<f64>::deserialize(deserializer)?;
    Ok(opt.filter(|v| *v != 0.0))
}

/// Serializes `None` as `null` and anything present as-is; paired with
/// [`deserialize_falsy_f64`] so `step: Some(0)` round-trips correctly (only
/// stability/difficulty carry the zero-is-null quirk, not step).
fn is_none<T>(value: &Option<T>) -> bool {
    value.is_none()
}

/// The per-item memory record the scheduler reads and writes.
///
/// Every operation in [`crate::scheduler::Scheduler`] returns a new `Card`;
/// none of them mutate their input (§9 "Card immutability").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub card_id: i64,
    pub state: State,
    #[serde(skip_serializing_if = "is_none", default)]
    pub step: Option<u32>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_falsy_f64",
        deserialize_with = "deserialize_falsy_f64",
        default
    )]
    pub stability: Option<f64>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_falsy_f64",
        deserialize_with = "deserialize_falsy_f64",
        default
    )]
    pub difficulty: Option<f64>,
    pub due: DateTime<Utc>,
    #[serde(skip_serializing_if = "is_none", default)]
    pub last_review: Option<DateTime<Utc>>,
}

static CARD_ID_LOCK: Mutex<()> = Mutex::new(());

/// Stamp a card id from the current UTC epoch in milliseconds, serialized
/// through a lock plus a 1ms sleep so rapid, concurrent auto-creation
/// doesn't collide (§5, §9). Callers creating many cards in a tight loop
/// should supply explicit ids instead.
fn next_card_id() -> i64 {
    let _guard = CARD_ID_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    thread::sleep(StdDuration::from_millis(1));
    Utc::now().timestamp_millis()
}

impl Card {
    /// A brand-new card: `Learning`, step `0`, no memory state yet.
    pub fn new() -> Self {
        Self::with_id(None)
    }

    /// Same as [`Card::new`], but with an explicit id (bypassing the
    /// epoch-stamp-and-sleep auto-generation).
    pub fn with_id(card_id: Option<i64>) -> Self {
        Self {
            card_id: card_id.unwrap_or_else(next_card_id),
            state: State::Learning,
            step: Some(0),
            stability: None,
            difficulty: None,
            due: Utc::now(),
            last_review: None,
        }
    }

    /// `state = Review` iff `step` is absent — an invariant every scheduler
    /// operation must preserve.
    pub fn invariants_hold(&self) -> bool {
        let step_matches_state = (self.state == State::Review) == self.step.is_none();
        let memory_paired = self.stability.is_some() == self.difficulty.is_some();
        let difficulty_in_range = self.difficulty.map_or(true, |d| (1.0..=10.0).contains(&d));
        let stability_in_range = self.stability.map_or(true, |s| s >= 0.001);
        step_matches_state && memory_paired && difficulty_in_range && stability_in_range
    }
}

impl Default for Card {
    fn default() -> Self {
        Self::new()
    }
}

/// An append-only record of one review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewLog {
    pub card_id: i64,
    pub rating: Rating,
    pub review_datetime: DateTime<Utc>,
    #[serde(skip_serializing_if = "is_none", default)]
    pub review_duration: Option<i64>,
}
