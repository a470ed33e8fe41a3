//! Serializable value types shared by the scheduler, the checkpoint format
//! and the transport models.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Globally unique task identifier. Generated once per task and never reused.
pub type TaskId = Uuid;

/// Scheduling priority. Declaration order is the ordering: `Low < Normal < High < Urgent`.
///
/// Serialized as its lowercase name. Deserialization also accepts the
/// numeric levels `0..=3` found in older checkpoint files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Background work such as cleanup.
    Low,
    /// Default priority.
    #[default]
    Normal,
    /// Interactive work a user is waiting on.
    High,
    /// Jumps ahead of everything else.
    Urgent,
}

impl Priority {
    /// All priorities from lowest to highest.
    pub const ALL: [Self; 4] = [Self::Low, Self::Normal, Self::High, Self::Urgent];

    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }

    /// Priority for a numeric level, `0` (low) through `3` (urgent).
    #[must_use]
    pub fn from_level(level: u64) -> Option<Self> {
        usize::try_from(level).ok().and_then(|i| Self::ALL.get(i).copied())
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" | "0" => Ok(Self::Low),
            "normal" | "1" => Ok(Self::Normal),
            "high" | "2" => Ok(Self::High),
            "urgent" | "3" => Ok(Self::Urgent),
            other => Err(format!("unknown priority `{other}`")),
        }
    }
}

struct PriorityVisitor;

impl Visitor<'_> for PriorityVisitor {
    type Value = Priority;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a priority name or a level between 0 and 3")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Priority, E> {
        Priority::from_level(v).ok_or_else(|| E::custom(format!("unknown priority level {v}")))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Priority, E> {
        u64::try_from(v)
            .ok()
            .and_then(Priority::from_level)
            .ok_or_else(|| E::custom(format!("unknown priority level {v}")))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Priority, E> {
        v.parse().map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for Priority {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(PriorityVisitor)
    }
}

/// Kind of work a task performs. The built-in kinds cover the media
/// pipeline; any other name is carried through as [`TaskKind::Custom`].
///
/// Build kinds from names with [`TaskKind::custom`] or `str::parse`, which
/// resolve built-in names to their variants. A hand-built `Custom` holding a
/// built-in name is resolved by [`TaskKind::normalized`], which the registry
/// and task specs apply on entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Voice/model training.
    ModelTraining,
    /// Text-to-speech synthesis.
    AudioSynthesis,
    /// Talking-head video generation.
    VideoGeneration,
    /// Removal of stale per-user files.
    FileCleanup,
    /// Any kind not known to the scheduler.
    #[serde(untagged)]
    Custom(String),
}

impl TaskKind {
    /// Built-in kinds, always reported by queue status.
    pub const BUILTIN: [Self; 4] = [
        Self::ModelTraining,
        Self::AudioSynthesis,
        Self::VideoGeneration,
        Self::FileCleanup,
    ];

    /// Stable snake_case name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::ModelTraining => "model_training",
            Self::AudioSynthesis => "audio_synthesis",
            Self::VideoGeneration => "video_generation",
            Self::FileCleanup => "file_cleanup",
            Self::Custom(name) => name,
        }
    }

    /// Kind for `name`. Built-in names resolve to their variant.
    #[must_use]
    pub fn custom(name: impl Into<String>) -> Self {
        Self::Custom(name.into()).normalized()
    }

    /// Resolve a `Custom` carrying a built-in name to the built-in variant.
    #[must_use]
    pub fn normalized(self) -> Self {
        match self {
            Self::Custom(name) => Self::BUILTIN
                .into_iter()
                .find(|kind| kind.as_str() == name)
                .unwrap_or(Self::Custom(name)),
            builtin => builtin,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        if name.is_empty() {
            return Err("task kind must not be empty".into());
        }
        Ok(Self::custom(name))
    }
}

/// Timestamp formats accepted when reading checkpoints.
///
/// RFC 3339 is what this crate writes. Naive ISO-8601 values such as
/// `2025-01-02T03:04:05.123456` are read as UTC.
pub mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{de, Deserialize, Deserializer};

    /// Parse an RFC 3339 or naive ISO-8601 timestamp.
    ///
    /// # Errors
    ///
    /// Returns a message naming `raw` when neither form matches.
    pub fn parse(raw: &str) -> Result<DateTime<Utc>, String> {
        if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
            return Ok(at.with_timezone(&Utc));
        }
        raw.parse::<NaiveDateTime>()
            .map(|naive| naive.and_utc())
            .map_err(|e| format!("invalid timestamp `{raw}`: {e}"))
    }

    /// `deserialize_with` helper for a required timestamp.
    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(de)?;
        parse(&raw).map_err(de::Error::custom)
    }

    /// `deserialize_with` helper for an optional timestamp.
    pub fn deserialize_opt<'de, D: Deserializer<'de>>(
        de: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        Option::<String>::deserialize(de)?
            .map(|raw| parse(&raw).map_err(de::Error::custom))
            .transpose()
    }
}

/// Named resource tracked by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// CPU cores.
    Cpu,
    /// Memory in megabytes.
    Memory,
    /// Accelerator share (1.0 = one whole GPU).
    Gpu,
}

impl ResourceKind {
    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Memory => "memory",
            Self::Gpu => "gpu",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A vector of resource quantities keyed by [`ResourceKind`].
///
/// Used both for a task's declared requirement and for the ledger's capacity
/// and usage. Missing entries read as zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceVector(BTreeMap<ResourceKind, f64>);

impl ResourceVector {
    /// Empty vector (every resource zero).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requirement assumed for a task that does not declare one:
    /// one core, 512 MB, no GPU.
    #[must_use]
    pub fn task_default() -> Self {
        Self::new()
            .with(ResourceKind::Cpu, 1.0)
            .with(ResourceKind::Memory, 512.0)
            .with(ResourceKind::Gpu, 0.0)
    }

    /// Builder-style setter.
    #[must_use]
    pub fn with(mut self, kind: ResourceKind, amount: f64) -> Self {
        self.set(kind, amount);
        self
    }

    /// Set the quantity for `kind`.
    pub fn set(&mut self, kind: ResourceKind, amount: f64) {
        self.0.insert(kind, amount);
    }

    /// Quantity for `kind`, zero when absent.
    #[must_use]
    pub fn get(&self, kind: ResourceKind) -> f64 {
        self.0.get(&kind).copied().unwrap_or(0.0)
    }

    /// Iterate over the declared entries.
    pub fn iter(&self) -> impl Iterator<Item = (ResourceKind, f64)> + '_ {
        self.0.iter().map(|(kind, amount)| (*kind, *amount))
    }

    /// Mutable access to the quantity for `kind`, inserting zero if absent.
    pub(crate) fn entry_mut(&mut self, kind: ResourceKind) -> &mut f64 {
        self.0.entry(kind).or_insert(0.0)
    }

    /// First entry that is negative or not finite.
    #[must_use]
    pub fn invalid_entry(&self) -> Option<(ResourceKind, f64)> {
        self.iter().find(|(_, amount)| !amount.is_finite() || *amount < 0.0)
    }
}

impl FromIterator<(ResourceKind, f64)> for ResourceVector {
    fn from_iter<I: IntoIterator<Item = (ResourceKind, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order_and_parse() {
        assert!(Priority::Urgent > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
        assert_eq!("HIGH".parse::<Priority>().unwrap(), Priority::High);
        assert_eq!("3".parse::<Priority>().unwrap(), Priority::Urgent);
        assert!("critical".parse::<Priority>().is_err());
    }

    #[test]
    fn test_task_kind_serde() {
        let json = serde_json::to_string(&TaskKind::AudioSynthesis).unwrap();
        assert_eq!(json, "\"audio_synthesis\"");

        let custom: TaskKind = serde_json::from_str("\"thumbnail\"").unwrap();
        assert_eq!(custom, TaskKind::Custom("thumbnail".into()));

        let builtin: TaskKind = serde_json::from_str("\"file_cleanup\"").unwrap();
        assert_eq!(builtin, TaskKind::FileCleanup);
    }

    #[test]
    fn test_priority_accepts_numeric_levels() {
        let level: Priority = serde_json::from_str("2").unwrap();
        assert_eq!(level, Priority::High);
        let name: Priority = serde_json::from_str("\"urgent\"").unwrap();
        assert_eq!(name, Priority::Urgent);
        assert!(serde_json::from_str::<Priority>("4").is_err());
        assert!(serde_json::from_str::<Priority>("-1").is_err());
        assert_eq!(serde_json::to_string(&Priority::Low).unwrap(), "\"low\"");
    }

    #[test]
    fn test_timestamp_accepts_naive_and_rfc3339() {
        let naive = timestamp::parse("2025-01-02T03:04:05.123456").unwrap();
        assert_eq!(naive.to_rfc3339(), "2025-01-02T03:04:05.123456+00:00");
        let offset = timestamp::parse("2025-01-02T05:04:05+02:00").unwrap();
        assert_eq!(offset, timestamp::parse("2025-01-02T03:04:05").unwrap());
        assert!(timestamp::parse("yesterday").is_err());
    }

    #[test]
    fn test_custom_kind_resolves_builtin_names() {
        assert_eq!(TaskKind::custom("audio_synthesis"), TaskKind::AudioSynthesis);
        assert_eq!(TaskKind::custom("ocr"), TaskKind::Custom("ocr".into()));
        assert_eq!(
            TaskKind::Custom("file_cleanup".into()).normalized(),
            TaskKind::FileCleanup
        );
    }

    #[test]
    fn test_task_kind_from_str() {
        assert_eq!("video_generation".parse::<TaskKind>().unwrap(), TaskKind::VideoGeneration);
        assert_eq!("ocr".parse::<TaskKind>().unwrap(), TaskKind::Custom("ocr".into()));
        assert!("  ".parse::<TaskKind>().is_err());
    }

    #[test]
    fn test_resource_vector_defaults_and_validation() {
        let req = ResourceVector::task_default();
        assert!((req.get(ResourceKind::Cpu) - 1.0).abs() < f64::EPSILON);
        assert!((req.get(ResourceKind::Memory) - 512.0).abs() < f64::EPSILON);
        assert!(req.invalid_entry().is_none());

        let bad = ResourceVector::new().with(ResourceKind::Gpu, -0.5);
        assert_eq!(bad.invalid_entry(), Some((ResourceKind::Gpu, -0.5)));

        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["memory"], 512.0);
    }
}
