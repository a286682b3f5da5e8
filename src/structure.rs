//! Structured workout expansion
//!
//! Turns a nested, repeating workout description into the flat, ordered
//! timeline of target segments that compliance scoring walks through.
//!
//! Two encodings are accepted:
//! - current: `{"structure": [block, ...]}` where each block carries a
//!   repetition length and an ordered list of steps with power targets
//! - legacy: `{"intervals": [...]}` where each interval may repeat and carry a
//!   recovery
//!
//! Both normalize to `WorkoutStructure` before expansion, so the analyzer only
//! ever sees `FlatSegment`s.

use serde::{Deserialize, Serialize};

/// Target used when a step carries no power target (percent of FTP)
pub const DEFAULT_TARGET_LOW: f64 = 50.0;
pub const DEFAULT_TARGET_HIGH: f64 = 60.0;

/// Largest repetition count a block may carry
pub const MAX_REPETITIONS: u32 = 1_000;
/// Largest expanded timeline; anything longer is treated as malformed
pub const MAX_SEGMENTS: usize = 10_000;

// ---------------------------------------------------------------------------
/// Structure Types (current encoding)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LengthUnit {
  #[serde(alias = "seconds", alias = "sec", alias = "s")]
  Second,
  #[serde(alias = "minutes", alias = "min")]
  Minute,
  /// Only meaningful on a block; never on a step
  #[serde(alias = "repetitions", alias = "reps")]
  Repetition,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Length {
  pub value: f64,
  pub unit: LengthUnit,
}

impl Length {
  /// Step length in minutes; `None` for repetition units or unusable values
  pub fn minutes(&self) -> Option<f64> {
    if !self.value.is_finite() || self.value < 0.0 {
      return None;
    }
    match self.unit {
      LengthUnit::Second => Some(self.value / 60.0),
      LengthUnit::Minute => Some(self.value),
      LengthUnit::Repetition => None,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IntensityClass {
  #[serde(alias = "warmup", alias = "warm_up")]
  WarmUp,
  #[serde(alias = "cooldown", alias = "cool_down")]
  CoolDown,
  #[serde(alias = "recovery")]
  Rest,
  #[default]
  #[serde(alias = "work", alias = "interval")]
  Active,
}

impl IntensityClass {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::WarmUp => "warm_up",
      Self::CoolDown => "cool_down",
      Self::Rest => "rest",
      Self::Active => "active",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
  #[serde(rename = "type", default = "power_type")]
  pub target_type: String,
  pub min_value: Option<f64>,
  pub max_value: Option<f64>,
  pub unit: Option<String>,
}

fn power_type() -> String {
  "power".to_string()
}

impl Target {
  pub fn power(low: f64, high: f64) -> Self {
    Self {
      target_type: power_type(),
      min_value: Some(low),
      max_value: Some(high),
      unit: Some("percentOfFtp".to_string()),
    }
  }

  fn is_power(&self) -> bool {
    self.target_type.eq_ignore_ascii_case("power")
  }

  /// Ordered (low, high); a single bound is used for both
  fn range(&self) -> Option<(f64, f64)> {
    let (low, high) = match (self.min_value, self.max_value) {
      (Some(lo), Some(hi)) => (lo, hi),
      (Some(v), None) | (None, Some(v)) => (v, v),
      (None, None) => return None,
    };
    if !low.is_finite() || !high.is_finite() {
      return None;
    }
    Some(if low <= high { (low, high) } else { (high, low) })
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub intensity_class: IntensityClass,
  pub length: Length,
  #[serde(default)]
  pub targets: Vec<Target>,
}

impl Step {
  /// Target range from the first power target, defaulting to 50-60% FTP
  pub fn power_range(&self) -> (f64, f64) {
    self.targets
      .iter()
      .filter(|t| t.is_power())
      .find_map(Target::range)
      .unwrap_or((DEFAULT_TARGET_LOW, DEFAULT_TARGET_HIGH))
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructureBlock {
  #[serde(rename = "type", default)]
  pub block_type: Option<String>,
  /// Repetition count when the unit is `repetition`; absent means once
  #[serde(default)]
  pub length: Option<Length>,
  #[serde(default)]
  pub steps: Vec<Step>,
}

impl StructureBlock {
  pub fn repeated(repetitions: u32, steps: Vec<Step>) -> Self {
    Self {
      block_type: Some(if repetitions > 1 { "repetition" } else { "step" }.to_string()),
      length: Some(Length {
        value: repetitions as f64,
        unit: LengthUnit::Repetition,
      }),
      steps,
    }
  }

  /// `None` when the repetition count is not a whole number in `1..=MAX_REPETITIONS`
  pub fn repetitions(&self) -> Option<u32> {
    match self.length {
      Some(Length {
        value,
        unit: LengthUnit::Repetition,
      }) => {
        if value >= 1.0 && value <= f64::from(MAX_REPETITIONS) && value.fract() == 0.0 {
          Some(value as u32)
        } else {
          None
        }
      }
      _ => Some(1),
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkoutStructure {
  #[serde(rename = "structure")]
  pub blocks: Vec<StructureBlock>,
}

/// Repetition group shape; every variant is handled explicitly in `expand`
#[derive(Debug)]
enum BlockShape<'a> {
  Empty,
  Single {
    segment: &'a FlatSegment,
    repetitions: u32,
  },
  WorkRecovery {
    work: &'a FlatSegment,
    recovery: &'a FlatSegment,
    repetitions: u32,
  },
  Sequence {
    segments: &'a [FlatSegment],
    repetitions: u32,
  },
}

impl<'a> BlockShape<'a> {
  fn of(templates: &'a [FlatSegment], repetitions: u32) -> Self {
    match templates {
      [] => Self::Empty,
      [segment] => Self::Single {
        segment,
        repetitions,
      },
      [work, recovery] => Self::WorkRecovery {
        work,
        recovery,
        repetitions,
      },
      segments => Self::Sequence {
        segments,
        repetitions,
      },
    }
  }
}

// ---------------------------------------------------------------------------
/// Legacy Encoding
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyStep {
  #[serde(default)]
  pub name: Option<String>,
  #[serde(default)]
  pub kind: Option<String>,
  pub duration_seconds: f64,
  #[serde(default)]
  pub power_low: Option<f64>,
  #[serde(default)]
  pub power_high: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyInterval {
  #[serde(flatten)]
  pub work: LegacyStep,
  #[serde(default = "one")]
  pub repeat: u32,
  #[serde(default)]
  pub recovery: Option<LegacyStep>,
}

fn one() -> u32 {
  1
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LegacyStructure {
  #[serde(default)]
  pub intervals: Vec<LegacyInterval>,
}

impl From<LegacyStep> for Step {
  fn from(legacy: LegacyStep) -> Self {
    let intensity_class = match legacy.kind.as_deref().map(str::to_ascii_lowercase).as_deref() {
      Some("warmup" | "warm_up") => IntensityClass::WarmUp,
      Some("cooldown" | "cool_down") => IntensityClass::CoolDown,
      Some("recovery" | "rest") => IntensityClass::Rest,
      _ => IntensityClass::Active,
    };

    let targets = match (legacy.power_low, legacy.power_high) {
      (None, None) => Vec::new(),
      (low, high) => vec![Target {
        target_type: power_type(),
        min_value: low,
        max_value: high,
        unit: Some("percentOfFtp".to_string()),
      }],
    };

    Self {
      name: legacy.name.unwrap_or_default(),
      intensity_class,
      length: Length {
        value: legacy.duration_seconds,
        unit: LengthUnit::Second,
      },
      targets,
    }
  }
}

impl From<LegacyStructure> for WorkoutStructure {
  fn from(legacy: LegacyStructure) -> Self {
    let blocks = legacy
      .intervals
      .into_iter()
      .map(|interval| {
        let mut steps = vec![Step::from(interval.work)];
        if let Some(recovery) = interval.recovery {
          let mut recovery = Step::from(recovery);
          if recovery.intensity_class == IntensityClass::Active {
            recovery.intensity_class = IntensityClass::Rest;
          }
          steps.push(recovery);
        }
        // repeat 0 stays malformed and is rejected at expansion
        StructureBlock {
          block_type: Some("repetition".to_string()),
          length: Some(Length {
            value: interval.repeat as f64,
            unit: LengthUnit::Repetition,
          }),
          steps,
        }
      })
      .collect();

    Self { blocks }
  }
}

/// Current encoding may be stored wrapped or as a bare block list
#[derive(Deserialize)]
#[serde(untagged)]
enum CurrentEncoding {
  Wrapped(WorkoutStructure),
  Bare(Vec<StructureBlock>),
}

/// Pick the structure to analyze. The current encoding wins when present and
/// parseable; otherwise the legacy encoding is normalized.
pub fn resolve_structure(current: Option<&str>, legacy: Option<&str>) -> Option<WorkoutStructure> {
  if let Some(json) = current.filter(|s| !s.trim().is_empty()) {
    match serde_json::from_str::<CurrentEncoding>(json) {
      Ok(CurrentEncoding::Wrapped(structure)) => return Some(structure),
      Ok(CurrentEncoding::Bare(blocks)) => return Some(WorkoutStructure { blocks }),
      Err(e) => tracing::warn!("Unparseable workout structure, trying legacy encoding: {}", e),
    }
  }

  let json = legacy.filter(|s| !s.trim().is_empty())?;
  match serde_json::from_str::<LegacyStructure>(json) {
    Ok(legacy) => Some(legacy.into()),
    Err(e) => {
      tracing::warn!("Unparseable legacy workout structure: {}", e);
      None
    }
  }
}

// ---------------------------------------------------------------------------
/// Flat Segments
// ---------------------------------------------------------------------------

/// One time-bounded target in the expanded timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatSegment {
  pub name: String,
  pub intensity: IntensityClass,
  pub duration_minutes: f64,
  /// Planned start relative to workout start
  pub start_offset_seconds: f64,
  /// Percent of FTP
  pub target_low: f64,
  pub target_high: f64,
}

impl FlatSegment {
  pub fn duration_seconds(&self) -> f64 {
    self.duration_minutes * 60.0
  }

  fn from_step(step: &Step) -> Option<Self> {
    let duration_minutes = step.length.minutes()?;
    let (target_low, target_high) = step.power_range();
    Some(Self {
      name: step.name.clone(),
      intensity: step.intensity_class,
      duration_minutes,
      start_offset_seconds: 0.0,
      target_low,
      target_high,
    })
  }
}

/// Expand a structure into its flat timeline. Malformed input (a step measured
/// in repetitions, a repetition count outside `1..=MAX_REPETITIONS`, a negative
/// length, more than `MAX_SEGMENTS` segments) yields an empty result.
pub fn expand(structure: &WorkoutStructure) -> Vec<FlatSegment> {
  let mut segments = Vec::new();

  for (index, block) in structure.blocks.iter().enumerate() {
    let Some(repetitions) = block.repetitions() else {
      tracing::debug!(block = index, "Invalid repetition count, discarding structure");
      return Vec::new();
    };

    let Some(templates) = block
      .steps
      .iter()
      .map(FlatSegment::from_step)
      .collect::<Option<Vec<_>>>()
    else {
      tracing::debug!(block = index, "Invalid step length, discarding structure");
      return Vec::new();
    };

    if segments.len() + templates.len() * repetitions as usize > MAX_SEGMENTS {
      tracing::debug!(block = index, "Structure expands past segment limit, discarding");
      return Vec::new();
    }

    match BlockShape::of(&templates, repetitions) {
      BlockShape::Empty => {}
      BlockShape::Single {
        segment,
        repetitions,
      } => {
        for _ in 0..repetitions {
          segments.push(segment.clone());
        }
      }
      BlockShape::WorkRecovery {
        work,
        recovery,
        repetitions,
      } => {
        for _ in 0..repetitions {
          segments.push(work.clone());
          segments.push(recovery.clone());
        }
      }
      BlockShape::Sequence {
        segments: group,
        repetitions,
      } => {
        for _ in 0..repetitions {
          segments.extend(group.iter().cloned());
        }
      }
    }
  }

  let mut offset = 0.0;
  for segment in &mut segments {
    segment.start_offset_seconds = offset;
    offset += segment.duration_seconds();
  }

  segments
}

/// Total planned time across segments
pub fn total_duration_minutes(segments: &[FlatSegment]) -> f64 {
  segments.iter().map(|s| s.duration_minutes).sum()
}

// ---------------------------------------------------------------------------
/// Tests
// ---------------------------------------------------------------------------
