//! Power compliance scoring
//!
//! Walks an expanded segment timeline against a recorded power stream and
//! scores how closely each segment's average power landed inside its target.
//! Segments are matched to the stream positionally: each one takes exactly its
//! planned duration from a cursor that always advances, whether or not the
//! window had data.
//!
//! Scoring is pure. Persistence of the resulting `ComplianceAnalysis` lives in
//! the database section below and is keyed by match id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::config::AnalyzerConfig;
use crate::error::{ComplianceError, Result};
use crate::models::AthleteProfile;
use crate::structure::{FlatSegment, IntensityClass};

/// Stamped on every result so stored analyses stay interpretable
pub const ALGORITHM_VERSION: &str = "sequential-segment-v1";

/// Score points lost per percentage point outside the target range
const SCORE_DECAY_PER_POINT: f64 = 2.0;

/// Sample density thresholds for the data quality flag
const GOOD_DENSITY: f64 = 0.9;
const FAIR_DENSITY: f64 = 0.5;

/// ---------------------------------------------------------------------------
/// Power Stream
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerSample {
  /// Seconds since the start of the recording
  pub offset_seconds: f64,
  pub watts: f64,
}

/// Time-ordered power samples; gaps are simply missing offsets
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PowerStream {
  samples: Vec<PowerSample>,
}

impl PowerStream {
  /// Build from samples, dropping unusable values and ordering by time
  pub fn new(mut samples: Vec<PowerSample>) -> Self {
    samples.retain(|s| {
      s.offset_seconds.is_finite() && s.offset_seconds >= 0.0 && s.watts.is_finite() && s.watts >= 0.0
    });
    samples.sort_by(|a, b| a.offset_seconds.total_cmp(&b.offset_seconds));
    Self { samples }
  }

  /// Evenly spaced samples starting at offset zero
  pub fn from_watts(watts: &[f64], sample_rate_hz: f64) -> Self {
    let rate = if sample_rate_hz > 0.0 { sample_rate_hz } else { 1.0 };
    Self::new(
      watts
        .iter()
        .enumerate()
        .map(|(i, &w)| PowerSample {
          offset_seconds: i as f64 / rate,
          watts: w,
        })
        .collect(),
    )
  }

  pub fn samples(&self) -> &[PowerSample] {
    &self.samples
  }

  pub fn is_empty(&self) -> bool {
    self.samples.is_empty()
  }

  pub fn len(&self) -> usize {
    self.samples.len()
  }

  /// Samples with `start <= offset < end`
  fn window(&self, start: f64, end: f64) -> &[PowerSample] {
    let lo = self.samples.partition_point(|s| s.offset_seconds < start);
    let hi = self.samples.partition_point(|s| s.offset_seconds < end);
    &self.samples[lo..hi.max(lo)]
  }
}

/// ---------------------------------------------------------------------------
/// Classification Vocabulary
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentStatus {
  Completed,
  Skipped,
}

/// How achieved power relates to the target, as percent of the nearest bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceStatus {
  /// 90-110%
  OnTarget,
  /// 75-89%
  SlightlyUnder,
  /// 111-130%
  SlightlyOver,
  /// Below 75%
  SignificantlyUnder,
  /// Above 130%
  SignificantlyOver,
}

impl ComplianceStatus {
  pub fn classify(percent_of_target: f64) -> Self {
    if percent_of_target < 75.0 {
      Self::SignificantlyUnder
    } else if percent_of_target < 90.0 {
      Self::SlightlyUnder
    } else if percent_of_target <= 110.0 {
      Self::OnTarget
    } else if percent_of_target <= 130.0 {
      Self::SlightlyOver
    } else {
      Self::SignificantlyOver
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Grade {
  A,
  B,
  C,
  D,
  F,
}

impl Grade {
  pub fn from_score(score: f64) -> Self {
    if score >= 90.0 {
      Self::A
    } else if score >= 80.0 {
      Self::B
    } else if score >= 70.0 {
      Self::C
    } else if score >= 60.0 {
      Self::D
    } else {
      Self::F
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::A => "A",
      Self::B => "B",
      Self::C => "C",
      Self::D => "D",
      Self::F => "F",
    }
  }
}

impl std::str::FromStr for Grade {
  type Err = String;
  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    match s {
      "A" => Ok(Self::A),
      "B" => Ok(Self::B),
      "C" => Ok(Self::C),
      "D" => Ok(Self::D),
      "F" => Ok(Self::F),
      _ => Err(format!("Unknown grade: {}", s)),
    }
  }
}

/// Advisory only; never changes the score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerDataQuality {
  Good,
  Fair,
  Sparse,
}

impl PowerDataQuality {
  fn from_density(density: f64) -> Self {
    if density >= GOOD_DENSITY {
      Self::Good
    } else if density >= FAIR_DENSITY {
      Self::Fair
    } else {
      Self::Sparse
    }
  }
}

/// ---------------------------------------------------------------------------
/// Results
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentResult {
  pub index: usize,
  pub name: String,
  pub intensity: IntensityClass,
  pub start_offset_seconds: f64,
  pub planned_duration_minutes: f64,
  pub target_low: f64,
  pub target_high: f64,
  pub status: SegmentStatus,
  pub sample_count: usize,
  pub average_watts: Option<f64>,
  pub achieved_percent_ftp: Option<f64>,
  pub percent_of_target: Option<f64>,
  pub score: Option<f64>,
  pub compliance_status: Option<ComplianceStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceResult {
  pub overall_score: f64,
  pub grade: Grade,
  pub summary: String,
  pub segments_total: usize,
  pub segments_completed: usize,
  pub segments_skipped: usize,
  /// Completed share of planned time, 0-100
  pub completion_percent: f64,
  pub planned_duration_minutes: f64,
  pub analyzed_duration_minutes: f64,
  pub average_power_watts: Option<f64>,
  pub power_data_quality: PowerDataQuality,
  pub sample_density: f64,
  pub algorithm_version: String,
  pub segments: Vec<SegmentResult>,
}

/// ---------------------------------------------------------------------------
/// Analyzer
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ComplianceAnalyzer {
  config: AnalyzerConfig,
}

impl ComplianceAnalyzer {
  pub fn new(config: AnalyzerConfig) -> Self {
    Self { config }
  }

  /// Score `stream` against `segments` for an athlete with the given FTP (watts)
  pub fn analyze(&self, segments: &[FlatSegment], stream: &PowerStream, ftp: f64) -> Result<ComplianceResult> {
    if segments.is_empty() {
      return Err(ComplianceError::Computation(
        "Workout has no segments to score".to_string(),
      ));
    }
    if !ftp.is_finite() || ftp <= 0.0 {
      return Err(ComplianceError::Computation(format!(
        "FTP must be positive, got {}",
        ftp
      )));
    }

    let planned_seconds: f64 = segments.iter().map(FlatSegment::duration_seconds).sum();
    if !planned_seconds.is_finite() || planned_seconds <= 0.0 {
      return Err(ComplianceError::Computation(
        "Workout has zero planned duration".to_string(),
      ));
    }

    let rate = self.config.expected_sample_rate_hz;
    let mut cursor = 0.0;
    let mut results = Vec::with_capacity(segments.len());

    for (index, segment) in segments.iter().enumerate() {
      let duration = segment.duration_seconds();
      let window = stream.window(cursor, cursor + duration);
      let required = (duration * rate * self.config.min_coverage).max(1.0);

      let result = if (window.len() as f64) < required {
        self.skipped(index, segment, cursor, window.len())
      } else {
        self.completed(index, segment, cursor, window, ftp)
      };
      results.push(result);

      cursor += duration;
    }

    let completed: Vec<&SegmentResult> = results
      .iter()
      .filter(|r| r.status == SegmentStatus::Completed)
      .collect();

    let completed_minutes: f64 = completed.iter().map(|r| r.planned_duration_minutes).sum();
    let overall_score = if completed_minutes > 0.0 {
      let weighted: f64 = completed
        .iter()
        .map(|r| r.score.unwrap_or(0.0) * r.planned_duration_minutes)
        .sum();
      round1(weighted / completed_minutes)
    } else {
      0.0
    };

    let completed_samples: Vec<f64> = completed
      .iter()
      .filter_map(|r| r.average_watts.map(|w| w * r.sample_count as f64))
      .collect();
    let completed_count: usize = completed.iter().map(|r| r.sample_count).sum();
    let average_power_watts = (completed_count > 0)
      .then(|| round1(completed_samples.iter().sum::<f64>() / completed_count as f64));

    let in_window = stream.window(0.0, planned_seconds).len() as f64;
    let sample_density = (in_window / (planned_seconds * rate)).min(1.0);
    let power_data_quality = PowerDataQuality::from_density(sample_density);

    let segments_completed = completed.len();
    let segments_skipped = results.len() - segments_completed;
    let grade = Grade::from_score(overall_score);
    let planned_duration_minutes = planned_seconds / 60.0;

    let summary = summarize(
      segments_completed,
      results.len(),
      overall_score,
      grade,
      power_data_quality,
    );

    tracing::debug!(
      score = overall_score,
      grade = grade.as_str(),
      completed = segments_completed,
      skipped = segments_skipped,
      "Compliance computed"
    );

    Ok(ComplianceResult {
      overall_score,
      grade,
      summary,
      segments_total: results.len(),
      segments_completed,
      segments_skipped,
      completion_percent: round1(completed_minutes / planned_duration_minutes * 100.0),
      planned_duration_minutes,
      analyzed_duration_minutes: completed_minutes,
      average_power_watts,
      power_data_quality,
      sample_density: round3(sample_density),
      algorithm_version: ALGORITHM_VERSION.to_string(),
      segments: results,
    })
  }

  fn skipped(&self, index: usize, segment: &FlatSegment, start: f64, sample_count: usize) -> SegmentResult {
    SegmentResult {
      index,
      name: segment.name.clone(),
      intensity: segment.intensity,
      start_offset_seconds: start,
      planned_duration_minutes: segment.duration_minutes,
      target_low: segment.target_low,
      target_high: segment.target_high,
      status: SegmentStatus::Skipped,
      sample_count,
      average_watts: None,
      achieved_percent_ftp: None,
      percent_of_target: None,
      score: None,
      compliance_status: None,
    }
  }

  fn completed(
    &self,
    index: usize,
    segment: &FlatSegment,
    start: f64,
    window: &[PowerSample],
    ftp: f64,
  ) -> SegmentResult {
    let average_watts = window.iter().map(|s| s.watts).sum::<f64>() / window.len() as f64;
    let achieved = average_watts / ftp * 100.0;
    let percent_of_target = percent_of_target(achieved, segment.target_low, segment.target_high);

    SegmentResult {
      index,
      name: segment.name.clone(),
      intensity: segment.intensity,
      start_offset_seconds: start,
      planned_duration_minutes: segment.duration_minutes,
      target_low: segment.target_low,
      target_high: segment.target_high,
      status: SegmentStatus::Completed,
      sample_count: window.len(),
      average_watts: Some(round1(average_watts)),
      achieved_percent_ftp: Some(round1(achieved)),
      percent_of_target: Some(round1(percent_of_target)),
      score: Some(round1(segment_score(percent_of_target))),
      compliance_status: Some(ComplianceStatus::classify(percent_of_target)),
    }
  }
}

/// Achieved power relative to the nearest target bound; 100 inside the range
fn percent_of_target(achieved: f64, low: f64, high: f64) -> f64 {
  if achieved < low {
    achieved / low.max(1.0) * 100.0
  } else if achieved > high {
    achieved / high.max(1.0) * 100.0
  } else {
    100.0
  }
}

/// 100 inside the range, linear decay outside, floored at 0
fn segment_score(percent_of_target: f64) -> f64 {
  (100.0 - (percent_of_target - 100.0).abs() * SCORE_DECAY_PER_POINT).clamp(0.0, 100.0)
}

fn summarize(
  completed: usize,
  total: usize,
  score: f64,
  grade: Grade,
  quality: PowerDataQuality,
) -> String {
  if completed == 0 {
    return format!("No power data covered any of the {} planned segments", total);
  }
  let mut summary = format!(
    "Completed {} of {} segments with {:.0}% compliance (grade {})",
    completed,
    total,
    score,
    grade.as_str()
  );
  if quality != PowerDataQuality::Good {
    summary.push_str("; power data was incomplete");
  }
  summary
}

fn round1(v: f64) -> f64 {
  (v * 10.0).round() / 10.0
}

fn round3(v: f64) -> f64 {
  (v * 1000.0).round() / 1000.0
}

/// ---------------------------------------------------------------------------
/// Stored Analysis
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisMetadata {
  pub algorithm_version: String,
  pub power_data_quality: PowerDataQuality,
  pub sample_density: f64,
  pub ftp: f64,
  /// Audit only
  pub lthr: Option<i64>,
  pub planned_duration_minutes: f64,
  pub analyzed_duration_minutes: f64,
  pub completion_percent: f64,
  pub average_power_watts: Option<f64>,
}

/// Persistable compliance record, one per match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceAnalysis {
  pub id: Option<i64>,
  pub match_id: i64,
  /// Activity the score describes
  pub activity_id: i64,
  pub overall_score: f64,
  pub grade: Grade,
  pub summary: String,
  pub segments_total: i64,
  pub segments_completed: i64,
  pub segments_skipped: i64,
  pub segments: Vec<SegmentResult>,
  pub metadata: AnalysisMetadata,
  pub analyzed_at: DateTime<Utc>,
}

impl ComplianceAnalysis {
  pub fn from_result(match_id: i64, activity_id: i64, result: ComplianceResult, athlete: &AthleteProfile) -> Self {
    Self {
      id: None,
      match_id,
      activity_id,
      overall_score: result.overall_score,
      grade: result.grade,
      summary: result.summary,
      segments_total: result.segments_total as i64,
      segments_completed: result.segments_completed as i64,
      segments_skipped: result.segments_skipped as i64,
      segments: result.segments,
      metadata: AnalysisMetadata {
        algorithm_version: result.algorithm_version,
        power_data_quality: result.power_data_quality,
        sample_density: result.sample_density,
        ftp: athlete.scoring_ftp().unwrap_or_default(),
        lthr: athlete.lthr,
        planned_duration_minutes: result.planned_duration_minutes,
        analyzed_duration_minutes: result.analyzed_duration_minutes,
        completion_percent: result.completion_percent,
        average_power_watts: result.average_power_watts,
      },
      analyzed_at: Utc::now(),
    }
  }

  fn from_row(row: &SqliteRow) -> Result<Self> {
    let grade: String = row.try_get("grade")?;
    let segments_json: String = row.try_get("segments_json")?;
    let metadata_json: String = row.try_get("metadata_json")?;
    Ok(Self {
      id: row.try_get("id")?,
      match_id: row.try_get("match_id")?,
      activity_id: row.try_get("activity_id")?,
      overall_score: row.try_get("overall_score")?,
      grade: grade.parse().map_err(ComplianceError::Database)?,
      summary: row.try_get("summary")?,
      segments_total: row.try_get("segments_total")?,
      segments_completed: row.try_get("segments_completed")?,
      segments_skipped: row.try_get("segments_skipped")?,
      segments: serde_json::from_str(&segments_json)?,
      metadata: serde_json::from_str(&metadata_json)?,
      analyzed_at: row.try_get("analyzed_at")?,
    })
  }
}

/// ---------------------------------------------------------------------------
/// Database Operations
/// ---------------------------------------------------------------------------

/// Insert or overwrite the analysis for a match. Concurrent writers for the
/// same match collapse onto one row; the last write wins.
///
/// Nothing is written when the match no longer points at the analyzed
/// activity, and `None` is returned.
pub async fn upsert_analysis(pool: &SqlitePool, analysis: &ComplianceAnalysis) -> Result<Option<i64>> {
  let segments_json = serde_json::to_string(&analysis.segments)?;
  let metadata_json = serde_json::to_string(&analysis.metadata)?;

  let id: Option<i64> = sqlx::query_scalar(
    r#"
    INSERT INTO compliance_analyses (
      match_id, activity_id, overall_score, grade, summary,
      segments_total, segments_completed, segments_skipped,
      segments_json, metadata_json, is_stale, analyzed_at
    )
    SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0, ?11
    WHERE EXISTS (
      SELECT 1 FROM workout_matches WHERE id = ?1 AND activity_id = ?2
    )
    ON CONFLICT(match_id) DO UPDATE SET
      activity_id = excluded.activity_id,
      overall_score = excluded.overall_score,
      grade = excluded.grade,
      summary = excluded.summary,
      segments_total = excluded.segments_total,
      segments_completed = excluded.segments_completed,
      segments_skipped = excluded.segments_skipped,
      segments_json = excluded.segments_json,
      metadata_json = excluded.metadata_json,
      is_stale = 0,
      analyzed_at = excluded.analyzed_at
    RETURNING id
    "#,
  )
  .bind(analysis.match_id)
  .bind(analysis.activity_id)
  .bind(analysis.overall_score)
  .bind(analysis.grade.as_str())
  .bind(&analysis.summary)
  .bind(analysis.segments_total)
  .bind(analysis.segments_completed)
  .bind(analysis.segments_skipped)
  .bind(&segments_json)
  .bind(&metadata_json)
  .bind(analysis.analyzed_at)
  .fetch_optional(pool)
  .await?;

  if id.is_none() {
    tracing::warn!(
      match_id = analysis.match_id,
      activity_id = analysis.activity_id,
      "Match no longer points at the analyzed activity, analysis not saved"
    );
  }

  Ok(id)
}

/// Current analysis for a match; stale analyses are never returned
pub async fn load_analysis(pool: &SqlitePool, match_id: i64) -> Result<Option<ComplianceAnalysis>> {
  let row = sqlx::query(
    r#"
    SELECT a.id, a.match_id, a.activity_id, a.overall_score, a.grade, a.summary,
       a.segments_total, a.segments_completed, a.segments_skipped,
       a.segments_json, a.metadata_json, a.analyzed_at
    FROM compliance_analyses a
    JOIN workout_matches m ON m.id = a.match_id AND m.activity_id = a.activity_id
    WHERE a.match_id = ?1 AND a.is_stale = 0
    "#,
  )
  .bind(match_id)
  .fetch_optional(pool)
  .await?;

  row.as_ref().map(ComplianceAnalysis::from_row).transpose()
}

/// Mark a match's analysis as no longer describing the match
pub async fn invalidate_analysis(conn: &mut SqliteConnection, match_id: i64) -> Result<u64> {
  let result = sqlx::query("UPDATE compliance_analyses SET is_stale = 1 WHERE match_id = ?1")
    .bind(match_id)
    .execute(conn)
    .await?;
  Ok(result.rows_affected())
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
