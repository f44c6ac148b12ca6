//! Difficulty-stratified pass@k.
//!
//! Two independent record streams are tallied: every attempted problem, and
//! the problems an external execution harness marked as solved. Each record
//! contributes to exactly one band; counts only ever grow.

use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::error::CpResult;
use crate::problem::difficulty_of;

pub const HARD_BAR: i64 = 1501;
pub const NON_BAR: i64 = 2701;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub hard_bar: i64,
    pub non_bar: i64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            hard_bar: HARD_BAR,
            non_bar: NON_BAR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Band {
    Easy,
    Hard,
    Excluded,
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Easy => write!(f, "Easy"),
            Self::Hard => write!(f, "Hard"),
            Self::Excluded => write!(f, "Excluded"),
        }
    }
}

impl Thresholds {
    pub fn band(&self, difficulty: i64) -> Band {
        if difficulty < self.hard_bar {
            Band::Easy
        } else if difficulty < self.non_bar {
            Band::Hard
        } else {
            Band::Excluded
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreStratum {
    pub band: Band,
    pub attempted: usize,
    pub solved: usize,
    pub percentage: f64,
}

impl ScoreStratum {
    fn new(band: Band, attempted: usize, solved: usize) -> Self {
        Self {
            band,
            attempted,
            solved,
            percentage: percentage(solved, attempted),
        }
    }
}

/// `solved / attempted * 100` rounded to two decimals; `0.0` when nothing was attempted.
pub fn percentage(solved: usize, attempted: usize) -> f64 {
    if attempted == 0 {
        return 0.0;
    }
    let pct = solved as f64 / attempted as f64 * 100.0;
    (pct * 100.0).round() / 100.0
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreSummary {
    #[serde(rename = "Easy", serialize_with = "serialize_pct")]
    pub easy: ScoreStratum,
    #[serde(rename = "Hard", serialize_with = "serialize_pct")]
    pub hard: ScoreStratum,
}

fn serialize_pct<S: serde::Serializer>(stratum: &ScoreStratum, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(stratum.percentage)
}

/// Streaming counter over the attempted and solved streams.
#[derive(Debug, Clone, Default)]
pub struct StratumTally {
    thresholds: Thresholds,
    easy_attempted: usize,
    hard_attempted: usize,
    easy_solved: usize,
    hard_solved: usize,
}

impl StratumTally {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            ..Self::default()
        }
    }

    pub fn observe_attempted(&mut self, difficulty: i64) -> Band {
        let band = self.thresholds.band(difficulty);
        match band {
            Band::Easy => self.easy_attempted += 1,
            Band::Hard => self.hard_attempted += 1,
            Band::Excluded => {}
        }
        band
    }

    pub fn observe_solved(&mut self, difficulty: i64) -> Band {
        let band = self.thresholds.band(difficulty);
        match band {
            Band::Easy => self.easy_solved += 1,
            Band::Hard => self.hard_solved += 1,
            Band::Excluded => {}
        }
        band
    }

    pub fn summary(&self) -> ScoreSummary {
        ScoreSummary {
            easy: ScoreStratum::new(Band::Easy, self.easy_attempted, self.easy_solved),
            hard: ScoreStratum::new(Band::Hard, self.hard_attempted, self.hard_solved),
        }
    }
}

/// Score two record streams; every record must carry an integer `difficulty`.
pub fn score_streams<A, S>(thresholds: Thresholds, attempted: A, solved: S) -> CpResult<ScoreSummary>
where
    A: IntoIterator<Item = CpResult<Value>>,
    S: IntoIterator<Item = CpResult<Value>>,
{
    let mut tally = StratumTally::new(thresholds);
    for record in attempted {
        tally.observe_attempted(difficulty_of(&record?)?);
    }
    for record in solved {
        tally.observe_solved(difficulty_of(&record?)?);
    }
    Ok(tally.summary())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn records(difficulties: &[i64]) -> Vec<CpResult<Value>> {
        difficulties
            .iter()
            .map(|d| Ok(json!({ "difficulty": d })))
            .collect()
    }

    #[test]
    fn test_band_boundaries() {
        let t = Thresholds::default();
        assert_eq!(t.band(1500), Band::Easy);
        assert_eq!(t.band(1501), Band::Hard);
        assert_eq!(t.band(2700), Band::Hard);
        assert_eq!(t.band(2701), Band::Excluded);
    }

    #[test]
    fn test_score_streams_mixed_bands() {
        let mut attempted = vec![1000; 6];
        attempted.extend([2000; 4]);
        let summary = score_streams(
            Thresholds::default(),
            records(&attempted),
            records(&[1000, 1000, 2000]),
        )
        .unwrap();
        assert_eq!(summary.easy.percentage, 33.33);
        assert_eq!(summary.hard.percentage, 25.0);
        assert_eq!(summary.easy.attempted, 6);
        assert_eq!(summary.hard.solved, 1);
        assert_eq!(
            serde_json::to_value(&summary).unwrap(),
            json!({"Easy": 33.33, "Hard": 25.0})
        );
    }

    #[test]
    fn test_empty_band_scores_zero() {
        let summary =
            score_streams(Thresholds::default(), records(&[900, 1200]), records(&[900])).unwrap();
        assert_eq!(summary.hard.attempted, 0);
        assert_eq!(summary.hard.percentage, 0.0);
        assert_eq!(summary.easy.percentage, 50.0);
    }

    #[test]
    fn test_excluded_difficulty_ignored_in_both_streams() {
        let summary = score_streams(
            Thresholds::default(),
            records(&[1000, 3000]),
            records(&[3000, 2701]),
        )
        .unwrap();
        assert_eq!(summary.easy.attempted, 1);
        assert_eq!(summary.easy.solved, 0);
        assert_eq!(summary.hard.attempted, 0);
        assert_eq!(summary.hard.solved, 0);
    }

    #[test]
    fn test_custom_thresholds() {
        let mut tally = StratumTally::new(Thresholds {
            hard_bar: 10,
            non_bar: 20,
        });
        assert_eq!(tally.observe_attempted(5), Band::Easy);
        assert_eq!(tally.observe_attempted(15), Band::Hard);
        assert_eq!(tally.observe_solved(15), Band::Hard);
        assert_eq!(tally.summary().hard.percentage, 100.0);
    }

    #[test]
    fn test_missing_difficulty_is_an_error() {
        let attempted = vec![Ok(json!({"src_uid": "x"}))];
        assert!(score_streams(Thresholds::default(), attempted, Vec::<CpResult<Value>>::new()).is_err());
    }

    #[test]
    fn test_percentage_rounding() {
        assert_eq!(percentage(1, 3), 33.33);
        assert_eq!(percentage(2, 3), 66.67);
        assert_eq!(percentage(0, 0), 0.0);
    }
}
