use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LetterGrade {
    Ex,
    A,
    B,
    C,
    D,
    P,
    M,
    F,
    X,
}

impl LetterGrade {
    pub const ALL: [LetterGrade; 9] = [
        Self::Ex,
        Self::A,
        Self::B,
        Self::C,
        Self::D,
        Self::P,
        Self::M,
        Self::F,
        Self::X,
    ];

    /// Grade point table shared by computation, publication and GPA.
    pub fn grade_point(self) -> u8 {
        match self {
            Self::Ex => 10,
            Self::A => 9,
            Self::B => 8,
            Self::C => 7,
            Self::D => 6,
            Self::P => 5,
            Self::M => 4,
            Self::F | Self::X => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ex => "Ex",
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
            Self::P => "P",
            Self::M => "M",
            Self::F => "F",
            Self::X => "X",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|g| g.as_str() == s.trim())
    }

    /// Grades a cutoff may award. F is the fallthrough and X means absent.
    fn is_passing(self) -> bool {
        !matches!(self, Self::F | Self::X)
    }
}

impl fmt::Display for LetterGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Minor1,
    Minor2,
    Mid,
    End,
}

impl Phase {
    pub const ALL: [Phase; 4] = [Self::Minor1, Self::Minor2, Self::Mid, Self::End];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Minor1 => "minor1",
            Self::Minor2 => "minor2",
            Self::Mid => "mid",
            Self::End => "end",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| p.as_str() == s.trim())
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentMarks {
    pub minor1: Option<f64>,
    pub minor2: Option<f64>,
    pub mid: Option<f64>,
    pub end: Option<f64>,
}

impl ComponentMarks {
    pub fn get(&self, phase: Phase) -> Option<f64> {
        match phase {
            Phase::Minor1 => self.minor1,
            Phase::Minor2 => self.minor2,
            Phase::Mid => self.mid,
            Phase::End => self.end,
        }
    }

    pub fn set(&mut self, phase: Phase, value: f64) {
        let slot = match phase {
            Phase::Minor1 => &mut self.minor1,
            Phase::Minor2 => &mut self.minor2,
            Phase::Mid => &mut self.mid,
            Phase::End => &mut self.end,
        };
        *slot = Some(value);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentRule {
    pub max: f64,
    pub weight: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentRules {
    pub minor1: ComponentRule,
    pub minor2: ComponentRule,
    pub mid: ComponentRule,
    pub end: ComponentRule,
}

impl ComponentRules {
    pub fn get(&self, phase: Phase) -> ComponentRule {
        match phase {
            Phase::Minor1 => self.minor1,
            Phase::Minor2 => self.minor2,
            Phase::Mid => self.mid,
            Phase::End => self.end,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cutoff {
    pub grade: LetterGrade,
    pub min_percent: f64,
}

/// Academic policy mapping locked component scores to a letter grade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradePolicy {
    pub components: ComponentRules,
    pub cutoffs: Vec<Cutoff>,
}

impl Default for GradePolicy {
    fn default() -> Self {
        let rule = |max: f64, weight: f64| ComponentRule { max, weight };
        let cut = |grade: LetterGrade, min_percent: f64| Cutoff { grade, min_percent };
        Self {
            components: ComponentRules {
                minor1: rule(20.0, 10.0),
                minor2: rule(20.0, 10.0),
                mid: rule(50.0, 30.0),
                end: rule(100.0, 50.0),
            },
            cutoffs: vec![
                cut(LetterGrade::Ex, 90.0),
                cut(LetterGrade::A, 80.0),
                cut(LetterGrade::B, 70.0),
                cut(LetterGrade::C, 60.0),
                cut(LetterGrade::D, 50.0),
                cut(LetterGrade::P, 45.0),
                cut(LetterGrade::M, 40.0),
            ],
        }
    }
}

impl GradePolicy {
    pub fn validate(&self) -> Result<(), String> {
        let mut weight_total = 0.0;
        for phase in Phase::ALL {
            let rule = self.components.get(phase);
            if !rule.max.is_finite() || rule.max <= 0.0 {
                return Err(format!("{} max must be > 0", phase));
            }
            if !rule.weight.is_finite() || rule.weight < 0.0 {
                return Err(format!("{} weight must be >= 0", phase));
            }
            weight_total += rule.weight;
        }
        if (weight_total - 100.0).abs() > 1e-6 {
            return Err(format!("component weights must sum to 100 (got {})", weight_total));
        }

        if self.cutoffs.is_empty() {
            return Err("at least one cutoff is required".to_string());
        }
        let mut prev: Option<f64> = None;
        let mut seen: Vec<LetterGrade> = Vec::new();
        for c in &self.cutoffs {
            if !c.grade.is_passing() {
                return Err(format!("cutoff grade {} is not awardable by cutoff", c.grade));
            }
            if seen.contains(&c.grade) {
                return Err(format!("duplicate cutoff for grade {}", c.grade));
            }
            if !c.min_percent.is_finite() || !(0.0..=100.0).contains(&c.min_percent) {
                return Err(format!("cutoff for {} must be within 0..=100", c.grade));
            }
            if let Some(p) = prev {
                if c.min_percent >= p {
                    return Err("cutoffs must be strictly descending".to_string());
                }
            }
            prev = Some(c.min_percent);
            seen.push(c.grade);
        }
        Ok(())
    }

    pub fn check_score(&self, phase: Phase, value: f64) -> Result<(), String> {
        let max = self.components.get(phase).max;
        if !value.is_finite() || value < 0.0 {
            return Err("marks must be a non-negative number".to_string());
        }
        if value > max {
            return Err(format!("{} marks must be <= {}", phase, max));
        }
        Ok(())
    }

    /// Weighted percentage, rounded to two decimals so cutoffs compare
    /// against a stable value.
    pub fn weighted_percent(&self, marks: &ComponentMarks) -> f64 {
        let raw: f64 = Phase::ALL
            .iter()
            .map(|&phase| {
                let rule = self.components.get(phase);
                marks.get(phase).unwrap_or(0.0) / rule.max * rule.weight
            })
            .sum();
        (raw * 100.0).round() / 100.0
    }

    pub fn compute(&self, marks: &ComponentMarks) -> LetterGrade {
        if marks.end.is_none() {
            return LetterGrade::X;
        }
        let pct = self.weighted_percent(marks);
        self.cutoffs
            .iter()
            .find(|c| pct >= c.min_percent)
            .map(|c| c.grade)
            .unwrap_or(LetterGrade::F)
    }
}
