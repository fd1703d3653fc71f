use crate::grading::LetterGrade;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CreditedGrade {
    pub grade: LetterGrade,
    pub credits: u32,
}

/// Credit-weighted grade point average rounded to two decimals.
/// An empty set (or zero credits) averages to 0.
pub fn weighted_gpa<I>(grades: I) -> f64
where
    I: IntoIterator<Item = CreditedGrade>,
{
    let mut total_points: u64 = 0;
    let mut total_credits: u64 = 0;
    for g in grades {
        total_points += u64::from(g.grade.grade_point()) * u64::from(g.credits);
        total_credits += u64::from(g.credits);
    }
    if total_credits == 0 {
        return 0.0;
    }
    let avg = total_points as f64 / total_credits as f64;
    (avg * 100.0).round() / 100.0
}
