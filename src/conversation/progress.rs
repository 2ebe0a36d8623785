//! Coarse milestones reported while a question is being answered.

use serde::Serialize;

/// One milestone of `ask`. Purely cosmetic; the percentages are fixed.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStep {
    /// Question accepted.
    Analyzing,
    /// Prompt assembled.
    Generating,
    /// Request about to be sent.
    Securing,
    /// Waiting on the first fragment.
    Writing,
    /// Reply recorded.
    Completed,
}

impl ProgressStep {
    /// Completion percentage.
    #[must_use]
    pub const fn percent(self) -> u8 {
        match self {
            Self::Analyzing => 10,
            Self::Generating => 30,
            Self::Securing => 50,
            Self::Writing => 70,
            Self::Completed => 100,
        }
    }

    /// Status line shown next to the bar.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Analyzing => "Analyzing your question...",
            Self::Generating => "Generating enterprise-grade solution...",
            Self::Securing => "Adding security best practices...",
            Self::Writing => "Creating complete code examples...",
            Self::Completed => "Response completed!",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_is_increasing() {
        let steps = [
            ProgressStep::Analyzing,
            ProgressStep::Generating,
            ProgressStep::Securing,
            ProgressStep::Writing,
            ProgressStep::Completed,
        ];
        let percents: Vec<u8> = steps.iter().map(|step| step.percent()).collect();
        assert_eq!(percents, vec![10, 30, 50, 70, 100]);
    }
}
