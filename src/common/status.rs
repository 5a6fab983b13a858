use serde::Serialize;
use std::fmt;

/// Who is operating: the trainee alone, with help, or the trainer took over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperatorStatus {
    Independent,
    Help,
    TakeOver,
    #[default]
    Unset,
}

impl OperatorStatus {
    pub fn label(&self) -> &'static str {
        match self {
            OperatorStatus::Independent => "Independent",
            OperatorStatus::Help => "Help",
            OperatorStatus::TakeOver => "TakeOver",
            OperatorStatus::Unset => "--",
        }
    }

    /// Statuses the operator can switch to from this one. The active status is
    /// never offered again until another one is chosen.
    pub fn available_transitions(&self) -> Vec<OperatorStatus> {
        [
            OperatorStatus::Independent,
            OperatorStatus::Help,
            OperatorStatus::TakeOver,
        ]
        .into_iter()
        .filter(|status| status != self)
        .collect()
    }
}

impl fmt::Display for OperatorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_status_disables_only_itself() {
        assert_eq!(
            OperatorStatus::Help.available_transitions(),
            vec![OperatorStatus::Independent, OperatorStatus::TakeOver]
        );
        assert_eq!(OperatorStatus::Unset.available_transitions().len(), 3);
    }
}
