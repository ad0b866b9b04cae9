//! Terminal answers for `ask` rules.

use dialoguer::Select;

use modforge_resolver::policy::{Answer, DecisionPoint, DecisionPrompt};

/// Asks the user with an arrow-key selection on stderr.
#[derive(Debug, Default)]
pub struct TerminalPrompt;

impl TerminalPrompt {
    pub fn new() -> Self {
        Self
    }
}

impl DecisionPrompt for TerminalPrompt {
    fn answer(&self, point: &DecisionPoint) -> Option<Answer> {
        let (question, items) = choices(point);
        match Select::new()
            .with_prompt(question)
            .items(&items[..])
            .default(0)
            .interact_opt()
        {
            Ok(Some(index)) => {
                tracing::debug!("answered `{point}` with option {index}");
                Some(Answer::Take(index))
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("prompt failed: {e}");
                None
            }
        }
    }
}

/// The question and options shown for a decision point. Option order
/// matches the indices [`Answer::Take`] expects.
fn choices(point: &DecisionPoint) -> (String, Vec<String>) {
    match point {
        DecisionPoint::Ambiguity {
            subject,
            candidates,
        } => (
            format!("  Which version of {subject}?"),
            candidates
                .iter()
                .map(|c| format!("{} (published {})", c.version, c.published.format("%Y-%m-%d")))
                .collect(),
        ),
        DecisionPoint::CapabilityCollision {
            slot,
            incumbent,
            challenger,
        } => (
            format!("  {incumbent} and {challenger} both provide `{slot}`. Keep which?"),
            vec![incumbent.to_string(), challenger.to_string()],
        ),
        DecisionPoint::OptionalDependencyOffered { .. } => (
            format!("  {point}. Include it?"),
            vec!["include".to_string(), "skip".to_string()],
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modforge_core::candidate::DependencyRole;
    use modforge_core::identity::ModIdentity;

    #[test]
    fn collision_lists_incumbent_first() {
        let point = DecisionPoint::CapabilityCollision {
            slot: "shaders".into(),
            incumbent: ModIdentity::new("iris", "YL57xq9U"),
            challenger: ModIdentity::new("oculus", "GchcoXML"),
        };
        let (question, items) = choices(&point);
        assert!(question.contains("`shaders`"));
        assert_eq!(items, ["iris", "oculus"]);
    }

    #[test]
    fn optional_offers_include_then_skip() {
        let point = DecisionPoint::OptionalDependencyOffered {
            parent: ModIdentity::new("sodium", "AANobbMI"),
            target: ModIdentity::new("indium", "Orvt0mRa"),
            role: DependencyRole::SubMod,
        };
        let (question, items) = choices(&point);
        assert_eq!(question, "  sodium recommends sub-mod indium. Include it?");
        assert_eq!(items, ["include", "skip"]);
    }
}
