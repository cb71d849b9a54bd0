//! Capability checks for navigation and privileged commands.
//!
//! A [`NavNode`] declares the capabilities it needs and whether all or any
//! of them must be held. Visibility is a pure function of that requirement
//! and the caller's capability set.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ViewPlans,
    CreatePlans,
    EditPlans,
    ReviewPlans,
    SchedulePlans,
    BookAppointments,
    CancelPlans,
}

impl Capability {
    pub const ALL: [Capability; 7] = [
        Self::ViewPlans,
        Self::CreatePlans,
        Self::EditPlans,
        Self::ReviewPlans,
        Self::SchedulePlans,
        Self::BookAppointments,
        Self::CancelPlans,
    ];
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ViewPlans => "view_plans",
            Self::CreatePlans => "create_plans",
            Self::EditPlans => "edit_plans",
            Self::ReviewPlans => "review_plans",
            Self::SchedulePlans => "schedule_plans",
            Self::BookAppointments => "book_appointments",
            Self::CancelPlans => "cancel_plans",
        };
        f.write_str(s)
    }
}

impl FromStr for Capability {
    type Err = CapabilityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "view_plans" => Ok(Self::ViewPlans),
            "create_plans" => Ok(Self::CreatePlans),
            "edit_plans" => Ok(Self::EditPlans),
            "review_plans" => Ok(Self::ReviewPlans),
            "schedule_plans" => Ok(Self::SchedulePlans),
            "book_appointments" => Ok(Self::BookAppointments),
            "cancel_plans" => Ok(Self::CancelPlans),
            other => Err(CapabilityParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`Capability`] string.
#[derive(Debug, Clone)]
pub struct CapabilityParseError(pub String);

impl fmt::Display for CapabilityParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid capability: {:?}", self.0)
    }
}

impl std::error::Error for CapabilityParseError {}

// ---------------------------------------------------------------------------
// Requirements
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Combinator {
    All,
    Any,
}

/// Capabilities a node needs. An empty requirement is always satisfied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub capabilities: BTreeSet<Capability>,
    pub combinator: Combinator,
}

impl Requirement {
    pub fn none() -> Self {
        Self::all([])
    }

    pub fn all(capabilities: impl IntoIterator<Item = Capability>) -> Self {
        Self {
            capabilities: capabilities.into_iter().collect(),
            combinator: Combinator::All,
        }
    }

    pub fn any(capabilities: impl IntoIterator<Item = Capability>) -> Self {
        Self {
            capabilities: capabilities.into_iter().collect(),
            combinator: Combinator::Any,
        }
    }

    pub fn is_satisfied_by(&self, held: &BTreeSet<Capability>) -> bool {
        if self.capabilities.is_empty() {
            return true;
        }
        match self.combinator {
            Combinator::All => self.capabilities.is_subset(held),
            Combinator::Any => !self.capabilities.is_disjoint(held),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sep = match self.combinator {
            Combinator::All => " and ",
            Combinator::Any => " or ",
        };
        let names: Vec<String> = self.capabilities.iter().map(ToString::to_string).collect();
        f.write_str(&names.join(sep))
    }
}

// ---------------------------------------------------------------------------
// Navigation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavNode {
    pub id: String,
    pub label: String,
    pub requirement: Requirement,
    #[serde(default)]
    pub children: Vec<NavNode>,
}

impl NavNode {
    pub fn new(id: &str, label: &str, requirement: Requirement) -> Self {
        Self {
            id: id.to_owned(),
            label: label.to_owned(),
            requirement,
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<NavNode>) -> Self {
        self.children = children;
        self
    }
}

/// Prune `nodes` to what `held` may see. A hidden parent hides its whole
/// subtree.
pub fn visible_nodes(nodes: &[NavNode], held: &BTreeSet<Capability>) -> Vec<NavNode> {
    nodes
        .iter()
        .filter(|node| node.requirement.is_satisfied_by(held))
        .map(|node| NavNode {
            children: visible_nodes(&node.children, held),
            ..node.clone()
        })
        .collect()
}

/// The operator menu exposed by the CLI.
pub fn operator_menu() -> Vec<NavNode> {
    use Capability::*;
    vec![
        NavNode::new("plans", "Treatment plans", Requirement::all([ViewPlans])).with_children(
            vec![
                NavNode::new("plans.create", "Create plan", Requirement::all([CreatePlans])),
                NavNode::new("plans.edit", "Edit items", Requirement::all([EditPlans])),
                NavNode::new("plans.review", "Review queue", Requirement::all([ReviewPlans])),
                NavNode::new(
                    "plans.cancel",
                    "Cancel plan",
                    Requirement::any([CancelPlans, ReviewPlans]),
                ),
            ],
        ),
        NavNode::new(
            "schedule",
            "Auto-schedule",
            Requirement::all([ViewPlans, SchedulePlans]),
        )
        .with_children(vec![NavNode::new(
            "schedule.book",
            "Confirm bookings",
            Requirement::all([BookAppointments]),
        )]),
        NavNode::new("help", "Help", Requirement::none()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn held(caps: &[Capability]) -> BTreeSet<Capability> {
        caps.iter().copied().collect()
    }

    fn ids(nodes: &[NavNode]) -> Vec<String> {
        nodes
            .iter()
            .flat_map(|n| std::iter::once(n.id.clone()).chain(ids(&n.children)))
            .collect()
    }

    #[test]
    fn capability_roundtrip() {
        for cap in Capability::ALL {
            assert_eq!(cap.to_string().parse::<Capability>().unwrap(), cap);
        }
        assert!("root".parse::<Capability>().is_err());
    }

    #[test]
    fn all_and_any_combinators() {
        use Capability::*;
        let all = Requirement::all([ViewPlans, EditPlans]);
        assert!(all.is_satisfied_by(&held(&[ViewPlans, EditPlans, CancelPlans])));
        assert!(!all.is_satisfied_by(&held(&[ViewPlans])));

        let any = Requirement::any([CancelPlans, ReviewPlans]);
        assert!(any.is_satisfied_by(&held(&[ReviewPlans])));
        assert!(!any.is_satisfied_by(&held(&[ViewPlans])));

        assert!(Requirement::none().is_satisfied_by(&held(&[])));
        assert!(Requirement::any([]).is_satisfied_by(&held(&[])));
    }

    #[test]
    fn hidden_parent_hides_children() {
        use Capability::*;
        let visible = visible_nodes(&operator_menu(), &held(&[BookAppointments]));
        assert_eq!(ids(&visible), vec!["help"]);
    }

    #[test]
    fn reviewer_sees_review_and_cancel() {
        use Capability::*;
        let visible = visible_nodes(&operator_menu(), &held(&[ViewPlans, ReviewPlans]));
        assert_eq!(
            ids(&visible),
            vec!["plans", "plans.review", "plans.cancel", "help"]
        );
    }

    #[test]
    fn requirement_display() {
        use Capability::*;
        assert_eq!(
            Requirement::any([CancelPlans, ReviewPlans]).to_string(),
            "review_plans or cancel_plans"
        );
    }
}
