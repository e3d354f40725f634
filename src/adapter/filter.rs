//! Filters applied to a foreign runner's plan before execution.

use super::description::ForeignDescription;

/// Decides whether an advertised unit should run.
pub trait ForeignFilter: Send + Sync {
    fn should_run(&self, description: &ForeignDescription) -> bool;

    /// Human-readable form, for diagnostics.
    fn describe(&self) -> String;
}

/// Excludes exactly one named unit and its subtree.
pub struct ExcludeDescription {
    target: String,
}

impl ExcludeDescription {
    pub fn new(target: impl Into<String>) -> Self {
        ExcludeDescription {
            target: target.into(),
        }
    }
}

impl ForeignFilter for ExcludeDescription {
    fn should_run(&self, description: &ForeignDescription) -> bool {
        description.name() != self.target
    }

    fn describe(&self) -> String {
        format!("exclude {}", self.target)
    }
}

/// The union of several exclusion filters: a unit runs only when every
/// member filter lets it through.
pub struct CombinedFilter {
    members: Vec<Box<dyn ForeignFilter>>,
}

impl CombinedFilter {
    pub fn new(members: Vec<Box<dyn ForeignFilter>>) -> Self {
        CombinedFilter { members }
    }

    pub fn excluding(targets: impl IntoIterator<Item = String>) -> Self {
        Self::new(
            targets
                .into_iter()
                .map(|target| Box::new(ExcludeDescription::new(target)) as Box<dyn ForeignFilter>)
                .collect(),
        )
    }
}

impl ForeignFilter for CombinedFilter {
    fn should_run(&self, description: &ForeignDescription) -> bool {
        self.members
            .iter()
            .all(|member| member.should_run(description))
    }

    fn describe(&self) -> String {
        self.members
            .iter()
            .map(|member| member.describe())
            .collect::<Vec<_>>()
            .join(" and ")
    }
}
