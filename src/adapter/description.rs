//! Execution plans advertised by foreign runners.

/// One unit in a foreign runner's advertised plan, either a leaf test or
/// a suite grouping further units. Names are assumed unique within one
/// runner's plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignDescription {
    name: String,
    suite: bool,
    children: Vec<ForeignDescription>,
}

impl ForeignDescription {
    pub fn test(name: impl Into<String>) -> Self {
        ForeignDescription {
            name: name.into(),
            suite: false,
            children: Vec::new(),
        }
    }

    pub fn suite(
        name: impl Into<String>,
        children: impl IntoIterator<Item = ForeignDescription>,
    ) -> Self {
        ForeignDescription {
            name: name.into(),
            suite: true,
            children: children.into_iter().collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_test(&self) -> bool {
        !self.suite
    }

    pub fn children(&self) -> &[ForeignDescription] {
        &self.children
    }

    /// Depth-first lookup by name, this unit included.
    pub fn find(&self, name: &str) -> Option<&ForeignDescription> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(name))
    }

    /// Number of leaf tests in this subtree.
    pub fn test_count(&self) -> usize {
        if self.is_test() {
            1
        } else {
            self.children.iter().map(ForeignDescription::test_count).sum()
        }
    }
}
