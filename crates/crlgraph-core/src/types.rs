use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub type NodeId = Uuid;
pub type UniverseId = Uuid;

/// What happened to the node named by a change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NatureOfChange {
    Add,
    Modify,
    Remove,
}

impl fmt::Display for NatureOfChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NatureOfChange::Add => "+++ add",
            NatureOfChange::Modify => "~~~ modify",
            NatureOfChange::Remove => "--- remove",
        };
        write!(f, "{}", s)
    }
}

/// Role tag carried by every pointer-kind node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PointerRole {
    Owning,
    Abstract,
    Refined,
    Referenced,
    Name,
    Definition,
    Uri,
    Value,
}

impl PointerRole {
    /// Roles whose target is expected to be a literal.
    pub fn targets_literal(self) -> bool {
        matches!(
            self,
            PointerRole::Name | PointerRole::Definition | PointerRole::Uri | PointerRole::Value
        )
    }
}

impl fmt::Display for PointerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PointerRole::Owning => "owningElement",
            PointerRole::Abstract => "abstractElement",
            PointerRole::Refined => "refinedElement",
            PointerRole::Referenced => "referencedElement",
            PointerRole::Name => "name",
            PointerRole::Definition => "definition",
            PointerRole::Uri => "uri",
            PointerRole::Value => "value",
        };
        write!(f, "{}", s)
    }
}

/// Discriminator of the closed set of concept kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KindTag {
    Element,
    Reference,
    Refinement,
    Literal,
    Pointer,
}

impl KindTag {
    pub const ALL: [KindTag; 5] = [
        KindTag::Element,
        KindTag::Reference,
        KindTag::Refinement,
        KindTag::Literal,
        KindTag::Pointer,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            KindTag::Element => "Element",
            KindTag::Reference => "Reference",
            KindTag::Refinement => "Refinement",
            KindTag::Literal => "Literal",
            KindTag::Pointer => "Pointer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }

    /// Element-like kinds own children and are owned through an owning pointer.
    pub fn is_element_like(self) -> bool {
        matches!(
            self,
            KindTag::Element | KindTag::Reference | KindTag::Refinement
        )
    }
}

impl fmt::Display for KindTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tag_parses_closed_set() {
        for kind in KindTag::ALL {
            assert_eq!(KindTag::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(KindTag::parse("Diagram"), None);
    }

    #[test]
    fn literal_roles() {
        assert!(PointerRole::Name.targets_literal());
        assert!(!PointerRole::Owning.targets_literal());
    }
}
