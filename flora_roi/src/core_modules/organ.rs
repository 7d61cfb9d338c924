// THEORY:
// The organ tag says which botanical part a photograph shows. It selects both the
// ROI handler and the output folder. Tags come from the `<Content>` element of
// the side record and are matched exactly after trimming; anything else is
// `Unknown` and is skipped by the dispatcher.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OrganTag {
    Flower,
    Fruit,
    LeafScan,
    Leaf,
    Stem,
    Entire,
    Branch,
    Unknown,
}

impl OrganTag {
    /// Every tag that owns an output folder.
    pub const KNOWN: [OrganTag; 7] = [
        OrganTag::Flower,
        OrganTag::Fruit,
        OrganTag::LeafScan,
        OrganTag::Leaf,
        OrganTag::Stem,
        OrganTag::Entire,
        OrganTag::Branch,
    ];

    pub fn parse(content: &str) -> Self {
        match content.trim() {
            "Flower" => OrganTag::Flower,
            "Fruit" => OrganTag::Fruit,
            "LeafScan" => OrganTag::LeafScan,
            "Leaf" => OrganTag::Leaf,
            "Stem" => OrganTag::Stem,
            "Entire" => OrganTag::Entire,
            "Branch" => OrganTag::Branch,
            _ => OrganTag::Unknown,
        }
    }

    pub fn folder_name(self) -> Option<&'static str> {
        match self {
            OrganTag::Flower => Some("flower"),
            OrganTag::Fruit => Some("fruit"),
            OrganTag::LeafScan => Some("leafscan"),
            OrganTag::Leaf => Some("leaf"),
            OrganTag::Stem => Some("stem"),
            OrganTag::Entire => Some("entire"),
            OrganTag::Branch => Some("branch"),
            OrganTag::Unknown => None,
        }
    }

    /// Entire-plant and branch photographs are copied without cropping.
    pub fn is_copy_through(self) -> bool {
        matches!(self, OrganTag::Entire | OrganTag::Branch)
    }
}

impl std::fmt::Display for OrganTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.folder_name().unwrap_or("unknown"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_exact_after_trimming() {
        assert_eq!(OrganTag::parse(" LeafScan\n"), OrganTag::LeafScan);
        assert_eq!(OrganTag::parse("leafscan"), OrganTag::Unknown);
        assert_eq!(OrganTag::parse("Flowers"), OrganTag::Unknown);
        assert_eq!(OrganTag::parse(""), OrganTag::Unknown);
    }

    #[test]
    fn every_known_tag_has_a_distinct_folder() {
        let mut folders: Vec<&str> = OrganTag::KNOWN.iter().filter_map(|t| t.folder_name()).collect();
        assert_eq!(folders.len(), 7);
        folders.sort_unstable();
        folders.dedup();
        assert_eq!(folders.len(), 7);
        assert_eq!(OrganTag::Unknown.folder_name(), None);
    }
}
