//! The fixed set of issue categories the classifier is trained on.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    DamagedRoad,
    FallenTrees,
    GarbageAndTrash,
    IllegalDrawing,
    StreetLight,
    /// The catch-all used when nothing more specific can be trusted.
    Other,
}

impl Category {
    pub const ALL: [Self; 6] = [
        Self::DamagedRoad,
        Self::FallenTrees,
        Self::GarbageAndTrash,
        Self::IllegalDrawing,
        Self::StreetLight,
        Self::Other,
    ];

    pub const CATCH_ALL: Self = Self::Other;

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::DamagedRoad => "Damaged Road Issue",
            Self::FallenTrees => "Fallen Trees",
            Self::GarbageAndTrash => "Garbage and Trash Issue",
            Self::IllegalDrawing => "Illegal Drawing on Walls",
            Self::StreetLight => "Street Light Issue",
            Self::Other => "Other",
        }
    }

    #[must_use]
    pub const fn is_catch_all(self) -> bool {
        matches!(self, Self::Other)
    }

    /// Maps any server label onto the fixed set. Unknown labels land in the
    /// catch-all rather than failing.
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        label.parse().unwrap_or(Self::CATCH_ALL)
    }
}

fn normalize(label: &str) -> String {
    label
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = normalize(s);
        let category = match key.as_str() {
            "damagedroadissue" | "damagedroad" | "roaddamage" | "pothole" | "potholes" => {
                Self::DamagedRoad
            }
            "fallentrees" | "fallentree" | "treefall" => Self::FallenTrees,
            "garbageandtrashissue" | "garbageandtrash" | "garbage" | "trash"
            | "garbageandsanitation" => Self::GarbageAndTrash,
            "illegaldrawingonwalls" | "illegaldrawing" | "graffiti" => Self::IllegalDrawing,
            "streetlightissue" | "streetlight" | "streetlights" => Self::StreetLight,
            "other" | "others" | "unclassified" => Self::Other,
            _ => return Err(UnknownCategory(s.to_string())),
        };
        Ok(category)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown category '{0}'")]
pub struct UnknownCategory(pub String);

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for Category {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

impl<'de> Deserialize<'de> for Category {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from_label(&s))
    }
}
