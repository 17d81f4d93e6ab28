//! Torznab categories and release-age buckets

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Torznab top-level categories served by the feeds
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Movies,
    Tv,
}

impl Category {
    /// Newznab numeric id
    pub fn id(&self) -> u32 {
        match self {
            Category::Movies => 2000,
            Category::Tv => 5000,
        }
    }

    pub fn from_id(id: u32) -> Option<Self> {
        match id / 1000 {
            2 => Some(Category::Movies),
            5 => Some(Category::Tv),
            _ => None,
        }
    }

    pub fn all() -> [Category; 2] {
        [Category::Movies, Category::Tv]
    }
}

/// Release-age bucket used as a scoring dimension
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AgeBucket {
    Current,
    Y1_2,
    Y5_10,
}

impl AgeBucket {
    /// Bucket a title by its release year. Unknown years land in the
    /// oldest bucket so cold snapshots stay pessimistic.
    pub fn from_year(year: Option<i32>, now_year: i32) -> Self {
        match year {
            Some(y) => {
                let age = (now_year - y).max(0);
                if age <= 1 {
                    AgeBucket::Current
                } else if age <= 4 {
                    AgeBucket::Y1_2
                } else {
                    AgeBucket::Y5_10
                }
            }
            None => AgeBucket::Y5_10,
        }
    }

    pub fn all() -> [AgeBucket; 3] {
        [AgeBucket::Current, AgeBucket::Y1_2, AgeBucket::Y5_10]
    }
}
