use serde::{Deserialize, Serialize};

use crate::model::{LabelId, UserId};

/// Valid label colors. `None` is stored as an empty string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    #[serde(rename = "")]
    None,
    Gray,
    Blue,
    Indigo,
    Purple,
    Pink,
    Red,
    Orange,
    Yellow,
    Green,
    Teal,
    Cyan,
}

impl Color {
    pub fn as_str(self) -> &'static str {
        match self {
            Color::None => "",
            Color::Gray => "gray",
            Color::Blue => "blue",
            Color::Indigo => "indigo",
            Color::Purple => "purple",
            Color::Pink => "pink",
            Color::Red => "red",
            Color::Orange => "orange",
            Color::Yellow => "yellow",
            Color::Green => "green",
            Color::Teal => "teal",
            Color::Cyan => "cyan",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "" => Some(Color::None),
            "gray" => Some(Color::Gray),
            "blue" => Some(Color::Blue),
            "indigo" => Some(Color::Indigo),
            "purple" => Some(Color::Purple),
            "pink" => Some(Color::Pink),
            "red" => Some(Color::Red),
            "orange" => Some(Color::Orange),
            "yellow" => Some(Color::Yellow),
            "green" => Some(Color::Green),
            "teal" => Some(Color::Teal),
            "cyan" => Some(Color::Cyan),
            _ => None,
        }
    }
}

/// A label, private to its owning user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub id: LabelId,
    pub userid: UserId,
    pub name: String,
    pub color: Color,
}

/// Collapses repeated whitespace and trims a label name.
pub fn normalized_name(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_name_collapses_whitespace() {
        assert_eq!(normalized_name("  My   label\t name "), "My label name");
        assert_eq!(normalized_name("   "), "");
    }

    #[test]
    fn color_round_trip() {
        assert_eq!(Color::from_str("teal"), Some(Color::Teal));
        assert_eq!(Color::Teal.as_str(), "teal");
        assert_eq!(Color::from_str(""), Some(Color::None));
        assert_eq!(Color::from_str("lightblue"), None);
    }
}
