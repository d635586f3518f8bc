use serde::{Deserialize, Serialize};

use crate::model::{CourseId, GroupId};

/// Course group mode. Controls recipient visibility across groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupMode {
    None,
    Separate,
    Visible,
}

impl GroupMode {
    pub fn as_i64(self) -> i64 {
        match self {
            GroupMode::None => 0,
            GroupMode::Separate => 1,
            GroupMode::Visible => 2,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(GroupMode::None),
            1 => Some(GroupMode::Separate),
            2 => Some(GroupMode::Visible),
            _ => None,
        }
    }
}

/// Read-only snapshot of a course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    pub id: CourseId,
    pub shortname: String,
    pub fullname: String,
    pub visible: bool,
    pub groupmode: GroupMode,
    /// Grouping used when no explicit group filter applies. 0 means none.
    pub defaultgroupingid: i64,
}

/// Read-only snapshot of a course group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub courseid: CourseId,
    pub name: String,
}
