use serde::{Deserialize, Serialize};

use crate::model::UserId;

/// Read-only snapshot of a platform user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub firstname: String,
    pub lastname: String,
    pub email: String,
}

impl User {
    /// Full name used for display and name matching in searches.
    pub fn fullname(&self) -> String {
        format!("{} {}", self.firstname, self.lastname)
    }
}
