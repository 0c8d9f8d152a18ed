use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ShiftStatus {
    Open,
    Accepted,
    InTransit,
    Arrived,
    Completed,
    Cancelled,
}

impl ShiftStatus {
    /// Only a rider in transit publishes a live position.
    pub fn broadcasts_location(&self) -> bool {
        matches!(self, ShiftStatus::InTransit)
    }
}
