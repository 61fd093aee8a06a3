//! Task status state machine.
//!
//! # Transitions
//! - INITIATED -> PHOTOS_UPLOADED (upload step)
//! - PHOTOS_UPLOADED -> COLOR_CORRECTED (color-correction agent)
//! - COLOR_CORRECTED -> WORDPRESS_PUBLISHED | PUBLISH_FAILED (publish agent)
//!
//! Statuses are stored as SCREAMING_SNAKE_CASE strings. A stored string this
//! build does not know decodes to [`TaskStatus::Unknown`] so one bad document
//! cannot stall the change feed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskStatus {
    /// Task exists, no photos yet.
    Initiated,

    /// Photos attached; waiting for color correction.
    PhotosUploaded,

    /// Color analysis written; waiting for publish.
    ColorCorrected,

    /// At least one photo reached the media library. Terminal.
    WordpressPublished,

    /// Publish ran but nothing was published. Terminal.
    PublishFailed,

    /// A status string this build does not recognise.
    Unknown,
}

/// A pipeline stage, i.e. the unit of work one agent performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    ColorCorrection,
    Publish,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Initiated,
        TaskStatus::PhotosUploaded,
        TaskStatus::ColorCorrected,
        TaskStatus::WordpressPublished,
        TaskStatus::PublishFailed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Initiated => "INITIATED",
            TaskStatus::PhotosUploaded => "PHOTOS_UPLOADED",
            TaskStatus::ColorCorrected => "COLOR_CORRECTED",
            TaskStatus::WordpressPublished => "WORDPRESS_PUBLISHED",
            TaskStatus::PublishFailed => "PUBLISH_FAILED",
            TaskStatus::Unknown => "UNKNOWN",
        }
    }

    /// The stage this status triggers, if any.
    pub fn stage(self) -> Option<Stage> {
        match self {
            TaskStatus::PhotosUploaded => Some(Stage::ColorCorrection),
            TaskStatus::ColorCorrected => Some(Stage::Publish),
            TaskStatus::Initiated
            | TaskStatus::WordpressPublished
            | TaskStatus::PublishFailed
            | TaskStatus::Unknown => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::WordpressPublished | TaskStatus::PublishFailed
        )
    }

    /// Progress counter that must accompany this status.
    pub fn workflow_step(self) -> u32 {
        match self {
            TaskStatus::Initiated | TaskStatus::PhotosUploaded => 1,
            TaskStatus::ColorCorrected => 2,
            TaskStatus::WordpressPublished | TaskStatus::PublishFailed => 3,
            TaskStatus::Unknown => 0,
        }
    }

    /// Position in the linear order. Both terminal outcomes share a rank.
    pub fn rank(self) -> Option<u8> {
        match self {
            TaskStatus::Initiated => Some(0),
            TaskStatus::PhotosUploaded => Some(1),
            TaskStatus::ColorCorrected => Some(2),
            TaskStatus::WordpressPublished | TaskStatus::PublishFailed => Some(3),
            TaskStatus::Unknown => None,
        }
    }

    /// Is `next` the immediate successor of `self`?
    pub fn can_advance_to(self, next: TaskStatus) -> bool {
        match (self.rank(), next.rank()) {
            (Some(from), Some(to)) => to == from + 1,
            _ => false,
        }
    }
}

impl Stage {
    /// The status that hands a task to this stage.
    pub fn trigger(self) -> TaskStatus {
        match self {
            Stage::ColorCorrection => TaskStatus::PhotosUploaded,
            Stage::Publish => TaskStatus::ColorCorrected,
        }
    }

    pub fn all() -> [Stage; 2] {
        [Stage::ColorCorrection, Stage::Publish]
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::ColorCorrection => f.write_str("color_correction"),
            Stage::Publish => f.write_str("publish"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown task status '{0}'")]
pub struct ParseStatusError(String);

impl FromStr for TaskStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseStatusError(s.to_string()))
    }
}

impl From<String> for TaskStatus {
    fn from(s: String) -> Self {
        s.parse().unwrap_or(TaskStatus::Unknown)
    }
}

impl From<TaskStatus> for String {
    fn from(status: TaskStatus) -> Self {
        status.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn serializes_as_screaming_snake_case() {
        let s = serde_json::to_string(&TaskStatus::PhotosUploaded).unwrap();
        assert_eq!(s, "\"PHOTOS_UPLOADED\"");

        let back: TaskStatus = serde_json::from_str("\"WORDPRESS_PUBLISHED\"").unwrap();
        assert_eq!(back, TaskStatus::WordpressPublished);
    }

    #[test]
    fn unrecognised_string_decodes_to_unknown() {
        let status: TaskStatus = serde_json::from_str("\"PHOTOS_UPLAODED\"").unwrap();
        assert_eq!(status, TaskStatus::Unknown);
        assert_eq!(status.stage(), None);
    }

    #[rstest]
    #[case::initiated(TaskStatus::Initiated, None)]
    #[case::uploaded(TaskStatus::PhotosUploaded, Some(Stage::ColorCorrection))]
    #[case::corrected(TaskStatus::ColorCorrected, Some(Stage::Publish))]
    #[case::published(TaskStatus::WordpressPublished, None)]
    #[case::publish_failed(TaskStatus::PublishFailed, None)]
    #[case::unknown(TaskStatus::Unknown, None)]
    fn routes_each_status_to_at_most_one_stage(
        #[case] status: TaskStatus,
        #[case] expected: Option<Stage>,
    ) {
        assert_eq!(status.stage(), expected);
    }

    #[test]
    fn stage_trigger_is_inverse_of_routing() {
        for stage in Stage::all() {
            assert_eq!(stage.trigger().stage(), Some(stage));
        }
    }

    #[test]
    fn linear_order_has_no_skips() {
        assert!(TaskStatus::Initiated.can_advance_to(TaskStatus::PhotosUploaded));
        assert!(TaskStatus::ColorCorrected.can_advance_to(TaskStatus::PublishFailed));
        assert!(!TaskStatus::Initiated.can_advance_to(TaskStatus::ColorCorrected));
        assert!(!TaskStatus::WordpressPublished.can_advance_to(TaskStatus::PhotosUploaded));
    }

    #[test]
    fn workflow_step_tracks_rank() {
        assert_eq!(TaskStatus::PhotosUploaded.workflow_step(), 1);
        assert_eq!(TaskStatus::ColorCorrected.workflow_step(), 2);
        assert_eq!(TaskStatus::PublishFailed.workflow_step(), 3);
        assert!(TaskStatus::PublishFailed.is_terminal());
        assert!(!TaskStatus::ColorCorrected.is_terminal());
    }
}
