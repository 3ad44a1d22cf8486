//! Data models for techblog entities.
//!
//! - `Post`, `PostRequest`, `PostStatus`: articles and the payload for writing them
//! - `Comment`: replies under a post
//! - `Page`: one page of a paginated listing

pub mod comment;
pub mod post;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

pub use comment::{Comment, CommentRequest};
pub use post::{Page, Post, PostRequest, PostStatus, UploadResponse};

/// Field name to validation message, as reported in problem details.
pub type FieldErrors = BTreeMap<String, String>;

/// Human-readable age of a timestamp, e.g. "5m ago".
pub fn relative_time(at: DateTime<Utc>) -> String {
    let minutes = (Utc::now() - at).num_minutes();
    if minutes < 1 {
        // Also covers clock skew
        "just now".to_string()
    } else if minutes < 60 {
        format!("{}m ago", minutes)
    } else if minutes < 1440 {
        let hours = minutes / 60;
        if minutes % 60 >= 30 {
            format!("{}h ago", hours + 1)
        } else {
            format!("{}h ago", hours)
        }
    } else {
        let days = minutes / 1440;
        if (minutes % 1440) / 60 >= 12 {
            format!("{}d ago", days + 1)
        } else {
            format!("{}d ago", days)
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn test_relative_time() {
        let now = Utc::now();
        assert_eq!(relative_time(now), "just now");
        assert_eq!(relative_time(now + Duration::minutes(5)), "just now");
        assert_eq!(relative_time(now - Duration::minutes(5)), "5m ago");
        assert_eq!(relative_time(now - Duration::minutes(95)), "2h ago");
        assert_eq!(relative_time(now - Duration::minutes(70)), "1h ago");
        assert_eq!(relative_time(now - Duration::hours(50)), "2d ago");
    }
}
