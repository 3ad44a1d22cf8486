use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::relative_time;
use crate::auth::UserIdentity;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub post_id: i64,
    pub author_id: Option<i64>,
    pub author_username: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Comment {
    /// Author or admin may delete
    pub fn can_delete(&self, user: Option<&UserIdentity>) -> bool {
        user.is_some_and(|u| u.username == self.author_username || u.is_admin())
    }

    pub fn age_display(&self) -> String {
        relative_time(self.created_at)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CommentRequest {
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;

    #[test]
    fn test_parse_comment_and_permissions() {
        let json = r#"{"id": "c-1", "postId": 7, "authorId": 2, "authorUsername": "b",
            "content": "Nice", "createdAt": "2024-05-01T10:00:00Z"}"#;
        let comment: Comment = serde_json::from_str(json).expect("Failed to parse comment JSON");
        assert_eq!(comment.post_id, 7);

        let author = UserIdentity {
            username: "b".into(),
            email: "b@b.com".into(),
            role: Role::User,
        };
        let other = UserIdentity {
            username: "c".into(),
            ..author.clone()
        };
        let admin = UserIdentity {
            role: Role::Admin,
            ..other.clone()
        };
        assert!(comment.can_delete(Some(&author)));
        assert!(!comment.can_delete(Some(&other)));
        assert!(comment.can_delete(Some(&admin)));
        assert!(!comment.can_delete(None));
    }
}
