use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{relative_time, FieldErrors};
use crate::auth::UserIdentity;

/// Maximum title length accepted by the backend
const MAX_TITLE_CHARS: usize = 200;

/// Maximum excerpt length accepted by the backend
const MAX_EXCERPT_CHARS: usize = 500;

/// Characters of content shown when a post has no excerpt
const PREVIEW_CHARS: usize = 150;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum PostStatus {
    #[default]
    Draft,
    Published,
    Archived,
}

impl std::fmt::Display for PostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PostStatus::Draft => write!(f, "Draft"),
            PostStatus::Published => write!(f, "Published"),
            PostStatus::Archived => write!(f, "Archived"),
        }
    }
}

impl std::str::FromStr for PostStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DRAFT" => Ok(PostStatus::Draft),
            "PUBLISHED" => Ok(PostStatus::Published),
            "ARCHIVED" => Ok(PostStatus::Archived),
            other => Err(format!("unknown post status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub content: String,
    pub excerpt: Option<String>,
    pub cover_image_url: Option<String>,
    pub author_username: String,
    pub author_id: Option<i64>,
    #[serde(default)]
    pub status: PostStatus,
    #[serde(default)]
    pub view_count: i32,
    #[serde(default)]
    pub like_count: i32,
    pub tags: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub liked_by_current_user: bool,
}

impl Post {
    /// Tags from the comma-separated list, trimmed, empties dropped
    pub fn tags(&self) -> Vec<&str> {
        self.tags
            .as_deref()
            .unwrap_or("")
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect()
    }

    /// Author or admin may edit and delete
    pub fn can_edit(&self, user: Option<&UserIdentity>) -> bool {
        user.is_some_and(|u| u.username == self.author_username || u.is_admin())
    }

    pub fn preview(&self) -> String {
        match self.excerpt.as_deref().filter(|e| !e.trim().is_empty()) {
            Some(excerpt) => excerpt.to_string(),
            None if self.content.chars().count() > PREVIEW_CHARS => {
                let head: String = self.content.chars().take(PREVIEW_CHARS).collect();
                format!("{}...", head.trim_end())
            }
            None => self.content.clone(),
        }
    }

    pub fn age_display(&self) -> String {
        relative_time(self.created_at)
    }

    /// Starting point for editing this post
    pub fn to_request(&self) -> PostRequest {
        PostRequest {
            title: self.title.clone(),
            content: self.content.clone(),
            excerpt: self.excerpt.clone(),
            cover_image_url: self.cover_image_url.clone(),
            tags: self.tags.clone(),
            status: Some(self.status),
        }
    }
}

/// Payload for creating or updating a post.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PostRequest {
    pub title: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<PostStatus>,
}

impl PostRequest {
    /// Client-side check of the backend's constraints.
    pub fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        if self.title.trim().is_empty() {
            errors.insert("title".into(), "must not be blank".into());
        } else if self.title.chars().count() > MAX_TITLE_CHARS {
            errors.insert(
                "title".into(),
                format!("size must be between 0 and {}", MAX_TITLE_CHARS),
            );
        }
        if self.content.trim().is_empty() {
            errors.insert("content".into(), "must not be blank".into());
        }
        if let Some(ref excerpt) = self.excerpt {
            if excerpt.chars().count() > MAX_EXCERPT_CHARS {
                errors.insert(
                    "excerpt".into(),
                    format!("size must be between 0 and {}", MAX_EXCERPT_CHARS),
                );
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// One page of a listing, in the backend's page envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub content: Vec<T>,
    #[serde(default)]
    pub total_pages: u32,
    #[serde(default)]
    pub total_elements: u64,
    #[serde(default)]
    pub number: u32,
    #[serde(default)]
    pub size: u32,
}

impl<T> Page<T> {
    pub fn has_next(&self) -> bool {
        self.number + 1 < self.total_pages
    }

    pub fn has_previous(&self) -> bool {
        self.number > 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;

    const POST_JSON: &str = r#"{
        "id": 7,
        "title": "Hello",
        "slug": "hello-1a2b",
        "content": "Body text",
        "excerpt": null,
        "coverImageUrl": null,
        "authorUsername": "a",
        "authorId": 1,
        "status": "PUBLISHED",
        "viewCount": 3,
        "likeCount": 1,
        "tags": "rust, aws ,,devops",
        "createdAt": "2024-05-01T10:00:00Z",
        "updatedAt": "2024-05-01T10:00:00Z",
        "likedByCurrentUser": true
    }"#;

    fn user(name: &str, role: Role) -> UserIdentity {
        UserIdentity {
            username: name.into(),
            email: format!("{}@b.com", name),
            role,
        }
    }

    #[test]
    fn test_parse_post() {
        let post: Post = serde_json::from_str(POST_JSON).expect("Failed to parse post JSON");
        assert_eq!(post.id, 7);
        assert_eq!(post.status, PostStatus::Published);
        assert!(post.liked_by_current_user);
        assert_eq!(post.tags(), vec!["rust", "aws", "devops"]);
        assert_eq!(post.preview(), "Body text");
    }

    #[test]
    fn test_can_edit() {
        let post: Post = serde_json::from_str(POST_JSON).unwrap();
        assert!(post.can_edit(Some(&user("a", Role::User))));
        assert!(post.can_edit(Some(&user("z", Role::Admin))));
        assert!(!post.can_edit(Some(&user("b", Role::User))));
        assert!(!post.can_edit(None));
    }

    #[test]
    fn test_validate_post_request() {
        let ok = PostRequest {
            title: "Title".into(),
            content: "Content".into(),
            ..Default::default()
        };
        assert!(ok.validate().is_ok());

        let bad = PostRequest {
            title: "x".repeat(201),
            content: "  ".into(),
            excerpt: Some("e".repeat(501)),
            ..Default::default()
        };
        let errors = bad.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.contains_key("title"));
        assert!(errors.contains_key("content"));
        assert!(errors.contains_key("excerpt"));
    }

    #[test]
    fn test_post_request_omits_unset_fields() {
        let request = PostRequest {
            title: "T".into(),
            content: "C".into(),
            status: Some(PostStatus::Draft),
            ..Default::default()
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["status"], "DRAFT");
        assert!(json.get("excerpt").is_none());
        assert!(json.get("coverImageUrl").is_none());
    }

    #[test]
    fn test_page_navigation() {
        let page: Page<Post> = serde_json::from_str(
            r#"{"content": [], "totalPages": 3, "totalElements": 20, "number": 1, "size": 9}"#,
        )
        .unwrap();
        assert!(page.has_next());
        assert!(page.has_previous());
    }

    #[test]
    fn test_post_status_from_str() {
        assert_eq!("published".parse::<PostStatus>().unwrap(), PostStatus::Published);
        assert!("gone".parse::<PostStatus>().is_err());
    }
}
