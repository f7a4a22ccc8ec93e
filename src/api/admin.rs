//! Admin endpoints: role check and announcements

use reqwest::Method;
use serde::{Deserialize, Serialize};

use super::client::{ApiClient, ApiResult, Auth};

#[derive(Debug, Deserialize)]
struct AdminStatus {
    #[serde(default)]
    is_admin: bool,
}

#[derive(Debug, Deserialize)]
struct CurrentAnnouncement {
    #[serde(default)]
    content: Option<String>,
}

/// A stored announcement as listed for admins
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Announcement {
    #[serde(skip_serializing)]
    pub id: i64,
    pub content: String,
    #[serde(default = "active_by_default")]
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_end: Option<String>,
}

fn active_by_default() -> bool {
    true
}

fn announcement_path(id: i64) -> String {
    format!("/api/admin/announcement/{}", id)
}

impl ApiClient {
    pub async fn is_admin(&self) -> ApiResult<bool> {
        let status: AdminStatus = self.get("/api/admin/check").await?;
        Ok(status.is_admin)
    }

    /// The latest announcement still in its display window, if any
    pub async fn current_announcement(&self) -> ApiResult<Option<String>> {
        let announcement: CurrentAnnouncement = self.get("/api/admin/announcement").await?;
        Ok(announcement.content.filter(|c| !c.trim().is_empty()))
    }

    /// Publish an announcement; the server rejects non-admins with 403
    pub async fn publish_announcement(&self, content: &str) -> ApiResult<()> {
        let body = serde_json::json!({ "content": content });
        self.send::<_, serde_json::Value>(Method::POST, "/api/admin/announcement", &body, Auth::Required)
            .await?;
        Ok(())
    }

    pub async fn list_announcements(&self) -> ApiResult<Vec<Announcement>> {
        self.get("/api/admin/announcements").await
    }

    /// Replace the content, activity and display window of `announcement`
    pub async fn update_announcement(&self, announcement: &Announcement) -> ApiResult<()> {
        self.send::<_, serde_json::Value>(
            Method::PUT,
            &announcement_path(announcement.id),
            announcement,
            Auth::Required,
        )
        .await?;
        Ok(())
    }

    pub async fn delete_announcement(&self, id: i64) -> ApiResult<()> {
        self.delete(&announcement_path(id)).await
    }
}
