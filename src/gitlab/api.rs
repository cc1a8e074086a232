//! Wire types of the GitLab v4 REST API and the Git LFS batch API.
//!
//! Only the fields arcfs reads are declared; serde ignores the rest.

use std::collections::HashMap;

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::host::{
    AccessLevel, ActionKind, BranchName, CommitAction, HostError, HostResult, MergeRequest,
    RepositoryId, RepositoryInfo,
};

/// GitLab "Developer" role, the lowest that may push branches.
pub const DEVELOPER_ACCESS: u32 = 30;

/// Media type of LFS batch requests and responses.
pub const LFS_MEDIA_TYPE: &str = "application/vnd.git-lfs+json";

#[derive(Debug, Deserialize)]
pub struct Project {
    pub id: u64,
    pub path: String,
    pub path_with_namespace: String,
    pub namespace: Namespace,
    /// `None` for a repository without commits
    #[serde(default)]
    pub default_branch: Option<String>,
    #[serde(default)]
    pub permissions: Option<Permissions>,
}

#[derive(Debug, Deserialize)]
pub struct Namespace {
    pub full_path: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct Permissions {
    #[serde(default)]
    pub project_access: Option<AccessGrant>,
    #[serde(default)]
    pub group_access: Option<AccessGrant>,
}

#[derive(Debug, Deserialize)]
pub struct AccessGrant {
    pub access_level: u32,
}

impl Project {
    /// Effective access: the higher of the project and group grants.
    pub fn access(&self) -> AccessLevel {
        let level = self
            .permissions
            .iter()
            .flat_map(|p| [&p.project_access, &p.group_access])
            .flatten()
            .map(|grant| grant.access_level)
            .max()
            .unwrap_or(0);
        if level >= DEVELOPER_ACCESS {
            AccessLevel::Write
        } else {
            AccessLevel::Read
        }
    }

    pub fn repository_id(&self) -> RepositoryId {
        RepositoryId::new(self.id.to_string())
    }

    pub fn into_info(self) -> HostResult<RepositoryInfo> {
        let access = self.access();
        let branch = self.default_branch.as_deref().unwrap_or("main");
        let default_branch = BranchName::new(branch).map_err(|e| {
            HostError::InvalidResponse(format!("default branch of project {}: {}", self.id, e))
        })?;
        Ok(RepositoryInfo {
            id: self.repository_id(),
            namespace: self.namespace.full_path,
            name: self.path,
            default_branch,
            access,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct TreeItem {
    pub path: String,
    /// `blob`, `tree` or `commit` (submodule)
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Serialize)]
pub struct CommitRequest<'a> {
    pub branch: &'a str,
    pub commit_message: &'a str,
    pub actions: Vec<CommitActionBody<'a>>,
}

#[derive(Debug, Serialize)]
pub struct CommitActionBody<'a> {
    pub action: ActionKind,
    pub file_path: &'a str,
    pub content: String,
    pub encoding: &'static str,
}

impl<'a> CommitActionBody<'a> {
    /// Text content goes as-is, anything else base64-encoded.
    pub fn from_action(action: &'a CommitAction) -> Self {
        let (content, encoding) = match std::str::from_utf8(&action.content) {
            Ok(text) => (text.to_string(), "text"),
            Err(_) => (
                base64::engine::general_purpose::STANDARD.encode(&action.content),
                "base64",
            ),
        };
        Self {
            action: action.kind,
            file_path: &action.path,
            content,
            encoding,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CommitResponse {
    pub id: String,
}

#[derive(Debug, Serialize)]
pub struct MergeRequestBody<'a> {
    pub source_branch: &'a str,
    pub target_branch: &'a str,
    pub title: &'a str,
    pub description: &'a str,
    pub remove_source_branch: bool,
}

#[derive(Debug, Deserialize)]
pub struct MergeRequestResponse {
    pub iid: u64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub source_branch: String,
    pub target_branch: String,
    #[serde(default)]
    pub web_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl MergeRequestResponse {
    pub fn into_merge_request(self) -> HostResult<MergeRequest> {
        let branch = |name: String| {
            BranchName::new(name).map_err(|e| HostError::InvalidResponse(format!("merge request branch: {}", e)))
        };
        Ok(MergeRequest {
            id: self.iid,
            source: branch(self.source_branch)?,
            target: branch(self.target_branch)?,
            title: self.title,
            description: self.description.unwrap_or_default(),
            web_url: self.web_url,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct BatchRequest<'a> {
    pub operation: &'a str,
    pub transfers: [&'a str; 1],
    pub objects: [ObjectSpec<'a>; 1],
    pub hash_algo: &'a str,
}

#[derive(Debug, Serialize)]
pub struct ObjectSpec<'a> {
    pub oid: &'a str,
    pub size: u64,
}

#[derive(Debug, Deserialize)]
pub struct BatchResponse {
    #[serde(default)]
    pub objects: Vec<BatchObject>,
}

#[derive(Debug, Deserialize)]
pub struct BatchObject {
    pub oid: String,
    #[serde(default)]
    pub actions: Option<BatchActions>,
    #[serde(default)]
    pub error: Option<BatchError>,
}

/// Missing actions in an upload response mean the server has the object.
#[derive(Debug, Default, Deserialize)]
pub struct BatchActions {
    #[serde(default)]
    pub upload: Option<BatchAction>,
    #[serde(default)]
    pub download: Option<BatchAction>,
    #[serde(default)]
    pub verify: Option<BatchAction>,
}

#[derive(Debug, Deserialize)]
pub struct BatchAction {
    pub href: String,
    #[serde(default)]
    pub header: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct BatchError {
    pub code: u16,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_access_and_info() {
        let json = r#"{
            "id": 42,
            "path": "myarc",
            "path_with_namespace": "alice.smith/myarc",
            "namespace": {"full_path": "alice.smith", "kind": "user"},
            "default_branch": "main",
            "permissions": {"project_access": null, "group_access": {"access_level": 40}}
        }"#;
        let project: Project = serde_json::from_str(json).unwrap();
        assert_eq!(project.access(), AccessLevel::Write);

        let info = project.into_info().unwrap();
        assert_eq!(info.id, RepositoryId::new("42"));
        assert_eq!(info.namespace, "alice.smith");
        assert_eq!(info.name, "myarc");
        assert_eq!(info.default_branch.as_str(), "main");
    }

    #[test]
    fn test_project_reporter_is_read_only() {
        let json = r#"{
            "id": 7,
            "path": "shared",
            "path_with_namespace": "lab/shared",
            "namespace": {"full_path": "lab"},
            "default_branch": null,
            "permissions": {"project_access": {"access_level": 20}}
        }"#;
        let project: Project = serde_json::from_str(json).unwrap();
        assert_eq!(project.access(), AccessLevel::Read);
        assert_eq!(project.into_info().unwrap().default_branch.as_str(), "main");
    }

    #[test]
    fn test_commit_action_encoding() {
        let text = CommitAction::create("a.txt", "pointer text");
        let body = CommitActionBody::from_action(&text);
        assert_eq!(body.encoding, "text");
        assert_eq!(body.content, "pointer text");

        let binary = CommitAction::update("b.bin", vec![0xff, 0x00]);
        let body = CommitActionBody::from_action(&binary);
        assert_eq!(body.encoding, "base64");
        assert_eq!(body.content, "/wA=");

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["action"], "update");
    }

    #[test]
    fn test_batch_response_without_actions() {
        let json = r#"{"transfer": "basic", "objects": [{"oid": "abc", "size": 3}]}"#;
        let response: BatchResponse = serde_json::from_str(json).unwrap();
        assert!(response.objects[0].actions.is_none());
        assert!(response.objects[0].error.is_none());
    }
}
