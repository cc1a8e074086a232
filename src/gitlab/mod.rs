//! A repository host over the GitLab v4 REST API.
//!
//! Repository ids are numeric project ids. REST calls authenticate with the
//! `PRIVATE-TOKEN` header, LFS batch calls with `oauth2:<token>` basic auth
//! against `<host>/<namespace>/<project>.git/info/lfs/objects/batch`.
//! Listings follow keyset pagination through `Link: rel="next"` headers.

mod api;

use std::collections::HashMap;
use std::io::Read;
use std::time::Duration;

use parking_lot::RwLock;
use reqwest::blocking::{Body, Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE, LINK};
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::HostConfig;
use crate::host::{
    BranchName, ByteStream, CommitAction, HostError, HostResult, MergeRequest, MergeRequestSpec,
    Page, PageToken, RepositoryHost, RepositoryId, RepositoryInfo, TreeEntry, UploadOutcome,
};
use crate::lfs::{LfsAttributes, LfsPointer};
use crate::write::GITATTRIBUTES;

use api::{
    BatchAction, BatchObject, BatchRequest, BatchResponse, CommitActionBody,
    CommitRequest, CommitResponse, MergeRequestBody, MergeRequestResponse, ObjectSpec, Project,
    TreeItem, LFS_MEDIA_TYPE,
};

const PER_PAGE: &str = "100";
/// GitLab "Guest", the lowest role that lists a project
const MIN_ACCESS_LEVEL: &str = "10";

/// [`RepositoryHost`] talking to a GitLab instance.
pub struct GitLabHost {
    client: Client,
    config: HostConfig,
    api_base: Url,
    /// project id -> `namespace/project`, needed for LFS endpoints
    project_paths: RwLock<HashMap<RepositoryId, String>>,
}

impl GitLabHost {
    pub fn new(config: HostConfig, timeout: Duration) -> HostResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("arcfs/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(request_error)?;
        let api_base = Url::parse(&format!("{}/api/v4/", config.host_url))
            .map_err(|e| HostError::InvalidResponse(format!("host url {}: {}", config.host_url, e)))?;
        Ok(Self {
            client,
            config,
            api_base,
            project_paths: RwLock::new(HashMap::new()),
        })
    }

    /// `<api>/projects/<id>/<segments...>`, each segment percent-encoded
    /// (a file path like `data/a.txt` becomes `data%2Fa.txt`).
    fn project_url(&self, repo: &RepositoryId, segments: &[&str]) -> HostResult<Url> {
        let mut all = vec!["projects", repo.as_str()];
        all.extend_from_slice(segments);
        self.api_url(&all)
    }

    fn api_url(&self, segments: &[&str]) -> HostResult<Url> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|_| HostError::InvalidResponse(format!("host url {} cannot be a base", self.api_base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn api(&self, method: Method, url: Url) -> RequestBuilder {
        debug!(%method, %url, "gitlab request");
        self.client
            .request(method, url)
            .header("PRIVATE-TOKEN", self.config.credential.expose())
    }

    fn get_json<T: DeserializeOwned>(&self, url: Url) -> HostResult<(T, Option<String>)> {
        let response = execute(self.api(Method::GET, url))?;
        let next = next_link(response.headers());
        let body = response.json::<T>().map_err(request_error)?;
        Ok((body, next))
    }

    /// Fetch every page of a keyset-paginated listing.
    fn get_all<T: DeserializeOwned>(&self, url: Url) -> HostResult<Vec<T>> {
        let mut items = Vec::new();
        let mut next = Some(url);
        while let Some(url) = next.take() {
            let (page, link): (Vec<T>, _) = self.get_json(url)?;
            items.extend(page);
            next = link.map(|l| parse_url(&l)).transpose()?;
        }
        Ok(items)
    }

    fn remember(&self, project: &Project) {
        self.project_paths
            .write()
            .insert(project.repository_id(), project.path_with_namespace.clone());
    }

    fn project_path(&self, repo: &RepositoryId) -> HostResult<String> {
        if let Some(path) = self.project_paths.read().get(repo) {
            return Ok(path.clone());
        }
        let (project, _): (Project, _) = self.get_json(self.project_url(repo, &[])?)?;
        self.remember(&project);
        Ok(project.path_with_namespace)
    }

    /// Ask the LFS batch endpoint what to do with one object.
    fn lfs_batch(&self, repo: &RepositoryId, operation: &str, pointer: &LfsPointer) -> HostResult<BatchObject> {
        let url = parse_url(&format!(
            "{}/{}.git/info/lfs/objects/batch",
            self.config.host_url,
            self.project_path(repo)?
        ))?;
        let request = BatchRequest {
            operation,
            transfers: ["basic"],
            objects: [ObjectSpec {
                oid: pointer.oid.as_str(),
                size: pointer.size,
            }],
            hash_algo: "sha256",
        };
        debug!(%repo, operation, %pointer, "lfs batch");
        let response = execute(
            self.client
                .post(url)
                .basic_auth("oauth2", Some(self.config.credential.expose()))
                .header(ACCEPT, LFS_MEDIA_TYPE)
                .header(CONTENT_TYPE, LFS_MEDIA_TYPE)
                .body(serde_json::to_vec(&request)?),
        )?;
        let batch: BatchResponse = response.json().map_err(request_error)?;
        let object = batch
            .objects
            .into_iter()
            .find(|o| o.oid == pointer.oid.as_str())
            .ok_or_else(|| HostError::InvalidResponse(format!("batch response lacks {}", pointer.oid)))?;
        if let Some(error) = &object.error {
            return Err(status_error(error.code, &error.message));
        }
        Ok(object)
    }

    fn transfer(&self, method: Method, action: &BatchAction) -> HostResult<RequestBuilder> {
        Ok(self
            .client
            .request(method, parse_url(&action.href)?)
            .headers(action_headers(&action.header)?))
    }

    /// Distinguish "path absent" from "ref absent" after a tree 404.
    fn ref_exists(&self, repo: &RepositoryId, reference: &str) -> HostResult<bool> {
        let url = self.project_url(repo, &["repository", "commits", reference])?;
        match execute(self.api(Method::GET, url)) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// LFS rules of the root `.gitattributes` at `reference`; empty if absent.
    fn lfs_attributes(&self, repo: &RepositoryId, reference: &str) -> HostResult<LfsAttributes> {
        let mut stream = match self.read_blob(repo, reference, GITATTRIBUTES) {
            Ok(stream) => stream,
            Err(e) if e.is_not_found() => return Ok(LfsAttributes::default()),
            Err(e) => return Err(e),
        };
        let mut bytes = Vec::new();
        stream.read_to_end(&mut bytes)?;
        Ok(LfsAttributes::parse(&String::from_utf8_lossy(&bytes)))
    }
}

impl RepositoryHost for GitLabHost {
    fn list_repositories(&self, page: Option<&PageToken>) -> HostResult<Page<RepositoryInfo>> {
        let url = match page {
            Some(token) => parse_url(token.as_str())?,
            None => {
                let mut url = self.api_url(&["projects"])?;
                url.query_pairs_mut()
                    .append_pair("membership", "true")
                    .append_pair("min_access_level", MIN_ACCESS_LEVEL)
                    .append_pair("pagination", "keyset")
                    .append_pair("order_by", "id")
                    .append_pair("sort", "asc")
                    .append_pair("per_page", PER_PAGE);
                url
            }
        };
        let (projects, next): (Vec<Project>, _) = self.get_json(url)?;
        let mut items = Vec::with_capacity(projects.len());
        for project in projects {
            self.remember(&project);
            items.push(project.into_info()?);
        }
        Ok(Page {
            items,
            next: next.map(PageToken::new),
        })
    }

    fn repository(&self, repo: &RepositoryId) -> HostResult<RepositoryInfo> {
        let (project, _): (Project, _) = self.get_json(self.project_url(repo, &[])?)?;
        self.remember(&project);
        project.into_info()
    }

    fn list_tree(&self, repo: &RepositoryId, reference: &str, path: &str) -> HostResult<Vec<TreeEntry>> {
        let mut url = self.project_url(repo, &["repository", "tree"])?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("ref", reference)
                .append_pair("recursive", "true")
                .append_pair("pagination", "keyset")
                .append_pair("per_page", PER_PAGE);
            if !path.is_empty() {
                query.append_pair("path", path);
            }
        }
        let items: Vec<TreeItem> = match self.get_all(url) {
            Ok(items) => items,
            Err(e) if e.is_not_found() && !path.is_empty() && self.ref_exists(repo, reference)? => {
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };
        // the listing does not tell pointers apart, the attributes do
        let attributes = if items.iter().any(|item| item.kind == "blob") {
            self.lfs_attributes(repo, reference)?
        } else {
            LfsAttributes::default()
        };
        Ok(items
            .into_iter()
            .filter_map(|item| match item.kind.as_str() {
                "tree" => Some(TreeEntry::tree(item.path)),
                "blob" => {
                    let is_lfs = attributes.is_lfs(&item.path);
                    Some(TreeEntry::blob(item.path, is_lfs))
                }
                _ => None,
            })
            .collect())
    }

    fn read_blob(&self, repo: &RepositoryId, reference: &str, path: &str) -> HostResult<ByteStream> {
        let mut url = self.project_url(repo, &["repository", "files", path, "raw"])?;
        url.query_pairs_mut().append_pair("ref", reference);
        let response = execute(self.api(Method::GET, url))?;
        Ok(Box::new(response))
    }

    fn blob_exists(&self, repo: &RepositoryId, reference: &str, path: &str) -> HostResult<bool> {
        let mut url = self.project_url(repo, &["repository", "files", path])?;
        url.query_pairs_mut().append_pair("ref", reference);
        match execute(self.api(Method::HEAD, url)) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn branch_exists(&self, repo: &RepositoryId, branch: &BranchName) -> HostResult<bool> {
        let url = self.project_url(repo, &["repository", "branches", branch.as_str()])?;
        match execute(self.api(Method::GET, url)) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn create_branch(&self, repo: &RepositoryId, from: &BranchName, branch: &BranchName) -> HostResult<()> {
        let mut url = self.project_url(repo, &["repository", "branches"])?;
        url.query_pairs_mut()
            .append_pair("branch", branch.as_str())
            .append_pair("ref", from.as_str());
        execute(self.api(Method::POST, url))?;
        Ok(())
    }

    fn upload_lfs_object(&self, repo: &RepositoryId, pointer: &LfsPointer, body: ByteStream) -> HostResult<UploadOutcome> {
        let object = self.lfs_batch(repo, "upload", pointer)?;
        let actions = object.actions.unwrap_or_default();
        let Some(upload) = actions.upload else {
            debug!(%repo, %pointer, "object already present");
            return Ok(UploadOutcome::AlreadyPresent);
        };

        execute(
            self.transfer(Method::PUT, &upload)?
                .header(CONTENT_TYPE, "application/octet-stream")
                .body(Body::sized(body, pointer.size)),
        )?;
        if let Some(verify) = actions.verify {
            let spec = ObjectSpec {
                oid: pointer.oid.as_str(),
                size: pointer.size,
            };
            execute(
                self.transfer(Method::POST, &verify)?
                    .header(ACCEPT, LFS_MEDIA_TYPE)
                    .header(CONTENT_TYPE, LFS_MEDIA_TYPE)
                    .body(serde_json::to_vec(&spec)?),
            )?;
        }
        Ok(UploadOutcome::Stored)
    }

    fn download_lfs_object(&self, repo: &RepositoryId, pointer: &LfsPointer) -> HostResult<ByteStream> {
        let object = self.lfs_batch(repo, "download", pointer)?;
        let download = object
            .actions
            .and_then(|a| a.download)
            .ok_or_else(|| HostError::NotFound(format!("lfs object {}", pointer.oid)))?;
        let response = execute(self.transfer(Method::GET, &download)?)?;
        Ok(Box::new(response))
    }

    fn commit(&self, repo: &RepositoryId, branch: &BranchName, message: &str, actions: &[CommitAction]) -> HostResult<String> {
        let request = CommitRequest {
            branch: branch.as_str(),
            commit_message: message,
            actions: actions.iter().map(CommitActionBody::from_action).collect(),
        };
        let url = self.project_url(repo, &["repository", "commits"])?;
        let response = execute(self.api(Method::POST, url).json(&request))?;
        let commit: CommitResponse = response.json().map_err(request_error)?;
        Ok(commit.id)
    }

    fn create_merge_request(&self, repo: &RepositoryId, spec: &MergeRequestSpec) -> HostResult<MergeRequest> {
        let body = MergeRequestBody {
            source_branch: spec.source.as_str(),
            target_branch: spec.target.as_str(),
            title: &spec.title,
            description: &spec.description,
            remove_source_branch: true,
        };
        let url = self.project_url(repo, &["merge_requests"])?;
        let response = execute(self.api(Method::POST, url).json(&body))?;
        let merge_request: MergeRequestResponse = response.json().map_err(request_error)?;
        merge_request.into_merge_request()
    }
}

fn execute(request: RequestBuilder) -> HostResult<Response> {
    let response = request.send().map_err(request_error)?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(status_error(status.as_u16(), &body))
}

fn parse_url(s: &str) -> HostResult<Url> {
    Url::parse(s).map_err(|e| HostError::InvalidResponse(format!("bad url {}: {}", s, e)))
}

/// Map an unsuccessful HTTP status onto the host error taxonomy.
fn status_error(status: u16, body: &str) -> HostError {
    let message = error_message(body);
    let lower = message.to_lowercase();
    match status {
        401 | 403 => HostError::PermissionDenied(message),
        404 => HostError::NotFound(message),
        400 | 409 if lower.contains("already exists") => HostError::AlreadyExists(message),
        400 if lower.contains("doesn't exist") || lower.contains("does not exist") => {
            HostError::NotFound(message)
        }
        408 | 504 => HostError::Timeout(message),
        _ => HostError::Status { status, message },
    }
}

/// GitLab wraps errors as `{"message": ...}` or `{"error": ...}`, where the
/// message may itself be a string, a list or an object.
fn error_message(body: &str) -> String {
    let value = serde_json::from_str::<serde_json::Value>(body).ok();
    let field = value
        .as_ref()
        .and_then(|v| v.get("message").or_else(|| v.get("error")));
    match field {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => body.trim().chars().take(200).collect(),
    }
}

fn request_error(err: reqwest::Error) -> HostError {
    if err.is_timeout() {
        HostError::Timeout(err.to_string())
    } else if err.is_body() {
        HostError::Interrupted(err.to_string())
    } else if err.is_decode() {
        HostError::InvalidResponse(err.to_string())
    } else if let Some(status) = err.status() {
        status_error(status.as_u16(), &err.to_string())
    } else {
        HostError::Transport(err.to_string())
    }
}

/// The `rel="next"` target of a `Link` header, if any.
fn next_link(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(LINK)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(parse_next_link)
}

fn parse_next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|part| {
        let mut pieces = part.split(';');
        let target = pieces.next()?.trim();
        let is_next = pieces.any(|p| {
            let p = p.trim();
            p == "rel=\"next\"" || p == "rel=next"
        });
        if !is_next {
            return None;
        }
        target
            .strip_prefix('<')
            .and_then(|t| t.strip_suffix('>'))
            .map(str::to_string)
    })
}

/// Headers the batch API asks us to send along with a transfer.
fn action_headers(header: &HashMap<String, String>) -> HostResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    for (name, value) in header {
        // reqwest sets framing itself from the sized body
        if name.eq_ignore_ascii_case("transfer-encoding") {
            continue;
        }
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| HostError::InvalidResponse(format!("header {}: {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| HostError::InvalidResponse(format!("header {}: {}", name, e)))?;
        headers.insert(name, value);
    }
    Ok(headers)
}
