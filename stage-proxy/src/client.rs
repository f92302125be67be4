use crate::config::StagingConfig;
use crate::errors::{StagingError, body_snippet};
use bytes::Bytes;
use reqwest::StatusCode;
use url::Url;

const SESSION_ID_OPEN: &str = "<stagedRepositoryId>";
const SESSION_ID_CLOSE: &str = "</stagedRepositoryId>";

const PROMOTE_REQUEST: &str = "<promoteRequest>\n  <data>\n    <description>staging proxy upload</description>\n  </data>\n</promoteRequest>\n";

const USER_AGENT: &str = concat!("stage-proxy/", env!("CARGO_PKG_VERSION"));

/// Client for the remote staging service.
///
/// Builds authenticated "start session" and "upload resource" requests and
/// parses their responses. Carries no retry policy of its own; retrying is
/// the coalescer's concern.
#[derive(Clone)]
pub struct StagingClient {
    http: reqwest::Client,
    base_url: Url,
    profile_id: String,
    username: String,
    password: String,
}

impl StagingClient {
    pub fn new(config: &StagingConfig) -> Self {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(config.max_connections)
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();

        Self {
            http,
            base_url: config.url.clone(),
            profile_id: config.profile_id.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
        }
    }

    pub fn profile_id(&self) -> &str {
        &self.profile_id
    }

    /// Ask the staging service to open a session for the configured profile.
    ///
    /// Expects `201 Created` with the session id embedded between fixed XML
    /// delimiters in the body.
    pub async fn create_session(&self) -> Result<String, StagingError> {
        let uri = format!(
            "/service/local/staging/profiles/{}/start",
            self.profile_id
        );

        let response = self
            .base_request(reqwest::Method::POST, &uri)?
            .header(reqwest::header::CONTENT_TYPE, "application/xml")
            .body(PROMOTE_REQUEST)
            .send()
            .await
            .map_err(|e| transport(&uri, e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| transport(&uri, e))?;

        if status != StatusCode::CREATED {
            return Err(StagingError::UnexpectedResponse {
                method: "POST",
                uri,
                status: status.as_u16(),
                body: body_snippet(&body),
            });
        }

        match extract_session_id(&body) {
            Some(id) => Ok(id.to_string()),
            None => Err(StagingError::MalformedSessionResponse {
                uri,
                body: body_snippet(&body),
            }),
        }
    }

    /// Deposit `content` at `path` inside the given session. Expects
    /// `201 Created`; anything else is an error for the caller to retry.
    pub async fn upload_resource(
        &self,
        session_id: &str,
        path: &str,
        content: Bytes,
    ) -> Result<(), StagingError> {
        let uri = upload_uri(session_id, path);

        let response = self
            .base_request(reqwest::Method::PUT, &uri)?
            .body(content)
            .send()
            .await
            .map_err(|e| transport(&uri, e))?;

        let status = response.status();
        if status != StatusCode::CREATED {
            let body = response.text().await.unwrap_or_default();
            return Err(StagingError::UnexpectedResponse {
                method: "PUT",
                uri,
                status: status.as_u16(),
                body: body_snippet(&body),
            });
        }

        Ok(())
    }

    fn base_request(
        &self,
        method: reqwest::Method,
        uri: &str,
    ) -> Result<reqwest::RequestBuilder, StagingError> {
        let url = self.base_url.join(uri).map_err(|e| StagingError::Transport {
            uri: uri.to_string(),
            message: e.to_string(),
        })?;

        Ok(self
            .http
            .request(method, url)
            .basic_auth(&self.username, Some(&self.password))
            .header(reqwest::header::CACHE_CONTROL, "no-cache")
            .header(reqwest::header::PRAGMA, "no-cache")
            .header(reqwest::header::EXPIRES, "0"))
    }
}

/// Remote URI a resource at `path` is deployed to within `session_id`.
pub fn upload_uri(session_id: &str, path: &str) -> String {
    format!("/service/local/staging/deployByRepositoryId/{session_id}{path}")
}

fn extract_session_id(body: &str) -> Option<&str> {
    let from = body.find(SESSION_ID_OPEN)? + SESSION_ID_OPEN.len();
    let to = body.find(SESSION_ID_CLOSE)?;
    body.get(from..to)
}

fn transport(uri: &str, error: reqwest::Error) -> StagingError {
    StagingError::Transport {
        uri: uri.to_string(),
        message: error.to_string(),
    }
}
