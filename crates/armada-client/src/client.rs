use reqwest::{Response, StatusCode, Url};
use serde_json::Value;

use crate::error::ClientError;
use crate::http::{DEFAULT_CLIENT, PING_CLIENT, STREAM_CLIENT};

/// HTTP client for a single container-host daemon.
///
/// Thin by design: each method maps to one daemon endpoint, payloads stay
/// opaque (`serde_json::Value`), and non-2xx answers are classified so the
/// caller can tell "this host doesn't have it" (404) from a real failure.
#[derive(Debug, Clone)]
pub struct NodeClient {
    address: String,
    base: String,
}

#[derive(Debug, Clone, Default)]
pub struct AttachOptions {
    pub stream: bool,
    pub stdin: bool,
    pub stdout: bool,
    pub stderr: bool,
    pub logs: bool,
}

#[derive(Debug, Clone, Default)]
pub struct LogsOptions {
    pub follow: bool,
    pub stdout: bool,
    pub stderr: bool,
    pub timestamps: bool,
    pub tail: Option<String>,
}

fn flag(b: bool) -> &'static str {
    if b {
        "1"
    } else {
        "0"
    }
}

async fn check(resp: Response) -> Result<Response, ClientError> {
    let status = resp.status();
    // 304 means "already in that state" for start/stop and friends
    if status.is_success() || status == StatusCode::NOT_MODIFIED {
        return Ok(resp);
    }
    let message = resp.text().await.unwrap_or_default();
    if status == StatusCode::NOT_FOUND {
        Err(ClientError::NotFound(message))
    } else {
        Err(ClientError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

impl NodeClient {
    pub fn new(address: &str) -> Result<Self, ClientError> {
        let url = Url::parse(address).map_err(|e| ClientError::InvalidAddress {
            address: address.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(ClientError::InvalidAddress {
                address: address.to_string(),
                reason: "expected an http(s) URL with a host".to_string(),
            });
        }
        Ok(NodeClient {
            address: address.to_string(),
            base: url.as_str().trim_end_matches('/').to_string(),
        })
    }

    /// The address this client was built from, verbatim.
    pub fn address(&self) -> &str {
        &self.address
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    // ── Liveness ──────────────────────────────────────────────────────────────

    pub async fn ping(&self) -> Result<(), ClientError> {
        let resp = PING_CLIENT.get(self.url("/_ping")).send().await?;
        check(resp).await?;
        Ok(())
    }

    // ── Containers ────────────────────────────────────────────────────────────

    /// `POST /containers/create`. Returns the daemon's body, `{"Id": ...}`.
    pub async fn create_container(
        &self,
        name: Option<&str>,
        config: &Value,
    ) -> Result<Value, ClientError> {
        let mut req = DEFAULT_CLIENT.post(self.url("/containers/create"));
        if let Some(name) = name {
            req = req.query(&[("name", name)]);
        }
        let resp = req.json(config).send().await?;
        Ok(check(resp).await?.json().await?)
    }

    pub async fn inspect_container(&self, id: &str) -> Result<Value, ClientError> {
        let resp = DEFAULT_CLIENT
            .get(self.url(&format!("/containers/{}/json", id)))
            .send()
            .await?;
        Ok(check(resp).await?.json().await?)
    }

    pub async fn list_containers(&self, all: bool) -> Result<Vec<Value>, ClientError> {
        let resp = DEFAULT_CLIENT
            .get(self.url("/containers/json"))
            .query(&[("all", flag(all))])
            .send()
            .await?;
        Ok(check(resp).await?.json().await?)
    }

    pub async fn start_container(&self, id: &str) -> Result<(), ClientError> {
        let resp = DEFAULT_CLIENT
            .post(self.url(&format!("/containers/{}/start", id)))
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    pub async fn stop_container(&self, id: &str, wait_secs: u32) -> Result<(), ClientError> {
        let resp = DEFAULT_CLIENT
            .post(self.url(&format!("/containers/{}/stop", id)))
            .query(&[("t", wait_secs.to_string())])
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    pub async fn restart_container(&self, id: &str, wait_secs: u32) -> Result<(), ClientError> {
        let resp = DEFAULT_CLIENT
            .post(self.url(&format!("/containers/{}/restart", id)))
            .query(&[("t", wait_secs.to_string())])
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    pub async fn kill_container(&self, id: &str, signal: Option<&str>) -> Result<(), ClientError> {
        let mut req = DEFAULT_CLIENT.post(self.url(&format!("/containers/{}/kill", id)));
        if let Some(signal) = signal {
            req = req.query(&[("signal", signal)]);
        }
        let resp = req.send().await?;
        check(resp).await?;
        Ok(())
    }

    pub async fn pause_container(&self, id: &str) -> Result<(), ClientError> {
        let resp = DEFAULT_CLIENT
            .post(self.url(&format!("/containers/{}/pause", id)))
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    pub async fn unpause_container(&self, id: &str) -> Result<(), ClientError> {
        let resp = DEFAULT_CLIENT
            .post(self.url(&format!("/containers/{}/unpause", id)))
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    pub async fn remove_container(
        &self,
        id: &str,
        force: bool,
        remove_volumes: bool,
    ) -> Result<(), ClientError> {
        let resp = DEFAULT_CLIENT
            .delete(self.url(&format!("/containers/{}", id)))
            .query(&[("force", flag(force)), ("v", flag(remove_volumes))])
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    /// Blocks until the container exits; returns its exit code.
    pub async fn wait_container(&self, id: &str) -> Result<i64, ClientError> {
        let resp = STREAM_CLIENT
            .post(self.url(&format!("/containers/{}/wait", id)))
            .send()
            .await?;
        let body: Value = check(resp).await?.json().await?;
        Ok(body.get("StatusCode").and_then(Value::as_i64).unwrap_or(0))
    }

    /// Returns the raw response so the caller can consume the stream.
    pub async fn attach_container(
        &self,
        id: &str,
        opts: &AttachOptions,
    ) -> Result<Response, ClientError> {
        let resp = STREAM_CLIENT
            .post(self.url(&format!("/containers/{}/attach", id)))
            .query(&[
                ("stream", flag(opts.stream)),
                ("stdin", flag(opts.stdin)),
                ("stdout", flag(opts.stdout)),
                ("stderr", flag(opts.stderr)),
                ("logs", flag(opts.logs)),
            ])
            .send()
            .await?;
        check(resp).await
    }

    pub async fn container_logs(
        &self,
        id: &str,
        opts: &LogsOptions,
    ) -> Result<Response, ClientError> {
        let mut query = vec![
            ("follow", flag(opts.follow).to_string()),
            ("stdout", flag(opts.stdout).to_string()),
            ("stderr", flag(opts.stderr).to_string()),
            ("timestamps", flag(opts.timestamps).to_string()),
        ];
        if let Some(tail) = &opts.tail {
            query.push(("tail", tail.clone()));
        }
        let resp = STREAM_CLIENT
            .get(self.url(&format!("/containers/{}/logs", id)))
            .query(&query)
            .send()
            .await?;
        check(resp).await
    }

    pub async fn export_container(&self, id: &str) -> Result<Response, ClientError> {
        let resp = STREAM_CLIENT
            .get(self.url(&format!("/containers/{}/export", id)))
            .send()
            .await?;
        check(resp).await
    }

    /// `POST /commit`. Returns the daemon's body, `{"Id": ...}`.
    pub async fn commit_container(
        &self,
        id: &str,
        repository: Option<&str>,
        tag: Option<&str>,
    ) -> Result<Value, ClientError> {
        let mut query = vec![("container", id)];
        if let Some(repo) = repository {
            query.push(("repo", repo));
        }
        if let Some(tag) = tag {
            query.push(("tag", tag));
        }
        let resp = DEFAULT_CLIENT
            .post(self.url("/commit"))
            .query(&query)
            .send()
            .await?;
        Ok(check(resp).await?.json().await?)
    }

    // ── Images ────────────────────────────────────────────────────────────────

    /// `POST /images/create?fromImage=...`. Returns the progress output.
    pub async fn pull_image(
        &self,
        repository: &str,
        tag: Option<&str>,
    ) -> Result<String, ClientError> {
        let mut query = vec![("fromImage", repository)];
        if let Some(tag) = tag {
            query.push(("tag", tag));
        }
        let resp = STREAM_CLIENT
            .post(self.url("/images/create"))
            .query(&query)
            .send()
            .await?;
        Ok(check(resp).await?.text().await?)
    }

    pub async fn push_image(&self, name: &str, tag: Option<&str>) -> Result<String, ClientError> {
        let mut req = STREAM_CLIENT.post(self.url(&format!("/images/{}/push", name)));
        if let Some(tag) = tag {
            req = req.query(&[("tag", tag)]);
        }
        let resp = req.send().await?;
        Ok(check(resp).await?.text().await?)
    }

    /// `POST /images/create?fromSrc=...`.
    pub async fn import_image(
        &self,
        source: &str,
        repository: &str,
    ) -> Result<String, ClientError> {
        let resp = STREAM_CLIENT
            .post(self.url("/images/create"))
            .query(&[("fromSrc", source), ("repo", repository)])
            .send()
            .await?;
        Ok(check(resp).await?.text().await?)
    }

    /// `POST /build?t=...`. `remote` points the daemon at a context URL;
    /// `context` uploads a local tarball. Exactly one is expected.
    pub async fn build_image(
        &self,
        tag: &str,
        remote: Option<&str>,
        context: Option<Vec<u8>>,
    ) -> Result<String, ClientError> {
        let mut query = vec![("t", tag)];
        if let Some(remote) = remote {
            query.push(("remote", remote));
        }
        let mut req = STREAM_CLIENT.post(self.url("/build")).query(&query);
        if let Some(context) = context {
            req = req
                .header(reqwest::header::CONTENT_TYPE, "application/tar")
                .body(context);
        }
        let resp = req.send().await?;
        Ok(check(resp).await?.text().await?)
    }

    pub async fn inspect_image(&self, name: &str) -> Result<Value, ClientError> {
        let resp = DEFAULT_CLIENT
            .get(self.url(&format!("/images/{}/json", name)))
            .send()
            .await?;
        Ok(check(resp).await?.json().await?)
    }

    pub async fn list_images(&self) -> Result<Vec<Value>, ClientError> {
        let resp = DEFAULT_CLIENT
            .get(self.url("/images/json"))
            .send()
            .await?;
        Ok(check(resp).await?.json().await?)
    }

    pub async fn remove_image(&self, name: &str) -> Result<(), ClientError> {
        let resp = DEFAULT_CLIENT
            .delete(self.url(&format!("/images/{}", name)))
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }
}

/// One-off DELETE against an arbitrary URL, used for registry tag cleanup.
/// Shares the default client and its timeouts.
pub async fn http_delete(url: &str) -> Result<(), ClientError> {
    let resp = DEFAULT_CLIENT.delete(url).send().await?;
    check(resp).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn rejects_addresses_without_scheme() {
        let err = NodeClient::new("10.0.0.1:2375").unwrap_err();
        assert!(matches!(err, ClientError::InvalidAddress { .. }));
    }

    #[test]
    fn accepts_http_urls() {
        let client = NodeClient::new("http://10.0.0.1:2375/").unwrap();
        assert_eq!(client.address(), "http://10.0.0.1:2375/");
    }

    #[tokio::test]
    async fn ping_succeeds_on_200() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_ping"))
            .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
            .mount(&server)
            .await;

        let client = NodeClient::new(&server.uri()).unwrap();
        client.ping().await.unwrap();
    }

    #[tokio::test]
    async fn ping_maps_500_to_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_ping"))
            .respond_with(ResponseTemplate::new(500).set_body_string("daemon on fire"))
            .mount(&server)
            .await;

        let client = NodeClient::new(&server.uri()).unwrap();
        let err = client.ping().await.unwrap_err();
        assert!(matches!(err, ClientError::Api { status: 500, .. }));
        assert!(!err.is_not_found());
    }

    #[tokio::test]
    async fn create_container_returns_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/containers/create"))
            .and(query_param("name", "web"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"Id": "e90302"})))
            .mount(&server)
            .await;

        let client = NodeClient::new(&server.uri()).unwrap();
        let body = client
            .create_container(Some("web"), &json!({"Image": "ubuntu"}))
            .await
            .unwrap();
        assert_eq!(body["Id"], "e90302");
    }

    #[tokio::test]
    async fn missing_image_is_classified_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/containers/create"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no such image"))
            .mount(&server)
            .await;

        let client = NodeClient::new(&server.uri()).unwrap();
        let err = client
            .create_container(None, &json!({"Image": "ghost"}))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn start_tolerates_304() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/containers/abc/start"))
            .respond_with(ResponseTemplate::new(304))
            .mount(&server)
            .await;

        let client = NodeClient::new(&server.uri()).unwrap();
        client.start_container("abc").await.unwrap();
    }

    #[tokio::test]
    async fn wait_container_reads_exit_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/containers/abc/wait"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"StatusCode": 137})))
            .mount(&server)
            .await;

        let client = NodeClient::new(&server.uri()).unwrap();
        assert_eq!(client.wait_container("abc").await.unwrap(), 137);
    }
}
