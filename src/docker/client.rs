//! Docker Engine API client
//!
//! Talks to the engine over its Unix domain socket (hyper + hyperlocal), or
//! over plain HTTP when `DOCKER_HOST` points at a remote daemon (reqwest).
//! Streaming endpoints hand their response body back as a byte stream.

use std::path::PathBuf;

use async_trait::async_trait;
use futures_util::stream::{Stream, StreamExt};
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper_util::client::legacy::Client;
use hyperlocal::UnixConnector;
use serde::Serialize;
use tracing::debug;

use super::config::{DockerConfig, DockerHost};
use super::engine::{ByteStream, ContainerEngine, PullStream};
use super::error::EngineError;
use super::models::*;

type HyperClient = Client<UnixConnector, Full<Bytes>>;

enum Transport {
    Unix {
        client: HyperClient,
        socket_path: PathBuf,
    },
    Tcp {
        client: reqwest::Client,
        base_url: String,
    },
}

/// Client for the Docker Engine HTTP API
pub struct DockerClient {
    transport: Transport,
    host: DockerHost,
}

impl DockerClient {
    /// Create a client for the given engine address
    pub fn new(host: DockerHost) -> Self {
        let transport = match &host {
            DockerHost::Unix(path) => Transport::Unix {
                client: Client::builder(hyper_util::rt::TokioExecutor::new())
                    .build(UnixConnector),
                socket_path: path.clone(),
            },
            DockerHost::Tcp(base_url) => Transport::Tcp {
                client: reqwest::Client::new(),
                base_url: base_url.clone(),
            },
        };

        Self { transport, host }
    }

    pub fn from_config(config: &DockerConfig) -> Self {
        Self::new(config.host.clone())
    }

    pub fn host(&self) -> &DockerHost {
        &self.host
    }

    /// Send a request and return the response body as a stream
    ///
    /// Non-2xx answers are turned into `EngineError::Api` using the
    /// engine's `{"message": ...}` body.
    async fn send_request<T: Serialize>(
        &self,
        method: &str,
        endpoint: &str,
        body: Option<&T>,
        headers: &[(&str, String)],
    ) -> Result<ByteStream, EngineError> {
        let json = match body {
            Some(body) => Some(serde_json::to_vec(body)?),
            None => None,
        };
        debug!(method, endpoint, host = %self.host, "docker request");

        let (status, stream): (u16, ByteStream) = match &self.transport {
            Transport::Unix {
                client,
                socket_path,
            } => {
                let uri: hyper::Uri = hyperlocal::Uri::new(socket_path, endpoint).into();
                let req_method = match method {
                    "POST" => hyper::Method::POST,
                    "DELETE" => hyper::Method::DELETE,
                    _ => hyper::Method::GET,
                };

                let mut builder = hyper::Request::builder().method(req_method).uri(uri);
                if json.is_some() {
                    builder = builder.header("Content-Type", "application/json");
                }
                for (name, value) in headers {
                    builder = builder.header(*name, value.as_str());
                }
                let req = builder
                    .body(Full::new(Bytes::from(json.unwrap_or_default())))
                    .map_err(|e| EngineError::Connection(e.to_string()))?;

                let res = client.request(req).await?;
                let status = res.status().as_u16();
                let stream: ByteStream = Box::pin(
                    res.into_body()
                        .into_data_stream()
                        .map(|chunk| chunk.map_err(EngineError::from)),
                );
                (status, stream)
            }
            Transport::Tcp { client, base_url } => {
                let url = format!("{}{}", base_url, endpoint);
                let mut request = match method {
                    "POST" => client.post(&url),
                    "DELETE" => client.delete(&url),
                    _ => client.get(&url),
                };
                if let Some(json) = json {
                    request = request
                        .header("Content-Type", "application/json")
                        .body(json);
                }
                for (name, value) in headers {
                    request = request.header(*name, value.as_str());
                }

                let res = request.send().await?;
                let status = res.status().as_u16();
                let stream: ByteStream = Box::pin(
                    res.bytes_stream()
                        .map(|chunk| chunk.map_err(EngineError::from)),
                );
                (status, stream)
            }
        };

        if (200..300).contains(&status) {
            return Ok(stream);
        }

        let body = collect(stream).await.unwrap_or_default();
        let message = serde_json::from_slice::<ApiErrorBody>(&body)
            .map(|err| err.message)
            .unwrap_or_else(|_| String::from_utf8_lossy(&body).trim().to_string());
        Err(EngineError::Api { status, message })
    }

    /// Send a request and decode the whole JSON response
    async fn request_json<T: Serialize, R: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        endpoint: &str,
        body: Option<&T>,
    ) -> Result<R, EngineError> {
        let stream = self.send_request(method, endpoint, body, &[]).await?;
        let bytes = collect(stream).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl ContainerEngine for DockerClient {
    async fn pull_image(
        &self,
        reference: &str,
        auth: Option<&RegistryAuth>,
    ) -> Result<PullStream, EngineError> {
        let endpoint = pull_endpoint(reference);

        let mut headers = Vec::new();
        if let Some(auth) = auth {
            headers.push(("X-Registry-Auth", auth.header_value()?));
        }

        let body = self
            .send_request::<()>("POST", &endpoint, None, &headers)
            .await?;
        Ok(Box::pin(json_lines(body)))
    }

    async fn create_exec(&self, container: &str, cmd: &[String]) -> Result<String, EngineError> {
        let endpoint = format!("/containers/{}/exec", urlencoding::encode(container));
        let created: ExecCreated = self
            .request_json(
                "POST",
                &endpoint,
                Some(&ExecCreateRequest::attached(cmd.to_vec())),
            )
            .await?;
        Ok(created.id)
    }

    async fn start_exec(&self, exec_id: &str) -> Result<ByteStream, EngineError> {
        let endpoint = format!("/exec/{}/start", urlencoding::encode(exec_id));
        self.send_request(
            "POST",
            &endpoint,
            Some(&ExecStartRequest {
                detach: false,
                tty: false,
            }),
            &[],
        )
        .await
    }

    async fn inspect_exec(&self, exec_id: &str) -> Result<ExecInspect, EngineError> {
        let endpoint = format!("/exec/{}/json", urlencoding::encode(exec_id));
        self.request_json::<(), _>("GET", &endpoint, None).await
    }

    async fn ping(&self) -> Result<(), EngineError> {
        let stream = self.send_request::<()>("GET", "/_ping", None, &[]).await?;
        collect(stream).await?;
        Ok(())
    }
}

/// Drain a body stream into memory
async fn collect(mut stream: ByteStream) -> Result<Vec<u8>, EngineError> {
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk?);
    }
    Ok(out)
}

/// Re-frame a newline-delimited JSON body into decoded pull frames
///
/// Objects may be split across reads, so bytes are buffered until a full
/// line is available.
pub fn json_lines(
    mut body: ByteStream,
) -> impl Stream<Item = Result<PullFrame, EngineError>> + Send {
    async_stream::try_stream! {
        let mut buffer: Vec<u8> = Vec::new();
        while let Some(chunk) = body.next().await {
            let chunk: Bytes = chunk?;
            buffer.extend_from_slice(&chunk);

            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                let line = trim_line(&line);
                if line.is_empty() {
                    continue;
                }
                let frame: PullFrame = serde_json::from_slice(line).map_err(EngineError::from)?;
                yield frame;
            }
        }

        let rest = trim_line(&buffer);
        if !rest.is_empty() {
            let frame: PullFrame = serde_json::from_slice(rest).map_err(EngineError::from)?;
            yield frame;
        }
    }
}

fn trim_line(line: &[u8]) -> &[u8] {
    let start = line
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(line.len());
    let end = line
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map(|i| i + 1)
        .unwrap_or(start);
    &line[start..end.max(start)]
}

/// Split an image reference into the `fromImage` name and a tag
///
/// A reference without tag or digest gets `latest`; the engine would
/// otherwise pull every tag of the repository.
pub fn split_reference(reference: &str) -> (String, Option<String>) {
    if reference.contains('@') {
        return (reference.to_string(), None);
    }

    let name_start = reference.rfind('/').map(|i| i + 1).unwrap_or(0);
    match reference[name_start..].rfind(':') {
        Some(i) => {
            let split = name_start + i;
            (
                reference[..split].to_string(),
                Some(reference[split + 1..].to_string()),
            )
        }
        None => (reference.to_string(), Some("latest".to_string())),
    }
}

/// `/images/create` endpoint for an image reference
fn pull_endpoint(reference: &str) -> String {
    let (name, tag) = split_reference(reference);
    let mut endpoint = format!("/images/create?fromImage={}", urlencoding::encode(&name));
    if let Some(tag) = tag {
        endpoint.push_str(&format!("&tag={}", urlencoding::encode(&tag)));
    }
    endpoint
}
