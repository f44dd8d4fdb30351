// ABOUTME: E2B provider for cloud micro-VM sandboxes
// ABOUTME: Uses the E2B REST control plane plus the in-sandbox envd file and process APIs

use super::{
    CommandResult, OutputChunk, ProviderError, Result, SandboxHandle, SandboxProvider, StreamType,
};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures::StreamExt;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

pub const DEFAULT_API_URL: &str = "https://api.e2b.dev";
pub const DEFAULT_DOMAIN: &str = "e2b.app";

/// Port envd listens on inside every sandbox
const ENVD_PORT: u16 = 49983;
const ENVD_USER: &str = "user";

const ENVELOPE_FLAG_COMPRESSED: u8 = 0b01;
const ENVELOPE_FLAG_END_STREAM: u8 = 0b10;

/// E2B provider for secure sandboxes
/// Documentation: https://e2b.dev/docs
pub struct E2BProvider {
    client: Client,
    api_key: String,
    api_endpoint: String,
    domain: String,
    envd_endpoint: Option<String>,
}

impl E2BProvider {
    pub fn new(api_key: String, api_endpoint: Option<String>, domain: Option<String>) -> Result<Self> {
        Self::with_timeouts(
            api_key,
            api_endpoint,
            domain,
            Duration::from_secs(600),
            Duration::from_secs(10),
        )
    }

    pub fn with_timeouts(
        api_key: String,
        api_endpoint: Option<String>,
        domain: Option<String>,
        request_timeout: Duration,
        connect_timeout: Duration,
    ) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(ProviderError::ConfigError(
                "E2B API key is required".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| ProviderError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            api_endpoint: api_endpoint
                .unwrap_or_else(|| DEFAULT_API_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            domain: domain.unwrap_or_else(|| DEFAULT_DOMAIN.to_string()),
            envd_endpoint: None,
        })
    }

    /// Route envd traffic to a fixed endpoint instead of the per-sandbox hostname
    pub fn with_envd_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.envd_endpoint = Some(endpoint.into().trim_end_matches('/').to_string());
        self
    }

    fn api(&self, request: RequestBuilder) -> RequestBuilder {
        request.header("X-API-KEY", &self.api_key)
    }

    fn envd_endpoint_for(&self, sandbox_id: &str, domain: &str) -> String {
        match &self.envd_endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!("https://{}-{}.{}", ENVD_PORT, sandbox_id, domain),
        }
    }
}

#[derive(Debug, Serialize)]
struct CreateSandboxRequest<'a> {
    #[serde(rename = "templateID")]
    template_id: &'a str,
    /// Seconds
    timeout: u64,
}

#[derive(Debug, Deserialize)]
struct SandboxResponse {
    #[serde(rename = "sandboxID")]
    sandbox_id: String,
    #[serde(rename = "envdAccessToken", default)]
    envd_access_token: Option<String>,
    #[serde(default)]
    domain: Option<String>,
    #[serde(default)]
    state: Option<String>,
}

async fn api_error(response: reqwest::Response) -> ProviderError {
    let status = response.status().as_u16();
    let message = response
        .text()
        .await
        .unwrap_or_else(|e| format!("<unreadable body: {}>", e));
    ProviderError::Api { status, message }
}

#[async_trait]
impl SandboxProvider for E2BProvider {
    fn name(&self) -> &str {
        "e2b"
    }

    async fn create(&self, template: &str, timeout: Duration) -> Result<String> {
        let request = CreateSandboxRequest {
            template_id: template,
            timeout: timeout.as_secs(),
        };

        let response = self
            .api(self.client.post(format!("{}/sandboxes", self.api_endpoint)))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let sandbox: SandboxResponse = response.json().await?;
        info!(
            "Created E2B sandbox {} from template {} (timeout {}s)",
            sandbox.sandbox_id,
            template,
            timeout.as_secs()
        );
        Ok(sandbox.sandbox_id)
    }

    async fn connect(&self, sandbox_id: &str) -> Result<Box<dyn SandboxHandle>> {
        let response = self
            .api(
                self.client
                    .get(format!("{}/sandboxes/{}", self.api_endpoint, sandbox_id)),
            )
            .send()
            .await
            .map_err(|e| ProviderError::NotReachable(format!("{}: {}", sandbox_id, e)))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(ProviderError::NotReachable(format!(
                "{}: sandbox not found",
                sandbox_id
            )));
        }
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let sandbox: SandboxResponse = response.json().await?;
        if let Some(state) = sandbox.state.as_deref() {
            if state != "running" {
                return Err(ProviderError::NotReachable(format!(
                    "{}: sandbox is {}",
                    sandbox_id, state
                )));
            }
        }

        let domain = sandbox.domain.unwrap_or_else(|| self.domain.clone());
        debug!("Connected to E2B sandbox {}", sandbox_id);

        Ok(Box::new(E2BSandbox {
            client: self.client.clone(),
            sandbox_id: sandbox.sandbox_id,
            envd_endpoint: self.envd_endpoint_for(sandbox_id, &domain),
            access_token: sandbox.envd_access_token,
            domain,
        }))
    }
}

/// Live connection to one E2B sandbox through its envd daemon
pub struct E2BSandbox {
    client: Client,
    sandbox_id: String,
    envd_endpoint: String,
    access_token: Option<String>,
    domain: String,
}

impl E2BSandbox {
    fn envd(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header(
            AUTHORIZATION,
            format!("Basic {}", STANDARD.encode(format!("{}:", ENVD_USER))),
        );
        match &self.access_token {
            Some(token) => request.header("X-Access-Token", token),
            None => request,
        }
    }

    fn files_url(&self) -> String {
        format!("{}/files", self.envd_endpoint)
    }
}

#[derive(Debug, Serialize)]
struct StartProcessRequest<'a> {
    process: ProcessConfig<'a>,
}

#[derive(Debug, Serialize)]
struct ProcessConfig<'a> {
    cmd: &'a str,
    args: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct StartProcessResponse {
    event: ProcessEvent,
}

#[derive(Debug, Default, Deserialize)]
struct ProcessEvent {
    #[serde(default)]
    data: Option<DataEvent>,
    #[serde(default)]
    end: Option<EndEvent>,
}

#[derive(Debug, Deserialize)]
struct DataEvent {
    #[serde(default)]
    stdout: Option<String>,
    #[serde(default)]
    stderr: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EndEvent {
    #[serde(default)]
    exit_code: i32,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct EndStreamMessage {
    #[serde(default)]
    error: Option<EndStreamError>,
}

#[derive(Debug, Deserialize)]
struct EndStreamError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[async_trait]
impl SandboxHandle for E2BSandbox {
    fn sandbox_id(&self) -> &str {
        &self.sandbox_id
    }

    async fn run(
        &self,
        command: &str,
        output: mpsc::UnboundedSender<OutputChunk>,
    ) -> Result<CommandResult> {
        let body = serde_json::to_vec(&StartProcessRequest {
            process: ProcessConfig {
                cmd: "/bin/bash",
                args: vec!["-l", "-c", command],
            },
        })?;

        let response = self
            .envd(
                self.client
                    .post(format!("{}/process.Process/Start", self.envd_endpoint)),
            )
            .header(CONTENT_TYPE, "application/connect+json")
            .header("Connect-Protocol-Version", "1")
            .body(encode_envelope(0, &body))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let mut result = CommandResult::default();
        let mut exited = false;
        let mut decoder = EnvelopeDecoder::default();
        let mut stream = response.bytes_stream();

        while let Some(bytes) = stream.next().await {
            decoder.push(&bytes?);

            while let Some(frame) = decoder.next_frame()? {
                if frame.flags & ENVELOPE_FLAG_END_STREAM != 0 {
                    let end: EndStreamMessage = if frame.payload.is_empty() {
                        EndStreamMessage::default()
                    } else {
                        serde_json::from_slice(&frame.payload)?
                    };
                    if let Some(error) = end.error {
                        return Err(ProviderError::Protocol(format!(
                            "{}: {}",
                            error.code.unwrap_or_else(|| "unknown".to_string()),
                            error.message.unwrap_or_default()
                        )));
                    }
                    continue;
                }

                let message: StartProcessResponse = serde_json::from_slice(&frame.payload)?;
                if let Some(data) = message.event.data {
                    if let Some(chunk) = data.stdout {
                        let text = decode_output(&chunk)?;
                        result.stdout.push_str(&text);
                        let _ = output.send(OutputChunk {
                            stream: StreamType::Stdout,
                            data: text,
                        });
                    }
                    if let Some(chunk) = data.stderr {
                        let text = decode_output(&chunk)?;
                        result.stderr.push_str(&text);
                        let _ = output.send(OutputChunk {
                            stream: StreamType::Stderr,
                            data: text,
                        });
                    }
                }
                if let Some(end) = message.event.end {
                    if let Some(error) = end.error.filter(|e| !e.is_empty()) {
                        debug!("Process in {} ended with error: {}", self.sandbox_id, error);
                    }
                    result.exit_code = end.exit_code;
                    exited = true;
                }
            }
        }

        if !exited {
            return Err(ProviderError::Protocol(
                "process stream closed before the command exited".to_string(),
            ));
        }

        Ok(result)
    }

    async fn write(&self, path: &str, content: &str) -> Result<()> {
        let part = reqwest::multipart::Part::bytes(content.as_bytes().to_vec())
            .file_name(path.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .envd(self.client.post(self.files_url()))
            .query(&[("path", path), ("username", ENVD_USER)])
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        Ok(())
    }

    async fn read(&self, path: &str) -> Result<String> {
        let response = self
            .envd(self.client.get(self.files_url()))
            .query(&[("path", path), ("username", ENVD_USER)])
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(ProviderError::FileNotFound(path.to_string()));
        }
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        Ok(response.text().await?)
    }

    fn host_for(&self, port: u16) -> String {
        format!("{}-{}.{}", port, self.sandbox_id, self.domain)
    }
}

fn decode_output(chunk: &str) -> Result<String> {
    let bytes = STANDARD
        .decode(chunk)
        .map_err(|e| ProviderError::Protocol(format!("invalid output encoding: {}", e)))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Connect protocol envelope: one flag byte, a big-endian u32 length, then the payload
pub(crate) fn encode_envelope(flags: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(5 + payload.len());
    frame.push(flags);
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

#[derive(Debug)]
pub(crate) struct Envelope {
    pub flags: u8,
    pub payload: Vec<u8>,
}

/// Reassembles envelopes from arbitrarily split response chunks
#[derive(Debug, Default)]
pub(crate) struct EnvelopeDecoder {
    buffer: Vec<u8>,
}

impl EnvelopeDecoder {
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    pub fn next_frame(&mut self) -> Result<Option<Envelope>> {
        if self.buffer.len() < 5 {
            return Ok(None);
        }

        let flags = self.buffer[0];
        if flags & ENVELOPE_FLAG_COMPRESSED != 0 {
            return Err(ProviderError::Protocol(
                "compressed envelopes are not supported".to_string(),
            ));
        }

        let len = u32::from_be_bytes([
            self.buffer[1],
            self.buffer[2],
            self.buffer[3],
            self.buffer[4],
        ]) as usize;
        if self.buffer.len() < 5 + len {
            return Ok(None);
        }

        let payload = self.buffer[5..5 + len].to_vec();
        self.buffer.drain(..5 + len);
        Ok(Some(Envelope { flags, payload }))
    }
}
