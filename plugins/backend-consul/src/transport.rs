use std::fmt;
use std::time::Duration;

use crate::api::{ConsulError, KvRequest, KvResponse, Method};
use crate::TOKEN_HEADER;

/// Sends KV requests to a Consul agent.
///
/// Every HTTP status is a response; only failures to get an answer at all
/// are errors.
pub trait ConsulTransport: Send + Sync + fmt::Debug {
    fn send(&self, request: &KvRequest) -> Result<KvResponse, ConsulError>;
}

/// [`ConsulTransport`] over a blocking `ureq` agent
#[derive(Debug)]
pub struct UreqTransport {
    base_url: String,
    token: Option<String>,
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build();
        let agent: ureq::Agent = config.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            agent,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn prepare<B>(&self, mut builder: ureq::RequestBuilder<B>, request: &KvRequest) -> ureq::RequestBuilder<B> {
        for (name, value) in &request.query {
            builder = builder.query(name, value);
        }
        if let Some(token) = &self.token {
            builder = builder.header(TOKEN_HEADER, token.as_str());
        }
        builder
    }
}

impl ConsulTransport for UreqTransport {
    fn send(&self, request: &KvRequest) -> Result<KvResponse, ConsulError> {
        let url = format!("{}{}", self.base_url, request.path);
        let failed = |e: ureq::Error| ConsulError::Transport {
            method: request.method,
            url: url.clone(),
            message: e.to_string(),
        };

        let mut response = match request.method {
            Method::Get => self.prepare(self.agent.get(&url), request).call(),
            Method::Delete => self.prepare(self.agent.delete(&url), request).call(),
            Method::Put => {
                let body: &[u8] = request.body.as_deref().unwrap_or_default();
                self.prepare(self.agent.put(&url), request).send(body)
            }
        }
        .map_err(failed)?;

        let status = response.status().as_u16();
        let body = response.body_mut().read_to_vec().map_err(failed)?;
        log::trace!("{} {} -> {}", request.method, url, status);
        Ok(KvResponse { status, body })
    }
}
