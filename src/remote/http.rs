//! reqwest transport for the transcription endpoint

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use std::time::Duration;
use tracing::debug;

use crate::config::RemoteConfig;
use crate::error::{PipelineError, Result};
use crate::remote::{TranscriptionTransport, TransportError, TransportResponse, UploadRequest};

pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpTransport {
    pub fn new(config: &RemoteConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.request_timeout_sec))
            .timeout(Duration::from_secs(config.resource_timeout_sec))
            .build()
            .map_err(|e| PipelineError::remote_request(format!("kunne ikke oprette HTTP-klient: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl TranscriptionTransport for HttpTransport {
    async fn upload(
        &self,
        request: &UploadRequest,
    ) -> std::result::Result<TransportResponse, TransportError> {
        let bytes = tokio::fs::read(&request.file_path)
            .await
            .map_err(|e| TransportError::Network(format!("kunne ikke læse lydstykket: {e}")))?;

        let file_name = request
            .file_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "chunk.m4a".to_string());

        debug!(
            "Uploading {} ({} bytes, model={}, response_format={})",
            file_name,
            bytes.len(),
            request.model,
            request.response_format
        );

        // Field order is part of the contract; the file part goes last.
        let mut form = Form::new()
            .text("model", request.model.clone())
            .text("language", request.language.clone())
            .text("response_format", request.response_format.clone());
        if let Some(strategy) = &request.chunking_strategy {
            form = form.text("chunking_strategy", strategy.clone());
        }
        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("audio/mp4")
            .map_err(|e| TransportError::Network(format!("ugyldig multipart-del: {e}")))?;
        form = form.part("file", part);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await;

        match response {
            Ok(resp) => {
                let status = resp.status().as_u16();
                let body = resp.text().await.unwrap_or_else(|_| String::new());
                Ok(TransportResponse { status, body })
            }
            Err(e) if e.is_timeout() => Err(TransportError::Timeout),
            Err(e) => Err(TransportError::Network(e.to_string())),
        }
    }
}
