use std::time::Duration;

use async_trait::async_trait;
use reqwest::{multipart, Client, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use tracing::{debug, info};

use crate::api::{JobApi, ResultFetch};
use crate::errors::ApiError;
use crate::models::template::TemplateList;
use crate::models::{CreateJobResponse, GenerationInput, GenerationResult, StatusPayload, Template};
use crate::session::AuthToken;

#[derive(Debug, Serialize)]
struct UpdateContentRequest<'a> {
    content: &'a str,
}

/// reqwest-backed `JobApi`. Every request carries the session's bearer token
/// when one is set.
#[derive(Clone)]
pub struct HttpJobApi {
    client: Client,
    base_url: String,
    token: AuthToken,
}

impl HttpJobApi {
    pub fn new(base_url: &str, timeout: Duration, token: AuthToken) -> Result<Self, ApiError> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Maps a non-success response. A 401 ends the session.
    async fn failure(&self, response: Response) -> ApiError {
        let err = ApiError::from_response(response).await;
        if matches!(err, ApiError::Unauthorized) {
            info!("Session rejected by backend, logging out");
            self.token.revoke().await;
        }
        err
    }

    async fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match self.token.get().await {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl JobApi for HttpJobApi {
    async fn create(&self, input: &GenerationInput) -> Result<String, ApiError> {
        let document =
            multipart::Part::bytes(input.document.to_vec()).file_name(input.file_name.clone());

        let mut form = multipart::Form::new()
            .part("job_description", document)
            .text("company_name", input.company_name.clone())
            .text("job_title", input.job_title.clone());
        for skill in &input.skills {
            form = form.text("skills", skill.clone());
        }
        if let Some(template_id) = &input.template_id {
            form = form.text("template_id", template_id.clone());
        }

        let request = self.client.post(self.url("/start-generation")).multipart(form);
        let response = self.authorized(request).await.send().await?;

        if !response.status().is_success() {
            return Err(self.failure(response).await);
        }

        let created: CreateJobResponse = response.json().await?;
        if created.job_id.trim().is_empty() {
            return Err(ApiError::InvalidPayload("empty job_id".to_string()));
        }
        debug!("Generation job created: {}", created.job_id);
        Ok(created.job_id)
    }

    async fn get_status(&self, job_id: &str) -> Result<StatusPayload, ApiError> {
        let request = self
            .client
            .get(self.url(&format!("/generation-status/{job_id}")));
        let response = self.authorized(request).await.send().await?;

        if !response.status().is_success() {
            return Err(self.failure(response).await);
        }

        let body = response.text().await?;
        let payload: StatusPayload = serde_json::from_str(&body)?;
        payload.validate()
    }

    async fn get_result(&self, job_id: &str) -> Result<ResultFetch, ApiError> {
        let request = self
            .client
            .get(self.url(&format!("/generation-result/{job_id}")));
        let response = self.authorized(request).await.send().await?;

        if response.status() == StatusCode::ACCEPTED {
            return Ok(ResultFetch::Pending);
        }
        if !response.status().is_success() {
            return Err(self.failure(response).await);
        }

        let body = response.text().await?;
        let result: GenerationResult = serde_json::from_str(&body)?;
        Ok(ResultFetch::Ready(result))
    }

    async fn update_content(&self, resume_id: &str, content: &str) -> Result<(), ApiError> {
        let request = self
            .client
            .put(self.url(&format!("/resume/{resume_id}")))
            .json(&UpdateContentRequest { content });
        let response = self.authorized(request).await.send().await?;

        if !response.status().is_success() {
            return Err(self.failure(response).await);
        }
        Ok(())
    }

    async fn list_templates(&self) -> Result<Vec<Template>, ApiError> {
        let request = self.client.get(self.url("/templates"));
        let response = self.authorized(request).await.send().await?;

        if !response.status().is_success() {
            return Err(self.failure(response).await);
        }

        let list: TemplateList = response.json().await?;
        Ok(list.templates)
    }
}
