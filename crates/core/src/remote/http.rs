//! HTTP implementation of [`RemoteRecordSystem`] over FHIR REST.
//!
//! Every request carries the configured bearer token and is bounded twice: by the `reqwest`
//! client timeout and by an outer `tokio::time::timeout`. Searches follow `next` links (up to
//! [`MAX_SEARCH_PAGES`]) and merge the pages through a [`BundleMerger`].

use super::{ObservationQuery, RemoteRecordSystem};
use crate::config::RemoteConfig;
use crate::constants::MAX_SEARCH_PAGES;
use crate::models::SubjectId;
use crate::{CoachError, CoachResult};
use async_trait::async_trait;
use chrono::Utc;
use fhir::{Bundle, BundleMerger, CapabilityStatement, FhirError, Resource};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::RequestBuilder;

const FHIR_JSON: &str = "application/fhir+json";

pub struct HttpRemote {
    client: reqwest::Client,
    config: RemoteConfig,
}

impl HttpRemote {
    pub fn new(config: RemoteConfig) -> CoachResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent("coach-reconcile/0.1")
            .build()?;
        Ok(Self { client, config })
    }

    pub fn base_url(&self) -> &str {
        self.config.base_url()
    }

    fn url(&self, path: &str) -> String {
        if path.is_empty() {
            self.config.base_url().to_string()
        } else {
            format!("{}/{}", self.config.base_url(), path.trim_start_matches('/'))
        }
    }

    fn prepare(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header(ACCEPT, FHIR_JSON);
        match self.config.bearer_token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Send a request and return the response body of a successful status.
    async fn send(&self, request: RequestBuilder, url: &str) -> CoachResult<String> {
        let seconds = self.config.timeout().as_secs();
        let exchange = async {
            let response = self.prepare(request).send().await.map_err(|e| transport(e, seconds))?;
            let status = response.status();
            let body = response.text().await.map_err(|e| transport(e, seconds))?;
            if !status.is_success() {
                return Err(CoachError::RemoteStatus {
                    status: status.as_u16(),
                    url: url.to_string(),
                    body,
                });
            }
            Ok(body)
        };

        tokio::time::timeout(self.config.timeout(), exchange)
            .await
            .map_err(|_| CoachError::RemoteTimeout { seconds })?
    }

    /// Run a search and follow its paging links.
    async fn search(&self, resource_type: &str, params: &[(&str, String)]) -> CoachResult<Bundle> {
        let url = self.url(resource_type);
        let body = self
            .send(self.client.get(&url).query(params), &url)
            .await?;
        let mut page = Bundle::parse(&body)?;

        let mut merger = BundleMerger::new();
        merger.consume(&page);

        let mut pages = 1;
        while let Some(next) = page.next_link().map(str::to_string) {
            if pages >= MAX_SEARCH_PAGES {
                tracing::warn!(url = %url, pages, "search paging limit reached; remaining pages ignored");
                break;
            }
            let body = self.send(self.client.get(&next), &next).await?;
            page = Bundle::parse(&body)?;
            merger.consume(&page);
            pages += 1;
        }

        tracing::debug!(url = %url, pages, count = merger.len(), "search complete");
        Ok(merger.into_merged())
    }
}

fn transport(err: reqwest::Error, seconds: u64) -> CoachError {
    if err.is_timeout() {
        CoachError::RemoteTimeout { seconds }
    } else {
        CoachError::from(err)
    }
}

#[async_trait]
impl RemoteRecordSystem for HttpRemote {
    async fn query(&self, query: &ObservationQuery) -> CoachResult<Bundle> {
        let since = query.lookback.start_from(Utc::now()).format("%Y-%m-%d");
        let mut params = vec![
            ("subject", query.subject.patient_reference()),
            ("code", query.codes.to_search_param()),
            ("date", format!("ge{since}")),
            ("_include", "Observation:encounter".to_string()),
        ];
        if let Some(encounter) = &query.encounter {
            params.push(("encounter", encounter.clone()));
        }
        self.search("Observation", &params).await
    }

    async fn query_goals(&self, subject: &SubjectId) -> CoachResult<Bundle> {
        let params = [
            ("subject", subject.patient_reference()),
            ("lifecycle-status", "active".to_string()),
        ];
        self.search("Goal", &params).await
    }

    async fn create(&self, resource: &Resource) -> CoachResult<Resource> {
        let url = self.url(resource.resource_type());
        let body = serde_json::to_string(resource).map_err(FhirError::from)?;
        let request = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, FHIR_JSON)
            .header("Prefer", "return=representation")
            .body(body);

        let response = self.send(request, &url).await?;
        let created = serde_json::from_str(&response).map_err(FhirError::from)?;
        Ok(created)
    }

    async fn transaction(&self, bundle: &Bundle) -> CoachResult<Bundle> {
        let url = self.url("");
        let request = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, FHIR_JSON)
            .header("Prefer", "return=representation")
            .body(bundle.render()?);

        let response = self.send(request, &url).await?;
        Ok(Bundle::parse(&response)?)
    }

    async fn metadata(&self) -> CoachResult<CapabilityStatement> {
        let url = self.url("metadata");
        let body = self.send(self.client.get(&url), &url).await?;
        let statement = serde_json::from_str(&body).map_err(FhirError::from)?;
        Ok(statement)
    }
}
