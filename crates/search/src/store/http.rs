//! Remote fragment index over HTTP
//!
//! Speaks the document-search REST dialect:
//! `POST {endpoint}/indexes/{index}/docs/search?api-version=...` for queries and
//! `GET {endpoint}/indexes/{index}/docs/{id}?api-version=...` for lookups.
//! Filter strings are forwarded as-is; the service evaluates them.

use super::{FragmentStore, SearchRequest};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lexforge_common::config::SearchConfig;
use lexforge_common::embeddings::Embedder;
use lexforge_common::errors::{AppError, Result};
use lexforge_common::metrics;
use lexforge_common::Fragment;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

pub struct HttpIndexClient {
    http: Client,
    endpoint: String,
    index: String,
    api_key: Option<String>,
    api_version: String,
    semantic_configuration: String,
    vector_fields: Vec<String>,
    embedder: Arc<dyn Embedder>,
}

/// One hit as returned by the service
#[derive(Debug, Deserialize)]
struct IndexDocument {
    #[serde(rename = "@search.score", default)]
    score: Option<f64>,
    #[serde(rename = "@search.rerankerScore", default)]
    reranker_score: Option<f64>,
    id: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    sourcefile: Option<String>,
    #[serde(default)]
    sourcepage: Option<String>,
    #[serde(default)]
    subsection: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    groups: Option<Vec<String>>,
    #[serde(rename = "storageUrl", default)]
    storage_url: Option<String>,
    #[serde(default)]
    updated: Option<DateTime<Utc>>,
}

impl From<IndexDocument> for Fragment {
    fn from(doc: IndexDocument) -> Self {
        Fragment {
            id: doc.id,
            content: doc.content.unwrap_or_default(),
            source_file: doc.sourcefile,
            source_page: doc.sourcepage,
            subsection: doc.subsection,
            category: doc.category,
            groups: doc.groups.unwrap_or_default(),
            score: doc.score.unwrap_or_default(),
            reranker_score: doc.reranker_score,
            storage_url: doc.storage_url,
            updated: doc.updated,
            matched_queries: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    value: Vec<IndexDocument>,
}

impl HttpIndexClient {
    pub fn new(config: &SearchConfig, embedder: Arc<dyn Embedder>) -> Result<Self> {
        if config.endpoint.trim().is_empty() {
            return Err(AppError::Configuration {
                message: "search.endpoint is required for the http backend".to_string(),
            });
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            index: config.index.clone(),
            api_key: config.api_key.clone(),
            api_version: config.api_version.clone(),
            semantic_configuration: config.semantic_configuration.clone(),
            vector_fields: config.vector_fields.clone(),
            embedder,
        })
    }

    fn docs_url(&self) -> String {
        format!("{}/indexes/{}/docs", self.endpoint, self.index)
    }

    /// Document URL with `id` percent-encoded as a single path segment
    fn document_url(&self, id: &str) -> Result<Url> {
        let invalid = |detail: String| AppError::Configuration {
            message: format!("invalid search.endpoint: {}", detail),
        };
        let mut url = Url::parse(&self.docs_url()).map_err(|e| invalid(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| invalid("endpoint cannot carry a path".to_string()))?
            .push(id);
        Ok(url)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("api-key", key),
            None => builder,
        }
    }

    /// Request body for one query. `vector` is present for vector and hybrid modes.
    fn build_body(&self, request: &SearchRequest, vector: Option<Vec<f32>>) -> Value {
        let mut body = json!({
            "top": request.top,
            "select": "id,content,sourcefile,sourcepage,subsection,category,groups,storageUrl,updated",
        });

        if request.mode.uses_text() {
            body["search"] = json!(request.query);
        }
        if let Some(filter) = &request.filter {
            body["filter"] = json!(filter.as_str());
        }
        if request.semantic_ranking {
            body["queryType"] = json!("semantic");
            body["semanticConfiguration"] = json!(self.semantic_configuration);
            if !request.mode.uses_text() {
                body["semanticQuery"] = json!(request.query);
            }
        }
        if let Some(vector) = vector {
            body["vectorQueries"] = json!([{
                "kind": "vector",
                "vector": vector,
                "fields": self.vector_fields.join(","),
                "k": request.top,
            }]);
        }

        body
    }

    async fn query_vector(&self, request: &SearchRequest) -> Result<Option<Vec<f32>>> {
        if !request.mode.uses_vectors() {
            return Ok(None);
        }
        let vector = self.embedder.embed(&request.query).await.map_err(|e| {
            AppError::RetrievalUnavailable {
                message: format!("query embedding failed: {}", e),
            }
        })?;
        Ok(Some(vector))
    }

    async fn run_search(&self, request: &SearchRequest) -> Result<Vec<Fragment>> {
        let vector = self.query_vector(request).await?;
        let body = self.build_body(request, vector);

        let response = self
            .authorize(self.http.post(format!("{}/search", self.docs_url())))
            .query(&[("api-version", self.api_version.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::RetrievalUnavailable {
                message: format!("search request failed: {}", e),
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(status_error(status, detail));
        }

        let parsed: SearchResponse = response.json().await.map_err(|e| {
            AppError::RetrievalUnavailable {
                message: format!("malformed search response: {}", e),
            }
        })?;

        let mut fragments: Vec<Fragment> = parsed.value.into_iter().map(Fragment::from).collect();
        fragments.truncate(request.top);
        Ok(fragments)
    }
}

fn status_error(status: StatusCode, detail: String) -> AppError {
    if status == StatusCode::BAD_REQUEST {
        AppError::InvalidQuery {
            message: format!("index rejected the query: {}", detail),
        }
    } else {
        AppError::RetrievalUnavailable {
            message: format!("index returned {}: {}", status, detail),
        }
    }
}

#[async_trait]
impl FragmentStore for HttpIndexClient {
    #[instrument(skip(self, request), fields(mode = %request.mode, top = request.top))]
    async fn search(&self, request: &SearchRequest) -> Result<Vec<Fragment>> {
        request.validate()?;

        let start = Instant::now();
        let result = self.run_search(request).await;
        metrics::record_search(
            start.elapsed().as_secs_f64(),
            request.mode.as_str(),
            result.is_ok(),
        );

        match &result {
            Ok(fragments) => debug!(hits = fragments.len(), "search: complete"),
            Err(e) => warn!(error = %e, "search: failed"),
        }
        result
    }

    #[instrument(skip(self))]
    async fn lookup(&self, id: &str) -> Result<Option<Fragment>> {
        let response = self
            .authorize(self.http.get(self.document_url(id)?))
            .query(&[("api-version", self.api_version.as_str())])
            .send()
            .await
            .map_err(|e| AppError::RetrievalUnavailable {
                message: format!("lookup request failed: {}", e),
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(status_error(status, detail));
        }

        let doc: IndexDocument = response.json().await.map_err(|e| {
            AppError::RetrievalUnavailable {
                message: format!("malformed lookup response: {}", e),
            }
        })?;
        Ok(Some(doc.into()))
    }

    fn name(&self) -> &str {
        "http"
    }
}
