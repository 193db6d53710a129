//! Azure AI Search REST client.
//!
//! Implements [`SearchCapability`] against `{endpoint}/indexes/{index}/docs`.
//! Vector queries use the service's integrated vectorizer (`kind: "text"`),
//! so no embedding call is made from here.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, warn};

use chatrelay_core::{SearchCapability, SearchConfig, SearchQuery, SearchResults, ToolError};

pub const SEARCH_API_VERSION: &str = "2024-07-01";

pub struct AzureSearchClient {
    client: reqwest::Client,
    api_version: String,
    timeout: Duration,
}

impl AzureSearchClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            api_version: SEARCH_API_VERSION.into(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn docs_url(&self, source: &SearchConfig) -> String {
        format!(
            "{}/indexes/{}/docs",
            source.endpoint.trim_end_matches('/'),
            source.index
        )
    }

    /// Build the request body for a query against `source`.
    fn search_body(source: &SearchConfig, query: &SearchQuery) -> Value {
        let query_type = if query.complex_query {
            "full"
        } else if source.semantic_config.is_some() && query.use_semantic_ranking {
            "semantic"
        } else {
            "simple"
        };

        let mut body = json!({
            "search": query.query,
            "count": true,
            "top": query.number_of_results,
            "queryType": query_type,
            "searchMode": if query.match_all { "all" } else { "any" },
        });

        if query_type == "semantic"
            && let Some(semantic) = &source.semantic_config
        {
            body["semanticConfiguration"] = json!(semantic);
        }
        if let Some(facets) = &query.facets {
            body["facets"] = json!(facets);
        }
        if query.do_vector_search && !source.vector_fields.is_empty() {
            body["vectorQueries"] = Value::Array(
                source
                    .vector_fields
                    .iter()
                    .map(|v| {
                        json!({
                            "kind": "text",
                            "text": query.query,
                            "fields": v.field,
                            "k": v.k_nearest,
                        })
                    })
                    .collect(),
            );
        }
        body
    }

    fn unavailable(source: &SearchConfig, reason: impl std::fmt::Display) -> ToolError {
        ToolError::unavailable(format!("search:{}", source.index), reason.to_string())
    }
}

#[async_trait]
impl SearchCapability for AzureSearchClient {
    async fn search(&self, source: &SearchConfig, query: SearchQuery) -> Result<SearchResults, ToolError> {
        let url = format!("{}/search?api-version={}", self.docs_url(source), self.api_version);
        debug!(index = %source.index, query = %query.query, "Searching index");

        let response = self
            .client
            .post(&url)
            .header("api-key", &source.query_key)
            .timeout(self.timeout)
            .json(&Self::search_body(source, &query))
            .send()
            .await
            .map_err(|e| Self::unavailable(source, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(index = %source.index, status = status.as_u16(), body = %body, "Search request failed");
            return Err(Self::unavailable(source, format!("status {status}")));
        }

        let mut page: Value = response.json().await.map_err(|e| Self::unavailable(source, e))?;
        let mut results = match page.get_mut("value").map(Value::take) {
            Some(Value::Array(docs)) => docs,
            _ => Vec::new(),
        };
        results.truncate(query.number_of_results as usize);

        Ok(SearchResults {
            count: page.get("@odata.count").and_then(Value::as_u64),
            results,
            facets: query
                .facets
                .as_ref()
                .and_then(|_| page.get("@search.facets").cloned()),
        })
    }

    async fn get_by_id(&self, source: &SearchConfig, id: &str) -> Result<Option<Value>, ToolError> {
        let url = format!(
            "{}('{}')?api-version={}",
            self.docs_url(source),
            id.replace('\'', "''"),
            self.api_version
        );

        let response = self
            .client
            .get(&url)
            .header("api-key", &source.query_key)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Self::unavailable(source, e))?;

        match response.status().as_u16() {
            404 => Ok(None),
            200 => response.json().await.map(Some).map_err(|e| Self::unavailable(source, e)),
            status => Err(Self::unavailable(source, format!("status {status}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatrelay_core::VectorFieldSpec;

    fn source(semantic: Option<&str>, vectors: bool) -> SearchConfig {
        SearchConfig {
            endpoint: "https://s.search.windows.net/".into(),
            index: "products".into(),
            query_key: "k".into(),
            embedding_model: None,
            semantic_config: semantic.map(str::to_string),
            vector_fields: if vectors {
                vec![VectorFieldSpec {
                    field: "embedding".into(),
                    dim: 1536,
                    k_nearest: 5,
                }]
            } else {
                vec![]
            },
        }
    }

    #[test]
    fn url_trims_trailing_slash() {
        let client = AzureSearchClient::new(reqwest::Client::new());
        assert_eq!(
            client.docs_url(&source(None, false)),
            "https://s.search.windows.net/indexes/products/docs"
        );
    }

    #[test]
    fn semantic_when_configured() {
        let body = AzureSearchClient::search_body(&source(Some("default"), false), &SearchQuery::simple("shampoo"));
        assert_eq!(body["queryType"], "semantic");
        assert_eq!(body["semanticConfiguration"], "default");
        assert_eq!(body["searchMode"], "any");
        assert_eq!(body["top"], 10);
        assert!(body.get("vectorQueries").is_none());
    }

    #[test]
    fn complex_query_uses_full_syntax() {
        let mut q = SearchQuery::simple("sku:\"A-1\"");
        q.complex_query = true;
        q.match_all = true;
        let body = AzureSearchClient::search_body(&source(Some("default"), true), &q);
        assert_eq!(body["queryType"], "full");
        assert_eq!(body["searchMode"], "all");
        assert!(body.get("semanticConfiguration").is_none());
    }

    #[test]
    fn vector_queries_per_field() {
        let body = AzureSearchClient::search_body(&source(None, true), &SearchQuery::simple("dry hair"));
        let vq = &body["vectorQueries"][0];
        assert_eq!(vq["kind"], "text");
        assert_eq!(vq["fields"], "embedding");
        assert_eq!(vq["k"], 5);

        let mut no_vec = SearchQuery::simple("dry hair");
        no_vec.do_vector_search = false;
        assert!(
            AzureSearchClient::search_body(&source(None, true), &no_vec)
                .get("vectorQueries")
                .is_none()
        );
    }
}
