use std::collections::BTreeMap;

use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::remote::{
    CollectionHandle, QueryMatch, StoredDocument, UpsertBatch, VectorBackend, VectorQuery,
};
use crate::ChromaCredentials;
use crate::errors::{KnowledgeError, KnowledgeResult};

/// Chroma v2 REST client.
#[derive(Debug, Clone)]
pub struct ChromaClient {
    client: reqwest::Client,
    base_url: String,
    tenant: String,
    database: String,
}

impl ChromaClient {
    pub fn new(base_url: &str, credentials: ChromaCredentials) -> KnowledgeResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-chroma-token",
            HeaderValue::from_str(&credentials.api_key).map_err(|_| {
                KnowledgeError::Configuration("CHROMA_API_KEY is not a valid header".to_string())
            })?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| KnowledgeError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            tenant: credentials.tenant,
            database: credentials.database,
        })
    }

    fn collections_url(&self) -> String {
        format!(
            "{}/api/v2/tenants/{}/databases/{}/collections",
            self.base_url, self.tenant, self.database
        )
    }

    fn collection_url(&self, segment: &str, action: Option<&str>) -> String {
        match action {
            Some(action) => format!("{}/{}/{}", self.collections_url(), segment, action),
            None => format!("{}/{}", self.collections_url(), segment),
        }
    }

    async fn check(response: reqwest::Response) -> KnowledgeResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(KnowledgeError::from_status(status.as_u16(), body))
    }
}

#[async_trait::async_trait]
impl VectorBackend for ChromaClient {
    async fn get_collection(&self, name: &str) -> KnowledgeResult<Option<CollectionHandle>> {
        let response = self
            .client
            .get(self.collection_url(name, None))
            .send()
            .await?;

        match Self::check(response).await {
            Ok(response) => {
                let payload: CollectionResponse = response.json().await?;
                Ok(Some(payload.into()))
            }
            Err(err) if is_missing_collection(&err) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn create_collection(
        &self,
        name: &str,
        metadata: BTreeMap<String, Value>,
    ) -> KnowledgeResult<CollectionHandle> {
        let body = CreateCollectionRequest {
            name,
            metadata,
            get_or_create: true,
        };
        let response = self
            .client
            .post(self.collections_url())
            .json(&body)
            .send()
            .await?;
        let payload: CollectionResponse = Self::check(response).await?.json().await?;
        Ok(payload.into())
    }

    async fn delete_collection(&self, name: &str) -> KnowledgeResult<()> {
        let response = self
            .client
            .delete(self.collection_url(name, None))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn upsert(
        &self,
        collection: &CollectionHandle,
        batch: UpsertBatch,
    ) -> KnowledgeResult<()> {
        let count = batch.ids.len();
        let body = UpsertRequest {
            ids: batch.ids,
            documents: batch.documents,
            metadatas: batch.metadatas,
            embeddings: batch.embeddings,
        };
        let response = self
            .client
            .post(self.collection_url(&collection.id, Some("upsert")))
            .json(&body)
            .send()
            .await?;
        Self::check(response).await?;
        debug!("Upserted {} documents into {}", count, collection.name);
        Ok(())
    }

    async fn query(
        &self,
        collection: &CollectionHandle,
        query: VectorQuery,
    ) -> KnowledgeResult<Vec<QueryMatch>> {
        let body = QueryRequest {
            query_texts: vec![query.text],
            n_results: query.n_results,
            include: &["documents", "metadatas", "distances"],
        };
        let response = self
            .client
            .post(self.collection_url(&collection.id, Some("query")))
            .json(&body)
            .send()
            .await?;
        let payload: QueryResponse = Self::check(response).await?.json().await?;
        Ok(payload.into_matches())
    }

    async fn list(
        &self,
        collection: &CollectionHandle,
        offset: usize,
        limit: usize,
    ) -> KnowledgeResult<Vec<StoredDocument>> {
        let body = GetRequest {
            offset,
            limit,
            include: &["documents", "metadatas"],
        };
        let response = self
            .client
            .post(self.collection_url(&collection.id, Some("get")))
            .json(&body)
            .send()
            .await?;
        let payload: GetResponse = Self::check(response).await?.json().await?;
        Ok(payload.into_documents())
    }

    async fn count(&self, collection: &CollectionHandle) -> KnowledgeResult<usize> {
        let response = self
            .client
            .get(self.collection_url(&collection.id, Some("count")))
            .send()
            .await?;
        let count: usize = Self::check(response).await?.json().await?;
        Ok(count)
    }
}

/// A missing collection comes back as 404, or from older servers as a
/// generic error naming it.
fn is_missing_collection(err: &KnowledgeError) -> bool {
    match err {
        KnowledgeError::NotFound(_) => true,
        KnowledgeError::Remote { body, .. } => body.contains("does not exist"),
        _ => false,
    }
}

#[derive(Debug, Serialize)]
struct CreateCollectionRequest<'a> {
    name: &'a str,
    metadata: BTreeMap<String, Value>,
    get_or_create: bool,
}

#[derive(Debug, Deserialize)]
struct CollectionResponse {
    id: String,
    name: String,
}

impl From<CollectionResponse> for CollectionHandle {
    fn from(value: CollectionResponse) -> Self {
        Self {
            id: value.id,
            name: value.name,
        }
    }
}

#[derive(Debug, Serialize)]
struct UpsertRequest {
    ids: Vec<String>,
    documents: Vec<String>,
    metadatas: Vec<BTreeMap<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    embeddings: Option<Vec<Vec<f32>>>,
}

#[derive(Debug, Serialize)]
struct QueryRequest {
    query_texts: Vec<String>,
    n_results: usize,
    include: &'static [&'static str],
}

#[derive(Debug, Serialize)]
struct GetRequest {
    offset: usize,
    limit: usize,
    include: &'static [&'static str],
}

/// Query results are nested one level per query text; we send exactly one.
#[derive(Debug, Default, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    ids: Vec<Vec<String>>,
    #[serde(default)]
    documents: Option<Vec<Vec<Option<String>>>>,
    #[serde(default)]
    metadatas: Option<Vec<Vec<Option<BTreeMap<String, Value>>>>>,
    #[serde(default)]
    distances: Option<Vec<Vec<Option<f32>>>>,
}

impl QueryResponse {
    fn into_matches(self) -> Vec<QueryMatch> {
        let ids = self.ids.into_iter().next().unwrap_or_default();
        let mut documents = first_row(self.documents).into_iter();
        let mut metadatas = first_row(self.metadatas).into_iter();
        let mut distances = first_row(self.distances).into_iter();

        ids.into_iter()
            .filter_map(|id| {
                let document = documents.next().flatten();
                let metadata = metadatas.next().flatten().unwrap_or_default();
                let distance = distances.next().flatten().unwrap_or(1.0);
                // A hit without its document cannot be returned to callers
                document.map(|document| QueryMatch {
                    id,
                    document,
                    metadata,
                    distance,
                })
            })
            .collect()
    }
}

fn first_row<T>(rows: Option<Vec<Vec<Option<T>>>>) -> Vec<Option<T>> {
    rows.and_then(|rows| rows.into_iter().next())
        .unwrap_or_default()
}

#[derive(Debug, Default, Deserialize)]
struct GetResponse {
    #[serde(default)]
    ids: Vec<String>,
    #[serde(default)]
    documents: Option<Vec<Option<String>>>,
    #[serde(default)]
    metadatas: Option<Vec<Option<BTreeMap<String, Value>>>>,
}

impl GetResponse {
    fn into_documents(self) -> Vec<StoredDocument> {
        let mut documents = self.documents.unwrap_or_default().into_iter();
        let mut metadatas = self.metadatas.unwrap_or_default().into_iter();
        self.ids
            .into_iter()
            .map(|id| StoredDocument {
                id,
                document: documents.next().flatten().unwrap_or_default(),
                metadata: metadatas.next().flatten().unwrap_or_default(),
            })
            .collect()
    }
}
