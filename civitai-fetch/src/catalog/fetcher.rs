//! Paging through the model listing endpoint.

use std::collections::HashSet;
use std::sync::Arc;

use reqwest::Url;
use tracing::{debug, info, warn};

use super::types::{CatalogPage, ModelRecord, ModelType};
use super::CatalogError;
use crate::download::HttpTransport;

/// Default API root.
pub const DEFAULT_BASE_URL: &str = "https://civitai.com/api/v1";

/// Default number of models per page.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Parameters of a catalog listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogQuery {
    /// Model types to include.
    pub types: Vec<ModelType>,
    /// Time window, e.g. `AllTime`.
    pub period: String,
    /// Sort order, e.g. `Newest`.
    pub sort: String,
    pub page_size: u32,
    /// Only list models the authenticated user has favorited.
    pub favorites_only: bool,
}

impl Default for CatalogQuery {
    fn default() -> Self {
        Self {
            types: ModelType::ALL.to_vec(),
            period: "AllTime".to_string(),
            sort: "Newest".to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            favorites_only: true,
        }
    }
}

impl CatalogQuery {
    pub fn with_types(mut self, types: Vec<ModelType>) -> Self {
        self.types = types;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_favorites_only(mut self, favorites_only: bool) -> Self {
        self.favorites_only = favorites_only;
        self
    }

    /// Query pairs for one page.
    fn pairs(&self, page: u32) -> Vec<(&'static str, String)> {
        let mut pairs: Vec<(&'static str, String)> = self
            .types
            .iter()
            .map(|t| ("types", t.as_str().to_string()))
            .collect();
        pairs.push(("period", self.period.clone()));
        pairs.push(("limit", self.page_size.to_string()));
        pairs.push(("page", page.to_string()));
        pairs.push(("sort", self.sort.clone()));
        if self.favorites_only {
            pairs.push(("favorites", "true".to_string()));
        }
        pairs
    }
}

/// Sequential pager over the listing endpoint.
pub struct CatalogFetcher {
    transport: Arc<dyn HttpTransport>,
    base_url: String,
}

impl CatalogFetcher {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self::with_base_url(transport, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(transport: Arc<dyn HttpTransport>, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// URL of one listing page.
    pub fn page_url(&self, query: &CatalogQuery, page: u32) -> Result<String, CatalogError> {
        let endpoint = format!("{}/models", self.base_url);
        Url::parse_with_params(&endpoint, query.pairs(page))
            .map(String::from)
            .map_err(|e| CatalogError::InvalidUrl {
                url: endpoint,
                reason: e.to_string(),
            })
    }

    /// Fetch every page of the listing, newest first.
    ///
    /// Only the first page is authoritative: if it fails the whole listing
    /// fails. A failing later page ends the listing early with what has been
    /// collected so far, as does a `nextPage` link that was already visited.
    pub fn fetch_all(&self, query: &CatalogQuery) -> Result<Vec<ModelRecord>, CatalogError> {
        let first_url = self.page_url(query, 1)?;
        let first = self.fetch_page(&first_url)?;

        let mut models = first.items;
        let total_pages = first.metadata.total_pages;
        let mut next_page = first.metadata.next_page;

        match total_pages {
            Some(total) => {
                for page in 2..=total {
                    let url = self.page_url(query, page)?;
                    match self.fetch_page(&url) {
                        Ok(p) => models.extend(p.items),
                        Err(e) => {
                            warn!(page, total, error = %e, "Listing truncated, stopping early");
                            break;
                        }
                    }
                }
            }
            None => {
                let mut visited = HashSet::from([first_url]);
                while let Some(url) = next_page.take() {
                    if !visited.insert(url.clone()) {
                        warn!(url = %url, "Listing links back to a visited page, stopping");
                        break;
                    }
                    match self.fetch_page(&url) {
                        Ok(p) => {
                            models.extend(p.items);
                            next_page = p.metadata.next_page;
                        }
                        Err(e) => {
                            warn!(url = %url, error = %e, "Listing truncated, stopping early");
                        }
                    }
                }
            }
        }

        info!(count = models.len(), "Catalog listing complete");
        Ok(models)
    }

    /// Fetch a single model by id.
    pub fn fetch_model(&self, model_id: u64) -> Result<ModelRecord, CatalogError> {
        let url = format!("{}/models/{}", self.base_url, model_id);
        let bytes = self.get_json(&url)?;
        serde_json::from_slice(&bytes).map_err(|e| CatalogError::Parse {
            url,
            reason: e.to_string(),
        })
    }

    fn fetch_page(&self, url: &str) -> Result<CatalogPage, CatalogError> {
        debug!(url, "Fetching catalog page");
        let bytes = self.get_json(url)?;
        serde_json::from_slice(&bytes).map_err(|e| CatalogError::Parse {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    fn get_json(&self, url: &str) -> Result<Vec<u8>, CatalogError> {
        let response = self.transport.get(url)?;
        if response.status != 200 {
            return Err(CatalogError::Unavailable {
                url: url.to_string(),
                status: response.status,
            });
        }
        response.into_bytes().map_err(|e| CatalogError::Request {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::http::mock::{MockReply, ScriptedTransport};

    const BASE: &str = "https://api.test/v1";

    fn page_json(ids: &[u64], total_pages: Option<u32>, next: Option<&str>) -> Vec<u8> {
        let items: Vec<String> = ids
            .iter()
            .map(|id| format!(r#"{{"id":{},"type":"LORA","modelVersions":[]}}"#, id))
            .collect();
        let mut meta = Vec::new();
        if let Some(t) = total_pages {
            meta.push(format!(r#""totalPages":{}"#, t));
        }
        if let Some(n) = next {
            meta.push(format!(r#""nextPage":"{}""#, n));
        }
        format!(
            r#"{{"items":[{}],"metadata":{{{}}}}}"#,
            items.join(","),
            meta.join(",")
        )
        .into_bytes()
    }

    fn ids(models: &[ModelRecord]) -> Vec<u64> {
        models.iter().map(|m| m.id).collect()
    }

    fn fetcher_for(transport: ScriptedTransport) -> (Arc<ScriptedTransport>, CatalogFetcher) {
        let transport = Arc::new(transport);
        let fetcher = CatalogFetcher::with_base_url(transport.clone(), BASE);
        (transport, fetcher)
    }

    fn page_url(query: &CatalogQuery, page: u32) -> String {
        CatalogFetcher::with_base_url(Arc::new(ScriptedTransport::new()), BASE)
            .page_url(query, page)
            .unwrap()
    }

    fn page(ids: &[u64], total_pages: Option<u32>, next: Option<&str>) -> Vec<MockReply> {
        vec![MockReply::ok(page_json(ids, total_pages, next))]
    }

    #[test]
    fn test_page_url_carries_query() {
        let query =
            CatalogQuery::default().with_types(vec![ModelType::Checkpoint, ModelType::Lora]);

        assert_eq!(
            page_url(&query, 3),
            "https://api.test/v1/models?types=Checkpoint&types=LORA&period=AllTime&limit=100&page=3&sort=Newest&favorites=true"
        );
    }

    #[test]
    fn test_fetch_all_pages_in_order() {
        let query = CatalogQuery::default();
        let transport = ScriptedTransport::new()
            .route(&page_url(&query, 1), page(&[9, 8], Some(3), None))
            .route(&page_url(&query, 2), page(&[7], Some(3), None))
            .route(&page_url(&query, 3), page(&[6, 5], Some(3), None));
        let (transport, fetcher) = fetcher_for(transport);

        let models = fetcher.fetch_all(&query).unwrap();

        assert_eq!(ids(&models), vec![9, 8, 7, 6, 5]);
        assert_eq!(transport.calls().len(), 3);
    }

    #[test]
    fn test_initial_failure_is_unavailable() {
        let query = CatalogQuery::default();
        let transport =
            ScriptedTransport::new().route(&page_url(&query, 1), vec![MockReply::status(401)]);
        let (transport, fetcher) = fetcher_for(transport);

        let result = fetcher.fetch_all(&query);

        assert!(matches!(
            result,
            Err(CatalogError::Unavailable { status: 401, .. })
        ));
        assert_eq!(transport.calls().len(), 1);
    }

    #[test]
    fn test_later_page_failure_truncates() {
        let query = CatalogQuery::default();
        let transport = ScriptedTransport::new()
            .route(&page_url(&query, 1), page(&[3], Some(4), None))
            .route(&page_url(&query, 2), page(&[2], Some(4), None))
            .route(&page_url(&query, 3), vec![MockReply::status(500)])
            .route(&page_url(&query, 4), page(&[1], Some(4), None));
        let (transport, fetcher) = fetcher_for(transport);

        let models = fetcher.fetch_all(&query).unwrap();

        assert_eq!(ids(&models), vec![3, 2]);
        assert_eq!(transport.calls().len(), 3);
    }

    #[test]
    fn test_follows_next_page_marker() {
        let query = CatalogQuery::default();
        let cursor_a = "https://api.test/v1/models?cursor=a";
        let cursor_b = "https://api.test/v1/models?cursor=b";
        let transport = ScriptedTransport::new()
            .route(&page_url(&query, 1), page(&[5], None, Some(cursor_a)))
            .route(cursor_a, page(&[4], None, Some(cursor_b)))
            .route(cursor_b, page(&[3], None, None));
        let (_, fetcher) = fetcher_for(transport);

        let models = fetcher.fetch_all(&query).unwrap();
        assert_eq!(ids(&models), vec![5, 4, 3]);
    }

    #[test]
    fn test_next_page_cycle_stops_listing() {
        let query = CatalogQuery::default();
        let first = page_url(&query, 1);
        let cursor_a = "https://api.test/v1/models?cursor=a";
        let cursor_b = "https://api.test/v1/models?cursor=b";
        let transport = ScriptedTransport::new()
            .route(&first, page(&[5], None, Some(cursor_a)))
            .route(cursor_a, page(&[4], None, Some(cursor_b)))
            .route(cursor_b, page(&[3], None, Some(cursor_a)));
        let (transport, fetcher) = fetcher_for(transport);

        let models = fetcher.fetch_all(&query).unwrap();

        assert_eq!(ids(&models), vec![5, 4, 3]);
        assert_eq!(transport.calls().len(), 3);
    }

    #[test]
    fn test_next_page_pointing_at_first_page_stops_listing() {
        let query = CatalogQuery::default();
        let first = page_url(&query, 1);
        let transport = ScriptedTransport::new().route(&first, page(&[5], None, Some(&first)));
        let (transport, fetcher) = fetcher_for(transport);

        let models = fetcher.fetch_all(&query).unwrap();

        assert_eq!(ids(&models), vec![5]);
        assert_eq!(transport.calls_to(&first), 1);
    }

    #[test]
    fn test_fetch_model_by_id() {
        let transport = ScriptedTransport::new().route(
            "https://api.test/v1/models/42",
            vec![MockReply::ok(br#"{"id":42,"type":"Hypernetwork"}"#.to_vec())],
        );
        let (_, fetcher) = fetcher_for(transport);

        let model = fetcher.fetch_model(42).unwrap();
        assert_eq!(model.id, 42);
        assert_eq!(model.model_type, ModelType::Hypernetwork);
    }

    #[test]
    fn test_unparseable_first_page() {
        let query = CatalogQuery::default();
        let transport = ScriptedTransport::new()
            .route(&page_url(&query, 1), vec![MockReply::ok(b"<html>".to_vec())]);
        let (_, fetcher) = fetcher_for(transport);

        assert!(matches!(
            fetcher.fetch_all(&query),
            Err(CatalogError::Parse { .. })
        ));
    }
}
