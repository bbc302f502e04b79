use async_trait::async_trait;
use matjip_shared::config::ViewConfig;
use matjip_shared::error::FetchError;
use matjip_shared::models::{Bounds, ClusterSummary, NearbyPage, Point};
use matjip_shared::query::{BoundsQuery, ClusterQuery, NearbyQuery, PointSource};
use serde::{Deserialize, Serialize};

const POINT_FIELDS: &str = "name address lat lng link recommendation categories region";

pub fn points_in_bounds_query() -> String {
    format!("query($bounds: BoundsInput!) {{ pointsInBounds(bounds: $bounds) {{ {POINT_FIELDS} }} }}")
}

pub const CLUSTERS_QUERY: &str =
    "query($bounds: BoundsInput!, $zoom: Int!) { clusters(bounds: $bounds, zoom: $zoom) { lat lng count } }";

pub fn nearby_query() -> String {
    format!(
        "query($input: NearbyInput!) {{ nearby(input: $input) {{ items {{ {POINT_FIELDS} }} hasMore }} }}"
    )
}

pub fn initial_points_query() -> String {
    format!("query {{ initialPoints {{ {POINT_FIELDS} }} }}")
}

pub fn search_query() -> String {
    format!(
        "query($query: String!, $limit: Int) {{ search(query: $query, limit: $limit) {{ {POINT_FIELDS} }} }}"
    )
}

pub const CATEGORIES_QUERY: &str = "query { categories }";

pub const VIEW_CONFIG_QUERY: &str =
    "query { viewConfig { clusterZoomThreshold defaultZoom defaultCenter { lat lng } } }";

pub const SOFT_DELETE_MUTATION: &str = "mutation($key: String!) { softDeletePoint(key: $key) }";

fn bounds_json(bounds: &Bounds) -> serde_json::Value {
    serde_json::json!({
        "north": bounds.north,
        "south": bounds.south,
        "east": bounds.east,
        "west": bounds.west
    })
}

/// Build the variables JSON for a bounds query.
pub fn build_bounds_variables(query: &BoundsQuery) -> serde_json::Value {
    serde_json::json!({ "bounds": bounds_json(&query.bounds) })
}

/// Build the variables JSON for a cluster query.
pub fn build_cluster_variables(query: &ClusterQuery) -> serde_json::Value {
    serde_json::json!({
        "bounds": bounds_json(&query.bounds),
        "zoom": query.zoom
    })
}

/// Build the variables JSON for a nearby query. No filter is sent as `null`.
pub fn build_nearby_variables(query: &NearbyQuery) -> serde_json::Value {
    let categories = match &query.categories {
        Some(selected) => serde_json::json!(selected.iter().collect::<Vec<_>>()),
        None => serde_json::Value::Null,
    };
    serde_json::json!({
        "input": {
            "lat": query.center.lat,
            "lng": query.center.lng,
            "categories": categories,
            "offset": query.offset
        }
    })
}

pub fn build_search_variables(query: &str, limit: Option<u32>) -> serde_json::Value {
    serde_json::json!({ "query": query.trim(), "limit": limit })
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphQLRequest {
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphQLResponse<T> {
    pub data: Option<T>,
    pub errors: Option<Vec<GraphQLError>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphQLError {
    pub message: String,
}

impl<T> GraphQLResponse<T> {
    /// The first reported error wins over any partial data.
    pub fn into_result(self) -> Result<T, FetchError> {
        if let Some(first) = self.errors.and_then(|errors| errors.into_iter().next()) {
            return Err(FetchError::Server(first.message));
        }
        self.data
            .ok_or_else(|| FetchError::Server("No data returned".to_string()))
    }
}

// Response envelopes mirroring the GraphQL schema

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointsInBoundsResponse {
    pub points_in_bounds: Vec<Point>,
}

#[derive(Debug, Deserialize)]
pub struct ClustersResponse {
    pub clusters: Vec<ClusterSummary>,
}

#[derive(Debug, Deserialize)]
pub struct NearbyResponse {
    pub nearby: NearbyPage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialPointsResponse {
    pub initial_points: Vec<Point>,
}

#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    pub search: Vec<Point>,
}

#[derive(Debug, Deserialize)]
pub struct CategoriesResponse {
    pub categories: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewConfigResponse {
    pub view_config: ViewConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoftDeleteResponse {
    pub soft_delete_point: bool,
}

/// Point store reached over the GraphQL API.
#[derive(Debug, Clone)]
pub struct GraphqlSource {
    client: reqwest::Client,
    endpoint: String,
}

impl GraphqlSource {
    /// `endpoint` is the full URL of the `/graphql` route.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), endpoint)
    }

    pub fn with_client(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        GraphqlSource {
            client,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn query<T: for<'de> Deserialize<'de>>(
        &self,
        query: String,
        variables: Option<serde_json::Value>,
    ) -> Result<T, FetchError> {
        let req = GraphQLRequest { query, variables };
        tracing::debug!(endpoint = %self.endpoint, "Sending GraphQL request");

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&req)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let gql_resp: GraphQLResponse<T> = resp
            .json()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        gql_resp.into_result()
    }

    pub async fn initial_points(&self) -> Result<Vec<Point>, FetchError> {
        let resp: InitialPointsResponse = self.query(initial_points_query(), None).await?;
        Ok(resp.initial_points)
    }

    pub async fn categories(&self) -> Result<Vec<String>, FetchError> {
        let resp: CategoriesResponse = self.query(CATEGORIES_QUERY.to_string(), None).await?;
        Ok(resp.categories)
    }

    /// Blank queries return nothing without a round trip.
    pub async fn search(&self, query: &str, limit: Option<u32>) -> Result<Vec<Point>, FetchError> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let resp: SearchResponse = self
            .query(search_query(), Some(build_search_variables(query, limit)))
            .await?;
        Ok(resp.search)
    }

    pub async fn view_config(&self) -> Result<ViewConfig, FetchError> {
        let resp: ViewConfigResponse = self.query(VIEW_CONFIG_QUERY.to_string(), None).await?;
        Ok(resp.view_config)
    }

    pub async fn soft_delete_point(&self, key: &str) -> Result<bool, FetchError> {
        let resp: SoftDeleteResponse = self
            .query(
                SOFT_DELETE_MUTATION.to_string(),
                Some(serde_json::json!({ "key": key })),
            )
            .await?;
        Ok(resp.soft_delete_point)
    }
}

#[async_trait]
impl PointSource for GraphqlSource {
    async fn fetch_bounds(&self, query: &BoundsQuery) -> Result<Vec<Point>, FetchError> {
        query.validate()?;
        let resp: PointsInBoundsResponse = self
            .query(points_in_bounds_query(), Some(build_bounds_variables(query)))
            .await?;
        Ok(resp.points_in_bounds)
    }

    async fn fetch_clusters(
        &self,
        query: &ClusterQuery,
    ) -> Result<Vec<ClusterSummary>, FetchError> {
        query.validate()?;
        let resp: ClustersResponse = self
            .query(
                CLUSTERS_QUERY.to_string(),
                Some(build_cluster_variables(query)),
            )
            .await?;
        Ok(resp.clusters)
    }

    async fn fetch_nearby(&self, query: &NearbyQuery) -> Result<NearbyPage, FetchError> {
        let resp: NearbyResponse = self
            .query(nearby_query(), Some(build_nearby_variables(query)))
            .await?;
        Ok(resp.nearby)
    }
}
