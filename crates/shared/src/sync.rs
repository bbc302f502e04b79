//! View-sync controller.
//!
//! [`ViewSync`] owns the map/list view state and turns UI events into fetch
//! commands. The caller executes each [`QueryRequest`] against a
//! [`PointSource`] and hands the result back through [`ViewSync::complete`].
//! Every request carries a [`Ticket`]; a response is applied only while its
//! ticket is still the one in flight for its slot, so a late answer to a
//! superseded request is dropped instead of overwriting newer state.
//!
//! Callers are expected to debounce viewport events (~200ms of quiescence);
//! the controller issues a fresh fetch for every event it receives.

use std::collections::BTreeSet;

use crate::config::ViewConfig;
use crate::cluster::MAX_ZOOM;
use crate::error::{FetchError, SyncError};
use crate::filter;
use crate::geo;
use crate::models::{Bounds, ClusterSummary, LatLng, NearbyPage, Point};
use crate::query::{BoundsQuery, ClusterQuery, NearbyQuery, PointSource, QueryShape, PAGE_SIZE};

/// Independent cancellation slots.
///
/// `ClusterMembers` is a bounds-shaped query with its own slot, so refreshing
/// the viewport markers never cancels a cluster's member fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuerySlot {
    Markers,
    Clusters,
    List,
    ClusterMembers,
}

impl QuerySlot {
    const COUNT: usize = 4;

    fn index(self) -> usize {
        match self {
            QuerySlot::Markers => 0,
            QuerySlot::Clusters => 1,
            QuerySlot::List => 2,
            QuerySlot::ClusterMembers => 3,
        }
    }

    pub fn shape(self) -> QueryShape {
        match self {
            QuerySlot::Markers | QuerySlot::ClusterMembers => QueryShape::Bounds,
            QuerySlot::Clusters => QueryShape::Cluster,
            QuerySlot::List => QueryShape::Nearby,
        }
    }

    fn name(self) -> &'static str {
        match self {
            QuerySlot::Markers => "markers",
            QuerySlot::Clusters => "clusters",
            QuerySlot::List => "list",
            QuerySlot::ClusterMembers => "cluster members",
        }
    }
}

/// Tag identifying one issued query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket {
    pub slot: QuerySlot,
    pub generation: u64,
}

/// Per-slot generation counters and the generation currently awaited.
#[derive(Debug, Default, Clone)]
struct Generations {
    issued: [u64; QuerySlot::COUNT],
    in_flight: [Option<u64>; QuerySlot::COUNT],
}

impl Generations {
    fn issue(&mut self, slot: QuerySlot) -> Ticket {
        let i = slot.index();
        self.issued[i] += 1;
        self.in_flight[i] = Some(self.issued[i]);
        Ticket {
            slot,
            generation: self.issued[i],
        }
    }

    fn cancel(&mut self, slot: QuerySlot) {
        self.in_flight[slot.index()] = None;
    }

    fn is_current(&self, ticket: Ticket) -> bool {
        self.in_flight[ticket.slot.index()] == Some(ticket.generation)
    }

    fn settle(&mut self, ticket: Ticket) {
        if self.is_current(ticket) {
            self.cancel(ticket.slot);
        }
    }

    fn is_pending(&self, slot: QuerySlot) -> bool {
        self.in_flight[slot.index()].is_some()
    }
}

/// A store query in one of the three shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Bounds(BoundsQuery),
    Clusters(ClusterQuery),
    Nearby(NearbyQuery),
}

impl Query {
    pub fn shape(&self) -> QueryShape {
        match self {
            Query::Bounds(_) => QueryShape::Bounds,
            Query::Clusters(_) => QueryShape::Cluster,
            Query::Nearby(_) => QueryShape::Nearby,
        }
    }

    /// Execute against a store.
    pub async fn run<S>(&self, source: &S) -> Result<QueryResponse, FetchError>
    where
        S: PointSource + Sync + ?Sized,
    {
        match self {
            Query::Bounds(q) => source.fetch_bounds(q).await.map(QueryResponse::Points),
            Query::Clusters(q) => source.fetch_clusters(q).await.map(QueryResponse::Clusters),
            Query::Nearby(q) => source.fetch_nearby(q).await.map(QueryResponse::Page),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryResponse {
    Points(Vec<Point>),
    Clusters(Vec<ClusterSummary>),
    Page(NearbyPage),
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub ticket: Ticket,
    pub query: Query,
}

/// Output of a transition: a fetch to run, or a signal for the UI layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Fetch(QueryRequest),
    /// Recenter the map, optionally also zooming.
    PanTo { center: LatLng, zoom: Option<u32> },
    OpenListPanel,
    CloseListPanel,
}

impl Command {
    pub fn as_fetch(&self) -> Option<&QueryRequest> {
        match self {
            Command::Fetch(req) => Some(req),
            _ => None,
        }
    }
}

/// Where a point selection came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionOrigin {
    Marker,
    List,
    Search,
}

/// What happened to a completed fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Applied,
    /// Superseded or cancelled; nothing changed.
    Stale,
    /// The fetch failed; last known data is kept.
    Failed(FetchError),
}

/// Client-visible view state.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewState {
    pub current_bounds: Option<Bounds>,
    pub current_zoom: u32,
    pub selected_categories: BTreeSet<String>,
    pub selected_point: Option<Point>,
    pub selected_cluster: Option<ClusterSummary>,
    pub list_offset: usize,
    pub list_has_more: bool,
}

impl ViewState {
    fn new(config: &ViewConfig) -> Self {
        ViewState {
            current_bounds: None,
            current_zoom: config.default_zoom.min(MAX_ZOOM),
            selected_categories: BTreeSet::new(),
            selected_point: None,
            selected_cluster: None,
            list_offset: 0,
            list_has_more: false,
        }
    }
}

/// Owns one map view's state and its in-flight queries.
#[derive(Debug, Clone)]
pub struct ViewSync {
    config: ViewConfig,
    state: ViewState,
    generations: Generations,
    markers: Vec<Point>,
    filtered_markers: Vec<Point>,
    clusters: Vec<ClusterSummary>,
    cluster_members: Vec<Point>,
    filtered_members: Vec<Point>,
    list: Vec<Point>,
    list_loading: bool,
    /// Per slot: the last settled fetch failed and no later one has succeeded.
    failed: [bool; QuerySlot::COUNT],
}

impl ViewSync {
    pub fn new(config: ViewConfig) -> Self {
        Self::with_initial_points(config, Vec::new())
    }

    /// Start with server-rendered points shown as both markers and list
    /// until the map reports its first viewport.
    pub fn with_initial_points(config: ViewConfig, initial: Vec<Point>) -> Self {
        ViewSync {
            state: ViewState::new(&config),
            config,
            generations: Generations::default(),
            filtered_markers: initial.clone(),
            markers: initial.clone(),
            clusters: Vec::new(),
            cluster_members: Vec::new(),
            filtered_members: Vec::new(),
            list: initial,
            list_loading: false,
            failed: [false; QuerySlot::COUNT],
        }
    }

    pub fn state(&self) -> &ViewState {
        &self.state
    }

    pub fn config(&self) -> &ViewConfig {
        &self.config
    }

    pub fn is_cluster_mode(&self) -> bool {
        self.config.is_cluster_mode(self.state.current_zoom)
    }

    // --- derived view collections ---

    /// Viewport markers narrowed by the selected categories.
    pub fn category_filtered_markers(&self) -> &[Point] {
        &self.filtered_markers
    }

    /// Clusters to draw; empty outside cluster mode.
    pub fn clusters(&self) -> &[ClusterSummary] {
        if self.is_cluster_mode() {
            &self.clusters
        } else {
            &[]
        }
    }

    /// List panel contents: the selected cluster's members while one is
    /// selected in cluster mode, otherwise the accumulated nearby pages.
    pub fn list_items(&self) -> &[Point] {
        if self.is_cluster_mode() && self.state.selected_cluster.is_some() {
            &self.filtered_members
        } else {
            &self.list
        }
    }

    pub fn list_has_more(&self) -> bool {
        self.state.list_has_more
    }

    pub fn list_loading(&self) -> bool {
        self.list_loading
    }

    /// Set while any slot's latest settled fetch has failed.
    pub fn refresh_failed(&self) -> bool {
        self.failed.iter().any(|&f| f)
    }

    pub fn slot_failed(&self, slot: QuerySlot) -> bool {
        self.failed[slot.index()]
    }

    pub fn is_pending(&self, slot: QuerySlot) -> bool {
        self.generations.is_pending(slot)
    }

    // --- transitions ---

    /// The map reported a new viewport.
    pub fn viewport_changed(&mut self, bounds: Bounds) -> Result<Vec<Command>, SyncError> {
        bounds.validate()?;
        self.state.current_bounds = Some(bounds);

        let mut commands = Vec::new();
        commands.push(self.fetch(
            QuerySlot::Markers,
            Query::Bounds(BoundsQuery::for_viewport(&bounds)),
        ));
        if self.is_cluster_mode() {
            commands.push(self.fetch(
                QuerySlot::Clusters,
                Query::Clusters(ClusterQuery::for_viewport(&bounds, self.state.current_zoom)),
            ));
        }
        self.reset_list(&mut commands);
        Ok(commands)
    }

    /// The map zoomed. Levels past [`MAX_ZOOM`] are treated as [`MAX_ZOOM`].
    pub fn zoom_changed(&mut self, zoom: u32) -> Vec<Command> {
        let zoom = zoom.min(MAX_ZOOM);
        if zoom == self.state.current_zoom {
            return Vec::new();
        }
        self.state.current_zoom = zoom;

        let mut commands = Vec::new();
        if self.is_cluster_mode() {
            // Cell size depends on zoom, so the aggregate must be recomputed.
            if let Some(bounds) = self.state.current_bounds {
                commands.push(self.fetch(
                    QuerySlot::Clusters,
                    Query::Clusters(ClusterQuery::for_viewport(&bounds, zoom)),
                ));
            }
        } else {
            self.generations.cancel(QuerySlot::Clusters);
            self.failed[QuerySlot::Clusters.index()] = false;
            self.clusters.clear();
            self.clear_cluster_selection();
        }
        commands
    }

    /// Add the category if absent, remove it if present.
    pub fn toggle_category(&mut self, category: &str) -> Vec<Command> {
        let mut next = self.state.selected_categories.clone();
        if !next.remove(category) {
            next.insert(category.to_string());
        }
        self.categories_changed(next)
    }

    pub fn set_categories<I>(&mut self, categories: I) -> Vec<Command>
    where
        I: IntoIterator<Item = String>,
    {
        self.categories_changed(categories.into_iter().collect())
    }

    pub fn clear_categories(&mut self) -> Vec<Command> {
        self.categories_changed(BTreeSet::new())
    }

    /// Request the next list page. Ignored while a page is loading or when
    /// the last page has been reached.
    pub fn load_more(&mut self) -> Vec<Command> {
        let Some(bounds) = self.state.current_bounds else {
            return Vec::new();
        };
        if !self.state.list_has_more || self.list_loading {
            return Vec::new();
        }
        self.state.list_offset += PAGE_SIZE;
        self.list_loading = true;
        let query = NearbyQuery::for_viewport(
            &bounds,
            &self.state.selected_categories,
            self.state.list_offset,
        );
        vec![self.fetch(QuerySlot::List, Query::Nearby(query))]
    }

    /// Select a cluster and fetch the members of its cell for the list panel.
    pub fn select_cluster(&mut self, cluster: ClusterSummary) -> Vec<Command> {
        if !self.is_cluster_mode() {
            return Vec::new();
        }
        self.state.selected_cluster = Some(cluster);
        self.cluster_members.clear();
        self.filtered_members.clear();

        let cell = geo::cluster_cell_bounds(cluster.lat, cluster.lng, self.state.current_zoom);
        vec![
            self.fetch(
                QuerySlot::ClusterMembers,
                Query::Bounds(BoundsQuery::exact(cell)),
            ),
            Command::OpenListPanel,
        ]
    }

    pub fn select_point(&mut self, point: Point, origin: SelectionOrigin) -> Vec<Command> {
        let center = point.position();
        self.state.selected_point = Some(point);
        match origin {
            SelectionOrigin::Marker => vec![Command::PanTo { center, zoom: None }],
            SelectionOrigin::List => vec![
                Command::PanTo { center, zoom: None },
                Command::CloseListPanel,
            ],
            SelectionOrigin::Search => vec![Command::PanTo {
                center,
                zoom: Some(self.config.cluster_zoom_threshold),
            }],
        }
    }

    pub fn deselect_point(&mut self) {
        self.state.selected_point = None;
    }

    /// Feed back the outcome of a fetch issued by a transition.
    pub fn complete(
        &mut self,
        ticket: Ticket,
        result: Result<QueryResponse, FetchError>,
    ) -> Completion {
        if !self.generations.is_current(ticket) {
            tracing::debug!(
                slot = ticket.slot.name(),
                generation = ticket.generation,
                "Discarding superseded response"
            );
            return Completion::Stale;
        }
        self.generations.settle(ticket);

        match result.and_then(|response| self.apply(ticket.slot, response)) {
            Ok(()) => {
                self.failed[ticket.slot.index()] = false;
                Completion::Applied
            }
            Err(err) => {
                tracing::warn!(
                    slot = ticket.slot.name(),
                    generation = ticket.generation,
                    error = %err,
                    "Query failed, keeping last known data"
                );
                if ticket.slot == QuerySlot::List {
                    self.list_loading = false;
                    // Let a retry request the same page again.
                    if self.state.list_offset >= PAGE_SIZE {
                        self.state.list_offset -= PAGE_SIZE;
                    }
                }
                self.failed[ticket.slot.index()] = true;
                Completion::Failed(err)
            }
        }
    }

    // --- internals ---

    fn fetch(&mut self, slot: QuerySlot, query: Query) -> Command {
        let ticket = self.generations.issue(slot);
        Command::Fetch(QueryRequest { ticket, query })
    }

    fn categories_changed(&mut self, next: BTreeSet<String>) -> Vec<Command> {
        if next == self.state.selected_categories {
            return Vec::new();
        }
        self.state.selected_categories = next;
        self.refilter();

        let mut commands = Vec::new();
        self.reset_list(&mut commands);
        commands
    }

    /// Restart pagination from the first page for the current bounds and categories.
    fn reset_list(&mut self, commands: &mut Vec<Command>) {
        let Some(bounds) = self.state.current_bounds else {
            return;
        };
        self.state.list_offset = 0;
        self.state.list_has_more = false;
        self.list.clear();
        self.list_loading = true;
        let query = NearbyQuery::for_viewport(&bounds, &self.state.selected_categories, 0);
        commands.push(self.fetch(QuerySlot::List, Query::Nearby(query)));
    }

    fn clear_cluster_selection(&mut self) {
        self.generations.cancel(QuerySlot::ClusterMembers);
        self.failed[QuerySlot::ClusterMembers.index()] = false;
        self.state.selected_cluster = None;
        self.cluster_members.clear();
        self.filtered_members.clear();
    }

    fn refilter(&mut self) {
        let selected = &self.state.selected_categories;
        self.filtered_markers = filter::filter_by_categories(&self.markers, selected);
        self.filtered_members = filter::filter_by_categories(&self.cluster_members, selected);
    }

    fn apply(&mut self, slot: QuerySlot, response: QueryResponse) -> Result<(), FetchError> {
        match (slot, response) {
            (QuerySlot::Markers, QueryResponse::Points(points)) => {
                self.filtered_markers =
                    filter::filter_by_categories(&points, &self.state.selected_categories);
                self.markers = points;
            }
            (QuerySlot::ClusterMembers, QueryResponse::Points(points)) => {
                self.filtered_members =
                    filter::filter_by_categories(&points, &self.state.selected_categories);
                self.cluster_members = points;
            }
            (QuerySlot::Clusters, QueryResponse::Clusters(clusters)) => {
                self.clusters = clusters;
            }
            (QuerySlot::List, QueryResponse::Page(page)) => {
                if self.state.list_offset == 0 {
                    self.list = page.items;
                } else {
                    self.list.extend(page.items);
                }
                self.state.list_has_more = page.has_more;
                self.list_loading = false;
            }
            (slot, _) => {
                if slot == QuerySlot::List {
                    self.list_loading = false;
                }
                return Err(FetchError::ShapeMismatch {
                    expected: slot.name(),
                });
            }
        }
        Ok(())
    }
}
