//! Drives a [`ViewSync`] controller against a [`PointSource`].
//!
//! Each transition's fetches run concurrently; their completions are fed back
//! to the controller in issue order, so the outcome does not depend on which
//! response arrives first. Non-fetch commands (pan, list panel) are returned
//! to the caller for the UI layer to act on.

use std::collections::BTreeSet;

use futures::future::join_all;
use matjip_shared::config::ViewConfig;
use matjip_shared::error::{FetchError, SyncError};
use matjip_shared::models::{Bounds, ClusterSummary, Point};
use matjip_shared::query::PointSource;
use matjip_shared::sync::{
    Command, Completion, QueryRequest, QueryResponse, SelectionOrigin, Ticket, ViewSync,
};

pub struct Session<S> {
    source: S,
    sync: ViewSync,
}

impl<S> Session<S>
where
    S: PointSource + Sync,
{
    pub fn new(source: S, config: ViewConfig) -> Self {
        Session {
            source,
            sync: ViewSync::new(config),
        }
    }

    pub fn with_initial_points(source: S, config: ViewConfig, initial: Vec<Point>) -> Self {
        Session {
            source,
            sync: ViewSync::with_initial_points(config, initial),
        }
    }

    pub fn view(&self) -> &ViewSync {
        &self.sync
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub async fn viewport_changed(&mut self, bounds: Bounds) -> Result<Vec<Command>, SyncError> {
        let commands = self.sync.viewport_changed(bounds)?;
        Ok(self.run(commands).await)
    }

    pub async fn zoom_changed(&mut self, zoom: u32) -> Vec<Command> {
        let commands = self.sync.zoom_changed(zoom);
        self.run(commands).await
    }

    pub async fn toggle_category(&mut self, category: &str) -> Vec<Command> {
        let commands = self.sync.toggle_category(category);
        self.run(commands).await
    }

    pub async fn set_categories(&mut self, categories: BTreeSet<String>) -> Vec<Command> {
        let commands = self.sync.set_categories(categories);
        self.run(commands).await
    }

    pub async fn clear_categories(&mut self) -> Vec<Command> {
        let commands = self.sync.clear_categories();
        self.run(commands).await
    }

    pub async fn load_more(&mut self) -> Vec<Command> {
        let commands = self.sync.load_more();
        self.run(commands).await
    }

    pub async fn select_cluster(&mut self, cluster: ClusterSummary) -> Vec<Command> {
        let commands = self.sync.select_cluster(cluster);
        self.run(commands).await
    }

    pub fn select_point(&mut self, point: Point, origin: SelectionOrigin) -> Vec<Command> {
        self.sync.select_point(point, origin)
    }

    pub fn deselect_point(&mut self) {
        self.sync.deselect_point();
    }

    /// Execute every fetch in `commands` and apply the results. Returns the
    /// commands meant for the UI layer.
    pub async fn run(&mut self, commands: Vec<Command>) -> Vec<Command> {
        let mut requests = Vec::new();
        let mut signals = Vec::new();
        for command in commands {
            match command {
                Command::Fetch(req) => requests.push(req),
                other => signals.push(other),
            }
        }

        let results = execute(&self.source, &requests).await;
        for (ticket, result) in results {
            self.apply(ticket, result);
        }
        signals
    }

    /// Feed one completion back to the controller.
    pub fn apply(
        &mut self,
        ticket: Ticket,
        result: Result<QueryResponse, FetchError>,
    ) -> Completion {
        self.sync.complete(ticket, result)
    }
}

/// Run requests concurrently against `source`, returning results in request order.
pub async fn execute<S>(
    source: &S,
    requests: &[QueryRequest],
) -> Vec<(Ticket, Result<QueryResponse, FetchError>)>
where
    S: PointSource + Sync + ?Sized,
{
    let results = join_all(requests.iter().map(|req| req.query.run(source))).await;
    requests.iter().map(|req| req.ticket).zip(results).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use matjip_shared::cluster::CellGrid;
    use matjip_shared::geo;
    use matjip_shared::models::NearbyPage;
    use matjip_shared::query::{rank_nearby, BoundsQuery, ClusterQuery, NearbyQuery};
    use matjip_shared::sync::QuerySlot;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const GANGNAM: Bounds = Bounds {
        north: 37.52,
        south: 37.49,
        east: 127.07,
        west: 127.03,
    };

    fn point(name: &str, lat: f64, lng: f64, categories: &[&str]) -> Point {
        Point {
            name: name.to_string(),
            address: String::new(),
            lat,
            lng,
            link: String::new(),
            recommendation: String::new(),
            categories: categories.iter().map(|c| c.to_string()).collect(),
            region: None,
        }
    }

    fn gangnam() -> Vec<Point> {
        vec![
            point("역삼맛집", 37.5013, 127.0396, &["한식"]),
            point("선릉맛집", 37.5045, 127.0490, &["일식"]),
            point("삼성맛집", 37.5088, 127.0630, &["한식", "단체"]),
            point("부산맛집", 35.1796, 129.0756, &["한식"]),
            point("인천맛집", 37.4563, 126.7052, &["중식"]),
        ]
    }

    /// In-memory store with a switch to fail bounds fetches.
    #[derive(Default)]
    struct FakeSource {
        points: Vec<Point>,
        fail_bounds: AtomicBool,
        calls: AtomicUsize,
    }

    impl FakeSource {
        fn new(points: Vec<Point>) -> Self {
            FakeSource {
                points,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl PointSource for FakeSource {
        async fn fetch_bounds(&self, query: &BoundsQuery) -> Result<Vec<Point>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_bounds.load(Ordering::SeqCst) {
                return Err(FetchError::Transport("offline".to_string()));
            }
            Ok(self
                .points
                .iter()
                .filter(|p| query.contains(p))
                .cloned()
                .collect())
        }

        async fn fetch_clusters(
            &self,
            query: &ClusterQuery,
        ) -> Result<Vec<ClusterSummary>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut grid = CellGrid::new(query.zoom);
            for p in &self.points {
                if geo::within_bounds(p.position(), &query.bounds) {
                    grid.insert(p.lat, p.lng);
                }
            }
            Ok(grid.summaries())
        }

        async fn fetch_nearby(&self, query: &NearbyQuery) -> Result<NearbyPage, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let rows = rank_nearby(self.points.clone(), query);
            Ok(NearbyPage::from_rows(rows, query.limit))
        }
    }

    fn names(points: &[Point]) -> Vec<&str> {
        points.iter().map(|p| p.name.as_str()).collect()
    }

    #[tokio::test]
    async fn test_gangnam_scenario() {
        let mut session = Session::new(FakeSource::new(gangnam()), ViewConfig::default());

        let signals = session.viewport_changed(GANGNAM).await.unwrap();
        assert!(signals.is_empty());
        assert_eq!(session.source().calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            names(session.view().category_filtered_markers()),
            vec!["역삼맛집", "선릉맛집", "삼성맛집"]
        );

        session.toggle_category("한식").await;
        assert_eq!(
            names(session.view().category_filtered_markers()),
            vec!["역삼맛집", "삼성맛집"]
        );
        assert_eq!(
            names(session.view().list_items()),
            vec!["역삼맛집", "삼성맛집", "부산맛집"]
        );
        assert!(!session.view().list_has_more());
        assert!(!session.view().list_loading());
    }

    #[tokio::test]
    async fn test_pagination_through_session() {
        let points: Vec<_> = (0..45)
            .map(|i| point(&format!("p{i:02}"), 37.505 + i as f64 * 0.0001, 127.05, &[]))
            .collect();
        let mut session = Session::new(FakeSource::new(points), ViewConfig::default());
        session.viewport_changed(GANGNAM).await.unwrap();

        while session.view().list_has_more() {
            session.load_more().await;
        }
        assert_eq!(session.view().list_items().len(), 45);
        assert_eq!(session.view().state().list_offset, 40);
    }

    #[tokio::test]
    async fn test_cluster_selection_opens_list_panel() {
        let mut session = Session::new(FakeSource::new(gangnam()), ViewConfig::default());
        session.zoom_changed(12).await;
        session.viewport_changed(GANGNAM).await.unwrap();
        let cluster = session.view().clusters()[0];
        assert_eq!(cluster.count, 3);

        let signals = session.select_cluster(cluster).await;
        assert_eq!(signals, vec![Command::OpenListPanel]);
        assert_eq!(session.view().list_items().len(), 3);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_markers() {
        let mut session = Session::new(FakeSource::new(gangnam()), ViewConfig::default());
        session.viewport_changed(GANGNAM).await.unwrap();

        session.source().fail_bounds.store(true, Ordering::SeqCst);
        let busan = Bounds::new(35.3, 35.0, 129.2, 128.9);
        session.viewport_changed(busan).await.unwrap();

        // The list fetch for the new viewport still lands.
        assert_eq!(session.view().list_items()[0].name, "부산맛집");
        assert_eq!(session.view().category_filtered_markers().len(), 3);
        assert!(session.view().refresh_failed());
        assert!(session.view().slot_failed(QuerySlot::Markers));

        session.source().fail_bounds.store(false, Ordering::SeqCst);
        session.viewport_changed(busan).await.unwrap();
        assert!(!session.view().refresh_failed());
        assert_eq!(names(session.view().category_filtered_markers()), vec!["부산맛집"]);
    }

    #[tokio::test]
    async fn test_out_of_order_completion_is_discarded() {
        let source = FakeSource::new(gangnam());
        let mut session = Session::new(source, ViewConfig::default());

        let busan = Bounds::new(35.3, 35.0, 129.2, 128.9);
        let stale = session.sync.viewport_changed(busan).unwrap();
        let fresh = session.sync.viewport_changed(GANGNAM).unwrap();

        let to_requests = |commands: &[Command]| -> Vec<QueryRequest> {
            commands.iter().filter_map(|c| c.as_fetch().cloned()).collect()
        };
        let stale_results = execute(session.source(), &to_requests(&stale)).await;
        let fresh_results = execute(session.source(), &to_requests(&fresh)).await;

        for (ticket, result) in fresh_results {
            assert_eq!(session.apply(ticket, result), Completion::Applied);
        }
        for (ticket, result) in stale_results {
            assert_eq!(session.apply(ticket, result), Completion::Stale);
        }
        assert_eq!(session.view().category_filtered_markers().len(), 3);
    }

    #[tokio::test]
    async fn test_execute_preserves_request_order() {
        let mut sync = ViewSync::new(ViewConfig::default());
        sync.zoom_changed(10);
        let commands = sync.viewport_changed(GANGNAM).unwrap();
        let requests: Vec<_> = commands.iter().filter_map(|c| c.as_fetch().cloned()).collect();

        let results = execute(&FakeSource::new(gangnam()), &requests).await;
        let slots: Vec<_> = results.iter().map(|(t, _)| t.slot).collect();
        assert_eq!(
            slots,
            vec![QuerySlot::Markers, QuerySlot::Clusters, QuerySlot::List]
        );
        assert!(matches!(results[1].1, Ok(QueryResponse::Clusters(_))));
    }

    #[tokio::test]
    async fn test_select_point_returns_pan_without_fetch() {
        let source = FakeSource::new(gangnam());
        let mut session = Session::new(source, ViewConfig::default());
        let p = gangnam().remove(0);
        let signals = session.select_point(p.clone(), SelectionOrigin::List);
        assert_eq!(
            signals,
            vec![
                Command::PanTo {
                    center: p.position(),
                    zoom: None
                },
                Command::CloseListPanel
            ]
        );
        assert_eq!(session.source().calls.load(Ordering::SeqCst), 0);
        session.deselect_point();
        assert!(session.view().state().selected_point.is_none());
    }
}
