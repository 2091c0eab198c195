//! Batch selection management
//!
//! Tracks a growing, paginated list of discoverable items and the subset
//! currently selected for a batch job. Pages append, never replace; newly
//! loaded items are selected by default while prior selections stay
//! untouched.

use std::collections::HashSet;

use crate::api::MediaServer;
use crate::config::DiscoveryConfig;
use crate::error::Result;
use crate::types::SelectableItem;

/// Paginated item list plus selection set for one discovery query
///
/// Created per query; [`reset`](BatchSelection::reset) discards everything
/// when the user changes the query. The page size comes from
/// [`DiscoveryConfig`] at construction time.
#[derive(Debug)]
pub struct BatchSelection {
    items: Vec<SelectableItem>,
    selected: HashSet<String>,
    offset: usize,
    has_more: bool,
    page_size: usize,
}

impl Default for BatchSelection {
    fn default() -> Self {
        Self::new(&DiscoveryConfig::default())
    }
}

impl BatchSelection {
    /// Create an empty selection paging at the configured size
    pub fn new(config: &DiscoveryConfig) -> Self {
        Self {
            items: Vec::new(),
            selected: HashSet::new(),
            offset: 0,
            has_more: true,
            page_size: config.page_size,
        }
    }

    /// Load the next discovery page and append it
    ///
    /// New items are auto-selected; existing selections are preserved.
    /// Returns the number of items added.
    pub async fn load_more(&mut self, server: &dyn MediaServer, query: &str) -> Result<usize> {
        let page = server.discover(query, self.page_size, self.offset).await?;
        let fetched = page.items.len();

        let mut added = 0;
        for item in page.items {
            // Discovery pagination can overlap; never double-insert an item.
            if self.items.iter().any(|i| i.source_ref == item.source_ref) {
                continue;
            }
            self.selected.insert(item.source_ref.clone());
            self.items.push(item);
            added += 1;
        }

        // Server-side pagination advances by what was served, not what was new
        self.offset += fetched;
        self.has_more = page.has_more;

        tracing::debug!(
            added,
            total = self.items.len(),
            selected = self.selected.len(),
            has_more = self.has_more,
            "Discovery page appended"
        );

        Ok(added)
    }

    /// All items loaded so far, in load order
    pub fn items(&self) -> &[SelectableItem] {
        &self.items
    }

    /// True if another page may follow
    pub fn has_more(&self) -> bool {
        self.has_more
    }

    /// Whether an item is currently selected
    pub fn is_selected(&self, source_ref: &str) -> bool {
        self.selected.contains(source_ref)
    }

    /// Number of selected items; always ≤ `items().len()`
    pub fn selected_count(&self) -> usize {
        self.selected.len()
    }

    /// Flip one item's membership; no-op for unknown refs
    pub fn toggle(&mut self, source_ref: &str) {
        if !self.items.iter().any(|i| i.source_ref == source_ref) {
            return;
        }
        if !self.selected.remove(source_ref) {
            self.selected.insert(source_ref.to_string());
        }
    }

    /// Select every loaded item
    pub fn select_all(&mut self) {
        self.selected = self.items.iter().map(|i| i.source_ref.clone()).collect();
    }

    /// Deselect every loaded item
    pub fn deselect_all(&mut self) {
        self.selected.clear();
    }

    /// Clear both the item list and the selection set
    ///
    /// Used when the user changes the discovery query.
    pub fn reset(&mut self) {
        self.items.clear();
        self.selected.clear();
        self.offset = 0;
        self.has_more = true;
    }

    /// URLs of the selected items, in load order — the batch job payload
    pub fn selected_urls(&self) -> Vec<String> {
        self.items
            .iter()
            .filter(|i| self.selected.contains(&i.source_ref))
            .map(|i| i.url.clone())
            .collect()
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ArtifactResponse, DiscoveryPage, ProgressChannel};
    use crate::types::{JobHandle, JobId, JobRequest};
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn item(n: usize) -> SelectableItem {
        SelectableItem {
            source_ref: format!("v{n}"),
            url: format!("https://youtube.com/watch?v=v{n}"),
            title: format!("Clip {n}"),
            thumbnail_url: None,
            duration_seconds: Some(45),
        }
    }

    /// Fake server serving pre-built discovery pages in order
    struct PagedServer {
        pages: Mutex<Vec<DiscoveryPage>>,
        seen_limits: Mutex<Vec<usize>>,
        seen_offsets: Mutex<Vec<usize>>,
    }

    impl PagedServer {
        fn new(pages: Vec<DiscoveryPage>) -> Self {
            Self {
                pages: Mutex::new(pages),
                seen_limits: Mutex::new(Vec::new()),
                seen_offsets: Mutex::new(Vec::new()),
            }
        }
    }

    fn selection_of(page_size: usize) -> BatchSelection {
        BatchSelection::new(&DiscoveryConfig { page_size })
    }

    #[async_trait]
    impl MediaServer for PagedServer {
        async fn create_job(&self, _r: &JobRequest) -> crate::Result<JobHandle> {
            unimplemented!("not used by selection tests")
        }
        async fn cancel_job(&self, _j: &JobId) -> crate::Result<()> {
            Ok(())
        }
        async fn open_progress_channel(&self, _h: &JobHandle) -> crate::Result<ProgressChannel> {
            unimplemented!("not used by selection tests")
        }
        async fn fetch_artifact(&self, _a: &str) -> crate::Result<ArtifactResponse> {
            unimplemented!("not used by selection tests")
        }
        async fn discover(
            &self,
            _query: &str,
            limit: usize,
            offset: usize,
        ) -> crate::Result<DiscoveryPage> {
            self.seen_limits.lock().unwrap().push(limit);
            self.seen_offsets.lock().unwrap().push(offset);
            Ok(self.pages.lock().unwrap().remove(0))
        }
    }

    fn two_pages_45() -> PagedServer {
        // 45 items across two pages (30 + 15), has_more=false after page 2
        PagedServer::new(vec![
            DiscoveryPage {
                items: (0..30).map(item).collect(),
                has_more: true,
            },
            DiscoveryPage {
                items: (30..45).map(item).collect(),
                has_more: false,
            },
        ])
    }

    #[tokio::test]
    async fn pages_append_and_auto_select() {
        let server = two_pages_45();
        let mut selection = selection_of(30);

        selection.load_more(&server, "https://y.t/@c").await.unwrap();
        assert_eq!(selection.items().len(), 30);
        assert_eq!(selection.selected_count(), 30);
        assert!(selection.has_more());

        selection.load_more(&server, "https://y.t/@c").await.unwrap();
        assert_eq!(selection.items().len(), 45);
        assert_eq!(selection.selected_count(), 45);
        assert!(!selection.has_more());

        // Second page was requested from the right offset
        assert_eq!(*server.seen_offsets.lock().unwrap(), vec![0, 30]);
    }

    #[tokio::test]
    async fn configured_page_size_reaches_the_server() {
        let server = PagedServer::new(vec![DiscoveryPage {
            items: (0..7).map(item).collect(),
            has_more: false,
        }]);
        let mut selection = selection_of(7);

        selection.load_more(&server, "q").await.unwrap();
        assert_eq!(*server.seen_limits.lock().unwrap(), vec![7]);
    }

    #[tokio::test]
    async fn prior_deselections_survive_load_more() {
        let server = two_pages_45();
        let mut selection = selection_of(30);

        selection.load_more(&server, "q").await.unwrap();
        selection.toggle("v3");
        selection.toggle("v7");
        assert_eq!(selection.selected_count(), 28);

        selection.load_more(&server, "q").await.unwrap();
        assert_eq!(
            selection.selected_count(),
            43,
            "new items auto-selected, prior deselections untouched"
        );
        assert!(!selection.is_selected("v3"));
        assert!(!selection.is_selected("v7"));
        assert!(selection.is_selected("v31"));
    }

    #[tokio::test]
    async fn toggle_unknown_ref_is_a_no_op_and_double_toggle_restores() {
        let server = two_pages_45();
        let mut selection = selection_of(30);
        selection.load_more(&server, "q").await.unwrap();

        selection.toggle("nonexistent");
        assert_eq!(selection.selected_count(), 30);

        selection.toggle("v5");
        assert!(!selection.is_selected("v5"));
        selection.toggle("v5");
        assert!(selection.is_selected("v5"), "toggling twice is reversible");
        assert_eq!(selection.selected_count(), 30);
    }

    #[tokio::test]
    async fn select_all_then_deselect_all_empties_selection() {
        let server = two_pages_45();
        let mut selection = selection_of(30);
        selection.load_more(&server, "q").await.unwrap();
        selection.load_more(&server, "q").await.unwrap();

        selection.toggle("v1");
        selection.select_all();
        assert_eq!(selection.selected_count(), 45);

        selection.deselect_all();
        assert_eq!(selection.selected_count(), 0);
        assert!(selection.selected_urls().is_empty());
    }

    #[tokio::test]
    async fn selected_count_never_exceeds_item_count() {
        let server = two_pages_45();
        let mut selection = selection_of(30);
        selection.load_more(&server, "q").await.unwrap();
        selection.select_all();
        assert!(selection.selected_count() <= selection.items().len());
    }

    #[tokio::test]
    async fn overlapping_pages_do_not_duplicate_items() {
        let server = PagedServer::new(vec![
            DiscoveryPage {
                items: vec![item(1), item(2)],
                has_more: true,
            },
            DiscoveryPage {
                items: vec![item(2), item(3)],
                has_more: false,
            },
        ]);
        let mut selection = selection_of(2);
        selection.load_more(&server, "q").await.unwrap();
        selection.load_more(&server, "q").await.unwrap();

        assert_eq!(selection.items().len(), 3);
        assert_eq!(selection.selected_count(), 3);
    }

    #[tokio::test]
    async fn reset_clears_everything() {
        let server = two_pages_45();
        let mut selection = selection_of(30);
        selection.load_more(&server, "q").await.unwrap();

        selection.reset();
        assert!(selection.items().is_empty());
        assert_eq!(selection.selected_count(), 0);
        assert!(selection.has_more(), "a fresh query can be paged again");
    }

    #[tokio::test]
    async fn selected_urls_follow_load_order() {
        let server = two_pages_45();
        let mut selection = selection_of(30);
        selection.load_more(&server, "q").await.unwrap();
        selection.deselect_all();
        selection.toggle("v2");
        selection.toggle("v0");

        assert_eq!(
            selection.selected_urls(),
            vec![
                "https://youtube.com/watch?v=v0".to_string(),
                "https://youtube.com/watch?v=v2".to_string(),
            ],
            "payload order is load order, not toggle order"
        );
    }
}
