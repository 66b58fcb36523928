//! Stateful drivers for interactive clients: search box, autocomplete and
//! source switching. Each publishes its state through a `watch` channel.

use crate::debounce::Debouncer;
use crate::errors::AppError;
use crate::models::{AutocompleteSuggestion, FilterKey, SearchFilters, SearchOptions, SearchResult};
use crate::resolver::{group_by_fiscal_code, EntityCluster, SelectedSource};
use crate::services::EntityService;
use crate::session::SessionHandle;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// How long the view is flagged as transitioning after a source switch.
pub const TRANSITION_WINDOW: Duration = Duration::from_millis(150);

#[derive(Debug, Clone, PartialEq)]
pub struct SearchState {
    pub query: String,
    pub filters: SearchFilters,
    pub page: u32,
    pub per_page: u32,
    pub is_loading: bool,
    pub results: Option<SearchResult>,
    pub error: Option<String>,
}

impl Default for SearchState {
    fn default() -> Self {
        Self {
            query: String::new(),
            filters: SearchFilters::default(),
            page: 1,
            per_page: 20,
            is_loading: false,
            results: None,
            error: None,
        }
    }
}

impl SearchState {
    /// Neither text nor filters: nothing to search for.
    pub fn is_idle(&self) -> bool {
        self.query.trim().is_empty() && self.filters.is_empty()
    }

    pub fn clusters(&self) -> Vec<EntityCluster> {
        self.results
            .as_ref()
            .map(|r| group_by_fiscal_code(r.results.clone()))
            .unwrap_or_default()
    }

    fn options(&self) -> SearchOptions {
        SearchOptions {
            query: Some(self.query.clone()).filter(|q| !q.trim().is_empty()),
            filters: self.filters.clone(),
            page: self.page,
            per_page: self.per_page,
            sort_by: None,
        }
    }
}

/// Debounced search driven by query, filter and page changes.
///
/// Results of a superseded request are discarded.
pub struct SearchCoordinator {
    entities: EntityService,
    debouncer: Debouncer,
    state: Arc<watch::Sender<SearchState>>,
}

impl SearchCoordinator {
    pub fn new(entities: EntityService, debounce: Duration) -> Self {
        let (tx, _rx) = watch::channel(SearchState::default());
        Self {
            entities,
            debouncer: Debouncer::new(debounce),
            state: Arc::new(tx),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SearchState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> SearchState {
        self.state.borrow().clone()
    }

    pub fn set_query(&self, query: &str) {
        self.state.send_modify(|s| s.query = query.to_string());
        self.schedule();
    }

    /// Filter changes always return to the first page.
    pub fn set_filter(&self, key: FilterKey, raw: Option<&str>) -> Result<(), AppError> {
        let mut filters = self.state.borrow().filters.clone();
        filters.set(key, raw)?;
        self.state.send_modify(|s| {
            s.filters = filters;
            s.page = 1;
        });
        self.schedule();
        Ok(())
    }

    pub fn clear_filters(&self) {
        self.state.send_modify(|s| {
            s.filters = SearchFilters::default();
            s.page = 1;
        });
        self.schedule();
    }

    pub fn set_page(&self, page: u32) {
        self.state.send_modify(|s| s.page = page.max(1));
        self.schedule();
    }

    pub fn cancel(&self) {
        self.debouncer.cancel();
        self.state.send_modify(|s| s.is_loading = false);
    }

    fn schedule(&self) {
        let snapshot = self.state.borrow().clone();
        if snapshot.is_idle() {
            self.cancel();
            return;
        }

        let options = snapshot.options();
        let entities = self.entities.clone();
        let state = Arc::clone(&self.state);
        self.debouncer.schedule(move |token| async move {
            state.send_modify(|s| {
                s.is_loading = true;
                s.error = None;
            });

            let result = entities.search(&options).await;
            if !token.is_current() {
                tracing::debug!("Discarding superseded search for {:?}", options.query);
                return;
            }

            state.send_modify(|s| {
                s.is_loading = false;
                s.error = result.error.clone();
                s.results = Some(result);
            });
        });
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AutocompleteState {
    pub input: String,
    pub suggestions: Vec<AutocompleteSuggestion>,
    pub is_loading: bool,
    pub show_dropdown: bool,
}

/// Debounced suggestions for a text box.
pub struct AutocompleteCoordinator {
    entities: EntityService,
    debouncer: Debouncer,
    limit: usize,
    state: Arc<watch::Sender<AutocompleteState>>,
}

impl AutocompleteCoordinator {
    pub fn new(entities: EntityService, debounce: Duration, limit: usize) -> Self {
        let (tx, _rx) = watch::channel(AutocompleteState::default());
        Self {
            entities,
            debouncer: Debouncer::new(debounce),
            limit,
            state: Arc::new(tx),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<AutocompleteState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> AutocompleteState {
        self.state.borrow().clone()
    }

    /// Short input clears suggestions at once and cancels anything pending.
    pub fn set_input(&self, text: &str) {
        let text = text.to_string();
        self.state.send_modify(|s| s.input = text.clone());

        if !crate::autocomplete::is_searchable(&text) {
            self.debouncer.cancel();
            self.state.send_modify(|s| {
                s.suggestions.clear();
                s.is_loading = false;
                s.show_dropdown = false;
            });
            return;
        }

        let entities = self.entities.clone();
        let state = Arc::clone(&self.state);
        let limit = self.limit;
        self.debouncer.schedule(move |token| async move {
            state.send_modify(|s| s.is_loading = true);

            let suggestions = entities.autocomplete(&text, limit).await;
            if !token.is_current() {
                return;
            }

            state.send_modify(|s| {
                s.is_loading = false;
                s.show_dropdown = !suggestions.is_empty();
                s.suggestions = suggestions;
            });
        });
    }

    pub fn close_dropdown(&self) {
        self.state.send_modify(|s| s.show_dropdown = false);
    }

    pub fn cancel(&self) {
        self.debouncer.cancel();
        self.state.send_modify(|s| s.is_loading = false);
    }
}

/// A detail view over one cluster. Entering binds the session to the
/// primary record; dropping the switch leaves the view and clears it.
pub struct SourceSwitch {
    cluster: Arc<EntityCluster>,
    selected: AtomicUsize,
    session: Arc<SessionHandle>,
    transitioning: Arc<watch::Sender<bool>>,
    window: Debouncer,
}

impl SourceSwitch {
    pub fn enter(cluster: EntityCluster, session: Arc<SessionHandle>) -> Result<Self, AppError> {
        let cluster = Arc::new(cluster);
        session.bind_selected(cluster.select(0)?);

        let (tx, _rx) = watch::channel(false);
        Ok(Self {
            cluster,
            selected: AtomicUsize::new(0),
            session,
            transitioning: Arc::new(tx),
            window: Debouncer::new(TRANSITION_WINDOW),
        })
    }

    pub fn cluster(&self) -> &EntityCluster {
        &self.cluster
    }

    pub fn selected(&self) -> SelectedSource<'_> {
        SelectedSource::clamped(&self.cluster, self.selected.load(Ordering::SeqCst))
    }

    /// Rebinds the session to member `index`. No query is made.
    pub fn switch_to(&self, index: usize) -> Result<(), AppError> {
        let selected = self.cluster.select(index)?;
        self.session.bind_selected(selected);
        self.selected.store(index, Ordering::SeqCst);

        self.transitioning.send_replace(true);
        let transitioning = Arc::clone(&self.transitioning);
        self.window.schedule(move |_| async move {
            transitioning.send_replace(false);
        });
        Ok(())
    }

    pub fn is_transitioning(&self) -> bool {
        *self.transitioning.borrow()
    }

    pub fn transitioning(&self) -> watch::Receiver<bool> {
        self.transitioning.subscribe()
    }
}

impl Drop for SourceSwitch {
    fn drop(&mut self) {
        self.session.clear();
    }
}
