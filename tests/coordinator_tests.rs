/// Debounce and stale-result behavior of the interactive coordinators
///
/// These run against a real mock server, so timings are wall-clock. Bursts
/// stay far inside the debounce window and every wait leaves a wide margin.
use entity_search_api::coordinator::{AutocompleteCoordinator, SearchCoordinator};
use entity_search_api::models::{Address, FilterKey};
use entity_search_api::related::RelatedRecordService;
use entity_search_api::search_gateway::TypesenseClient;
use entity_search_api::services::EntityService;
use entity_search_api::session::{BoundEntity, SessionHandle};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ENTITY_SEARCH: &str = "/collections/entities/documents/search";
const DEBOUNCE: Duration = Duration::from_millis(150);
/// Long enough for any pending debounce and mocked request to finish.
const SETTLE: Duration = Duration::from_millis(1500);

fn create_test_client(base_url: String) -> TypesenseClient {
    TypesenseClient::new(base_url, "test_key".to_string(), Duration::from_secs(5)).unwrap()
}

fn create_test_service(base_url: String) -> EntityService {
    EntityService::new(create_test_client(base_url))
}

fn binding(entity_id: &str) -> BoundEntity {
    BoundEntity {
        entity_id: entity_id.to_string(),
        fiscal_code: "RSSMRA80A01H501U".to_string(),
        role: 0,
        source_system: "massive".to_string(),
        unique_loan_id: "L-1".to_string(),
        entity_data: None,
    }
}

#[tokio::test]
async fn test_typing_burst_sends_one_query_for_final_text() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(ENTITY_SEARCH))
        .and(query_param("q", "Mil"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "found": 1,
            "hits": [{ "document": {
                "entity_id": "e-1",
                "name": "Milani Srl",
                "fiscal_code": "01234567890",
                "source_system": "massive"
            }}]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    // Anything but the final text is a defect.
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "found": 0, "hits": [] })))
        .expect(0)
        .mount(&mock_server)
        .await;

    let coordinator =
        AutocompleteCoordinator::new(create_test_service(mock_server.uri()), DEBOUNCE, 10);

    for text in ["M", "Mi", "Mil"] {
        coordinator.set_input(text);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(SETTLE).await;

    let state = coordinator.state();
    assert_eq!(state.input, "Mil");
    assert_eq!(state.suggestions.len(), 1);
    assert_eq!(state.suggestions[0].name, "Milani Srl");
    assert!(state.show_dropdown);
    assert!(!state.is_loading);
}

#[tokio::test]
async fn test_short_input_clears_without_query() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "found": 0, "hits": [] })))
        .expect(0)
        .mount(&mock_server)
        .await;

    let coordinator =
        AutocompleteCoordinator::new(create_test_service(mock_server.uri()), DEBOUNCE, 10);

    coordinator.set_input("Ro");
    coordinator.set_input("R");
    tokio::time::sleep(SETTLE).await;

    let state = coordinator.state();
    assert!(state.suggestions.is_empty());
    assert!(!state.show_dropdown);
}

#[tokio::test]
async fn test_filter_change_resets_page_and_supersedes_pending_search() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(ENTITY_SEARCH))
        .and(query_param("q", "Rossi"))
        .and(query_param("filter_by", "gender:=F"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "found": 30,
            "hits": [{ "document": {
                "entity_id": "e-1",
                "name": "Anna Rossi",
                "fiscal_code": "RSSNNA85C41H501Y",
                "source_system": "massive"
            }}]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "found": 0, "hits": [] })))
        .expect(0)
        .mount(&mock_server)
        .await;

    let coordinator = SearchCoordinator::new(create_test_service(mock_server.uri()), DEBOUNCE);

    coordinator.set_query("Rossi");
    coordinator.set_page(3);
    coordinator
        .set_filter(FilterKey::Gender, Some("F"))
        .unwrap();
    assert_eq!(coordinator.state().page, 1);

    tokio::time::sleep(SETTLE).await;

    let state = coordinator.state();
    let results = state.results.clone().unwrap();
    assert_eq!(results.found, 30);
    assert_eq!(results.total_pages, 2);
    assert_eq!(state.clusters().len(), 1);
    assert_eq!(state.error, None);
    assert!(!state.is_loading);
}

#[tokio::test]
async fn test_empty_query_and_filters_send_nothing() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "found": 0, "hits": [] })))
        .expect(0)
        .mount(&mock_server)
        .await;

    let coordinator = SearchCoordinator::new(create_test_service(mock_server.uri()), DEBOUNCE);

    coordinator.set_query("   ");
    coordinator.clear_filters();
    tokio::time::sleep(SETTLE).await;

    assert!(coordinator.state().results.is_none());
}

#[tokio::test]
async fn test_index_failure_surfaces_as_state_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(ENTITY_SEARCH))
        .respond_with(ResponseTemplate::new(502))
        .mount(&mock_server)
        .await;

    let coordinator = SearchCoordinator::new(create_test_service(mock_server.uri()), DEBOUNCE);
    coordinator.set_query("Bianchi");
    tokio::time::sleep(SETTLE).await;

    let state = coordinator.state();
    assert!(state.error.is_some());
    assert!(state.results.unwrap().results.is_empty());
}

#[tokio::test]
async fn test_slow_older_search_is_discarded_when_newer_one_lands_first() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(ENTITY_SEARCH))
        .and(query_param("q", "Ros"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(800))
                .set_body_json(json!({
                    "found": 1,
                    "hits": [{ "document": {
                        "entity_id": "old",
                        "name": "Rosa Verdi",
                        "fiscal_code": "VRDRSO70A41F205X",
                        "source_system": "massive"
                    }}]
                })),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path(ENTITY_SEARCH))
        .and(query_param("q", "Rossi"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "found": 1,
            "hits": [{ "document": {
                "entity_id": "new",
                "name": "Mario Rossi",
                "fiscal_code": "RSSMRA80A01H501U",
                "source_system": "massive"
            }}]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let coordinator = SearchCoordinator::new(create_test_service(mock_server.uri()), DEBOUNCE);

    // The first request is in flight when the query changes.
    coordinator.set_query("Ros");
    tokio::time::sleep(Duration::from_millis(400)).await;
    coordinator.set_query("Rossi");
    tokio::time::sleep(SETTLE).await;

    let state = coordinator.state();
    let results = state.results.unwrap();
    assert_eq!(results.results.len(), 1);
    assert_eq!(results.results[0].entity_id, "new");
    assert_eq!(state.query, "Rossi");
    assert!(!state.is_loading);
}

#[tokio::test]
async fn test_related_feed_publishes_only_latest_binding() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/collections/addresses/documents/search"))
        .and(query_param("filter_by", "entity_id:=e-1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(800))
                .set_body_json(json!({
                    "found": 1,
                    "hits": [{ "document": { "entity_id": "e-1", "city": "Roma" } }]
                })),
        )
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/collections/addresses/documents/search"))
        .and(query_param("filter_by", "entity_id:=e-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "found": 1,
            "hits": [{ "document": { "entity_id": "e-2", "city": "Milano" } }]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let session = SessionHandle::new();
    session.bind(binding("e-1"));

    let related = RelatedRecordService::new(create_test_client(mock_server.uri()));
    let (addresses, handle) = related.feed::<Address>(session.subscribe());

    // Rebind while the e-1 fetch is still waiting on the index.
    tokio::time::sleep(Duration::from_millis(200)).await;
    session.bind(binding("e-2"));
    tokio::time::sleep(SETTLE).await;

    {
        let latest = addresses.borrow();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].provenance.entity_id, "e-2");
        assert_eq!(latest[0].address.city.as_deref(), Some("Milano"));
    }

    // Clearing the session empties the list.
    session.clear();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(addresses.borrow().is_empty());

    handle.abort();
}
