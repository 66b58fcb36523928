/// Integration tests with a mocked search index
/// Exercises search, resolution, loan and related-record queries end to end
/// without a real Typesense node
use entity_search_api::errors::AppError;
use entity_search_api::models::{BorrowerType, Contact, LoanSearchParams, SearchFilters, SearchOptions};
use entity_search_api::related::RelatedRecordService;
use entity_search_api::search_gateway::TypesenseClient;
use entity_search_api::services::EntityService;
use serde_json::{json, Value};
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ENTITY_SEARCH: &str = "/collections/entities/documents/search";

/// Helper function to create a client pointing at the mock index
fn create_test_client(base_url: String) -> TypesenseClient {
    TypesenseClient::new(base_url, "test_key".to_string(), Duration::from_secs(2)).unwrap()
}

fn entity(id: &str, fiscal_code: &str, source: &str, role: i32) -> Value {
    json!({
        "entity_id": id,
        "name": "Mario Rossi",
        "fiscal_code": fiscal_code,
        "source_system": source,
        "borrower_type_id": role,
        "unique_loan_id": "L-1",
        "is_company": false,
        "borrower_id": 10
    })
}

fn hits(found: u64, documents: Vec<Value>) -> Value {
    json!({
        "found": found,
        "hits": documents.into_iter().map(|d| json!({ "document": d })).collect::<Vec<_>>()
    })
}

#[tokio::test]
async fn test_search_overfetches_from_first_index_page() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(ENTITY_SEARCH))
        .and(query_param("q", "Rossi"))
        .and(query_param("query_by", "name,fiscal_code"))
        .and(query_param("per_page", "100"))
        .and(query_param("page", "1"))
        .and(query_param("sort_by", "borrower_id:desc"))
        .and(query_param("filter_by", "gender:=M"))
        .respond_with(ResponseTemplate::new(200).set_body_json(hits(
            45,
            vec![
                entity("e-1", "RSSMRA80A01H501U", "massive", 0),
                entity("e-2", "RSSMRA80A01H501U", "cadastral", 2),
            ],
        )))
        .expect(1)
        .mount(&mock_server)
        .await;

    let service = EntityService::new(create_test_client(mock_server.uri()));
    let options = SearchOptions {
        query: Some("Rossi".to_string()),
        filters: SearchFilters {
            gender: Some("M".to_string()),
            ..Default::default()
        },
        page: 2,
        per_page: 20,
        sort_by: None,
    };

    let result = service.search(&options).await;

    assert!(!result.is_failed());
    assert_eq!(result.results.len(), 2);
    assert_eq!(result.found, 45);
    assert_eq!(result.page, 2);
    assert_eq!(result.total_pages, 3);
}

#[tokio::test]
async fn test_search_failure_yields_empty_page_with_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(ENTITY_SEARCH))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&mock_server)
        .await;

    let service = EntityService::new(create_test_client(mock_server.uri()));
    let result = service.search(&SearchOptions::default()).await;

    assert!(result.results.is_empty());
    assert_eq!(result.found, 0);
    assert_eq!(result.total_pages, 0);
    assert!(result.is_failed());
}

#[tokio::test]
async fn test_search_clusters_groups_by_fiscal_code() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(ENTITY_SEARCH))
        .respond_with(ResponseTemplate::new(200).set_body_json(hits(
            3,
            vec![
                entity("e-1", "AAA", "massive", 0),
                entity("e-2", "BBB", "massive", 0),
                entity("e-3", "AAA", "cadastral", 0),
            ],
        )))
        .mount(&mock_server)
        .await;

    let service = EntityService::new(create_test_client(mock_server.uri()));
    let result = service
        .search_clusters(&SearchOptions {
            query: Some("Rossi".into()),
            ..Default::default()
        })
        .await;

    assert_eq!(result.clusters.len(), 2);
    assert_eq!(result.clusters[0].fiscal_code(), "AAA");
    assert_eq!(result.clusters[0].source_systems(), vec!["massive", "cadastral"]);
    assert_eq!(result.found, 3);
}

#[tokio::test]
async fn test_get_by_id_resolves_whole_cluster() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(ENTITY_SEARCH))
        .and(query_param("filter_by", "entity_id:=e-2"))
        .and(query_param("per_page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(hits(
            1,
            vec![entity("e-2", "RSSMRA80A01H501U", "cadastral", 2)],
        )))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path(ENTITY_SEARCH))
        .and(query_param("filter_by", "fiscal_code:=RSSMRA80A01H501U"))
        .and(query_param("per_page", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(hits(
            3,
            vec![
                entity("e-1", "RSSMRA80A01H501U", "massive", 0),
                entity("e-2", "RSSMRA80A01H501U", "cadastral", 2),
                entity("e-3", "RSSMRA80A01H501U", "recovery", 1),
            ],
        )))
        .expect(1)
        .mount(&mock_server)
        .await;

    let service = EntityService::new(create_test_client(mock_server.uri()));
    let cluster = service.get_by_id("e-2").await.unwrap();

    assert!(cluster.is_merged());
    assert_eq!(cluster.source_count(), 3);
    assert_eq!(cluster.primary().entity_id, "e-1");
    assert_eq!(
        cluster.source_systems(),
        vec!["massive", "cadastral", "recovery"]
    );
}

#[tokio::test]
async fn test_get_by_id_without_fiscal_code_is_singleton() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(ENTITY_SEARCH))
        .and(query_param("filter_by", "entity_id:=e-9"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(hits(1, vec![entity("e-9", "", "massive", 0)])),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let service = EntityService::new(create_test_client(mock_server.uri()));
    let cluster = service.get_by_id("e-9").await.unwrap();

    assert!(!cluster.is_merged());
    assert_eq!(cluster.primary().entity_id, "e-9");
}

#[tokio::test]
async fn test_get_by_id_resolves_with_stored_fiscal_code() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(ENTITY_SEARCH))
        .and(query_param("filter_by", "entity_id:=e-4"))
        .respond_with(ResponseTemplate::new(200).set_body_json(hits(
            1,
            vec![entity("e-4", "rssmra80a01h501u", "recovery", 0)],
        )))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path(ENTITY_SEARCH))
        .and(query_param("filter_by", "fiscal_code:=rssmra80a01h501u"))
        .respond_with(ResponseTemplate::new(200).set_body_json(hits(
            2,
            vec![
                entity("e-4", "rssmra80a01h501u", "recovery", 0),
                entity("e-5", "rssmra80a01h501u", "massive", 0),
            ],
        )))
        .expect(1)
        .mount(&mock_server)
        .await;

    // An upper-cased lookup would miss the stored records.
    Mock::given(method("GET"))
        .and(path(ENTITY_SEARCH))
        .and(query_param("filter_by", "fiscal_code:=RSSMRA80A01H501U"))
        .respond_with(ResponseTemplate::new(200).set_body_json(hits(0, vec![])))
        .expect(0)
        .mount(&mock_server)
        .await;

    let service = EntityService::new(create_test_client(mock_server.uri()));
    let cluster = service.get_by_id("e-4").await.unwrap();

    assert_eq!(cluster.source_count(), 2);
    assert_eq!(cluster.fiscal_code(), "rssmra80a01h501u");
}

#[tokio::test]
async fn test_fiscal_code_lookup_accepts_case_variants_from_index() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(ENTITY_SEARCH))
        .and(query_param("filter_by", "fiscal_code:=RSSMRA80A01H501U"))
        .respond_with(ResponseTemplate::new(200).set_body_json(hits(
            2,
            vec![
                entity("e-1", "RSSMRA80A01H501U", "massive", 0),
                entity("e-2", "rssmra80a01h501u", "cadastral", 0),
            ],
        )))
        .expect(1)
        .mount(&mock_server)
        .await;

    let service = EntityService::new(create_test_client(mock_server.uri()));
    let cluster = service.get_by_fiscal_code("RSSMRA80A01H501U").await.unwrap();

    assert!(cluster.is_merged());
    assert_eq!(cluster.source_systems(), vec!["massive", "cadastral"]);
}

#[tokio::test]
async fn test_related_by_fiscal_code_keeps_case() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/collections/contacts/documents/search"))
        .and(query_param("filter_by", "fiscal_code:=rssmra80a01h501u"))
        .respond_with(ResponseTemplate::new(200).set_body_json(hits(
            1,
            vec![json!({ "entity_id": "e-4", "email": "mario@example.it" })],
        )))
        .expect(1)
        .mount(&mock_server)
        .await;

    let service = RelatedRecordService::new(create_test_client(mock_server.uri()));
    let contacts: Vec<Contact> = service.by_fiscal_code(" rssmra80a01h501u ").await;

    assert_eq!(contacts.len(), 1);
}

#[tokio::test]
async fn test_lookups_distinguish_not_found_from_failure() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(ENTITY_SEARCH))
        .and(query_param("filter_by", "fiscal_code:=NOBODY"))
        .respond_with(ResponseTemplate::new(200).set_body_json(hits(0, vec![])))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path(ENTITY_SEARCH))
        .and(query_param("filter_by", "entity_id:=e-1"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let service = EntityService::new(create_test_client(mock_server.uri()));

    let missing = service.get_by_fiscal_code(" NOBODY ").await.unwrap_err();
    assert!(matches!(missing, AppError::NotFound(_)));

    let failed = service.get_by_id("e-1").await.unwrap_err();
    assert!(failed.is_index_failure());
    assert!(matches!(failed.root(), AppError::SearchFailed(_)));

    let blank = service.get_by_fiscal_code("  ").await.unwrap_err();
    assert!(matches!(blank, AppError::InvalidInput(_)));
}

#[tokio::test]
async fn test_search_by_loan_filters_on_loan_and_role() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(ENTITY_SEARCH))
        .and(query_param("q", "*"))
        .and(query_param("query_by", "name"))
        .and(query_param(
            "filter_by",
            "source_system:=massive && unique_loan_id:=L-1 && borrower_type_id:=2",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(hits(
            1,
            vec![entity("g-1", "GRNLGI70A01F205X", "massive", 2)],
        )))
        .expect(1)
        .mount(&mock_server)
        .await;

    let service = EntityService::new(create_test_client(mock_server.uri()));
    let params = LoanSearchParams::new("massive", "L-1", BorrowerType::Guarantor);

    let page = service.search_by_loan(&params, Some(BorrowerType::Main)).await;

    assert_eq!(page.results.len(), 1);
    assert_eq!(page.results[0].entity_id, "g-1");
    assert_eq!(page.total_pages, 1);
}

#[tokio::test]
async fn test_search_by_loan_excludes_viewer_role() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(hits(0, vec![])))
        .expect(0)
        .mount(&mock_server)
        .await;

    let service = EntityService::new(create_test_client(mock_server.uri()));
    let params = LoanSearchParams::new("massive", "L-1", BorrowerType::Joint);

    let page = service.search_by_loan(&params, Some(BorrowerType::Joint)).await;

    assert!(page.results.is_empty());
    assert!(!page.is_failed());
}

#[tokio::test]
async fn test_autocomplete_dedupes_by_fiscal_code() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(ENTITY_SEARCH))
        .and(query_param("q", "Ross"))
        .and(query_param("per_page", "10"))
        .and(query_param(
            "include_fields",
            "entity_id,name,fiscal_code,source_system",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(hits(
            3,
            vec![
                entity("e-1", "RSSMRA80A01H501U", "massive", 0),
                entity("e-2", "RSSMRA80A01H501U", "cadastral", 0),
                entity("e-3", "RSSLGU75B02F205Z", "massive", 0),
            ],
        )))
        .expect(1)
        .mount(&mock_server)
        .await;

    let service = EntityService::new(create_test_client(mock_server.uri()));

    let suggestions = service.autocomplete("Ross", 5).await;
    assert_eq!(suggestions.len(), 2);
    assert_eq!(suggestions[0].id, "RSSMRA80A01H501U");
    assert_eq!(suggestions[0].source_system, "massive, cadastral");

    // Below the minimum length nothing is sent.
    assert!(service.autocomplete("R", 5).await.is_empty());
}

#[tokio::test]
async fn test_related_records_fetch_single_large_page() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/collections/contacts/documents/search"))
        .and(query_param("q", "*"))
        .and(query_param("query_by", "email,phone_number"))
        .and(query_param("filter_by", "entity_id:=e-1"))
        .and(query_param("per_page", "250"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(hits(
            2,
            vec![
                json!({ "entity_id": "e-1", "email": "mario@example.it", "is_pec": false }),
                json!({ "entity_id": "e-1", "phone_number": "+39061234567", "email": null }),
            ],
        )))
        .expect(1)
        .mount(&mock_server)
        .await;

    let service = RelatedRecordService::new(create_test_client(mock_server.uri()));
    let contacts: Vec<Contact> = service.by_entity_id("e-1").await;

    assert_eq!(contacts.len(), 2);
    assert_eq!(contacts[0].email.as_deref(), Some("mario@example.it"));
    assert_eq!(contacts[1].phone_number.as_deref(), Some("+39061234567"));
}

#[tokio::test]
async fn test_related_records_failure_is_empty() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/collections/contacts/documents/search"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let service = RelatedRecordService::new(create_test_client(mock_server.uri()));
    let contacts: Vec<Contact> = service.by_fiscal_code("RSSMRA80A01H501U").await;

    assert!(contacts.is_empty());
}

#[tokio::test]
async fn test_circuit_opens_after_repeated_index_failures() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(ENTITY_SEARCH))
        .respond_with(ResponseTemplate::new(500))
        .expect(5)
        .mount(&mock_server)
        .await;

    let service = EntityService::new(create_test_client(mock_server.uri()));

    for _ in 0..5 {
        let err = service.get_by_fiscal_code("AAA").await.unwrap_err();
        assert!(matches!(err.root(), AppError::SearchFailed(_)));
    }

    let err = service.get_by_fiscal_code("AAA").await.unwrap_err();
    assert!(matches!(err.root(), AppError::Unavailable(_)));
}
