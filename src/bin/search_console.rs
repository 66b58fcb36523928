//! Interactive console over the search layer.
//!
//! Each input line replaces the autocomplete text. Commands:
//! `:open N` opens suggestion N, `:source N` switches the displayed source,
//! `:quit` exits.

use entity_search_api::autocomplete::DEFAULT_LIMIT;
use entity_search_api::config::Config;
use entity_search_api::coordinator::{AutocompleteCoordinator, SourceSwitch};
use entity_search_api::models::{borrower_type_label, Address, Contact};
use entity_search_api::related::RelatedRecordService;
use entity_search_api::search_gateway::TypesenseClient;
use entity_search_api::services::EntityService;
use entity_search_api::session::SessionHandle;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "entity_search_api=warn".into()),
        )
        .init();

    let config = Config::from_env()?;
    let index = TypesenseClient::from_config(&config)?;
    let entities = EntityService::new(index.clone());
    let related = RelatedRecordService::new(index);

    let autocomplete =
        AutocompleteCoordinator::new(entities.clone(), config.debounce(), DEFAULT_LIMIT);
    let mut suggestions = autocomplete.subscribe();
    tokio::spawn(async move {
        while suggestions.changed().await.is_ok() {
            let state = suggestions.borrow_and_update().clone();
            if state.is_loading || !state.show_dropdown {
                continue;
            }
            for (i, s) in state.suggestions.iter().enumerate() {
                println!("  [{}] {} {} ({})", i, s.name, s.fiscal_code, s.source_system);
            }
        }
    });

    let session = Arc::new(SessionHandle::new());
    let (addresses, _address_feed) = related.feed::<Address>(session.subscribe());
    let (contacts, _contact_feed) = related.feed::<Contact>(session.subscribe());
    let mut detail: Option<SourceSwitch> = None;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line == ":quit" {
            break;
        }

        if let Some(arg) = line.strip_prefix(":open ") {
            let Some(choice) = arg
                .trim()
                .parse::<usize>()
                .ok()
                .and_then(|i| autocomplete.state().suggestions.get(i).cloned())
            else {
                println!("no such suggestion");
                continue;
            };
            autocomplete.close_dropdown();
            // Leave the previous view before binding the next one.
            detail = None;
            match entities.get_by_fiscal_code(&choice.fiscal_code).await {
                Ok(cluster) => {
                    let switch = SourceSwitch::enter(cluster, Arc::clone(&session))?;
                    for (i, e) in switch.cluster().all_sources().iter().enumerate() {
                        println!(
                            "  source {}: {} [{}] {}",
                            i,
                            e.source_system,
                            borrower_type_label(e.borrower_type_id),
                            e.unique_loan_id
                        );
                    }
                    detail = Some(switch);
                }
                Err(e) => println!("lookup failed: {}", e),
            }
            continue;
        }

        if let Some(arg) = line.strip_prefix(":source ") {
            let Some(switch) = detail.as_ref() else {
                println!("no entity open");
                continue;
            };
            match arg.trim().parse::<usize>() {
                Ok(index) => match switch.switch_to(index) {
                    Ok(()) => {
                        let selected = switch.selected().entity().clone();
                        println!("showing {} from {}", selected.name, selected.source_system);
                        tokio::time::sleep(config.debounce()).await;
                        println!(
                            "  {} address(es), {} contact(s)",
                            addresses.borrow().len(),
                            contacts.borrow().len()
                        );
                    }
                    Err(e) => println!("{}", e),
                },
                Err(_) => println!("usage: :source N"),
            }
            continue;
        }

        autocomplete.set_input(line);
    }

    Ok(())
}
