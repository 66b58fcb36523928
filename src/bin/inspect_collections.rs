//! Utility to list the index collections and their document counts.

use entity_search_api::config::Config;
use entity_search_api::search_gateway::TypesenseClient;

/// Main entry point for the collection inspection utility.
///
/// Reads the index location from the environment and prints every collection.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let client = TypesenseClient::from_config(&config)?;

    if !client.health().await {
        anyhow::bail!("Search index at {} is not healthy", client.base_url());
    }

    let mut collections = client.list_collections().await?;
    collections.sort_by(|a, b| a.name.cmp(&b.name));

    println!("Found {} collection(s) at {}:", collections.len(), client.base_url());
    for collection in &collections {
        println!("- {}: {} document(s)", collection.name, collection.num_documents);
    }

    Ok(())
}
