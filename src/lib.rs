pub mod auth;
pub mod comments;
pub mod config;
pub mod core;
pub mod follow;
pub mod graph;
pub mod messages;
pub mod models;
pub mod notifications;
pub mod posts;
pub mod router;
pub mod users;

// === Component entrypoint ===
#[cfg(target_arch = "wasm32")]
#[spin_sdk::http_component]
fn handle(req: spin_sdk::http::Request) -> anyhow::Result<impl spin_sdk::http::IntoResponse> {
    let store = spin_sdk::key_value::Store::open_default()
        .map_err(|e| anyhow::anyhow!("open kv store: {:?}", e))?;

    if crate::config::Settings::from_env().seed_demo_data {
        if let Err(e) = crate::core::db::seed_demo_data(&store) {
            tracing::warn!(error = %e, "demo data seeding failed");
        }
    }

    let resp = crate::router::route(&store, &req);

    // Drain queued notifications once the response is built.
    if let Err(e) = crate::notifications::deliver_pending(&store) {
        tracing::warn!(error = %e, "notification delivery failed");
    }
    Ok(resp)
}
