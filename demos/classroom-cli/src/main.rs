//! Classroom CLI - end-to-end walk through the client stack.
//!
//! Signs in, lists classes through the query cache (cold load, then a cached
//! read with background revalidation) and prints the collected metrics.
//!
//! # Running the Demo
//!
//! ```bash
//! LMS_EMAIL=guru@sekolah.id LMS_PASSWORD=rahasia cargo run -p classroom-cli
//! ```
//!
//! Configuration is read from the environment (and `.env`, if present); see
//! `ClientConfig::from_env` for the variables.

#![allow(missing_docs)]

use anyhow::Context;
use lms_client::models::ClassRecord;
use lms_client::resources::CLASSES;
use lms_client::{ApiClient, ClientConfig, ClientError, Credentials, ListParams};
use lms_core::{MemorySessionStore, Navigator};
use lms_query::{Query, QueryCache, QueryOptions};
use lms_runtime::metrics::MetricsRecorder;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// A terminal has no router; redirects become log lines.
struct LogNavigator {
    path: Mutex<String>,
}

impl Navigator for LogNavigator {
    fn current_path(&self) -> String {
        self.path
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn redirect(&self, path: &str) {
        tracing::warn!(to = path, "Redirect requested");
        *self.path.lock().unwrap_or_else(PoisonError::into_inner) = path.to_string();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,lms_client=debug,lms_query=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut recorder = MetricsRecorder::new();
    recorder.install()?;

    let config = ClientConfig::from_env();
    tracing::info!(base_url = config.base_url(), "Starting classroom CLI");

    let navigator = Arc::new(LogNavigator {
        path: Mutex::new("/sign-in".to_string()),
    });
    let client = ApiClient::new(config, Arc::new(MemorySessionStore::new()), navigator.clone())?;

    let email = std::env::var("LMS_EMAIL").context("LMS_EMAIL is not set")?;
    let password = std::env::var("LMS_PASSWORD").context("LMS_PASSWORD is not set")?;
    match client.login(&Credentials::new(email, password)).await {
        Ok(user) => tracing::info!(user = %user.name, role = ?user.role, "Signed in"),
        Err(err) => {
            for (field, message) in err.field_errors() {
                tracing::error!(field = %field, message = %message, "Invalid input");
            }
            anyhow::bail!("Sign-in failed: {}", err.message());
        }
    }
    *navigator.path.lock().unwrap_or_else(PoisonError::into_inner) = "/kelas".to_string();

    let cache = QueryCache::new();
    let params = ListParams::new().limit(20);
    let fetch_client = client.clone();
    let fetch_params = params.clone();
    let classes = Query::new(
        cache.clone(),
        CLASSES.list_key(&params),
        QueryOptions::default().stale_time(Duration::from_secs(30)),
        move |_key| {
            let client = fetch_client.clone();
            let params = fetch_params.clone();
            async move { client.list::<ClassRecord>(CLASSES, &params).await }
        },
    )
    .retry_if(ClientError::is_retryable);

    let page = classes
        .refetch()
        .await
        .map_err(|err| anyhow::anyhow!(err.message()))?;
    for class in &page.data {
        println!("{:>6}  {}", class.id.to_string(), class.name);
    }
    println!("page {} of {}", page.pagination.page, page.pagination.total_pages);

    // Fresh for 30s: served from the cache, no request.
    let cached = classes.revalidate();
    tracing::info!(
        stale = cached.snapshot.is_stale,
        fetching = cached.task.is_some(),
        "Second read"
    );

    client.logout();

    if let Some(text) = recorder.render() {
        println!("\n{text}");
    }
    Ok(())
}
