use conmon_core::models::{ExtractionConfig, Record, Source, parse_pub_time};
use conmon_db::Database;
use sqlx::postgres::PgPoolOptions;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};
use uuid::Uuid;

/// Spins up a PostgreSQL container and returns a migrated database.
///
/// The `ContainerAsync` must be kept in scope for the test duration;
/// dropping it stops the container.
pub async fn setup_test_db() -> (Database, ContainerAsync<GenericImage>) {
    let container = GenericImage::new("postgres", "16")
        .with_exposed_port(ContainerPort::Tcp(5432))
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_PASSWORD", "postgres")
        .with_env_var("POSTGRES_DB", "conmon_test")
        .start()
        .await
        .expect("Failed to start PostgreSQL container");

    let host = container.get_host().await.expect("Failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("Failed to get port");
    let connection_string = format!("postgresql://postgres:postgres@{host}:{port}/conmon_test");

    // The server restarts once after init; retry until it accepts connections.
    const MAX_RETRIES: u32 = 30;
    let mut retries = 0;
    let pool = loop {
        match PgPoolOptions::new()
            .max_connections(5)
            .connect(&connection_string)
            .await
        {
            Ok(pool) => break pool,
            Err(e) => {
                retries += 1;
                if retries >= MAX_RETRIES {
                    panic!("Failed to connect to database after {MAX_RETRIES} retries: {e}");
                }
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    };

    let db = Database::from_pool(pool);
    db.migrate().await.expect("Failed to run migrations");
    (db, container)
}

pub fn make_source(id: &str) -> Source {
    let config: ExtractionConfig = serde_json::from_value(serde_json::json!({
        "startPage": format!("http://example.org/{id}/list"),
        "itemSelector": "ul.list > li",
        "properties": {
            "url": { "source": "item", "selector": "a", "parser": "[0].href" },
            "title": { "source": "item", "selector": "a" }
        }
    }))
    .expect("valid config");
    Source::new(id, &config).expect("serializable config")
}

pub fn make_record(source_id: &str, url: &str, title: &str) -> Record {
    Record {
        id: Uuid::new_v4(),
        source_id: source_id.to_string(),
        url: url.to_string(),
        title: title.to_string(),
        pub_time: parse_pub_time("2024-03-01").expect("valid date"),
        content: format!("<p>{title}</p>"),
        content_text: title.to_string(),
        created_at: chrono::Utc::now(),
    }
}
