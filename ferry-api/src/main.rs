use anyhow::Context;
use chrono::{Duration as ChronoDuration, Utc};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ferry_api::gateway::HttpPaymentGateway;
use ferry_api::notifier::LoggingNotifier;
use ferry_api::{app, worker, AppState};
use ferry_booking::{BookingService, BookingSettings};
use ferry_core::{
    CapacityLedger, Database, FareClass, Schedule, ScheduleLookup, SystemClock, TicketType,
};
use ferry_store::app_config::{Config, StorageBackend};
use ferry_store::{DbClient, InMemoryDatabase, InMemoryScheduleLookup, PgScheduleLookup, TxExecutor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "ferry_api=debug,ferry_booking=debug,ferry_store=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("failed to load config")?;
    tracing::info!(storage = ?config.storage, "starting ferry api on port {}", config.server.port);

    let (db, lookup): (Arc<dyn Database>, Arc<dyn ScheduleLookup>) = match config.storage {
        StorageBackend::Postgres => {
            let client = DbClient::new(&config.database, &config.executor)
                .await
                .context("failed to connect to postgres")?;
            client.migrate().await.context("failed to run migrations")?;
            let lookup = PgScheduleLookup::new(client.pool.clone());
            (Arc::new(client), Arc::new(lookup))
        }
        StorageBackend::Memory => {
            tracing::warn!("using in-memory storage; state is lost on restart");
            let (db, lookup) = demo_store().await;
            (Arc::new(db), Arc::new(lookup))
        }
    };

    let executor = TxExecutor::new(db, &config.executor);
    let gateway = HttpPaymentGateway::new(&config.payment).context("failed to build payment client")?;
    let service = BookingService::new(
        executor,
        lookup,
        Arc::new(gateway),
        Arc::new(LoggingNotifier::new(config.notifier.from_address.clone())),
        Arc::new(SystemClock),
        BookingSettings::from(&config.reservation),
    );

    tokio::spawn(worker::start_expiry_worker(
        service.clone(),
        Duration::from_secs(config.reservation.sweep_interval_secs.max(1)),
    ));

    let app = app(AppState::new(service));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

/// One sailing with an economy, a business and a vehicle class.
async fn demo_store() -> (InMemoryDatabase, InMemoryScheduleLookup) {
    let db = InMemoryDatabase::new();
    let lookup = InMemoryScheduleLookup::new();

    lookup.insert_schedule(Schedule {
        id: 1,
        ship_alias: "KMP1".into(),
        departure_harbor_alias: "MRK".into(),
        arrival_harbor_alias: "BKH".into(),
        departure_at: Utc::now() + ChronoDuration::days(7),
    });
    for (id, alias, ticket_type, quota, price) in [
        (1, "EK", TicketType::Passenger, 200, 25_000),
        (2, "BS", TicketType::Passenger, 40, 65_000),
        (3, "V2", TicketType::Vehicle, 30, 120_000),
    ] {
        lookup.insert_class(FareClass {
            id,
            alias: alias.into(),
            ticket_type,
        });
        db.seed_ledger(CapacityLedger {
            schedule_id: 1,
            class_id: id,
            total_quota: quota,
            unit_price: price,
        })
        .await;
    }

    (db, lookup)
}
