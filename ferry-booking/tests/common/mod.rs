#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use std::sync::Arc;

use ferry_booking::testing::{FakeGateway, RecordingNotifier};
use ferry_booking::{
    AllocationItem, AllocationRequest, AllocationResult, BookingService, BookingSettings,
    FinalizeResult, PassengerDataRequest, TicketData,
};
use ferry_core::{
    CapacityLedger, ClassId, Customer, FareClass, ManualClock, Schedule, TicketId, TicketType,
};
use ferry_shared::Masked;
use ferry_store::app_config::ExecutorConfig;
use ferry_store::{InMemoryDatabase, InMemoryScheduleLookup, TxExecutor};

pub const SCHEDULE: i64 = 1;
pub const ECONOMY: ClassId = 10;
pub const BUSINESS: ClassId = 20;
pub const CAR: ClassId = 30;
pub const PRICE: i64 = 125_000;

pub struct Harness {
    pub db: InMemoryDatabase,
    pub service: BookingService,
    pub notifier: Arc<RecordingNotifier>,
    pub gateway: Arc<FakeGateway>,
    pub clock: Arc<ManualClock>,
}

pub async fn harness(quotas: &[(ClassId, i64)]) -> Harness {
    let db = InMemoryDatabase::new();
    for &(class_id, total_quota) in quotas {
        db.seed_ledger(CapacityLedger {
            schedule_id: SCHEDULE,
            class_id,
            total_quota,
            unit_price: PRICE,
        })
        .await;
    }

    let lookup = InMemoryScheduleLookup::new();
    lookup.insert_schedule(Schedule {
        id: SCHEDULE,
        ship_alias: "KMP1".into(),
        departure_harbor_alias: "MRK".into(),
        arrival_harbor_alias: "BKH".into(),
        departure_at: Utc.with_ymd_and_hms(2026, 11, 2, 6, 0, 0).unwrap(),
    });
    for (id, alias, ticket_type) in [
        (ECONOMY, "EK", TicketType::Passenger),
        (BUSINESS, "BS", TicketType::Passenger),
        (CAR, "V2", TicketType::Vehicle),
    ] {
        lookup.insert_class(FareClass {
            id,
            alias: alias.into(),
            ticket_type,
        });
    }

    let executor_config = ExecutorConfig {
        initial_delay_ms: 1,
        max_delay_ms: 5,
        ..ExecutorConfig::default()
    };
    let executor = TxExecutor::new(Arc::new(db.clone()), &executor_config);
    let notifier = Arc::new(RecordingNotifier::new());
    let gateway = Arc::new(FakeGateway::new());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap(),
    ));

    let service = BookingService::new(
        executor,
        Arc::new(lookup),
        gateway.clone(),
        notifier.clone(),
        clock.clone(),
        BookingSettings::default(),
    );

    Harness {
        db,
        service,
        notifier,
        gateway,
        clock,
    }
}

pub fn request(items: &[(ClassId, i64)]) -> AllocationRequest {
    AllocationRequest {
        schedule_id: SCHEDULE,
        items: items
            .iter()
            .map(|&(class_id, quantity)| AllocationItem { class_id, quantity })
            .collect(),
    }
}

pub fn customer() -> Customer {
    Customer {
        name: "Putri Lestari".into(),
        id_type: "KTP".into(),
        id_number: Masked::from("3174015505900002"),
        phone_number: Masked::from("+6281298765432"),
        email: Masked::from("putri@example.com"),
    }
}

/// Entry valid for either ticket type.
pub fn ticket_data(ticket_id: TicketId) -> TicketData {
    TicketData {
        ticket_id,
        passenger_name: Some(format!("Traveller {ticket_id}")),
        passenger_age: Some(34),
        id_type: Some("KTP".into()),
        id_number: Some(Masked(format!("31740000{ticket_id:08}"))),
        license_plate: Some(format!("B {ticket_id} FRY")),
        ..TicketData::default()
    }
}

pub fn passenger_data(allocation: &AllocationResult) -> PassengerDataRequest {
    PassengerDataRequest {
        session_token: allocation.session_token,
        customer: customer(),
        tickets: allocation.ticket_ids.iter().copied().map(ticket_data).collect(),
    }
}

impl Harness {
    pub async fn allocate(&self, items: &[(ClassId, i64)]) -> AllocationResult {
        self.service.allocate_tickets(request(items)).await.unwrap()
    }

    pub async fn allocate_and_finalize(&self, items: &[(ClassId, i64)]) -> (AllocationResult, FinalizeResult) {
        let allocation = self.allocate(items).await;
        let finalized = self
            .service
            .submit_passenger_data(passenger_data(&allocation))
            .await
            .unwrap();
        (allocation, finalized)
    }

    pub async fn quota(&self, class_id: ClassId) -> i64 {
        self.db.ledger(SCHEDULE, class_id).await.unwrap().total_quota
    }
}

impl Harness {
    pub fn clock_now(&self) -> chrono::DateTime<Utc> {
        use ferry_core::Clock;
        self.clock.now()
    }
}
