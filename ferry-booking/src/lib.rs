pub mod allocator;
pub mod finalizer;
pub mod ledger;
pub mod notifications;
pub mod order_ref;
pub mod payment;
pub mod reconciler;
pub mod service;
pub mod session;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use allocator::{AllocationItem, AllocationRequest, AllocationResult};
pub use finalizer::{FinalizeResult, PassengerDataRequest, TicketData};
pub use payment::PaymentInitiation;
pub use reconciler::{PaymentCallback, ReconcileOutcome};
pub use service::{BookingService, BookingSettings};
pub use session::{SessionSnapshot, SweepReport};
