use ferry_booking::BookingService;

#[derive(Clone)]
pub struct AppState {
    pub booking: BookingService,
}

impl AppState {
    pub fn new(booking: BookingService) -> Self {
        Self { booking }
    }
}
