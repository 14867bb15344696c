use ferry_core::{Booking, PaymentStatus, Ticket, TicketType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub html: String,
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn ticket_row(ticket: &Ticket) -> String {
    let (holder, detail) = match ticket.ticket_type {
        TicketType::Passenger => (
            ticket.passenger.as_ref().map(|p| p.name.as_str()).unwrap_or("-"),
            ticket.seat_number.as_deref().unwrap_or("-"),
        ),
        TicketType::Vehicle => ("Vehicle", ticket.license_plate.as_deref().unwrap_or("-")),
    };
    format!(
        "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
        ticket.id,
        escape(holder),
        escape(detail)
    )
}

pub fn booking_confirmed(booking: &Booking, tickets: &[Ticket]) -> Email {
    let rows: String = tickets.iter().map(ticket_row).collect();
    let total: i64 = tickets.iter().map(|t| t.price).sum();

    Email {
        to: booking.customer.email.expose().to_string(),
        subject: format!("Booking {} confirmed", booking.order_id),
        html: format!(
            "<p>Dear {},</p>\
             <p>Your payment was received and booking <strong>{}</strong> is confirmed.</p>\
             <table><tr><th>Ticket</th><th>Holder</th><th>Seat / Plate</th></tr>{}</table>\
             <p>Total paid: {}</p>",
            escape(&booking.customer.name),
            escape(&booking.order_id),
            rows,
            total
        ),
    }
}

/// Status-specific reason shown in the failure e-mail.
pub fn failure_reason(status: PaymentStatus) -> &'static str {
    match status {
        PaymentStatus::Expired => "the payment window closed before payment was received",
        PaymentStatus::Refund => "the payment was refunded",
        _ => "the payment could not be completed",
    }
}

pub fn payment_failed(booking: &Booking, status: PaymentStatus) -> Email {
    Email {
        to: booking.customer.email.expose().to_string(),
        subject: format!("Booking {} was not completed", booking.order_id),
        html: format!(
            "<p>Dear {},</p>\
             <p>Booking <strong>{}</strong> was cancelled because {}.</p>\
             <p>The reserved tickets have been released. You are welcome to book again.</p>",
            escape(&booking.customer.name),
            escape(&booking.order_id),
            failure_reason(status)
        ),
    }
}
