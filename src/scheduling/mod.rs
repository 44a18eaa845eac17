pub mod availability;
pub mod lifecycle;

pub use availability::{
    available_slots, check_slot, AvailabilityError, Interval, SlotGrid, SlotRejection,
};
pub use lifecycle::AppointmentStatus;
