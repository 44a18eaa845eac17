//! Appointment status machine. Transitions not listed here are rejected.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppointmentStatus {
    Draft,
    InviteSent,
    Booked,
    Completed,
    NoShow,
    Cancelled,
}

impl AppointmentStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Draft => "DRAFT",
            AppointmentStatus::InviteSent => "INVITE_SENT",
            AppointmentStatus::Booked => "BOOKED",
            AppointmentStatus::Completed => "COMPLETED",
            AppointmentStatus::NoShow => "NO_SHOW",
            AppointmentStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "DRAFT" => Some(AppointmentStatus::Draft),
            "INVITE_SENT" => Some(AppointmentStatus::InviteSent),
            "BOOKED" => Some(AppointmentStatus::Booked),
            "COMPLETED" => Some(AppointmentStatus::Completed),
            "NO_SHOW" => Some(AppointmentStatus::NoShow),
            "CANCELLED" => Some(AppointmentStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::NoShow | AppointmentStatus::Cancelled
        )
    }

    /// Booked→Booked is the reschedule case and re-validates availability
    /// at the call site.
    pub fn can_transition(self, next: AppointmentStatus) -> bool {
        use AppointmentStatus::*;
        matches!(
            (self, next),
            (Draft, InviteSent)
                | (Draft, Cancelled)
                | (InviteSent, Booked)
                | (InviteSent, Cancelled)
                | (Booked, Booked)
                | (Booked, Completed)
                | (Booked, NoShow)
                | (Booked, Cancelled)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::AppointmentStatus::*;

    #[test]
    fn happy_path_transitions_are_permitted() {
        assert!(Draft.can_transition(InviteSent));
        assert!(InviteSent.can_transition(Booked));
        assert!(Booked.can_transition(Booked));
        assert!(Booked.can_transition(Completed));
        assert!(Booked.can_transition(NoShow));
        assert!(Booked.can_transition(Cancelled));
        assert!(InviteSent.can_transition(Cancelled));
    }

    #[test]
    fn terminal_states_permit_nothing() {
        for terminal in [Completed, NoShow, Cancelled] {
            assert!(terminal.is_terminal());
            for next in [Draft, InviteSent, Booked, Completed, NoShow, Cancelled] {
                assert!(!terminal.can_transition(next));
            }
        }
    }

    #[test]
    fn skipping_the_invite_is_rejected() {
        assert!(!Draft.can_transition(Booked));
        assert!(!Draft.can_transition(Completed));
        assert!(!InviteSent.can_transition(Completed));
    }

    #[test]
    fn round_trips_through_strings() {
        for status in [Draft, InviteSent, Booked, Completed, NoShow, Cancelled] {
            assert_eq!(super::AppointmentStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(super::AppointmentStatus::parse("UNKNOWN"), None);
    }
}
