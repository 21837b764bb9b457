use std::fmt;

/// Where one connection stands in the offer/answer exchange.
///
/// Offering role: `Idle → LocalDescriptorPending → HaveLocalOffer →
/// Connected`. Answering role: `Idle → RemoteDescriptorApplied →
/// LocalDescriptorPending → HaveLocalAnswer → Connected`. `Failed` is
/// terminal and reachable from every other state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Idle,
    LocalDescriptorPending,
    HaveLocalOffer,
    RemoteDescriptorApplied,
    HaveLocalAnswer,
    Connected,
    Failed,
}

impl SignalingState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed)
    }

    /// Whether moving to `next` follows the exchange. Any non-terminal
    /// state may fail.
    pub fn can_advance_to(self, next: Self) -> bool {
        use SignalingState::*;
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (_, Failed) => true,
            (Idle, LocalDescriptorPending) => true,
            (Idle, RemoteDescriptorApplied) => true,
            (RemoteDescriptorApplied, LocalDescriptorPending) => true,
            (LocalDescriptorPending, HaveLocalOffer) => true,
            (LocalDescriptorPending, HaveLocalAnswer) => true,
            // The offerer applies the answer and waits for the link;
            // the answerer only waits for the link.
            (HaveLocalOffer, RemoteDescriptorApplied) => true,
            (HaveLocalOffer | HaveLocalAnswer | RemoteDescriptorApplied, Connected) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SignalingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::LocalDescriptorPending => "gathering",
            Self::HaveLocalOffer => "offer sent",
            Self::RemoteDescriptorApplied => "remote applied",
            Self::HaveLocalAnswer => "answer sent",
            Self::Connected => "connected",
            Self::Failed => "failed",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::SignalingState::*;

    #[test]
    fn offering_path() {
        assert!(Idle.can_advance_to(LocalDescriptorPending));
        assert!(LocalDescriptorPending.can_advance_to(HaveLocalOffer));
        assert!(HaveLocalOffer.can_advance_to(Connected));
    }

    #[test]
    fn answering_path() {
        assert!(Idle.can_advance_to(RemoteDescriptorApplied));
        assert!(RemoteDescriptorApplied.can_advance_to(LocalDescriptorPending));
        assert!(LocalDescriptorPending.can_advance_to(HaveLocalAnswer));
        assert!(HaveLocalAnswer.can_advance_to(Connected));
    }

    #[test]
    fn failed_is_terminal() {
        assert!(Connected.can_advance_to(Failed));
        assert!(!Failed.can_advance_to(Connected));
        assert!(!Failed.can_advance_to(Failed));
        assert!(!Idle.can_advance_to(Connected));
    }
}
