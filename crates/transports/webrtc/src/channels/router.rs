//! Two-leg chat channel bookkeeping and inbound routing

use super::messages::ChannelFrame;
use crate::chat::{ChatMessage, ChatVia};
use crate::negotiation::backend::{ChannelDirection, ChannelHandle};
use crate::{Error, Result};
use std::sync::Arc;
use tracing::{debug, warn};

/// Inbound channel text after demultiplexing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutedMessage {
    Chat(ChatMessage),
    Protocol { from: String, payload: String },
}

struct Leg {
    handle: Arc<dyn ChannelHandle>,
    open: bool,
}

/// Owns the outbound and inbound channel legs of one call
///
/// Ready only while both legs exist and are open.
#[derive(Default)]
pub struct ChannelRouter {
    outbound: Option<Leg>,
    inbound: Option<Leg>,
}

impl ChannelRouter {
    pub fn new() -> Self {
        Self::default()
    }

    fn leg_mut(&mut self, direction: ChannelDirection) -> &mut Option<Leg> {
        match direction {
            ChannelDirection::Outbound => &mut self.outbound,
            ChannelDirection::Inbound => &mut self.inbound,
        }
    }

    /// Install a leg, returning the one it replaces
    pub fn attach(
        &mut self,
        direction: ChannelDirection,
        handle: Arc<dyn ChannelHandle>,
    ) -> Option<Arc<dyn ChannelHandle>> {
        let open = handle.is_open();
        debug!(label = handle.label(), ?direction, open, "Attaching channel leg");
        self.leg_mut(direction)
            .replace(Leg { handle, open })
            .map(|leg| leg.handle)
    }

    pub fn has_leg(&self, direction: ChannelDirection) -> bool {
        match direction {
            ChannelDirection::Outbound => self.outbound.is_some(),
            ChannelDirection::Inbound => self.inbound.is_some(),
        }
    }

    /// Record that a leg opened; false unless `channel_id` is the attached leg
    pub fn mark_open(&mut self, direction: ChannelDirection, channel_id: &str) -> bool {
        match self
            .leg_mut(direction)
            .as_mut()
            .filter(|leg| leg.handle.id() == channel_id)
        {
            Some(leg) => {
                leg.open = true;
                true
            }
            None => {
                warn!(?direction, channel_id, "Open event for unknown channel leg");
                false
            }
        }
    }

    /// Drop a closed leg; true if `channel_id` was the attached leg
    ///
    /// Closes of replaced legs are ignored.
    pub fn mark_closed(&mut self, direction: ChannelDirection, channel_id: &str) -> bool {
        let slot = self.leg_mut(direction);
        if slot.as_ref().is_some_and(|leg| leg.handle.id() == channel_id) {
            slot.take();
            true
        } else {
            false
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(
            (&self.outbound, &self.inbound),
            (Some(out), Some(inb)) if out.open && inb.open
        )
    }

    /// Leg used for sending, or [`Error::ChannelNotReady`]
    pub fn sender(&self) -> Result<Arc<dyn ChannelHandle>> {
        match &self.outbound {
            Some(leg) if self.is_ready() => Ok(leg.handle.clone()),
            _ => Err(Error::ChannelNotReady(
                "outbound and inbound legs are not both open".to_string(),
            )),
        }
    }

    /// Demultiplex inbound text into chat or embedded-protocol traffic
    pub fn route_inbound(&self, from: &str, raw: &str) -> RoutedMessage {
        match ChannelFrame::decode(raw) {
            ChannelFrame::Chat(message) => {
                RoutedMessage::Chat(ChatMessage::new(from, message, ChatVia::Channel))
            }
            ChannelFrame::Protocol(payload) => RoutedMessage::Protocol {
                from: from.to_string(),
                payload,
            },
        }
    }

    /// Close and forget both legs
    pub async fn close_all(&mut self) {
        for leg in [self.outbound.take(), self.inbound.take()].into_iter().flatten() {
            if let Err(e) = leg.handle.close().await {
                warn!(label = leg.handle.label(), "Failed to close channel: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeChannel {
        id: String,
        direction: ChannelDirection,
        closed: AtomicBool,
    }

    impl FakeChannel {
        fn new(id: &str, direction: ChannelDirection) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                direction,
                closed: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl ChannelHandle for FakeChannel {
        fn id(&self) -> &str {
            &self.id
        }

        fn label(&self) -> &str {
            "fake"
        }

        fn direction(&self) -> ChannelDirection {
            self.direction
        }

        fn is_open(&self) -> bool {
            false
        }

        async fn send_text(&self, _text: &str) -> Result<()> {
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_ready_needs_both_legs_open() {
        let mut router = ChannelRouter::new();
        assert!(matches!(router.sender(), Err(Error::ChannelNotReady(_))));

        router.attach(
            ChannelDirection::Outbound,
            FakeChannel::new("out", ChannelDirection::Outbound),
        );
        router.mark_open(ChannelDirection::Outbound, "out");
        assert!(!router.is_ready());

        router.attach(
            ChannelDirection::Inbound,
            FakeChannel::new("in", ChannelDirection::Inbound),
        );
        assert!(!router.is_ready());
        router.mark_open(ChannelDirection::Inbound, "in");
        assert!(router.is_ready());
        assert!(router.sender().is_ok());

        assert!(router.mark_closed(ChannelDirection::Inbound, "in"));
        assert!(!router.is_ready());
        assert!(matches!(router.sender(), Err(e) if e.is_transport_not_ready()));
    }

    #[test]
    fn test_mark_open_without_leg() {
        let mut router = ChannelRouter::new();
        assert!(!router.mark_open(ChannelDirection::Inbound, "in"));
        assert!(!router.mark_closed(ChannelDirection::Inbound, "in"));
    }

    #[test]
    fn test_close_of_replaced_leg_is_ignored() {
        let mut router = ChannelRouter::new();
        router.attach(
            ChannelDirection::Outbound,
            FakeChannel::new("out", ChannelDirection::Outbound),
        );
        router.mark_open(ChannelDirection::Outbound, "out");
        router.attach(
            ChannelDirection::Inbound,
            FakeChannel::new("first", ChannelDirection::Inbound),
        );
        router.mark_open(ChannelDirection::Inbound, "first");

        let replaced = router.attach(
            ChannelDirection::Inbound,
            FakeChannel::new("second", ChannelDirection::Inbound),
        );
        assert_eq!(replaced.map(|leg| leg.id().to_string()).as_deref(), Some("first"));

        // Late events from the replaced leg touch nothing
        assert!(!router.mark_open(ChannelDirection::Inbound, "first"));
        assert!(!router.is_ready());
        assert!(router.mark_open(ChannelDirection::Inbound, "second"));
        assert!(router.is_ready());

        assert!(!router.mark_closed(ChannelDirection::Inbound, "first"));
        assert!(router.has_leg(ChannelDirection::Inbound));
        assert!(router.is_ready());
    }

    #[test]
    fn test_route_inbound() {
        let router = ChannelRouter::new();
        assert_eq!(
            router.route_inbound("bob", r#"{"kind":"chat","payload":"hi"}"#),
            RoutedMessage::Chat(ChatMessage::new("bob", "hi", ChatVia::Channel))
        );
        assert_eq!(
            router.route_inbound("bob", r#"{"kind":"protocol","payload":"p"}"#),
            RoutedMessage::Protocol {
                from: "bob".to_string(),
                payload: "p".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_close_all_closes_legs() {
        let outbound = FakeChannel::new("out", ChannelDirection::Outbound);
        let inbound = FakeChannel::new("in", ChannelDirection::Inbound);

        let mut router = ChannelRouter::new();
        router.attach(ChannelDirection::Outbound, outbound.clone());
        router.attach(ChannelDirection::Inbound, inbound.clone());
        router.close_all().await;

        assert!(outbound.closed.load(Ordering::SeqCst));
        assert!(inbound.closed.load(Ordering::SeqCst));
        assert!(!router.has_leg(ChannelDirection::Outbound));
    }
}
