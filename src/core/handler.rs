//! Message handler trait and registry
//!
//! Handlers declare which message types they support; the registry keeps
//! an ordered list per type. Registrations happen before the service
//! starts and the registry is read-only afterwards.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;

use super::message::{Message, MessageType};

/// Polymorphic message handler
///
/// `handle` returns `Ok(true)` when the message was consumed; dispatch
/// stops at the first handler that does. `Ok(false)` and `Err` both mean
/// "not consumed" — errors are additionally logged by the dispatcher.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &Message) -> Result<bool>;

    /// Message types this handler wants to see
    fn supported_types(&self) -> Vec<MessageType>;
}

/// Mapping from message type to its handlers, in registration order
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<MessageType, Vec<Arc<dyn MessageHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `handler` to the list of every type it supports
    pub fn register(&mut self, handler: Arc<dyn MessageHandler>) {
        for message_type in handler.supported_types() {
            self.handlers
                .entry(message_type)
                .or_default()
                .push(Arc::clone(&handler));
        }
    }

    /// Handlers for one type, registration order preserved
    pub fn handlers_for(&self, message_type: MessageType) -> &[Arc<dyn MessageHandler>] {
        self.handlers
            .get(&message_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Number of types with at least one handler
    pub fn type_count(&self) -> usize {
        self.handlers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedHandler {
        types: Vec<MessageType>,
    }

    #[async_trait]
    impl MessageHandler for FixedHandler {
        async fn handle(&self, _message: &Message) -> Result<bool> {
            Ok(true)
        }

        fn supported_types(&self) -> Vec<MessageType> {
            self.types.clone()
        }
    }

    #[test]
    fn test_registration_order_preserved() {
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(FixedHandler {
            types: vec![MessageType::DataSync],
        }));
        registry.register(Arc::new(FixedHandler {
            types: vec![MessageType::DataSync, MessageType::RiskAlert],
        }));

        assert_eq!(registry.handlers_for(MessageType::DataSync).len(), 2);
        assert_eq!(registry.handlers_for(MessageType::RiskAlert).len(), 1);
        assert!(registry.handlers_for(MessageType::Heartbeat).is_empty());
        assert_eq!(registry.type_count(), 2);

        // First registered handler comes first for its type.
        let first = &registry.handlers_for(MessageType::DataSync)[0];
        assert_eq!(first.supported_types(), vec![MessageType::DataSync]);
    }
}
