//! AI analysis request handling
//!
//! Remote regions ask for analysis by sending an `ai_analysis` message
//! whose payload carries an `analysisType` and a `requestId`. The handler
//! runs the analysis through an [`AiService`] implementation and replies
//! on the same message type; the reply carries the original `requestId`
//! so the requester's correlator picks it up.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, Weak};
use tracing::{debug, error, warn};

use crate::error::Result;

use super::handler::MessageHandler;
use super::message::{Message, MessageType};
use super::messaging::MessagingService;

/// Analysis backend the handler delegates to
#[async_trait]
pub trait AiService: Send + Sync {
    /// Run one analysis; `analysis_type` selects the model or routine
    async fn analyze(&self, analysis_type: &str, params: &Value) -> Result<Value>;
}

/// Serves `ai_analysis` requests from the peer region
pub struct AiAnalysisHandler {
    // Weak: the messaging service owns this handler through its registry.
    messaging: Weak<MessagingService>,
    ai: Arc<dyn AiService>,
}

impl AiAnalysisHandler {
    pub fn new(messaging: &Arc<MessagingService>, ai: Arc<dyn AiService>) -> Arc<Self> {
        Arc::new(Self {
            messaging: Arc::downgrade(messaging),
            ai,
        })
    }
}

#[async_trait]
impl MessageHandler for AiAnalysisHandler {
    async fn handle(&self, message: &Message) -> Result<bool> {
        let payload = &message.payload;

        // Replies to our own requests also flow through this stream; the
        // correlator already consumed them from the mirror, so absorb.
        if payload.get("result").is_some() || payload.get("success").is_some() {
            debug!(id = %message.id, "Absorbing analysis reply");
            return Ok(true);
        }

        let Some(analysis_type) = payload.get("analysisType").and_then(|v| v.as_str()) else {
            warn!(id = %message.id, "Analysis request without analysisType");
            return Ok(false);
        };
        let params = payload.get("params").cloned().unwrap_or(Value::Null);

        let result = match self.ai.analyze(analysis_type, &params).await {
            Ok(result) => result,
            Err(e) => {
                error!(id = %message.id, analysis_type, error = %e, "Analysis failed");
                return Ok(false);
            }
        };

        if let Some(request_id) = payload.get("requestId").and_then(|v| v.as_str()) {
            let Some(messaging) = self.messaging.upgrade() else {
                warn!(id = %message.id, "Messaging service gone, dropping analysis reply");
                return Ok(false);
            };
            let mut reply = Message::new(
                MessageType::AiAnalysis,
                json!({
                    "requestId": request_id,
                    "result": result,
                    "success": true,
                }),
            );
            if let Some(source) = message.source_region {
                reply = reply.with_target_region(source);
            }
            if !messaging.send_message(reply).await {
                return Ok(false);
            }
        }

        debug!(id = %message.id, analysis_type, "Analysis request served");
        Ok(true)
    }

    fn supported_types(&self) -> Vec<MessageType> {
        vec![MessageType::AiAnalysis]
    }
}
