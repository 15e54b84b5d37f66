//! The completion gateway: the boundary to the upstream text provider.
//!
//! Everything the pipeline wants from a model is "prompt in, text out". The
//! trait keeps providers swappable and lets tests script completions without
//! a network.

mod http;

pub use http::{GatewayConfig, HttpGateway};

use anyhow::Result;
use async_trait::async_trait;

/// One prompt sent upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    /// Optional system framing prepended to the conversation.
    pub system: Option<String>,
    /// The user prompt.
    pub prompt: String,
    /// Upper bound on generated tokens.
    pub max_tokens: u32,
}

/// Adapter interface for completion providers.
///
/// The trait is object-safe so surfaces can hold an `Arc<dyn
/// CompletionGateway>` chosen at startup.
#[async_trait]
pub trait CompletionGateway: Send + Sync {
    /// Short provider name, used in logs.
    fn name(&self) -> &str;

    /// Run one completion to finish and return its raw text. Failures are
    /// returned untyped; classification happens at the call site, where it
    /// is known whether the chain falls through or the run aborts.
    async fn complete(&self, request: CompletionRequest) -> Result<String>;
}

// Compile-time assertion: CompletionGateway must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn CompletionGateway) {}
};

#[cfg(test)]
mod tests {
    use super::*;

    /// A gateway that answers every prompt with the same canned text.
    struct CannedGateway(String);

    #[async_trait]
    impl CompletionGateway for CannedGateway {
        fn name(&self) -> &str {
            "canned"
        }

        async fn complete(&self, _request: CompletionRequest) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn trait_objects_dispatch() {
        let gateway: Box<dyn CompletionGateway> = Box::new(CannedGateway("ok".to_string()));
        assert_eq!(gateway.name(), "canned");
        let text = gateway
            .complete(CompletionRequest {
                system: None,
                prompt: "hello".to_string(),
                max_tokens: 16,
            })
            .await
            .unwrap();
        assert_eq!(text, "ok");
    }
}
