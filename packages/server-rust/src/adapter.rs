//! The protocol adapter capability shared by the RPC and graph surfaces.

use async_trait::async_trait;
use twinport_core::{ProtocolOrigin, SchemaVersion};

use crate::service::{OperationError, OperationPipeline, Work};

/// Outcome of translating an inbound request.
pub enum Translation<W, R> {
    /// Run `work` through dispatch.
    Dispatch {
        assumed_version: Option<SchemaVersion>,
        work: W,
    },
    /// Answer without touching the domain: undecodable input, unknown
    /// methods, invalid documents and metadata calls.
    Respond(R),
}

/// A protocol surface over the shared dispatch contract.
///
/// Adapters shape requests and responses only. They never decide commit or
/// rollback; that belongs to dispatch.
#[async_trait]
pub trait ProtocolAdapter: Send + Sync {
    type Request: Send + 'static;
    type Work: Work;
    type Response: Send;

    fn origin(&self) -> ProtocolOrigin;

    fn pipeline(&self) -> &OperationPipeline;

    fn translate_request(
        &self,
        request: Self::Request,
    ) -> Translation<Self::Work, Self::Response>;

    fn translate_result(&self, output: <Self::Work as Work>::Output) -> Self::Response;

    fn translate_error(&self, error: &OperationError) -> Self::Response;

    /// Translates, dispatches and renders one request.
    async fn handle(&self, request: Self::Request) -> Self::Response {
        match self.translate_request(request) {
            Translation::Respond(response) => response,
            Translation::Dispatch {
                assumed_version,
                work,
            } => match self
                .pipeline()
                .submit(self.origin(), assumed_version, work)
                .await
            {
                Ok(output) => self.translate_result(output),
                Err(e) => self.translate_error(&e),
            },
        }
    }
}
