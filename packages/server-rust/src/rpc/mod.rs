//! Typed RPC surface.
//!
//! One `MsgPack` request message in, one response message and one
//! [`RpcStatus`] out. Every domain method runs as a single
//! [`DomainRequest`] through the shared pipeline; `Reflect` and
//! `ServerInfo` are answered locally.

pub mod messages;
pub mod methods;
pub mod status;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use tracing::{error, warn};
use twinport_core::{
    Access, DomainError, DomainRequest, FieldRef, OperationResult, ProtocolOrigin, SchemaVersion,
    BUILT_AGAINST,
};

use self::messages::{
    AccountList, AccountMessage, BalanceResponse, DeleteUserResponse, PaymentList,
    PaymentResponse, ReflectResponse, ServerInfoResponse, UserList, UserMessage,
};
pub use self::methods::Method;
pub use self::status::RpcStatus;
use crate::adapter::{ProtocolAdapter, Translation};
use crate::service::{DomainSession, OperationError, OperationPipeline, Work};

/// An inbound call as received from the transport.
#[derive(Debug, Clone)]
pub struct RpcCall {
    pub method: String,
    /// Schema version the client was built against, if it said.
    pub schema_version: Option<SchemaVersion>,
    pub payload: Bytes,
}

/// An outbound reply. `body` is empty unless `status` is `Ok`.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcResponse {
    pub status: RpcStatus,
    pub message: String,
    pub body: Bytes,
}

impl RpcResponse {
    fn ok(body: Vec<u8>) -> Self {
        Self {
            status: RpcStatus::Ok,
            message: String::new(),
            body: Bytes::from(body),
        }
    }

    fn fail(status: RpcStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            body: Bytes::new(),
        }
    }
}

/// One RPC method's domain work. Carries the method so the result is shaped
/// into that method's response message.
#[derive(Debug)]
pub struct RpcWork {
    method: Method,
    request: DomainRequest,
}

#[async_trait]
impl Work for RpcWork {
    type Output = (Method, OperationResult);

    fn name(&self) -> &'static str {
        self.method.name()
    }

    fn access(&self) -> Access {
        self.request.access()
    }

    fn written_fields(&self) -> Vec<FieldRef> {
        self.request.written_fields()
    }

    async fn run(
        self,
        session: &mut DomainSession<'_>,
    ) -> Result<(Method, OperationResult), DomainError> {
        let out = session.call(self.request).await?;
        Ok((self.method, out))
    }
}

/// The RPC protocol adapter.
pub struct RpcAdapter {
    pipeline: OperationPipeline,
}

impl RpcAdapter {
    #[must_use]
    pub fn new(pipeline: OperationPipeline) -> Self {
        Self { pipeline }
    }

    fn reflect(&self) -> RpcResponse {
        encode(&ReflectResponse {
            built_against: BUILT_AGAINST.0,
            methods: Method::ALL.iter().map(|m| m.descriptor()).collect(),
        })
    }

    fn server_info(&self) -> RpcResponse {
        let Some(active) = self.pipeline.dispatcher().schema().active_version() else {
            return RpcResponse::fail(RpcStatus::Unavailable, "schema not loaded");
        };
        encode(&ServerInfoResponse {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            built_against: BUILT_AGAINST.0,
            active: active.0,
        })
    }
}

#[async_trait]
impl ProtocolAdapter for RpcAdapter {
    type Request = RpcCall;
    type Work = RpcWork;
    type Response = RpcResponse;

    fn origin(&self) -> ProtocolOrigin {
        ProtocolOrigin::Rpc
    }

    fn pipeline(&self) -> &OperationPipeline {
        &self.pipeline
    }

    fn translate_request(&self, call: RpcCall) -> Translation<RpcWork, RpcResponse> {
        let Some(method) = Method::parse(&call.method) else {
            return Translation::Respond(RpcResponse::fail(
                RpcStatus::Unimplemented,
                format!("unknown method {}", call.method),
            ));
        };
        match method {
            Method::Reflect => Translation::Respond(self.reflect()),
            Method::ServerInfo => Translation::Respond(self.server_info()),
            _ => match method.decode(&call.payload) {
                Ok(request) => Translation::Dispatch {
                    assumed_version: call.schema_version,
                    work: RpcWork { method, request },
                },
                Err(message) => {
                    Translation::Respond(RpcResponse::fail(RpcStatus::InvalidArgument, message))
                }
            },
        }
    }

    fn translate_result(&self, (method, output): (Method, OperationResult)) -> RpcResponse {
        match shape(method, output) {
            Ok(response) => response,
            Err(e) => {
                error!(method = method.name(), error = %e, "failed to shape rpc response");
                RpcResponse::fail(RpcStatus::Internal, e.public_message())
            }
        }
    }

    fn translate_error(&self, error: &OperationError) -> RpcResponse {
        let (status, message) = RpcStatus::for_error(error);
        if status == RpcStatus::Internal {
            error!(error = %error, "rpc call failed");
        }
        RpcResponse::fail(status, message)
    }
}

/// Builds `method`'s response message from the domain result.
fn shape(method: Method, output: OperationResult) -> Result<RpcResponse, DomainError> {
    Ok(match method {
        Method::CreateUser
        | Method::GetUser
        | Method::FindUserByName
        | Method::FindUserByEmail
        | Method::UpdateUser => encode(&UserMessage::try_from(&output.into_entity()?)?),
        Method::ListUsers => encode(&UserList {
            users: convert_all(&output.into_entities()?)?,
        }),
        Method::DeleteUser => match output {
            OperationResult::Removed { id, .. } => encode(&DeleteUserResponse {
                id: id.0,
                deleted: true,
            }),
            other => return Err(DomainError::internal(format!("unexpected {other:?}"))),
        },
        Method::OpenAccount
        | Method::GetAccount
        | Method::RenameAccount
        | Method::ChangeAccountState => encode(&AccountMessage::try_from(&output.into_entity()?)?),
        Method::ListAccounts => encode(&AccountList {
            accounts: convert_all(&output.into_entities()?)?,
        }),
        Method::GetBalance => encode(&BalanceResponse::try_from(&output.into_entity()?)?),
        Method::ProcessPayment | Method::GetPayment => {
            encode(&PaymentResponse::try_from(&output.into_entity()?)?)
        }
        Method::ListPayments => encode(&PaymentList {
            payments: convert_all(&output.into_entities()?)?,
        }),
        Method::Reflect | Method::ServerInfo => {
            return Err(DomainError::internal("metadata methods are not dispatched"));
        }
    })
}

fn convert_all<'a, T>(rows: &'a [twinport_core::Entity]) -> Result<Vec<T>, DomainError>
where
    T: TryFrom<&'a twinport_core::Entity, Error = DomainError>,
{
    rows.iter().map(T::try_from).collect()
}

fn encode<T: Serialize>(message: &T) -> RpcResponse {
    match rmp_serde::to_vec_named(message) {
        Ok(body) => RpcResponse::ok(body),
        Err(e) => {
            warn!(error = %e, "rpc response encoding failed");
            RpcResponse::fail(RpcStatus::Internal, "internal error")
        }
    }
}
