//! The RPC method table.
//!
//! Each method declares its request and response messages and the domain
//! failure statuses it may return. `Reflect` renders this table.

use serde::de::DeserializeOwned;
use twinport_core::money::parse_amount;
use twinport_core::{DomainRequest, EntityId, UserFilter};

use super::messages::{
    ChangeAccountStateRequest, CreateUserRequest, DeleteUserRequest, FindUserByEmailRequest,
    FindUserByNameRequest, GetAccountRequest, GetBalanceRequest, GetPaymentRequest,
    GetUserRequest, ListAccountsRequest, ListPaymentsRequest, ListUsersRequest, MethodDescriptor,
    OpenAccountRequest, PaymentRequest, RenameAccountRequest, UpdateUserRequest,
};
use super::status::RpcStatus;

macro_rules! rpc_methods {
    ($(
        $method:ident($request:ident) -> $response:ident, mutates = $mutates:literal,
            errors = [$($status:ident),*];
    )*) => {
        /// Every method served on `/rpc/{method}`.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Method {
            $($method,)*
        }

        impl Method {
            pub const ALL: &'static [Method] = &[$(Method::$method,)*];

            #[must_use]
            pub fn name(self) -> &'static str {
                match self {
                    $(Method::$method => stringify!($method),)*
                }
            }

            #[must_use]
            pub fn parse(name: &str) -> Option<Self> {
                match name {
                    $(stringify!($method) => Some(Method::$method),)*
                    _ => None,
                }
            }

            #[must_use]
            pub fn descriptor(self) -> MethodDescriptor {
                match self {
                    $(Method::$method => MethodDescriptor {
                        name: stringify!($method).to_string(),
                        request: stringify!($request).to_string(),
                        response: stringify!($response).to_string(),
                        errors: vec![$(RpcStatus::$status.as_str().to_string()),*],
                        mutates: $mutates,
                    },)*
                }
            }
        }
    };
}

rpc_methods! {
    CreateUser(CreateUserRequest) -> UserMessage, mutates = true,
        errors = [InvalidArgument, Aborted, FailedPrecondition];
    GetUser(GetUserRequest) -> UserMessage, mutates = false,
        errors = [NotFound];
    FindUserByName(FindUserByNameRequest) -> UserMessage, mutates = false,
        errors = [NotFound];
    FindUserByEmail(FindUserByEmailRequest) -> UserMessage, mutates = false,
        errors = [NotFound];
    ListUsers(ListUsersRequest) -> UserList, mutates = false,
        errors = [];
    UpdateUser(UpdateUserRequest) -> UserMessage, mutates = true,
        errors = [NotFound, InvalidArgument, Aborted, FailedPrecondition];
    DeleteUser(DeleteUserRequest) -> DeleteUserResponse, mutates = true,
        errors = [NotFound, InvalidArgument, Aborted];
    OpenAccount(OpenAccountRequest) -> AccountMessage, mutates = true,
        errors = [NotFound, InvalidArgument, Aborted, FailedPrecondition];
    GetAccount(GetAccountRequest) -> AccountMessage, mutates = false,
        errors = [NotFound];
    ListAccounts(ListAccountsRequest) -> AccountList, mutates = false,
        errors = [];
    GetBalance(GetBalanceRequest) -> BalanceResponse, mutates = false,
        errors = [NotFound];
    RenameAccount(RenameAccountRequest) -> AccountMessage, mutates = true,
        errors = [NotFound, InvalidArgument, Aborted, FailedPrecondition];
    ChangeAccountState(ChangeAccountStateRequest) -> AccountMessage, mutates = true,
        errors = [NotFound, InvalidArgument, Aborted, FailedPrecondition];
    ProcessPayment(PaymentRequest) -> PaymentResponse, mutates = true,
        errors = [NotFound, InvalidArgument, Aborted, FailedPrecondition];
    GetPayment(GetPaymentRequest) -> PaymentResponse, mutates = false,
        errors = [NotFound];
    ListPayments(ListPaymentsRequest) -> PaymentList, mutates = false,
        errors = [];
    Reflect(Empty) -> ReflectResponse, mutates = false,
        errors = [];
    ServerInfo(Empty) -> ServerInfoResponse, mutates = false,
        errors = [];
}

impl Method {
    /// Methods answered by the adapter itself, without a transaction scope.
    #[must_use]
    pub fn is_meta(self) -> bool {
        matches!(self, Self::Reflect | Self::ServerInfo)
    }

    /// Decodes `payload` into the domain request this method runs.
    ///
    /// # Errors
    ///
    /// Returns a caller-safe message if the payload does not decode, an
    /// argument is malformed, or the method is a metadata call.
    pub fn decode(self, payload: &[u8]) -> Result<DomainRequest, String> {
        let id = EntityId;
        Ok(match self {
            Self::CreateUser => {
                let r: CreateUserRequest = decode(payload)?;
                DomainRequest::CreateUser {
                    name: r.name,
                    email: r.email,
                }
            }
            Self::GetUser => DomainRequest::GetUser {
                id: id(decode::<GetUserRequest>(payload)?.id),
            },
            Self::FindUserByName => DomainRequest::FindUserByName {
                name: decode::<FindUserByNameRequest>(payload)?.name,
            },
            Self::FindUserByEmail => DomainRequest::FindUserByEmail {
                email: decode::<FindUserByEmailRequest>(payload)?.email,
            },
            Self::ListUsers => {
                // An empty body lists everyone.
                let r: ListUsersRequest = if payload.is_empty() {
                    ListUsersRequest::default()
                } else {
                    decode(payload)?
                };
                DomainRequest::ListUsers {
                    filter: UserFilter {
                        name_contains: r.name_contains,
                    },
                }
            }
            Self::UpdateUser => {
                let r: UpdateUserRequest = decode(payload)?;
                DomainRequest::UpdateUser {
                    id: id(r.id),
                    name: r.name,
                    email: r.email,
                }
            }
            Self::DeleteUser => DomainRequest::DeleteUser {
                id: id(decode::<DeleteUserRequest>(payload)?.id),
            },
            Self::OpenAccount => {
                let r: OpenAccountRequest = decode(payload)?;
                DomainRequest::OpenAccount {
                    user_id: id(r.user_id),
                    name: r.name,
                }
            }
            Self::GetAccount => DomainRequest::GetAccount {
                id: id(decode::<GetAccountRequest>(payload)?.id),
            },
            Self::ListAccounts => DomainRequest::ListAccounts {
                user_ids: vec![id(decode::<ListAccountsRequest>(payload)?.user_id)],
            },
            Self::GetBalance => DomainRequest::GetAccount {
                id: id(decode::<GetBalanceRequest>(payload)?.account_id),
            },
            Self::RenameAccount => {
                let r: RenameAccountRequest = decode(payload)?;
                DomainRequest::RenameAccount {
                    user_id: id(r.user_id),
                    account_id: id(r.account_id),
                    name: r.name,
                }
            }
            Self::ChangeAccountState => {
                let r: ChangeAccountStateRequest = decode(payload)?;
                DomainRequest::ChangeAccountState {
                    account_id: id(r.account_id),
                    change: r.change,
                }
            }
            Self::ProcessPayment => {
                let r: PaymentRequest = decode(payload)?;
                DomainRequest::Transfer {
                    from: id(r.from_account_id),
                    to: id(r.to_account_id),
                    amount_minor: parse_amount(&r.amount).map_err(|e| e.public_message())?,
                }
            }
            Self::GetPayment => DomainRequest::GetTransfer {
                id: id(decode::<GetPaymentRequest>(payload)?.id),
            },
            Self::ListPayments => DomainRequest::ListTransfers {
                account_ids: vec![id(decode::<ListPaymentsRequest>(payload)?.account_id)],
            },
            Self::Reflect | Self::ServerInfo => {
                return Err(format!("{} does not run domain work", self.name()));
            }
        })
    }
}

fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, String> {
    rmp_serde::from_slice(payload).map_err(|e| format!("malformed request: {e}"))
}
