//! Shared wiring for the end-to-end tests: both adapters over one pipeline,
//! an in-memory store and a ledger the test can migrate.

#![allow(dead_code)]

use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as Json;
use twinport_core::{EntityId, EntityKind, ManualClock, SchemaVersion, Value};
use twinport_server::graph::{GraphAdapter, GraphRequest, GraphResponse};
use twinport_server::rpc::messages::{
    AccountMessage, BalanceResponse, CreateUserRequest, GetBalanceRequest, OpenAccountRequest,
    UserMessage,
};
use twinport_server::rpc::{RpcAdapter, RpcCall, RpcResponse, RpcStatus};
use twinport_server::schema::SchemaRegistry;
use twinport_server::service::{
    DomainRouter, Dispatcher, OperationPipeline, ServerConfig, TransactionCoordinator,
};
use twinport_server::storage::datastores::{MemoryLedger, NullDataStore};
use twinport_server::storage::{IsolationLevel, Store, Transaction};
use twinport_server::ProtocolAdapter;

pub struct Harness {
    pub ledger: Arc<MemoryLedger>,
    pub store: Arc<Store>,
    pub clock: Arc<ManualClock>,
    pub rpc: RpcAdapter,
    pub graph: GraphAdapter,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_isolation(IsolationLevel::Snapshot).await
    }

    pub async fn with_isolation(isolation: IsolationLevel) -> Self {
        let ledger = Arc::new(MemoryLedger::baseline());
        let schema = Arc::new(SchemaRegistry::new(ledger.clone()));
        schema.refresh().await.unwrap();
        let store = Arc::new(Store::new(Arc::new(NullDataStore)));
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let dispatcher = Dispatcher::new(
            schema,
            Arc::new(TransactionCoordinator::new(store.clone(), isolation)),
            Arc::new(DomainRouter::with_default_services()),
            clock.clone(),
        );
        let pipeline = OperationPipeline::new(
            dispatcher,
            Arc::new(ServerConfig {
                isolation,
                ..ServerConfig::default()
            }),
        );
        Self {
            ledger,
            store,
            clock,
            rpc: RpcAdapter::new(pipeline.clone()),
            graph: GraphAdapter::new(pipeline),
        }
    }

    pub fn pipeline(&self) -> &OperationPipeline {
        self.rpc.pipeline()
    }

    /// `(commits, rollbacks)` so far.
    pub fn counts(&self) -> (u64, u64) {
        let stats = self.pipeline().dispatcher().coordinator().stats();
        (stats.commits(), stats.rollbacks())
    }

    pub async fn call<Req: Serialize>(
        &self,
        method: &str,
        schema_version: Option<u32>,
        request: &Req,
    ) -> RpcResponse {
        self.rpc
            .handle(RpcCall {
                method: method.to_string(),
                schema_version: schema_version.map(SchemaVersion),
                payload: Bytes::from(rmp_serde::to_vec_named(request).unwrap()),
            })
            .await
    }

    pub async fn query(&self, query: &str, variables: Json) -> GraphResponse {
        self.graph
            .handle(GraphRequest {
                query: query.to_string(),
                variables: variables.as_object().cloned(),
                ..GraphRequest::default()
            })
            .await
    }

    pub async fn create_user(&self, name: &str, email: &str) -> UserMessage {
        ok(&self
            .call(
                "CreateUser",
                None,
                &CreateUserRequest {
                    name: name.to_string(),
                    email: email.to_string(),
                },
            )
            .await)
    }

    pub async fn open_account(&self, user_id: u64, name: &str) -> AccountMessage {
        ok(&self
            .call(
                "OpenAccount",
                None,
                &OpenAccountRequest {
                    user_id,
                    name: name.to_string(),
                },
            )
            .await)
    }

    pub async fn balance(&self, account_id: u64) -> i64 {
        let resp: BalanceResponse = ok(&self
            .call("GetBalance", None, &GetBalanceRequest { account_id })
            .await);
        resp.balance_minor
    }

    /// Sets a balance directly in the store, outside any scope.
    pub async fn fund(&self, account_id: u64, minor: i64) {
        let mut txn = Transaction::begin(self.store.clone(), IsolationLevel::Snapshot);
        let mut account = txn
            .get(EntityKind::Accounts, EntityId(account_id))
            .expect("account exists");
        account.fields.insert("balance".to_string(), Value::Int(minor));
        txn.update(account);
        self.store.commit(txn.into_batch()).await.unwrap();
    }
}

pub fn ok<T: DeserializeOwned>(resp: &RpcResponse) -> T {
    assert_eq!(resp.status, RpcStatus::Ok, "{}", resp.message);
    rmp_serde::from_slice(&resp.body).unwrap()
}
