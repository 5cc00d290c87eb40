//! Committed state and the migration ledger survive a restart when a data
//! directory is configured.

#![cfg(feature = "redb")]

use bytes::Bytes;
use twinport_server::rpc::messages::{CreateUserRequest, GetUserRequest, UserMessage};
use twinport_server::rpc::{RpcCall, RpcStatus};
use twinport_server::{App, AppConfig, ProtocolAdapter};

fn config(dir: &tempfile::TempDir) -> AppConfig {
    AppConfig {
        data_dir: Some(dir.path().to_path_buf()),
        ..AppConfig::default()
    }
}

fn call<T: serde::Serialize>(method: &str, request: &T) -> RpcCall {
    RpcCall {
        method: method.to_string(),
        schema_version: None,
        payload: Bytes::from(rmp_serde::to_vec_named(request).unwrap()),
    }
}

#[tokio::test]
async fn rows_survive_restart() {
    let dir = tempfile::tempdir().unwrap();

    let app = App::build(config(&dir)).await.unwrap();
    let created = app
        .rpc()
        .handle(call(
            "CreateUser",
            &CreateUserRequest {
                name: "Ada".into(),
                email: "ada@bank.io".into(),
            },
        ))
        .await;
    assert_eq!(created.status, RpcStatus::Ok, "{}", created.message);
    let ada: UserMessage = rmp_serde::from_slice(&created.body).unwrap();
    app.close().await.unwrap();

    let app = App::build(config(&dir)).await.unwrap();
    let fetched = app
        .rpc()
        .handle(call("GetUser", &GetUserRequest { id: ada.id }))
        .await;
    assert_eq!(fetched.status, RpcStatus::Ok, "{}", fetched.message);
    let again: UserMessage = rmp_serde::from_slice(&fetched.body).unwrap();
    assert_eq!(again, ada);

    // Ids keep counting from the persisted rows.
    let bob = app
        .rpc()
        .handle(call(
            "CreateUser",
            &CreateUserRequest {
                name: "Bob".into(),
                email: "bob@bank.io".into(),
            },
        ))
        .await;
    let bob: UserMessage = rmp_serde::from_slice(&bob.body).unwrap();
    assert_eq!(bob.id, ada.id + 1);
    app.close().await.unwrap();
}

#[tokio::test]
async fn ledger_is_seeded_once() {
    let dir = tempfile::tempdir().unwrap();
    for _ in 0..2 {
        let app = App::build(config(&dir)).await.unwrap();
        let info = app
            .rpc()
            .handle(RpcCall {
                method: "ServerInfo".into(),
                schema_version: None,
                payload: Bytes::new(),
            })
            .await;
        assert_eq!(info.status, RpcStatus::Ok);
        app.close().await.unwrap();
    }
}
