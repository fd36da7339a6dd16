use boltadm_adapters::neo4j::Neo4jDriverBackend;
use boltadm_core::connection_manager::{
    AccessMode, ConnectErrorKind, ConnectionManager, ConnectionState,
};
use boltadm_core::credential_store::{CredentialStore, MemoryKeyValueStore};
use boltadm_core::endpoint::{Credentials, Endpoint};
use boltadm_core::session::{LoginError, SessionFacade};

fn neo4j_integration_enabled() -> bool {
    matches!(
        std::env::var("BOLTADM_RUN_NEO4J_INTEGRATION").ok().as_deref(),
        Some("1")
    )
}

fn integration_endpoint() -> Endpoint {
    Endpoint::new(
        std::env::var("BOLTADM_TEST_URL").unwrap_or_else(|_| "bolt://127.0.0.1:7687".to_string()),
    )
}

fn integration_credentials() -> Credentials {
    let user = std::env::var("BOLTADM_TEST_USER").unwrap_or_else(|_| "neo4j".to_string());
    let password = std::env::var("BOLTADM_TEST_PASSWORD").unwrap_or_default();
    Credentials::from_login_form(&user, &password)
}

#[tokio::test(flavor = "current_thread")]
async fn neo4j_backend_login_catalog_and_query_paths() {
    if !neo4j_integration_enabled() {
        return;
    }

    let session = SessionFacade::new(
        ConnectionManager::new(Neo4jDriverBackend),
        CredentialStore::new(MemoryKeyValueStore::new()),
    );

    session
        .login(integration_endpoint(), integration_credentials(), false)
        .await
        .expect("login should succeed");
    assert_eq!(session.state(), ConnectionState::Connected);
    assert!(session.capabilities().is_some());

    let snapshot = session
        .list_databases()
        .await
        .expect("listing should not fail while connected");
    if snapshot.available {
        assert!(snapshot.entries.iter().any(|entry| entry.is_system));
        assert!(snapshot.active.is_some());
    }

    let rows = session
        .run_admin_query("RETURN 1 AS one", AccessMode::Read)
        .await
        .expect("query should succeed");
    assert_eq!(rows.len(), 1);

    session.logout().await;
    assert_eq!(session.state(), ConnectionState::Idle);
}

#[tokio::test(flavor = "current_thread")]
async fn neo4j_backend_rejects_unsupported_scheme() {
    if !neo4j_integration_enabled() {
        return;
    }

    let session = SessionFacade::new(
        ConnectionManager::new(Neo4jDriverBackend),
        CredentialStore::new(MemoryKeyValueStore::new()),
    );

    let err = session
        .login(
            Endpoint::new("http://127.0.0.1:7474"),
            Credentials::None,
            false,
        )
        .await
        .expect_err("http is not a bolt scheme");
    assert!(matches!(
        err,
        LoginError::Connect(ref error) if error.kind == ConnectErrorKind::MalformedEndpoint
    ));
    assert_eq!(session.state(), ConnectionState::Idle);
}
