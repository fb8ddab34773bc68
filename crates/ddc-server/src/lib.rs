//! HTTP server for the derived-data cache.
//!
//! Serves refs, raw blobs, compressed content, and the replication log of a
//! single cache node over a JSON/binary HTTP API.
//!
//! # Layout
//!
//! - [`config`] -- TOML configuration with defaults for every field
//! - [`state`] -- [`AppState`], the shared service handles
//! - [`routes`] -- one router per API area, nested by [`router::build_router`]
//! - [`error`] -- problem-JSON error responses
//! - [`auth`] -- caller identity and per-namespace authorization
//! - [`replicators`] -- background replication from remote nodes

pub mod auth;
pub mod body;
pub mod config;
pub mod error;
pub mod replicators;
pub mod router;
pub mod routes;
pub mod server;
pub mod state;

pub use auth::{Action, AllowAll, Identity, NamespaceAccess};
pub use config::ServerConfig;
pub use error::{ApiError, ServerError, ServerResult};
pub use replicators::ReplicatorSet;
pub use router::build_router;
pub use server::DdcServer;
pub use state::AppState;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, Response, StatusCode};
    use axum::Router;
    use chrono::{Duration, Utc};
    use serde_json::{json, Value};
    use tower::util::ServiceExt;

    use ddc_log::LogOp;
    use ddc_object::{DdcObject, ObjectPackage, OBJECT_CONTENT_TYPE, PACKAGE_CONTENT_TYPE};
    use ddc_store::CompressedCodec;
    use ddc_types::{BlobId, BucketId, ContentId, NamespaceId, RefId};

    use crate::routes::{HASH_HEADER, COMPRESSED_CONTENT_TYPE};

    async fn state() -> AppState {
        AppState::open(&ServerConfig::default()).await.unwrap()
    }

    async fn app() -> Router {
        build_router(state().await)
    }

    async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
        app.clone().oneshot(request).await.unwrap()
    }

    async fn body_bytes(response: Response<Body>) -> bytes::Bytes {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
    }

    async fn body_json(response: Response<Body>) -> Value {
        serde_json::from_slice(&body_bytes(response).await).unwrap()
    }

    fn put_object(uri: &str, object: &DdcObject) -> Request<Body> {
        let bytes = object.to_bytes().unwrap();
        Request::put(uri)
            .header("content-type", OBJECT_CONTENT_TYPE)
            .header(HASH_HEADER, BlobId::from_bytes(&bytes).to_hex())
            .body(Body::from(bytes))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    fn head(uri: &str) -> Request<Body> {
        Request::head(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, value: Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(value.to_string()))
            .unwrap()
    }

    // --- health ---

    #[tokio::test]
    async fn health_endpoint() {
        let response = send(&app().await, get("/health/live")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    // --- refs ---

    #[tokio::test]
    async fn put_upload_finalize_scenario() {
        let app = app().await;
        let blob = b"compiled shader bytes".to_vec();
        let blob_id = BlobId::from_bytes(&blob);
        let object = DdcObject::builder()
            .string("name", "shader")
            .binary_attachment("data", blob_id)
            .build();
        let root = BlobId::from_bytes(&object.to_bytes().unwrap());

        let response = send(&app, put_object("/api/v1/refs/ns/b/k", &object)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let outcome = body_json(response).await;
        assert_eq!(outcome["needs"], json!([blob_id.to_hex()]));
        assert_eq!(outcome["finalized"], false);

        assert_eq!(send(&app, get("/api/v1/refs/ns/b/k")).await.status(), StatusCode::NOT_FOUND);
        assert_eq!(send(&app, head("/api/v1/refs/ns/b/k")).await.status(), StatusCode::NOT_FOUND);

        let upload = Request::put(format!("/api/v1/blobs/ns/{blob_id}"))
            .body(Body::from(blob))
            .unwrap();
        assert_eq!(send(&app, upload).await.status(), StatusCode::OK);

        let finalize = Request::post(format!("/api/v1/refs/ns/b/k/finalize/{root}"))
            .body(Body::empty())
            .unwrap();
        let outcome = body_json(send(&app, finalize).await).await;
        assert_eq!(outcome, json!({"needs": [], "finalized": true}));

        // A single binary attachment is unwrapped by default.
        let response = send(&app, get("/api/v1/refs/ns/b/k")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[HASH_HEADER], root.to_hex().as_str());
        assert_eq!(body_bytes(response).await, "compiled shader bytes");

        let as_object = Request::get("/api/v1/refs/ns/b/k")
            .header("accept", OBJECT_CONTENT_TYPE)
            .body(Body::empty())
            .unwrap();
        let response = send(&app, as_object).await;
        assert_eq!(response.headers()["content-type"], OBJECT_CONTENT_TYPE);
        assert_eq!(
            body_bytes(response).await,
            bytes::Bytes::from(object.to_bytes().unwrap())
        );
        assert_eq!(send(&app, head("/api/v1/refs/ns/b/k")).await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn octet_put_is_unwrapped_on_get() {
        let app = app().await;
        let data = b"raw build artifact".to_vec();
        let put = Request::put("/api/v1/refs/ns/b/raw")
            .header("content-type", "application/octet-stream")
            .header(HASH_HEADER, BlobId::from_bytes(&data).to_hex())
            .body(Body::from(data.clone()))
            .unwrap();
        let outcome = body_json(send(&app, put).await).await;
        assert_eq!(outcome["finalized"], true);

        let get = Request::get("/api/v1/refs/ns/b/raw")
            .header("accept", "application/octet-stream")
            .body(Body::empty())
            .unwrap();
        let response = send(&app, get).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_bytes(response).await, bytes::Bytes::from(data));
    }

    #[tokio::test]
    async fn octet_put_with_wrong_hash_is_rejected() {
        let app = app().await;
        let put = Request::put("/api/v1/refs/ns/b/raw")
            .header("content-type", "application/octet-stream")
            .header(HASH_HEADER, BlobId::from_bytes(b"other").to_hex())
            .body(Body::from("payload"))
            .unwrap();
        let response = send(&app, put).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["type"], "HashMismatch");
    }

    #[tokio::test]
    async fn json_put_with_wrong_hash_is_rejected() {
        let app = app().await;
        let put = Request::put("/api/v1/refs/ns/b/doc")
            .header("content-type", "application/json")
            .header(HASH_HEADER, BlobId::from_bytes(b"other").to_hex())
            .body(Body::from(json!({"answer": 42}).to_string()))
            .unwrap();
        let response = send(&app, put).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["type"], "HashMismatch");

        let head = Request::head("/api/v1/refs/ns/b/doc")
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&app, head).await.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn json_put_with_matching_hash_is_accepted() {
        let app = app().await;
        let value = json!({"answer": 42});
        let id = DdcObject::from_json(&value).unwrap().id().unwrap();
        let put = Request::put("/api/v1/refs/ns/b/doc")
            .header("content-type", "application/json")
            .header(HASH_HEADER, id.to_hex())
            .body(Body::from(value.to_string()))
            .unwrap();
        let response = send(&app, put).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["finalized"], true);
    }

    #[tokio::test]
    async fn deeply_nested_object_is_a_bad_request() {
        let app = app().await;
        let mut body = b"DDCO\x01".to_vec();
        body.extend_from_slice(&1u64.to_le_bytes());
        body.extend_from_slice(&1u64.to_le_bytes());
        body.push(b'x');
        for _ in 0..100_000 {
            body.extend_from_slice(&6u32.to_le_bytes());
            body.extend_from_slice(&1u64.to_le_bytes());
        }
        body.extend_from_slice(&0u32.to_le_bytes());
        let put = Request::put("/api/v1/refs/ns/b/deep")
            .header("content-type", OBJECT_CONTENT_TYPE)
            .body(Body::from(body))
            .unwrap();
        let response = send(&app, put).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["type"], "InvalidObject");
    }

    #[tokio::test]
    async fn json_put_and_json_get() {
        let app = app().await;
        let put = Request::put("/api/v1/refs/ns/b/doc")
            .header("content-type", "application/json")
            .body(Body::from(json!({"answer": 42}).to_string()))
            .unwrap();
        assert_eq!(body_json(send(&app, put).await).await["finalized"], true);

        let get = Request::get("/api/v1/refs/ns/b/doc")
            .header("accept", "application/json")
            .body(Body::empty())
            .unwrap();
        assert_eq!(body_json(send(&app, get).await).await, json!({"answer": 42}));
    }

    #[tokio::test]
    async fn composite_roots_need_the_package_format() {
        let state = state().await;
        let app = build_router(state.clone());
        let ns = NamespaceId::new("ns").unwrap();
        let a = state.refs.blobs().put_bytes(&ns, "a".into()).await.unwrap();
        let b = state.refs.blobs().put_bytes(&ns, "b".into()).await.unwrap();
        let object = DdcObject::builder()
            .binary_attachment("a", a)
            .binary_attachment("b", b)
            .build();
        send(&app, put_object("/api/v1/refs/ns/b/pair", &object)).await;

        let octet = Request::get("/api/v1/refs/ns/b/pair")
            .header("accept", "application/octet-stream")
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&app, octet).await.status(), StatusCode::BAD_REQUEST);

        let package = Request::get("/api/v1/refs/ns/b/pair")
            .header("accept", PACKAGE_CONTENT_TYPE)
            .body(Body::empty())
            .unwrap();
        let response = send(&app, package).await;
        assert_eq!(response.status(), StatusCode::OK);
        let package = ObjectPackage::from_bytes(&body_bytes(response).await).unwrap();
        assert_eq!(package.parts.len(), 2);
        assert!(package.verify().is_ok());
    }

    #[tokio::test]
    async fn unacceptable_format_is_406() {
        let app = app().await;
        let request = Request::get("/api/v1/refs/ns/b/k")
            .header("accept", "text/html")
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&app, request).await.status(), StatusCode::NOT_ACCEPTABLE);
    }

    #[tokio::test]
    async fn invalid_names_are_400() {
        let response = send(&app().await, get("/api/v1/refs/ns/.hidden/k")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn exists_reports_missing_refs() {
        let app = app().await;
        let object = DdcObject::builder().integer("v", 1).build();
        send(&app, put_object("/api/v1/refs/ns/b/present", &object)).await;

        let response = send(&app, get("/api/v1/refs/ns/exists?names=b.present,b.absent")).await;
        assert_eq!(
            body_json(response).await,
            json!({"missing": [{"bucket": "b", "key": "absent"}]})
        );

        let response = send(
            &app,
            post_json(
                "/api/v1/refs/ns/exist",
                json!({"names": [{"bucket": "b", "key": "present"}, {"bucket": "c", "key": "x"}]}),
            ),
        )
        .await;
        assert_eq!(
            body_json(response).await,
            json!({"missing": [{"bucket": "c", "key": "x"}]})
        );
    }

    #[tokio::test]
    async fn batch_runs_each_op() {
        let app = app().await;
        let object = DdcObject::builder().string("v", "x").build().to_bytes().unwrap();
        let request = json!({"ops": [
            {"opId": 1, "op": "PUT", "bucket": "b", "key": "k", "payload": hex::encode(&object)},
            {"opId": 2, "op": "HEAD", "bucket": "b", "key": "nope"},
        ]});
        let response = send(&app, post_json("/api/v1/refs/ns", request)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["results"]["1"]["status"], 200);
        assert_eq!(body["results"]["2"]["status"], 404);
    }

    #[tokio::test]
    async fn batch_with_duplicate_ids_is_400() {
        let request = json!({"ops": [
            {"opId": 1, "op": "HEAD", "bucket": "b", "key": "k"},
            {"opId": 1, "op": "GET", "bucket": "b", "key": "k"},
        ]});
        let response = send(&app().await, post_json("/api/v1/refs/ns", request)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["type"], "InvalidBatch");
    }

    #[tokio::test]
    async fn deletes_and_listings() {
        let app = app().await;
        let object = DdcObject::builder().integer("v", 1).build();
        for uri in ["/api/v1/refs/ns/b/one", "/api/v1/refs/ns/b/two", "/api/v1/refs/ns/c/three"] {
            send(&app, put_object(uri, &object)).await;
        }
        assert_eq!(
            body_json(send(&app, get("/api/v1/refs")).await).await,
            json!({"namespaces": ["ns"]})
        );
        assert_eq!(
            body_json(send(&app, get("/api/v1/refs/ns")).await).await,
            json!({"buckets": ["b", "c"]})
        );

        let delete = Request::delete("/api/v1/refs/ns/b/one").body(Body::empty()).unwrap();
        assert_eq!(body_json(send(&app, delete).await).await, json!({"deleted": true}));
        let delete = Request::delete("/api/v1/refs/ns/b/one").body(Body::empty()).unwrap();
        assert_eq!(body_json(send(&app, delete).await).await, json!({"deleted": false}));

        let delete = Request::delete("/api/v1/refs/ns/b").body(Body::empty()).unwrap();
        assert_eq!(body_json(send(&app, delete).await).await, json!({"deletedRefs": 1}));

        let delete = Request::delete("/api/v1/refs/ns").body(Body::empty()).unwrap();
        assert_eq!(body_json(send(&app, delete).await).await, json!({"deletedRefs": 1}));
        assert_eq!(
            body_json(send(&app, get("/api/v1/refs")).await).await,
            json!({"namespaces": []})
        );
    }

    // --- authorization ---

    struct ReadOnly;

    #[async_trait]
    impl NamespaceAccess for ReadOnly {
        async fn has_access(&self, _: &Identity, _: &NamespaceId, actions: &[Action]) -> bool {
            actions.iter().all(|a| *a == Action::Read)
        }
    }

    #[tokio::test]
    async fn denied_actions_are_403() {
        let app = build_router(state().await.with_access(Arc::new(ReadOnly)));
        let object = DdcObject::builder().integer("v", 1).build();
        let response = send(&app, put_object("/api/v1/refs/ns/b/k", &object)).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_json(response).await["type"], "Forbidden");

        assert_eq!(send(&app, get("/api/v1/refs/ns/b/k")).await.status(), StatusCode::NOT_FOUND);
    }

    // --- blobs ---

    #[tokio::test]
    async fn blob_put_get_range_and_exists() {
        let app = app().await;
        let data = b"0123456789".to_vec();
        let id = BlobId::from_bytes(&data);

        let post = Request::post("/api/v1/blobs/ns").body(Body::from(data.clone())).unwrap();
        assert_eq!(
            body_json(send(&app, post).await).await,
            json!({"identifier": id.to_hex()})
        );
        assert_eq!(
            send(&app, head(&format!("/api/v1/blobs/ns/{id}"))).await.status(),
            StatusCode::OK
        );

        let ranged = Request::get(format!("/api/v1/blobs/ns/{id}"))
            .header("range", "bytes=2-5")
            .body(Body::empty())
            .unwrap();
        let response = send(&app, ranged).await;
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()["content-range"], "bytes 2-5/*");
        assert_eq!(body_bytes(response).await, "2345");

        let unknown = BlobId::from_bytes(b"unknown");
        let response = send(
            &app,
            post_json("/api/v1/blobs/ns/exists", json!([id.to_hex(), unknown.to_hex()])),
        )
        .await;
        assert_eq!(body_json(response).await, json!({"needs": [unknown.to_hex()]}));
    }

    #[tokio::test]
    async fn blob_put_under_wrong_id_is_400() {
        let put = Request::put(format!("/api/v1/blobs/ns/{}", BlobId::from_bytes(b"x")))
            .body(Body::from("y"))
            .unwrap();
        let response = send(&app().await, put).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn missing_blob_is_404_problem() {
        let response = send(
            &app().await,
            get(&format!("/api/v1/blobs/ns/{}", BlobId::from_bytes(b"gone"))),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()["content-type"], "application/problem+json");
        assert_eq!(body_json(response).await["type"], "BlobNotFound");
    }

    // --- compressed blobs ---

    #[tokio::test]
    async fn compressed_put_and_get() {
        let app = app().await;
        let data = b"repetitive repetitive repetitive content".repeat(4);
        let id = ContentId::from_bytes(&data);
        let buf = CompressedCodec::default().compress(&data).unwrap();

        let put = Request::put(format!("/api/v1/compressed-blobs/ns/{id}"))
            .header("content-type", COMPRESSED_CONTENT_TYPE)
            .body(Body::from(buf))
            .unwrap();
        assert_eq!(send(&app, put).await.status(), StatusCode::OK);
        assert_eq!(
            send(&app, head(&format!("/api/v1/compressed-blobs/ns/{id}"))).await.status(),
            StatusCode::OK
        );

        let response = send(&app, get(&format!("/api/v1/compressed-blobs/ns/{id}"))).await;
        let (decoded_id, decoded) = CompressedCodec::default()
            .decompress(&body_bytes(response).await)
            .unwrap();
        assert_eq!(decoded_id, id);
        assert_eq!(decoded, data);

        let response = send(
            &app,
            post_json("/api/v1/compressed-blobs/ns/exists", json!([id.to_hex()])),
        )
        .await;
        assert_eq!(body_json(response).await, json!({"needs": []}));
    }

    #[tokio::test]
    async fn compressed_put_under_wrong_id_is_400() {
        let buf = CompressedCodec::default().compress(b"content").unwrap();
        let put = Request::put(format!(
            "/api/v1/compressed-blobs/ns/{}",
            ContentId::from_bytes(b"other")
        ))
        .body(Body::from(buf))
        .unwrap();
        let response = send(&app().await, put).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["type"], "HashMismatch");
    }

    // --- replication ---

    #[tokio::test]
    async fn incremental_log_lists_events() {
        let app = app().await;
        let object = DdcObject::builder().integer("v", 1).build();
        send(&app, put_object("/api/v1/refs/ns/b/k", &object)).await;

        let page = body_json(send(&app, get("/api/v1/replication-log/incremental/ns")).await).await;
        let events = page["events"].as_array().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["refKey"], "k");

        let page = body_json(
            send(&app, get("/api/v1/replication-log/incremental/ns?from=now")).await,
        )
        .await;
        assert!(page["events"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn retired_log_points_at_snapshot() {
        let mut config = ServerConfig::default();
        config.replication.retained_partitions = 1;
        let state = AppState::open(&config).await.unwrap();
        let app = build_router(state.clone());
        let object = DdcObject::builder().integer("v", 1).build();
        send(&app, put_object("/api/v1/refs/ns/b/k", &object)).await;

        let create = Request::post("/api/v1/replication-log/snapshots/ns/create")
            .body(Body::empty())
            .unwrap();
        let created = body_json(send(&app, create).await).await;
        assert_eq!(created["blobNamespace"], "ddc-snapshots");

        let latest = body_json(send(&app, get("/api/v1/replication-log/snapshots/ns")).await).await;
        assert_eq!(latest["snapshotBlobId"], created["snapshotBlobId"]);

        state
            .refs
            .log()
            .append_at(
                &NamespaceId::new("ns").unwrap(),
                LogOp::Delete,
                &BucketId::new("b").unwrap(),
                &RefId::new("gone").unwrap(),
                Utc::now() + Duration::days(30),
            )
            .unwrap();

        let response = send(&app, get("/api/v1/replication-log/incremental/ns")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let problem = body_json(response).await;
        assert_eq!(problem["type"], "UseSnapshot");
        assert_eq!(problem["SnapshotId"], created["snapshotBlobId"]);
        assert_eq!(problem["BlobNamespace"], "ddc-snapshots");
    }

    #[tokio::test]
    async fn missing_snapshot_is_404() {
        let response = send(&app().await, get("/api/v1/replication-log/snapshots/ns")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["type"], "SnapshotNotFound");
    }

    // --- replication between nodes ---

    /// Serve `state` on an ephemeral local port, returning its base URL.
    async fn serve_in_background(state: AppState) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, build_router(state)).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn follower_config(root: &std::path::Path, source_url: String) -> ServerConfig {
        let mut config = ServerConfig::default();
        config.data_root = root.to_path_buf();
        config.storage.backend = "file".into();
        config.replication.replicators = vec![crate::config::ReplicatorSettings {
            name: "mirror".into(),
            namespace: "ns".into(),
            source_url,
            request_timeout_secs: 10,
            ..Default::default()
        }];
        config
    }

    async fn replicate(follower: &DdcServer) -> ddc_replication::ReplicationReport {
        let mut results = follower.replicators().run_once().await;
        assert_eq!(results.len(), 1);
        results.remove(0).1.unwrap()
    }

    #[tokio::test]
    async fn follower_mirrors_source_over_http() {
        let source = state().await;
        let source_app = build_router(source.clone());
        let url = serve_in_background(source.clone()).await;
        let ns = NamespaceId::new("ns").unwrap();

        let blob = source
            .refs
            .blobs()
            .put_bytes(&ns, bytes::Bytes::from_static(b"attached blob"))
            .await
            .unwrap();
        let content = source
            .refs
            .content()
            .put_content(&ns, bytes::Bytes::from(b"chunked content ".repeat(64)))
            .await
            .unwrap();
        let object = DdcObject::builder()
            .binary_attachment("blob", blob)
            .content_attachment("content", content)
            .build();
        let response = send(&source_app, put_object("/api/v1/refs/ns/b/k", &object)).await;
        assert_eq!(body_json(response).await["finalized"], true);
        let raw = Request::put("/api/v1/refs/ns/b/raw")
            .body(Body::from("raw payload"))
            .unwrap();
        assert_eq!(send(&source_app, raw).await.status(), StatusCode::OK);

        let dir = tempfile::tempdir().unwrap();
        let follower = DdcServer::open(follower_config(dir.path(), url)).await.unwrap();
        let report = replicate(&follower).await;
        assert_eq!(report.events_applied, 2);
        assert_eq!(report.refs_mirrored, 2);

        let app = follower.router();
        let response = send(&app, get("/api/v1/refs/ns/b/raw")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(&body_bytes(response).await[..], b"raw payload");
        assert_eq!(send(&app, head("/api/v1/refs/ns/b/k")).await.status(), StatusCode::OK);
        let get_object = Request::get("/api/v1/refs/ns/b/k")
            .header("accept", OBJECT_CONTENT_TYPE)
            .body(Body::empty())
            .unwrap();
        let mirrored = body_bytes(send(&app, get_object).await).await;
        assert_eq!(mirrored.to_vec(), object.to_bytes().unwrap());

        let delete = Request::delete("/api/v1/refs/ns/b/raw")
            .body(Body::empty())
            .unwrap();
        send(&source_app, delete).await;
        let report = replicate(&follower).await;
        assert_eq!(report.events_applied, 1);
        assert_eq!(report.refs_deleted, 1);
        assert_eq!(
            send(&app, get("/api/v1/refs/ns/b/raw")).await.status(),
            StatusCode::NOT_FOUND
        );

        assert_eq!(replicate(&follower).await, Default::default());
        let saved = std::fs::read_to_string(dir.path().join("replicators.json")).unwrap();
        assert!(saved.contains("\"mirror\""));
        assert!(saved.contains("\"refLog\""));
    }

    #[tokio::test]
    async fn follower_bootstraps_from_remote_snapshot() {
        let mut config = ServerConfig::default();
        config.replication.retained_partitions = 1;
        let source = AppState::open(&config).await.unwrap();
        let source_app = build_router(source.clone());
        let url = serve_in_background(source.clone()).await;
        let ns = NamespaceId::new("ns").unwrap();

        let object = DdcObject::builder().string("kept", "yes").build();
        send(&source_app, put_object("/api/v1/refs/ns/b/k", &object)).await;
        let create = Request::post("/api/v1/replication-log/snapshots/ns/create")
            .body(Body::empty())
            .unwrap();
        let created = body_json(send(&source_app, create).await).await;
        source
            .refs
            .log()
            .append_at(
                &ns,
                LogOp::Delete,
                &BucketId::new("b").unwrap(),
                &RefId::new("gone").unwrap(),
                Utc::now() + Duration::days(30),
            )
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let follower = DdcServer::open(follower_config(dir.path(), url)).await.unwrap();
        let report = replicate(&follower).await;
        assert_eq!(
            report.snapshot_restored.map(|id| id.to_hex()),
            created["snapshotBlobId"].as_str().map(str::to_string)
        );
        assert_eq!(report.refs_mirrored, 1);

        let get_object = Request::get("/api/v1/refs/ns/b/k")
            .header("accept", OBJECT_CONTENT_TYPE)
            .body(Body::empty())
            .unwrap();
        let mirrored = body_bytes(send(&follower.router(), get_object).await).await;
        assert_eq!(mirrored.to_vec(), object.to_bytes().unwrap());
    }
}
