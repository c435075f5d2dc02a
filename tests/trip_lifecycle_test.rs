//! End-to-end trip lifecycle: record, crash, resume, finalize, upload

use bytes::Bytes;
use chrono::{DateTime, Duration, TimeZone, Utc};
use http_body_util::{BodyExt, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use trip_recorder::domain::samples::metres_to_latitude_degrees;
use trip_recorder::domain::{
    ArchiveKind, ArchiveName, Confidence, LocationSample, MotionKind, MotionSample, RecorderNotice,
    SensorEvent, SensorEventKind,
};
use trip_recorder::infra::{ManualClock, Metrics};
use trip_recorder::io::remote_store::{object_key, RemoteStore, ARCHIVE_CONTENT_TYPE};
use trip_recorder::io::status_server::serve_status;
use trip_recorder::io::{
    create_notice_channel, ArchiveStore, CheckpointStore, HttpRemoteStore, MemoryRemoteStore,
};
use trip_recorder::services::{
    Recorder, ScenarioStateMachine, Thresholds, TripSession, UploadReconciler,
};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 10, 27, 8, 0, 0).unwrap()
}

fn at(secs: i64) -> DateTime<Utc> {
    t0() + Duration::seconds(secs)
}

fn fix(secs: i64, north_m: f64) -> LocationSample {
    LocationSample::new(43.4723 + metres_to_latitude_degrees(north_m), -80.5449, at(secs))
        .with_accuracy(5.0)
}

struct Harness {
    recorder: Recorder,
    clock: ManualClock,
    _notices: mpsc::Receiver<RecorderNotice>,
}

impl Harness {
    fn new(dir: &Path, owner: &str) -> Self {
        let clock = ManualClock::new(t0());
        let machine = ScenarioStateMachine::new(Thresholds::default(), Arc::new(clock.clone()));
        let session =
            TripSession::new(CheckpointStore::new(dir), ArchiveStore::new(dir.join("archives")));
        let (notices, notice_rx) = create_notice_channel(8);
        let recorder = Recorder::new(
            machine,
            session,
            Some(owner.to_string()),
            Arc::new(Metrics::new()),
            notices,
            None,
        );
        Self { recorder, clock, _notices: notice_rx }
    }

    fn location(&mut self, secs: i64, north_m: f64) {
        self.clock.set(at(secs));
        self.recorder.process_event(SensorEvent::location(fix(secs, north_m)));
    }

    fn send(&mut self, kind: SensorEventKind) {
        self.recorder.process_event(SensorEvent::new(kind));
    }
}

#[tokio::test]
async fn test_trip_survives_restart_and_uploads_once() {
    let dir = tempfile::tempdir().unwrap();

    // First run: record part of a walk, then "crash"
    {
        let mut h = Harness::new(dir.path(), "eddy");
        h.send(SensorEventKind::StartTrip);
        let walking = MotionSample::new(MotionKind::Walking, Confidence::High, t0());
        h.send(SensorEventKind::Motion(walking));
        for i in 0..5 {
            h.location(i * 10, i as f64 * 12.0);
        }
        assert_eq!(h.recorder.current_status().locations, 5);
    }

    // Second run resumes the open trip from checkpoints
    let mut h = Harness::new(dir.path(), "eddy");
    assert!(h.recorder.is_recording());
    assert_eq!(h.recorder.current_status().locations, 5);
    assert_eq!(h.recorder.current_status().motions, 1);

    for i in 5..8 {
        h.location(i * 10, i as f64 * 12.0);
    }
    h.send(SensorEventKind::StopTrip);
    assert!(!h.recorder.is_recording());

    // Two archives sharing the location span
    let archives = ArchiveStore::new(dir.path().join("archives"));
    let names = archives.list(Some("eddy")).unwrap();
    assert_eq!(names.len(), 2);
    let parsed: Vec<ArchiveName> = names.iter().map(|n| ArchiveName::parse(n).unwrap()).collect();
    assert!(parsed.iter().any(|n| n.kind == ArchiveKind::Locations));
    assert!(parsed.iter().any(|n| n.kind == ArchiveKind::Motions));
    assert!(parsed.iter().all(|n| n.start == at(0) && n.end == at(70)));

    let locations = names
        .iter()
        .find(|n| n.starts_with("tripLocations"))
        .map(|n| archives.load_locations(n).unwrap())
        .unwrap();
    assert_eq!(locations.len(), 8);

    // Checkpoints are gone once finalized
    assert!(!CheckpointStore::new(dir.path()).exists());

    // Upload: first pass pushes both, second pushes nothing
    let remote = Arc::new(MemoryRemoteStore::new());
    let reconciler = UploadReconciler::new(archives, remote.clone());
    let first = reconciler.reconcile(Some("eddy")).await.unwrap();
    assert_eq!(first.uploaded.len(), 2);
    let second = reconciler.reconcile(Some("eddy")).await.unwrap();
    assert!(second.uploaded.is_empty());
    assert_eq!(remote.put_count(), 2);
}

#[tokio::test]
async fn test_empty_trip_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = Harness::new(dir.path(), "eddy");

    h.send(SensorEventKind::StartTrip);
    h.send(SensorEventKind::StopTrip);

    let archives = ArchiveStore::new(dir.path().join("archives"));
    assert!(archives.list(None).unwrap().is_empty());
    assert!(!h.recorder.current_status().trip_open);
}

/// Minimal object store server speaking the upload contract
async fn spawn_object_server(store: Arc<MemoryRemoteStore>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            let store = store.clone();
            tokio::spawn(async move {
                let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                    let store = store.clone();
                    async move {
                        let path = req.uri().path().trim_start_matches("/bucket/").to_string();
                        let response = match *req.method() {
                            Method::GET => {
                                let owner = path.trim_end_matches('/');
                                match store.keys(owner) {
                                    Some(keys) => Response::new(Full::new(Bytes::from(
                                        serde_json::to_vec(&keys).unwrap(),
                                    ))),
                                    None => {
                                        let mut r = Response::new(Full::new(Bytes::new()));
                                        *r.status_mut() = StatusCode::NOT_FOUND;
                                        r
                                    }
                                }
                            }
                            Method::PUT => {
                                let auth = req
                                    .headers()
                                    .get("authorization")
                                    .map(|v| v.to_str().unwrap().to_string());
                                assert_eq!(auth.as_deref(), Some("Basic ZGlhcnk6czNjcmV0"));
                                let body = req.into_body().collect().await.unwrap().to_bytes();
                                store.insert(&path, body, ARCHIVE_CONTENT_TYPE);
                                let mut r = Response::new(Full::new(Bytes::new()));
                                *r.status_mut() = StatusCode::CREATED;
                                r
                            }
                            _ => {
                                let mut r = Response::new(Full::new(Bytes::new()));
                                *r.status_mut() = StatusCode::METHOD_NOT_ALLOWED;
                                r
                            }
                        };
                        Ok::<_, Infallible>(response)
                    }
                });
                let _ = http1::Builder::new().serve_connection(TokioIo::new(stream), service).await;
            });
        }
    });

    format!("http://diary:s3cret@{addr}/bucket")
}

#[tokio::test]
async fn test_http_remote_store_round_trip() {
    let backing = Arc::new(MemoryRemoteStore::new());
    let base_url = spawn_object_server(backing.clone()).await;
    let remote = HttpRemoteStore::new(&base_url, std::time::Duration::from_secs(5)).unwrap();

    assert_eq!(remote.list_keys("eddy").await.unwrap(), None);

    let key = object_key(
        "eddy",
        "tripLocations_eddy_2020-10-27_08:00:00_to_2020-10-27_08:01:10.json",
    );
    remote.put_object(&key, Bytes::from_static(b"[]"), ARCHIVE_CONTENT_TYPE).await.unwrap();

    assert_eq!(remote.list_keys("eddy").await.unwrap(), Some(vec![key.clone()]));
    assert_eq!(backing.get(&key).unwrap().body.as_ref(), b"[]");
}

#[tokio::test]
async fn test_status_endpoint_reflects_recorder() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = Harness::new(dir.path(), "eddy");
    h.send(SensorEventKind::StartTrip);
    h.location(0, 0.0);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(serve_status(
        listener,
        Arc::new(Metrics::new()),
        h.recorder.status(),
        shutdown_rx,
    ));

    let status: serde_json::Value = reqwest::get(format!("http://{addr}/status"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["trip_open"], true);
    assert_eq!(status["locations"], 1);
    assert_eq!(status["owner"], "eddy");
    assert_eq!(status["directive"], "nearest_ten_metres");

    let health = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert_eq!(health.status(), reqwest::StatusCode::OK);
}
