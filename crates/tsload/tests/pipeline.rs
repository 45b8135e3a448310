// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end tests: text in, decoded batches out, through a scripted
//! backend.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tsload::batch::BatchConfig;
use tsload::codec::decode_batch;
use tsload::config::{LoadConfig, ParseErrorPolicy};
use tsload::error::ParseErrorKind;
use tsload::loader::{LoadError, Loader, RunContext};
use tsload::pool::BufferPool;
use tsload::protocol::parse_point;
use tsload::worker::WorkerError;
use tsload::writer::{DbAction, DbError, TransportError, TransportResponse, WriteError};
use tsload::{BatchAssembler, BinaryFormat, DbManager, FieldValue, SqlExecutor, Transport};

/// Plays back canned responses, then answers 204. SQL statements get their
/// own script and answer 200 with an empty listing once it runs out.
#[derive(Clone, Default)]
struct ScriptedBackend {
    responses: Arc<Mutex<VecDeque<(u16, String)>>>,
    bodies: Arc<Mutex<Vec<Vec<u8>>>>,
    sql_responses: Arc<Mutex<VecDeque<(u16, String)>>>,
    statements: Arc<Mutex<Vec<String>>>,
}

impl ScriptedBackend {
    fn with(responses: &[(u16, &str)]) -> Self {
        let backend = Self::default();
        backend
            .responses
            .lock()
            .expect("lock")
            .extend(responses.iter().map(|(s, b)| (*s, b.to_string())));
        backend
    }

    fn with_sql(self, responses: &[(u16, &str)]) -> Self {
        self.sql_responses
            .lock()
            .expect("lock")
            .extend(responses.iter().map(|(s, b)| (*s, b.to_string())));
        self
    }

    fn statements(&self) -> Vec<String> {
        self.statements.lock().expect("lock").clone()
    }

    fn attempts(&self) -> usize {
        self.bodies.lock().expect("lock").len()
    }

    fn timestamps(&self) -> Vec<i64> {
        let bodies = self.bodies.lock().expect("lock");
        let mut seen: Vec<Vec<u8>> = Vec::new();
        let mut out = Vec::new();
        for body in bodies.iter() {
            // retried bodies are sent more than once
            if seen.contains(body) {
                continue;
            }
            seen.push(body.clone());
            let batch = decode_batch(body).expect("decodable");
            out.extend(batch.points.iter().map(|p| p.timestamp()));
        }
        out.sort_unstable();
        out
    }
}

impl Transport for ScriptedBackend {
    fn send(
        &mut self,
        body: &[u8],
        _compressed: bool,
    ) -> impl Future<Output = Result<TransportResponse, TransportError>> + Send {
        self.bodies.lock().expect("lock").push(body.to_vec());
        let (status, text) = self
            .responses
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or((204, String::new()));
        async move {
            Ok(TransportResponse {
                status,
                body: text.into_bytes(),
            })
        }
    }

    fn endpoint(&self) -> &str {
        "http://scripted:8902"
    }
}

impl SqlExecutor for ScriptedBackend {
    fn execute_sql(
        &mut self,
        statement: &str,
    ) -> impl Future<Output = Result<TransportResponse, TransportError>> + Send {
        self.statements.lock().expect("lock").push(statement.to_string());
        let (status, text) = self
            .sql_responses
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or((200, "[]".to_string()));
        async move {
            Ok(TransportResponse {
                status,
                body: text.into_bytes(),
            })
        }
    }
}

fn test_config(workers: usize, batch_size: usize) -> LoadConfig {
    let mut config = LoadConfig::default();
    config.loader.workers = workers;
    config.loader.batch_size = batch_size;
    config.target.gzip = false;
    config.target.backoff_ms = 1;
    config
}

async fn load(config: &LoadConfig, backends: Vec<ScriptedBackend>, input: &[u8]) -> tsload::RunReport {
    let ctx = RunContext::from_config(config);
    let loader = Loader::from_config(config, ctx, backends).expect("loader");
    loader.run(input).await.expect("run")
}

fn db_manager(backend: &ScriptedBackend) -> DbManager<ScriptedBackend> {
    DbManager::new(backend.clone(), backend.endpoint().to_string()).with_settle_delay(Duration::ZERO)
}

#[tokio::test]
async fn test_existing_database_recreated_before_load() {
    let backend = ScriptedBackend::default().with_sql(&[
        (200, r#"[{"Database":"public"},{"Database":"benchmark"}]"#),
        (200, ""),
        (200, ""),
    ]);
    let config = test_config(1, 10);
    let action = Loader::prepare_database(&config, &mut db_manager(&backend))
        .await
        .expect("prepare");
    assert_eq!(action, DbAction::Recreated);
    assert_eq!(backend.attempts(), 0);

    let report = load(&config, vec![backend.clone()], b"cpu v=1 1\n").await;
    assert!(report.is_success());
    assert_eq!(
        backend.statements(),
        vec![
            "SHOW DATABASES",
            "DROP DATABASE IF EXISTS benchmark",
            "CREATE DATABASE benchmark",
        ]
    );
    assert_eq!(backend.timestamps(), vec![1]);
}

#[tokio::test]
async fn test_abort_on_exist_stops_before_any_write() {
    let backend = ScriptedBackend::default().with_sql(&[(200, r#"[{"Database":"benchmark"}]"#)]);
    let mut config = test_config(1, 10);
    config.target.abort_on_exist = true;
    let err = Loader::prepare_database(&config, &mut db_manager(&backend))
        .await
        .expect_err("database exists");
    assert!(matches!(err, LoadError::Database(DbError::Exists(ref name)) if name == "benchmark"));
    assert_eq!(backend.statements(), vec!["SHOW DATABASES"]);
    assert_eq!(backend.attempts(), 0);
}

#[tokio::test]
async fn test_database_setup_rejection_and_dry_run() {
    let backend = ScriptedBackend::default().with_sql(&[(401, "auth failed")]);
    let config = test_config(1, 10);
    let err = Loader::prepare_database(&config, &mut db_manager(&backend))
        .await
        .expect_err("unauthorized");
    assert!(err.to_string().contains("list databases returned non-200 code: 401: auth failed"));

    let backend = ScriptedBackend::default();
    let mut config = test_config(1, 10);
    config.loader.do_load = false;
    let action = Loader::prepare_database(&config, &mut db_manager(&backend))
        .await
        .expect("prepare");
    assert_eq!(action, DbAction::Skipped);
    assert!(backend.statements().is_empty());
}

#[tokio::test]
async fn test_backoff_run_then_commit() {
    let backend = ScriptedBackend::with(&[
        (500, "timeout"),
        (500, "timeout"),
        (500, "timeout"),
        (500, "timeout"),
        (500, "timeout"),
        (200, ""),
    ]);
    let config = test_config(1, 10);
    let report = load(&config, vec![backend.clone()], b"cpu,host=a usage=1 1\n").await;

    assert!(report.is_success());
    assert_eq!(backend.attempts(), 6);
    assert_eq!(report.workers[0].backoff.intervals, 1);
    assert_eq!(report.stats.backoff_responses, 5);
    assert_eq!(report.stats.batches_committed, 1);
    assert_eq!(backend.timestamps(), vec![1]);
}

#[tokio::test]
async fn test_fatal_response_aborts_worker() {
    let backend = ScriptedBackend::with(&[(400, "unable to parse 'cpu'")]);
    let config = test_config(1, 1);
    let report = load(&config, vec![backend.clone()], b"cpu v=1 1\ncpu v=2 2\ncpu v=3 3\n").await;

    assert!(!report.is_success());
    assert_eq!(report.errors.len(), 1);
    match &report.errors[0] {
        WorkerError::Aborted { source, .. } => match source.as_ref() {
            WriteError::Fatal { status, body, debug } => {
                assert_eq!(*status, 400);
                assert!(body.contains("unable to parse"));
                assert_eq!(debug, "worker #0, dest url: http://scripted:8902");
            }
            other => panic!("unexpected {other:?}"),
        },
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(report.stats.points_committed, 0);
}

#[tokio::test]
async fn test_skip_policy_counts_bad_records() {
    let input = b"cpu v=1 1\ncpu,host=a\ncpu,b=1,a=2,b=3 v=1 2\nmem used=9i 3\n";
    let backend = ScriptedBackend::default();
    let config = test_config(1, 100);
    let report = load(&config, vec![backend.clone()], input).await;

    assert_eq!(report.stats.lines_read, 4);
    assert_eq!(report.stats.parse_errors, 2);
    assert_eq!(report.stats.points_committed, 2);
    assert_eq!(backend.timestamps(), vec![1, 3]);
}

#[tokio::test]
async fn test_abort_policy_stops_run() {
    let mut config = test_config(1, 100);
    config.loader.on_parse_error = ParseErrorPolicy::Abort;
    let ctx = RunContext::from_config(&config);
    let loader = Loader::from_config(&config, ctx, vec![ScriptedBackend::default()]).expect("loader");
    let err = loader
        .run(&b"cpu v=1 1\ncpu v=1 1 extra\n"[..])
        .await
        .expect_err("abort");
    assert!(err.to_string().starts_with("line 2:"));
}

#[tokio::test]
async fn test_multiple_workers_commit_everything() {
    let input: String = (0..100).map(|ts| format!("cpu,host=h{} v={}i {}\n", ts % 7, ts, ts)).collect();
    let backends: Vec<ScriptedBackend> = (0..4).map(|_| ScriptedBackend::default()).collect();
    let config = test_config(4, 10);
    let report = load(&config, backends.clone(), input.as_bytes()).await;

    assert!(report.is_success());
    assert_eq!(report.stats.points_committed, 100);
    assert_eq!(report.stats.batches_committed, 10);
    let mut all: Vec<i64> = backends.iter().flat_map(|b| b.timestamps()).collect();
    all.sort_unstable();
    assert_eq!(all, (0..100).collect::<Vec<i64>>());
    assert!(backends.iter().all(|b| b.attempts() > 0));
}

#[tokio::test]
async fn test_partitioned_series_stay_on_one_worker() {
    let input: String = (0..60).map(|ts| format!("cpu,host=h{} v=1 {}\n", ts % 3, ts)).collect();
    let backends: Vec<ScriptedBackend> = (0..3).map(|_| ScriptedBackend::default()).collect();
    let mut config = test_config(3, 5);
    config.loader.partitions = 3;
    config.loader.partition_tag = Some("host".into());
    let report = load(&config, backends.clone(), input.as_bytes()).await;
    assert_eq!(report.stats.points_committed, 60);

    for backend in &backends {
        let mut hosts = Vec::new();
        for body in backend.bodies.lock().expect("lock").iter() {
            for point in decode_batch(body).expect("decode").points {
                let host = point.key().tag(b"host").expect("host tag").to_vec();
                if !hosts.contains(&host) {
                    hosts.push(host);
                }
            }
        }
        for other in &backends {
            if std::ptr::eq(other, backend) {
                continue;
            }
            for body in other.bodies.lock().expect("lock").iter() {
                for point in decode_batch(body).expect("decode").points {
                    let host = point.key().tag(b"host").expect("host tag").to_vec();
                    assert!(!hosts.contains(&host));
                }
            }
        }
    }
}

#[tokio::test]
async fn test_flush_interval_seals_partial_batch() {
    let (mut writer, reader) = tokio::io::duplex(64);
    let backend = ScriptedBackend::default();
    let mut config = test_config(1, 1000);
    config.loader.flush_interval_ms = 20;
    let ctx = RunContext::from_config(&config);
    let stats = ctx.stats.clone();
    let loader = Loader::from_config(&config, ctx, vec![backend.clone()]).expect("loader");
    let run = tokio::spawn(loader.run(reader));

    tokio::io::AsyncWriteExt::write_all(&mut writer, b"cpu v=1 1\n")
        .await
        .expect("write");
    let mut committed = false;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if stats.snapshot().points_committed == 1 {
            committed = true;
            break;
        }
    }
    assert!(committed, "partial batch was not flushed");

    drop(writer);
    let report = run.await.expect("join").expect("run");
    assert_eq!(report.stats.points_committed, 1);
}

#[test]
fn test_type_inference_and_canonical_key() {
    let point = parse_point(
        b"weather,zone=b\\ 2,city=paris temp=21.5,count=3i,big=18446744073709551615u,ok=TRUE,note=\"a \\\"q\\\"\",plain=7 -5",
    )
    .expect("valid point");
    assert_eq!(point.key().series_key(), b"weather,city=paris,zone=b\\ 2");
    assert_eq!(point.tags()[1].value, b"b 2");

    let values: Vec<&FieldValue> = point.fields().iter().map(|f| &f.value).collect();
    assert_eq!(
        values,
        vec![
            &FieldValue::Float(21.5),
            &FieldValue::Integer(3),
            &FieldValue::Unsigned(u64::MAX),
            &FieldValue::Boolean(true),
            &FieldValue::String(b"a \"q\"".to_vec()),
            &FieldValue::Float(7.0),
        ]
    );
    assert_eq!(point.timestamp(), -5);
}

#[test]
fn test_rejections() {
    let cases: [(&[u8], ParseErrorKind); 5] = [
        (b"cpu,host=a 1", ParseErrorKind::MissingFields),
        (b"cpu,a=1,a=2 v=1 1", ParseErrorKind::DuplicateTags),
        (b"cpu,time=1 v=1 1", ParseErrorKind::ReservedTagKey("time".into())),
        (b"cpu v=NaN 1", ParseErrorKind::NanUnsupported),
        (b"cpu v=t 1x", ParseErrorKind::BadTimestamp),
    ];
    for (line, kind) in cases {
        assert_eq!(
            parse_point(line).expect_err("invalid"),
            kind,
            "{}",
            String::from_utf8_lossy(line)
        );
    }
}

#[test]
fn test_batches_never_exceed_point_limit() {
    let pool = Arc::new(BufferPool::new(4, 256));
    let config = BatchConfig {
        max_points: 7,
        max_bytes: usize::MAX,
        flush_interval: None,
    };
    let mut assembler = BatchAssembler::new(Arc::new(BinaryFormat), "db", config, pool);
    let mut sealed = Vec::new();
    for ts in 0..50 {
        let point = parse_point(format!("m v={ts}i {ts}").as_bytes()).expect("valid");
        if let Some(batch) = assembler.push(&point).expect("push") {
            sealed.push(batch);
        }
    }
    sealed.extend(assembler.flush().expect("flush"));

    let counts: Vec<u32> = sealed.iter().map(|b| b.points()).collect();
    assert_eq!(counts, vec![7, 7, 7, 7, 7, 7, 7, 1]);
    let mut total = 0;
    for batch in &sealed {
        let decoded = decode_batch(batch.body()).expect("decode");
        assert_eq!(decoded.points.len() as u32, batch.points());
        total += decoded.points.len();
    }
    assert_eq!(total, 50);
}

#[test]
fn test_decoded_points_reparse_to_same_text() {
    let lines = [
        "cpu,region=eu,host=a usage=0.5,idle=99i 100",
        "disk,path=/var\\ log free=12u,ro=f 200",
        "log msg=\"line one\\nline two\",level=\"warn\" 300",
    ];
    let pool = Arc::new(BufferPool::new(1, 256));
    let mut assembler = BatchAssembler::new(Arc::new(BinaryFormat), "db", BatchConfig::default(), pool);
    let originals: Vec<_> = lines
        .iter()
        .map(|l| parse_point(l.as_bytes()).expect("valid"))
        .collect();
    for point in &originals {
        assembler.push(point).expect("push");
    }
    let batch = assembler.flush().expect("flush").pop().expect("one batch");
    let decoded = decode_batch(batch.body()).expect("decode");

    for (original, point) in originals.iter().zip(&decoded.points) {
        let text = point.to_line_protocol();
        assert_eq!(text, original.to_line_protocol());
        let reparsed = parse_point(&text).expect("canonical text parses");
        assert_eq!(reparsed.to_line_protocol(), text);
    }
}
