use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use deletion::interval::millis_to_datetime;
use deletion::{
    Chunk, ChunkFilter, CompileError, DeleteRequest, DeletionMetrics, Labels, LogQlCompiler,
    LogSelector, QueryCompiler,
};

fn app_x() -> Labels {
    Labels::new().with_label("app", "x")
}

/// Counts compilations while delegating to the LogQL compiler.
#[derive(Debug, Default)]
struct CountingCompiler {
    calls: Arc<AtomicUsize>,
}

impl QueryCompiler for CountingCompiler {
    fn compile(&self, query: &str) -> Result<Arc<dyn LogSelector>, CompileError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        LogQlCompiler.compile(query)
    }
}

#[test]
fn test_full_containment_deletes_whole_chunk() {
    let req = DeleteRequest::new("req-1", "tenant1", 100, 200, r#"{app="x"}"#);
    let chunk = Chunk::new(150, 180);

    assert!(req.is_deleted("tenant1", &app_x(), &chunk));
    let (affected, filter) = req.get_chunk_filter("tenant1", &app_x(), &chunk).into_parts();
    assert!(affected);
    assert!(filter.is_none());
}

#[test]
fn test_partial_overlap_filters_by_time() {
    let req = DeleteRequest::new("req-1", "tenant1", 100, 200, r#"{app="x"}"#);
    let chunk = Chunk::new(50, 120);

    let (affected, filter) = req.get_chunk_filter("tenant1", &app_x(), &chunk).into_parts();
    assert!(affected);
    let filter = filter.expect("partial overlap yields a line filter");

    // Line timestamps outside the request range are kept.
    let none = Labels::new();
    assert!(!filter(millis_to_datetime(90), "line", &none));
    assert!(filter(millis_to_datetime(110), "line", &none));
    assert!(!filter(millis_to_datetime(250), "line", &none));
}

#[test]
fn test_content_filter_never_deletes_whole_chunk() {
    let req = DeleteRequest::new("req-1", "tenant1", 100, 200, r#"{app="x"} |= "secret""#);

    for chunk in [Chunk::new(150, 180), Chunk::new(100, 200), Chunk::new(50, 120)] {
        let decision = req.get_chunk_filter("tenant1", &app_x(), &chunk);
        let ChunkFilter::Partial(filter) = decision else {
            panic!("expected a line filter for {chunk:?}, got {decision:?}");
        };

        let none = Labels::new();
        assert!(filter(millis_to_datetime(150), "my secret token", &none));
        assert!(!filter(millis_to_datetime(150), "harmless", &none));
    }
}

#[test]
fn test_owner_mismatch_is_never_deleted() {
    let req = DeleteRequest::new("req-1", "tenant1", 0, i64::MAX, r#"{app=~".+"}"#);
    for owner in ["", "tenant2", "Tenant1", "tenant1 "] {
        assert!(!req.is_deleted(owner, &app_x(), &Chunk::new(10, 20)));
        assert!(!req.get_chunk_filter(owner, &app_x(), &Chunk::new(10, 20)).is_affected());
    }
}

#[test]
fn test_closed_interval_overlap() {
    let req = DeleteRequest::new("req-1", "tenant1", 5, 10, r#"{app="x"}"#);
    assert!(req.is_deleted("tenant1", &app_x(), &Chunk::new(1, 5)));
    assert!(req.is_deleted("tenant1", &app_x(), &Chunk::new(10, 15)));
    assert!(!req.is_deleted("tenant1", &app_x(), &Chunk::new(1, 4)));
    assert!(!req.is_deleted("tenant1", &app_x(), &Chunk::new(11, 15)));
}

#[test]
fn test_get_chunk_filter_is_idempotent() {
    let req = DeleteRequest::new("req-1", "tenant1", 100, 200, r#"{app="x"} |~ "err(or)?""#);
    let chunk = Chunk::new(150, 180);
    let lines = ["error here", "all good", "err", "warning"];
    let none = Labels::new();

    let first = req.get_chunk_filter("tenant1", &app_x(), &chunk);
    let second = req.get_chunk_filter("tenant1", &app_x(), &chunk);
    assert_eq!(first.is_affected(), second.is_affected());
    assert_eq!(req.deleted_lines(), 0);

    let (_, Some(first)) = first.into_parts() else {
        panic!("expected a line filter");
    };
    let (_, Some(second)) = second.into_parts() else {
        panic!("expected a line filter");
    };

    for line in lines {
        let ts = millis_to_datetime(160);
        assert_eq!(first(ts, line, &none), second(ts, line, &none), "line {line:?}");
    }
    // Two matching lines, each evaluated by both filters.
    assert_eq!(req.deleted_lines(), 4);
}

#[test]
fn test_concurrent_filters_count_every_match() {
    const WORKERS: usize = 8;
    const LINES_PER_WORKER: usize = 1_000;

    let metrics = DeletionMetrics::new();
    let req = DeleteRequest::new("req-1", "tenant1", 0, 10_000, r#"{app="x"} |= "secret""#)
        .with_metrics(metrics.clone());

    let lines: Vec<Vec<String>> = (0..WORKERS)
        .map(|w| {
            (0..LINES_PER_WORKER)
                .map(|i| {
                    if (w + i) % 3 == 0 {
                        format!("worker {w} line {i} secret")
                    } else {
                        format!("worker {w} line {i}")
                    }
                })
                .collect()
        })
        .collect();
    let expected = lines
        .iter()
        .flatten()
        .filter(|l| l.contains("secret"))
        .count() as u64;

    thread::scope(|s| {
        for worker_lines in &lines {
            let req = &req;
            s.spawn(move || {
                let filter = req.filter_function(&app_x()).unwrap();
                let none = Labels::new();
                for (i, line) in worker_lines.iter().enumerate() {
                    filter(millis_to_datetime(i as i64), line, &none);
                }
            });
        }
    });

    assert_eq!(req.deleted_lines(), expected);
    assert_eq!(metrics.deleted_lines("tenant1"), expected);
}

#[test]
fn test_concurrent_first_use_compiles_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let compiler = CountingCompiler {
        calls: calls.clone(),
    };
    let req = DeleteRequest::new("req-1", "tenant1", 100, 200, r#"{app="x"}"#)
        .with_compiler(Arc::new(compiler));

    thread::scope(|s| {
        for _ in 0..16 {
            s.spawn(|| {
                assert!(req.is_deleted("tenant1", &app_x(), &Chunk::new(150, 180)));
            });
        }
    });

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(req.get_matchers(), r#"app="x""#);
}

#[test]
fn test_duplicate_detection() {
    let a = DeleteRequest::new("a", "tenant1", 100, 200, r#"{app="x",env="prod"} |= "x""#);
    let b = DeleteRequest::new("b", "tenant1", 100, 200, r#"{ env = "prod", app = "x" }|="x""#);
    let c = DeleteRequest::new("c", "tenant1", 100, 300, r#"{app="x",env="prod"} |= "x""#);

    assert!(!a.is_duplicate(&a).unwrap());
    assert!(a.is_duplicate(&b).unwrap());
    assert!(!a.is_duplicate(&c).unwrap());
}

#[test]
fn test_structured_metadata_filter() {
    let req = DeleteRequest::new("req-1", "tenant1", 100, 200, r#"{app="x"} | trace_id="abc""#);
    let filter = req.filter_function(&app_x()).unwrap();
    let ts = millis_to_datetime(150);

    assert!(filter(ts, "line", &Labels::new().with_label("trace_id", "abc")));
    assert!(!filter(ts, "line", &Labels::new().with_label("trace_id", "def")));
    assert!(!filter(ts, "line", &Labels::new()));
    assert_eq!(req.deleted_lines(), 1);
}
