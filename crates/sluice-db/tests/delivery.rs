//! Delivery semantics of in-memory queues: ordering, blocking pops,
//! single-read columns and the two overflow policies.

use std::time::{Duration, Instant};

use sluice_connectors::{AdapterKind, ConnectorOptions, SourceRow};
use sluice_core::cursor::{ColumnError, SinkRow};
use sluice_core::expr::Expr;
use sluice_core::queue::OverflowPolicy;
use sluice_core::{ColumnDef, ErrorCode, HasErrorCode, SqlType};
use sluice_db::{
    DbError, Pipeline, PumpDefinition, ReaderDefinition, StreamDefinition, WriterDefinition,
};

fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

fn pop_within(pipeline: &Pipeline, queue: &str) -> SinkRow {
    let mut row = None;
    assert!(
        wait_until(|| {
            row = pipeline.pop_non_blocking(queue).unwrap();
            row.is_some()
        }),
        "no row arrived on '{queue}'"
    );
    row.unwrap()
}

fn number(n: i32) -> SourceRow {
    SourceRow::builder().add_column("n", n).unwrap().build()
}

/// `numbers -> copy -> copies`, fed by `in_q` and drained through a writer
/// queue with `writer_options`.
fn copy_pipeline(pipeline: Pipeline, writer_options: ConnectorOptions) -> Pipeline {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    pipeline
        .create_stream(StreamDefinition::source(
            "numbers",
            vec![ColumnDef::new("n", SqlType::Integer).not_null()],
        ))
        .unwrap();
    pipeline
        .create_stream(StreamDefinition::sink(
            "copies",
            vec![ColumnDef::new("n", SqlType::Integer)],
        ))
        .unwrap();
    pipeline
        .create_pump(PumpDefinition::new("copy", "numbers", "copies").column("n", Expr::col("n")))
        .unwrap();
    pipeline
        .create_reader(ReaderDefinition::in_memory("numbers_in", "numbers", "in_q"))
        .unwrap();
    pipeline
        .create_writer(WriterDefinition::new(
            "copies_out",
            "copies",
            AdapterKind::InMemoryQueue,
            writer_options,
        ))
        .unwrap();
    pipeline
}

fn default_pipeline() -> Pipeline {
    copy_pipeline(
        Pipeline::builder().io_threads(1).build().unwrap(),
        ConnectorOptions::new().with("NAME", "out_q"),
    )
}

#[test]
fn rows_arrive_in_push_order() {
    let pipeline = default_pipeline();
    for n in 0..200 {
        pipeline.push("in_q", number(n)).unwrap();
    }
    for n in 0..200 {
        let mut row = pop_within(&pipeline, "out_q");
        assert_eq!(row.get::<i32>(0).unwrap(), n);
    }
    assert!(pipeline.pop_non_blocking("out_q").unwrap().is_none());

    let stats = pipeline.queue_stats("out_q").unwrap();
    assert_eq!((stats.pushed, stats.popped, stats.len), (200, 200, 0));
}

#[test]
fn blocking_pop_wakes_on_arrival() {
    let pipeline = default_pipeline();
    let consumer = pipeline.clone();
    let waiter = std::thread::spawn(move || {
        let mut row = consumer.pop("out_q").unwrap();
        row.get::<i32>(0).unwrap()
    });

    std::thread::sleep(Duration::from_millis(50));
    assert!(!waiter.is_finished());
    pipeline.push("in_q", number(42)).unwrap();
    assert_eq!(waiter.join().unwrap(), 42);
}

#[test]
fn blocking_pop_fails_when_writer_dropped() {
    let pipeline = default_pipeline();
    let consumer = pipeline.clone();
    let waiter = std::thread::spawn(move || consumer.pop("out_q"));

    std::thread::sleep(Duration::from_millis(50));
    pipeline.drop_writer("copies_out").unwrap();
    let err = waiter.join().unwrap().unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::Unavailable);
    assert!(matches!(
        pipeline.pop_non_blocking("out_q"),
        Err(DbError::QueueNotFound(_))
    ));
}

#[test]
fn non_blocking_pop_distinguishes_empty_from_missing() {
    let pipeline = default_pipeline();
    assert!(pipeline.pop_non_blocking("out_q").unwrap().is_none());

    let err = pipeline.pop_non_blocking("no_such_q").unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::Unavailable);
    // Source queues cannot be popped.
    assert!(pipeline.pop_non_blocking("in_q").is_err());
}

#[test]
fn columns_read_once() {
    let pipeline = default_pipeline();
    pipeline.push("in_q", number(7)).unwrap();
    let mut row = pop_within(&pipeline, "out_q");

    assert_eq!(row.len(), 1);
    assert!(!row.is_null(0).unwrap());
    assert_eq!(row.get::<i64>(0).unwrap(), 7);
    assert_eq!(row.get::<i64>(0), Err(ColumnError::AlreadyRead(0)));
    assert!(matches!(
        row.get::<i32>(3),
        Err(ColumnError::OutOfRange { index: 3, len: 1 })
    ));
}

#[test]
fn full_block_queue_stalls_the_pump() {
    let pipeline = copy_pipeline(
        Pipeline::builder().io_threads(1).build().unwrap(),
        ConnectorOptions::new()
            .with("NAME", "out_q")
            .with("CAPACITY", "2"),
    );
    for n in 0..5 {
        pipeline.push("in_q", number(n)).unwrap();
    }

    assert!(wait_until(|| pipeline.queue_stats("out_q").unwrap().len == 2));
    std::thread::sleep(Duration::from_millis(30));
    let stats = pipeline.queue_stats("out_q").unwrap();
    assert_eq!((stats.len, stats.rejected), (2, 0));

    for n in 0..5 {
        let mut row = pop_within(&pipeline, "out_q");
        assert_eq!(row.get::<i32>(0).unwrap(), n);
    }
    assert_eq!(pipeline.pump_metrics("copy").unwrap().dropped_rows, 0);
}

#[test]
fn full_reject_queue_drops_rows() {
    let pipeline = copy_pipeline(
        Pipeline::builder()
            .io_threads(1)
            .overflow(OverflowPolicy::Reject)
            .build()
            .unwrap(),
        ConnectorOptions::new()
            .with("NAME", "out_q")
            .with("CAPACITY", "2"),
    );
    for n in 0..5 {
        pipeline.push("in_q", number(n)).unwrap();
    }

    assert!(wait_until(|| pipeline.pump_metrics("copy").unwrap().rows_in == 5));
    assert!(wait_until(|| pipeline.pump_metrics("copy").unwrap().dropped_rows == 3));
    let stats = pipeline.queue_stats("out_q").unwrap();
    assert_eq!((stats.len, stats.rejected), (2, 3));

    for n in 0..2 {
        let mut row = pop_within(&pipeline, "out_q");
        assert_eq!(row.get::<i32>(0).unwrap(), n);
    }
    assert!(pipeline.pop_non_blocking("out_q").unwrap().is_none());
}

#[test]
fn dropped_reader_releases_its_queue() {
    let pipeline = default_pipeline();
    pipeline.drop_reader("numbers_in").unwrap();
    assert!(matches!(
        pipeline.push("in_q", number(1)),
        Err(DbError::QueueNotFound(_))
    ));
    pipeline
        .create_reader(ReaderDefinition::in_memory("numbers_in", "numbers", "in_q"))
        .unwrap();
    pipeline.push("in_q", number(9)).unwrap();
    let mut row = pop_within(&pipeline, "out_q");
    assert_eq!(row.get::<i32>(0).unwrap(), 9);
}

#[test]
fn rows_violating_the_schema_are_rejected_by_the_reader() {
    let pipeline = default_pipeline();
    pipeline
        .push("in_q", SourceRow::builder().add_column("other", 1_i32).unwrap().build())
        .unwrap();
    pipeline.push("in_q", number(3)).unwrap();

    let mut row = pop_within(&pipeline, "out_q");
    assert_eq!(row.get::<i32>(0).unwrap(), 3);
    let metrics = pipeline.reader_metrics("numbers_in").unwrap();
    assert_eq!(metrics.rejected, 1);
    let last = pipeline.reader_last_error("numbers_in").unwrap().unwrap();
    assert_eq!(last.code, ErrorCode::InvalidFormat);
}
