//! End-to-end tests for the acquisition pipeline.
//!
//! Edges are delivered to the gate by hand (or at a fixed rate), samples come
//! from the simulated front end, and datagrams are captured either in a
//! `RecordingSink` or by a real UDP receiver on loopback.

use ecg_stream::config::StreamConfig;
use ecg_stream::gate::EdgeOutcome;
use ecg_stream::link::{link_channel, LinkState};
use ecg_stream::packetizer::RecordingSink;
use ecg_stream::queue::sample_queue;
use ecg_stream::reader::{Acquisition, ReaderSettings, SampleReader};
use ecg_stream::receiver::{decode_datagram, DatagramReceiver};
use ecg_stream::sensor::simulated::{waveform, DEFAULT_SAMPLE_RATE_HZ};
use ecg_stream::sensor::SimulatedSensor;
use ecg_stream::{Pipeline, PipelineContext, Record, Sample};
use std::sync::Arc;
use std::time::Duration;

fn test_config() -> StreamConfig {
    let mut config = StreamConfig::default();
    config.application.log_level = "debug".to_string();
    config.network.dest_addr = "127.0.0.1".to_string();
    config.network.bind_addr = "127.0.0.1:0".to_string();
    config.network.link_timeout = Duration::from_secs(1);
    config
}

fn expected_records(count: u64) -> Vec<Record> {
    (0..count)
        .map(|i| Sample::new(i, waveform(i, DEFAULT_SAMPLE_RATE_HZ), false).record())
        .collect()
}

fn records_from(sink: &RecordingSink) -> Vec<Record> {
    sink.datagrams()
        .iter()
        .flat_map(|d| {
            let decoded = decode_datagram(d);
            assert!(decoded.is_clean(), "malformed lines: {:?}", decoded.skipped);
            decoded.records
        })
        .collect()
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_micros(200)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn spaced_edges_produce_one_sample_each_in_order() {
    let sink = RecordingSink::new();
    let (_link, monitor) = link_channel(LinkState::Up);
    let ctx = PipelineContext::from_config(&test_config()).unwrap();
    let pipeline = Pipeline::start_with_sink(ctx, SimulatedSensor::new(), monitor, sink.clone())
        .await
        .unwrap();

    const EDGES: u64 = 137;
    for i in 0..EDGES {
        assert_eq!(pipeline.gate().on_edge(), EdgeOutcome::Admitted);
        let stats = pipeline.stats().clone();
        let gate = pipeline.gate().clone();
        wait_until(move || stats.snapshot().samples_produced == i + 1 && !gate.is_busy()).await;
    }

    let snapshot = pipeline.shutdown().await;
    assert_eq!(snapshot.samples_produced, EDGES);
    assert_eq!(snapshot.edges_dropped, 0);
    assert_eq!(snapshot.records_sent, EDGES);
    assert_eq!(records_from(&sink), expected_records(EDGES));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fast_edges_are_shed_without_losing_admitted_edges() {
    let sensor = SimulatedSensor::new();
    let sensor_handle = sensor.handle();
    sensor_handle.set_read_latency(Duration::from_millis(2));

    let (_link, monitor) = link_channel(LinkState::Up);
    let ctx = PipelineContext::from_config(&test_config()).unwrap();
    let pipeline = Pipeline::start_with_sink(ctx, sensor, monitor, RecordingSink::new())
        .await
        .unwrap();

    const EDGES: u64 = 400;
    for _ in 0..EDGES {
        pipeline.gate().on_edge();
        tokio::time::sleep(Duration::from_micros(50)).await;
    }
    let gate = pipeline.gate().clone();
    wait_until(move || !gate.is_busy()).await;

    let snapshot = pipeline.shutdown().await;
    assert_eq!(snapshot.edges_admitted + snapshot.edges_dropped, EDGES);
    assert!(snapshot.edges_dropped > 0, "edges faster than a read must be shed");
    assert!(snapshot.samples_produced <= EDGES);
    assert_eq!(snapshot.samples_produced, snapshot.edges_admitted);
    // Exclusive access to the sensor is enforced by `&mut self`; this only
    // checks that every admitted edge cost exactly one stream read.
    assert_eq!(sensor_handle.stream_reads(), snapshot.edges_admitted);
}

#[tokio::test(start_paused = true)]
async fn single_sample_is_flushed_after_idle_timeout() {
    let config = test_config();
    let flush_timeout = config.packet.flush_timeout;
    let sink = RecordingSink::new();
    let (_link, monitor) = link_channel(LinkState::Up);
    let ctx = PipelineContext::from_config(&config).unwrap();
    let pipeline = Pipeline::start_with_sink(ctx, SimulatedSensor::new(), monitor, sink.clone())
        .await
        .unwrap();

    pipeline.gate().on_edge();
    let stats = pipeline.stats().clone();
    wait_until(move || stats.snapshot().samples_produced == 1).await;
    assert!(sink.datagrams().is_empty());

    tokio::time::sleep(flush_timeout + Duration::from_millis(1)).await;
    let datagrams = sink.datagrams();
    assert_eq!(datagrams.len(), 1);
    assert_eq!(decode_datagram(&datagrams[0]).records, expected_records(1));

    pipeline.shutdown().await;
}

#[tokio::test]
async fn streams_records_to_udp_receiver() {
    let mut receiver = DatagramReceiver::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let port = receiver.local_addr().unwrap().port();

    let mut config = test_config();
    config.network.dest_port = port;
    let (_link, monitor) = link_channel(LinkState::Up);
    let ctx = PipelineContext::from_config(&config).unwrap();
    let pipeline = Pipeline::start(ctx, SimulatedSensor::new(), monitor)
        .await
        .unwrap();
    assert_eq!(pipeline.destination().port(), port);

    const EDGES: u64 = 50;
    for i in 0..EDGES {
        pipeline.gate().on_edge();
        let stats = pipeline.stats().clone();
        let gate = pipeline.gate().clone();
        wait_until(move || stats.snapshot().samples_produced == i + 1 && !gate.is_busy()).await;
    }

    let mut received = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        while (received.len() as u64) < EDGES {
            let (_, decoded) = receiver.recv_records().await.unwrap();
            assert!(decoded.is_clean());
            received.extend(decoded.records);
        }
    })
    .await
    .expect("all records received");

    assert_eq!(received, expected_records(EDGES));
    pipeline.shutdown().await;
}

#[tokio::test]
async fn link_down_discards_until_link_returns() {
    let sink = RecordingSink::new();
    let (link, monitor) = link_channel(LinkState::Up);
    let ctx = PipelineContext::from_config(&test_config()).unwrap();
    let pipeline = Pipeline::start_with_sink(ctx, SimulatedSensor::new(), monitor, sink.clone())
        .await
        .unwrap();

    link.set_down();
    pipeline.gate().on_edge();
    let stats = pipeline.stats().clone();
    wait_until(move || stats.snapshot().link_down_discards == 1).await;
    assert!(sink.datagrams().is_empty());

    link.set_up();
    let gate = pipeline.gate().clone();
    wait_until(move || !gate.is_busy()).await;
    pipeline.gate().on_edge();
    let stats = pipeline.stats().clone();
    wait_until(move || stats.snapshot().datagrams_sent == 1).await;

    let snapshot = pipeline.shutdown().await;
    assert_eq!(snapshot.samples_produced, 2);
    assert_eq!(records_from(&sink), vec![expected_records(2)[1]]);
}

#[tokio::test]
async fn reader_never_blocks_on_full_queue() {
    let gate = Arc::new(ecg_stream::gate::EdgeGate::new());
    let (tx, _rx) = sample_queue(8, gate.stats().clone()).unwrap();
    let mut reader = SampleReader::new(
        gate.clone(),
        SimulatedSensor::new(),
        tx,
        ReaderSettings::default(),
    );

    tokio::time::timeout(Duration::from_secs(1), async {
        for seq in 0..100u64 {
            assert_eq!(gate.on_edge(), EdgeOutcome::Admitted);
            let outcome = reader.acquire_once().await;
            if seq < 8 {
                assert_eq!(outcome, Acquisition::Enqueued(seq));
            } else {
                assert_eq!(outcome, Acquisition::QueueFull(seq));
            }
        }
    })
    .await
    .expect("producer must never block");

    let snapshot = gate.stats().snapshot();
    assert_eq!(snapshot.samples_produced, 100);
    assert_eq!(snapshot.queue_dropped, 92);
}

#[tokio::test]
async fn link_that_never_comes_up_aborts_startup() {
    let mut config = test_config();
    config.network.link_timeout = Duration::from_millis(50);
    let (_link, monitor) = link_channel(LinkState::Down);
    let ctx = PipelineContext::from_config(&config).unwrap();

    let result = Pipeline::start(ctx, SimulatedSensor::new(), monitor).await;
    assert!(matches!(
        result,
        Err(ecg_stream::StreamError::LinkTimeout(_))
    ));
}
