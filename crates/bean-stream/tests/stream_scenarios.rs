//! End-to-end stream behavior against the in-memory Bean

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bean_stream::{
    stamp_captured_at, BeanStream, Coalescer, DeviceError, EndCause, EventReceiver, FlowControl,
    MockBean, Payload, Reading, ReadingKind, Row, StopOutcome, StreamConfig, StreamError,
    StreamEvent, StreamOptions, StreamState, Timestamp,
};
use tokio::time::timeout;

const TICK: Duration = Duration::from_millis(100);
const ACCEL_RAW: [u8; 6] = [0x00, 0x01, 0x80, 0xff, 0x00, 0x00];

fn drain_events(events: &mut EventReceiver) -> Vec<StreamEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

fn ended_causes(events: &[StreamEvent]) -> Vec<EndCause> {
    events
        .iter()
        .filter_map(|event| match event {
            StreamEvent::Ended { cause } => Some(*cause),
            _ => None,
        })
        .collect()
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

// ----------------------------------------------------------------------------
// Backpressure
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_full_buffer_suspends_poll_cycle() {
    let device = Arc::new(
        MockBean::new("bean")
            .with_value(ReadingKind::Battery, vec![80])
            .with_value(ReadingKind::Temperature, vec![21]),
    );
    let config = StreamConfig::new()
        .with_poll_interval(TICK)
        .with_poll_target(ReadingKind::Battery)
        .with_poll_target(ReadingKind::Temperature)
        .with_capacity(2);
    let stream = BeanStream::new(device.clone(), config);
    let mut readings = stream.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(350)).await;

    // Second tick's battery read is parked in push; no further reads
    assert_eq!(readings.len(), 2);
    assert_eq!(device.read_count(ReadingKind::Battery), 2);
    assert_eq!(device.read_count(ReadingKind::Temperature), 1);

    let kinds = [
        readings.next().await.unwrap().kind(),
        readings.next().await.unwrap().kind(),
        readings.next().await.unwrap().kind(),
    ];
    assert_eq!(
        kinds,
        [ReadingKind::Battery, ReadingKind::Temperature, ReadingKind::Battery]
    );
    assert!(readings.len() <= 2);

    assert_eq!(stream.stop().await, StopOutcome::Graceful);
}

#[tokio::test(start_paused = true)]
async fn test_lossless_backpressure_reaches_device() {
    let device = Arc::new(
        MockBean::new("bean").with_notify_source(ReadingKind::Serial, FlowControl::Lossless),
    );
    let config = StreamConfig::new()
        .with_notify_target(ReadingKind::Serial)
        .with_capacity(1);
    let stream = BeanStream::new(device.clone(), config);
    let mut readings = stream.start().await.unwrap();

    // One buffered, one held by the forwarder, one queued at the device
    for chunk in ["a", "b", "c"] {
        assert!(timeout(TICK, device.notify(ReadingKind::Serial, chunk.as_bytes()))
            .await
            .unwrap());
        settle().await;
    }
    assert!(timeout(TICK, device.notify(ReadingKind::Serial, b"d".to_vec()))
        .await
        .is_err());
    assert_eq!(readings.len(), 1);

    assert_eq!(readings.next().await.unwrap().payload, Payload::Serial { data: b"a".to_vec() });
    settle().await;
    assert!(timeout(TICK, device.notify(ReadingKind::Serial, b"d".to_vec()))
        .await
        .unwrap());

    for expected in ["b", "c", "d"] {
        let reading = readings.next().await.unwrap();
        assert_eq!(reading.payload, Payload::Serial { data: expected.as_bytes().to_vec() });
    }

    assert_eq!(stream.stop().await, StopOutcome::Graceful);
}

#[tokio::test(start_paused = true)]
async fn test_lossy_source_keeps_newest_pending() {
    let device = Arc::new(
        MockBean::new("bean").with_notify_source(ReadingKind::Serial, FlowControl::Lossy),
    );
    let config = StreamConfig::new()
        .with_notify_target(ReadingKind::Serial)
        .with_capacity(1);
    let stream = BeanStream::new(device.clone(), config);
    let mut events = stream.subscribe_events();
    let mut readings = stream.start().await.unwrap();

    for chunk in ["a", "b", "c"] {
        assert!(device.notify(ReadingKind::Serial, chunk.as_bytes()).await);
        settle().await;
    }

    let first = readings.next().await.unwrap();
    let second = readings.next().await.unwrap();
    assert_eq!(first.payload, Payload::Serial { data: b"a".to_vec() });
    assert_eq!(second.payload, Payload::Serial { data: b"c".to_vec() });

    let dropped = drain_events(&mut events)
        .into_iter()
        .filter(|event| {
            *event
                == StreamEvent::NotificationDropped {
                    source: ReadingKind::Serial,
                }
        })
        .count();
    assert_eq!(dropped, 1);
}

// ----------------------------------------------------------------------------
// Transforms
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_coalesced_row_keeps_first_capture_time() {
    let device = Arc::new(
        MockBean::new("bean")
            .with_value(ReadingKind::Accelerometer, ACCEL_RAW.to_vec())
            .with_value(ReadingKind::Temperature, vec![23]),
    );
    let options = StreamOptions {
        poll: Some(100),
        poll_accell: true,
        poll_temp: true,
        high_water_mark: Some(32),
        ..Default::default()
    };
    let config = StreamConfig::from_options(&options).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut coalescer = Coalescer::new();
    let hook = {
        let seen = seen.clone();
        move |reading: bean_stream::Reading| {
            seen.lock().unwrap().push(reading.captured_at);
            coalescer.offer(reading)
        }
    };

    let stream = BeanStream::new(device.clone(), config).with_before_push(hook);
    let mut readings = stream.start().await.unwrap();

    let merged = readings.next().await.unwrap();
    let row = Row::from_reading(&merged).unwrap();
    assert_eq!(row.device, "bean");
    assert_eq!(row.celsius, 23);
    assert!((row.accell_x - 256.0 * 0.00391).abs() < 1e-9);
    assert!((row.accell_y + 128.0 * 0.00391).abs() < 1e-9);
    assert_eq!(row.accell_z, 0.0);

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 2);
    assert_eq!(merged.captured_at, seen[0]);

    stream.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_stamp_runs_when_reading_arrives() {
    let device = Arc::new(
        MockBean::new("bean").with_notify_source(ReadingKind::Serial, FlowControl::Lossless),
    );
    let config = StreamConfig::new()
        .with_notify_target(ReadingKind::Serial)
        .with_capacity(1);

    let stamped: Arc<Mutex<Vec<Timestamp>>> = Arc::new(Mutex::new(Vec::new()));
    let mut stamp = stamp_captured_at();
    let hook = {
        let stamped = stamped.clone();
        move |reading: Reading| {
            let reading = stamp(reading)?;
            stamped.lock().unwrap().push(reading.captured_at);
            Some(reading)
        }
    };

    let stream = BeanStream::new(device.clone(), config).with_before_push(hook);
    let mut readings = stream.start().await.unwrap();

    for chunk in ["a", "b"] {
        assert!(device.notify(ReadingKind::Serial, chunk.as_bytes()).await);
        settle().await;
    }

    // The second reading is waiting for room but already stamped
    assert_eq!(readings.len(), 1);
    let stamps = stamped.lock().unwrap().clone();
    assert_eq!(stamps.len(), 2);

    assert_eq!(readings.next().await.unwrap().captured_at, stamps[0]);
    assert_eq!(readings.next().await.unwrap().captured_at, stamps[1]);
    assert_eq!(stamped.lock().unwrap().len(), 2);

    stream.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_coalescer_partial_does_not_stall_full_buffer() {
    let device = Arc::new(
        MockBean::new("bean")
            .with_value(ReadingKind::Temperature, vec![20])
            .with_value(ReadingKind::Battery, vec![90]),
    );
    let config = StreamConfig::new()
        .with_poll_interval(TICK)
        .with_poll_target(ReadingKind::Battery)
        .with_poll_target(ReadingKind::Temperature)
        .with_capacity(1);

    // Batteries pass through; temperatures are held as partials
    let mut coalescer = Coalescer::new();
    let hook = move |reading: Reading| match reading.kind() {
        ReadingKind::Battery => Some(reading),
        _ => coalescer.offer(reading),
    };
    let stream = BeanStream::new(device.clone(), config).with_before_push(hook);
    let readings = stream.start().await.unwrap();

    // The held temperature never waits for room, so the second tick runs
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(readings.len(), 1);
    assert_eq!(device.read_count(ReadingKind::Temperature), 1);
    assert_eq!(device.read_count(ReadingKind::Battery), 2);

    stream.stop().await;
}

// ----------------------------------------------------------------------------
// Failures
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_failed_tick_skips_one_reading() {
    let device = Arc::new(MockBean::new("bean"));
    for level in [50u8, 51] {
        device.script_read(ReadingKind::Battery, Ok(vec![level]));
    }
    device.script_read(
        ReadingKind::Battery,
        Err(DeviceError::ReadFailed {
            characteristic: "batt".to_string(),
            reason: "gatt timeout".to_string(),
        }),
    );
    for level in [53u8, 54] {
        device.script_read(ReadingKind::Battery, Ok(vec![level]));
    }

    let config = StreamConfig::new()
        .with_poll_interval(TICK)
        .with_poll_target(ReadingKind::Battery);
    let stream = BeanStream::new(device.clone(), config);
    let mut events = stream.subscribe_events();
    let mut readings = stream.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(550)).await;
    assert_eq!(device.read_count(ReadingKind::Battery), 5);
    assert_eq!(stream.stop().await, StopOutcome::Graceful);

    let mut levels = Vec::new();
    while let Some(reading) = readings.next().await {
        match reading.payload {
            Payload::Battery { level } => levels.push(level),
            other => panic!("unexpected payload {:?}", other),
        }
    }
    assert_eq!(levels, vec![50, 51, 53, 54]);

    let events = drain_events(&mut events);
    let failures = events
        .iter()
        .filter(|event| matches!(event, StreamEvent::ReadFailed { source: ReadingKind::Battery, .. }))
        .count();
    assert_eq!(failures, 1);
    assert_eq!(ended_causes(&events), vec![EndCause::Stopped]);
}

#[tokio::test(start_paused = true)]
async fn test_failure_tolerance_ends_stream() {
    let device = Arc::new(MockBean::new("bean").with_value(ReadingKind::Battery, vec![70]));
    device.script_read(ReadingKind::Battery, Ok(vec![69]));
    for _ in 0..3 {
        device.script_read(ReadingKind::Battery, Err(DeviceError::NotConnected));
    }

    let config = StreamConfig::new()
        .with_poll_interval(TICK)
        .with_poll_target(ReadingKind::Battery)
        .with_max_consecutive_failures(3);
    let stream = BeanStream::new(device.clone(), config);
    let mut events = stream.subscribe_events();
    let mut readings = stream.start().await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), stream.ended())
        .await
        .unwrap();

    assert_eq!(readings.next().await.unwrap().payload, Payload::Battery { level: 69 });
    assert_eq!(readings.next().await, None);
    assert_eq!(ended_causes(&drain_events(&mut events)), vec![EndCause::Failed]);
    assert_eq!(device.disconnect_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_subscribe_failure_does_not_block_other_sources() {
    let device = Arc::new(
        MockBean::new("bean")
            .with_notify_source(ReadingKind::Scratch(1), FlowControl::Lossless)
            .with_notify_source(ReadingKind::Scratch(2), FlowControl::Lossless),
    );
    device.fail_subscribe(ReadingKind::Scratch(1));

    let options = StreamOptions {
        notify_scratch: Some("1,2".to_string()),
        ..Default::default()
    };
    let stream = BeanStream::new(device.clone(), StreamConfig::from_options(&options).unwrap());
    let mut events = stream.subscribe_events();
    let mut readings = stream.start().await.unwrap();

    assert!(device.notify(ReadingKind::Scratch(2), b"ok".to_vec()).await);
    let reading = readings.next().await.unwrap();
    assert_eq!(reading.kind(), ReadingKind::Scratch(2));

    let events = drain_events(&mut events);
    assert!(events.iter().any(|event| matches!(
        event,
        StreamEvent::SubscribeFailed {
            source: ReadingKind::Scratch(1),
            ..
        }
    )));

    stream.stop().await;
    assert_eq!(device.unsubscribe_count(ReadingKind::Scratch(1)), 0);
    assert_eq!(device.unsubscribe_count(ReadingKind::Scratch(2)), 1);
}

#[tokio::test(start_paused = true)]
async fn test_undecodable_notification_is_reported() {
    let device = Arc::new(
        MockBean::new("bean").with_notify_source(ReadingKind::Scratch(3), FlowControl::Lossless),
    );
    let config = StreamConfig::new().with_notify_target(ReadingKind::Scratch(3));
    let stream = BeanStream::new(device.clone(), config);
    let mut events = stream.subscribe_events();
    let mut readings = stream.start().await.unwrap();

    assert!(device.notify(ReadingKind::Scratch(3), vec![0u8; 21]).await);
    assert!(device.notify(ReadingKind::Scratch(3), vec![0xff, 0xff]).await);

    let reading = readings.next().await.unwrap();
    match reading.payload {
        Payload::Scratch { index, value } => {
            assert_eq!(index, 3);
            assert_eq!(value.int, -1);
            assert_eq!(value.uint, 0xffff);
        }
        other => panic!("unexpected payload {:?}", other),
    }
    assert!(matches!(
        drain_events(&mut events).first(),
        Some(StreamEvent::DecodeFailed { .. })
    ));

    stream.stop().await;
}

// ----------------------------------------------------------------------------
// Lifecycle
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_disconnect_drains_buffered_readings() {
    let device = Arc::new(
        MockBean::new("bean").with_notify_source(ReadingKind::Serial, FlowControl::Lossless),
    );
    let config = StreamConfig::new().with_notify_target(ReadingKind::Serial);
    let stream = BeanStream::new(device.clone(), config);
    let mut events = stream.subscribe_events();
    let mut readings = stream.start().await.unwrap();

    assert!(device.notify(ReadingKind::Serial, b"hello".to_vec()).await);
    settle().await;
    assert_eq!(readings.len(), 1);

    device.drop_link();
    tokio::time::timeout(Duration::from_secs(5), stream.ended())
        .await
        .unwrap();

    let reading = readings.next().await.unwrap();
    assert_eq!(reading.payload, Payload::Serial { data: b"hello".to_vec() });
    assert_eq!(readings.next().await, None);

    assert_eq!(stream.state(), StreamState::Ended);
    assert_eq!(device.disconnect_count(), 1);
    assert_eq!(
        ended_causes(&drain_events(&mut events)),
        vec![EndCause::Disconnected]
    );
    assert_eq!(stream.stop().await, StopOutcome::AlreadyEnded);
    assert_eq!(device.disconnect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_second_stop_forces_teardown() {
    let device = Arc::new(
        MockBean::new("bean").with_notify_source(ReadingKind::Serial, FlowControl::Lossless),
    );
    device.set_disconnect_delay(Duration::from_secs(10));
    let config = StreamConfig::new().with_notify_target(ReadingKind::Serial);
    let stream = BeanStream::new(device.clone(), config);
    let mut events = stream.subscribe_events();
    let mut readings = stream.start().await.unwrap();

    assert!(device.notify(ReadingKind::Serial, b"pending".to_vec()).await);
    settle().await;

    let first = {
        let stream = stream.clone();
        tokio::spawn(async move { stream.stop().await })
    };
    settle().await;
    assert_eq!(stream.state(), StreamState::Ending);
    assert_eq!(device.disconnect_count(), 1);

    assert_eq!(stream.stop().await, StopOutcome::Forced);
    assert_eq!(stream.state(), StreamState::Ended);
    assert_eq!(first.await.unwrap(), StopOutcome::Graceful);

    // Buffered readings are dropped on forced teardown
    assert_eq!(readings.next().await, None);

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(device.disconnect_count(), 1);
    assert_eq!(ended_causes(&drain_events(&mut events)), vec![EndCause::Forced]);
}

#[tokio::test(start_paused = true)]
async fn test_start_after_end_is_invalid() {
    let device = Arc::new(
        MockBean::new("bean").with_notify_source(ReadingKind::Serial, FlowControl::Lossless),
    );
    let config = StreamConfig::new().with_notify_target(ReadingKind::Serial);
    let stream = BeanStream::new(device.clone(), config);

    let _readings = stream.start().await.unwrap();
    assert!(matches!(
        stream.start().await,
        Err(StreamError::InvalidState {
            operation: "start",
            state: StreamState::Streaming
        })
    ));

    assert_eq!(stream.stop().await, StopOutcome::Graceful);
    assert!(matches!(
        stream.start().await,
        Err(StreamError::InvalidState {
            operation: "start",
            state: StreamState::Ended
        })
    ));
    assert_eq!(device.connect_count(), 1);
}

#[tokio::test]
async fn test_empty_options_fail_fast() {
    let result = StreamConfig::from_options(&StreamOptions::default());
    assert!(matches!(result, Err(StreamError::InvalidConfig { .. })));

    let device = Arc::new(MockBean::new("bean"));
    let stream = BeanStream::new(device.clone(), StreamConfig::new().with_capacity(4));
    assert!(matches!(
        stream.start().await,
        Err(StreamError::InvalidConfig { .. })
    ));
    assert!(device.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_poll_and_notify_same_scratch() {
    let device = Arc::new(
        MockBean::new("bean")
            .with_value(ReadingKind::Scratch(1), b"poll".to_vec())
            .with_notify_source(ReadingKind::Scratch(1), FlowControl::Lossless),
    );
    let options = StreamOptions {
        poll: Some(100),
        poll_scratch: Some("1".to_string()),
        notify_scratch: Some("1".to_string()),
        ..Default::default()
    };
    let stream = BeanStream::new(device.clone(), StreamConfig::from_options(&options).unwrap());
    let mut readings = stream.start().await.unwrap();

    assert!(device.notify(ReadingKind::Scratch(1), b"push".to_vec()).await);
    let first = readings.next().await.unwrap();
    let second = readings.next().await.unwrap();

    let data = |reading: &bean_stream::Reading| match &reading.payload {
        Payload::Scratch { value, .. } => value.data.clone(),
        other => panic!("unexpected payload {:?}", other),
    };
    assert_eq!(data(&first), "push");
    assert_eq!(data(&second), "poll");
    assert_eq!(first.kind(), second.kind());

    stream.stop().await;
}
