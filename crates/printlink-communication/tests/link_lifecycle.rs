//! End-to-end link tests against a scripted printer

use printlink_communication::protocol::{codec, gcode};
use printlink_communication::{GcodeJob, MockTransport, MockTransportFactory, PrinterConnection, Transport};
use printlink_core::{keys, LinkState, Notification};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

const WAIT: Duration = Duration::from_secs(5);

fn unframe(line: &str) -> String {
    codec::parse_framed(line)
        .map(|framed| framed.line)
        .unwrap_or_else(|_| line.to_string())
}

/// What a well-behaved Marlin board answers
fn marlin_reply(text: &str) -> Vec<String> {
    match gcode::command(text).as_str() {
        "M105" => vec!["ok T:20.0 /0.0 B:20.0 /0.0".to_string()],
        "M114" => vec!["X:0.00 Y:0.00 Z:0.00 E:0.00".to_string(), "ok".to_string()],
        "M115" => vec![
            "FIRMWARE_NAME:Marlin 2.1.2 EXTRUDER_COUNT:1".to_string(),
            "ok".to_string(),
        ],
        _ => vec!["ok".to_string()],
    }
}

fn settings() -> HashMap<String, String> {
    let mut settings = HashMap::new();
    settings.insert(keys::SEND_WITH_CHECKSUM.to_string(), "1".to_string());
    settings.insert(keys::CONNECT_TIMEOUT_MS.to_string(), "3000".to_string());
    settings.insert(keys::CANCEL_GCODE.to_string(), "M84".to_string());
    settings
}

fn link(mock: MockTransport) -> PrinterConnection {
    PrinterConnection::with_transport_factory(
        Arc::new(settings()),
        Arc::new(MockTransportFactory::new(mock)),
    )
}

async fn connect(connection: &PrinterConnection) {
    connection.connect().unwrap();
    let reached = connection
        .wait_for_state(&[LinkState::Connected, LinkState::FailedToConnect], WAIT)
        .await;
    assert_eq!(reached, Some(LinkState::Connected));
}

async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

fn sent(mock: &MockTransport) -> Vec<String> {
    mock.written_lines().iter().map(|line| unframe(line)).collect()
}

fn drain(rx: &mut broadcast::Receiver<Notification>) -> Vec<Notification> {
    let mut seen = Vec::new();
    while let Ok(notification) = rx.try_recv() {
        seen.push(notification);
    }
    seen
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_connect_identifies_then_queries_position() {
    let mock = MockTransport::new().with_responder(|line| marlin_reply(&unframe(line)));
    let connection = link(mock.clone());
    let mut rx = connection.subscribe();
    connect(&connection).await;

    assert!(wait_until(|| sent(&mock).iter().any(|l| l == "M114")).await);
    let sent = sent(&mock);
    assert_eq!(sent.first().map(String::as_str), Some("M105"));
    let m115 = sent.iter().position(|l| l == "M115").unwrap();
    let m114 = sent.iter().position(|l| l == "M114").unwrap();
    assert!(m115 < m114);

    // Line numbers are re-based before anything else is framed.
    let first_framed = mock
        .written_lines()
        .into_iter()
        .find(|l| l.starts_with('N'))
        .unwrap();
    assert_eq!(codec::parse_framed(&first_framed).unwrap().line, "M110 N0");

    assert!(wait_until(|| connection.firmware().name == "marlin").await);
    assert!(connection.is_connected());
    assert!(drain(&mut rx).contains(&Notification::ConnectionSucceeded));

    connection.disconnect().await.unwrap();
    assert_eq!(connection.state(), LinkState::Disconnected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_silent_printer_fails_to_connect() {
    let mock = MockTransport::new();
    let mut settings = settings();
    settings.insert(keys::CONNECT_TIMEOUT_MS.to_string(), "300".to_string());
    let connection = PrinterConnection::with_transport_factory(
        Arc::new(settings),
        Arc::new(MockTransportFactory::new(mock.clone())),
    );
    connection.connect().unwrap();

    let reached = connection
        .wait_for_state(&[LinkState::FailedToConnect], WAIT)
        .await;
    assert_eq!(reached, Some(LinkState::FailedToConnect));
    assert!(!mock.is_open());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_print_streams_job_to_finish() {
    let mock = MockTransport::new().with_responder(|line| marlin_reply(&unframe(line)));
    let connection = link(mock.clone());
    let mut rx = connection.subscribe();
    connect(&connection).await;

    let job = GcodeJob::from_lines(
        "cube.gcode",
        ["G21", "G1 X10 Y10 F3000", "; perimeter", "G1 X20", "G1 X30"],
    );
    connection.start_print(job, None).unwrap();
    let reached = connection
        .wait_for_state(&[LinkState::FinishedPrint], WAIT)
        .await;
    assert_eq!(reached, Some(LinkState::FinishedPrint));

    let xs: Vec<f64> = sent(&mock)
        .iter()
        .filter(|l| gcode::is_move(l))
        .filter_map(|l| gcode::word_value(l, 'X'))
        .collect();
    assert_eq!(xs, vec![10.0, 20.0, 30.0]);
    assert!(!sent(&mock).iter().any(|l| l.contains("perimeter")));

    let task = connection.print_task().unwrap();
    assert!(task.print_complete);
    assert_eq!(connection.percent_complete(), 100.0);
    assert!(drain(&mut rx).contains(&Notification::PrintFinished {
        job_name: "cube.gcode".to_string()
    }));

    connection.stop().await.unwrap();
    assert_eq!(connection.state(), LinkState::Connected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_resend_replays_archived_lines_verbatim() {
    let requested = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&requested);
    let mock = MockTransport::new().with_responder(move |line| {
        if let Ok(framed) = codec::parse_framed(line) {
            if framed.line == "G1 X5" && !flag.swap(true, Ordering::SeqCst) {
                return vec![format!("Resend: {}", framed.seq - 2), "ok".to_string()];
            }
        }
        marlin_reply(&unframe(line))
    });
    let connection = link(mock.clone());
    connect(&connection).await;

    let lines: Vec<String> = (1..=8).map(|i| format!("G1 X{}", i)).collect();
    connection
        .start_print(GcodeJob::from_lines("resend.gcode", lines), None)
        .unwrap();
    let reached = connection
        .wait_for_state(&[LinkState::FinishedPrint], WAIT)
        .await;
    assert_eq!(reached, Some(LinkState::FinishedPrint));
    assert!(requested.load(Ordering::SeqCst));

    let framed: Vec<String> = mock
        .written_lines()
        .into_iter()
        .filter(|l| l.starts_with('N'))
        .collect();
    let seqs: Vec<u64> = framed
        .iter()
        .map(|l| codec::parse_framed(l).unwrap().seq)
        .collect();

    let rewind = seqs.windows(2).position(|w| w[1] <= w[0]).unwrap();
    let target = seqs[rewind];
    assert_eq!(seqs[rewind + 1], target - 2);
    for (i, pair) in seqs.windows(2).enumerate() {
        if i != rewind {
            assert_eq!(pair[1], pair[0] + 1, "gap or repeat in {:?}", seqs);
        }
    }

    let mut first_sent: HashMap<u64, &String> = HashMap::new();
    for (seq, line) in seqs.iter().zip(&framed) {
        let original = *first_sent.entry(*seq).or_insert(line);
        assert_eq!(original, line);
    }
    assert_eq!(seqs.iter().filter(|s| **s == target).count(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_always_settles() {
    let stalled = Arc::new(AtomicBool::new(false));
    let gate = Arc::clone(&stalled);
    let mock = MockTransport::new().with_responder(move |line| {
        if gate.load(Ordering::SeqCst) {
            Vec::new()
        } else {
            marlin_reply(&unframe(line))
        }
    });
    let connection = link(mock.clone());
    let settled = [
        LinkState::Connected,
        LinkState::Disconnected,
        LinkState::FailedToConnect,
    ];

    connection.stop().await.unwrap();
    assert!(settled.contains(&connection.state()));

    connect(&connection).await;
    assert!(wait_until(|| sent(&mock).iter().any(|l| l == "M114")).await);
    stalled.store(true, Ordering::SeqCst);

    let mut rx = connection.subscribe();
    connection
        .start_print(GcodeJob::from_lines("long.gcode", ["G1 X1", "G1 X2"]), None)
        .unwrap();
    assert_eq!(connection.state(), LinkState::Printing);

    connection.stop().await.unwrap();
    assert_eq!(connection.state(), LinkState::Connected);
    assert!(connection.print_task().unwrap().ended_at.is_some());
    assert!(drain(&mut rx).contains(&Notification::PrintCanceled));

    connection.stop().await.unwrap();
    assert!(settled.contains(&connection.state()));

    connection.disconnect().await.unwrap();
    connection.stop().await.unwrap();
    assert_eq!(connection.state(), LinkState::Disconnected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_removable_media_print_finishes_from_status() {
    let mock = MockTransport::new().with_responder(|line| {
        let text = unframe(line);
        if gcode::is_command(&text, "M27") {
            vec![
                "SD printing byte 100/100".to_string(),
                "Done printing file".to_string(),
            ]
        } else {
            marlin_reply(&text)
        }
    });
    let connection = link(mock.clone());
    connect(&connection).await;
    assert!(wait_until(|| sent(&mock).iter().any(|l| l == "M114")).await);

    connection.start_removable_media_print("cube.gco").unwrap();
    let reached = connection
        .wait_for_state(&[LinkState::FinishedPrint], WAIT)
        .await;
    assert_eq!(reached, Some(LinkState::FinishedPrint));

    let sent = sent(&mock);
    let select = sent.iter().position(|l| l == "M23 cube.gco").unwrap();
    assert_eq!(sent[select + 1], "M24");
    assert!(connection.print_task().unwrap().print_complete);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_read_failure_loses_connection() {
    let mock = MockTransport::new().with_responder(|line| marlin_reply(&unframe(line)));
    let connection = link(mock.clone());
    let mut rx = connection.subscribe();
    connect(&connection).await;

    mock.fail_reads(true);
    let reached = connection
        .wait_for_state(&[LinkState::ConnectionLost], WAIT)
        .await;
    assert_eq!(reached, Some(LinkState::ConnectionLost));
    assert!(drain(&mut rx)
        .iter()
        .any(|n| matches!(n, Notification::ConnectionFailed { .. })));
    assert!(connection.queue_line("G28").is_err());
}
