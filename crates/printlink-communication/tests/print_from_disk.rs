use printlink_communication::protocol::{codec, gcode};
use printlink_communication::transport::{MockTransport, MockTransportFactory};
use printlink_communication::{GcodeJob, PrinterConnection};
use printlink_core::{keys, LinkState, SettingsSource};
use printlink_settings::{PrinterSettings, SettingsStore};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn unframe(line: &str) -> String {
    codec::parse_framed(line)
        .map(|framed| framed.line)
        .unwrap_or_else(|_| line.to_string())
}

fn printer() -> MockTransport {
    MockTransport::new().with_responder(|line| match gcode::command(&unframe(line)).as_str() {
        "M105" => vec!["ok T:20.0 /0.0".to_string()],
        "M114" => vec!["X:0.00 Y:0.00 Z:0.00 E:0.00".to_string(), "ok".to_string()],
        _ => vec!["ok".to_string()],
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_job_file_printed_with_configured_feed_ratio() {
    let dir = TempDir::new().unwrap();
    let job_path = dir.path().join("square.gcode");
    std::fs::write(
        &job_path,
        "; square\r\nG21\r\nG1 X10 F3000\r\nG1 Y10\r\nG1 X0 F3000\r\n",
    )
    .unwrap();

    let mut settings = PrinterSettings::default();
    settings.connection.port = "mock".to_string();
    settings.connection.connect_timeout_ms = 3000;
    settings.print.feedrate_ratio = 0.5;
    let settings_path = dir.path().join("printer.toml");
    settings.save_to_file(&settings_path).unwrap();

    let store = Arc::new(SettingsStore::from_settings(
        &PrinterSettings::load_from_file(&settings_path).unwrap(),
    ));
    assert!(store.get_bool(keys::SEND_WITH_CHECKSUM));

    let mock = printer();
    let connection = PrinterConnection::with_transport_factory(
        store,
        Arc::new(MockTransportFactory::new(mock.clone())),
    );
    connection.connect().unwrap();
    let reached = connection
        .wait_for_state(&[LinkState::Connected, LinkState::FailedToConnect], Duration::from_secs(5))
        .await;
    assert_eq!(reached, Some(LinkState::Connected));

    let job = GcodeJob::load(&job_path).unwrap();
    assert_eq!(job.name(), "square.gcode");
    connection.start_print(job, None).unwrap();
    let reached = connection
        .wait_for_state(&[LinkState::FinishedPrint], Duration::from_secs(5))
        .await;
    assert_eq!(reached, Some(LinkState::FinishedPrint));

    let feeds: Vec<f64> = mock
        .written_lines()
        .iter()
        .map(|line| unframe(line))
        .filter(|line| gcode::is_move(line))
        .filter_map(|line| gcode::word_value(&line, 'F'))
        .collect();
    assert_eq!(feeds, vec![1500.0, 1500.0]);

    connection.disconnect().await.unwrap();
    assert_eq!(connection.state(), LinkState::Disconnected);
}
