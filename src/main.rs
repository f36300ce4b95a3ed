use anyhow::{bail, Context};
use printlink::{
    init_json_logging, init_logging, keys, list_ports, GcodeJob, LinkState, Notification,
    NotificationKind, PrinterConnection, PrinterSettings, SettingsStore,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio::sync::broadcast;

const USAGE: &str = "usage: printlink [--json] [--config <file>] (--list | <port> [baud] [job.gcode])";

/// Extra time on top of the handshake timeout before giving up on a connect
const CONNECT_GRACE: Duration = Duration::from_secs(2);
const PRINT_POLL: Duration = Duration::from_millis(500);

#[derive(Debug, Default)]
struct Args {
    json_logs: bool,
    list: bool,
    config: Option<PathBuf>,
    port: Option<String>,
    baud: Option<u32>,
    job: Option<PathBuf>,
}

impl Args {
    fn parse(mut args: impl Iterator<Item = String>) -> anyhow::Result<Self> {
        let mut parsed = Args::default();
        let mut positional = Vec::new();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--json" => parsed.json_logs = true,
                "--list" => parsed.list = true,
                "--config" => {
                    let path = args.next().context("--config needs a file")?;
                    parsed.config = Some(PathBuf::from(path));
                }
                "-h" | "--help" => bail!("{}", USAGE),
                _ => positional.push(arg),
            }
        }

        let mut positional = positional.into_iter();
        parsed.port = positional.next();
        for arg in positional {
            match arg.parse::<u32>() {
                Ok(baud) if parsed.baud.is_none() && parsed.job.is_none() => {
                    parsed.baud = Some(baud)
                }
                _ => parsed.job = Some(PathBuf::from(arg)),
            }
        }
        if parsed.port.is_none() && !parsed.list {
            bail!("{}", USAGE);
        }
        Ok(parsed)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse(std::env::args().skip(1))?;
    if args.json_logs {
        init_json_logging()?;
    } else {
        init_logging()?;
    }
    tracing::debug!("printlink {} built {}", printlink::VERSION, printlink::BUILD_DATE);

    if args.list {
        for port in list_ports()? {
            println!("{}\t{}", port.port_name, port.description);
        }
        return Ok(());
    }

    let settings = match &args.config {
        Some(path) => PrinterSettings::load_from_file(path)?,
        None => PrinterSettings::load_or_default()?,
    };
    let store = Arc::new(SettingsStore::from_settings(&settings));
    let port = args.port.clone().unwrap_or_default();
    store.set(keys::PORT_NAME, port.as_str());
    if let Some(baud) = args.baud {
        store.set(keys::BAUD_RATE, baud.to_string());
    }

    let connection = PrinterConnection::new(store);
    let log_task = tokio::spawn(log_notifications(connection.subscribe()));

    connection.connect()?;
    let connect_wait = Duration::from_millis(settings.connection.connect_timeout_ms) + CONNECT_GRACE;
    let reached = connection
        .wait_for_state(&[LinkState::Connected, LinkState::FailedToConnect], connect_wait)
        .await;
    if reached != Some(LinkState::Connected) {
        connection.stop().await?;
        bail!("could not connect to {}", port);
    }

    let outcome = match &args.job {
        Some(path) => print_job(&connection, path).await,
        None => terminal(&connection).await,
    };

    connection.disconnect().await?;
    log_task.abort();
    outcome
}

/// Stream a job file and wait for it to finish or for Ctrl-C
async fn print_job(connection: &PrinterConnection, path: &Path) -> anyhow::Result<()> {
    let job = GcodeJob::load(path)?;
    tracing::info!("Printing {} ({} lines)", job.name(), job.len());
    connection.start_print(job, None)?;

    let done = [
        LinkState::FinishedPrint,
        LinkState::ConnectionLost,
        LinkState::Disconnected,
    ];
    loop {
        tokio::select! {
            reached = connection.wait_for_state(&done, PRINT_POLL) => {
                match reached {
                    Some(LinkState::FinishedPrint) => {
                        tracing::info!("Print finished");
                        return Ok(());
                    }
                    Some(state) => bail!("print ended early: link is {}", state),
                    None => tracing::debug!("{:.1}% complete", connection.percent_complete()),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("Interrupted, canceling print");
                connection.stop().await?;
                return Ok(());
            }
        }
    }
}

/// Send each stdin line to the printer until end of input or Ctrl-C
async fn terminal(connection: &PrinterConnection) -> anyhow::Result<()> {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    return Ok(());
                };
                let line = line.trim();
                match line {
                    "" => {}
                    "pause" => connection.request_pause()?,
                    "resume" => connection.resume()?,
                    "stop" => connection.stop().await?,
                    other => connection.queue_line(other)?,
                }
            }
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

async fn log_notifications(mut rx: broadcast::Receiver<Notification>) {
    loop {
        match rx.recv().await {
            Ok(notification) => match notification.kind() {
                NotificationKind::Terminal => tracing::debug!("{}", notification),
                NotificationKind::Error => tracing::warn!("{}", notification),
                _ => tracing::info!("{}", notification),
            },
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!("Dropped {} notifications", missed)
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<Args> {
        Args::parse(args.iter().map(|a| a.to_string()))
    }

    #[test]
    fn test_port_baud_and_job() {
        let args = parse(&["/dev/ttyUSB0", "115200", "cube.gcode"]).unwrap();
        assert_eq!(args.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(args.baud, Some(115_200));
        assert_eq!(args.job, Some(PathBuf::from("cube.gcode")));
    }

    #[test]
    fn test_job_without_baud() {
        let args = parse(&["--json", "192.168.1.20:23", "cube.gcode"]).unwrap();
        assert!(args.json_logs);
        assert_eq!(args.baud, None);
        assert_eq!(args.job, Some(PathBuf::from("cube.gcode")));
    }

    #[test]
    fn test_port_required_unless_listing() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["--list"]).unwrap().list);
        assert!(parse(&["--config"]).is_err());
    }
}
