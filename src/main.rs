use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::error;

use tinyserve::config::{
    Config, DEFAULT_PORT, LogMode, MAX_CONNECTIONS, MAX_REQUESTS, TriggerMode,
};
use tinyserve::logging::{self, LogSink};
use tinyserve::worker::DispatchModel;
use tinyserve::{Server, metrics};

#[derive(Parser)]
#[command(about = "epoll HTTP/1.1 static file server with a fixed worker pool")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Log write mode: 0 synchronous, 1 asynchronous
    #[arg(short = 'w', default_value_t = 0)]
    log_write: u8,

    /// Trigger mode: 0 LT+LT, 1 LT+ET, 2 ET+LT, 3 ET+ET (listen + connection)
    #[arg(short = 'm', default_value_t = 0)]
    trigger: u8,

    /// Graceful close with a one second linger: 0 off, 1 on
    #[arg(short = 'o', default_value_t = 0)]
    linger: u8,

    /// Credential store pool size
    #[arg(short = 'c', default_value_t = 8)]
    store_pool: usize,

    /// Worker threads
    #[arg(short = 't', default_value_t = 8)]
    threads: usize,

    /// Disable logging: 0 no, 1 yes
    #[arg(short = 'l', default_value_t = 0)]
    log_off: u8,

    /// Dispatch model: 0 I/O in loop, 1 I/O in worker
    #[arg(short = 'e', default_value_t = 0)]
    dispatch: u8,

    /// Document root
    #[arg(long, default_value = "./root")]
    root: PathBuf,

    /// Append log records to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Nominal work-queue capacity
    #[arg(long, default_value_t = MAX_REQUESTS)]
    max_requests: usize,

    /// Live-connection ceiling
    #[arg(long, default_value_t = MAX_CONNECTIONS)]
    max_connections: usize,

    /// Idle sweep interval in seconds
    #[arg(long, default_value_t = 5)]
    timeslot: u64,
}

impl Args {
    fn to_config(&self) -> tinyserve::Result<Config> {
        Ok(Config {
            addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, self.port)),
            root: self.root.clone(),
            trigger: TriggerMode::from_selector(self.trigger)?,
            linger: self.linger == 1,
            store_pool_size: self.store_pool,
            worker_threads: self.threads,
            dispatch: DispatchModel::from_selector(self.dispatch)?,
            max_requests: self.max_requests,
            max_connections: self.max_connections,
            timeslot: Duration::from_secs(self.timeslot),
            handle_signals: true,
        })
    }
}

fn start(args: &Args) -> tinyserve::Result<Option<LogSink>> {
    let sink = if args.log_off == 1 {
        None
    } else {
        let mode = LogMode::from_selector(args.log_write)?;
        let sink = match &args.log_file {
            Some(path) => LogSink::file(path, mode)?,
            None => LogSink::stderr(mode)?,
        };
        logging::init(sink.clone())?;
        Some(sink)
    };

    let config = args.to_config()?;
    metrics::spawn_reporter();
    Server::bind(config)?.run()?;
    Ok(sink)
}

fn main() -> ExitCode {
    let args = Args::parse();
    match start(&args) {
        Ok(sink) => {
            if let Some(sink) = sink {
                sink.flush();
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "fatal");
            eprintln!("tinyserve: {e}");
            ExitCode::FAILURE
        }
    }
}
