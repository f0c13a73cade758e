use std::error::Error;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use clap::Parser;
use crossbeam_channel::bounded;
use dotenv::dotenv;
use tracing::{error, info, warn};

use netshield::config::{CaptureSource, Cli, DispatchSettings, Settings, DEFAULT_LOG_FILTER};
use netshield::db::RestSink;
use netshield::error::CaptureError;
use netshield::sniff::Sniffer;
use netshield::{Dispatcher, Monitor};

const CAPTURE_QUEUE: usize = 4096;

fn main() {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with_target(false)
        .init();

    let settings = match Cli::parse().into_settings() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("[ERROR] invalid configuration: {}", e);
            process::exit(2);
        }
    };

    print_banner(&settings);

    if let Err(e) = run(settings) {
        match e.downcast_ref::<CaptureError>() {
            Some(CaptureError::PermissionDenied { device, .. }) => {
                eprintln!("[ERROR] Capturing on {} requires elevated privileges.", device);
                eprintln!("Run with: sudo netshield");
                eprintln!(
                    "or grant capabilities: \
                     sudo setcap cap_net_raw,cap_net_admin=eip $(which netshield)"
                );
            }
            _ => eprintln!("[ERROR] An error occurred: {}", e),
        }
        process::exit(1);
    }
}

fn print_banner(settings: &Settings) {
    let line = "=".repeat(60);
    println!("{}", line);
    println!("Net Shield Packet Analyzer");
    println!("{}", line);
    match &settings.sink {
        Some(sink) => println!("Sink URL: {}", sink.url),
        None => println!("Sink URL: NOT SET"),
    }
    println!(
        "User ID: {}",
        settings.dispatch.owner.as_deref().unwrap_or("NOT SET - Database logging disabled")
    );
    println!("DoS Threshold: {} packets", settings.policy.dos_threshold);
    println!("Port Scan Threshold: {} ports", settings.policy.port_scan_threshold);
    println!("Sensitive Ports: {:?}", settings.policy.sensitive_ports);
    println!("Reset Interval: {}s", settings.policy.reset_interval.as_secs());
    println!("{}", line);
}

fn build_dispatcher(settings: &Settings) -> Result<Dispatcher, Box<dyn Error>> {
    if settings.demo_mode() {
        warn!(
            "USER_ID or SUPABASE_URL not set, running in demo mode: \
             packets will be displayed but not saved"
        );
        let demo = DispatchSettings {
            owner: None,
            ..settings.dispatch.clone()
        };
        return Ok(Dispatcher::detached(&demo));
    }

    let sink_settings = settings.sink.as_ref().ok_or("sink not configured")?;
    let sink = RestSink::new(
        &sink_settings.url,
        sink_settings.api_key.clone(),
        sink_settings.timeout,
    )?;
    Ok(Dispatcher::spawn(&settings.dispatch, Box::new(sink)))
}

fn run(settings: Settings) -> Result<(), Box<dyn Error>> {
    let sniffer = Sniffer::open(&settings.source, &settings.filter)?;
    let dispatcher = build_dispatcher(&settings)?;
    let offline = matches!(settings.source, CaptureSource::File(_));

    let running = Arc::new(AtomicBool::new(true));
    let (tx, rx) = bounded(CAPTURE_QUEUE);

    info!("Starting packet capture on {}... Press Ctrl+C to stop", sniffer.label());
    let capture_running = running.clone();
    let capture_thread = thread::Builder::new()
        .name("capture".into())
        .spawn(move || sniffer.run(tx, capture_running))?;

    let mut monitor = Monitor::new(settings.policy.clone(), dispatcher, Instant::now());
    let runtime = tokio::runtime::Runtime::new()?;
    let (monitor, interrupted) = runtime.block_on(async {
        let pipeline_running = running.clone();
        let mut pipeline = tokio::task::spawn_blocking(move || {
            monitor.run(&rx, &pipeline_running);
            monitor
        });

        tokio::select! {
            done = &mut pipeline => done.map(|m| (m, false)),
            _ = tokio::signal::ctrl_c() => {
                info!("Stopping packet capture...");
                running.store(false, Ordering::SeqCst);
                pipeline.await.map(|m| (m, true))
            }
        }
    })?;
    running.store(false, Ordering::SeqCst);

    let capture = match capture_thread.join() {
        Ok(result) => result,
        Err(_) => return Err("capture thread panicked".into()),
    };

    println!();
    println!("{}", monitor.stats());
    let dispatcher = monitor.into_dispatcher();
    let delivery = if offline && !interrupted {
        dispatcher.close()
    } else {
        // Queued records are abandoned on interrupt.
        dispatcher.stats()
    };
    println!(
        "Records: {} queued, {} stored, {} failed, {} dropped",
        delivery.enqueued, delivery.delivered, delivery.failed, delivery.dropped
    );

    match capture {
        Ok(summary) => {
            println!(
                "Frames: {} analysed, {} skipped (no IP layer)",
                summary.captured, summary.skipped
            );
            Ok(())
        }
        Err(e) if interrupted => {
            error!("capture ended with error after interrupt: {}", e);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
