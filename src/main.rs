//! pincer binary entry point.

use anyhow::Context;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use pincer::cli::{Args, OutputFormat};
use pincer::output;
use pincer::scanner::{ScanEvent, ScanOptions, ScanProgress, ScanSession};
use pincer::types::{PortSpec, TargetSpec};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_tracing(args.verbose);

    if let Err(err) = run(args).await {
        output::print_error(&format!("{err:#}"));
        std::process::exit(2);
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "pincer=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn run(args: Args) -> anyhow::Result<()> {
    let targets = TargetSpec::load(&args.target)
        .with_context(|| format!("invalid target '{}'", args.target))?
        .into_targets();
    let ports = args
        .ports
        .parse::<PortSpec>()
        .with_context(|| format!("invalid port specification '{}'", args.ports))?
        .to_ports();

    let options = ScanOptions {
        concurrency: args.concurrency,
        fast_timeout: Duration::from_secs_f64(args.tfast),
        slow_timeout: Duration::from_secs_f64(args.tslow),
        retry: !args.no_retry,
    };

    let live_display = !args.quiet && args.output == OutputFormat::Plain;
    if live_display {
        output::print_run_header(&targets, &args.ports, ports.len(), &options);
    }

    let mut session = ScanSession::new(targets, ports, options);
    let cancel = session.cancel_token();
    let progress = session.progress();

    // Ctrl-C aborts the run; whatever has been gathered is still reported.
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            let _ = tokio::signal::ctrl_c().await;
            cancel.cancel();
        }
    });

    let renderer = if live_display {
        let events = session.subscribe();
        Some(tokio::spawn(render_live(events, progress)))
    } else {
        None
    };

    let report = session.run().await;

    if let Some(renderer) = renderer {
        let _ = renderer.await;
    }

    output::print_report(&report, args.output, args.quiet, &args.ports)?;
    Ok(())
}

/// Drive the interactive display: live event lines plus a progress bar
/// sampled from the scan counters about once a second.
async fn render_live(mut events: UnboundedReceiver<ScanEvent>, progress: Arc<ScanProgress>) {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("  [{bar:20}] {pos}/{len} ({percent}%)  {msg}")
            .unwrap()
            .progress_chars("#-"),
    );

    let mut tick = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => {
                    if output::is_interesting_resolution(&event) {
                        bar.println(output::event_line(&event));
                    }
                }
                // Sender dropped: the run is over.
                None => break,
            },
            _ = tick.tick() => {
                bar.set_length(progress.total());
                bar.set_position(progress.done());
                bar.set_message(format!("{} open", progress.opens()));
            }
        }
    }
    bar.finish_and_clear();
}
