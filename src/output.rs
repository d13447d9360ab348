//! Output formatting.
//!
//! Live event lines, the run header, and the final report in plain,
//! greppable, or JSON form. Everything here consumes frozen or race-free
//! state; nothing feeds back into the scan.

use crate::cli::OutputFormat;
use crate::scanner::{ScanEvent, ScanOptions, ScanReport};
use crate::services;
use console::style;
use std::io::{self, Write};

const RULE: &str = "────────────────────────────────────────────────────────────────";

/// Print the pre-scan banner.
pub fn print_run_header(targets: &[String], port_spec: &str, port_count: usize, options: &ScanOptions) {
    let preview = if targets.len() <= 5 {
        format!("  ({})", targets.join(", "))
    } else {
        format!("  ({}, ...)", targets[..5].join(", "))
    };

    println!();
    println!("{}", style(RULE).dim());
    println!("  {} — TCP connect scanner", style("pincer").cyan().bold());
    println!(
        "  Targets    : {} host{}{}",
        targets.len(),
        if targets.len() == 1 { "" } else { "s" },
        preview
    );
    println!("  Ports      : {}", describe_port_spec(port_spec, port_count));
    println!(
        "  Concurrency: {}   Timeouts: {:.2}s / {:.2}s   Retry: {}",
        options.effective_concurrency(),
        options.fast_timeout.as_secs_f64(),
        options.slow_timeout.as_secs_f64(),
        if options.retry { "on" } else { "off" },
    );
    println!("{}", style(RULE).dim());
    println!();
}

/// Human description of a port specification.
pub fn describe_port_spec(spec: &str, count: usize) -> String {
    match spec {
        "top" | "top1000" | "nmap" => format!("top 1000 ({count} ports)"),
        "popular" => format!("popular ({count} ports)"),
        _ if count <= 10 => spec.to_string(),
        _ => format!("{count} ports"),
    }
}

/// One display line for a live scan event.
pub fn event_line(event: &ScanEvent) -> String {
    match event {
        ScanEvent::Resolved { target, addrs } => {
            let addrs: Vec<String> = addrs.iter().map(ToString::to_string).collect();
            style(format!("  > {} -> {}", target, addrs.join(", ")))
                .dim()
                .to_string()
        }
        ScanEvent::ResolveFailed { target } => format!(
            "  {} {} — DNS resolution failed, skipping",
            style("!").red(),
            target
        ),
        ScanEvent::PortOpen { target, port } => {
            let service = services::service_name(*port)
                .map(|s| format!("  {}", style(s).dim()))
                .unwrap_or_default();
            format!(
                " {} {}:{}  {}{}",
                style(">>").green(),
                target,
                style(port).bold(),
                style("open").green(),
                service
            )
        }
        ScanEvent::RetryPass { pending } => style(format!(
            "  [*] Retrying {pending} timed-out probes with a slower deadline..."
        ))
        .dim()
        .to_string(),
    }
}

/// Whether a resolved-event line is worth showing (a literal that resolved
/// to itself is noise).
pub fn is_interesting_resolution(event: &ScanEvent) -> bool {
    match event {
        ScanEvent::Resolved { target, addrs } => {
            addrs.first().map(ToString::to_string).as_deref() != Some(target.as_str())
        }
        _ => true,
    }
}

/// Print the final report in the requested format.
pub fn print_report(
    report: &ScanReport,
    format: OutputFormat,
    quiet: bool,
    port_spec: &str,
) -> io::Result<()> {
    match format {
        OutputFormat::Json => print_json(report),
        OutputFormat::Plain if quiet => print_greppable(report),
        OutputFormat::Plain => print_plain(report, port_spec),
    }
}

fn print_json(report: &ScanReport) -> io::Result<()> {
    let json = serde_json::to_string_pretty(report).map_err(io::Error::other)?;
    println!("{json}");
    Ok(())
}

/// One line per open port, tab-separated, easy to cut/grep.
fn print_greppable(report: &ScanReport) -> io::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for target in &report.targets {
        for &port in &target.open_ports {
            writeln!(
                out,
                "{}:{}\topen\t{}",
                target.target,
                port,
                services::service_name(port).unwrap_or_default()
            )?;
        }
    }
    Ok(())
}

fn print_plain(report: &ScanReport, port_spec: &str) -> io::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();

    writeln!(out)?;
    writeln!(out, "{}", style(RULE).dim())?;

    if report.aborted {
        writeln!(
            out,
            "  {} run interrupted — results below are partial",
            style("[!]").yellow()
        )?;
    }

    if report.nothing_to_scan() {
        writeln!(out, "  No resolvable targets — nothing to scan.")?;
        writeln!(out, "{}", style(RULE).dim())?;
        return Ok(());
    }

    if report.targets.len() == 1 {
        print_single(&mut out, report)?;
    } else {
        print_multi(&mut out, report)?;
    }

    let elapsed = report.elapsed_ms as f64 / 1000.0;
    let pps = if elapsed > 0.0 {
        report.probes_done as f64 / elapsed
    } else {
        0.0
    };
    writeln!(
        out,
        "  Done in {}  ({} probes, ~{:.0}/s)",
        format_elapsed(elapsed),
        report.probes_done,
        pps
    )?;

    let hosts_with_open = report
        .targets
        .iter()
        .filter(|t| !t.open_ports.is_empty())
        .count();
    write!(
        out,
        "  Total: {} open port{}",
        style(report.opens_total).green().bold(),
        if report.opens_total == 1 { "" } else { "s" }
    )?;
    if report.targets.len() > 1 {
        write!(
            out,
            " across {}/{} hosts",
            hosts_with_open,
            report.targets.len()
        )?;
    }
    writeln!(out)?;

    if report.probes_done > 0 && report.timeouts_total > 0 {
        let ratio = report.timeouts_total * 100 / report.probes_done;
        if ratio > 25 {
            writeln!(
                out,
                "  {}",
                style(format!(
                    "[!] High timeout ratio: {}/{} ({ratio}%) — target may be \
                     firewalled, or try reducing --concurrency",
                    report.timeouts_total, report.probes_done
                ))
                .yellow()
            )?;
        }
    }

    if report.dns_failures > 0 {
        writeln!(
            out,
            "  {}",
            style(format!(
                "[!] DNS failed for {} target(s)",
                report.dns_failures
            ))
            .yellow()
        )?;
    }

    if report.opens_total == 0 && report.probes_done > 0 {
        let mut hints = Vec::new();
        if matches!(port_spec, "top" | "top1000" | "nmap") {
            hints.push("try -p 1-65535 for a full port scan");
        }
        hints.push("try --tfast 0.8 on lossy networks");
        writeln!(out, "  Tip: {}", hints.join("; "))?;
    }

    writeln!(out, "{}", style(RULE).dim())?;
    Ok(())
}

/// Single-target layout: a PORT/STATE/SERVICE table.
fn print_single(out: &mut impl Write, report: &ScanReport) -> io::Result<()> {
    let target = &report.targets[0];

    if target.open_ports.is_empty() {
        writeln!(out, "  {}  — no open ports", target.target)?;
        writeln!(out)?;
        return Ok(());
    }

    writeln!(
        out,
        "  {}  — {}",
        style(&target.target).bold(),
        style(format!(
            "{} open port{}",
            target.open_ports.len(),
            if target.open_ports.len() == 1 { "" } else { "s" }
        ))
        .green()
    )?;
    writeln!(
        out,
        "  {}",
        style(format!("{:<12} {:<10} SERVICE", "PORT", "STATE")).dim()
    )?;
    for &port in &target.open_ports {
        writeln!(
            out,
            "  {:<12} {:<10} {}",
            format!("{port}/tcp"),
            style("open").green(),
            services::service_name(port).unwrap_or_default()
        )?;
    }
    writeln!(out)?;
    Ok(())
}

/// Multi-target layout: one line per host with findings.
fn print_multi(out: &mut impl Write, report: &ScanReport) -> io::Result<()> {
    for target in &report.targets {
        if !target.resolved {
            writeln!(out, "  {}  — {}", target.target, style("DNS failed").red())?;
            continue;
        }
        if target.open_ports.is_empty() {
            continue;
        }
        let ports: Vec<String> = target
            .open_ports
            .iter()
            .map(|&p| services::port_label(p))
            .collect();
        writeln!(
            out,
            "  {}  open: {}",
            style(&target.target).bold(),
            ports.join(", ")
        )?;
    }
    writeln!(out)?;
    Ok(())
}

fn format_elapsed(secs: f64) -> String {
    let mins = (secs / 60.0).floor();
    if mins >= 1.0 {
        format!("{}m {:.1}s", mins as u64, secs - mins * 60.0)
    } else {
        format!("{secs:.2}s")
    }
}

/// Print an error message.
pub fn print_error(msg: &str) {
    eprintln!("{} {}", style("Error:").red().bold(), msg);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_port_spec() {
        assert_eq!(describe_port_spec("top", 1000), "top 1000 (1000 ports)");
        assert_eq!(describe_port_spec("popular", 48), "popular (48 ports)");
        assert_eq!(describe_port_spec("22,80", 2), "22,80");
        assert_eq!(describe_port_spec("1-10000", 10000), "10000 ports");
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(2.5), "2.50s");
        assert_eq!(format_elapsed(75.0), "1m 15.0s");
    }

    #[test]
    fn test_resolution_line_interest() {
        let literal = ScanEvent::Resolved {
            target: "10.0.0.1".to_string(),
            addrs: vec!["10.0.0.1".parse().unwrap()],
        };
        assert!(!is_interesting_resolution(&literal));

        let name = ScanEvent::Resolved {
            target: "db.example".to_string(),
            addrs: vec!["10.0.0.7".parse().unwrap()],
        };
        assert!(is_interesting_resolution(&name));
    }
}
