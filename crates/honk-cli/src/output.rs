use honk_core::download::{Progress, ProgressFn};
use honk_core::orchestrator::{RunReport, Selection, StepEvent, StepStatus};
use honk_core::paths::InstallLayout;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const MIB: u64 = 1024 * 1024;

pub fn header(layout: &InstallLayout, server_source: &Path, selection: &Selection) {
    println!("HonkTTS installer v{}", env!("CARGO_PKG_VERSION"));
    println!("  platform:      {}", layout.profile());
    println!("  install dir:   {}", layout.root().display());
    println!("  server source: {}", server_source.display());
    if selection.is_filtered() {
        let only: Vec<&str> = selection.only().collect();
        let skip: Vec<&str> = selection.skip().collect();
        if !only.is_empty() {
            println!("  only:          {}", only.join(", "));
        }
        if !skip.is_empty() {
            println!("  skip:          {}", skip.join(", "));
        }
    }
    println!();
}

pub fn print_event(event: &StepEvent) {
    match event.status {
        StepStatus::Running => {
            println!("[{}/{}] {} ({})", event.index, event.total, event.name, event.key);
        }
        StepStatus::Skipped => {
            println!("[{}/{}] {} ({})", event.index, event.total, event.name, event.key);
            println!("  - skipped (already installed)");
        }
        StepStatus::Done { elapsed } => {
            println!("  Done ({})", format_elapsed(elapsed));
        }
    }
}

/// Download progress on stderr, redrawn in place.
///
/// Redraws once per whole percent, or once per MiB when the size is unknown.
pub fn progress_printer() -> ProgressFn {
    let last = Mutex::new(None::<u64>);
    Arc::new(move |progress: Progress| {
        let bucket = match progress {
            Progress::Percent { downloaded, total } if total > 0 => downloaded * 100 / total,
            Progress::Percent { downloaded, .. } | Progress::Bytes { downloaded } => {
                downloaded / MIB
            }
        };
        let Ok(mut last) = last.lock() else {
            return;
        };
        if *last == Some(bucket) {
            return;
        }
        *last = Some(bucket);

        let mut err = std::io::stderr().lock();
        let _ = write!(err, "\r  {}", format_progress(progress));
        if matches!(progress, Progress::Percent { downloaded, total } if downloaded >= total) {
            let _ = writeln!(err);
            *last = None;
        }
        let _ = err.flush();
    })
}

pub fn summary(layout: &InstallLayout, report: &RunReport) {
    println!();
    println!(
        "Installation complete: {} step(s) run, {} skipped.",
        report.executed(),
        report.skipped()
    );
    println!("Start the server with: {}", layout.start_script().display());
}

fn format_progress(progress: Progress) -> String {
    match progress {
        Progress::Percent { downloaded, total } => format!(
            "{:5.1}%  {} / {}",
            progress.percent().unwrap_or(0.0),
            format_bytes(downloaded),
            format_bytes(total)
        ),
        Progress::Bytes { downloaded } => format!("{} downloaded", format_bytes(downloaded)),
    }
}

fn format_bytes(n: u64) -> String {
    if n >= MIB {
        format!("{:.1} MiB", n as f64 / MIB as f64)
    } else if n >= 1024 {
        format!("{:.1} KiB", n as f64 / 1024.0)
    } else {
        format!("{n} B")
    }
}

fn format_elapsed(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs >= 60.0 {
        format!("{}m {:02}s", d.as_secs() / 60, d.as_secs() % 60)
    } else {
        format!("{secs:.1}s")
    }
}
