use std::io::{self, IsTerminal};

use crate::app::SyncReport;
use crate::assets::{VerifyReport, WorkerStatus};
use crate::listing::{CategoryGroup, ListFilter};
use crate::store::Record;
use crate::sync::RunOutcome;

pub fn print_grouped_list(groups: &[CategoryGroup], filter: &ListFilter) {
    let palette = Palette::auto();
    println!("{}", palette.heading("Shopping list"));
    if let Some(summary) = filter_summary(filter) {
        println!("{}", palette.dim(&format!("filters: {summary}")));
    }

    if groups.is_empty() {
        println!("{}", palette.dim("no items"));
        return;
    }

    let mut total = 0;
    let mut remaining = 0;
    for group in groups {
        println!(
            "{} {}",
            palette.category(&group.category),
            palette.dim(&format!("({}/{})", group.remaining(), group.items.len()))
        );
        for record in &group.items {
            println!("  {}", format_record_row(record, &palette));
        }
        total += group.items.len();
        remaining += group.remaining();
    }
    println!(
        "{}",
        palette.dim(&format!("{total} item(s), {remaining} left"))
    );
}

pub fn print_asset_status(status: &WorkerStatus) {
    let palette = Palette::auto();
    println!("{}", palette.heading("Asset cache"));
    println!("generation: {}", status.generation);
    println!("state: {}", palette.state_label(&status.state.label()));
    println!("manifest: {} resource(s)", status.manifest.len());
    if status.generations.is_empty() {
        println!("{}", palette.dim("no cache generations"));
        return;
    }
    for generation in &status.generations {
        let marker = if generation.active {
            palette.state_label("active")
        } else {
            palette.dim("stale")
        };
        println!(
            "  {} {} {} entr{} {} byte(s) {}",
            palette.id(&generation.name),
            marker,
            generation.entries,
            if generation.entries == 1 { "y" } else { "ies" },
            generation.bytes,
            palette.dim(&generation.installed_at)
        );
    }
}

pub fn print_verify_report(report: &VerifyReport) {
    let palette = Palette::auto();
    let Some(generation) = report.generation.as_deref() else {
        println!("{}", palette.dim("no active cache generation"));
        return;
    };
    if report.issues.is_empty() {
        println!(
            "{} {} resource(s) in {}",
            palette.ok("ok"),
            report.checked,
            generation
        );
        return;
    }
    for issue in &report.issues {
        let key = if issue.key.is_empty() {
            "-"
        } else {
            issue.key.as_str()
        };
        println!("{} {} {}", palette.error("issue"), key, issue.message);
    }
}

pub fn print_sync_report(report: &SyncReport) {
    let palette = Palette::auto();
    println!("{}", palette.heading("Sync"));
    println!("tag: {}", report.status.tag);
    if !report.status.supported {
        println!("{}", palette.dim("background sync unsupported"));
    }
    match &report.status.task {
        Some(task) => println!(
            "task: {} {} attempts={}{}",
            palette.state_label(task.state.as_str()),
            palette.id(&task.registration_id),
            task.attempts,
            if task.rerun { " (rerun queued)" } else { "" }
        ),
        None => println!("task: {}", palette.dim("none")),
    }
    println!(
        "pending changes: {} (delivered through #{})",
        report.pending_changes, report.delivered_seq
    );
}

pub fn print_run_outcome(outcome: &RunOutcome) {
    match outcome {
        RunOutcome::Idle => println!("no flush pending"),
        RunOutcome::Foreground { report } => println!(
            "flushed {} change(s) in the foreground (cursor #{})",
            report.delivered, report.cursor
        ),
        RunOutcome::Completed {
            registration_id,
            attempts,
            requeued,
            report,
        } => {
            println!(
                "flushed {} change(s) (registration {}, attempt {}, cursor #{})",
                report.delivered, registration_id, attempts, report.cursor
            );
            if *requeued {
                println!("changes arrived during the flush; another run is registered");
            }
        }
    }
}

fn format_record_row(record: &Record, palette: &Palette) -> String {
    let check = if record.done {
        palette.ok("[x]")
    } else {
        "[ ]".to_string()
    };
    let name = if record.done {
        palette.dim(&record.name)
    } else {
        record.name.clone()
    };
    format!("{} {} {}", palette.id(&format!("#{}", record.id)), check, name)
}

fn filter_summary(filter: &ListFilter) -> Option<String> {
    let mut parts = Vec::new();
    if let Some(category) = filter.category.as_deref().and_then(non_empty) {
        parts.push(format!("category={category}"));
    }
    if filter.pending_only {
        parts.push("pending=true".to_string());
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

fn non_empty(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

pub struct Palette {
    enabled: bool,
}

impl Palette {
    pub fn auto() -> Self {
        let enabled = std::env::var_os("NO_COLOR").is_none() && io::stdout().is_terminal();
        Self { enabled }
    }

    fn paint(&self, code: &str, text: &str) -> String {
        if self.enabled {
            format!("\x1b[{code}m{text}\x1b[0m")
        } else {
            text.to_string()
        }
    }

    fn heading(&self, text: &str) -> String {
        self.paint("1;36", text)
    }

    fn dim(&self, text: &str) -> String {
        self.paint("2", text)
    }

    pub fn id(&self, text: &str) -> String {
        self.paint("1;94", text)
    }

    fn category(&self, text: &str) -> String {
        self.paint("1;35", text)
    }

    pub fn ok(&self, text: &str) -> String {
        self.paint("32", text)
    }

    fn error(&self, text: &str) -> String {
        self.paint("31", text)
    }

    fn state_label(&self, state: &str) -> String {
        let upper = state.to_ascii_uppercase();
        self.paint(state_color_code(state), &format!("[{upper}]"))
    }
}

fn state_color_code(state: &str) -> &'static str {
    let base = state.split('(').next().unwrap_or_default();
    match base.trim().to_ascii_lowercase().as_str() {
        "no_cache" => "90",
        "installing" | "activating" | "running" => "33",
        "installed" | "registered" => "36",
        "active" => "32",
        _ => "37",
    }
}

#[cfg(test)]
mod tests {
    use super::{filter_summary, format_record_row, state_color_code, Palette};
    use crate::listing::ListFilter;
    use crate::store::Record;

    #[test]
    fn filter_summary_formats_only_active_filters() {
        let filter = ListFilter {
            category: Some(" Dairy ".to_string()),
            pending_only: true,
        };
        assert_eq!(
            filter_summary(&filter).as_deref(),
            Some("category=Dairy pending=true")
        );
        assert!(filter_summary(&ListFilter::default()).is_none());
    }

    #[test]
    fn record_rows_show_id_and_check_state_without_color() {
        let palette = Palette { enabled: false };
        let mut record = Record {
            id: 7,
            name: "Milk".to_string(),
            category: "Dairy".to_string(),
            done: false,
            timestamp: "2026-10-16T08:00:00Z".to_string(),
        };
        assert_eq!(format_record_row(&record, &palette), "#7 [ ] Milk");
        record.done = true;
        assert_eq!(format_record_row(&record, &palette), "#7 [x] Milk");
    }

    #[test]
    fn lifecycle_labels_pick_colors_by_base_state() {
        assert_eq!(state_color_code("active(courses-v1)"), "32");
        assert_eq!(state_color_code("installed(courses-v2)"), "36");
        assert_eq!(state_color_code("no_cache"), "90");
        assert_eq!(state_color_code("mystery"), "37");
    }
}
