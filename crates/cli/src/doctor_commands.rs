//! `plinth doctor`: config validation, directory and database health, and a
//! consistency audit of installed bundles.
//!
//! Prints a report with `[ok]`, `[warn]`, `[fail]` or `[info]` per item and
//! exits non-zero when any check fails.

use std::path::Path;

use {
    anyhow::Result,
    plinth_bundles::{AuditReport, BundleFilter, BundleManager},
    plinth_config::{
        PlinthConfig,
        validate::{self, Severity},
    },
    sqlx::SqlitePool,
};

use crate::db_commands;

// ── Report ──────────────────────────────────────────────────────────────────

const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Ok,
    Warn,
    Fail,
    Info,
}

impl Status {
    /// Colored `ok`/`warn`/`fail`/`info` label.
    fn tag(self) -> &'static str {
        match self {
            Self::Ok => "\x1b[32mok\x1b[0m",
            Self::Warn => "\x1b[33mwarn\x1b[0m",
            Self::Fail => "\x1b[31mfail\x1b[0m",
            Self::Info => "\x1b[36minfo\x1b[0m",
        }
    }
}

struct Section {
    title: String,
    items: Vec<(Status, String)>,
}

impl Section {
    fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            items: Vec::new(),
        }
    }

    fn push(&mut self, status: Status, message: impl Into<String>) {
        self.items.push((status, message.into()));
    }

    fn count(&self, status: Status) -> usize {
        self.items.iter().filter(|(s, _)| *s == status).count()
    }
}

/// Print every section and return `(errors, warnings)`.
fn print_report(sections: &[Section]) -> (usize, usize) {
    for section in sections {
        eprintln!("{BOLD}{}{RESET}", section.title);
        for (status, message) in &section.items {
            eprintln!("  [{}]  {message}", status.tag());
        }
        eprintln!();
    }
    let total = |status: Status| -> usize { sections.iter().map(|s| s.count(status)).sum() };
    (total(Status::Fail), total(Status::Warn))
}

// ── Entry point ─────────────────────────────────────────────────────────────

pub async fn handle_doctor(prune: bool) -> Result<()> {
    let data_dir = plinth_config::data_dir();
    let config = plinth_config::discover_and_load();

    eprintln!("{BOLD}plinth doctor{RESET}");
    eprintln!("{BOLD}============={RESET}\n");

    let mut sections = vec![
        check_config(&config, &data_dir),
        check_directories(&config, &data_dir),
    ];

    let (database, pool) = check_database(&config, &data_dir).await;
    sections.push(database);

    match pool {
        Some(pool) => {
            let manager = BundleManager::from_config(&config, &data_dir, pool.clone());
            sections.push(check_bundles(&manager, prune).await);
            pool.close().await;
        },
        None => {
            let mut section = Section::new("Bundles");
            section.push(Status::Info, "Registry unavailable, audit skipped");
            sections.push(section);
        },
    }

    let (errors, warnings) = print_report(&sections);

    eprintln!("{BOLD}Summary:{RESET} {errors} error(s), {warnings} warning(s)");

    if errors > 0 {
        std::process::exit(1);
    }

    Ok(())
}

// ── 1. Config validation ────────────────────────────────────────────────────

fn check_config(config: &PlinthConfig, data_dir: &Path) -> Section {
    let label = plinth_config::config_dir()
        .map(|d| d.display().to_string())
        .unwrap_or_else(|| "default config".into());
    let mut section = Section::new(format!("Config ({label})"));

    let result = validate::validate(config, data_dir);
    if result.count(Severity::Error) == 0 {
        section.push(Status::Ok, "No configuration errors");
    }

    for d in &result.diagnostics {
        let status = match d.severity {
            Severity::Error => Status::Fail,
            Severity::Warning => Status::Warn,
            Severity::Info => Status::Info,
        };
        section.push(status, format!("{}: {}", d.path, d.message));
    }

    section
}

// ── 2. Directory health ─────────────────────────────────────────────────────

fn check_directories(config: &PlinthConfig, data_dir: &Path) -> Section {
    let mut section = Section::new("Directories");

    if data_dir.is_dir() {
        section.push(
            Status::Ok,
            format!("Data directory: {}", data_dir.display()),
        );
        check_writable(&mut section, data_dir, "Data directory");
    } else {
        section.push(
            Status::Info,
            format!(
                "Data directory missing: {} (created on first use)",
                data_dir.display()
            ),
        );
    }

    let paths = config.resolve_paths(data_dir);
    for (label, dir) in [
        ("Module root", &paths.module_root),
        ("Asset root", &paths.asset_root),
        ("Scratch root", &paths.scratch_root),
    ] {
        if dir.is_dir() {
            section.push(Status::Ok, format!("{label}: {}", dir.display()));
            check_writable(&mut section, dir, label);
        } else if dir.exists() {
            section.push(
                Status::Fail,
                format!("{label} is not a directory: {}", dir.display()),
            );
        } else {
            section.push(
                Status::Info,
                format!("{label} not created yet: {}", dir.display()),
            );
        }
    }

    section
}

fn check_writable(section: &mut Section, dir: &Path, label: &str) {
    let marker = dir.join(".plinth-doctor-write-test");
    match std::fs::write(&marker, b"ok") {
        Ok(()) => {
            let _ = std::fs::remove_file(&marker);
        },
        Err(e) => {
            section.push(Status::Fail, format!("{label} is not writable: {e}"));
        },
    }
}

// ── 3. Database health ──────────────────────────────────────────────────────

/// Open and migrate the registry. The pool is handed back for the audit.
async fn check_database(config: &PlinthConfig, data_dir: &Path) -> (Section, Option<SqlitePool>) {
    let mut section = Section::new("Database");

    let pool = match db_commands::open_migrated_pool(config, data_dir).await {
        Ok(pool) => pool,
        Err(e) => {
            section.push(Status::Fail, format!("Cannot open registry: {e:#}"));
            return (section, None);
        },
    };

    match sqlx::query_as::<_, (i64, i64)>(
        "SELECT count(*), coalesce(sum(is_active), 0) FROM bundles",
    )
    .fetch_one(&pool)
    .await
    {
        Ok((total, active)) => {
            section.push(
                Status::Ok,
                format!("Registry accessible ({total} bundle(s), {active} active)"),
            );
        },
        Err(e) => {
            section.push(Status::Fail, format!("Registry query failed: {e}"));
        },
    }

    (section, Some(pool))
}

// ── 4. Bundle consistency ───────────────────────────────────────────────────

async fn check_bundles(manager: &BundleManager, prune: bool) -> Section {
    let mut section = Section::new("Bundles");

    match manager.list(BundleFilter::themes().active()).await {
        Ok(themes) => {
            for theme in themes {
                let published = manager.layout().asset_dir(&theme.module_name);
                if !published.is_dir() {
                    section.push(
                        Status::Warn,
                        format!(
                            "Active theme '{}' has no published assets at {}",
                            theme.slug,
                            published.display()
                        ),
                    );
                }
            }
        },
        Err(e) => {
            section.push(Status::Fail, format!("Cannot list themes: {e}"));
            return section;
        },
    }

    match manager.audit(prune).await {
        Ok(report) => report_audit(&mut section, &report, prune),
        Err(e) => section.push(Status::Fail, format!("Audit failed: {e}")),
    }

    section
}

fn report_audit(section: &mut Section, report: &AuditReport, prune: bool) {
    if report.is_clean() {
        section.push(Status::Ok, "Registry, module directories and host agree");
        return;
    }

    for slug in &report.missing_dirs {
        section.push(
            Status::Fail,
            format!("'{slug}' is recorded but its module directory is missing"),
        );
    }
    for dir in &report.orphan_dirs {
        if report.pruned.contains(dir) {
            section.push(Status::Ok, format!("Pruned orphan directory {}", dir.display()));
        } else {
            section.push(
                Status::Warn,
                format!("Orphan module directory {}", dir.display()),
            );
        }
    }
    for name in &report.orphan_host_modules {
        if prune {
            section.push(Status::Ok, format!("Unregistered orphan host module {name}"));
        } else {
            section.push(Status::Warn, format!("Host knows module {name} but no bundle records it"));
        }
    }
    if !prune && (!report.orphan_dirs.is_empty() || !report.orphan_host_modules.is_empty()) {
        section.push(Status::Info, "Run `plinth doctor --prune` to remove orphans");
    }
}
