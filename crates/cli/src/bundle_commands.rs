//! `plinth install|activate|deactivate|uninstall|list|show|scaffold`.

use std::path::Path;

use {
    anyhow::Context,
    clap::ValueEnum,
    plinth_bundles::{BundleFilter, BundleKind, BundleManager, BundleRecord, BundleType, UploadedArchive},
};

use crate::db_commands;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    Plugin,
    Theme,
}

impl From<KindArg> for BundleKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Plugin => Self::Plugin,
            KindArg::Theme => Self::Theme,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TypeArg {
    Plugin,
    Frontend,
    Admin,
}

impl From<TypeArg> for BundleType {
    fn from(bundle_type: TypeArg) -> Self {
        match bundle_type {
            TypeArg::Plugin => Self::Plugin,
            TypeArg::Frontend => Self::Frontend,
            TypeArg::Admin => Self::Admin,
        }
    }
}

/// Load config, open the migrated registry and build a manager.
async fn open_manager() -> anyhow::Result<BundleManager> {
    let config = plinth_config::discover_and_load();
    let data_dir = plinth_config::data_dir();
    let pool = db_commands::open_migrated_pool(&config, &data_dir).await?;
    Ok(BundleManager::from_config(&config, &data_dir, pool))
}

pub async fn install(archive: &Path, kind: Option<BundleKind>) -> anyhow::Result<()> {
    let upload = UploadedArchive::from_path(archive)
        .with_context(|| format!("reading {}", archive.display()))?;
    let manager = open_manager().await?;
    let record = manager.install(&upload, kind).await?;
    println!(
        "Installed {} '{}' ({}) as module {}{}",
        record.kind,
        record.name,
        record.slug,
        record.module_name,
        if record.is_active { ", active" } else { "" }
    );
    Ok(())
}

pub async fn activate(slug: &str) -> anyhow::Result<()> {
    let record = open_manager().await?.activate(slug).await?;
    println!("Activated '{}'.", record.slug);
    Ok(())
}

pub async fn deactivate(slug: &str) -> anyhow::Result<()> {
    let record = open_manager().await?.deactivate(slug).await?;
    println!("Deactivated '{}'.", record.slug);
    Ok(())
}

pub async fn uninstall(slug: &str) -> anyhow::Result<()> {
    open_manager().await?.uninstall(slug).await?;
    println!("Uninstalled '{slug}'.");
    Ok(())
}

pub async fn list(kind: Option<BundleKind>, active: bool, json: bool) -> anyhow::Result<()> {
    let filter = BundleFilter {
        kind,
        active: active.then_some(true),
        ..BundleFilter::default()
    };
    let records = open_manager().await?.list(filter).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else if records.is_empty() {
        println!("No bundles installed.");
    } else {
        for record in &records {
            println!("  {}", summary_line(record));
        }
    }
    Ok(())
}

pub async fn show(slug: &str, json: bool) -> anyhow::Result<()> {
    let record = open_manager().await?.get(slug).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    println!("Name:         {}", record.name);
    println!("Slug:         {}", record.slug);
    println!("Module:       {}", record.module_name);
    println!("Type:         {}", type_label(&record));
    println!("Version:      {}", record.version);
    println!("Active:       {}", if record.is_active { "yes" } else { "no" });
    if !record.author.is_empty() {
        println!("Author:       {}", record.author);
    }
    if !record.homepage_url.is_empty() {
        println!("Homepage:     {}", record.homepage_url);
    }
    if !record.dependencies.is_empty() {
        println!("Depends on:   {}", record.dependencies.join(", "));
    }
    if !record.description.is_empty() {
        println!("\n{}", record.description);
    }
    Ok(())
}

pub async fn scaffold(name: &str, bundle_type: BundleType) -> anyhow::Result<()> {
    let manager = open_manager().await?;
    let record = manager.scaffold(name, bundle_type).await?;
    println!(
        "Created {} '{}' at {}",
        record.kind,
        record.slug,
        manager.layout().module_dir(&record.module_name).display()
    );
    Ok(())
}

fn type_label(record: &BundleRecord) -> &'static str {
    match record.theme_target {
        Some(target) => target.as_str(),
        None => record.kind.as_str(),
    }
}

fn summary_line(record: &BundleRecord) -> String {
    format!(
        "{marker} {slug:<24} {version:<10} {label:<9} {name}",
        marker = if record.is_active { "*" } else { " " },
        slug = record.slug,
        version = record.version,
        label = type_label(record),
        name = record.name,
    )
}
