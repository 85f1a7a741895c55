//! Persistent registry of installed bundles.

use std::time::{SystemTime, UNIX_EPOCH};

use {
    async_trait::async_trait,
    sqlx::{Sqlite, SqliteConnection, Transaction},
};

#[cfg(feature = "metrics")]
use plinth_metrics::{counter, labels, registry as registry_metrics};

use crate::{
    error::{Error, Result},
    types::{BundleFilter, BundleRecord, NewBundle, ThemeTarget},
};

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Storage for bundle records. A thin store: no lifecycle rules live here
/// apart from theme exclusivity, which must be atomic.
#[async_trait]
pub trait BundleRegistry: Send + Sync {
    /// Insert a record inside an open transaction and hand it back
    /// uncommitted. Concurrent writers, in this process or another, wait
    /// until it is committed or rolled back, so whoever holds the pending
    /// insert owns the slug and module name. Unique violations surface as
    /// [`Error::DuplicateSlug`] or [`Error::DuplicateModule`].
    async fn begin_create(&self, bundle: NewBundle) -> Result<Box<dyn PendingBundle>>;

    /// Insert and commit a record.
    async fn create(&self, bundle: NewBundle) -> Result<BundleRecord> {
        self.begin_create(bundle).await?.commit().await
    }
    async fn find_by_slug(&self, slug: &str) -> Result<Option<BundleRecord>>;
    async fn find_by_module_name(&self, module_name: &str) -> Result<Option<BundleRecord>>;
    async fn list(&self, filter: BundleFilter) -> Result<Vec<BundleRecord>>;
    /// Returns `false` when no record has `slug`.
    async fn set_active(&self, slug: &str, active: bool) -> Result<bool>;
    /// Deactivate every other active theme of `target` and activate `slug`
    /// in one transaction. Returns the displaced records.
    async fn activate_theme(&self, slug: &str, target: ThemeTarget) -> Result<Vec<BundleRecord>>;
    /// Returns `false` when no record has `slug`.
    async fn delete(&self, slug: &str) -> Result<bool>;
    /// Active records that list `slug` as a direct dependency.
    async fn active_dependents(&self, slug: &str) -> Result<Vec<BundleRecord>>;
}

/// An inserted record whose transaction is still open. Dropping it without
/// committing rolls the insert back.
#[async_trait]
pub trait PendingBundle: Send {
    fn record(&self) -> &BundleRecord;
    async fn commit(self: Box<Self>) -> Result<BundleRecord>;
    async fn rollback(self: Box<Self>) -> Result<()>;
}

// ── SQLite-backed implementation ────────────────────────────────────

/// Stores bundle records in the `bundles` table.
pub struct SqliteBundleRegistry {
    pool: sqlx::SqlitePool,
}

impl SqliteBundleRegistry {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &sqlx::SqlitePool {
        &self.pool
    }
}

/// Map a unique-constraint failure on insert to the matching domain error.
fn map_insert_error(err: sqlx::Error, bundle: &NewBundle) -> Error {
    if let sqlx::Error::Database(db) = &err
        && db.is_unique_violation()
    {
        #[cfg(feature = "metrics")]
        counter!(registry_metrics::UNIQUE_VIOLATIONS_TOTAL).increment(1);

        let message = db.message();
        if message.contains("bundles.slug") {
            return Error::duplicate_slug(&bundle.slug);
        }
        if message.contains("bundles.module_name") {
            return Error::duplicate_module(&bundle.module_name);
        }
    }
    err.into()
}

async fn insert_bundle(conn: &mut SqliteConnection, bundle: NewBundle) -> Result<BundleRecord> {
    let now = now_ms();
    let dependencies = serde_json::to_string(&bundle.dependencies)?;
    let customization_options = bundle
        .customization_options
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let raw_manifest = serde_json::to_string(&bundle.raw_manifest)?;

    let result = sqlx::query(
        r#"INSERT INTO bundles (slug, name, description, version, author, author_url, homepage_url, screenshot, module_name, kind, theme_target, is_active, auto_activate, dependencies, customization_options, raw_manifest, created_at, updated_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&bundle.slug)
    .bind(&bundle.name)
    .bind(&bundle.description)
    .bind(&bundle.version)
    .bind(&bundle.author)
    .bind(&bundle.author_url)
    .bind(&bundle.homepage_url)
    .bind(&bundle.screenshot)
    .bind(&bundle.module_name)
    .bind(bundle.kind.as_str())
    .bind(bundle.theme_target.map(ThemeTarget::as_str))
    .bind(bundle.auto_activate as i32)
    .bind(&dependencies)
    .bind(&customization_options)
    .bind(&raw_manifest)
    .bind(now as i64)
    .bind(now as i64)
    .execute(&mut *conn)
    .await
    .map_err(|e| map_insert_error(e, &bundle))?;

    Ok(BundleRecord {
        id: result.last_insert_rowid(),
        slug: bundle.slug,
        name: bundle.name,
        description: bundle.description,
        version: bundle.version,
        author: bundle.author,
        author_url: bundle.author_url,
        homepage_url: bundle.homepage_url,
        screenshot: bundle.screenshot,
        module_name: bundle.module_name,
        kind: bundle.kind,
        theme_target: bundle.theme_target,
        is_active: false,
        auto_activate: bundle.auto_activate,
        dependencies: bundle.dependencies,
        customization_options: bundle.customization_options,
        raw_manifest: bundle.raw_manifest,
        created_at: now,
        updated_at: now,
    })
}

struct SqlitePendingBundle {
    tx: Transaction<'static, Sqlite>,
    record: BundleRecord,
}

#[async_trait]
impl PendingBundle for SqlitePendingBundle {
    fn record(&self) -> &BundleRecord {
        &self.record
    }

    async fn commit(self: Box<Self>) -> Result<BundleRecord> {
        self.tx.commit().await?;
        Ok(self.record)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl BundleRegistry for SqliteBundleRegistry {
    async fn begin_create(&self, bundle: NewBundle) -> Result<Box<dyn PendingBundle>> {
        let mut tx = self.pool.begin().await?;
        let record = insert_bundle(&mut tx, bundle).await?;
        Ok(Box::new(SqlitePendingBundle { tx, record }))
    }

    async fn find_by_slug(&self, slug: &str) -> Result<Option<BundleRecord>> {
        let row = sqlx::query_as::<_, BundleRow>("SELECT * FROM bundles WHERE slug = ?")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn find_by_module_name(&self, module_name: &str) -> Result<Option<BundleRecord>> {
        let row = sqlx::query_as::<_, BundleRow>("SELECT * FROM bundles WHERE module_name = ?")
            .bind(module_name)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list(&self, filter: BundleFilter) -> Result<Vec<BundleRecord>> {
        let rows = sqlx::query_as::<_, BundleRow>(
            r#"SELECT * FROM bundles
               WHERE (?1 IS NULL OR kind = ?1)
                 AND (?2 IS NULL OR theme_target = ?2)
                 AND (?3 IS NULL OR is_active = ?3)
               ORDER BY kind, name COLLATE NOCASE, slug"#,
        )
        .bind(filter.kind.map(|k| k.as_str()))
        .bind(filter.theme_target.map(ThemeTarget::as_str))
        .bind(filter.active.map(|a| a as i32))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn set_active(&self, slug: &str, active: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE bundles SET is_active = ?, updated_at = ? WHERE slug = ?")
            .bind(active as i32)
            .bind(now_ms() as i64)
            .bind(slug)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn activate_theme(&self, slug: &str, target: ThemeTarget) -> Result<Vec<BundleRecord>> {
        let now = now_ms() as i64;
        let mut tx = self.pool.begin().await?;

        // Write first so the transaction takes the write lock up front.
        let displaced = sqlx::query_as::<_, BundleRow>(
            r#"UPDATE bundles SET is_active = 0, updated_at = ?
               WHERE kind = 'theme' AND theme_target = ? AND is_active = 1 AND slug != ?
               RETURNING *"#,
        )
        .bind(now)
        .bind(target.as_str())
        .bind(slug)
        .fetch_all(&mut *tx)
        .await?;

        let activated = sqlx::query(
            r#"UPDATE bundles SET is_active = 1, updated_at = ?
               WHERE slug = ? AND kind = 'theme' AND theme_target = ?"#,
        )
        .bind(now)
        .bind(slug)
        .bind(target.as_str())
        .execute(&mut *tx)
        .await?;

        if activated.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(Error::bundle_not_found(slug));
        }
        tx.commit().await?;

        #[cfg(feature = "metrics")]
        counter!(registry_metrics::THEME_SWITCHES_TOTAL, labels::TARGET => target.as_str())
            .increment(1);

        displaced.into_iter().map(TryInto::try_into).collect()
    }

    async fn delete(&self, slug: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM bundles WHERE slug = ?")
            .bind(slug)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn active_dependents(&self, slug: &str) -> Result<Vec<BundleRecord>> {
        let rows = sqlx::query_as::<_, BundleRow>(
            r#"SELECT * FROM bundles
               WHERE is_active = 1
                 AND EXISTS (SELECT 1 FROM json_each(bundles.dependencies) WHERE json_each.value = ?)
               ORDER BY slug"#,
        )
        .bind(slug)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

/// Internal row type for sqlx mapping.
#[derive(sqlx::FromRow)]
struct BundleRow {
    id: i64,
    slug: String,
    name: String,
    description: String,
    version: String,
    author: String,
    author_url: String,
    homepage_url: String,
    screenshot: Option<String>,
    module_name: String,
    kind: String,
    theme_target: Option<String>,
    is_active: i32,
    auto_activate: i32,
    dependencies: String,
    customization_options: Option<String>,
    raw_manifest: String,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<BundleRow> for BundleRecord {
    type Error = Error;

    fn try_from(r: BundleRow) -> Result<Self> {
        Ok(Self {
            id: r.id,
            kind: r.kind.parse()?,
            theme_target: r.theme_target.as_deref().map(str::parse).transpose()?,
            slug: r.slug,
            name: r.name,
            description: r.description,
            version: r.version,
            author: r.author,
            author_url: r.author_url,
            homepage_url: r.homepage_url,
            screenshot: r.screenshot,
            module_name: r.module_name,
            is_active: r.is_active != 0,
            auto_activate: r.auto_activate != 0,
            dependencies: serde_json::from_str(&r.dependencies)?,
            customization_options: r
                .customization_options
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            raw_manifest: serde_json::from_str(&r.raw_manifest)?,
            created_at: r.created_at as u64,
            updated_at: r.updated_at as u64,
        })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {serde_json::json, sqlx::sqlite::SqlitePoolOptions};

    use {super::*, crate::types::BundleKind};

    async fn registry() -> SqliteBundleRegistry {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::run_migrations(&pool).await.unwrap();
        SqliteBundleRegistry::new(pool)
    }

    fn plugin(slug: &str, module_name: &str, dependencies: &[&str]) -> NewBundle {
        NewBundle {
            slug: slug.into(),
            name: module_name.into(),
            description: String::new(),
            version: "1.0.0".into(),
            author: String::new(),
            author_url: String::new(),
            homepage_url: String::new(),
            screenshot: None,
            module_name: module_name.into(),
            kind: BundleKind::Plugin,
            theme_target: None,
            auto_activate: false,
            dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
            customization_options: None,
            raw_manifest: json!({ "slug": slug }),
        }
    }

    fn theme(slug: &str, module_name: &str, target: ThemeTarget) -> NewBundle {
        NewBundle {
            kind: BundleKind::Theme,
            theme_target: Some(target),
            customization_options: Some(json!({ "accent": "#fff" })),
            ..plugin(slug, module_name, &[])
        }
    }

    #[tokio::test]
    async fn create_and_find() {
        let reg = registry().await;
        let created = reg
            .create(plugin("gallery", "Gallery", &["media-core"]))
            .await
            .unwrap();
        assert!(!created.is_active);

        let found = reg.find_by_slug("gallery").await.unwrap().unwrap();
        assert_eq!(found.id, created.id);
        assert_eq!(found.dependencies, vec!["media-core".to_string()]);
        assert_eq!(found.raw_manifest["slug"], "gallery");

        let by_module = reg.find_by_module_name("Gallery").await.unwrap().unwrap();
        assert_eq!(by_module.slug, "gallery");
        assert!(reg.find_by_slug("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn pending_insert_is_visible_only_after_commit() {
        let reg = registry().await;

        let pending = reg.begin_create(plugin("blog", "Blog", &[])).await.unwrap();
        assert_eq!(pending.record().slug, "blog");
        pending.rollback().await.unwrap();
        assert!(reg.find_by_slug("blog").await.unwrap().is_none());

        let pending = reg.begin_create(plugin("blog", "Blog", &[])).await.unwrap();
        drop(pending);
        assert!(reg.find_by_slug("blog").await.unwrap().is_none());

        let pending = reg.begin_create(plugin("blog", "Blog", &[])).await.unwrap();
        let committed = pending.commit().await.unwrap();
        let found = reg.find_by_slug("blog").await.unwrap().unwrap();
        assert_eq!(found.id, committed.id);

        let err = reg
            .begin_create(plugin("blog", "OtherBlog", &[]))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::DuplicateSlug { ref slug } if slug == "blog"));
    }

    #[tokio::test]
    async fn unique_violations_map_to_domain_errors() {
        let reg = registry().await;
        reg.create(plugin("blog", "Blog", &[])).await.unwrap();

        let err = reg.create(plugin("blog", "OtherBlog", &[])).await.unwrap_err();
        assert!(matches!(err, Error::DuplicateSlug { ref slug } if slug == "blog"));

        let err = reg.create(plugin("blog-two", "Blog", &[])).await.unwrap_err();
        assert!(matches!(err, Error::DuplicateModule { ref module_name } if module_name == "Blog"));
    }

    #[tokio::test]
    async fn theme_activation_is_exclusive_per_target() {
        let reg = registry().await;
        reg.create(theme("light", "Light", ThemeTarget::Frontend))
            .await
            .unwrap();
        reg.create(theme("dark", "Dark", ThemeTarget::Frontend))
            .await
            .unwrap();
        reg.create(theme("console", "Console", ThemeTarget::Admin))
            .await
            .unwrap();

        assert!(
            reg.activate_theme("light", ThemeTarget::Frontend)
                .await
                .unwrap()
                .is_empty()
        );
        reg.activate_theme("console", ThemeTarget::Admin)
            .await
            .unwrap();

        let displaced = reg
            .activate_theme("dark", ThemeTarget::Frontend)
            .await
            .unwrap();
        assert_eq!(displaced.len(), 1);
        assert_eq!(displaced[0].slug, "light");
        assert!(!displaced[0].is_active);

        let active = reg
            .list(BundleFilter::default().target(ThemeTarget::Frontend).active())
            .await
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].slug, "dark");
        // the admin theme is untouched
        assert!(reg.find_by_slug("console").await.unwrap().unwrap().is_active);
    }

    #[tokio::test]
    async fn partial_index_rejects_second_active_theme() {
        let reg = registry().await;
        reg.create(theme("light", "Light", ThemeTarget::Frontend))
            .await
            .unwrap();
        reg.create(theme("dark", "Dark", ThemeTarget::Frontend))
            .await
            .unwrap();
        reg.set_active("light", true).await.unwrap();
        assert!(reg.set_active("dark", true).await.is_err());
    }

    #[tokio::test]
    async fn activate_theme_on_unknown_slug_rolls_back() {
        let reg = registry().await;
        reg.create(theme("light", "Light", ThemeTarget::Frontend))
            .await
            .unwrap();
        reg.activate_theme("light", ThemeTarget::Frontend)
            .await
            .unwrap();

        let err = reg
            .activate_theme("ghost", ThemeTarget::Frontend)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BundleNotFound { .. }));
        assert!(reg.find_by_slug("light").await.unwrap().unwrap().is_active);
    }

    #[tokio::test]
    async fn list_filters_and_dependents() {
        let reg = registry().await;
        reg.create(plugin("media-core", "MediaCore", &[])).await.unwrap();
        reg.create(plugin("gallery", "Gallery", &["media-core"]))
            .await
            .unwrap();
        reg.create(plugin("slides", "Slides", &["media-core"]))
            .await
            .unwrap();
        reg.create(theme("light", "Light", ThemeTarget::Frontend))
            .await
            .unwrap();
        reg.set_active("gallery", true).await.unwrap();

        assert_eq!(reg.list(BundleFilter::default()).await.unwrap().len(), 4);
        assert_eq!(reg.list(BundleFilter::plugins()).await.unwrap().len(), 3);
        assert_eq!(reg.list(BundleFilter::themes()).await.unwrap().len(), 1);
        let active = reg.list(BundleFilter::plugins().active()).await.unwrap();
        assert_eq!(active.len(), 1);

        let dependents = reg.active_dependents("media-core").await.unwrap();
        assert_eq!(dependents.len(), 1);
        assert_eq!(dependents[0].slug, "gallery");
    }

    #[tokio::test]
    async fn delete_and_set_active_report_missing_rows() {
        let reg = registry().await;
        reg.create(plugin("blog", "Blog", &[])).await.unwrap();
        assert!(reg.set_active("blog", true).await.unwrap());
        assert!(!reg.set_active("ghost", true).await.unwrap());
        assert!(reg.delete("blog").await.unwrap());
        assert!(!reg.delete("blog").await.unwrap());
    }
}
