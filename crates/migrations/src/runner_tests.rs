use super::*;
use crate::source::StaticSource;
use crate::AutoCreate;

fn versions(plan: &MigrationPlan) -> Vec<(i64, bool)> {
    plan.migrations
        .iter()
        .map(|m| (m.version(), m.is_snapshot()))
        .collect()
}

fn applied(version: i64, name: &str, is_snapshot: bool) -> AppliedMigration {
    AppliedMigration {
        version,
        name: name.to_string(),
        is_snapshot,
        applied_at: Utc::now(),
    }
}

#[test]
fn test_plan_orders_pending_by_version() {
    let migrations = vec![
        Migration::sql(1001, "Orders index", "SELECT 1"),
        Migration::sql(2, "Add accounts", "SELECT 1"),
        Migration::sql(1000, "Orders", "SELECT 1"),
        Migration::sql(1, "Init", "SELECT 1"),
    ];

    let plan = plan_migrations(&migrations, 0, false);
    assert_eq!(plan.baseline, 0);
    assert!(plan.snapshot.is_none());
    assert_eq!(
        versions(&plan),
        vec![(1, false), (2, false), (1000, false), (1001, false)]
    );
}

#[test]
fn test_plan_skips_applied_versions() {
    let migrations = vec![
        Migration::sql(1, "Init", "SELECT 1"),
        Migration::sql(2, "Add accounts", "SELECT 1"),
        Migration::sql(3, "Add users", "SELECT 1"),
    ];

    let plan = plan_migrations(&migrations, 2, false);
    assert_eq!(versions(&plan), vec![(3, false)]);

    let plan = plan_migrations(&migrations, 3, true);
    assert!(plan.migrations.is_empty());
}

#[test]
fn test_plan_starts_from_newest_snapshot_on_empty_ledger() {
    let migrations = vec![
        Migration::snapshot(500, "Baseline", "SELECT 1"),
        Migration::snapshot(2, "Old baseline", "SELECT 1"),
        Migration::sql(501, "After baseline", "SELECT 1"),
        Migration::sql(502, "Also covered", "SELECT 1"),
        Migration::sql(1000, "Next family", "SELECT 1"),
    ];

    let plan = plan_migrations(&migrations, 0, true);
    assert_eq!(plan.baseline, 500);
    assert_eq!(plan.snapshot.as_ref().map(|s| s.version()), Some(500));
    assert_eq!(
        versions(&plan),
        vec![(500, true), (501, false), (502, false), (1000, false)]
    );
}

#[test]
fn test_plan_ignores_snapshots_when_disabled_or_ledger_not_empty() {
    let migrations = vec![
        Migration::sql(1, "Init", "SELECT 1"),
        Migration::sql(2, "Add accounts", "SELECT 1"),
        Migration::snapshot(2, "Baseline", "SELECT 1"),
        Migration::sql(3, "Add users", "SELECT 1"),
    ];

    let disabled = plan_migrations(&migrations, 0, false);
    assert_eq!(versions(&disabled), vec![(1, false), (2, false), (3, false)]);

    let in_use = plan_migrations(&migrations, 1, true);
    assert!(in_use.snapshot.is_none());
    assert_eq!(versions(&in_use), vec![(2, false), (3, false)]);
}

#[test]
fn test_status_report_merges_ledger_rows() {
    let migrations = vec![
        Migration::sql(1, "Init", "SELECT 1"),
        Migration::sql(2, "Add accounts", "SELECT 1"),
    ];
    let rows = vec![applied(1, "Init", false), applied(7, "Hotfix", false)];

    let report = status_report(&migrations, &rows);
    assert_eq!(report.len(), 3);

    assert_eq!(report[0].version, 1);
    assert!(matches!(report[0].status, MigrationStatus::Applied { .. }));
    assert_eq!(report[1].version, 2);
    assert_eq!(report[1].status, MigrationStatus::Pending);
    assert_eq!(report[2].name, "Hotfix");
    assert!(matches!(report[2].status, MigrationStatus::Unknown { .. }));
}

#[test]
fn test_new_runner_is_idle() {
    let runner = MigrationRunner::new(MigrationConfig::new("postgres://localhost/app"));
    assert_eq!(runner.state(), RunnerState::Idle);
    assert_eq!(runner.config().database_url, "postgres://localhost/app");
}

#[tokio::test]
async fn test_validate_counts_migrations_across_sources() {
    let runner = MigrationRunner::new(MigrationConfig::new("postgres://localhost/app"))
        .with_source(StaticSource::new(
            "core",
            vec![
                Migration::sql(1, "Init", "SELECT 1"),
                Migration::sql(2, "Add accounts", "SELECT 1"),
            ],
        ))
        .with_source(StaticSource::new(
            "billing",
            vec![Migration::sql(1000, "Invoices", "SELECT 1")],
        ));

    assert_eq!(runner.validate().await.unwrap(), 3);
}

#[tokio::test]
async fn test_validate_rejects_gap_across_sources() {
    let runner = MigrationRunner::new(MigrationConfig::new("postgres://localhost/app"))
        .with_source(StaticSource::new("core", vec![Migration::sql(1, "Init", "SELECT 1")]))
        .with_source(StaticSource::new("more", vec![Migration::sql(3, "Skipped two", "SELECT 1")]));

    let err = runner.validate().await.unwrap_err();
    assert!(matches!(
        err,
        MigrateError::Validation(crate::error::ValidationError::NotSequential { previous: 1, next: 3, .. })
    ));
}

#[tokio::test]
async fn test_run_with_only_empty_sources_is_a_no_op() {
    // Never reaches the database: provisioning is off and no source has migrations
    let config = MigrationConfig::new("postgres://nobody@invalid.invalid:1/app");
    let mut runner = MigrationRunner::new(config).with_source(StaticSource::new("empty", Vec::new()));

    let result = runner.run(&CancellationToken::new()).await.unwrap();
    assert_eq!(result.applied_count, 0);
    assert_eq!(result.final_version, None);
    assert_eq!(runner.state(), RunnerState::Complete);
}

#[tokio::test]
async fn test_run_fails_before_connecting_on_invalid_set() {
    let config = MigrationConfig::new("postgres://nobody@invalid.invalid:1/app");
    let mut runner = MigrationRunner::new(config).with_source(StaticSource::new(
        "core",
        vec![
            Migration::sql(5, "First", "SELECT 1"),
            Migration::sql(5, "Second", "SELECT 1"),
        ],
    ));

    let err = runner.run(&CancellationToken::new()).await.unwrap_err();
    assert!(err.is_before_mutation());
    assert!(matches!(err, MigrateError::Validation(_)));
    assert_eq!(runner.state(), RunnerState::Failed);
}

#[tokio::test]
async fn test_run_rejects_invalid_config() {
    let config = MigrationConfig::new("postgres://localhost/app")
        .with_auto_create(AutoCreate::IfNotExists)
        .with_restore_from("app");
    let mut runner = MigrationRunner::new(config);

    let err = runner.run(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, MigrateError::Config(_)));
    assert_eq!(runner.state(), RunnerState::Failed);
}
