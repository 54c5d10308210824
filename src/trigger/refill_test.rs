use super::trigger_test::{Harness, harness, triggers_piece, version_with_trigger};
use super::*;
use crate::constants::{FLOW_JOB_BACKFILL_MARKER, TRIGGER_SOURCE_PAGE_SIZE};
use crate::storage::{FlowVersionRepository, SystemMarkerRepository, TriggerSourceRepository};

/// Same storage and registry, empty queue: what a restarted process sees
fn restarted(h: &Harness) -> (TriggerHooks, Arc<InMemoryJobQueue>) {
    let queue = Arc::new(InMemoryJobQueue::new());
    let hooks = TriggerHooks::new(
        h.storage.clone(),
        h.registry.clone(),
        Arc::new(NoopHookExecutor),
        queue.clone(),
        h.hooks.settings().clone(),
    );
    (hooks, queue)
}

fn execute_flow_job(id: &str, flow_version_id: Uuid, flow_id: Option<Uuid>) -> JobSpec {
    JobSpec {
        id: id.to_string(),
        job_type: JobType::ExecuteFlow,
        data: JobData {
            project_id: "proj".to_string(),
            flow_version_id,
            flow_id,
            payload: Some(serde_json::json!({"body": "hello"})),
        },
        schedule: None,
    }
}

#[tokio::test]
async fn test_refill_polling_jobs_is_idempotent() {
    let h = harness();
    let polling_a = version_with_trigger("new_row");
    let polling_b = version_with_trigger("new_row");
    let webhook = version_with_trigger("new_message");
    let app = version_with_trigger("app_event");
    for version in [&polling_a, &polling_b, &webhook, &app] {
        h.hooks.enable(version, "proj", false).await.unwrap();
    }
    assert_eq!(h.queue.len(), 3);

    let (hooks, queue) = restarted(&h);
    let first = hooks.refill_polling_jobs().await.unwrap();
    let second = hooks.refill_polling_jobs().await.unwrap();

    assert_eq!(
        first,
        RefillReport {
            scanned: 4,
            scheduled: 3,
            skipped: 1
        }
    );
    assert_eq!(first, second);
    assert_eq!(queue.len(), 3);

    let mut ids: Vec<String> = queue.jobs().into_iter().map(|job| job.id).collect();
    ids.sort();
    let mut expected = vec![
        JobSpec::polling_id(polling_a.id),
        JobSpec::polling_id(polling_b.id),
        JobSpec::renew_webhook_id(webhook.id),
    ];
    expected.sort();
    assert_eq!(ids, expected);

    // the jobs match what enabling scheduled
    assert_eq!(queue.jobs().len(), h.queue.jobs().len());
    for job in h.queue.jobs() {
        assert_eq!(queue.get(&job.id).await.unwrap(), Some(job));
    }
}

#[tokio::test]
async fn test_refill_skips_simulated_and_disabled_sources() {
    let h = harness();
    let simulated = version_with_trigger("new_row");
    let disabled = version_with_trigger("new_row");
    h.hooks.enable(&simulated, "proj", true).await.unwrap();
    h.hooks.enable(&disabled, "proj", false).await.unwrap();
    h.hooks.disable(&disabled, "proj", false).await.unwrap();

    let (hooks, queue) = restarted(&h);
    let report = hooks.refill_polling_jobs().await.unwrap();

    assert_eq!(report.scanned, 1);
    assert_eq!(report.scheduled, 0);
    assert!(queue.is_empty());
}

#[tokio::test]
async fn test_refill_uses_current_renewal_configuration() {
    let h = harness();
    let webhook = version_with_trigger("new_message");
    h.hooks.enable(&webhook, "proj", false).await.unwrap();

    // the piece release now renews on a different cadence
    h.registry.insert(triggers_piece("0 */6 * * *"));

    let (hooks, queue) = restarted(&h);
    hooks.refill_polling_jobs().await.unwrap();

    let job = queue
        .get(&JobSpec::renew_webhook_id(webhook.id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.schedule.unwrap().cron_expression, "0 */6 * * *");
}

#[tokio::test]
async fn test_refill_survives_unresolvable_piece() {
    let h = harness();
    let webhook = version_with_trigger("new_message");
    let polling = version_with_trigger("new_row");
    h.hooks.enable(&webhook, "proj", false).await.unwrap();
    h.hooks.enable(&polling, "proj", false).await.unwrap();

    let mut orphan = h
        .storage
        .find_active_by_flow_version(webhook.id, false)
        .await
        .unwrap()
        .unwrap();
    orphan.piece_name = "@x/removed".to_string();
    h.storage.save_trigger_source(&orphan).await.unwrap();

    let (hooks, queue) = restarted(&h);
    let report = hooks.refill_polling_jobs().await.unwrap();

    assert_eq!(report.scheduled, 1);
    assert_eq!(report.skipped, 1);
    assert!(queue.get(&JobSpec::polling_id(polling.id)).await.unwrap().is_some());
}

#[tokio::test]
async fn test_refill_pages_through_all_sources() {
    let h = harness();
    let template = version_with_trigger("new_row");
    h.hooks.enable(&template, "proj", false).await.unwrap();
    let base = h
        .storage
        .find_active_by_flow_version(template.id, false)
        .await
        .unwrap()
        .unwrap();

    for _ in 0..TRIGGER_SOURCE_PAGE_SIZE {
        let source = TriggerSource {
            id: Uuid::new_v4(),
            flow_id: Uuid::new_v4(),
            flow_version_id: Uuid::new_v4(),
            ..base.clone()
        };
        h.storage.save_trigger_source(&source).await.unwrap();
    }

    let (hooks, queue) = restarted(&h);
    let report = hooks.refill_polling_jobs().await.unwrap();
    assert_eq!(report.scanned, TRIGGER_SOURCE_PAGE_SIZE + 1);
    assert_eq!(queue.len(), TRIGGER_SOURCE_PAGE_SIZE + 1);
}

#[tokio::test]
async fn test_refill_execute_flow_jobs_backfills_flow_id_once() {
    let h = harness();
    let known_a = FlowVersion::new_empty(Uuid::new_v4(), "A");
    let known_b = FlowVersion::new_empty(Uuid::new_v4(), "B");
    h.storage.save(&known_a).await.unwrap();
    h.storage.save(&known_b).await.unwrap();
    let already_set = Uuid::new_v4();

    let queue = &h.queue;
    queue.add(execute_flow_job("1", known_a.id, None)).await.unwrap();
    queue
        .add(execute_flow_job("2", known_b.id, Some(already_set)))
        .await
        .unwrap();
    queue.add(execute_flow_job("3", Uuid::new_v4(), None)).await.unwrap();
    queue.add(execute_flow_job("4", known_b.id, None)).await.unwrap();
    queue.add(execute_flow_job("5", known_a.id, None)).await.unwrap();

    let report = h.hooks.refill_execute_flow_jobs(2).await.unwrap();
    assert_eq!(
        report,
        RefillReport {
            scanned: 5,
            scheduled: 3,
            skipped: 2
        }
    );

    let flow_of = |id: &'static str| async move { queue.get(id).await.unwrap().unwrap().data };
    assert_eq!(flow_of("1").await.flow_id, Some(known_a.flow_id));
    assert_eq!(flow_of("2").await.flow_id, Some(already_set));
    assert_eq!(flow_of("3").await.flow_id, None);
    assert_eq!(flow_of("4").await.flow_id, Some(known_b.flow_id));
    let fifth = flow_of("5").await;
    assert_eq!(fifth.flow_id, Some(known_a.flow_id));
    assert_eq!(fifth.payload, Some(serde_json::json!({"body": "hello"})));

    assert!(
        h.storage
            .get_marker(FLOW_JOB_BACKFILL_MARKER)
            .await
            .unwrap()
            .is_some()
    );

    // at most once: later jobs are left alone
    queue.add(execute_flow_job("6", known_a.id, None)).await.unwrap();
    let again = h.hooks.refill_execute_flow_jobs(2).await.unwrap();
    assert_eq!(again, RefillReport::default());
    assert_eq!(flow_of("6").await.flow_id, None);
}

#[tokio::test]
async fn test_refill_execute_flow_jobs_on_empty_queue_sets_marker() {
    let h = harness();
    let report = h.hooks.refill_execute_flow_jobs(1000).await.unwrap();
    assert_eq!(report, RefillReport::default());
    assert!(
        h.storage
            .get_marker(FLOW_JOB_BACKFILL_MARKER)
            .await
            .unwrap()
            .is_some()
    );
}
