mod common;

use common::{harness, PRIVATE_IP, PUBLIC_IP, PUBLIC_LOCATION};
use iplocate::activities::status::{RESULT_QUERY, STATUS_QUERY};
use iplocate::activities::{WorkflowStatusReport, QUERY_WORKFLOW_STATUS};
use iplocate::ids::OBSERVABLE_LOOKUP_ID;
use iplocate::workflows::observe::{STATUS_COMPLETE, STATUS_FAILED, STATUS_FETCHING, STATUS_STARTING};
use iplocate::workflows::{ObservableLookup, OBSERVABLE_LOOKUP_WORKFLOW, STATUS_CHECKER_WORKFLOW};
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn observable_lookup_reports_progress() {
    let h = harness();
    h.env
        .start_workflow(
            OBSERVABLE_LOOKUP_ID,
            OBSERVABLE_LOOKUP_WORKFLOW,
            &ObservableLookup::new(PUBLIC_IP),
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    let status: String = h.env.query_workflow(OBSERVABLE_LOOKUP_ID, STATUS_QUERY).await.unwrap();
    assert_eq!(status, STATUS_STARTING);
    let result: String = h.env.query_workflow(OBSERVABLE_LOOKUP_ID, RESULT_QUERY).await.unwrap();
    assert_eq!(result, "");

    tokio::time::sleep(Duration::from_secs(10)).await;
    let status: String = h.env.query_workflow(OBSERVABLE_LOOKUP_ID, STATUS_QUERY).await.unwrap();
    assert_eq!(status, STATUS_COMPLETE);
    let result: String = h.env.query_workflow(OBSERVABLE_LOOKUP_ID, RESULT_QUERY).await.unwrap();
    assert_eq!(result, PUBLIC_LOCATION);

    let location: String = h.env.workflow_result(OBSERVABLE_LOOKUP_ID).await.unwrap();
    assert_eq!(location, PUBLIC_LOCATION);
}

#[tokio::test(start_paused = true)]
async fn status_checker_reports_through_an_activity() {
    let h = harness();
    h.env
        .start_workflow(
            OBSERVABLE_LOOKUP_ID,
            OBSERVABLE_LOOKUP_WORKFLOW,
            &ObservableLookup::new(PUBLIC_IP),
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    h.env
        .start_workflow("checker-early", STATUS_CHECKER_WORKFLOW, OBSERVABLE_LOOKUP_ID)
        .await
        .unwrap();
    let summary: String = h.env.workflow_result("checker-early").await.unwrap();
    assert_eq!(summary, "Workflow ip-lookup-observable is 'starting'");
    // the observation is part of the checker's history
    assert_eq!(
        h.env.executed_activities("checker-early").await.unwrap(),
        vec![QUERY_WORKFLOW_STATUS]
    );

    tokio::time::sleep(Duration::from_secs(10)).await;
    h.env
        .start_workflow("checker-late", STATUS_CHECKER_WORKFLOW, OBSERVABLE_LOOKUP_ID)
        .await
        .unwrap();
    let summary: String = h.env.workflow_result("checker-late").await.unwrap();
    assert_eq!(
        summary,
        format!(
            "Workflow ip-lookup-observable is 'complete' - Result: {}",
            PUBLIC_LOCATION
        )
    );
}

#[tokio::test(start_paused = true)]
async fn failed_lookup_is_observable() {
    let h = harness();
    let input = ObservableLookup {
        ip: PRIVATE_IP.to_string(),
        fetch_delay_secs: 2,
        linger_secs: 0,
    };
    h.env
        .start_workflow("lookup-doomed", OBSERVABLE_LOOKUP_WORKFLOW, &input)
        .await
        .unwrap();

    assert!(h.env.workflow_result::<String>("lookup-doomed").await.is_err());
    let status: String = h.env.query_workflow("lookup-doomed", STATUS_QUERY).await.unwrap();
    assert_eq!(status, STATUS_FAILED);
}

#[tokio::test]
async fn status_activity_reads_a_running_workflow() {
    let h = harness();
    let input = ObservableLookup {
        fetch_delay_secs: 3600,
        ..ObservableLookup::new(PUBLIC_IP)
    };
    h.env
        .start_workflow("lookup-slow", OBSERVABLE_LOOKUP_WORKFLOW, &input)
        .await
        .unwrap();

    let mut report: Option<WorkflowStatusReport> = None;
    for _ in 0..50 {
        if let Ok(found) = h
            .env
            .execute_activity::<_, WorkflowStatusReport>(QUERY_WORKFLOW_STATUS, "lookup-slow")
            .await
        {
            report = Some(found);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let report = report.expect("status query never answered");
    assert_eq!(report.workflow_id, "lookup-slow");
    assert!(
        report.status == STATUS_STARTING || report.status == STATUS_FETCHING,
        "{}",
        report.status
    );
    assert_eq!(report.result, "");

    h.env.cancel_workflow("lookup-slow").await.unwrap();
}
