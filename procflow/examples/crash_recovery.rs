//! Crash recovery demo (SQLite)
//!
//! This example demonstrates:
//! - Instances outliving the engine that started them
//! - `Engine::recover()` rebuilding state by replaying the audit trail
//! - Activities that already completed are not invoked again
//!
//! ## Scenario
//! - A $30,000 requisition enters approval; sam approves the first stage
//! - The engine stops while the instance waits on dana
//! - A fresh engine opens the same database and recovers
//! - The instance resumes waiting on dana; dana approves and the PO is issued
//! - The approval chain was looked up exactly once across both engines
//!
//! ## Key Takeaways
//! - The audit log is the only state that has to survive a restart
//! - Replay reproduces the instance without repeating side effects
//!
//! ## Prerequisites
//! SQLite database created in the system temp directory
//!
//! ## Run with
//! ```bash
//! cargo run --example crash_recovery --features=sqlite
//! ```

use procflow::prelude::*;
use std::time::Duration;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

async fn wait_for_approver(engine: &Engine, id: Uuid, approver: &str) -> Result<(), EngineError> {
    loop {
        let view = engine.query(id).await?;
        if view.pending_approver().as_deref() == Some(approver) {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "procflow=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let path = std::env::temp_dir().join("procflow_crash_recovery.db");
    let _ = std::fs::remove_file(&path);

    let activities = Arc::new(
        DirectoryActivities::new()
            .with_department("physics", Department::new("sam", "dana", "erin"))
            .with_budget("PHY-100", Decimal::from(250_000))
            .with_vendor(VendorRecord::in_good_standing("V-100")),
    );

    let requisition = Requisition {
        requisition_id: "REQ-2026-0777".into(),
        requester_id: "alice".into(),
        department: "physics".into(),
        budget_code: "PHY-100".into(),
        vendor_id: "V-100".into(),
        category: "lab_supplies".into(),
        total: Decimal::from(30_000),
        funding: FundingSource::Institutional,
        urgency: Urgency::Standard,
        line_items: vec![],
        quote_count: 3,
        sole_source_justification: None,
    };

    println!("\n=== First run ===");
    let id = {
        let log = Arc::new(SqliteAuditLog::new(&path).await?);
        let engine = Engine::new(log, activities.clone());
        let id = engine
            .create_instance(WorkflowType::Approval, DomainPayload::Requisition(requisition))
            .await?;

        wait_for_approver(&engine, id, "sam").await?;
        engine.signal(id, Signal::approve("sam")).await?;
        wait_for_approver(&engine, id, "dana").await?;

        let view = engine.query(id).await?;
        println!(
            "instance {} is {} with {} of {} stages approved",
            id,
            view.status(),
            view.completed_approvals().len(),
            view.stages().len()
        );
        println!("stopping the engine");
        engine.shutdown().await;
        id
    };

    println!("\n=== Second run ===");
    let log = Arc::new(SqliteAuditLog::new(&path).await?);
    let engine = Engine::new(log, activities.clone());
    let report = engine.recover().await?;
    println!(
        "recovered: {} resumed, {} archived",
        report.resumed.len(),
        report.archived.len()
    );

    wait_for_approver(&engine, id, "dana").await?;
    println!("instance {} is waiting on dana again", id);
    engine.signal(id, Signal::approve("dana")).await?;

    let view = engine.wait_for_terminal(id).await?;
    println!(
        "instance {} -> {} (po {})",
        id,
        view.status(),
        view.purchase_order().unwrap_or("-")
    );

    println!("\n=== Side effects ===");
    println!(
        "determine_approval_chain invoked {} time(s)",
        activities.attempts("determine_approval_chain")
    );
    println!(
        "approval requests sent to sam: {}",
        activities
            .notifications_for("sam")
            .iter()
            .filter(|n| n.kind == "approval_request")
            .count()
    );

    engine.shutdown().await;
    let _ = std::fs::remove_file(&path);
    Ok(())
}
