use crate::TailproxyProcess;
use std::time::Duration;

#[tokio::test]
async fn dry_run_exits_zero_without_opening_sockets() -> anyhow::Result<()> {
    let mut process = TailproxyProcess::spawn(&["--dry-run", "--port", "0"])?;
    let status = process
        .wait_for_exit_timeout(Duration::from_secs(5))
        .await?
        .expect("dry-run should exit promptly");
    assert!(status.success());
    Ok(())
}

#[tokio::test]
async fn rejects_invalid_export_allow_ports() -> anyhow::Result<()> {
    let mut process = TailproxyProcess::spawn(&[
        "--dry-run",
        "--export-listeners",
        "--export-allow-ports",
        "not-a-port-spec",
    ])?;
    let status = process
        .wait_for_exit_timeout(Duration::from_secs(5))
        .await?
        .expect("invalid config should fail fast");
    assert!(!status.success());
    Ok(())
}
