use crate::TailproxyProcess;
use std::time::Duration;

#[tokio::test]
async fn sigterm_triggers_graceful_shutdown_in_proxy_only_mode() -> anyhow::Result<()> {
    let mut process = TailproxyProcess::spawn(&["--port", "0"])?;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(process.is_running(), "tailproxy should still be running");

    process.terminate()?;

    let status = process
        .wait_for_exit_timeout(Duration::from_secs(5))
        .await?
        .expect("tailproxy should exit after SIGTERM within the shutdown grace period");
    assert!(status.success());
    Ok(())
}
