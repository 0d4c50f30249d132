use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::Result;
use notification_pipeline::{
    error::PipelineError,
    shutdown::{ShutdownSequence, StepOutcome},
};
use tokio::time::sleep;

/// Test: Steps run in the order they were added
#[tokio::test]
async fn test_steps_run_in_order() -> Result<()> {
    let order = Arc::new(Mutex::new(Vec::new()));

    let mut sequence = ShutdownSequence::new(Duration::from_secs(1));
    for name in ["consumer", "broker connection", "http server"] {
        let order = Arc::clone(&order);
        sequence = sequence.step(name, async move {
            sleep(Duration::from_millis(10)).await;
            order.lock().unwrap().push(name);
            Ok(())
        });
    }

    let reports = sequence.run().await;

    assert_eq!(*order.lock().unwrap(), vec!["consumer", "broker connection", "http server"]);
    assert!(reports.iter().all(|r| r.outcome == StepOutcome::Completed));
    Ok(())
}

/// Test: A failed or stuck step does not block the ones after it
#[tokio::test]
async fn test_failed_and_slow_steps_do_not_block() -> Result<()> {
    let ran_last = Arc::new(Mutex::new(false));
    let flag = Arc::clone(&ran_last);

    let reports = ShutdownSequence::new(Duration::from_millis(100))
        .step("consumer", async {
            sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .step("broker connection", async {
            Err(PipelineError::Broker("already closed".to_string()))
        })
        .step("http server", async move {
            *flag.lock().unwrap() = true;
            Ok(())
        })
        .run()
        .await;

    let outcomes: Vec<_> = reports.iter().map(|r| (r.name.as_str(), r.outcome.clone())).collect();
    assert_eq!(
        outcomes,
        vec![
            ("consumer", StepOutcome::TimedOut),
            (
                "broker connection",
                StepOutcome::Failed("broker error: already closed".to_string())
            ),
            ("http server", StepOutcome::Completed),
        ]
    );
    assert!(*ran_last.lock().unwrap());
    Ok(())
}
