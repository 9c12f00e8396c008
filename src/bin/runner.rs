use anyhow::{Context, Result};
use task_log_pipeline::{
    configuration::get_configuration,
    observability::{get_subscriber, init_log, init_subscriber},
    runner::TaskRunner,
};
use tokio::{signal, sync::watch};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = get_configuration().context("expected to parse configuration with success")?;
    let signalled = listen_for_shutdown()?;

    // Fail before any task runs if the exporter cannot be wired.
    let pipeline = init_log(&settings).context("expected to create log pipeline")?;

    let subscriber = get_subscriber(
        settings.application.name.clone(),
        settings.logging.level.clone(),
        settings.logging.format,
        std::io::stdout,
        pipeline.provider(),
    );
    init_subscriber(subscriber)?;

    tracing::debug!(
        exporter = %settings.exporter.target,
        mode = ?settings.processor.mode,
        iterations = ?settings.runner.iteration_count,
        "log pipeline ready"
    );

    let summary = TaskRunner::new(&settings.runner)
        .run(shutdown_signal(signalled))
        .await;

    if summary.interrupted {
        eprintln!("Shutting down after {} tasks...", summary.completed);
    }

    tracing::debug!(
        grace_period = ?pipeline.grace_period(),
        "draining log pipeline"
    );

    // Blocks for at most the grace period, keep it off the runtime workers.
    let shutdown = tokio::task::spawn_blocking(move || pipeline.shutdown())
        .await
        .context("expected log pipeline shutdown to finish")?;
    if let Err(e) = shutdown {
        eprintln!("log pipeline shutdown: {e}");
    }

    Ok(())
}

/// Installs the SIGINT and SIGTERM handlers right away, so a signal that
/// arrives while the first task is running is still caught, and reports the
/// first one through the returned receiver.
fn listen_for_shutdown() -> Result<watch::Receiver<bool>> {
    let (sender, receiver) = watch::channel(false);

    #[cfg(unix)]
    {
        let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())
            .context("failed to install SIGINT handler")?;
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("failed to install SIGTERM handler")?;

        tokio::spawn(async move {
            tokio::select! {
                _ = interrupt.recv() => {},
                _ = terminate.recv() => {},
            }
            let _ = sender.send(true);
        });
    }

    #[cfg(not(unix))]
    {
        let mut ctrl_c =
            signal::windows::ctrl_c().context("failed to install Ctrl+C handler")?;

        tokio::spawn(async move {
            ctrl_c.recv().await;
            let _ = sender.send(true);
        });
    }

    Ok(receiver)
}

async fn shutdown_signal(mut signalled: watch::Receiver<bool>) {
    // The listener only goes away without signalling if its stream ends.
    if signalled.wait_for(|signalled| *signalled).await.is_err() {
        std::future::pending::<()>().await;
    }
}
