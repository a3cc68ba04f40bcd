use std::sync::Arc;

use clap::Parser;
use netwarden::{
    cli::{Args, SettingsLoader},
    directory::PackageManagerDirectory,
    error::NetwardenError,
    exec::{Capabilities, SuExecutor},
    policy::CommandTable,
    reconciler::{PolicyReconciler, ShutdownSignal},
    session::Session,
};

#[tokio::main]
async fn main() -> Result<(), NetwardenError> {
    env_logger::init();

    let args = Args::parse();
    let settings = SettingsLoader::load(&args)?;

    let executor = Arc::new(SuExecutor::new(settings.su.clone()));
    let capabilities = Capabilities::detect(executor.as_ref(), &settings.tools).await;
    if !capabilities.root {
        log::error!("Could not obtain a root shell via {}", settings.su);
    }

    let directory = PackageManagerDirectory::new(Arc::clone(&executor));
    let (reconciler, events) = PolicyReconciler::new(
        executor,
        directory,
        CommandTable::new(settings.tools.clone()),
        capabilities,
        settings.options.clone(),
    );

    let shutdown = ShutdownSignal::new();
    {
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("Interrupted, stopping");
                shutdown.shutdown();
            }
        });
    }

    let mut session = Session::new(reconciler, events);
    let mut stdout = std::io::stdout().lock();
    session
        .execute(&args.command, settings.watch_interval, shutdown, &mut stdout)
        .await
}
