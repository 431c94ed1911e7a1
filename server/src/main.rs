use tracing::info;

mod account;
mod auth;
mod avatars;
mod credentials;
mod engine;
mod errors;
mod mailer;
mod routes;
mod state;
mod store;

use state::AppState;

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()?
        .block_on(run_application())
}

async fn run_application() -> color_eyre::Result<()> {
    setup_tracing()?;

    let (app_state, mailer_task) = AppState::from_env().await?;

    info!("Spawning application tasks");
    let server_task = tokio::spawn(run_server(app_state));

    // Mailer failures stay on the mailer's own channel; joining here only
    // notices a worker that stopped entirely.
    let results = futures::future::try_join_all([server_task, mailer_task]).await?;
    for result in results {
        result?;
    }

    Ok(())
}

async fn run_server(app_state: AppState) -> color_eyre::Result<()> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], app_state.config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("Listening on {addr}");
    axum::serve(listener, routes::routes(app_state)).await?;

    Ok(())
}

fn setup_tracing() -> color_eyre::Result<()> {
    use tracing_subscriber::layer::SubscriberExt as _;
    use tracing_subscriber::util::SubscriberInitExt as _;
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}
