mod browser;
mod config;
mod find;
mod interact;
mod login;
mod renew;
mod status;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use browser::{BrowserOutcome, Session};
use config::Config;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("starting library renewal run");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!("{err}");
            return;
        }
    };

    info!("initializing browser");
    let session = match Session::launch(&config).await {
        Ok(session) => session,
        Err(err) => {
            error!("browser session could not be created: {err}");
            error!("make sure chromedriver is running and matches the installed Chrome");
            return;
        }
    };

    // Renewal is best-effort by design: only a login failure aborts the
    // sequence, and the process still exits normally either way.
    match run(&session, &config).await {
        Ok(()) => info!("run completed"),
        Err(err) => error!("run aborted: {err}"),
    }

    session.close().await;
    info!("browser closed");
}

async fn run(session: &Session, config: &Config) -> Result<(), BrowserOutcome> {
    login::login(session, config).await?;
    renew::renew_loans(session).await;
    status::report_loan_status(session).await;
    Ok(())
}
