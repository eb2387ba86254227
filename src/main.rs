// Entry point for the cache check.
// Loads configuration, authorizes, runs the lifecycle, and sets the exit code.

use std::process::ExitCode;

use tracing::{info, warn};

use hpc_cache_check::auth::Authorizer;
use hpc_cache_check::config::Config;
use hpc_cache_check::logging;
use hpc_cache_check::pipeline::BuildLog;
use hpc_cache_check::runner::{self, Runner};
use hpc_cache_check::storagecache::{CachesClient, http_client};

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();

    let config = Config::from_env();
    let mut log = BuildLog::stdout();

    let http = match http_client() {
        Ok(http) => http,
        Err(e) => return runner::fail_setup(&mut log, "cannot build HTTP client", e),
    };

    let deadline = runner::run_deadline(&config);
    let authorizer = Authorizer::from_environment(http.clone(), &config);
    let token = runner::authorize(&authorizer, &config, deadline).await;

    let client = match CachesClient::new(http, &config, token.as_ref()) {
        Ok(client) => client,
        Err(e) => return runner::fail_setup(&mut log, "cannot create caches client", e),
    };
    if !client.is_authorized() {
        warn!("continuing without a bearer token");
    }

    info!(
        "checking cache {} in {}/{}",
        config.cache_name, config.subscription_id, config.resource_group
    );
    let outcome = Runner::new(&config, &client, log).run(deadline).await;
    outcome.exit_code()
}
