// Sequential cache check.
// Runs create, wait, get, delete, wait under one deadline and reports the failed stage.

use std::future::Future;
use std::io::Write;
use std::process::ExitCode;
use serde::Serialize;
use tokio::time::{Instant, timeout_at};
use tracing::{error, info, warn};

use crate::auth::{AccessToken, Authorizer};
use crate::config::Config;
use crate::error::{CheckError, Result};
use crate::pipeline::BuildLog;
use crate::storagecache::{Cache, CachesClient};

/// Step of a run; each maps to the build tag the pipeline filters on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Create,
    WaitCreate,
    Get,
    Delete,
    WaitDelete,
}

impl Stage {
    pub fn build_tag(&self) -> &'static str {
        match self {
            Stage::Create => "FAIL put cache GoSDK",
            Stage::WaitCreate | Stage::Get => "FAIL get cache GoSDK",
            Stage::Delete | Stage::WaitDelete => "FAIL delete cache GoSDK",
        }
    }

    pub fn failure_message(&self) -> &'static str {
        match self {
            Stage::Create | Stage::WaitCreate => {
                "cannot get the cache to complete create or update response"
            }
            Stage::Get => "Error during Get Call",
            Stage::Delete => "Error during initial Delete Call",
            Stage::WaitDelete => "Cache Delete Failed",
        }
    }
}

/// Result of a run.
#[derive(Debug)]
pub enum RunOutcome {
    Passed,
    Failed { stage: Stage, error: CheckError },
}

impl RunOutcome {
    pub fn failed_stage(&self) -> Option<Stage> {
        match self {
            RunOutcome::Passed => None,
            RunOutcome::Failed { stage, .. } => Some(*stage),
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        match self {
            RunOutcome::Passed => ExitCode::SUCCESS,
            RunOutcome::Failed { .. } => ExitCode::from(1),
        }
    }
}

/// Deadline shared by every remote call of a run, token fetch included.
pub fn run_deadline(config: &Config) -> Instant {
    Instant::now() + config.timeout
}

/// Acquire a token before `deadline`, or `None` so the run continues unauthenticated.
pub async fn authorize(
    authorizer: &Authorizer,
    config: &Config,
    deadline: Instant,
) -> Option<AccessToken> {
    let result = match timeout_at(deadline, authorizer.token()).await {
        Ok(result) => result,
        Err(_) => Err(CheckError::DeadlineExceeded(config.timeout.as_secs())),
    };

    match result {
        Ok(token) => {
            info!(
                "authorized via {}, token expires {:?}",
                authorizer.credential().kind(),
                token.expires_on
            );
            Some(token)
        }
        Err(e) => {
            warn!("cannot get authorizer");
            warn!("Error: '{}'", e);
            None
        }
    }
}

/// Fail the task when setup breaks before any stage ran.
pub fn fail_setup<W: Write>(
    log: &mut BuildLog<W>,
    what: &str,
    err: impl std::fmt::Display,
) -> ExitCode {
    error!("{}: {}", what, err);
    if let Err(io_err) = log.fail(Stage::Create.build_tag()) {
        error!("cannot write build log: {}", io_err);
    }
    ExitCode::from(1)
}

/// One pass over the cache lifecycle.
pub struct Runner<'a, W: Write> {
    config: &'a Config,
    client: &'a CachesClient,
    log: BuildLog<W>,
}

impl<'a, W: Write> Runner<'a, W> {
    pub fn new(config: &'a Config, client: &'a CachesClient, log: BuildLog<W>) -> Self {
        Self {
            config,
            client,
            log,
        }
    }

    /// Run every stage before `deadline`; on the first failure, tag the build and fail the task.
    pub async fn run(&mut self, deadline: Instant) -> RunOutcome {
        match self.stages(deadline).await {
            Ok(()) => RunOutcome::Passed,
            Err((stage, err)) => {
                error!("{}", stage.failure_message());
                error!("Error: '{}'", err);
                if let Err(io_err) = self.log.fail(stage.build_tag()) {
                    error!("cannot write build log: {}", io_err);
                }
                RunOutcome::Failed { stage, error: err }
            }
        }
    }

    pub fn into_log(self) -> BuildLog<W> {
        self.log
    }

    async fn stages(&mut self, deadline: Instant) -> std::result::Result<(), (Stage, CheckError)> {
        let config = self.config;
        let client = self.client;
        let group = config.resource_group.as_str();
        let name = config.cache_name.as_str();

        let body = Cache::new(
            &config.location,
            name,
            &config.subnet_id(),
            config.cache_size_gb,
            &config.sku,
        );

        info!("creating cache {} in {}", name, config.location);
        let create = bounded(
            deadline,
            config,
            Stage::Create,
            client.create_or_update(group, name, &body),
        )
        .await?;
        self.dump(Stage::Create, &create)?;

        info!("Going into wait for create cache completion");
        bounded(
            deadline,
            config,
            Stage::WaitCreate,
            client.wait_for_completion(&create),
        )
        .await?;

        info!("Going into get cache call");
        let cache = bounded(
            deadline,
            config,
            Stage::Get,
            client.get(group, name),
        )
        .await?;
        self.dump(Stage::Get, &cache)?;

        info!("Going into Delete Cache call");
        let delete = bounded(
            deadline,
            config,
            Stage::Delete,
            client.delete(group, name),
        )
        .await?;
        self.dump(Stage::Delete, &delete)?;

        // Completion is tracked on the delete handle, never the create one.
        bounded(
            deadline,
            config,
            Stage::WaitDelete,
            client.wait_for_completion(&delete),
        )
        .await?;

        info!("Cache delete finished - tests are done");
        Ok(())
    }

    /// Print `value` as one JSON line.
    fn dump<T: Serialize>(
        &mut self,
        stage: Stage,
        value: &T,
    ) -> std::result::Result<(), (Stage, CheckError)> {
        let json = serde_json::to_string(value).map_err(|e| (stage, e.into()))?;
        self.log.line(&json).map_err(|e| (stage, e.into()))
    }
}

/// Await `fut` under the run deadline, tagging any error with its stage.
async fn bounded<T, F>(
    deadline: Instant,
    config: &Config,
    stage: Stage,
    fut: F,
) -> std::result::Result<T, (Stage, CheckError)>
where
    F: Future<Output = Result<T>>,
{
    match timeout_at(deadline, fut).await {
        Ok(result) => result.map_err(|e| (stage, e)),
        Err(_) => Err((stage, CheckError::DeadlineExceeded(config.timeout.as_secs()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use mockito::{Matcher, Mock, Server, ServerGuard};
    use reqwest::Client;
    use serde_json::json;
    use tokio::net::TcpListener;

    const CACHE_PATH: &str =
        "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.StorageCache/caches/goSDK";

    fn test_config(server: &ServerGuard) -> Config {
        let mut config = Config::from_lookup(|key| match key {
            "AZURE_SUBSCRIPTION_ID" => Some("sub".to_string()),
            "RESOURCE_GROUP_NAME" => Some("rg".to_string()),
            "SUBNET_NAME" => Some("default".to_string()),
            "_REGION" => Some("eastus".to_string()),
            _ => None,
        });
        config.resource_manager_endpoint = server.url();
        config.active_directory_endpoint = server.url();
        config.poll_interval = Duration::from_millis(5);
        config
    }

    fn token() -> AccessToken {
        AccessToken {
            token: "tok".into(),
            expires_on: None,
        }
    }

    async fn run_against(config: &Config, token: Option<&AccessToken>) -> (RunOutcome, String) {
        let client = CachesClient::new(Client::new(), config, token).unwrap();
        let mut runner = Runner::new(config, &client, BuildLog::new(Vec::new()));
        let outcome = runner.run(run_deadline(config)).await;
        let output = String::from_utf8(runner.into_log().into_inner()).unwrap();
        (outcome, output)
    }

    async fn mock_create(server: &mut ServerGuard) -> Mock {
        let op_url = format!("{}/operations/create-1", server.url());
        server
            .mock("PUT", CACHE_PATH)
            .match_query(Matcher::Any)
            .match_body(Matcher::PartialJson(json!({
                "location": "eastus",
                "sku": {"name": "Standard_2G"},
                "properties": {
                    "cacheSizeGB": 3072,
                    "subnet": "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Network/virtualNetworks/vnet_rg/subnets/default"
                }
            })))
            .with_status(201)
            .with_header("Azure-AsyncOperation", &op_url)
            .create_async()
            .await
    }

    async fn mock_status(server: &mut ServerGuard, path: &str, status: &str) -> Mock {
        server
            .mock("GET", path)
            .with_status(200)
            .with_body(
                json!({"status": status, "error": {"code": "Boom", "message": status}}).to_string(),
            )
            .create_async()
            .await
    }

    async fn mock_get(server: &mut ServerGuard) -> Mock {
        server
            .mock("GET", CACHE_PATH)
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                json!({
                    "name": "goSDK",
                    "location": "eastus",
                    "properties": {"cacheSizeGB": 3072, "provisioningState": "Succeeded"}
                })
                .to_string(),
            )
            .create_async()
            .await
    }

    async fn mock_delete(server: &mut ServerGuard) -> Mock {
        let op_url = format!("{}/operations/delete-1", server.url());
        server
            .mock("DELETE", CACHE_PATH)
            .match_query(Matcher::Any)
            .with_status(202)
            .with_header("Azure-AsyncOperation", &op_url)
            .create_async()
            .await
    }

    #[test]
    fn test_stage_tags() {
        assert_eq!(Stage::Create.build_tag(), "FAIL put cache GoSDK");
        assert_eq!(Stage::WaitCreate.build_tag(), "FAIL get cache GoSDK");
        assert_eq!(Stage::WaitDelete.build_tag(), "FAIL delete cache GoSDK");
        assert_eq!(Stage::WaitDelete.failure_message(), "Cache Delete Failed");
    }

    #[test]
    fn test_fail_setup_tags_put_stage() {
        let mut log = BuildLog::new(Vec::new());
        let _ = fail_setup(&mut log, "cannot build HTTP client", "tls backend missing");
        assert_eq!(
            log.into_inner(),
            b"##vso[build.addbuildtag]FAIL put cache GoSDK\n##vso[task.complete result=Failed;]\n"
        );
    }

    #[test]
    fn test_fail_setup_survives_broken_log() {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
                Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let mut log = BuildLog::new(Broken);
        let _ = fail_setup(&mut log, "cannot create caches client", "bad header");
    }

    #[tokio::test]
    async fn test_full_run_passes() {
        let mut server = Server::new_async().await;
        let create = mock_create(&mut server).await;
        let create_done = mock_status(&mut server, "/operations/create-1", "Succeeded").await;
        let get = mock_get(&mut server).await;
        let delete = mock_delete(&mut server).await;
        let delete_done = mock_status(&mut server, "/operations/delete-1", "Succeeded").await;

        let config = test_config(&server);
        let (outcome, output) = run_against(&config, Some(&token())).await;

        assert!(matches!(outcome, RunOutcome::Passed));
        assert!(outcome.failed_stage().is_none());
        assert!(!output.contains("##vso"));
        assert!(output.contains("\"name\":\"goSDK\""));
        assert!(output.contains("\"method\":\"DELETE\""));

        for mock in [create, create_done, get, delete, delete_done] {
            mock.assert_async().await;
        }
    }

    #[tokio::test]
    async fn test_create_failure_stops_run() {
        let mut server = Server::new_async().await;
        let _create = server
            .mock("PUT", CACHE_PATH)
            .match_query(Matcher::Any)
            .with_status(409)
            .with_body(json!({"error": {"code": "Conflict", "message": "busy"}}).to_string())
            .create_async()
            .await;
        let get = server
            .mock("GET", CACHE_PATH)
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;
        let delete = server
            .mock("DELETE", CACHE_PATH)
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let config = test_config(&server);
        let (outcome, output) = run_against(&config, Some(&token())).await;

        assert_eq!(outcome.failed_stage(), Some(Stage::Create));
        assert_eq!(
            output,
            "##vso[build.addbuildtag]FAIL put cache GoSDK\n##vso[task.complete result=Failed;]\n"
        );
        get.assert_async().await;
        delete.assert_async().await;
    }

    #[tokio::test]
    async fn test_unauthorized_run_fails_at_create() {
        let mut server = Server::new_async().await;
        let _create = server
            .mock("PUT", CACHE_PATH)
            .match_query(Matcher::Any)
            .match_header("authorization", Matcher::Missing)
            .with_status(401)
            .create_async()
            .await;

        let config = test_config(&server);
        let (outcome, _) = run_against(&config, None).await;

        match outcome {
            RunOutcome::Failed { stage, error } => {
                assert_eq!(stage, Stage::Create);
                assert!(matches!(error, CheckError::Unauthorized));
            }
            RunOutcome::Passed => panic!("unauthorized run must not pass"),
        }
    }

    #[tokio::test]
    async fn test_delete_wait_uses_delete_handle() {
        let mut server = Server::new_async().await;
        let _create = mock_create(&mut server).await;
        let create_done = mock_status(&mut server, "/operations/create-1", "Succeeded").await;
        let _get = mock_get(&mut server).await;
        let _delete = mock_delete(&mut server).await;
        let delete_failed = mock_status(&mut server, "/operations/delete-1", "Failed").await;

        let config = test_config(&server);
        let (outcome, output) = run_against(&config, Some(&token())).await;

        assert_eq!(outcome.failed_stage(), Some(Stage::WaitDelete));
        assert!(output.contains("##vso[build.addbuildtag]FAIL delete cache GoSDK"));
        // Exactly one poll: the create handle is not reused for the delete wait.
        create_done.assert_async().await;
        delete_failed.assert_async().await;
    }

    #[tokio::test]
    async fn test_deadline_fails_stage_in_flight() {
        let mut server = Server::new_async().await;
        let _create = mock_create(&mut server).await;
        let _running = mock_status(&mut server, "/operations/create-1", "InProgress").await;

        let mut config = test_config(&server);
        config.timeout = Duration::from_millis(100);
        let (outcome, output) = run_against(&config, Some(&token())).await;

        match outcome {
            RunOutcome::Failed { stage, error } => {
                assert_eq!(stage, Stage::WaitCreate);
                assert!(matches!(error, CheckError::DeadlineExceeded(_)));
            }
            RunOutcome::Passed => panic!("run past its deadline must not pass"),
        }
        assert!(output.contains("FAIL get cache GoSDK"));
    }

    #[tokio::test]
    async fn test_authorize_failure_returns_none() {
        let mut server = Server::new_async().await;
        let _token = server
            .mock("POST", "/tenant/oauth2/token")
            .with_status(400)
            .with_body(json!({"error": "invalid_request"}).to_string())
            .create_async()
            .await;

        let config = test_config(&server);
        let credential = crate::auth::Credential::ClientSecret {
            tenant_id: "tenant".into(),
            client_id: "app".into(),
            client_secret: "secret".into(),
        };
        let authorizer = Authorizer::new(Client::new(), credential, &config);

        let deadline = run_deadline(&config);
        assert!(authorize(&authorizer, &config, deadline).await.is_none());
    }

    #[tokio::test]
    async fn test_slow_token_spends_run_budget() {
        // Accepts connections and never answers.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let silent_url = format!("http://{}", listener.local_addr().unwrap());
        let holder = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let mut server = Server::new_async().await;
        let _create = server
            .mock("PUT", CACHE_PATH)
            .match_query(Matcher::Any)
            .with_status(401)
            .create_async()
            .await;

        let mut config = test_config(&server);
        config.active_directory_endpoint = silent_url;
        config.timeout = Duration::from_millis(300);

        let credential = crate::auth::Credential::ClientSecret {
            tenant_id: "tenant".into(),
            client_id: "app".into(),
            client_secret: "secret".into(),
        };
        let authorizer = Authorizer::new(Client::new(), credential, &config);

        let started = Instant::now();
        let deadline = run_deadline(&config);
        let token = authorize(&authorizer, &config, deadline).await;
        assert!(token.is_none());

        let client = CachesClient::new(Client::new(), &config, token.as_ref()).unwrap();
        let mut runner = Runner::new(&config, &client, BuildLog::new(Vec::new()));
        let outcome = runner.run(deadline).await;
        let elapsed = started.elapsed();

        match outcome {
            RunOutcome::Failed { stage, error } => {
                assert_eq!(stage, Stage::Create);
                assert!(matches!(error, CheckError::DeadlineExceeded(_)));
            }
            RunOutcome::Passed => panic!("run past its deadline must not pass"),
        }
        assert!(elapsed < Duration::from_millis(550), "took {:?}", elapsed);
        holder.abort();
    }

    #[tokio::test]
    async fn test_get_failure_skips_delete() {
        let mut server = Server::new_async().await;
        let _create = mock_create(&mut server).await;
        let _create_done = mock_status(&mut server, "/operations/create-1", "Succeeded").await;
        let _get = server
            .mock("GET", CACHE_PATH)
            .match_query(Matcher::Any)
            .with_status(500)
            .with_body(json!({"error": {"code": "InternalError", "message": "oops"}}).to_string())
            .create_async()
            .await;
        let delete = server
            .mock("DELETE", CACHE_PATH)
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let config = test_config(&server);
        let (outcome, output) = run_against(&config, Some(&token())).await;

        assert_eq!(outcome.failed_stage(), Some(Stage::Get));
        assert!(output.ends_with(
            "##vso[build.addbuildtag]FAIL get cache GoSDK\n##vso[task.complete result=Failed;]\n"
        ));
        delete.assert_async().await;
    }
}
