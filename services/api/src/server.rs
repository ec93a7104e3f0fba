use crate::cli::ServeArgs;
use crate::infra::{
    AppState, ConfigCredentialStore, InMemoryCandidateRepository, StaticNotifyConfigStore,
};
use crate::routes::with_service_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use resume_eval::config::AppConfig;
use resume_eval::error::AppError;
use resume_eval::telemetry;
use resume_eval::workflows::batch::{
    BatchEvaluationService, ScriptItemFetcher, WorkflowEvaluationClient,
};
use resume_eval::workflows::notify::{
    PushError, PushScheduler, PushService, PushSessionStore, WebhookDispatcher,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

type Push = PushService<InMemoryCandidateRepository, WebhookDispatcher>;

fn push_service(
    config: &AppConfig,
    repository: Arc<InMemoryCandidateRepository>,
) -> Result<Arc<Push>, AppError> {
    let dispatcher = WebhookDispatcher::new().map_err(PushError::from)?;
    let configs = Arc::new(StaticNotifyConfigStore::new(config.notify.clone()));
    Ok(Arc::new(PushService::new(
        repository,
        configs,
        Arc::new(dispatcher),
        Arc::new(PushSessionStore::new()),
    )))
}

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let repository = Arc::new(InMemoryCandidateRepository::default());
    let push = push_service(&config, repository.clone())?;
    push.sessions().spawn_sweeper();
    if config.notify.enabled {
        PushScheduler::new(push.clone(), config.notify.schedule).spawn();
    } else {
        info!("daily push disabled");
    }

    if config.fetch.credentials.is_empty() {
        warn!("no HR credentials configured; batch runs will be rejected");
    }
    let batch = Arc::new(
        BatchEvaluationService::new(
            repository,
            Arc::new(WorkflowEvaluationClient::new(config.evaluation.clone())?),
            Arc::new(ScriptItemFetcher::new(&config.fetch)),
            Arc::new(ConfigCredentialStore::new(&config.fetch)),
            config.batch,
        )
        .with_notifier(push.clone()),
    );

    let app = with_service_routes(batch, push)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        concurrency = config.batch.concurrency,
        "resume evaluation orchestrator ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}

pub(crate) async fn test_push() -> Result<(), AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;

    let push = push_service(&config, Arc::new(InMemoryCandidateRepository::default()))?;
    push.send_test(config.notify.owner).await?;
    info!(owner = %config.notify.owner, "test message sent");
    Ok(())
}
