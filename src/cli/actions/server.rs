use crate::{
    api::{self, RateLimiter},
    cli::{
        commands::{app, database, mail, redis, worker},
        telemetry,
    },
    kv::{self, KvStore, RedisKv},
    mail::{Provider, SEND_EMAIL, SendEmailHandler, TemplateRenderer, build_sender},
    monitoring,
    service::{AccessTokens, AuthConfig, AuthService},
    store::{self, PgUserStore},
    supervisor::{Supervisor, shutdown_signal},
    tasks::{HandlerRegistry, RedisQueue, TaskQueue, WorkerPool},
    tokens::TokenStore,
};
use anyhow::Result;
use std::{
    net::{Ipv6Addr, SocketAddr},
    sync::Arc,
};
use tracing::{debug, info};

#[derive(Debug)]
pub struct Args {
    pub app: app::Options,
    pub database: database::Options,
    pub redis: redis::Options,
    pub mail: mail::Options,
    pub worker: worker::Options,
}

/// Connect the stores, wire the service and run every unit under the supervisor.
///
/// # Errors
/// Returns an error if a store is unreachable, the mail provider is
/// misconfigured, or a unit fails (including failing to bind its port).
pub async fn execute(args: Args) -> Result<()> {
    let production = args.app.production();
    debug!(environment = %args.app.environment, production, "Starting");

    let dsn = args.database.dsn()?;
    let pool = store::connect(dsn.as_str()).await?;
    store::ensure_schema(&pool).await?;

    let redis_url = args.redis.url()?;
    let conn = kv::connect(redis_url.as_str()).await?;
    let kv: Arc<dyn KvStore> = Arc::new(RedisKv::new(conn.clone()));

    let queue = TaskQueue::new(
        Arc::new(
            RedisQueue::new(conn, &args.worker.queue_name)
                .with_dead_capacity(args.worker.dead_capacity),
        ),
        args.worker.retry,
    );

    let service = AuthService::new(
        Arc::new(PgUserStore::new(pool.clone())),
        TokenStore::new(kv.clone()),
        queue.clone(),
        AccessTokens::new(&args.app.key),
        AuthConfig::new(args.app.api_host.clone()).with_production(production),
    );

    let sender = build_sender(
        Provider::for_environment(production),
        &args.mail.settings(&args.app.name),
    )?;
    let registry = HandlerRegistry::new().register(
        SEND_EMAIL,
        Arc::new(SendEmailHandler::new(
            TemplateRenderer::new(&args.mail.templates_dir),
            sender,
        )),
    );
    registry.ensure_registered(&[SEND_EMAIL])?;
    let workers = WorkerPool::new(queue.clone(), registry, args.worker.worker);

    let router = api::app(service, kv.clone(), RateLimiter::new(kv));

    // Closers go in first so a unit failing at startup still releases them.
    let mut supervisor = Supervisor::new(args.app.shutdown_timeout);
    supervisor.close_on_shutdown("postgres", move || async move { pool.close().await });
    supervisor.close_on_shutdown("telemetry", || async {
        // The batch exporter flushes synchronously.
        if let Err(err) = tokio::task::spawn_blocking(telemetry::shutdown_tracer).await {
            debug!("tracer shutdown task failed: {err}");
        }
    });

    let api_addr = any_addr(args.app.port);
    supervisor.spawn("api", move |shutdown| api::listen(api_addr, router, shutdown));

    if args.app.monitoring {
        let monitoring_addr = any_addr(args.app.monitoring_port);
        let queue = queue.clone();
        supervisor.spawn("monitoring", move |shutdown| {
            monitoring::listen(monitoring_addr, queue, shutdown)
        });
    } else {
        info!("Monitoring endpoint disabled");
    }

    supervisor.spawn("worker", move |shutdown| workers.run(shutdown));

    supervisor.run(shutdown_signal()).await
}

fn any_addr(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv6Addr::UNSPECIFIED, port))
}
