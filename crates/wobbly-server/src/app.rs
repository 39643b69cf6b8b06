//! The two listeners that make up the service.

use crate::config::ServiceConfig;
use crate::error::ServerResult;
use crate::router::{LogicRoutes, MetricsRouter};
use crate::server::Server;
use crate::shutdown::ShutdownSignal;
use metrics_exporter_prometheus::PrometheusHandle;
use std::net::SocketAddr;
use std::sync::Arc;
use wobbly_middleware::BoxedHandler;

/// Logic listener plus metrics listener, bound and ready to run.
#[derive(Debug)]
pub struct App {
    logic: Server,
    metrics: Server,
}

impl App {
    /// Builds the routes from `config` and binds both listeners.
    ///
    /// Fails if either address cannot be bound.
    pub async fn bind(
        config: &ServiceConfig,
        metrics: Option<PrometheusHandle>,
    ) -> ServerResult<Self> {
        let logic = LogicRoutes::from_config(config)?.build();
        Self::bind_with(config, logic, metrics).await
    }

    /// Binds both listeners around an already built logic handler.
    pub async fn bind_with(
        config: &ServiceConfig,
        logic: BoxedHandler,
        metrics: Option<PrometheusHandle>,
    ) -> ServerResult<Self> {
        let grace = config.shutdown_grace();
        let logic = Server::bind("logic", config.http_addr, logic, grace).await?;
        let metrics = Server::bind(
            "metrics",
            config.metrics_addr,
            Arc::new(MetricsRouter::new(metrics)),
            grace,
        )
        .await?;

        Ok(Self { logic, metrics })
    }

    /// Address of the logic listener.
    pub fn logic_addr(&self) -> ServerResult<SocketAddr> {
        self.logic.local_addr()
    }

    /// Address of the metrics listener.
    pub fn metrics_addr(&self) -> ServerResult<SocketAddr> {
        self.metrics.local_addr()
    }

    /// Serves both listeners until `shutdown` fires and both have drained.
    pub async fn run(self, shutdown: ShutdownSignal) -> ServerResult<()> {
        let (logic, metrics) = tokio::join!(
            self.logic.run_with_shutdown(shutdown.clone()),
            self.metrics.run_with_shutdown(shutdown),
        );
        logic?;
        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StablerKind;
    use crate::error::ServerError;

    fn local_config() -> ServiceConfig {
        ServiceConfig {
            http_addr: "127.0.0.1:0".parse().unwrap(),
            metrics_addr: "127.0.0.1:0".parse().unwrap(),
            stabler: StablerKind::Direct,
            ..ServiceConfig::default()
        }
    }

    #[tokio::test]
    async fn test_binds_two_distinct_listeners() {
        let app = App::bind(&local_config(), None).await.unwrap();
        assert_ne!(app.logic_addr().unwrap(), app.metrics_addr().unwrap());
    }

    #[tokio::test]
    async fn test_metrics_bind_failure_is_reported() {
        let first = App::bind(&local_config(), None).await.unwrap();
        let config = ServiceConfig {
            metrics_addr: first.metrics_addr().unwrap(),
            ..local_config()
        };

        let err = App::bind(&config, None).await.unwrap_err();
        assert!(matches!(err, ServerError::Bind { listener: "metrics", .. }));
    }
}
