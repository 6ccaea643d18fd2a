//! Device registry.
//!
//! # Responsibilities
//! - Build controllers lazily from configuration
//! - Share one circuit breaker and one pool per endpoint
//! - Resolve device names for the CLI
//!
//! # Design Decisions
//! - Devices that share `host:port` share a breaker and a pool; the first
//!   device built for an endpoint supplies the pool's credentials
//! - No global state; everything hangs off the registry instance

use dashmap::DashMap;
use std::sync::Arc;

use crate::config::{ControlConfig, DeviceConfig, Protocol};
use crate::device::controller::{DisplayController, Operation, OperationOutput};
use crate::device::power::{PowerStateMachine, PowerTiming};
use crate::error::ControlError;
use crate::net::endpoint::{Endpoint, EndpointKey};
use crate::net::pool::{ConnectionPool, DeviceConnector, PoolSettings};
use crate::protocol::client::ProtocolClient;
use crate::resilience::circuit_breaker::{BreakerRegistry, BreakerSettings};
use crate::resilience::retries::{CommandOutcome, RetryExecutor, RetryPolicy};
use crate::resilience::timeouts::Timeouts;

/// Build the endpoint described by a device entry.
pub fn endpoint_for(device: &DeviceConfig) -> Endpoint {
    let endpoint = Endpoint::new(device.host.clone(), device.port);
    match &device.password {
        Some(secret) => endpoint.with_auth_secret(secret.clone()),
        None => endpoint,
    }
}

/// Build a controller for a device entry, selected by its protocol.
pub fn create_controller(
    device: &DeviceConfig,
    pool: ConnectionPool<DeviceConnector>,
    executor: RetryExecutor,
    timing: PowerTiming,
) -> DisplayController {
    match device.protocol {
        Protocol::Pjlink => {
            let client = ProtocolClient::new(Arc::new(endpoint_for(device)), pool, device.family);
            DisplayController::new(
                device.name.clone(),
                Arc::new(client),
                executor,
                PowerStateMachine::new(device.name.clone(), timing),
            )
        }
    }
}

/// All configured devices and their shared resilience state.
#[derive(Debug)]
pub struct DeviceRegistry {
    config: Arc<ControlConfig>,
    breakers: BreakerRegistry,
    pools: DashMap<EndpointKey, ConnectionPool<DeviceConnector>>,
    controllers: DashMap<String, Arc<DisplayController>>,
}

impl DeviceRegistry {
    pub fn new(config: Arc<ControlConfig>) -> Self {
        let breakers = BreakerRegistry::new(BreakerSettings::from(&config.circuit_breaker));
        Self {
            config,
            breakers,
            pools: DashMap::new(),
            controllers: DashMap::new(),
        }
    }

    pub fn config(&self) -> &ControlConfig {
        &self.config
    }

    pub fn devices(&self) -> &[DeviceConfig] {
        &self.config.devices
    }

    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    /// Controller for `name`, built on first use.
    pub async fn controller(&self, name: &str) -> Result<Arc<DisplayController>, ControlError> {
        if let Some(existing) = self.controllers.get(name) {
            return Ok(Arc::clone(existing.value()));
        }

        let device = self
            .config
            .device(name)
            .ok_or_else(|| ControlError::UnknownDevice {
                name: name.to_string(),
            })?;

        let pool = self.pool_for(device).await;
        let key = EndpointKey {
            host: device.host.clone(),
            port: device.port,
        };
        let executor = RetryExecutor::new(
            RetryPolicy::from(&self.config.retry),
            self.breakers.get_or_create(&key),
        );
        let controller = create_controller(
            device,
            pool,
            executor,
            PowerTiming::from(&self.config.power),
        );

        tracing::debug!(device = %name, endpoint = %key, family = %device.family, "Controller created");
        let entry = self
            .controllers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(controller));
        Ok(Arc::clone(entry.value()))
    }

    async fn pool_for(&self, device: &DeviceConfig) -> ConnectionPool<DeviceConnector> {
        let key = EndpointKey {
            host: device.host.clone(),
            port: device.port,
        };
        if let Some(pool) = self.pools.get(&key) {
            return pool.clone();
        }

        let candidate = ConnectionPool::new(
            DeviceConnector::new(
                Arc::new(endpoint_for(device)),
                Timeouts::from(&self.config.timeouts),
            ),
            PoolSettings::from(&self.config.pool),
        );
        let pool = self
            .pools
            .entry(key)
            .or_insert_with(|| candidate)
            .clone();

        if self.config.pool.min_connections > 0 {
            pool.initialize().await;
        }
        pool
    }

    /// Execute an operation on a named device.
    pub async fn execute(&self, device: &str, operation: Operation) -> CommandOutcome<OperationOutput> {
        match self.controller(device).await {
            Ok(controller) => controller.execute(operation).await,
            Err(e) => CommandOutcome {
                operation: operation.name().to_string(),
                result: Err(e),
                attempts: 0,
                elapsed: std::time::Duration::ZERO,
            },
        }
    }
}
